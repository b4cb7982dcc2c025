//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every failure a session can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration is missing, invalid, or cannot be honoured.
    Config(String),
    /// The OS refused to launch the worker executable.
    Spawn(String),
    /// The first value emitted after launch did not carry `ready == 1`.
    Handshake(String),
    /// A settled response carried no success indicator, or its payload did
    /// not have the expected shape.
    Protocol(String),
    /// The worker wrote to its error stream while a request was pending.
    ErrorOutput(String),
    /// The worker closed or exited while a request was pending, or the
    /// session was shut down.
    Terminated(String),
    /// A single incoming value exceeded the configured frame limit.
    Framing(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Short, stable name of the error kind, used as a `tracing` field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Spawn(_) => "spawn",
            Self::Handshake(_) => "handshake",
            Self::Protocol(_) => "protocol",
            Self::ErrorOutput(_) => "error output",
            Self::Terminated(_) => "terminated",
            Self::Framing(_) => "framing",
            Self::Io(_) => "io",
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg)
            | Self::Spawn(msg)
            | Self::Handshake(msg)
            | Self::Protocol(msg)
            | Self::ErrorOutput(msg)
            | Self::Terminated(msg)
            | Self::Framing(msg)
            | Self::Io(msg) => write!(f, "{}: {msg}", self.kind()),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
