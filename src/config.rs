//! Session configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{AppError, Result};

/// Default cap on the bytes buffered for a single incoming value (64 mebibytes).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Default capacity of the FIFO queue of pending session commands.
pub const DEFAULT_COMMAND_QUEUE_DEPTH: usize = 32;

fn default_true() -> bool {
    true
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

fn default_command_queue_depth() -> usize {
    DEFAULT_COMMAND_QUEUE_DEPTH
}

/// Configuration of a single worker session.
///
/// Immutable once handed to [`Session::new`](crate::Session::new). Build it
/// with [`SessionConfig::new`] or load it from TOML:
///
/// ```toml
/// process_path = "/opt/pdal/bin/pdal-session"
/// working_directory = "/var/lib/pdal"   # optional
/// log = false                           # optional, default true
/// max_frame_bytes = 1048576             # optional, 0 means unbounded
/// command_queue_depth = 8               # optional
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct SessionConfig {
    /// Worker executable to launch.
    pub process_path: PathBuf,
    /// Directory the worker starts in; the executable's directory when unset.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// Echo every outgoing line and every incoming chunk through `tracing`.
    #[serde(default = "default_true")]
    pub log: bool,
    /// Largest single value the framer buffers before failing; 0 means no cap.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Capacity of the command queue feeding the session actor.
    #[serde(default = "default_command_queue_depth")]
    pub command_queue_depth: usize,
}

impl SessionConfig {
    /// Create a configuration for `process_path` with every default applied.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `process_path` is empty.
    pub fn new(process_path: impl Into<PathBuf>) -> Result<Self> {
        let config = Self {
            process_path: process_path.into(),
            working_directory: None,
            log: true,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            command_queue_depth: DEFAULT_COMMAND_QUEUE_DEPTH,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the worker's working directory.
    #[must_use]
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Enable or disable the diagnostic echo.
    #[must_use]
    pub fn with_log(mut self, log: bool) -> Self {
        self.log = log;
        self
    }

    /// Set the framer's per-value buffer cap; 0 disables the cap.
    #[must_use]
    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }

    /// Executable to launch.
    ///
    /// A relative path with a directory component is anchored to the current
    /// directory, since the child resolves it against its own working
    /// directory otherwise. A bare name is left for `PATH` lookup.
    #[must_use]
    pub fn program(&self) -> PathBuf {
        if self.process_path.is_absolute() || self.process_path.components().count() < 2 {
            return self.process_path.clone();
        }
        std::path::absolute(&self.process_path).unwrap_or_else(|_| self.process_path.clone())
    }

    /// Directory the worker is launched in.
    ///
    /// Falls back to the parent of [`program`](Self::program), or the current
    /// directory when the path has no parent component.
    #[must_use]
    pub fn working_directory(&self) -> PathBuf {
        if let Some(dir) = &self.working_directory {
            return dir.clone();
        }
        match self.program().parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Framer cap as an `Option`, `None` when unbounded.
    #[must_use]
    pub fn frame_limit(&self) -> Option<usize> {
        (self.max_frame_bytes > 0).then_some(self.max_frame_bytes)
    }

    /// Validate invariants that `serde` cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when `process_path` is empty or the command
    /// queue has no capacity.
    pub fn validate(&self) -> Result<()> {
        if self.process_path.as_os_str().is_empty() {
            return Err(AppError::Config(
                "process_path must name the pdal-session executable".into(),
            ));
        }
        if self.command_queue_depth == 0 {
            return Err(AppError::Config(
                "command_queue_depth must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
