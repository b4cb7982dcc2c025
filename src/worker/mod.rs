//! Worker process plumbing.
//!
//! Everything here is session-agnostic: it launches a process, frames its
//! stdout into JSON objects and turns stream activity into [`WorkerEvent`]s.
//! Deciding what an event means for an in-flight request is the session
//! actor's job.
//!
//! Submodules:
//! - `framer`: incremental top-level JSON object extraction.
//! - `reader`: stdout task emitting decoded objects.
//! - `process`: launch, stderr pump and exit monitor.

pub mod framer;
pub mod process;
pub mod reader;

use crate::protocol::Payload;

/// `tracing` target used for the diagnostic echo of raw stream traffic.
pub const ECHO_TARGET: &str = "pdal_session::echo";

/// Stream and lifecycle activity reported by a worker's monitor tasks.
///
/// Every event carries the generation of the process that produced it so
/// that late events from a replaced process can be told apart.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// A complete top-level object arrived on stdout.
    Object {
        /// Producing process.
        generation: u64,
        /// The decoded object.
        payload: Payload,
    },
    /// Bytes arrived on stderr.
    Stderr {
        /// Producing process.
        generation: u64,
        /// Chunk content, lossily decoded as UTF-8.
        text: String,
    },
    /// A single stdout value overran the framer limit.
    FramingFailed {
        /// Producing process.
        generation: u64,
        /// Framer error message.
        reason: String,
    },
    /// stdout reached EOF or failed.
    Closed {
        /// Producing process.
        generation: u64,
    },
    /// The process exited.
    Exited {
        /// Producing process.
        generation: u64,
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Terminating signal on Unix.
        signal: Option<i32>,
    },
}

impl WorkerEvent {
    /// Generation of the process that produced the event.
    #[must_use]
    pub fn generation(&self) -> u64 {
        match self {
            Self::Object { generation, .. }
            | Self::Stderr { generation, .. }
            | Self::FramingFailed { generation, .. }
            | Self::Closed { generation }
            | Self::Exited { generation, .. } => *generation,
        }
    }

    /// `true` for events after which the process is no longer usable.
    #[must_use]
    pub fn ends_worker(&self) -> bool {
        matches!(
            self,
            Self::FramingFailed { .. } | Self::Closed { .. } | Self::Exited { .. }
        )
    }
}
