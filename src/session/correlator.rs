//! Single-slot request correlator.
//!
//! The worker answers requests strictly in order and without ids, so pairing
//! is positional: whatever signal arrives first after a request is armed
//! settles it. The slot holds at most one [`Expectation`]; settling takes it,
//! so every request settles exactly once and signals that find the slot
//! empty are discarded.

use tracing::{debug, warn};

use crate::protocol::{Payload, Response};
use crate::worker::process::describe_exit;
use crate::worker::WorkerEvent;
use crate::{AppError, Result};

/// What the armed slot is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// The readiness message of a freshly launched worker.
    Handshake,
    /// The response to `command`.
    Reply {
        /// Command name, used in error messages.
        command: String,
    },
}

impl Expectation {
    fn describe(&self) -> String {
        match self {
            Self::Handshake => "ready signal".to_owned(),
            Self::Reply { command } => format!("{command} response"),
        }
    }
}

/// Input that may settle the slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// A parsed object from stdout.
    Value(Payload),
    /// Text observed on stderr.
    ErrorOutput(String),
    /// The worker closed or exited; the string says how.
    Terminated(String),
    /// stdout framing failed irrecoverably.
    Framing(String),
}

impl From<WorkerEvent> for Signal {
    fn from(event: WorkerEvent) -> Self {
        match event {
            WorkerEvent::Object { payload, .. } => Self::Value(payload),
            WorkerEvent::Stderr { text, .. } => Self::ErrorOutput(text),
            WorkerEvent::FramingFailed { reason, .. } => Self::Framing(reason),
            WorkerEvent::Closed { .. } => Self::Terminated("worker closed its output".to_owned()),
            WorkerEvent::Exited { code, signal, .. } => {
                Self::Terminated(describe_exit(code, signal))
            }
        }
    }
}

/// The pending-request slot.
#[derive(Debug, Default)]
pub struct Correlator {
    slot: Option<Expectation>,
}

impl Correlator {
    /// Create an empty correlator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` while an expectation is pending.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.slot.is_some()
    }

    /// Arm the slot. Re-arming a pending slot replaces the old expectation,
    /// whose caller then never settles; the session actor never does this.
    pub fn arm(&mut self, expectation: Expectation) {
        if let Some(previous) = self.slot.replace(expectation) {
            warn!(?previous, "correlator: slot re-armed while a request was pending");
        }
    }

    /// Clear the slot without settling it.
    pub fn disarm(&mut self) -> Option<Expectation> {
        self.slot.take()
    }

    /// Offer `signal` to the slot.
    ///
    /// Returns `None` when nothing is pending (the signal is discarded),
    /// otherwise the settlement outcome:
    ///
    /// - a value with `status == 1` or `ready == 1` settles a reply
    ///   successfully; anything else is `AppError::Protocol`,
    /// - while awaiting the handshake only `ready == 1` succeeds; any other
    ///   value is `AppError::Handshake`,
    /// - stderr text is `AppError::ErrorOutput`,
    /// - close/exit is `AppError::Terminated`,
    /// - framing failure is `AppError::Framing`.
    pub fn settle(&mut self, signal: Signal) -> Option<Result<Response>> {
        let Some(expectation) = self.slot.take() else {
            debug!(?signal, "correlator: no pending request, discarding");
            return None;
        };

        let outcome = match signal {
            Signal::Value(payload) => {
                let response = Response::new(payload);
                match &expectation {
                    Expectation::Handshake if response.is_ready() => Ok(response),
                    Expectation::Handshake => Err(AppError::Handshake(format!(
                        "failed to reach ready state: worker sent {}",
                        serde_json::Value::Object(response.into_payload())
                    ))),
                    Expectation::Reply { .. } if response.is_success() => Ok(response),
                    Expectation::Reply { command } => {
                        Err(AppError::Protocol(format!("non-successful return for {command}")))
                    }
                }
            }
            Signal::ErrorOutput(text) => Err(AppError::ErrorOutput(format!(
                "worker wrote to stderr while awaiting {}: {}",
                expectation.describe(),
                text.trim()
            ))),
            Signal::Terminated(how) => Err(AppError::Terminated(format!(
                "{how} while awaiting {}",
                expectation.describe()
            ))),
            Signal::Framing(reason) => Err(AppError::Framing(reason)),
        };

        Some(outcome)
    }
}
