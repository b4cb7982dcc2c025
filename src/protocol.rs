//! Wire types for the worker's newline-delimited JSON protocol.
//!
//! Outgoing requests are single-line JSON objects of the form
//! `{"command": "...", "params": {...}}` terminated by `\n`. Incoming
//! responses are free-form objects; a response counts as successful when it
//! carries `status == 1` (commands) or `ready == 1` (handshake).
//!
//! | Command          | Params                          | Consumed payload |
//! |------------------|---------------------------------|------------------|
//! | `create`         | `pipelineDesc`                  | —                |
//! | `destroy`        | —                               | —                |
//! | `getNumPoints`   | —                               | `count`          |
//! | `isSessionValid` | —                               | `valid`          |
//! | `read`           | `transmitHost`, `transmitPort`  | —                |

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};

use crate::{AppError, Result};

/// A JSON object as it appears on the wire.
pub type Payload = serde_json::Map<String, Value>;

/// Command name for building a pipeline inside the worker.
pub const CREATE: &str = "create";
/// Command name for tearing the worker's pipeline down.
pub const DESTROY: &str = "destroy";
/// Command name for the point-count query.
pub const GET_NUM_POINTS: &str = "getNumPoints";
/// Command name for the validity check.
pub const IS_SESSION_VALID: &str = "isSessionValid";
/// Command name for streaming points to a remote listener.
pub const READ: &str = "read";

/// A request descriptor: a command name plus optional parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    /// Command understood by the worker.
    pub command: String,
    /// Command parameters; omitted from the wire when `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Payload>,
}

impl Request {
    /// Create a request without parameters.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            params: None,
        }
    }

    /// Add one parameter, creating the parameter map on first use.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params
            .get_or_insert_with(Payload::new)
            .insert(key.into(), value.into());
        self
    }

    /// `create` request for the given pipeline description.
    #[must_use]
    pub fn create(pipeline_desc: &str) -> Self {
        Self::new(CREATE).with_param("pipelineDesc", pipeline_desc)
    }

    /// `destroy` request.
    #[must_use]
    pub fn destroy() -> Self {
        Self::new(DESTROY)
    }

    /// `getNumPoints` request.
    #[must_use]
    pub fn get_num_points() -> Self {
        Self::new(GET_NUM_POINTS)
    }

    /// `isSessionValid` request.
    #[must_use]
    pub fn is_session_valid() -> Self {
        Self::new(IS_SESSION_VALID)
    }

    /// `read` request streaming to `host:port`.
    #[must_use]
    pub fn read(host: &str, port: u16) -> Self {
        Self::new(READ)
            .with_param("transmitHost", host)
            .with_param("transmitPort", port)
    }

    /// Encode as one compact JSON line terminated by `\n`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if serialisation fails.
    pub fn to_line(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec(self)
            .map_err(|e| AppError::Protocol(format!("failed to encode request: {e}")))?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// A settled response object.
#[derive(Debug, Clone, PartialEq)]
pub struct Response(Payload);

impl Response {
    /// Wrap a parsed object.
    #[must_use]
    pub fn new(payload: Payload) -> Self {
        Self(payload)
    }

    /// `true` when `status == 1` or `ready == 1`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        indicator_set(&self.0, "status") || indicator_set(&self.0, "ready")
    }

    /// `true` when `ready == 1`.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        indicator_set(&self.0, "ready")
    }

    /// Look up a payload field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Take ownership of the full payload.
    #[must_use]
    pub fn into_payload(self) -> Payload {
        self.0
    }

    /// Decode the payload into `T`, mapping shape mismatches to
    /// `AppError::Protocol`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` naming `command` when a required field is
    /// missing or has the wrong type.
    pub fn decode<T: DeserializeOwned>(&self, command: &str) -> Result<T> {
        T::deserialize(&Value::Object(self.0.clone()))
            .map_err(|e| AppError::Protocol(format!("unexpected payload for {command}: {e}")))
    }
}

/// Payload of a successful `getNumPoints` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct NumPoints {
    /// Number of points in the worker's pipeline.
    #[serde(deserialize_with = "point_count")]
    pub count: u64,
}

/// Payload of a successful `isSessionValid` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Validity {
    /// Whether the worker's pipeline is usable.
    pub valid: bool,
}

/// Typed interpretation of a successful response, keyed by the command that
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Success with no consumed payload (`create`, `destroy`, `read`, and any
    /// command outside the known vocabulary).
    Ack,
    /// `getNumPoints` result.
    NumPoints(u64),
    /// `isSessionValid` result.
    Validity(bool),
}

impl Reply {
    /// Interpret `response` as the reply to `command`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` when the response is not successful or
    /// its payload does not match the command's expected shape.
    pub fn decode(command: &str, response: &Response) -> Result<Self> {
        if !response.is_success() {
            return Err(AppError::Protocol(format!(
                "non-successful return for {command}"
            )));
        }
        match command {
            GET_NUM_POINTS => response
                .decode::<NumPoints>(command)
                .map(|p| Self::NumPoints(p.count)),
            IS_SESSION_VALID => response
                .decode::<Validity>(command)
                .map(|p| Self::Validity(p.valid)),
            _ => Ok(Self::Ack),
        }
    }
}

/// `2^64` as a float; every whole `f64` below it fits a `u64`.
const U64_BOUND: f64 = 18_446_744_073_709_551_616.0;

/// Accept any JSON number that denotes a non-negative whole count, so a
/// worker that reports `42.0` is read as 42.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::float_cmp)]
fn point_count<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let number = Number::deserialize(deserializer)?;
    if let Some(count) = number.as_u64() {
        return Ok(count);
    }
    match number.as_f64() {
        Some(v) if (0.0..U64_BOUND).contains(&v) && v.trunc() == v => Ok(v as u64),
        _ => Err(D::Error::custom(format!(
            "count must be a non-negative whole number, got {number}"
        ))),
    }
}

fn indicator_set(payload: &Payload, key: &str) -> bool {
    payload
        .get(key)
        .and_then(Value::as_f64)
        .is_some_and(|v| (v - 1.0).abs() < f64::EPSILON)
}
