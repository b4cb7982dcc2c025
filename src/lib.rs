#![forbid(unsafe_code)]

//! Driver for a long-lived PDAL session worker speaking newline-delimited
//! JSON over its standard streams.
//!
//! The crate spawns the worker lazily, performs its readiness handshake,
//! pairs each request with the next object the worker emits, and turns
//! stderr output, process exit and malformed replies into typed errors.

pub mod config;
pub mod errors;
pub mod protocol;
pub mod session;
pub mod worker;

pub use config::SessionConfig;
pub use errors::{AppError, Result};
pub use protocol::{Request, Response};
pub use session::Session;
pub use worker::process::WorkerHandle;
