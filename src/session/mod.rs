//! Typed session façade over a single worker process.
//!
//! A [`Session`] is a cheap handle to a background actor task. Construction
//! validates configuration and starts the actor; the worker process itself
//! is launched lazily by the first operation and relaunched transparently
//! after it terminates. The request that was in flight when a worker died is
//! failed, never replayed.
//!
//! # Usage
//!
//! ```rust,ignore
//! use pdal_session::{Session, SessionConfig};
//!
//! let session = Session::new(SessionConfig::new("/opt/pdal/bin/pdal-session")?)?;
//! session.create(pipeline_json).await?;
//! let points = session.get_num_points().await?;
//! session.shutdown().await;
//! ```

pub mod correlator;

mod actor;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

use self::actor::{SessionActor, SessionCommand};
use crate::config::SessionConfig;
use crate::protocol::{Reply, Request, Response};
use crate::worker::process::WorkerHandle;
use crate::{AppError, Result};

/// Handle to one worker session.
///
/// Operations may be called concurrently; they are queued and executed one
/// at a time in submission order. Dropping the session kills its worker.
#[derive(Debug)]
pub struct Session {
    id: String,
    commands: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
    actor: Option<JoinHandle<()>>,
}

impl Session {
    /// Validate `config` and start the session actor. No process is launched.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the configuration is invalid or no
    /// tokio runtime is available.
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| AppError::Config(format!("session requires a tokio runtime: {err}")))?;

        let id = Uuid::new_v4().to_string();
        let (commands, command_rx) = mpsc::channel(config.command_queue_depth);
        let cancel = CancellationToken::new();

        let actor = SessionActor::new(config, command_rx, cancel.clone());
        let span = info_span!("pdal_session", session_id = %id);
        let task = runtime.spawn(actor.run().instrument(span));

        Ok(Self {
            id,
            commands,
            cancel,
            actor: Some(task),
        })
    }

    /// Unique identifier of this session, as recorded in its log span.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Ensure a ready worker exists and return its identity.
    ///
    /// Idempotent while the worker lives: repeated calls return the same
    /// handle without launching anything.
    ///
    /// # Errors
    ///
    /// - `AppError::Spawn` — the executable could not be launched.
    /// - `AppError::Handshake` — the first object lacked `ready == 1`.
    /// - `AppError::ErrorOutput` / `AppError::Terminated` — the worker wrote
    ///   to stderr or died before becoming ready.
    pub async fn spawn(&self) -> Result<WorkerHandle> {
        self.call(|reply| SessionCommand::Spawn { reply }).await
    }

    /// Send `request` and await the worker's response, spawning the worker
    /// first if necessary.
    ///
    /// # Errors
    ///
    /// Any spawn error, plus:
    /// - `AppError::Protocol` — the response carried no success indicator.
    /// - `AppError::ErrorOutput` — the worker wrote to stderr first.
    /// - `AppError::Terminated` — the worker closed or exited first, or the
    ///   session was shut down.
    /// - `AppError::Framing` — the response overran the frame limit.
    pub async fn exchange(&self, request: Request) -> Result<Response> {
        self.call(|reply| SessionCommand::Exchange { request, reply }).await
    }

    /// Build a pipeline inside the worker from its JSON description.
    ///
    /// # Errors
    ///
    /// Propagates [`Session::exchange`] failures.
    pub async fn create(&self, pipeline_desc: &str) -> Result<()> {
        self.command(Request::create(pipeline_desc)).await.map(|_| ())
    }

    /// Tear the worker's pipeline down.
    ///
    /// # Errors
    ///
    /// Propagates [`Session::exchange`] failures.
    pub async fn destroy(&self) -> Result<()> {
        self.command(Request::destroy()).await.map(|_| ())
    }

    /// Number of points in the worker's pipeline.
    ///
    /// # Errors
    ///
    /// Propagates [`Session::exchange`] failures; `AppError::Protocol` when
    /// the response has no numeric `count`.
    pub async fn get_num_points(&self) -> Result<u64> {
        match self.command(Request::get_num_points()).await? {
            Reply::NumPoints(count) => Ok(count),
            other => Err(unexpected(&other)),
        }
    }

    /// Whether the worker's pipeline is usable.
    ///
    /// # Errors
    ///
    /// Propagates [`Session::exchange`] failures; `AppError::Protocol` when
    /// the response has no boolean `valid`.
    pub async fn is_valid(&self) -> Result<bool> {
        match self.command(Request::is_session_valid()).await? {
            Reply::Validity(valid) => Ok(valid),
            other => Err(unexpected(&other)),
        }
    }

    /// Ask the worker to stream its points to `host:port`.
    ///
    /// # Errors
    ///
    /// Propagates [`Session::exchange`] failures.
    pub async fn read(&self, host: &str, port: u16) -> Result<bool> {
        self.command(Request::read(host, port)).await.map(|_| true)
    }

    /// Signal the actor to stop without waiting for it.
    ///
    /// The in-flight operation and every queued one fail with
    /// `AppError::Terminated`; later calls fail the same way.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Stop the actor, kill the worker and fail every queued operation.
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(task) = self.actor.take() {
            if let Err(err) = task.await {
                warn!(session_id = %self.id, %err, "session actor ended abnormally");
            }
        }
    }

    async fn command(&self, request: Request) -> Result<Reply> {
        let command = request.command.clone();
        let response = self.exchange(request).await?;
        Reply::decode(&command, &response)
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> SessionCommand,
    ) -> Result<T> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| AppError::Terminated("session shut down".into()))?;
        outcome
            .await
            .map_err(|_| AppError::Terminated("session shut down".into()))?
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn unexpected(reply: &Reply) -> AppError {
    AppError::Protocol(format!("unexpected reply shape: {reply:?}"))
}
