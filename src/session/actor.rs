//! Session actor: the single control sequence behind a [`Session`].
//!
//! The actor owns the worker handle, the worker's stdin and the
//! [`Correlator`] slot. Callers reach it through a bounded FIFO command
//! queue; worker monitor tasks reach it through an unbounded event channel.
//! A command is taken from the queue only after the previous one has
//! settled, which gives every caller strict request/response pairing even
//! when several submit concurrently.
//!
//! [`Session`]: super::Session

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::correlator::{Correlator, Expectation, Signal};
use crate::config::SessionConfig;
use crate::protocol::{Request, Response};
use crate::worker::process::{self, WorkerHandle, WorkerProcess};
use crate::worker::{WorkerEvent, ECHO_TARGET};
use crate::{AppError, Result};

/// Requests accepted by the actor.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// Ensure a ready worker exists.
    Spawn {
        reply: oneshot::Sender<Result<WorkerHandle>>,
    },
    /// Send one request and await its response.
    Exchange {
        request: Request,
        reply: oneshot::Sender<Result<Response>>,
    },
}

pub(crate) struct SessionActor {
    config: SessionConfig,
    commands: mpsc::Receiver<SessionCommand>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    correlator: Correlator,
    /// Live worker; `Some` only after a successful handshake.
    worker: Option<WorkerProcess>,
    /// Generation of the most recently launched process.
    launched: u64,
    cancel: CancellationToken,
}

impl SessionActor {
    pub(crate) fn new(
        config: SessionConfig,
        commands: mpsc::Receiver<SessionCommand>,
        cancel: CancellationToken,
    ) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        Self {
            config,
            commands,
            events_tx,
            events,
            correlator: Correlator::new(),
            worker: None,
            launched: 0,
            cancel,
        }
    }

    /// Run until cancelled or until every command sender is dropped.
    pub(crate) async fn run(mut self) {
        info!(process = %self.config.process_path.display(), "session actor started");

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,

                Some(event) = self.events.recv() => self.on_idle_event(event),

                command = self.commands.recv() => {
                    let Some(command) = command else {
                        debug!("all session handles dropped");
                        break;
                    };
                    self.handle(command).await;
                }
            }
        }

        self.stop();
    }

    async fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Spawn { reply } => {
                let outcome = self.spawn().await;
                deliver(reply, outcome);
            }
            SessionCommand::Exchange { request, reply } => {
                let outcome = self.exchange(request).await;
                deliver(reply, outcome);
            }
        }
    }

    /// Return the live worker, launching one and completing its handshake
    /// first if needed.
    async fn spawn(&mut self) -> Result<WorkerHandle> {
        if let Some(worker) = &self.worker {
            return Ok(worker.handle());
        }

        self.launched += 1;
        let generation = self.launched;
        let worker = process::launch(
            &self.config,
            generation,
            self.events_tx.clone(),
            &self.cancel,
        )?;
        info!(generation, pid = ?worker.handle().pid, "worker launched, awaiting ready signal");

        self.correlator.arm(Expectation::Handshake);
        match self.await_settlement(generation).await {
            Ok(_) => {
                let handle = worker.handle();
                self.worker = Some(worker);
                info!(generation, "worker ready");
                Ok(handle)
            }
            Err(err) => {
                warn!(generation, kind = err.kind(), %err, "worker failed to become ready");
                drop(worker);
                Err(err)
            }
        }
    }

    async fn exchange(&mut self, request: Request) -> Result<Response> {
        self.drain_idle();
        let handle = self.spawn().await?;
        self.drain_idle();
        let line = request.to_line()?;

        if self.config.log {
            info!(
                target: ECHO_TARGET,
                generation = handle.generation,
                stream = "stdin",
                "{}",
                String::from_utf8_lossy(&line).trim_end()
            );
        }

        let Some(worker) = self.worker.as_mut() else {
            return Err(AppError::Terminated(format!(
                "worker lost before {} could be sent",
                request.command
            )));
        };

        self.correlator.arm(Expectation::Reply {
            command: request.command.clone(),
        });

        if let Err(err) = worker.write_line(&line).await {
            self.correlator.disarm();
            self.worker = None;
            warn!(generation = handle.generation, %err, "write to worker stdin failed");
            return Err(AppError::Terminated(format!(
                "failed to send {} to worker: {err}",
                request.command
            )));
        }

        self.await_settlement(handle.generation).await
    }

    /// Consume worker events until the armed slot settles.
    ///
    /// Events from other generations are stale and skipped. Events that end
    /// the worker clear the live handle before settling.
    async fn await_settlement(&mut self, generation: u64) -> Result<Response> {
        loop {
            let event = tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    self.correlator.disarm();
                    return Err(AppError::Terminated("session shut down".into()));
                }

                event = self.events.recv() => event,
            };

            let Some(event) = event else {
                self.correlator.disarm();
                return Err(AppError::Terminated("worker event channel closed".into()));
            };

            if event.generation() != generation {
                debug!(
                    stale = event.generation(),
                    current = generation,
                    "discarding event from replaced worker"
                );
                continue;
            }

            if event.ends_worker() {
                self.clear_worker(generation);
            }

            if let Some(outcome) = self.correlator.settle(Signal::from(event)) {
                return outcome;
            }
        }
    }

    /// Run every event already queued through the idle path.
    ///
    /// Values the worker emitted before a request is armed belong to no
    /// request and must not settle the next one.
    fn drain_idle(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.on_idle_event(event);
        }
    }

    /// Handle an event that arrived while no command was in progress.
    fn on_idle_event(&mut self, event: WorkerEvent) {
        if event.ends_worker() {
            self.clear_worker(event.generation());
        }
        if self.correlator.settle(Signal::from(event)).is_some() {
            warn!("idle event settled an armed slot");
        }
    }

    fn clear_worker(&mut self, generation: u64) {
        if self
            .worker
            .as_ref()
            .is_some_and(|worker| worker.generation() == generation)
        {
            self.worker = None;
            info!(generation, "worker gone; next request respawns it");
        }
    }

    fn stop(mut self) {
        self.cancel.cancel();
        self.worker = None;
        self.commands.close();

        while let Ok(command) = self.commands.try_recv() {
            let err = AppError::Terminated("session shut down".into());
            match command {
                SessionCommand::Spawn { reply } => deliver(reply, Err(err)),
                SessionCommand::Exchange { reply, .. } => deliver(reply, Err(err)),
            }
        }

        info!("session actor stopped");
    }
}

fn deliver<T>(reply: oneshot::Sender<Result<T>>, outcome: Result<T>) {
    if reply.send(outcome).is_err() {
        debug!("caller dropped before its result was delivered");
    }
}
