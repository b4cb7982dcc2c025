//! Worker stdout reader task.
//!
//! Drives a [`FramedRead`] over the worker's stdout with an [`ObjectFramer`]
//! and forwards every decoded object as [`WorkerEvent::Object`]. When the
//! diagnostic echo is on, raw chunks are echoed before framing via an
//! [`InspectReader`], so partial values are visible in the log as they
//! arrive.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::io::InspectReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::framer::ObjectFramer;
use super::{WorkerEvent, ECHO_TARGET};
use crate::AppError;

/// Reader task: frames `stdout` into objects and emits [`WorkerEvent`]s.
///
/// Terminates with:
/// - [`WorkerEvent::Closed`] on EOF or an I/O error,
/// - [`WorkerEvent::FramingFailed`] when a value overruns the framer limit
///   (the stream cannot be resynchronised afterwards),
/// - no event when `cancel` fires.
pub async fn run_reader<R>(
    generation: u64,
    stdout: R,
    framer: ObjectFramer,
    echo: bool,
    events: mpsc::UnboundedSender<WorkerEvent>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let inspected = InspectReader::new(stdout, move |chunk: &[u8]| {
        if echo && !chunk.is_empty() {
            info!(
                target: ECHO_TARGET,
                generation,
                stream = "stdout",
                "{}",
                String::from_utf8_lossy(chunk).trim_end()
            );
        }
    });
    let mut frames = FramedRead::new(inspected, framer);

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(generation, "reader: cancellation received, stopping");
                break;
            }

            item = frames.next() => {
                let event = match item {
                    None => {
                        debug!(generation, "reader: stdout closed");
                        Some(WorkerEvent::Closed { generation })
                    }
                    Some(Ok(payload)) => {
                        debug!(generation, object = ?payload, "reader: parsed object");
                        if events.send(WorkerEvent::Object { generation, payload }).is_err() {
                            debug!(generation, "reader: event channel closed, stopping");
                            break;
                        }
                        None
                    }
                    Some(Err(AppError::Framing(reason))) => {
                        warn!(
                            generation,
                            reason = %reason,
                            "reader: framing limit exceeded, stopping"
                        );
                        Some(WorkerEvent::FramingFailed { generation, reason })
                    }
                    Some(Err(err)) => {
                        warn!(generation, error = %err, "reader: stdout read failed, stopping");
                        Some(WorkerEvent::Closed { generation })
                    }
                };

                if let Some(event) = event {
                    if events.send(event).is_err() {
                        debug!(generation, "reader: event channel closed before final event");
                    }
                    break;
                }
            }
        }
    }
}
