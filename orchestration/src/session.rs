//! The decode loop: one sequential consumer per run.
//!
//! ```text
//! loop:
//!   select (biased):
//!     cancel.cancelled()      → run.cancel(), stop
//!     reader.next_frame()     → apply under the lock, then re-check cancel
//!   [DONE] / body closed      → apply StreamEnd, stop
//!   body error                → run.fail_transport(), stop
//! ```
//!
//! The run lock is held for exactly one `apply` and never across an `.await`,
//! so a snapshot reader on another task always sees a whole event applied or
//! not at all. Cancellation is cooperative: an event being applied finishes
//! before the token is checked again.

use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::decoder::{Frame, FrameReader};
use crate::event::StreamEvent;
use crate::run::{ApplyOutcome, Run};

/// Failure of the underlying byte stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("response body failed: {0}")]
    Body(String),
}

/// Why the decode loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// `[DONE]` received, the body closed, or the run ended before a
    /// cancellation could take effect.
    Completed,
    /// The cancellation token stopped a run still in progress.
    Cancelled,
    /// The body stream returned an error.
    TransportFailed,
}

/// Counters from one decode loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeReport {
    pub end: SessionEnd,
    /// Frames that changed the run.
    pub applied: usize,
    /// Frames that were stale duplicates or arrived after a terminal state.
    pub skipped: usize,
    /// Payloads dropped because they failed to parse.
    pub malformed: usize,
}

/// Lock a shared run, recovering the guard if a previous holder panicked.
pub fn lock_run(run: &Mutex<Run>) -> MutexGuard<'_, Run> {
    run.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Feed `stream` into `run` until it ends, fails, or `cancel` fires.
///
/// The run should already be `Running`; events reaching an idle run are discarded.
pub async fn consume<S, B, E>(stream: S, run: &Mutex<Run>, cancel: &CancellationToken) -> ConsumeReport
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut reader = FrameReader::new(stream);
    let mut applied = 0;
    let mut skipped = 0;

    let end = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break cancel_run(run),
            next = reader.next_frame() => next,
        };

        match next {
            Some(Ok(Frame::Event(event))) => {
                let outcome = lock_run(run).apply(&event);
                debug!(event = %event, ?outcome, "Applied frame");
                match outcome {
                    ApplyOutcome::Applied => applied += 1,
                    ApplyOutcome::Ignored | ApplyOutcome::Discarded => skipped += 1,
                }
                if cancel.is_cancelled() {
                    break cancel_run(run);
                }
            }
            Some(Ok(Frame::Done)) | None => {
                lock_run(run).apply(&StreamEvent::StreamEnd);
                break SessionEnd::Completed;
            }
            Some(Err(e)) => {
                lock_run(run).fail_transport(&e.to_string());
                break SessionEnd::TransportFailed;
            }
        }
    };

    let report = ConsumeReport {
        end,
        applied,
        skipped,
        malformed: reader.malformed_frames(),
    };
    info!(
        end = ?report.end,
        applied = report.applied,
        skipped = report.skipped,
        malformed = report.malformed,
        "Stream consumer finished"
    );
    report
}

/// Cancel the run unless it already reached a terminal state on its own.
fn cancel_run(run: &Mutex<Run>) -> SessionEnd {
    if lock_run(run).cancel() {
        SessionEnd::Cancelled
    } else {
        SessionEnd::Completed
    }
}
