//! Run controller: owns the single active run and its decode task.
//!
//! ```text
//! start(request)
//!   cancel + await previous task
//!   spawn drive():
//!     select(cancel, POST /api/auto-execute)
//!       cancelled     → run.cancel()
//!       error / non-2xx → run.fail_transport()
//!       2xx           → run.begin(), consume(body)
//! ```
//!
//! The run itself lives behind an `Arc<Mutex<Run>>`; the decode task is the
//! only writer, and readers take cloned snapshots.

use std::sync::{Arc, Mutex};

use orchestration::session::lock_run;
use orchestration::{consume, project, Run, RunRequest, RunView, SessionEnd};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::BackendClient;

/// Shared view of one run and its cancellation token.
#[derive(Debug, Clone)]
pub struct RunHandle {
    run: Arc<Mutex<Run>>,
    cancel: CancellationToken,
}

impl RunHandle {
    /// Request cooperative cancellation. Takes effect at the decode loop's
    /// next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Clone of the run as of the last applied event.
    pub fn snapshot(&self) -> Run {
        lock_run(&self.run).clone()
    }

    pub fn view(&self) -> RunView {
        project(&lock_run(&self.run))
    }

    pub fn is_terminal(&self) -> bool {
        lock_run(&self.run).is_terminal()
    }
}

struct ActiveRun {
    handle: RunHandle,
    task: JoinHandle<SessionEnd>,
}

/// Drives at most one auto-execute run at a time.
pub struct RunController {
    client: BackendClient,
    active: Option<ActiveRun>,
}

impl RunController {
    pub fn new(client: BackendClient) -> Self {
        Self {
            client,
            active: None,
        }
    }

    /// Start a new run, cancelling and awaiting the current one first.
    pub async fn start(&mut self, request: RunRequest) -> RunHandle {
        if let Some(previous) = self.active.take() {
            info!("Cancelling active run before starting a new one");
            finish(previous, true).await;
        }

        let handle = RunHandle {
            run: Arc::new(Mutex::new(Run::new(request))),
            cancel: CancellationToken::new(),
        };
        let task = tokio::spawn(drive(self.client.clone(), handle.clone()));
        self.active = Some(ActiveRun {
            handle: handle.clone(),
            task,
        });
        handle
    }

    pub fn handle(&self) -> Option<RunHandle> {
        self.active.as_ref().map(|a| a.handle.clone())
    }

    pub fn snapshot(&self) -> Option<Run> {
        self.active.as_ref().map(|a| a.handle.snapshot())
    }

    pub fn cancel(&self) {
        if let Some(active) = &self.active {
            active.handle.cancel();
        }
    }

    /// Cancel and forget the active run.
    pub async fn reset(&mut self) {
        if let Some(active) = self.active.take() {
            finish(active, true).await;
        }
    }

    /// Wait for the active run's decode task and return the final run.
    pub async fn wait(&mut self) -> Option<Run> {
        let active = self.active.take()?;
        let handle = active.handle.clone();
        finish(active, false).await;
        Some(handle.snapshot())
    }
}

impl Drop for RunController {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.handle.cancel();
        }
    }
}

async fn finish(active: ActiveRun, cancel: bool) {
    if cancel {
        active.handle.cancel();
    }
    if let Err(e) = active.task.await {
        warn!(error = %e, "Run task did not complete");
        // A panicked driver leaves the run non-terminal; close it out.
        lock_run(&active.handle.run).fail_transport(&e.to_string());
    }
}

async fn drive(client: BackendClient, handle: RunHandle) -> SessionEnd {
    let request = lock_run(&handle.run).request().clone();
    info!(
        provider = %request.provider,
        max_retries = request.max_retries,
        "Starting auto-execute run"
    );

    let opened = tokio::select! {
        biased;
        _ = handle.cancel.cancelled() => None,
        result = client.auto_execute(&request) => Some(result),
    };

    let response = match opened {
        None => {
            lock_run(&handle.run).cancel();
            info!("Run cancelled before the stream opened");
            return SessionEnd::Cancelled;
        }
        Some(Err(e)) => {
            warn!(error = %e, "Auto-execute request failed");
            lock_run(&handle.run).fail_transport(&e.to_string());
            return SessionEnd::TransportFailed;
        }
        Some(Ok(response)) => response,
    };

    lock_run(&handle.run).begin();
    let report = consume(Box::pin(response.bytes_stream()), &handle.run, &handle.cancel).await;

    let summary = lock_run(&handle.run).summary();
    info!(end = ?report.end, %summary, "Run finished");
    report.end
}
