use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::StateStore;
use crate::error::Result;
use crate::models::DEFAULT_INTERVAL_MINUTES;
use crate::worker::{JobContext, JobInput, JobKind, JobRegistry, JobState, ProgressReporter};

use super::lifecycle::{ClosedEvent, SingleEvent};

struct RunningLoop {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Keeps syncing in a loop while the app is in the background.
pub struct ServiceController {
    registry: Arc<JobRegistry>,
    state: StateStore,
    minute: Duration,
    running: Mutex<Option<RunningLoop>>,
}

impl ServiceController {
    pub fn new(registry: Arc<JobRegistry>, state: StateStore) -> Self {
        Self {
            registry,
            state,
            minute: Duration::from_secs(60),
            running: Mutex::new(None),
        }
    }

    /// Shrink the length of one interval minute so tests run quickly.
    #[cfg(test)]
    fn with_minute(mut self, minute: Duration) -> Self {
        self.minute = minute;
        self
    }

    /// Start the sync loop. Returns `false` if it is already running.
    pub async fn start(&self) -> Result<bool> {
        {
            let mut running = self.lock_running();
            if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
                tracing::debug!("background service already running");
                return Ok(false);
            }

            let cancel = CancellationToken::new();
            let task = tokio::spawn(run_loop(
                self.registry.clone(),
                self.state.clone(),
                self.minute,
                cancel.clone(),
            ));
            *running = Some(RunningLoop { cancel, task });
        }

        self.state.set_service_started(true).await?;
        tracing::info!("background service started");
        Ok(true)
    }

    /// Stop the loop. A pending sleep ends right away; a sync that is
    /// already fetching runs to completion first.
    pub async fn stop(&self) -> Result<()> {
        let stopped = self.lock_running().take();
        self.state.set_service_started(false).await?;
        if let Some(running) = stopped {
            running.cancel.cancel();
            tracing::info!("background service stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.lock_running()
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    /// Cancel the loop and wait for it to exit. Unlike [`stop`](Self::stop)
    /// the persisted `serviceStarted` flag is left alone, so the next process
    /// resumes the service.
    pub async fn shutdown(&self) {
        let stopped = self.lock_running().take();
        if let Some(running) = stopped {
            running.cancel.cancel();
            if let Err(e) = running.task.await {
                tracing::warn!("background loop ended abnormally: {}", e);
            }
        }
    }

    /// Start the loop whenever a [`ClosedEvent`] arrives, until `shutdown`
    /// fires.
    pub async fn listen(&self, events: Arc<SingleEvent<ClosedEvent>>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                ClosedEvent = events.recv() => {
                    if let Err(e) = self.start().await {
                        tracing::error!("failed to start background service: {}", e);
                    }
                }
            }
        }
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<RunningLoop>> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn run_loop(
    registry: Arc<JobRegistry>,
    state: StateStore,
    minute: Duration,
    cancel: CancellationToken,
) {
    loop {
        let minutes = match state.interval_minutes().await {
            Ok(minutes) => minutes,
            Err(e) => {
                tracing::warn!("could not read interval, using default: {}", e);
                DEFAULT_INTERVAL_MINUTES
            }
        };

        // The sync runs in its own task so that even a panic inside it only
        // ends this iteration. Cancellation never reaches it.
        let iteration = tokio::spawn({
            let registry = registry.clone();
            async move {
                let ctx = JobContext::new(JobInput::default(), ProgressReporter::detached());
                registry.invoke(JobKind::ArticleSync, &ctx).await
            }
        });
        match iteration.await {
            Ok(JobState::Success) => tracing::debug!("background sync iteration succeeded"),
            Ok(state) => tracing::warn!(?state, "background sync iteration failed"),
            Err(e) => tracing::error!("background sync iteration crashed: {}", e),
        }

        if cancel.is_cancelled() {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(minute * minutes) => {}
        }
    }
    tracing::debug!("background sync loop exited");
}
