use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};

/// Every job the engine knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    ArticleSync,
}

impl JobKind {
    /// Unique name used for the periodic registration of this job.
    pub fn unique_name(self) -> &'static str {
        match self {
            JobKind::ArticleSync => "ArticleUpdate",
        }
    }
}

/// Input flags of a single invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobInput {
    /// Bypass the debounce guard (one-off bootstrap or manual refresh).
    pub forced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Success,
    RetryableFailure,
    FatalFailure,
}

/// Observable status of one invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobInfo {
    pub state: JobState,
    pub progress: f32,
    pub attempt: u32,
}

impl Default for JobInfo {
    fn default() -> Self {
        Self {
            state: JobState::Pending,
            progress: 0.0,
            attempt: 0,
        }
    }
}

/// Handle a running job uses to publish its progress.
#[derive(Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<JobInfo>>,
}

impl ProgressReporter {
    pub fn new(tx: Arc<watch::Sender<JobInfo>>) -> Self {
        Self { tx }
    }

    /// Reporter nobody is watching.
    pub fn detached() -> Self {
        let (tx, _rx) = watch::channel(JobInfo::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn report(&self, progress: f32) {
        let progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 1.0)
        };
        self.tx.send_modify(|info| info.progress = progress);
    }

    #[cfg(test)]
    pub fn current(&self) -> f32 {
        self.tx.borrow().progress
    }
}

pub struct JobContext {
    pub input: JobInput,
    pub progress: ProgressReporter,
}

impl JobContext {
    pub fn new(input: JobInput, progress: ProgressReporter) -> Self {
        Self { input, progress }
    }
}

/// A unit of background work. `run` must return a terminal state and must
/// not panic on expected failures.
#[async_trait]
pub trait Job: Send + Sync {
    async fn run(&self, ctx: &JobContext) -> JobState;
}

pub type JobFactory = Box<dyn Fn() -> Arc<dyn Job> + Send + Sync>;

struct RegistryEntry {
    factory: JobFactory,
    // At most one invocation per kind runs at a time, whichever trigger
    // started it.
    running: Arc<Mutex<()>>,
}

/// Maps each [`JobKind`] to the factory that builds it.
#[derive(Default)]
pub struct JobRegistry {
    entries: HashMap<JobKind, RegistryEntry>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, kind: JobKind, factory: F)
    where
        F: Fn() -> Arc<dyn Job> + Send + Sync + 'static,
    {
        self.entries.insert(
            kind,
            RegistryEntry {
                factory: Box::new(factory),
                running: Arc::new(Mutex::new(())),
            },
        );
    }

    /// Build and run one invocation of `kind`.
    ///
    /// If another invocation of the same kind is still running, this one is
    /// skipped and reported as a success without doing any work.
    pub async fn invoke(&self, kind: JobKind, ctx: &JobContext) -> JobState {
        let Some(entry) = self.entries.get(&kind) else {
            tracing::error!(?kind, "no job registered for kind");
            return JobState::FatalFailure;
        };

        let Ok(_guard) = entry.running.try_lock() else {
            tracing::info!(?kind, "previous invocation still running, skipping");
            return JobState::Success;
        };

        let job = (entry.factory)();
        job.run(ctx).await
    }
}
