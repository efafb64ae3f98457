use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::services::NetworkProbe;

use super::job::{JobContext, JobInfo, JobInput, JobKind, JobRegistry, JobState, ProgressReporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkRequirement {
    NotRequired,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraints {
    pub requires_network: NetworkRequirement,
}

/// What to do when a registration with the same name already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Leave the existing schedule, including its interval, untouched.
    Keep,
    /// Cancel the existing schedule and install the new one.
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRegistration {
    pub unique_name: String,
    pub kind: JobKind,
    pub interval_minutes: u32,
    pub constraints: Constraints,
    pub conflict_policy: ConflictPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationResult {
    Scheduled,
    Kept,
    Replaced,
}

/// Exponential backoff for retryable failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, for `attempt` starting at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_secs(config.initial_backoff_secs),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
        }
    }
}

/// Observes one invocation and lets the caller wait for its final state.
pub struct JobHandle {
    info: watch::Receiver<JobInfo>,
    task: JoinHandle<JobState>,
}

impl JobHandle {
    /// Wait for the last attempt to finish and return its status.
    pub async fn wait(self) -> JobInfo {
        let state = match self.task.await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("job task ended abnormally: {}", e);
                JobState::FatalFailure
            }
        };
        JobInfo {
            state,
            ..*self.info.borrow()
        }
    }
}

struct PeriodicTrigger {
    registration: JobRegistration,
    cancel: CancellationToken,
    info: watch::Receiver<JobInfo>,
    task: JoinHandle<()>,
}

/// Runs registered jobs on a fixed cadence and one-off jobs on demand.
pub struct Scheduler {
    registry: Arc<JobRegistry>,
    probe: Arc<dyn NetworkProbe>,
    retry: RetryPolicy,
    periodic: Mutex<HashMap<String, PeriodicTrigger>>,
}

impl Scheduler {
    pub fn new(registry: Arc<JobRegistry>, probe: Arc<dyn NetworkProbe>, retry: RetryPolicy) -> Self {
        Self {
            registry,
            probe,
            retry,
            periodic: Mutex::new(HashMap::new()),
        }
    }

    /// Install a periodic trigger. Must be called from within a tokio runtime.
    pub fn register(&self, registration: JobRegistration) -> RegistrationResult {
        let mut periodic = self.lock_periodic();

        let result = match periodic.get(&registration.unique_name) {
            Some(existing) if !existing.task.is_finished() => match registration.conflict_policy {
                ConflictPolicy::Keep => {
                    tracing::debug!(
                        name = %registration.unique_name,
                        kept_interval = existing.registration.interval_minutes,
                        requested_interval = registration.interval_minutes,
                        "registration exists, keeping it"
                    );
                    return RegistrationResult::Kept;
                }
                ConflictPolicy::Replace => {
                    existing.cancel.cancel();
                    RegistrationResult::Replaced
                }
            },
            _ => RegistrationResult::Scheduled,
        };

        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(JobInfo::default());
        let task = tokio::spawn(run_periodic(
            self.registry.clone(),
            self.probe.clone(),
            self.retry,
            registration.clone(),
            cancel.clone(),
            Arc::new(tx),
        ));

        tracing::info!(
            name = %registration.unique_name,
            interval_minutes = registration.interval_minutes,
            ?result,
            "periodic job registered"
        );
        periodic.insert(
            registration.unique_name.clone(),
            PeriodicTrigger {
                registration,
                cancel,
                info: rx,
                task,
            },
        );
        result
    }

    /// Run `kind` once, right away, outside the periodic cadence.
    pub fn enqueue_once(&self, kind: JobKind, input: JobInput) -> JobHandle {
        let (tx, rx) = watch::channel(JobInfo::default());
        let registry = self.registry.clone();
        let retry = self.retry;
        let task = tokio::spawn(async move {
            run_with_retry(&registry, kind, input, &retry, &Arc::new(tx), None).await
        });
        tracing::debug!(?kind, forced = input.forced, "one-off job enqueued");
        JobHandle { info: rx, task }
    }

    /// Stop future runs of a registration. A run already in progress
    /// finishes normally.
    pub fn cancel(&self, unique_name: &str) -> bool {
        match self.lock_periodic().remove(unique_name) {
            Some(trigger) => {
                trigger.cancel.cancel();
                tracing::info!(name = unique_name, "periodic job cancelled");
                true
            }
            None => false,
        }
    }

    pub fn registration(&self, unique_name: &str) -> Option<JobRegistration> {
        self.lock_periodic()
            .get(unique_name)
            .map(|trigger| trigger.registration.clone())
    }

    /// Status of the latest run of a periodic registration.
    pub fn periodic_info(&self, unique_name: &str) -> Option<watch::Receiver<JobInfo>> {
        self.lock_periodic()
            .get(unique_name)
            .map(|trigger| trigger.info.clone())
    }

    pub fn shutdown(&self) {
        let names: Vec<String> = self.lock_periodic().keys().cloned().collect();
        for name in names {
            self.cancel(&name);
        }
    }

    fn lock_periodic(&self) -> std::sync::MutexGuard<'_, HashMap<String, PeriodicTrigger>> {
        self.periodic.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_periodic(
    registry: Arc<JobRegistry>,
    probe: Arc<dyn NetworkProbe>,
    retry: RetryPolicy,
    registration: JobRegistration,
    cancel: CancellationToken,
    info: Arc<watch::Sender<JobInfo>>,
) {
    let period = Duration::from_secs(u64::from(registration.interval_minutes.max(1)) * 60);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if registration.constraints.requires_network == NetworkRequirement::Connected
            && !probe.is_online().await
        {
            tracing::debug!(name = %registration.unique_name, "network unavailable, skipping run");
            continue;
        }

        let state = run_with_retry(
            &registry,
            registration.kind,
            JobInput::default(),
            &retry,
            &info,
            Some(&cancel),
        )
        .await;
        tracing::debug!(name = %registration.unique_name, ?state, "periodic run finished");
    }

    tracing::debug!(name = %registration.unique_name, "periodic trigger stopped");
}

/// Invoke a job, re-running it with backoff while it reports a retryable
/// failure. Only the final state is published as terminal.
pub(crate) async fn run_with_retry(
    registry: &JobRegistry,
    kind: JobKind,
    input: JobInput,
    retry: &RetryPolicy,
    info: &Arc<watch::Sender<JobInfo>>,
    cancel: Option<&CancellationToken>,
) -> JobState {
    let mut attempt = 0;

    loop {
        attempt += 1;
        info.send_modify(|i| {
            i.state = JobState::Running;
            i.progress = 0.0;
            i.attempt = attempt;
        });

        let ctx = JobContext::new(input, ProgressReporter::new(info.clone()));
        let state = registry.invoke(kind, &ctx).await;

        if state == JobState::RetryableFailure && attempt < retry.max_attempts {
            let delay = retry.backoff(attempt);
            tracing::info!(?kind, attempt, delay_secs = delay.as_secs(), "retrying after backoff");
            info.send_modify(|i| i.state = JobState::Pending);

            let cancelled = match cancel {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => true,
                    _ = tokio::time::sleep(delay) => false,
                },
                None => {
                    tokio::time::sleep(delay).await;
                    false
                }
            };
            if !cancelled {
                continue;
            }
        }

        info.send_modify(|i| {
            i.state = state;
            if state == JobState::Success {
                i.progress = 1.0;
            }
        });
        return state;
    }
}
