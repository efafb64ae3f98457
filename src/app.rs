use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_rusqlite::Connection;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::{self, ArticleStore, StateStore};
use crate::error::{AppError, Result};
use crate::feed::{ArticleSource, PageFetcher};
use crate::models::Article;
use crate::notify::{InboxSink, LogSink, NotificationDispatcher, NotificationSink, Priority};
use crate::services::{
    AlwaysOnline, ClosedEvent, Clock, LifecycleMonitor, NetworkProbe, ServiceController, SingleEvent,
    SystemClock, TcpProbe, Transition,
};
use crate::worker::{
    ConflictPolicy, Constraints, Job, JobContext, JobHandle, JobInput, JobKind, JobRegistration,
    JobRegistry, NetworkRequirement, ProgressReporter, RegistrationResult, RetryPolicy, Scheduler,
    SyncJob, SyncOutcome, SyncReport,
};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the app is built from. [`App::new`] assembles the production
/// set from a [`Config`].
pub struct AppParts {
    pub conn: Connection,
    pub source: Arc<dyn ArticleSource>,
    pub sink: Arc<dyn NotificationSink>,
    pub notification_priority: Priority,
    pub clock: Arc<dyn Clock>,
    pub probe: Arc<dyn NetworkProbe>,
    pub retry: RetryPolicy,
    pub default_interval_minutes: u32,
    pub require_network: bool,
}

pub struct App {
    pub articles: ArticleStore,
    pub state: StateStore,
    sync_job: SyncJob,
    scheduler: Scheduler,
    service: Arc<ServiceController>,
    events: Arc<SingleEvent<ClosedEvent>>,
    require_network: bool,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        let conn = db::open(&config.db_path).await?;
        let source = PageFetcher::new(config)?;
        let probe: Arc<dyn NetworkProbe> = if config.require_network {
            Arc::new(TcpProbe::for_url(&config.base_url, PROBE_TIMEOUT)?)
        } else {
            Arc::new(AlwaysOnline)
        };

        let sink: Arc<dyn NotificationSink> = match &config.notification_inbox {
            Some(path) => Arc::new(InboxSink::new(path)),
            None => Arc::new(LogSink),
        };

        Ok(Self::from_parts(AppParts {
            conn,
            source: Arc::new(source),
            sink,
            notification_priority: config.notification_priority,
            clock: Arc::new(SystemClock),
            probe,
            retry: RetryPolicy::from(&config.retry),
            default_interval_minutes: config.default_interval_minutes,
            require_network: config.require_network,
        }))
    }

    pub fn from_parts(parts: AppParts) -> Self {
        let articles = ArticleStore::new(parts.conn.clone());
        let state = StateStore::new(parts.conn, parts.default_interval_minutes);

        let sync_job = SyncJob::new(
            parts.source,
            articles.clone(),
            state.clone(),
            NotificationDispatcher::new(parts.sink, parts.notification_priority),
            parts.clock,
        );

        let mut registry = JobRegistry::new();
        registry.register(JobKind::ArticleSync, {
            let sync_job = sync_job.clone();
            move || Arc::new(sync_job.clone()) as Arc<dyn Job>
        });
        let registry = Arc::new(registry);

        let scheduler = Scheduler::new(registry.clone(), parts.probe, parts.retry);
        let service = Arc::new(ServiceController::new(registry, state.clone()));

        Self {
            articles,
            state,
            sync_job,
            scheduler,
            service,
            events: Arc::new(SingleEvent::new()),
            require_network: parts.require_network,
        }
    }

    /// Register the recurring article sync. An existing registration is kept
    /// as is, including its interval.
    pub async fn schedule_periodic(&self) -> Result<RegistrationResult> {
        let interval_minutes = self.state.interval_minutes().await?;
        let requires_network = if self.require_network {
            NetworkRequirement::Connected
        } else {
            NetworkRequirement::NotRequired
        };

        Ok(self.scheduler.register(JobRegistration {
            unique_name: JobKind::ArticleSync.unique_name().to_string(),
            kind: JobKind::ArticleSync,
            interval_minutes,
            constraints: Constraints { requires_network },
            conflict_policy: ConflictPolicy::Keep,
        }))
    }

    /// Enqueue a forced one-off sync when nothing has been stored yet.
    pub async fn bootstrap_if_empty(&self) -> Result<Option<JobHandle>> {
        if self.articles.count().await? > 0 {
            return Ok(None);
        }
        tracing::info!("article store is empty, bootstrapping");
        Ok(Some(self.scheduler.enqueue_once(
            JobKind::ArticleSync,
            JobInput { forced: true },
        )))
    }

    /// Run one forced sync in the foreground and wait for it.
    pub async fn refresh_blocking(&self) -> Result<SyncReport> {
        let ctx = JobContext::new(JobInput { forced: true }, ProgressReporter::detached());
        match self.sync_job.sync(&ctx).await {
            SyncOutcome::Synced(report) => Ok(report),
            SyncOutcome::Retryable(e) | SyncOutcome::Fatal(e) => Err(e),
            SyncOutcome::Debounced { minutes_since_last } => Err(AppError::Other(
                anyhow::anyhow!("forced sync was debounced ({minutes_since_last} minutes)"),
            )),
        }
    }

    pub async fn set_interval(&self, minutes: u32) -> Result<()> {
        self.state.set_interval_minutes(minutes).await?;
        tracing::info!(minutes, "sync interval updated");
        Ok(())
    }

    /// Delete every stored article so the next run fetches everything again.
    pub async fn reset(&self) -> Result<usize> {
        let deleted = self.articles.delete_all().await?;
        self.state.clear_last_sync().await?;
        tracing::info!(deleted, "article store cleared");
        Ok(deleted)
    }

    pub async fn list(&self) -> Result<Vec<Article>> {
        self.articles.query_all().await
    }

    /// Run until `quit`, end of input or Ctrl-C. Each stdin line is one
    /// surface event: `start`, `stop`, `stop-service`, `status` or `quit`.
    pub async fn run_daemon(&self) -> Result<()> {
        self.schedule_periodic().await?;
        if let Some(handle) = self.bootstrap_if_empty().await? {
            tokio::spawn(async move {
                let info = handle.wait().await;
                tracing::info!(state = ?info.state, attempts = info.attempt, "bootstrap sync finished");
            });
        }

        if self.state.service_started().await? {
            tracing::info!("resuming background service");
            self.service.start().await?;
        }

        let shutdown = CancellationToken::new();
        let listener = tokio::spawn({
            let service = self.service.clone();
            let events = self.events.clone();
            let shutdown = shutdown.clone();
            async move { service.listen(events, shutdown).await }
        });

        let mut monitor = LifecycleMonitor::new(self.state.clone(), self.events.clone());
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            let line = tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                break;
            };

            match line.trim() {
                "start" => {
                    if monitor.surface_started().await? == Transition::BecameForeground {
                        self.service.stop().await?;
                    }
                }
                "stop" => {
                    monitor.surface_stopped().await?;
                }
                "stop-service" => self.service.stop().await?,
                "status" => self.print_status(&monitor).await?,
                "quit" => break,
                "" => {}
                other => tracing::warn!(command = other, "unknown command"),
            }
        }

        shutdown.cancel();
        if let Err(e) = listener.await {
            tracing::warn!("service listener ended abnormally: {}", e);
        }
        self.service.shutdown().await;
        self.scheduler.shutdown();
        Ok(())
    }

    async fn print_status(&self, monitor: &LifecycleMonitor) -> Result<()> {
        let state = self.state.load().await?;
        let last_sync = state
            .last_sync
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());

        let name = JobKind::ArticleSync.unique_name();
        let periodic = match self.scheduler.registration(name) {
            Some(registration) => format!("every {}m", registration.interval_minutes),
            None => "off".to_string(),
        };
        let last_run = self
            .scheduler
            .periodic_info(name)
            .map(|info| *info.borrow())
            .map(|info| format!("{:?} {:.0}% attempt {}", info.state, info.progress * 100.0, info.attempt))
            .unwrap_or_else(|| "none".to_string());

        println!(
            "surfaces={} service={} interval={}m periodic={} last_run=[{}] last_sync={} articles={}",
            monitor.active_surfaces(),
            if self.service.is_running() { "running" } else { "stopped" },
            state.interval_minutes,
            periodic,
            last_run,
            last_sync,
            self.articles.count().await?,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemorySink;
    use crate::services::ManualClock;
    use crate::worker::fixtures::{start_time, FakeSource};
    use crate::worker::JobState;
    use tokio_test::{assert_err, assert_ok};

    struct TestApp {
        app: App,
        source: Arc<FakeSource>,
        sink: Arc<MemorySink>,
        clock: Arc<ManualClock>,
    }

    async fn test_app(source: FakeSource) -> TestApp {
        let source = Arc::new(source);
        let sink = Arc::new(MemorySink::default());
        let clock = Arc::new(ManualClock::new(start_time()));
        let app = App::from_parts(AppParts {
            conn: db::open_in_memory().await.unwrap(),
            source: source.clone(),
            sink: sink.clone(),
            notification_priority: Priority::Default,
            clock: clock.clone(),
            probe: Arc::new(AlwaysOnline),
            retry: RetryPolicy {
                max_attempts: 1,
                initial_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_millis(10),
            },
            default_interval_minutes: 15,
            require_network: true,
        });
        TestApp {
            app,
            source,
            sink,
            clock,
        }
    }

    #[tokio::test]
    async fn bootstrap_then_repeat_run_is_idempotent() {
        let t = test_app(FakeSource::with_articles(5)).await;

        let handle = t.app.bootstrap_if_empty().await.unwrap().unwrap();
        let info = handle.wait().await;
        assert_eq!(info.state, JobState::Success);
        assert_eq!(info.progress, 1.0);
        assert_eq!(t.app.articles.count().await.unwrap(), 5);
        assert_eq!(t.sink.delivered().len(), 1);

        // Store is no longer empty, so no second bootstrap
        assert!(t.app.bootstrap_if_empty().await.unwrap().is_none());

        t.clock.advance(chrono::Duration::minutes(30));
        let report = t.app.refresh_blocking().await.unwrap();
        assert_eq!(report.fetched, 5);
        assert!(report.notified.is_none());
        assert_eq!(t.app.articles.count().await.unwrap(), 5);
        assert_eq!(t.sink.delivered().len(), 1);
        assert_eq!(t.source.calls(), 2);
    }

    #[tokio::test]
    async fn periodic_registration_keeps_its_interval() {
        let t = test_app(FakeSource::with_articles(1)).await;

        assert_eq!(t.app.schedule_periodic().await.unwrap(), RegistrationResult::Scheduled);
        t.app.set_interval(60).await.unwrap();
        assert_eq!(t.app.schedule_periodic().await.unwrap(), RegistrationResult::Kept);

        let registration = t.app.scheduler.registration("ArticleUpdate").unwrap();
        assert_eq!(registration.interval_minutes, 15);
        assert_eq!(
            registration.constraints.requires_network,
            NetworkRequirement::Connected
        );
        assert_eq!(t.app.state.interval_minutes().await.unwrap(), 60);
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let t = test_app(FakeSource::with_articles(0)).await;
        assert_err!(t.app.set_interval(0).await);
        assert_ok!(t.app.set_interval(5).await);
        assert_eq!(t.app.state.interval_minutes().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn reset_clears_articles_and_debounce() {
        let t = test_app(FakeSource::with_articles(3)).await;
        t.app.refresh_blocking().await.unwrap();

        assert_eq!(t.app.reset().await.unwrap(), 3);
        assert!(t.app.list().await.unwrap().is_empty());
        assert_eq!(t.app.state.last_sync().await.unwrap(), None);
        // The notified url survives, so refetching the same page is quiet
        assert!(t.app.state.last_notified_url().await.unwrap().is_some());

        let handle = t.app.bootstrap_if_empty().await.unwrap().unwrap();
        assert_eq!(handle.wait().await.state, JobState::Success);
        assert_eq!(t.app.list().await.unwrap().len(), 3);
        assert_eq!(t.sink.delivered().len(), 1);
    }

    #[tokio::test]
    async fn refresh_surfaces_network_errors() {
        let t = test_app(FakeSource::with_articles(2)).await;
        t.source.fail(Some(503));

        let err = t.app.refresh_blocking().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(t.app.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_returns_newest_batch_first() {
        let t = test_app(FakeSource::with_articles(2)).await;
        t.app.refresh_blocking().await.unwrap();
        t.source.prepend(crate::worker::fixtures::make_articles(7, 1).remove(0));
        t.app.refresh_blocking().await.unwrap();

        let urls: Vec<String> = t.app.list().await.unwrap().into_iter().map(|a| a.url).collect();
        assert_eq!(
            urls,
            vec![
                "https://student.example.edu/content/7",
                "https://student.example.edu/content/0",
                "https://student.example.edu/content/1",
            ]
        );
    }
}
