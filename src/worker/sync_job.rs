use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::db::{ArticleStore, StateStore};
use crate::error::{AppError, Result};
use crate::feed::ArticleSource;
use crate::notify::{DispatchOutcome, NotificationDispatcher};
use crate::services::Clock;

use super::job::{Job, JobContext, JobState};

/// A run this close to the end of the interval counts as due. The periodic
/// trigger fires on the same interval, so its jitter would otherwise
/// debounce every other tick.
const DEBOUNCE_GRACE: chrono::Duration = chrono::Duration::seconds(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub fetched: usize,
    /// Url of the article a notification was sent for, if any.
    pub notified: Option<String>,
    pub synced_at: NaiveDateTime,
}

#[derive(Debug)]
pub enum SyncOutcome {
    /// The last sync is more recent than the configured interval.
    Debounced { minutes_since_last: i64 },
    Synced(SyncReport),
    Retryable(AppError),
    Fatal(AppError),
}

impl SyncOutcome {
    pub fn state(&self) -> JobState {
        match self {
            SyncOutcome::Debounced { .. } | SyncOutcome::Synced(_) => JobState::Success,
            SyncOutcome::Retryable(_) => JobState::RetryableFailure,
            SyncOutcome::Fatal(_) => JobState::FatalFailure,
        }
    }
}

/// Fetches the announcement list, notifies about a new top article and
/// stores the batch.
#[derive(Clone)]
pub struct SyncJob {
    source: Arc<dyn ArticleSource>,
    articles: ArticleStore,
    state: StateStore,
    notifier: NotificationDispatcher,
    clock: Arc<dyn Clock>,
}

impl SyncJob {
    pub fn new(
        source: Arc<dyn ArticleSource>,
        articles: ArticleStore,
        state: StateStore,
        notifier: NotificationDispatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            articles,
            state,
            notifier,
            clock,
        }
    }

    pub async fn sync(&self, ctx: &JobContext) -> SyncOutcome {
        let now = self.clock.now();

        if !ctx.input.forced {
            match self.minutes_since_due(now).await {
                Ok(Some(minutes_since_last)) => {
                    return SyncOutcome::Debounced { minutes_since_last };
                }
                Ok(None) => {}
                Err(e) => return SyncOutcome::Fatal(e),
            }
        }

        match self.fetch_and_store(now, ctx).await {
            Ok(report) => SyncOutcome::Synced(report),
            Err(e) if e.is_retryable() => SyncOutcome::Retryable(e),
            Err(e) => SyncOutcome::Fatal(e),
        }
    }

    // Some(minutes) when the previous sync is still within the interval.
    async fn minutes_since_due(&self, now: NaiveDateTime) -> Result<Option<i64>> {
        let Some(last) = self.state.last_sync().await? else {
            return Ok(None);
        };
        let interval = i64::from(self.state.interval_minutes().await?);
        let elapsed = now.signed_duration_since(last);

        // Local time can jump back, e.g. when daylight saving ends.
        if elapsed < chrono::Duration::zero() {
            tracing::warn!(%last, %now, "clock is behind the last sync, running anyway");
            return Ok(None);
        }

        if elapsed + DEBOUNCE_GRACE < chrono::Duration::minutes(interval) {
            Ok(Some(elapsed.num_minutes()))
        } else {
            Ok(None)
        }
    }

    async fn fetch_and_store(&self, now: NaiveDateTime, ctx: &JobContext) -> Result<SyncReport> {
        let summaries = self.source.fetch_index().await?;
        let total = summaries.len();
        tracing::debug!(total, "found index entries");

        let mut batch = Vec::with_capacity(total);
        for (processed, summary) in summaries.iter().enumerate() {
            batch.push(self.source.fetch_article(summary).await?);
            ctx.progress.report((processed + 1) as f32 / total as f32);
        }

        let mut notified = None;
        if let Some(newest) = batch.first() {
            let last_url = self.state.last_notified_url().await?;
            if last_url.as_deref() != Some(newest.url.as_str()) {
                if self.notifier.notify_new_article(newest).await == DispatchOutcome::Delivered {
                    tracing::info!(url = %newest.url, "notified about new article");
                }
                self.state.set_last_notified_url(&newest.url).await?;
                notified = Some(newest.url.clone());
            }
        }

        let fetched = self.articles.upsert_all(batch).await?;
        let synced_at = self.state.record_sync(now).await?;

        Ok(SyncReport {
            fetched,
            notified,
            synced_at,
        })
    }
}

#[async_trait]
impl Job for SyncJob {
    async fn run(&self, ctx: &JobContext) -> JobState {
        let outcome = self.sync(ctx).await;
        match &outcome {
            SyncOutcome::Debounced { minutes_since_last } => {
                tracing::debug!(minutes_since_last, "synced recently, skipping");
            }
            SyncOutcome::Synced(report) => {
                tracing::info!(
                    fetched = report.fetched,
                    notified = report.notified.is_some(),
                    "article sync finished"
                );
            }
            SyncOutcome::Retryable(e) => {
                tracing::warn!("error downloading articles: {}", e);
            }
            SyncOutcome::Fatal(e) => {
                tracing::error!("error processing articles: {}", e);
            }
        }
        outcome.state()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db;
    use crate::models::{ArticleSummary, NewArticle};
    use crate::notify::{MemorySink, Priority};
    use crate::services::ManualClock;
    use crate::worker::job::{JobInput, ProgressReporter};
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::watch;

    /// In-memory source: serves a configurable list of articles and can be
    /// told to fail.
    pub(crate) struct FakeSource {
        pub articles: Mutex<Vec<NewArticle>>,
        pub fail_with_status: Mutex<Option<u16>>,
        pub broken_link: Mutex<bool>,
        /// Detail page that answers with a 502.
        pub failing_detail: Mutex<Option<String>>,
        pub index_calls: AtomicUsize,
        pub delay: Duration,
    }

    impl FakeSource {
        pub(crate) fn with_articles(count: usize) -> Self {
            Self {
                articles: Mutex::new(make_articles(0, count)),
                fail_with_status: Mutex::new(None),
                broken_link: Mutex::new(false),
                failing_detail: Mutex::new(None),
                index_calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.index_calls.load(Ordering::SeqCst)
        }

        pub(crate) fn fail(&self, status: Option<u16>) {
            *self.fail_with_status.lock().unwrap() = status;
        }

        pub(crate) fn prepend(&self, article: NewArticle) {
            self.articles.lock().unwrap().insert(0, article);
        }
    }

    pub(crate) fn make_articles(start: usize, count: usize) -> Vec<NewArticle> {
        (start..start + count)
            .map(|i| NewArticle {
                header: format!("Announcement {i}"),
                date: format!("0{}/05/2024", i % 9 + 1),
                content: format!("Details of announcement {i}"),
                url: format!("https://student.example.edu/content/{i}"),
            })
            .collect()
    }

    #[async_trait]
    impl ArticleSource for FakeSource {
        async fn fetch_index(&self) -> Result<Vec<ArticleSummary>> {
            self.index_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(status) = *self.fail_with_status.lock().unwrap() {
                return Err(AppError::HttpStatus {
                    status,
                    url: "https://student.example.edu/thong-bao-chung".to_string(),
                });
            }
            if *self.broken_link.lock().unwrap() {
                return Err(AppError::Parse("bad article link".to_string()));
            }
            Ok(self
                .articles
                .lock()
                .unwrap()
                .iter()
                .map(|a| ArticleSummary {
                    header: a.header.clone(),
                    link: a.url.trim_start_matches("https://student.example.edu").to_string(),
                    url: a.url.clone(),
                })
                .collect())
        }

        async fn fetch_article(&self, summary: &ArticleSummary) -> Result<NewArticle> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.failing_detail.lock().unwrap().as_deref() == Some(summary.url.as_str()) {
                return Err(AppError::HttpStatus {
                    status: 502,
                    url: summary.url.clone(),
                });
            }
            self.articles
                .lock()
                .unwrap()
                .iter()
                .find(|a| a.url == summary.url)
                .cloned()
                .ok_or_else(|| AppError::Parse(format!("no detail for {}", summary.url)))
        }
    }

    pub(crate) fn start_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    pub(crate) struct Harness {
        pub job: SyncJob,
        pub source: Arc<FakeSource>,
        pub sink: Arc<MemorySink>,
        pub clock: Arc<ManualClock>,
        pub articles: ArticleStore,
        pub state: StateStore,
    }

    pub(crate) async fn harness(source: FakeSource) -> Harness {
        harness_with_sink(source, MemorySink::default()).await
    }

    pub(crate) async fn harness_with_sink(source: FakeSource, sink: MemorySink) -> Harness {
        let conn = db::open_in_memory().await.unwrap();
        let articles = ArticleStore::new(conn.clone());
        let state = StateStore::new(conn, 15);
        let source = Arc::new(source);
        let sink = Arc::new(sink);
        let clock = Arc::new(ManualClock::new(start_time()));
        let job = SyncJob::new(
            source.clone(),
            articles.clone(),
            state.clone(),
            NotificationDispatcher::new(sink.clone(), Priority::Default),
            clock.clone(),
        );
        Harness {
            job,
            source,
            sink,
            clock,
            articles,
            state,
        }
    }

    fn ctx(forced: bool) -> JobContext {
        JobContext::new(JobInput { forced }, ProgressReporter::detached())
    }

    #[tokio::test]
    async fn first_run_stores_everything_and_notifies_once() {
        let h = harness(FakeSource::with_articles(3)).await;

        let outcome = h.job.sync(&ctx(false)).await;
        let SyncOutcome::Synced(report) = outcome else {
            panic!("expected a sync, got {outcome:?}");
        };
        assert_eq!(report.fetched, 3);
        assert_eq!(report.notified.as_deref(), Some("https://student.example.edu/content/0"));
        assert_eq!(report.synced_at, start_time());

        assert_eq!(h.articles.count().await.unwrap(), 3);
        let delivered = h.sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].title, "Announcement 0");

        let state = h.state.load().await.unwrap();
        assert_eq!(state.last_sync, Some(start_time()));
        assert_eq!(
            state.last_notified_url.as_deref(),
            Some("https://student.example.edu/content/0")
        );
    }

    #[tokio::test]
    async fn same_top_article_does_not_notify_again() {
        let h = harness(FakeSource::with_articles(2)).await;
        h.job.sync(&ctx(true)).await;
        h.clock.advance(chrono::Duration::minutes(20));

        let outcome = h.job.sync(&ctx(false)).await;
        let SyncOutcome::Synced(report) = outcome else {
            panic!("expected a sync, got {outcome:?}");
        };
        assert!(report.notified.is_none());
        assert_eq!(h.sink.delivered().len(), 1);
        assert_eq!(h.articles.count().await.unwrap(), 2);
        // Timestamp still moves forward without a notification
        assert_eq!(
            h.state.last_sync().await.unwrap(),
            Some(start_time() + chrono::Duration::minutes(20))
        );
    }

    #[tokio::test]
    async fn new_top_article_notifies_and_updates_url() {
        let h = harness(FakeSource::with_articles(2)).await;
        h.job.sync(&ctx(true)).await;

        h.source.prepend(NewArticle {
            header: "Fresh".to_string(),
            date: "02/05/2024".to_string(),
            content: "New".to_string(),
            url: "https://student.example.edu/content/fresh".to_string(),
        });
        h.job.sync(&ctx(true)).await;

        let delivered = h.sink.delivered();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[1].title, "Fresh");
        assert_eq!(
            h.state.last_notified_url().await.unwrap().as_deref(),
            Some("https://student.example.edu/content/fresh")
        );
        assert_eq!(h.articles.query_all().await.unwrap()[0].header, "Fresh");
    }

    #[tokio::test]
    async fn recent_sync_is_debounced_without_network_or_writes() {
        let h = harness(FakeSource::with_articles(2)).await;
        h.job.sync(&ctx(true)).await;
        assert_eq!(h.source.calls(), 1);
        let before = h.state.load().await.unwrap();

        h.clock.advance(chrono::Duration::minutes(14));
        let outcome = h.job.sync(&ctx(false)).await;

        assert!(matches!(outcome, SyncOutcome::Debounced { minutes_since_last: 14 }));
        assert_eq!(outcome.state(), JobState::Success);
        assert_eq!(h.source.calls(), 1);
        assert_eq!(h.state.load().await.unwrap(), before);
    }

    #[tokio::test]
    async fn run_just_short_of_the_interval_is_due() {
        let h = harness(FakeSource::with_articles(1)).await;
        h.job.sync(&ctx(true)).await;

        // A periodic tick that fires a little early still syncs
        h.clock.advance(chrono::Duration::seconds(14 * 60 + 45));
        assert!(matches!(h.job.sync(&ctx(false)).await, SyncOutcome::Synced(_)));
        assert_eq!(h.source.calls(), 2);
    }

    #[tokio::test]
    async fn clock_moving_backwards_does_not_block_syncs() {
        let h = harness(FakeSource::with_articles(1)).await;
        h.job.sync(&ctx(true)).await;

        // Daylight saving ends: local time falls back past the last sync
        h.clock.advance(chrono::Duration::minutes(-50));
        let outcome = h.job.sync(&ctx(false)).await;
        assert!(matches!(outcome, SyncOutcome::Synced(_)));
        assert_eq!(h.source.calls(), 2);
        // The stored timestamp never moves backwards
        assert_eq!(h.state.last_sync().await.unwrap(), Some(start_time()));
    }

    #[tokio::test]
    async fn forced_run_ignores_the_debounce() {
        let h = harness(FakeSource::with_articles(1)).await;
        h.job.sync(&ctx(true)).await;
        h.clock.advance(chrono::Duration::minutes(1));

        let outcome = h.job.sync(&ctx(true)).await;
        assert!(matches!(outcome, SyncOutcome::Synced(_)));
        assert_eq!(h.source.calls(), 2);
    }

    #[tokio::test]
    async fn interval_change_moves_the_debounce_window() {
        let h = harness(FakeSource::with_articles(1)).await;
        h.job.sync(&ctx(true)).await;
        h.state.set_interval_minutes(60).await.unwrap();
        h.clock.advance(chrono::Duration::minutes(30));

        assert!(matches!(h.job.sync(&ctx(false)).await, SyncOutcome::Debounced { .. }));
        h.clock.advance(chrono::Duration::minutes(30));
        assert!(matches!(h.job.sync(&ctx(false)).await, SyncOutcome::Synced(_)));
    }

    #[tokio::test]
    async fn network_failure_is_retryable_and_leaves_state_alone() {
        let h = harness(FakeSource::with_articles(2)).await;
        h.job.sync(&ctx(true)).await;
        let before = h.state.load().await.unwrap();

        h.source.fail(Some(503));
        h.source.prepend(make_articles(10, 1).remove(0));
        h.clock.advance(chrono::Duration::hours(1));

        let outcome = h.job.sync(&ctx(false)).await;
        assert!(matches!(outcome, SyncOutcome::Retryable(AppError::HttpStatus { status: 503, .. })));
        assert_eq!(outcome.state(), JobState::RetryableFailure);

        let after = h.state.load().await.unwrap();
        assert_eq!(after.last_sync, before.last_sync);
        assert_eq!(after.last_notified_url, before.last_notified_url);
        assert_eq!(h.sink.delivered().len(), 1);
    }

    #[tokio::test]
    async fn detail_page_failure_discards_the_partial_batch() {
        let h = harness(FakeSource::with_articles(2)).await;
        h.job.sync(&ctx(true)).await;
        let before = h.state.load().await.unwrap();

        h.source.prepend(make_articles(10, 1).remove(0));
        h.source.prepend(make_articles(11, 1).remove(0));
        *h.source.failing_detail.lock().unwrap() =
            Some("https://student.example.edu/content/10".to_string());
        h.clock.advance(chrono::Duration::hours(1));

        // content/11 is fetched first, then content/10 fails
        let outcome = h.job.sync(&ctx(false)).await;
        assert!(matches!(outcome, SyncOutcome::Retryable(AppError::HttpStatus { status: 502, .. })));
        assert_eq!(outcome.state(), JobState::RetryableFailure);

        assert_eq!(h.articles.count().await.unwrap(), 2);
        assert!(h
            .articles
            .query_all()
            .await
            .unwrap()
            .iter()
            .all(|a| a.url != "https://student.example.edu/content/11"));
        assert_eq!(h.state.load().await.unwrap(), before);
        assert_eq!(h.sink.delivered().len(), 1);
    }

    #[tokio::test]
    async fn denied_notification_still_counts_as_notified() {
        let h = harness_with_sink(FakeSource::with_articles(2), MemorySink::denying()).await;

        let outcome = h.job.sync(&ctx(true)).await;
        let SyncOutcome::Synced(report) = outcome else {
            panic!("expected a sync, got {outcome:?}");
        };
        assert_eq!(report.fetched, 2);
        assert!(h.sink.delivered().is_empty());
        assert_eq!(
            h.state.last_notified_url().await.unwrap().as_deref(),
            Some("https://student.example.edu/content/0")
        );

        // The same top article is not offered again once permission is back
        h.clock.advance(chrono::Duration::minutes(20));
        let outcome = h.job.sync(&ctx(false)).await;
        let SyncOutcome::Synced(report) = outcome else {
            panic!("expected a sync, got {outcome:?}");
        };
        assert!(report.notified.is_none());
    }

    #[tokio::test]
    async fn parse_failure_is_fatal() {
        let h = harness(FakeSource::with_articles(2)).await;
        *h.source.broken_link.lock().unwrap() = true;

        let outcome = h.job.sync(&ctx(true)).await;
        assert!(matches!(outcome, SyncOutcome::Fatal(AppError::Parse(_))));
        assert_eq!(outcome.state(), JobState::FatalFailure);
        assert_eq!(h.articles.count().await.unwrap(), 0);
        assert_eq!(h.state.last_sync().await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_index_is_a_successful_sync() {
        let h = harness(FakeSource::with_articles(0)).await;

        let outcome = h.job.sync(&ctx(true)).await;
        let SyncOutcome::Synced(report) = outcome else {
            panic!("expected a sync, got {outcome:?}");
        };
        assert_eq!(report.fetched, 0);
        assert!(report.notified.is_none());
        assert!(h.sink.delivered().is_empty());
        assert_eq!(h.state.last_sync().await.unwrap(), Some(start_time()));
    }

    #[tokio::test]
    async fn progress_is_reported_after_each_article() {
        let h = harness(FakeSource::with_articles(4)).await;
        let (tx, mut rx) = watch::channel(crate::worker::job::JobInfo::default());
        let ctx = JobContext::new(JobInput { forced: true }, ProgressReporter::new(Arc::new(tx)));

        let job = h.job.clone();
        let run = tokio::spawn(async move { job.sync(&ctx).await });

        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            seen.push(rx.borrow_and_update().progress);
        }
        assert!(matches!(run.await.unwrap(), SyncOutcome::Synced(_)));
        assert_eq!(seen.last().copied(), Some(1.0));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(seen.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[tokio::test]
    async fn job_trait_maps_outcome_to_state() {
        let h = harness(FakeSource::with_articles(1)).await;
        assert_eq!(h.job.run(&ctx(true)).await, JobState::Success);
        h.source.fail(Some(500));
        assert_eq!(h.job.run(&ctx(true)).await, JobState::RetryableFailure);
    }
}
