//! Integration tests for the batch scheduler
//!
//! Cycles run against a recording publisher so the published events, their
//! order and the batch concurrency can be inspected directly.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use feed_refresher::bus::{EventPublisher, PublishError};
use feed_refresher::model::{
    ArticleCheckCandidate, ArticleCheckCursor, ArticleCheckEvent, ArticleId, CandidatePage, Feed,
    FeedId, FeedRefreshEvent, FeedStatus, NewArticle,
};
use feed_refresher::scheduler::{process_batch, BatchScheduler, SchedulerError, SchedulerSettings};
use feed_refresher::storage::{
    ArticleStore, CandidateLister, CheckWindow, FeedLister, FeedStore, SqliteStorage,
    StorageError, StorageResult,
};
use feed_refresher::{shutdown_channel, ShutdownSignal};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Publisher that records events and can fail or stall on demand
#[derive(Default)]
struct RecordingPublisher {
    feeds: Mutex<Vec<FeedId>>,
    articles: Mutex<Vec<ArticleId>>,
    failing_feeds: HashSet<FeedId>,
    failing_articles: HashSet<ArticleId>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingPublisher {
    fn published_feeds(&self) -> Vec<FeedId> {
        self.feeds.lock().unwrap().clone()
    }

    fn published_articles(&self) -> Vec<ArticleId> {
        self.articles.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish_feed_refresh(&self, event: FeedRefreshEvent) -> Result<(), PublishError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_feeds.contains(&event.feed_id) {
            return Err(PublishError::Closed {
                channel: "feed-refresh",
            });
        }
        self.feeds.lock().unwrap().push(event.feed_id);
        Ok(())
    }

    async fn publish_article_check(&self, event: ArticleCheckEvent) -> Result<(), PublishError> {
        if self.failing_articles.contains(&event.article_id) {
            return Err(PublishError::Closed {
                channel: "article-check",
            });
        }
        self.articles.lock().unwrap().push(event.article_id);
        Ok(())
    }
}

/// Feed lister serving a fixed list, or failing
struct StaticFeeds(Option<Vec<Feed>>);

impl StaticFeeds {
    fn with_ids(ids: impl IntoIterator<Item = FeedId>) -> Self {
        Self(Some(
            ids.into_iter()
                .map(|id| Feed {
                    id,
                    title: None,
                    description: None,
                    url: format!("https://example.com/{}.xml", id),
                    status: FeedStatus::Active,
                    last_fetched_at: None,
                    error_message: None,
                })
                .collect(),
        ))
    }
}

#[async_trait]
impl FeedLister for StaticFeeds {
    async fn list_all_feeds(&self) -> StorageResult<Vec<Feed>> {
        self.0.clone().ok_or(StorageError::LockPoisoned)
    }
}

/// Candidate lister that serves one page and then fails
struct FailsAfterFirstPage {
    calls: AtomicUsize,
}

#[async_trait]
impl CandidateLister for FailsAfterFirstPage {
    async fn list_articles_to_check(
        &self,
        _window: CheckWindow,
        _page_size: usize,
        _cursor: Option<ArticleCheckCursor>,
    ) -> StorageResult<CandidatePage> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(StorageError::InvalidData("connection lost".to_string()));
        }
        let published_at = Utc::now();
        Ok(CandidatePage::from_candidates(
            (1..=2)
                .map(|id| ArticleCheckCandidate {
                    id,
                    feed_id: 1,
                    url: format!("https://example.com/{}", id),
                    prev_etag: None,
                    prev_last_modified: None,
                    published_at,
                })
                .collect(),
        ))
    }
}

fn settings(batch_size: usize, max_concurrent_batches: usize) -> SchedulerSettings {
    SchedulerSettings {
        batch_size,
        batch_delay: Duration::ZERO,
        max_concurrent_batches,
        page_size: 10,
        ..SchedulerSettings::default()
    }
}

fn scheduler(
    feeds: Arc<dyn FeedLister>,
    candidates: Arc<dyn CandidateLister>,
    publisher: Arc<RecordingPublisher>,
    settings: SchedulerSettings,
) -> BatchScheduler {
    BatchScheduler::new(feeds, candidates, publisher, settings)
}

fn empty_storage() -> Arc<SqliteStorage> {
    Arc::new(SqliteStorage::new_in_memory().unwrap())
}

/// Stores `count` articles published `minutes_ago` minutes back
async fn store_articles(storage: &SqliteStorage, count: usize, minutes_ago: i64) {
    let feed_id = storage
        .insert_feed(&format!("https://example.com/{}.xml", minutes_ago), None)
        .unwrap();
    for n in 0..count {
        storage
            .insert_article(&NewArticle {
                feed_id,
                url: format!("https://example.com/{}/{}", minutes_ago, n),
                title: None,
                content: String::new(),
                description: String::new(),
                published_at: Utc::now() - ChronoDuration::minutes(minutes_ago),
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_process_batch_counts_failures() {
    let publisher = RecordingPublisher {
        failing_feeds: [2, 4].into_iter().collect(),
        ..RecordingPublisher::default()
    };

    let report = process_batch(&publisher, &[1, 2, 3, 4, 5]).await;

    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 2);
    assert_eq!(publisher.published_feeds(), vec![1, 3, 5]);
}

#[tokio::test]
async fn test_feed_cycle_publishes_every_feed() {
    let publisher = Arc::new(RecordingPublisher {
        failing_feeds: [7].into_iter().collect(),
        ..RecordingPublisher::default()
    });
    let scheduler = scheduler(
        Arc::new(StaticFeeds::with_ids(1..=23)),
        empty_storage(),
        publisher.clone(),
        settings(5, 2),
    );

    let report = scheduler
        .run_feed_refresh_cycle(&ShutdownSignal::never())
        .await
        .unwrap();

    assert_eq!(report.batches, 5);
    assert_eq!(report.succeeded, 22);
    assert_eq!(report.failed, 1);
    assert!(!report.cancelled);

    let mut published = publisher.published_feeds();
    published.sort_unstable();
    let expected: Vec<FeedId> = (1..=23).filter(|id| *id != 7).collect();
    assert_eq!(published, expected);
}

#[tokio::test]
async fn test_feed_cycle_with_no_feeds() {
    let publisher = Arc::new(RecordingPublisher::default());
    let scheduler = scheduler(
        Arc::new(StaticFeeds::with_ids([])),
        empty_storage(),
        publisher.clone(),
        settings(5, 2),
    );

    let report = scheduler
        .run_feed_refresh_cycle(&ShutdownSignal::never())
        .await
        .unwrap();
    assert_eq!(report.batches, 0);
    assert_eq!(report.succeeded, 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_batches_are_capped() {
    let publisher = Arc::new(RecordingPublisher {
        delay: Duration::from_millis(100),
        ..RecordingPublisher::default()
    });
    let scheduler = scheduler(
        Arc::new(StaticFeeds::with_ids(1..=12)),
        empty_storage(),
        publisher.clone(),
        settings(1, 3),
    );

    let report = scheduler
        .run_feed_refresh_cycle(&ShutdownSignal::never())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 12);
    assert_eq!(publisher.max_in_flight.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_shutdown_interrupts_batch_delay() {
    let publisher = Arc::new(RecordingPublisher::default());
    let scheduler = Arc::new(scheduler(
        Arc::new(StaticFeeds::with_ids(1..=6)),
        empty_storage(),
        publisher.clone(),
        SchedulerSettings {
            batch_delay: Duration::from_secs(3600),
            ..settings(2, 1)
        },
    ));

    let (trigger, shutdown) = shutdown_channel();
    let cycle = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run_feed_refresh_cycle(&shutdown).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    trigger.trigger();

    let report = tokio::time::timeout(Duration::from_secs(5), cycle)
        .await
        .expect("cycle did not stop")
        .unwrap()
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.batches, 1);
    assert_eq!(report.succeeded, 2);
    assert_eq!(publisher.published_feeds(), vec![1, 2]);
}

#[tokio::test]
async fn test_feed_listing_failure_aborts_cycle() {
    let publisher = Arc::new(RecordingPublisher::default());
    let scheduler = scheduler(
        Arc::new(StaticFeeds(None)),
        empty_storage(),
        publisher.clone(),
        settings(5, 2),
    );

    let result = scheduler
        .run_feed_refresh_cycle(&ShutdownSignal::never())
        .await;

    assert!(matches!(result, Err(SchedulerError::Storage(_))));
    assert!(publisher.published_feeds().is_empty());
}

#[tokio::test]
async fn test_recheck_cycle_pages_through_candidates() {
    let storage = empty_storage();
    // Two groups sharing a timestamp exercise the id tie-break across pages.
    store_articles(&storage, 13, 60).await;
    store_articles(&storage, 12, 120).await;

    let publisher = Arc::new(RecordingPublisher::default());
    let scheduler = scheduler(
        Arc::new(StaticFeeds::with_ids([])),
        storage.clone(),
        publisher.clone(),
        settings(5, 2),
    );

    let report = scheduler
        .run_article_recheck_cycle(&ShutdownSignal::never())
        .await
        .unwrap();

    assert_eq!(report.pages, 3);
    assert_eq!(report.published, 25);
    assert_eq!(report.failed, 0);

    let published = publisher.published_articles();
    let unique: HashSet<_> = published.iter().copied().collect();
    assert_eq!(published.len(), 25);
    assert_eq!(unique.len(), 25);
}

#[tokio::test]
async fn test_recheck_cycle_counts_publish_failures() {
    let storage = empty_storage();
    store_articles(&storage, 4, 30).await;

    let publisher = Arc::new(RecordingPublisher {
        failing_articles: [2].into_iter().collect(),
        ..RecordingPublisher::default()
    });
    let scheduler = scheduler(
        Arc::new(StaticFeeds::with_ids([])),
        storage,
        publisher.clone(),
        settings(5, 2),
    );

    let report = scheduler
        .run_article_recheck_cycle(&ShutdownSignal::never())
        .await
        .unwrap();

    assert_eq!(report.published, 3);
    assert_eq!(report.failed, 1);
    assert!(!publisher.published_articles().contains(&2));
}

#[tokio::test]
async fn test_recheck_cycle_respects_window() {
    let storage = empty_storage();
    store_articles(&storage, 2, 60).await;
    // Published five days ago, outside the default 72h window.
    store_articles(&storage, 2, 5 * 24 * 60).await;
    // Checked a minute ago, inside the minimum gap.
    storage
        .mark_last_checked(1, Utc::now() - ChronoDuration::minutes(1))
        .await
        .unwrap();

    let publisher = Arc::new(RecordingPublisher::default());
    let scheduler = scheduler(
        Arc::new(StaticFeeds::with_ids([])),
        storage,
        publisher.clone(),
        settings(5, 2),
    );

    let report = scheduler
        .run_article_recheck_cycle(&ShutdownSignal::never())
        .await
        .unwrap();

    assert_eq!(report.published, 1);
    assert_eq!(publisher.published_articles(), vec![2]);
}

#[tokio::test]
async fn test_recheck_listing_failure_aborts_cycle() {
    let publisher = Arc::new(RecordingPublisher::default());
    let scheduler = scheduler(
        Arc::new(StaticFeeds::with_ids([])),
        Arc::new(FailsAfterFirstPage {
            calls: AtomicUsize::new(0),
        }),
        publisher.clone(),
        settings(5, 2),
    );

    let result = scheduler
        .run_article_recheck_cycle(&ShutdownSignal::never())
        .await;

    assert!(matches!(result, Err(SchedulerError::Storage(_))));
    assert_eq!(publisher.published_articles(), vec![1, 2]);
}

#[tokio::test]
async fn test_recheck_cycle_stops_when_cancelled() {
    let storage = empty_storage();
    store_articles(&storage, 3, 10).await;

    let publisher = Arc::new(RecordingPublisher::default());
    let scheduler = scheduler(
        Arc::new(StaticFeeds::with_ids([])),
        storage,
        publisher.clone(),
        settings(5, 2),
    );

    let (trigger, shutdown) = shutdown_channel();
    trigger.trigger();
    let report = scheduler.run_article_recheck_cycle(&shutdown).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.pages, 0);
    assert!(publisher.published_articles().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_stop_lifecycle() {
    let scheduler = scheduler(
        Arc::new(StaticFeeds::with_ids([])),
        empty_storage(),
        Arc::new(RecordingPublisher::default()),
        SchedulerSettings {
            feed_refresh_cron: "0 0 * * * *".to_string(),
            article_recheck_cron: "0 30 * * * *".to_string(),
            shutdown_grace: Duration::from_secs(1),
            ..SchedulerSettings::default()
        },
    );

    assert!(matches!(
        scheduler.stop().await,
        Err(SchedulerError::NotRunning)
    ));

    scheduler.start().await.unwrap();
    assert!(scheduler.is_running().await);
    assert!(matches!(
        scheduler.start().await,
        Err(SchedulerError::AlreadyRunning)
    ));

    scheduler.stop().await.unwrap();
    assert!(!scheduler.is_running().await);
    assert!(matches!(
        scheduler.stop().await,
        Err(SchedulerError::NotRunning)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_cron_is_rejected() {
    let scheduler = scheduler(
        Arc::new(StaticFeeds::with_ids([])),
        empty_storage(),
        Arc::new(RecordingPublisher::default()),
        SchedulerSettings {
            feed_refresh_cron: "every now and then".to_string(),
            ..SchedulerSettings::default()
        },
    );

    let result = scheduler.start().await;
    assert!(matches!(
        result,
        Err(SchedulerError::InvalidCron { ref expression, .. }) if expression == "every now and then"
    ));
    assert!(!scheduler.is_running().await);
}
