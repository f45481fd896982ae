//! Feed-refresh fan-out
//!
//! Feeds are split into fixed-size batches; each batch runs as its own task
//! and publishes its feeds one after another. A semaphore caps how many
//! batches are in flight and launches are spaced by `batch_delay`.

use crate::bus::EventPublisher;
use crate::model::{FeedId, FeedRefreshEvent};
use crate::scheduler::{SchedulerError, SchedulerSettings};
use crate::shutdown::ShutdownSignal;
use crate::storage::FeedLister;
use chrono::Utc;
use std::ops::AddAssign;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Publish tally of one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl AddAssign for BatchReport {
    fn add_assign(&mut self, other: Self) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }
}

/// Summary of one feed-refresh cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshCycleReport {
    /// Batches actually launched
    pub batches: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Shutdown stopped the cycle before every batch was launched
    pub cancelled: bool,
}

/// Splits `items` into contiguous batches of `size`
///
/// The last batch may be shorter; no items yields no batches. A size of 0 is
/// treated as 1.
pub fn create_batches<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    items.chunks(size.max(1)).map(<[T]>::to_vec).collect()
}

/// Publishes a refresh event for every feed in `batch`, in order
///
/// Failures are logged and counted; they never stop the batch.
///
/// # Arguments
///
/// * `publisher` - Bus receiving the events
/// * `batch` - Feed ids to publish for
///
/// # Returns
///
/// Counts of published and failed events
pub async fn process_batch(publisher: &dyn EventPublisher, batch: &[FeedId]) -> BatchReport {
    let mut report = BatchReport::default();

    for &feed_id in batch {
        let event = FeedRefreshEvent::new(feed_id, Utc::now());
        let request_id = event.request_id;
        match publisher.publish_feed_refresh(event).await {
            Ok(()) => report.succeeded += 1,
            Err(error) => {
                tracing::warn!(
                    feed_id,
                    request_id = %request_id,
                    "failed to publish feed refresh: {}",
                    error
                );
                report.failed += 1;
            }
        }
    }

    report
}

/// Runs one feed-refresh cycle
pub(crate) async fn feed_refresh_cycle(
    feeds: &dyn FeedLister,
    publisher: &Arc<dyn EventPublisher>,
    settings: &SchedulerSettings,
    shutdown: &ShutdownSignal,
) -> Result<RefreshCycleReport, SchedulerError> {
    let feed_ids: Vec<FeedId> = match feeds.list_all_feeds().await {
        Ok(feeds) => feeds.into_iter().map(|feed| feed.id).collect(),
        Err(error) => {
            tracing::error!("feed refresh cycle aborted, cannot list feeds: {}", error);
            return Err(error.into());
        }
    };

    let batches = create_batches(&feed_ids, settings.batch_size);
    let total = batches.len();
    let semaphore = Arc::new(Semaphore::new(settings.max_concurrent_batches.max(1)));
    let mut tasks = JoinSet::new();
    let mut report = RefreshCycleReport::default();

    tracing::info!(
        "feed refresh cycle: {} feeds in {} batches",
        feed_ids.len(),
        total
    );

    for (index, batch) in batches.into_iter().enumerate() {
        if shutdown.is_cancelled() {
            report.cancelled = true;
            break;
        }

        let permit = tokio::select! {
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown.cancelled() => {
                report.cancelled = true;
                break;
            }
        };

        let publisher = Arc::clone(publisher);
        tasks.spawn(async move {
            let _permit = permit;
            process_batch(publisher.as_ref(), &batch).await
        });
        report.batches += 1;

        if index + 1 < total && !settings.batch_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(settings.batch_delay) => {}
                _ = shutdown.cancelled() => {
                    report.cancelled = true;
                    break;
                }
            }
        }
    }

    let mut published = BatchReport::default();
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(batch) => published += batch,
            Err(error) => tracing::error!("feed refresh batch panicked: {}", error),
        }
    }
    report.succeeded = published.succeeded;
    report.failed = published.failed;

    tracing::info!(
        "feed refresh cycle finished: {} batches, {} published, {} failed{}",
        report.batches,
        report.succeeded,
        report.failed,
        if report.cancelled { " (cancelled)" } else { "" }
    );

    Ok(report)
}
