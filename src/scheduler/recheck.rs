//! Article-recheck cycle
//!
//! Pages through articles published inside the recheck window and not checked
//! recently, publishing one check event per candidate.

use crate::bus::EventPublisher;
use crate::model::{ArticleCheckCursor, ArticleCheckEvent};
use crate::scheduler::{SchedulerError, SchedulerSettings};
use crate::shutdown::ShutdownSignal;
use crate::storage::{CandidateLister, CheckWindow};
use chrono::{DateTime, Utc};

/// Page size used when none is configured
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Largest page requested from the candidate lister
pub const MAX_PAGE_SIZE: usize = 1000;

/// Maps a configured page size onto `1..=MAX_PAGE_SIZE` (0 selects the default)
pub fn clamp_page_size(requested: usize) -> usize {
    match requested {
        0 => DEFAULT_PAGE_SIZE,
        n => n.min(MAX_PAGE_SIZE),
    }
}

/// Window for a cycle starting at `now`
///
/// # Arguments
///
/// * `now` - Start of the cycle
/// * `window` - How far back publication dates are considered
/// * `min_gap` - Minimum time since an article's last check
pub fn check_window(
    now: DateTime<Utc>,
    window: chrono::Duration,
    min_gap: chrono::Duration,
) -> CheckWindow {
    CheckWindow {
        published_since: now - window,
        last_checked_before: now - min_gap,
    }
}

/// Summary of one article-recheck cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecheckCycleReport {
    /// Non-empty pages processed
    pub pages: usize,
    pub published: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Runs one article-recheck cycle as of `now`
///
/// A listing error aborts the cycle; publish errors are tallied.
pub(crate) async fn article_recheck_cycle(
    candidates: &dyn CandidateLister,
    publisher: &dyn EventPublisher,
    settings: &SchedulerSettings,
    now: DateTime<Utc>,
    shutdown: &ShutdownSignal,
) -> Result<RecheckCycleReport, SchedulerError> {
    let window = check_window(now, settings.recheck_window, settings.min_recheck_gap);
    let page_size = clamp_page_size(settings.page_size);
    let mut cursor: Option<ArticleCheckCursor> = None;
    let mut report = RecheckCycleReport::default();

    loop {
        if shutdown.is_cancelled() {
            report.cancelled = true;
            break;
        }

        let listed = tokio::select! {
            listed = candidates.list_articles_to_check(window, page_size, cursor) => listed,
            _ = shutdown.cancelled() => {
                report.cancelled = true;
                break;
            }
        };
        let page = match listed {
            Ok(page) => page,
            Err(error) => {
                tracing::error!(
                    "article recheck cycle aborted after {} pages: {}",
                    report.pages,
                    error
                );
                return Err(error.into());
            }
        };

        if page.is_empty() {
            break;
        }
        report.pages += 1;

        let next_cursor = page.next_cursor;
        for candidate in page.candidates {
            let event = ArticleCheckEvent::scheduled(candidate, Utc::now());
            let (article_id, feed_id, request_id) = (event.article_id, event.feed_id, event.request_id);
            match publisher.publish_article_check(event).await {
                Ok(()) => report.published += 1,
                Err(error) => {
                    tracing::warn!(
                        article_id,
                        feed_id,
                        request_id = %request_id,
                        "failed to publish article check: {}",
                        error
                    );
                    report.failed += 1;
                }
            }
        }

        match (cursor, next_cursor) {
            (_, None) => break,
            (Some(previous), Some(next)) if next <= previous => {
                tracing::warn!("candidate cursor did not advance, stopping cycle");
                break;
            }
            (_, next) => cursor = next,
        }
    }

    tracing::info!(
        "article recheck cycle finished: {} pages, {} published, {} failed{}",
        report.pages,
        report.published,
        report.failed,
        if report.cancelled { " (cancelled)" } else { "" }
    );

    Ok(report)
}
