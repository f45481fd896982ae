use crate::model::{ArticleId, FeedId};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// A stored article
///
/// Only the update checker mutates an article after it is created: either the
/// content, description, validators and `last_checked_at` together, or
/// `last_checked_at` alone.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub id: ArticleId,
    pub feed_id: FeedId,
    pub url: String,
    pub title: Option<String>,
    /// Sanitized HTML
    pub content: String,
    /// Plain text derived from `content`
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub http_etag: Option<String>,
    /// RFC 3339 UTC timestamp
    pub http_last_modified: Option<String>,
}

/// An article about to be inserted by the feed refresher
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub feed_id: FeedId,
    pub url: String,
    pub title: Option<String>,
    pub content: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
}

/// Read projection of an article used only for scheduling rechecks
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleCheckCandidate {
    pub id: ArticleId,
    pub feed_id: FeedId,
    pub url: String,
    pub prev_etag: Option<String>,
    pub prev_last_modified: Option<String>,
    pub published_at: DateTime<Utc>,
}

impl From<&Article> for ArticleCheckCandidate {
    fn from(article: &Article) -> Self {
        Self {
            id: article.id,
            feed_id: article.feed_id,
            url: article.url.clone(),
            prev_etag: article.http_etag.clone(),
            prev_last_modified: article.http_last_modified.clone(),
            published_at: article.published_at,
        }
    }
}

impl ArticleCheckCandidate {
    /// Paging key of this candidate
    pub fn cursor(&self) -> ArticleCheckCursor {
        ArticleCheckCursor {
            published_at: self.published_at,
            article_id: self.id,
        }
    }
}

/// Keyset pagination cursor over recheck candidates
///
/// Candidates are ordered by `published_at` descending, then `article_id`
/// ascending, so rows sharing a timestamp are neither skipped nor repeated.
/// `Ord` follows that paging order: a cursor that sorts later is further along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArticleCheckCursor {
    pub published_at: DateTime<Utc>,
    pub article_id: ArticleId,
}

impl Ord for ArticleCheckCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .published_at
            .cmp(&self.published_at)
            .then_with(|| self.article_id.cmp(&other.article_id))
    }
}

impl PartialOrd for ArticleCheckCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One page of recheck candidates
#[derive(Debug, Clone, Default)]
pub struct CandidatePage {
    pub candidates: Vec<ArticleCheckCandidate>,
    /// Cursor of the last candidate; `None` when the page is empty
    pub next_cursor: Option<ArticleCheckCursor>,
}

impl CandidatePage {
    /// Builds a page, deriving the cursor from the last candidate
    pub fn from_candidates(candidates: Vec<ArticleCheckCandidate>) -> Self {
        let next_cursor = candidates.last().map(ArticleCheckCandidate::cursor);
        Self {
            candidates,
            next_cursor,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}
