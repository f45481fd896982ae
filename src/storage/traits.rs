//! Storage traits and error types
//!
//! The scheduler, checker and refresher depend only on these traits; the
//! SQLite backend is one implementation.

use crate::model::{
    Article, ArticleCheckCursor, ArticleId, CandidatePage, Feed, FeedId, NewArticle,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Feed not found: {0}")]
    FeedNotFound(FeedId),

    #[error("Article not found: {0}")]
    ArticleNotFound(ArticleId),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Corrupt row: {0}")]
    InvalidData(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Two-sided window selecting recheck candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckWindow {
    /// Oldest publication time considered
    pub published_since: DateTime<Utc>,

    /// Articles checked at or after this instant are left alone
    pub last_checked_before: DateTime<Utc>,
}

/// Compare-and-swap update of an article after a changed fetch
///
/// Applied only while the stored validators still equal the `expected_*`
/// values (`None` matches `NULL`).
#[derive(Debug, Clone)]
pub struct ArticleUpdate {
    pub article_id: ArticleId,
    pub content: String,
    pub description: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub checked_at: DateTime<Utc>,
    pub expected_etag: Option<String>,
    pub expected_last_modified: Option<String>,
}

/// Lists every feed for the refresh cycle
#[async_trait]
pub trait FeedLister: Send + Sync {
    async fn list_all_feeds(&self) -> StorageResult<Vec<Feed>>;
}

/// Pages through articles due for a recheck
#[async_trait]
pub trait CandidateLister: Send + Sync {
    /// Returns the page after `cursor` (or the first page)
    ///
    /// Ordered by `published_at` descending then id ascending. An empty page
    /// carries no cursor. `page_size` of 0 is rejected.
    async fn list_articles_to_check(
        &self,
        window: CheckWindow,
        page_size: usize,
        cursor: Option<ArticleCheckCursor>,
    ) -> StorageResult<CandidatePage>;
}

/// Writes performed by the update checker
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Unconditionally advances `last_checked_at`
    async fn mark_last_checked(
        &self,
        article_id: ArticleId,
        checked_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Applies `update` if the validators are unchanged
    ///
    /// Returns `false` when another writer got there first.
    async fn update_article_on_change(&self, update: &ArticleUpdate) -> StorageResult<bool>;

    async fn get_article(&self, article_id: ArticleId) -> StorageResult<Article>;
}

/// Feed and article writes performed by the feed refresher
#[async_trait]
pub trait FeedStore: Send + Sync {
    async fn get_feed(&self, feed_id: FeedId) -> StorageResult<Feed>;

    /// Records a successful fetch, filling in title/description only if unset
    async fn record_feed_success(
        &self,
        feed_id: FeedId,
        title: Option<&str>,
        description: Option<&str>,
        fetched_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Flips the feed to `error` status
    async fn mark_feed_error(&self, feed_id: FeedId, message: &str) -> StorageResult<()>;

    /// Inserts an article unless its URL is already stored
    ///
    /// Returns `true` if a row was created.
    async fn insert_article(&self, article: &NewArticle) -> StorageResult<bool>;
}
