//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the storage traits.
//! The connection sits behind a mutex; every trait method takes the lock for
//! the duration of one statement and never holds it across an await.

use crate::model::{
    Article, ArticleCheckCandidate, ArticleCheckCursor, ArticleId, CandidatePage, Feed, FeedId,
    FeedStatus, NewArticle,
};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    ArticleStore, ArticleUpdate, CandidateLister, CheckWindow, FeedLister, FeedStore,
    StorageError, StorageResult,
};
use crate::storage::{format_timestamp, parse_timestamp};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Opens (or creates) the database at `path`
    ///
    /// Enables WAL mode and foreign keys, then creates any missing tables.
    ///
    /// # Arguments
    ///
    /// * `path` - Location of the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Database opened and schema initialized
    /// * `Err(StorageError)` - The file could not be opened or migrated
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Subscribes a feed, returning its id
    ///
    /// Adding a URL that is already subscribed returns the existing id.
    pub fn insert_feed(&self, url: &str, title: Option<&str>) -> StorageResult<FeedId> {
        let conn = self.conn()?;
        let now = format_timestamp(Utc::now());
        conn.execute(
            "INSERT OR IGNORE INTO feeds (url, title, status, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![url, title, FeedStatus::Active.to_db_string(), now],
        )?;
        let id = conn.query_row(
            "SELECT id FROM feeds WHERE url = ?1",
            params![url],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Number of stored articles
    pub fn article_count(&self) -> StorageResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn load_feed(conn: &Connection, feed_id: FeedId) -> StorageResult<Feed> {
        let raw = conn
            .query_row(
                "SELECT id, title, description, url, status, last_fetched_at, error_message
                 FROM feeds WHERE id = ?1",
                params![feed_id],
                RawFeed::from_row,
            )
            .optional()?
            .ok_or(StorageError::FeedNotFound(feed_id))?;
        raw.into_feed()
    }
}

/// Feed row before timestamp and status decoding
struct RawFeed {
    id: FeedId,
    title: Option<String>,
    description: Option<String>,
    url: String,
    status: String,
    last_fetched_at: Option<String>,
    error_message: Option<String>,
}

impl RawFeed {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            url: row.get(3)?,
            status: row.get(4)?,
            last_fetched_at: row.get(5)?,
            error_message: row.get(6)?,
        })
    }

    fn into_feed(self) -> StorageResult<Feed> {
        let status = FeedStatus::from_db_string(&self.status).ok_or_else(|| {
            StorageError::InvalidData(format!("feed {} has status '{}'", self.id, self.status))
        })?;
        Ok(Feed {
            id: self.id,
            title: self.title,
            description: self.description,
            url: self.url,
            status,
            last_fetched_at: self
                .last_fetched_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            error_message: self.error_message,
        })
    }
}

/// Candidate row before timestamp decoding
struct RawCandidate {
    id: ArticleId,
    feed_id: FeedId,
    url: String,
    prev_etag: Option<String>,
    prev_last_modified: Option<String>,
    published_at: String,
}

impl RawCandidate {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            feed_id: row.get(1)?,
            url: row.get(2)?,
            prev_etag: row.get(3)?,
            prev_last_modified: row.get(4)?,
            published_at: row.get(5)?,
        })
    }

    fn into_candidate(self) -> StorageResult<ArticleCheckCandidate> {
        Ok(ArticleCheckCandidate {
            id: self.id,
            feed_id: self.feed_id,
            url: self.url,
            prev_etag: self.prev_etag,
            prev_last_modified: self.prev_last_modified,
            published_at: parse_timestamp(&self.published_at)?,
        })
    }
}

#[async_trait]
impl FeedLister for SqliteStorage {
    async fn list_all_feeds(&self) -> StorageResult<Vec<Feed>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, description, url, status, last_fetched_at, error_message
             FROM feeds ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], RawFeed::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawFeed::into_feed).collect()
    }
}

#[async_trait]
impl CandidateLister for SqliteStorage {
    async fn list_articles_to_check(
        &self,
        window: CheckWindow,
        page_size: usize,
        cursor: Option<ArticleCheckCursor>,
    ) -> StorageResult<CandidatePage> {
        if page_size == 0 {
            return Err(StorageError::InvalidArgument(
                "page size must be positive".to_string(),
            ));
        }

        let cursor_published = cursor.map(|c| format_timestamp(c.published_at));
        let cursor_id = cursor.map(|c| c.article_id).unwrap_or(0);

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, feed_id, url, http_etag, http_last_modified, published_at
             FROM articles
             WHERE published_at >= ?1
               AND (last_checked_at IS NULL OR last_checked_at < ?2)
               AND (?3 IS NULL OR published_at < ?3 OR (published_at = ?3 AND id > ?4))
             ORDER BY published_at DESC, id ASC
             LIMIT ?5",
        )?;
        let rows = stmt
            .query_map(
                params![
                    format_timestamp(window.published_since),
                    format_timestamp(window.last_checked_before),
                    cursor_published,
                    cursor_id,
                    page_size as i64,
                ],
                RawCandidate::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let candidates = rows
            .into_iter()
            .map(RawCandidate::into_candidate)
            .collect::<StorageResult<Vec<_>>>()?;
        Ok(CandidatePage::from_candidates(candidates))
    }
}

#[async_trait]
impl ArticleStore for SqliteStorage {
    async fn mark_last_checked(
        &self,
        article_id: ArticleId,
        checked_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE articles SET last_checked_at = ?1 WHERE id = ?2",
            params![format_timestamp(checked_at), article_id],
        )?;
        if changed == 0 {
            return Err(StorageError::ArticleNotFound(article_id));
        }
        Ok(())
    }

    async fn update_article_on_change(&self, update: &ArticleUpdate) -> StorageResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE articles
             SET content = ?1, description = ?2, http_etag = ?3, http_last_modified = ?4,
                 last_checked_at = ?5
             WHERE id = ?6 AND http_etag IS ?7 AND http_last_modified IS ?8",
            params![
                update.content,
                update.description,
                update.etag,
                update.last_modified,
                format_timestamp(update.checked_at),
                update.article_id,
                update.expected_etag,
                update.expected_last_modified,
            ],
        )?;
        Ok(changed == 1)
    }

    async fn get_article(&self, article_id: ArticleId) -> StorageResult<Article> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, feed_id, url, title, content, description, published_at,
                        last_checked_at, http_etag, http_last_modified
                 FROM articles WHERE id = ?1",
                params![article_id],
                |row| {
                    Ok((
                        row.get::<_, ArticleId>(0)?,
                        row.get::<_, FeedId>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, Option<String>>(8)?,
                        row.get::<_, Option<String>>(9)?,
                    ))
                },
            )
            .optional()?
            .ok_or(StorageError::ArticleNotFound(article_id))?;

        let (
            id,
            feed_id,
            url,
            title,
            content,
            description,
            published_at,
            last_checked_at,
            http_etag,
            http_last_modified,
        ) = row;

        Ok(Article {
            id,
            feed_id,
            url,
            title,
            content,
            description,
            published_at: parse_timestamp(&published_at)?,
            last_checked_at: last_checked_at.as_deref().map(parse_timestamp).transpose()?,
            http_etag,
            http_last_modified,
        })
    }
}

#[async_trait]
impl FeedStore for SqliteStorage {
    async fn get_feed(&self, feed_id: FeedId) -> StorageResult<Feed> {
        let conn = self.conn()?;
        Self::load_feed(&conn, feed_id)
    }

    async fn record_feed_success(
        &self,
        feed_id: FeedId,
        title: Option<&str>,
        description: Option<&str>,
        fetched_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE feeds
             SET title = CASE WHEN title IS NULL OR title = '' THEN ?1 ELSE title END,
                 description = CASE WHEN description IS NULL OR description = '' THEN ?2 ELSE description END,
                 status = ?3, last_fetched_at = ?4, error_message = NULL
             WHERE id = ?5",
            params![
                title,
                description,
                FeedStatus::Active.to_db_string(),
                format_timestamp(fetched_at),
                feed_id,
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::FeedNotFound(feed_id));
        }
        Ok(())
    }

    async fn mark_feed_error(&self, feed_id: FeedId, message: &str) -> StorageResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE feeds SET status = ?1, error_message = ?2 WHERE id = ?3",
            params![FeedStatus::Error.to_db_string(), message, feed_id],
        )?;
        if changed == 0 {
            return Err(StorageError::FeedNotFound(feed_id));
        }
        Ok(())
    }

    async fn insert_article(&self, article: &NewArticle) -> StorageResult<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO articles
                 (feed_id, url, title, content, description, published_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                article.feed_id,
                article.url,
                article.title,
                article.content,
                article.description,
                format_timestamp(article.published_at),
                format_timestamp(Utc::now()),
            ],
        )?;
        Ok(changed == 1)
    }
}
