//! Database schema definitions
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings
//! (`2026-01-01T00:00:00.000000Z`) so that text comparison in SQL matches
//! chronological order.

use rusqlite::Connection;

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Subscribed feeds
CREATE TABLE IF NOT EXISTS feeds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL UNIQUE,
    title TEXT,
    description TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    last_fetched_at TEXT,
    error_message TEXT,
    created_at TEXT NOT NULL
);

-- Stored articles and their recheck metadata
CREATE TABLE IF NOT EXISTS articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id INTEGER NOT NULL REFERENCES feeds(id),
    url TEXT NOT NULL UNIQUE,
    title TEXT,
    content TEXT NOT NULL,
    description TEXT NOT NULL,
    published_at TEXT NOT NULL,
    last_checked_at TEXT,
    http_etag TEXT,
    http_last_modified TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_articles_feed ON articles(feed_id);
CREATE INDEX IF NOT EXISTS idx_articles_recheck ON articles(published_at DESC, id ASC);
CREATE INDEX IF NOT EXISTS idx_articles_last_checked ON articles(last_checked_at);
"#;

/// Creates all tables and indexes if they do not exist yet
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}
