//! Storage module for feeds and articles
//!
//! This module defines the storage interfaces the core depends on and a
//! SQLite-backed implementation of all of them:
//! - Feed listing for the refresh cycle
//! - Cursor-paged candidate listing for the recheck cycle
//! - Compare-and-swap article updates for the update checker
//! - Feed bookkeeping and article insertion for the feed refresher

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{
    ArticleStore, ArticleUpdate, CandidateLister, CheckWindow, FeedLister, FeedStore,
    StorageError, StorageResult,
};

use chrono::{DateTime, SecondsFormat, Utc};

/// Formats a timestamp in the fixed-width form stored in the database
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses a stored timestamp
pub fn parse_timestamp(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidData(format!("bad timestamp '{}': {}", value, e)))
}
