use crate::model::FeedId;
use chrono::{DateTime, Utc};
use std::fmt;

/// Lifecycle status of a feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedStatus {
    /// Last fetch succeeded (or the feed has not been fetched yet)
    Active,

    /// Last fetch failed
    Error,
}

impl FeedStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Error => "error",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// A subscribed feed
///
/// Title and description are backfilled by the first successful fetch;
/// feeds are never deleted by this crate.
#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    pub id: FeedId,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: String,
    pub status: FeedStatus,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}
