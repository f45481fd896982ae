use crate::model::{ArticleCheckCandidate, ArticleId, FeedId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why an article check was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckReason {
    Scheduled,
    Manual,
}

/// Request to recheck one stored article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleCheckEvent {
    pub article_id: ArticleId,
    pub feed_id: FeedId,
    pub url: String,
    pub prev_etag: Option<String>,
    pub prev_last_modified: Option<String>,
    pub request_id: Uuid,
    pub attempt: u32,
    pub scheduled_at: DateTime<Utc>,
    pub reason: CheckReason,
}

impl ArticleCheckEvent {
    /// Builds a first-attempt event for a scheduled recheck
    pub fn scheduled(candidate: ArticleCheckCandidate, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            article_id: candidate.id,
            feed_id: candidate.feed_id,
            url: candidate.url,
            prev_etag: candidate.prev_etag,
            prev_last_modified: candidate.prev_last_modified,
            request_id: Uuid::new_v4(),
            attempt: 1,
            scheduled_at,
            reason: CheckReason::Scheduled,
        }
    }

    /// Builds a first-attempt event for an operator-requested recheck
    pub fn manual(candidate: ArticleCheckCandidate) -> Self {
        Self {
            reason: CheckReason::Manual,
            ..Self::scheduled(candidate, Utc::now())
        }
    }

    /// Copy of this event for the next delivery attempt
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// Request to refresh one feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedRefreshEvent {
    pub feed_id: FeedId,
    pub request_id: Uuid,
    pub attempt: u32,
    pub scheduled_at: DateTime<Utc>,
}

impl FeedRefreshEvent {
    pub fn new(feed_id: FeedId, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            feed_id,
            request_id: Uuid::new_v4(),
            attempt: 1,
            scheduled_at,
        }
    }

    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}
