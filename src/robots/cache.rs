//! Robots.txt caching implementation
//!
//! Entries are keyed by origin and expire after a configurable TTL; an
//! expired entry is never consulted.

use crate::robots::RobotsRules;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Cached robots.txt rules for one origin
#[derive(Debug, Clone)]
pub struct CachedRobots {
    /// The parsed robots.txt content
    pub rules: RobotsRules,

    /// When the robots.txt was fetched
    pub fetched_at: DateTime<Utc>,
}

impl CachedRobots {
    /// Creates a new entry stamped with the current time
    pub fn new(rules: RobotsRules) -> Self {
        Self {
            rules,
            fetched_at: Utc::now(),
        }
    }

    /// Returns the age of the cached robots.txt
    pub fn age(&self) -> Duration {
        Utc::now() - self.fetched_at
    }

    /// Checks if this entry is at least `ttl` old
    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.age() >= ttl
    }
}

/// Per-origin cache shared by concurrent checks
///
/// Lookups take the read lock; inserting a freshly fetched entry takes the
/// write lock.
#[derive(Debug)]
pub struct RobotsCache {
    entries: RwLock<HashMap<String, CachedRobots>>,
    ttl: Duration,
}

impl RobotsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns the rules for `origin` if a fresh entry exists
    pub async fn get(&self, origin: &str) -> Option<RobotsRules> {
        let entries = self.entries.read().await;
        entries
            .get(origin)
            .filter(|cached| !cached.is_stale(self.ttl))
            .map(|cached| cached.rules.clone())
    }

    /// Stores freshly fetched rules for `origin`
    pub async fn insert(&self, origin: &str, rules: RobotsRules) {
        self.insert_entry(origin, CachedRobots::new(rules)).await;
    }

    pub(crate) async fn insert_entry(&self, origin: &str, entry: CachedRobots) {
        let mut entries = self.entries.write().await;
        entries.insert(origin.to_string(), entry);
    }

    /// Number of stored entries, stale ones included
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
