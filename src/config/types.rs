use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Feed-Refresher
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub recheck: RecheckConfig,
    #[serde(default)]
    pub checker: CheckerConfig,
    #[serde(default)]
    pub robots: RobotsConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
}

/// Cron triggers and batch fan-out settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SchedulerConfig {
    /// Cron expression (seconds first) for the feed-refresh cycle
    pub feed_refresh_cron: String,

    /// Cron expression (seconds first) for the article-recheck cycle
    pub article_recheck_cron: String,

    /// Number of feeds published by one batch task
    pub batch_size: usize,

    /// Pause between launching successive batches (milliseconds)
    pub batch_delay_ms: u64,

    /// Ceiling on concurrently running batches
    pub max_concurrent_batches: usize,

    /// How long `stop` waits for in-flight cycles (seconds)
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            feed_refresh_cron: "0 */30 * * * *".to_string(),
            article_recheck_cron: "0 15 * * * *".to_string(),
            batch_size: 50,
            batch_delay_ms: 1000,
            max_concurrent_batches: 4,
            shutdown_grace_secs: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Article recheck window settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RecheckConfig {
    /// Only articles published within this many hours are rechecked
    pub window_hours: i64,

    /// Articles checked less than this many minutes ago are skipped
    pub min_gap_minutes: i64,

    /// Candidates requested per page (0 selects the default)
    pub page_size: usize,
}

impl Default for RecheckConfig {
    fn default() -> Self {
        Self {
            window_hours: 72,
            min_gap_minutes: 360,
            page_size: 100,
        }
    }
}

impl RecheckConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.window_hours)
    }

    pub fn min_gap(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.min_gap_minutes)
    }
}

/// HTTP behaviour of the update checker
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CheckerConfig {
    /// User-Agent header sent with every request
    pub user_agent: String,

    /// Tries per HTTP call (HEAD and GET are counted separately)
    pub max_attempts: u32,

    /// First retry delay (milliseconds)
    pub backoff_initial_ms: u64,

    /// Upper bound on the retry delay (milliseconds)
    pub backoff_max_ms: u64,

    /// Whether retry delays are randomized
    pub jitter: bool,

    /// Largest article body accepted
    pub max_content_bytes: usize,

    /// Per-request timeout (seconds)
    pub timeout_secs: u64,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("feed-refresher/{}", env!("CARGO_PKG_VERSION")),
            max_attempts: 3,
            backoff_initial_ms: 500,
            backoff_max_ms: 10_000,
            jitter: true,
            max_content_bytes: 2 * 1024 * 1024,
            timeout_secs: 20,
        }
    }
}

impl CheckerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Robots.txt compliance settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RobotsConfig {
    /// Whether robots.txt is consulted at all
    pub enabled: bool,

    /// Lifetime of a cached robots.txt (hours)
    pub cache_ttl_hours: u64,

    /// Largest robots.txt body accepted
    pub max_bytes: usize,

    /// Agent token matched against `User-agent` groups
    pub agent: Option<String>,
}

impl Default for RobotsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_ttl_hours: 12,
            max_bytes: 500 * 1024,
            agent: None,
        }
    }
}

impl RobotsConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_hours * 3600)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    /// Path to the SQLite database file
    pub database_path: String,
}

/// In-process message consumer settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ConsumerConfig {
    /// Parallel consumers per channel
    pub workers: usize,

    /// Bounded queue length per channel
    pub queue_capacity: usize,

    /// Deliveries of one event before it is dropped
    pub max_deliveries: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            max_deliveries: 3,
        }
    }
}
