//! Feed-Refresher: keeps aggregated feed articles fresh
//!
//! This crate schedules periodic feed refreshes and article rechecks, consults
//! robots.txt before touching a site, and re-fetches articles with conditional
//! HTTP requests so unchanged content is never downloaded twice.

pub mod bus;
pub mod checker;
pub mod config;
pub mod http;
pub mod model;
pub mod refresh;
pub mod robots;
pub mod scheduler;
pub mod shutdown;
pub mod storage;

use thiserror::Error;

/// Main error type for Feed-Refresher operations
#[derive(Debug, Error)]
pub enum RefresherError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Article check failed: {0}")]
    Check(#[from] checker::CheckError),

    #[error("Feed refresh failed: {0}")]
    Refresh(#[from] refresh::RefreshError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] scheduler::SchedulerError),

    #[error("Publish error: {0}")]
    Publish(#[from] bus::PublishError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid cron expression '{expression}': {message}")]
    InvalidCron { expression: String, message: String },
}

/// Result type alias for Feed-Refresher operations
pub type Result<T> = std::result::Result<T, RefresherError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use model::{Article, ArticleCheckEvent, CheckReason, Feed, FeedStatus};
pub use shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
