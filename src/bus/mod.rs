//! Event bus boundary
//!
//! The scheduler only publishes; handlers only consume. Delivery is
//! at-least-once: a handler error makes the consumer redeliver the event with
//! its attempt counter bumped, so handlers must tolerate duplicates.

mod memory;

pub use memory::{spawn_consumers, ConsumerGroup, ConsumerSettings, MemoryBus};

use crate::model::{ArticleCheckEvent, FeedRefreshEvent};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by `EventPublisher`
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("{channel} channel is closed")]
    Closed { channel: &'static str },

    #[error("{channel} channel stayed full for {waited:?}")]
    Timeout {
        channel: &'static str,
        waited: Duration,
    },
}

/// Publishes work items onto the bus
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_feed_refresh(&self, event: FeedRefreshEvent) -> Result<(), PublishError>;

    async fn publish_article_check(&self, event: ArticleCheckEvent) -> Result<(), PublishError>;
}

/// Consumes one article-check event per call
#[async_trait]
pub trait ArticleCheckHandler: Send + Sync {
    async fn handle_article_check(&self, event: &ArticleCheckEvent) -> crate::Result<()>;
}

/// Consumes one feed-refresh event per call
#[async_trait]
pub trait FeedRefreshHandler: Send + Sync {
    async fn handle_feed_refresh(&self, event: &FeedRefreshEvent) -> crate::Result<()>;
}
