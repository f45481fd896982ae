//! Feed refresher
//!
//! Handles feed-refresh events: downloads the feed, backfills its metadata
//! and stores entries not seen before. Existing articles are never touched
//! here; keeping them fresh is the update checker's job.

use crate::bus::FeedRefreshHandler;
use crate::checker::{
    derive_description, is_permanent, is_retryable, retry, sanitize_html, strip_markup, Attempt,
    RetryError, RetryPolicy, DEFAULT_MAX_CONTENT_BYTES,
};
use crate::config::Config;
use crate::http::{discard_body, read_body_capped, BodyError};
use crate::model::{FeedId, FeedRefreshEvent, NewArticle};
use crate::robots::RobotsPolicy;
use crate::shutdown::ShutdownSignal;
use crate::storage::{FeedStore, StorageError};
use async_trait::async_trait;
use chrono::Utc;
use feed_rs::parser;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Errors while refreshing a feed
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("invalid feed URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("failed to fetch {url}: {source}")]
    Request { url: String, source: reqwest::Error },

    #[error("{url} returned {status}")]
    Status { url: String, status: u16 },

    #[error("{url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },

    #[error("failed to parse feed {url}: {message}")]
    Parse { url: String, message: String },

    #[error("refresh cancelled")]
    Cancelled,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// What one refresh did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Entries present in the feed
    pub entries: usize,
    /// Entries stored as new articles
    pub inserted: usize,
    /// robots.txt forbade fetching the feed
    pub disallowed: bool,
}

/// Downloads feeds and stores their new entries
pub struct FeedRefresher {
    client: Client,
    store: Arc<dyn FeedStore>,
    robots: Option<Arc<RobotsPolicy>>,
    robots_agent: String,
    policy: RetryPolicy,
    max_bytes: usize,
    shutdown: ShutdownSignal,
}

impl FeedRefresher {
    /// Creates a refresher without crawl policy enforcement
    ///
    /// # Arguments
    ///
    /// * `client` - HTTP client used to download feeds
    /// * `store` - Feed store receiving metadata, status and articles
    /// * `policy` - Retry policy applied to each feed download
    pub fn new(client: Client, store: Arc<dyn FeedStore>, policy: RetryPolicy) -> Self {
        Self {
            client,
            store,
            robots: None,
            robots_agent: String::from("*"),
            policy,
            max_bytes: DEFAULT_MAX_CONTENT_BYTES,
            shutdown: ShutdownSignal::never(),
        }
    }

    /// Creates a refresher from the `[checker]` and `[robots]` sections
    pub fn from_config(
        client: Client,
        store: Arc<dyn FeedStore>,
        robots: Option<Arc<RobotsPolicy>>,
        config: &Config,
    ) -> Self {
        let mut refresher = Self::new(client, store, RetryPolicy::from_config(&config.checker));
        refresher.max_bytes = config.checker.max_content_bytes;
        if let Some(robots) = robots.filter(|_| config.robots.enabled) {
            let agent = config
                .robots
                .agent
                .clone()
                .unwrap_or_else(|| config.checker.user_agent.clone());
            refresher = refresher.with_robots(robots, agent);
        }
        refresher
    }

    /// Enforces robots.txt for `agent` before each feed download
    pub fn with_robots(mut self, robots: Arc<RobotsPolicy>, agent: impl Into<String>) -> Self {
        self.robots = Some(robots);
        self.robots_agent = agent.into();
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Refreshes one feed
    ///
    /// Fetch and parse failures flip the feed to `error` before being returned.
    ///
    /// # Arguments
    ///
    /// * `event` - Names the feed to refresh
    ///
    /// # Returns
    ///
    /// * `Ok(RefreshSummary)` - Entries seen and articles inserted
    /// * `Err(RefreshError)` - The feed could not be loaded, fetched or parsed
    pub async fn refresh(&self, event: &FeedRefreshEvent) -> Result<RefreshSummary, RefreshError> {
        let feed = self.store.get_feed(event.feed_id).await?;

        let url = match Url::parse(&feed.url) {
            Ok(url) => url,
            Err(source) => {
                let error = RefreshError::InvalidUrl {
                    url: feed.url.clone(),
                    source,
                };
                self.store
                    .mark_feed_error(feed.id, &error.to_string())
                    .await?;
                return Err(error);
            }
        };

        if let Some(robots) = &self.robots {
            let verdict = robots.is_allowed(url.as_str(), &self.robots_agent).await;
            if let Some(error) = &verdict.error {
                tracing::warn!(feed_id = feed.id, "robots.txt check failed open: {}", error);
            }
            if !verdict.allowed {
                tracing::info!(feed_id = feed.id, "feed disallowed by robots.txt: {}", url);
                return Ok(RefreshSummary {
                    disallowed: true,
                    ..RefreshSummary::default()
                });
            }
        }

        let parsed = match self.fetch_feed(&url).await {
            Ok(parsed) => parsed,
            Err(RefreshError::Cancelled) => return Err(RefreshError::Cancelled),
            Err(error) => {
                tracing::warn!(
                    feed_id = feed.id,
                    request_id = %event.request_id,
                    "feed refresh failed: {}",
                    error
                );
                self.store
                    .mark_feed_error(feed.id, &error.to_string())
                    .await?;
                return Err(error);
            }
        };

        let title = parsed.title.as_ref().map(|text| text.content.trim().to_string());
        let description = parsed
            .description
            .as_ref()
            .map(|text| strip_markup(&text.content));
        self.store
            .record_feed_success(feed.id, title.as_deref(), description.as_deref(), Utc::now())
            .await?;

        let mut summary = RefreshSummary {
            entries: parsed.entries.len(),
            ..RefreshSummary::default()
        };

        for entry in parsed.entries {
            let Some(article) = new_article(feed.id, &url, entry) else {
                continue;
            };
            if self.store.insert_article(&article).await? {
                summary.inserted += 1;
            }
        }

        tracing::info!(
            feed_id = feed.id,
            request_id = %event.request_id,
            "feed refreshed: {} entries, {} new",
            summary.entries,
            summary.inserted
        );

        Ok(summary)
    }

    async fn fetch_feed(&self, url: &Url) -> Result<feed_rs::model::Feed, RefreshError> {
        let response = retry(&self.policy, Some(&self.shutdown), |_| {
            let request = self.client.get(url.clone());
            async move {
                match request.send().await {
                    Ok(response) if is_retryable(response.status()) => {
                        let status = response.status();
                        discard_body(response).await;
                        Attempt::Retry(RefreshError::Status {
                            url: url.to_string(),
                            status: status.as_u16(),
                        })
                    }
                    Ok(response) => Attempt::Done(response),
                    Err(source) if is_permanent(&source) => {
                        Attempt::Fail(RefreshError::Request {
                            url: url.to_string(),
                            source,
                        })
                    }
                    Err(source) => Attempt::Retry(RefreshError::Request {
                        url: url.to_string(),
                        source,
                    }),
                }
            }
        })
        .await
        .map_err(|error| match error {
            RetryError::Exhausted { source, .. } | RetryError::Aborted(source) => source,
            RetryError::Cancelled => RefreshError::Cancelled,
        })?;

        if response.status() != StatusCode::OK {
            let status = response.status().as_u16();
            discard_body(response).await;
            return Err(RefreshError::Status {
                url: url.to_string(),
                status,
            });
        }

        let body = read_body_capped(response, self.max_bytes)
            .await
            .map_err(|error| match error {
                BodyError::TooLarge { limit } => RefreshError::TooLarge {
                    url: url.to_string(),
                    limit,
                },
                BodyError::Http(source) => RefreshError::Request {
                    url: url.to_string(),
                    source,
                },
            })?;

        parser::parse(body.as_slice()).map_err(|error| RefreshError::Parse {
            url: url.to_string(),
            message: error.to_string(),
        })
    }
}

/// Article for a feed entry, or `None` if the entry has no usable link
fn new_article(feed_id: FeedId, feed_url: &Url, entry: feed_rs::model::Entry) -> Option<NewArticle> {
    let href = entry.links.first()?.href.trim().to_string();
    let article_url = feed_url.join(&href).ok()?;

    let summary = entry.summary.map(|text| text.content);
    let body = entry
        .content
        .and_then(|content| content.body)
        .or_else(|| summary.clone())
        .unwrap_or_default();

    let content = if body.trim().is_empty() {
        String::new()
    } else {
        sanitize_html(&body, &article_url, None)
    };
    let description = match summary.as_deref().map(strip_markup) {
        Some(text) if !text.is_empty() => text,
        _ => derive_description(&content, &body),
    };

    Some(NewArticle {
        feed_id,
        url: article_url.to_string(),
        title: entry.title.map(|text| text.content.trim().to_string()),
        content,
        description,
        published_at: entry.published.or(entry.updated).unwrap_or_else(Utc::now),
    })
}

#[async_trait]
impl FeedRefreshHandler for FeedRefresher {
    async fn handle_feed_refresh(&self, event: &FeedRefreshEvent) -> crate::Result<()> {
        self.refresh(event).await?;
        Ok(())
    }
}
