//! Update checker
//!
//! Rechecks one stored article per `ArticleCheckEvent`:
//! - Consults the crawl policy and skips disallowed URLs
//! - Sends a conditional HEAD, then a conditional GET when the HEAD cannot
//!   rule out a change
//! - Sanitizes a changed body and persists it with a compare-and-swap on the
//!   validators the event was scheduled with
//!
//! Every outcome except a hard failure advances `last_checked_at`.

mod retry;
mod sanitize;
mod validators;

pub use retry::{retry, Attempt, RetryError, RetryPolicy};
pub use sanitize::{derive_description, sanitize_html, strip_markup};
pub use validators::{normalize_last_modified, to_http_date, Validators};

use crate::bus::ArticleCheckHandler;
use crate::config::Config;
use crate::http::{discard_body, header_string, read_body_capped, BodyError};
use crate::model::{ArticleCheckEvent, ArticleId};
use crate::robots::RobotsPolicy;
use crate::shutdown::ShutdownSignal;
use crate::storage::{ArticleStore, ArticleUpdate, StorageError};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, CONTENT_TYPE, ETAG, LAST_MODIFIED};
use reqwest::{Client, Method, Response, StatusCode};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Result of one article check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Server reported no change (or a non-retryable status)
    Unchanged,

    /// New content was stored
    Updated,

    /// The article changed underneath us; only `last_checked_at` moved
    Skipped,

    /// robots.txt forbids the URL; only `last_checked_at` moved
    Disallowed,
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unchanged => "unchanged",
            Self::Updated => "updated",
            Self::Skipped => "skipped",
            Self::Disallowed => "disallowed",
        };
        f.write_str(name)
    }
}

/// Hard failures of a check
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("article {0} has no URL")]
    MissingUrl(ArticleId),

    #[error("invalid article URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("{method} {url} failed after {attempts} attempts: {source}")]
    Request {
        method: Method,
        url: String,
        attempts: u32,
        source: reqwest::Error,
    },

    #[error("{method} {url} still returned {status} after {attempts} attempts")]
    RetriesExhausted {
        method: Method,
        url: String,
        attempts: u32,
        status: u16,
    },

    #[error("{url} exceeds {limit} bytes")]
    ContentTooLarge { url: String, limit: usize },

    #[error("failed to read body of {url}: {source}")]
    Body { url: String, source: reqwest::Error },

    #[error("check cancelled")]
    Cancelled,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Why one HTTP attempt did not produce a usable response
#[derive(Debug)]
enum CallError {
    Network(reqwest::Error),
    Status(StatusCode),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(error) => write!(f, "{}", error),
            Self::Status(status) => write!(f, "status {}", status),
        }
    }
}

/// Statuses worth retrying: 408, 429 and every 5xx
pub fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// Transport errors that retrying cannot fix
pub fn is_permanent(error: &reqwest::Error) -> bool {
    error.is_builder() || error.is_redirect()
}

/// HEAD statuses meaning "HEAD unsupported, use GET instead"
const HEAD_FALLBACK: &[StatusCode] = &[
    StatusCode::METHOD_NOT_ALLOWED,
    StatusCode::NOT_IMPLEMENTED,
];

/// Default article body ceiling
pub const DEFAULT_MAX_CONTENT_BYTES: usize = 2 * 1024 * 1024;

/// Conditional-request article checker
pub struct UpdateChecker {
    client: Client,
    store: Arc<dyn ArticleStore>,
    robots: Option<Arc<RobotsPolicy>>,
    robots_agent: String,
    policy: RetryPolicy,
    max_content_bytes: usize,
    shutdown: ShutdownSignal,
}

impl UpdateChecker {
    /// Creates a checker without crawl policy enforcement
    ///
    /// # Arguments
    ///
    /// * `client` - HTTP client used for HEAD and GET requests
    /// * `store` - Article store read for validators and written on change
    /// * `policy` - Retry policy applied to each request
    pub fn new(client: Client, store: Arc<dyn ArticleStore>, policy: RetryPolicy) -> Self {
        Self {
            client,
            store,
            robots: None,
            robots_agent: String::from("*"),
            policy,
            max_content_bytes: DEFAULT_MAX_CONTENT_BYTES,
            shutdown: ShutdownSignal::never(),
        }
    }

    /// Creates a checker from the `[checker]` and `[robots]` sections
    ///
    /// `robots` is ignored when robots compliance is disabled.
    pub fn from_config(
        client: Client,
        store: Arc<dyn ArticleStore>,
        robots: Option<Arc<RobotsPolicy>>,
        config: &Config,
    ) -> Self {
        let agent = config
            .robots
            .agent
            .clone()
            .unwrap_or_else(|| config.checker.user_agent.clone());

        let checker = Self::new(client, store, RetryPolicy::from_config(&config.checker))
            .with_max_content_bytes(config.checker.max_content_bytes);

        match robots {
            Some(robots) if config.robots.enabled => checker.with_robots(robots, agent),
            _ => checker,
        }
    }

    /// Enforces robots.txt for `agent`
    pub fn with_robots(mut self, robots: Arc<RobotsPolicy>, agent: impl Into<String>) -> Self {
        self.robots = Some(robots);
        self.robots_agent = agent.into();
        self
    }

    /// Caps the article body size; larger pages fail with `ContentTooLarge`
    pub fn with_max_content_bytes(mut self, limit: usize) -> Self {
        self.max_content_bytes = limit;
        self
    }

    /// Lets retry backoff observe `shutdown`
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Checks one article and records the result
    ///
    /// # Arguments
    ///
    /// * `event` - The article to check with the validators it was queued with
    ///
    /// # Returns
    ///
    /// * `Ok(CheckOutcome)` - The article was unchanged, updated, skipped by
    ///   robots.txt or lost a concurrent update
    /// * `Err(CheckError)` - The URL was unusable, requests failed after
    ///   retries, or the store rejected the write
    pub async fn check(&self, event: &ArticleCheckEvent) -> Result<CheckOutcome, CheckError> {
        if event.url.trim().is_empty() {
            return Err(CheckError::MissingUrl(event.article_id));
        }
        let url = Url::parse(event.url.trim()).map_err(|source| CheckError::InvalidUrl {
            url: event.url.clone(),
            source,
        })?;

        if let Some(robots) = &self.robots {
            let verdict = robots.is_allowed(url.as_str(), &self.robots_agent).await;
            if let Some(error) = &verdict.error {
                tracing::warn!(
                    article_id = event.article_id,
                    request_id = %event.request_id,
                    "robots.txt check failed open: {}",
                    error
                );
            }
            if !verdict.allowed {
                tracing::info!(
                    article_id = event.article_id,
                    feed_id = event.feed_id,
                    request_id = %event.request_id,
                    "disallowed by robots.txt: {}",
                    url
                );
                self.mark_checked(event).await?;
                return Ok(CheckOutcome::Disallowed);
            }
        }

        let previous = Validators::new(event.prev_etag.clone(), event.prev_last_modified.clone());
        let conditional = previous.conditional_headers();

        let head = self
            .send(Method::HEAD, &url, &conditional, HEAD_FALLBACK, event)
            .await?;
        let head_validators = match head.status() {
            StatusCode::NOT_MODIFIED => {
                return self.unchanged(event, "HEAD", StatusCode::NOT_MODIFIED).await;
            }
            StatusCode::OK => validators_of(&head),
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED => {
                tracing::debug!(
                    article_id = event.article_id,
                    "HEAD unsupported ({}), falling back to GET",
                    head.status()
                );
                Validators::default()
            }
            status => return self.unchanged(event, "HEAD", status).await,
        };

        let response = self
            .send(Method::GET, &url, &conditional, &[], event)
            .await?;
        match response.status() {
            StatusCode::OK => {}
            status => {
                discard_body(response).await;
                return self.unchanged(event, "GET", status).await;
            }
        }

        let content_type = header_string(&response, CONTENT_TYPE);
        let fresh = validators_of(&response).or(&head_validators);
        let body = read_body_capped(response, self.max_content_bytes)
            .await
            .map_err(|error| match error {
                BodyError::TooLarge { limit } => CheckError::ContentTooLarge {
                    url: url.to_string(),
                    limit,
                },
                BodyError::Http(source) => CheckError::Body {
                    url: url.to_string(),
                    source,
                },
            })?;
        let raw = String::from_utf8_lossy(&body);

        let content = sanitize_html(&raw, &url, content_type.as_deref());
        let description = derive_description(&content, &raw);

        let update = ArticleUpdate {
            article_id: event.article_id,
            content,
            description,
            etag: fresh.etag,
            last_modified: fresh.last_modified,
            checked_at: Utc::now(),
            expected_etag: event.prev_etag.clone(),
            expected_last_modified: event.prev_last_modified.clone(),
        };

        if self.store.update_article_on_change(&update).await? {
            tracing::info!(
                article_id = event.article_id,
                feed_id = event.feed_id,
                request_id = %event.request_id,
                "article content updated"
            );
            Ok(CheckOutcome::Updated)
        } else {
            tracing::info!(
                article_id = event.article_id,
                feed_id = event.feed_id,
                request_id = %event.request_id,
                "article changed concurrently, skipping update"
            );
            self.mark_checked(event).await?;
            Ok(CheckOutcome::Skipped)
        }
    }

    /// Sends one request under the retry policy
    ///
    /// Statuses listed in `accept` are returned to the caller even when they
    /// would otherwise be retried. Transport errors that cannot heal on their
    /// own (bad request construction, redirect loops) fail on the first try.
    async fn send(
        &self,
        method: Method,
        url: &Url,
        headers: &HeaderMap,
        accept: &[StatusCode],
        event: &ArticleCheckEvent,
    ) -> Result<Response, CheckError> {
        let result = retry(&self.policy, Some(&self.shutdown), |attempt| {
            let request = self
                .client
                .request(method.clone(), url.clone())
                .headers(headers.clone());
            let method = &method;
            async move {
                match request.send().await {
                    Ok(response) if accept.contains(&response.status()) => {
                        Attempt::Done(response)
                    }
                    Ok(response) if is_retryable(response.status()) => {
                        let status = response.status();
                        tracing::debug!(
                            article_id = event.article_id,
                            request_id = %event.request_id,
                            "{} attempt {} returned {}",
                            method,
                            attempt,
                            status
                        );
                        discard_body(response).await;
                        Attempt::Retry(CallError::Status(status))
                    }
                    Ok(response) => Attempt::Done(response),
                    Err(error) => {
                        tracing::debug!(
                            article_id = event.article_id,
                            request_id = %event.request_id,
                            "{} attempt {} failed: {}",
                            method,
                            attempt,
                            error
                        );
                        if is_permanent(&error) {
                            Attempt::Fail(CallError::Network(error))
                        } else {
                            Attempt::Retry(CallError::Network(error))
                        }
                    }
                }
            }
        })
        .await;

        result.map_err(|error| {
            let (attempts, source) = match error {
                RetryError::Cancelled => return CheckError::Cancelled,
                RetryError::Exhausted { attempts, source } => (attempts, source),
                RetryError::Aborted(source) => (1, source),
            };
            match source {
                CallError::Network(source) => CheckError::Request {
                    method: method.clone(),
                    url: url.to_string(),
                    attempts,
                    source,
                },
                CallError::Status(status) => CheckError::RetriesExhausted {
                    method: method.clone(),
                    url: url.to_string(),
                    attempts,
                    status: status.as_u16(),
                },
            }
        })
    }

    async fn unchanged(
        &self,
        event: &ArticleCheckEvent,
        stage: &str,
        status: StatusCode,
    ) -> Result<CheckOutcome, CheckError> {
        tracing::debug!(
            article_id = event.article_id,
            feed_id = event.feed_id,
            request_id = %event.request_id,
            "{} returned {}, treating as unchanged",
            stage,
            status
        );
        self.mark_checked(event).await?;
        Ok(CheckOutcome::Unchanged)
    }

    async fn mark_checked(&self, event: &ArticleCheckEvent) -> Result<(), CheckError> {
        self.store
            .mark_last_checked(event.article_id, Utc::now())
            .await?;
        Ok(())
    }
}

fn validators_of(response: &Response) -> Validators {
    Validators::from_headers(
        header_string(response, ETAG),
        header_string(response, LAST_MODIFIED),
    )
}

#[async_trait]
impl ArticleCheckHandler for UpdateChecker {
    async fn handle_article_check(&self, event: &ArticleCheckEvent) -> crate::Result<()> {
        match self.check(event).await {
            Ok(outcome) => {
                tracing::debug!(
                    article_id = event.article_id,
                    request_id = %event.request_id,
                    "check finished: {}",
                    outcome
                );
                Ok(())
            }
            Err(error) => {
                tracing::warn!(
                    article_id = event.article_id,
                    feed_id = event.feed_id,
                    request_id = %event.request_id,
                    attempt = event.attempt,
                    "check failed: {}",
                    error
                );
                Err(error.into())
            }
        }
    }
}
