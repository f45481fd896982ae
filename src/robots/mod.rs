//! Robots.txt handling module
//!
//! This module provides functionality for fetching, parsing, and caching robots.txt files.
//! Every uncertainty (network failure, odd status, oversized file, unsupported
//! scheme) resolves to "allowed" with the error attached to the verdict, so a
//! broken robots.txt can delay politeness but never block fetching.

mod cache;
mod matcher;
mod parser;

pub use cache::{CachedRobots, RobotsCache};
pub use matcher::{best_match, match_length};
pub use parser::{parse_robots, RobotsRules, RuleSet};

use crate::config::RobotsConfig;
use crate::http::{read_body_capped, BodyError};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use url::Url;

/// Errors behind a fail-open verdict
#[derive(Debug, Error)]
pub enum RobotsError {
    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("failed to fetch {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("unexpected status {status} for {url}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("{url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },
}

/// Outcome of a robots.txt consultation
#[derive(Debug)]
pub struct Verdict {
    pub allowed: bool,
    /// Set when the verdict was reached by failing open
    pub error: Option<RobotsError>,
}

impl Verdict {
    fn decided(allowed: bool) -> Self {
        Self {
            allowed,
            error: None,
        }
    }

    fn fail_open(error: RobotsError) -> Self {
        Self {
            allowed: true,
            error: Some(error),
        }
    }
}

/// Crawl policy engine: fetches, caches and evaluates robots.txt per origin
#[derive(Debug)]
pub struct RobotsPolicy {
    client: Client,
    cache: RobotsCache,
    max_bytes: usize,
}

impl RobotsPolicy {
    /// Creates a policy engine from configuration
    pub fn new(client: Client, config: &RobotsConfig) -> Self {
        let ttl = chrono::Duration::from_std(config.cache_ttl())
            .unwrap_or_else(|_| chrono::Duration::hours(12));
        Self::with_limits(client, ttl, config.max_bytes)
    }

    /// Creates a policy engine with explicit cache and size limits
    ///
    /// # Arguments
    ///
    /// * `client` - Client used to download robots.txt files
    /// * `ttl` - How long a fetched (or missing) robots.txt stays cached
    /// * `max_bytes` - Largest robots.txt body accepted; bigger files fail open
    pub fn with_limits(client: Client, ttl: chrono::Duration, max_bytes: usize) -> Self {
        Self {
            client,
            cache: RobotsCache::new(ttl),
            max_bytes,
        }
    }

    /// Checks whether `user_agent` may fetch `url`
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute URL about to be fetched
    /// * `user_agent` - Agent token matched against `User-agent` groups
    pub async fn is_allowed(&self, url: &str, user_agent: &str) -> Verdict {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(source) => {
                return Verdict::fail_open(RobotsError::InvalidUrl {
                    url: url.to_string(),
                    source,
                })
            }
        };

        if !matches!(parsed.scheme(), "http" | "https") {
            return Verdict::decided(true);
        }

        let origin = parsed.origin().ascii_serialization();
        let path = request_path(&parsed);

        if let Some(rules) = self.cache.get(&origin).await {
            return Verdict::decided(rules.is_allowed(&path, user_agent));
        }

        match self.fetch(&origin).await {
            Ok(rules) => {
                let allowed = rules.is_allowed(&path, user_agent);
                self.cache.insert(&origin, rules).await;
                Verdict::decided(allowed)
            }
            Err(error) => {
                tracing::debug!("robots.txt unavailable for {}: {}", origin, error);
                Verdict::fail_open(error)
            }
        }
    }

    /// Fetches and parses `{origin}/robots.txt`
    ///
    /// A 404 yields allow-all rules; other non-200 statuses are errors and are
    /// not cached.
    async fn fetch(&self, origin: &str) -> Result<RobotsRules, RobotsError> {
        let robots_url = format!("{}/robots.txt", origin);

        let response = self
            .client
            .get(&robots_url)
            .send()
            .await
            .map_err(|source| RobotsError::Http {
                url: robots_url.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Ok(RobotsRules::allow_all()),
            status => {
                crate::http::discard_body(response).await;
                return Err(RobotsError::UnexpectedStatus {
                    url: robots_url,
                    status: status.as_u16(),
                });
            }
        }

        let body = read_body_capped(response, self.max_bytes)
            .await
            .map_err(|error| match error {
                BodyError::TooLarge { limit } => RobotsError::TooLarge {
                    url: robots_url.clone(),
                    limit,
                },
                BodyError::Http(source) => RobotsError::Http {
                    url: robots_url.clone(),
                    source,
                },
            })?;

        Ok(parse_robots(&String::from_utf8_lossy(&body)))
    }

    /// The per-origin cache (exposed for diagnostics)
    pub fn cache(&self) -> &RobotsCache {
        &self.cache
    }
}

/// Path plus query, the part of a URL robots rules are matched against
fn request_path(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}
