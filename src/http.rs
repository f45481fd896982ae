//! Shared HTTP plumbing
//!
//! - Building the client with the configured user agent and timeout
//! - Reading response bodies under a byte ceiling
//! - Draining responses that are about to be discarded

use crate::config::CheckerConfig;
use reqwest::{redirect::Policy, Client, Response};
use std::time::Duration;
use thiserror::Error;

/// Bytes read from a discarded response before the connection is given up
const DRAIN_LIMIT: usize = 64 * 1024;

/// Errors while reading a response body
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("failed to read body: {0}")]
    Http(#[from] reqwest::Error),
}

/// Builds an HTTP client with proper configuration
///
/// # Example
///
/// ```no_run
/// use feed_refresher::config::CheckerConfig;
/// use feed_refresher::http::build_http_client;
///
/// let client = build_http_client(&CheckerConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &CheckerConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.timeout())
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Reads the whole body, failing once it grows past `limit` bytes
///
/// A declared `Content-Length` above the limit fails before any byte is read.
///
/// # Arguments
///
/// * `response` - Response whose body is consumed
/// * `limit` - Largest accepted body in bytes
///
/// # Returns
///
/// * `Ok(Vec<u8>)` - The complete body
/// * `Err(BodyError)` - The body was too large or the stream failed
pub async fn read_body_capped(mut response: Response, limit: usize) -> Result<Vec<u8>, BodyError> {
    if let Some(length) = response.content_length() {
        if length > limit as u64 {
            return Err(BodyError::TooLarge { limit });
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > limit {
            return Err(BodyError::TooLarge { limit });
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}

/// Drains and drops a response so its connection can be reused
///
/// Large bodies are abandoned after a few chunks; dropping the response then
/// closes the connection instead.
pub async fn discard_body(mut response: Response) {
    let mut drained = 0;
    while let Ok(Some(chunk)) = response.chunk().await {
        drained += chunk.len();
        if drained > DRAIN_LIMIT {
            break;
        }
    }
}

/// Header value as an owned, trimmed string
pub fn header_string(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
