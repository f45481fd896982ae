//! HTTP validator handling
//!
//! `Last-Modified` values are stored as RFC 3339 UTC and converted back to
//! IMF-fixdate when sent as `If-Modified-Since`. Values that do not parse are
//! kept and sent verbatim.

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH};

const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Validators of one version of a resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    pub etag: Option<String>,
    /// Normalized (RFC 3339) where possible
    pub last_modified: Option<String>,
}

impl Validators {
    pub fn new(etag: Option<String>, last_modified: Option<String>) -> Self {
        Self {
            etag,
            last_modified,
        }
    }

    /// Validators read from response headers
    pub fn from_headers(etag: Option<String>, last_modified: Option<String>) -> Self {
        Self {
            etag,
            last_modified: last_modified.as_deref().map(normalize_last_modified),
        }
    }

    /// Per-field fallback to `other`
    pub fn or(self, other: &Validators) -> Self {
        Self {
            etag: self.etag.or_else(|| other.etag.clone()),
            last_modified: self.last_modified.or_else(|| other.last_modified.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }

    /// `If-None-Match` / `If-Modified-Since` for a conditional request
    pub fn conditional_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = self
            .etag
            .as_deref()
            .and_then(|etag| HeaderValue::from_str(etag).ok())
        {
            headers.insert(IF_NONE_MATCH, value);
        }
        if let Some(value) = self
            .last_modified
            .as_deref()
            .map(to_http_date)
            .and_then(|date| HeaderValue::from_str(&date).ok())
        {
            headers.insert(IF_MODIFIED_SINCE, value);
        }
        headers
    }
}

/// Converts an HTTP date header into the stored RFC 3339 form
pub fn normalize_last_modified(value: &str) -> String {
    DateTime::parse_from_rfc2822(value.trim())
        .map(|date| {
            date.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Secs, true)
        })
        .unwrap_or_else(|_| value.trim().to_string())
}

/// Converts a stored value into an HTTP date for `If-Modified-Since`
pub fn to_http_date(stored: &str) -> String {
    DateTime::parse_from_rfc3339(stored)
        .map(|date| date.with_timezone(&Utc).format(IMF_FIXDATE).to_string())
        .unwrap_or_else(|_| stored.to_string())
}
