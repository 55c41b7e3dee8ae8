//! Request model
//!
//! A [`Request`] describes one unit of crawl work: the URL to process plus
//! the retry/error bookkeeping that travels with it through the pipeline.
//! Requests are created by the caller (or restored from a queue), mutated in
//! place by handlers and hooks, and finally marked handled exactly once.

mod unique_key;

pub use unique_key::{extended_unique_key, normalized_unique_key};

use crate::CrawlError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// HTTP method of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Returns the method name as an uppercase string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Returns true if this method may carry a body payload
    ///
    /// GET-style requests must not carry a payload; this is enforced at
    /// request construction time.
    pub fn allows_payload(&self) -> bool {
        !matches!(self, Self::Get | Self::Head)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of crawl work
///
/// The `unique_key` is the de-duplication identity across all request
/// sources: two requests with the same key are the same unit of work, no
/// matter which source they came from. The retry/error fields are mutated
/// by the executor as attempts fail; handler code may freely mutate
/// `user_data`, `headers`, and `no_retry`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// The URL to process
    pub url: Url,

    /// De-duplication key; defaults to the normalized URL
    pub unique_key: String,

    /// HTTP method used when the request is fetched
    pub method: HttpMethod,

    /// Extra headers sent with the request
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Body payload; only valid for methods that allow one
    #[serde(default)]
    pub payload: Option<Vec<u8>>,

    /// Open-ended bag for user code and hooks
    #[serde(default)]
    pub user_data: serde_json::Map<String, serde_json::Value>,

    /// Number of times this request has been reclaimed after a failure
    #[serde(default)]
    pub retry_count: u32,

    /// One message per failed attempt, append-only
    #[serde(default)]
    pub error_messages: Vec<String>,

    /// Once set, the next failure is terminal regardless of the retry budget
    #[serde(default)]
    pub no_retry: bool,

    /// Set exactly once, when the request reaches a terminal state
    #[serde(default)]
    pub handled_at: Option<DateTime<Utc>>,

    /// URL the last attempt actually resolved to (after redirects);
    /// cleared at the start of every attempt so retries never see stale state
    #[serde(default)]
    pub loaded_url: Option<Url>,
}

impl Request {
    /// Creates a GET request for the given URL with the default unique key
    pub fn new(url: &str) -> Result<Self, CrawlError> {
        Self::with_method(url, HttpMethod::Get, None)
    }

    /// Creates a request with an explicit method and optional payload
    ///
    /// Fails if the URL does not parse or if a payload is supplied for a
    /// method that must not carry one.
    pub fn with_method(
        url: &str,
        method: HttpMethod,
        payload: Option<Vec<u8>>,
    ) -> Result<Self, CrawlError> {
        let parsed = Url::parse(url)?;

        if payload.is_some() && !method.allows_payload() {
            return Err(CrawlError::InvalidRequest {
                url: url.to_string(),
                message: format!("{} requests must not carry a payload", method),
            });
        }

        let unique_key = normalized_unique_key(&parsed);

        Ok(Self {
            url: parsed,
            unique_key,
            method,
            headers: HashMap::new(),
            payload,
            user_data: serde_json::Map::new(),
            retry_count: 0,
            error_messages: Vec::new(),
            no_retry: false,
            handled_at: None,
            loaded_url: None,
        })
    }

    /// Overrides the unique key
    pub fn with_unique_key(mut self, unique_key: impl Into<String>) -> Self {
        self.unique_key = unique_key.into();
        self
    }

    /// Switches to extended uniqueness: the key becomes a digest over
    /// method + normalized URL + payload
    pub fn with_extended_uniqueness(mut self) -> Self {
        self.unique_key = extended_unique_key(self.method, &self.url, self.payload.as_deref());
        self
    }

    /// Marks the request as never-retry
    pub fn with_no_retry(mut self) -> Self {
        self.no_retry = true;
        self
    }

    /// Appends one failure message to the error log
    pub fn push_error_message(&mut self, message: impl Into<String>) {
        self.error_messages.push(message.into());
    }

    /// Records the terminal timestamp; later calls are no-ops
    pub fn mark_handled_now(&mut self) {
        if self.handled_at.is_none() {
            self.handled_at = Some(Utc::now());
        }
    }

    /// Clears per-attempt state carried over from a previous attempt
    pub fn reset_attempt_state(&mut self) {
        self.loaded_url = None;
    }

    /// Returns true if a failure now should lead to another attempt
    pub fn can_retry(&self, max_retries: u32) -> bool {
        !self.no_retry && self.retry_count < max_retries
    }
}
