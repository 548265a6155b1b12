//! Error taxonomy for the ingestion pipeline.
//!
//! Each stage has its own error type so the orchestrator can decide, per
//! failure, whether to retry, skip the item, or abort the run:
//!
//! | Error | Variant | Handling |
//! |-------|---------|----------|
//! | [`FetchError`] | `Transient` | retried with backoff, then the page fails |
//! | [`FetchError`] | `Permanent` | page fails immediately |
//! | [`ParseError`] | `SchemaDrift` | page fails, run continues |
//! | [`SinkError`] | `Auth` | run aborts |
//! | [`SinkError`] | `RateLimit` / `Unavailable` | retried with backoff, then the item fails |
//! | [`SinkError`] | `Schema` | item fails, run continues |

use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

use crate::retry::Retryable;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient failure fetching {url}: {reason}")]
    Transient { url: String, reason: String },

    #[error("permanent failure fetching {url}: {reason}")]
    Permanent { url: String, reason: String },
}

impl FetchError {
    pub fn transient(url: impl Into<String>, reason: impl Into<String>) -> Self {
        FetchError::Transient {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn permanent(url: impl Into<String>, reason: impl Into<String>) -> Self {
        FetchError::Permanent {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    /// Classify a non-success HTTP status.
    ///
    /// Timeouts, rate limiting, server errors and anti-bot challenges are
    /// worth another attempt; every other 4xx is not.
    pub fn from_status(url: &str, status: StatusCode, challenged: bool) -> Self {
        let reason = format!("HTTP {status}");
        if challenged {
            FetchError::transient(url, format!("{reason} (anti-bot challenge)"))
        } else if status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
        {
            FetchError::transient(url, reason)
        } else {
            FetchError::permanent(url, reason)
        }
    }

    pub fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
        if err.is_builder() || err.is_redirect() {
            FetchError::permanent(url, err.to_string())
        } else {
            FetchError::transient(url, err.to_string())
        }
    }
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("listing structure no longer matches selector `{selector}`")]
    SchemaDrift { selector: String },

    #[error("invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink rejected credentials: {0}")]
    Auth(String),

    #[error("sink rate limit exceeded")]
    RateLimit { retry_after: Option<Duration> },

    #[error("sink schema mismatch: {0}")]
    Schema(String),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

impl SinkError {
    /// Credential problems end the run; nothing else does.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SinkError::Auth(_))
    }

    pub fn from_status(status: StatusCode, body: &str, retry_after: Option<Duration>) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                SinkError::Auth(format!("HTTP {status}: {body}"))
            }
            StatusCode::TOO_MANY_REQUESTS => SinkError::RateLimit { retry_after },
            s if s.is_server_error() => SinkError::Unavailable(format!("HTTP {status}")),
            _ => SinkError::Schema(format!("HTTP {status}: {body}")),
        }
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_decode() {
            SinkError::Schema(format!("unexpected response body: {err}"))
        } else {
            SinkError::Unavailable(err.to_string())
        }
    }
}

impl Retryable for SinkError {
    fn is_retryable(&self) -> bool {
        matches!(self, SinkError::RateLimit { .. } | SinkError::Unavailable(_))
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            SinkError::RateLimit { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config file {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
