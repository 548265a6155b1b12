//! HTTP transports behind the fetcher.
//!
//! - [`HttpTransport`]: the capability the fetcher consumes
//! - [`ReqwestTransport`]: browser-like client with a cookie store, so
//!   challenge cookies set by anti-automation layers are replayed
//! - [`RetryTransport`]: decorator adding bounded exponential backoff to any
//!   transport, retrying only transient failures

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::error::FetchError;
use crate::retry::{Backoff, with_backoff};

/// One GET request for a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub url: Url,
    pub query: Vec<(String, String)>,
}

impl fmt::Display for PageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)?;
        if let Some((k, v)) = self.query.iter().find(|(k, _)| k == "page") {
            write!(f, " ({k}={v})")?;
        }
        Ok(())
    }
}

pub trait HttpTransport {
    /// Return the response body, or classify the failure.
    async fn get(&self, request: &PageRequest) -> Result<String, FetchError>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport").finish_non_exhaustive()
    }
}

impl ReqwestTransport {
    pub fn new(headers: &BTreeMap<String, String>, timeout: Duration) -> Result<Self, Box<dyn Error>> {
        let mut default_headers = HeaderMap::new();
        for (name, value) in headers {
            default_headers.insert(HeaderName::try_from(name.as_str())?, HeaderValue::try_from(value.as_str())?);
        }

        let client = Client::builder()
            .default_headers(default_headers)
            .cookie_store(true)
            .gzip(true)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    #[instrument(level = "debug", skip_all, fields(request = %request))]
    async fn get(&self, request: &PageRequest) -> Result<String, FetchError> {
        let t0 = Instant::now();
        let url = request.url.as_str();
        let response = self
            .client
            .get(request.url.clone())
            .query(&request.query)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, &e))?;

        let status = response.status();
        debug!(%status, elapsed_ms = t0.elapsed().as_millis() as u64, "Received response");
        if !status.is_success() {
            let challenged = response.headers().contains_key("cf-mitigated");
            return Err(FetchError::from_status(url, status, challenged));
        }

        response.text().await.map_err(|e| FetchError::from_reqwest(url, &e))
    }
}

/// Wraps a transport with exponential backoff on transient failures.
pub struct RetryTransport<T> {
    inner: T,
    backoff: Backoff,
}

impl<T> RetryTransport<T>
where
    T: HttpTransport,
{
    pub fn new(inner: T, backoff: Backoff) -> Self {
        Self { inner, backoff }
    }
}

impl<T> fmt::Debug for RetryTransport<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryTransport")
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl<T> HttpTransport for RetryTransport<T>
where
    T: HttpTransport,
{
    async fn get(&self, request: &PageRequest) -> Result<String, FetchError> {
        let inner = &self.inner;
        let result = with_backoff(&self.backoff, "fetch", move || inner.get(request)).await;
        if let Err(e) = &result {
            warn!(%request, error = %e, "Fetch failed");
        }
        result
    }
}
