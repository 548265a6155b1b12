//! Listing page fetcher.
//!
//! Builds the request for page `n` of the configured listing and returns its
//! HTML, unwrapping the Drupal AJAX envelope when the source uses one.
//! `Ok(None)` means the listing has no page `n`; errors are already
//! classified as transient or permanent by the transport.

pub mod drupal;
pub mod transport;

use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::{ListingFormat, SourceConfig};
use crate::error::FetchError;
use crate::utils::truncate_for_log;
use transport::{HttpTransport, PageRequest};

pub struct Fetcher<T> {
    transport: T,
    listing_url: Url,
    format: ListingFormat,
    page_param: String,
    params: Vec<(String, String)>,
}

impl<T> Fetcher<T>
where
    T: HttpTransport,
{
    pub fn new(transport: T, source: &SourceConfig) -> Result<Self, url::ParseError> {
        Ok(Self {
            transport,
            listing_url: Url::parse(&source.listing_url)?,
            format: source.format,
            page_param: source.page_param.clone(),
            params: source
                .params
                .iter()
                .filter(|(k, _)| **k != source.page_param)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }

    pub fn request_for(&self, page: u32) -> PageRequest {
        let mut query = self.params.clone();
        query.push((self.page_param.clone(), page.to_string()));
        PageRequest {
            url: self.listing_url.clone(),
            query,
        }
    }

    #[instrument(level = "info", skip(self))]
    pub async fn fetch_page(&self, page: u32) -> Result<Option<String>, FetchError> {
        let request = self.request_for(page);
        debug!(%request, "Fetching listing page");
        let body = self.transport.get(&request).await?;
        info!(bytes = body.len(), "Fetched listing page");

        match self.format {
            ListingFormat::Html => Ok(Some(body)),
            ListingFormat::DrupalAjax => match drupal::extract_insert_html(&body) {
                Ok(Some(html)) => Ok(Some(html)),
                Ok(None) => {
                    warn!("No 'insert' content block in AJAX response");
                    Ok(None)
                }
                Err(e) => Err(FetchError::permanent(
                    self.listing_url.as_str(),
                    format!(
                        "malformed AJAX payload ({e}): {}",
                        truncate_for_log(&body, 200)
                    ),
                )),
            },
        }
    }
}

#[cfg(test)]
impl Fetcher<crate::testing::ScriptedTransport> {
    pub fn transport_calls(&self) -> usize {
        self.transport.calls()
    }

    pub fn pages_requested(&self) -> Vec<String> {
        self.transport.pages_requested()
    }
}
