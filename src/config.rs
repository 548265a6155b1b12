//! Runtime configuration loaded from an optional YAML file.
//!
//! Every section has defaults targeting the INSEAD newsroom listing and its
//! Airtable table, so the binary runs with no config file at all. A file
//! only needs to list the keys it overrides:
//!
//! ```yaml
//! source:
//!   max_pages: 3
//!   page_delay_ms: 500
//! airtable:
//!   base_id: appXXXXXXXXXXXXXX
//!   table_id: tblXXXXXXXXXXXXXX
//! ```
//!
//! The Airtable API key is never read from here; it comes from the
//! environment (see [`crate::cli::Cli`]).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;
use url::Url;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub schema: SchemaConfig,
    pub fetch: FetchConfig,
    pub airtable: AirtableConfig,
}

/// How listing pages are served by the target site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingFormat {
    /// Drupal `views/ajax` endpoint returning a JSON command array.
    DrupalAjax,
    /// Plain HTML listing page.
    Html,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL used to resolve relative links and image sources.
    pub base_url: String,
    /// Endpoint requested for each listing page.
    pub listing_url: String,
    pub format: ListingFormat,
    /// Query parameter carrying the zero-based page number.
    pub page_param: String,
    /// Fixed query parameters sent with every listing request.
    pub params: BTreeMap<String, String>,
    /// Extra request headers (user agent, referer, ...).
    pub headers: BTreeMap<String, String>,
    pub max_pages: u32,
    /// Politeness delay between two listing pages.
    pub page_delay_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        let params = [
            ("_wrapper_format", "drupal_ajax"),
            ("view_name", "insead_stories"),
            ("view_display_id", "insead_stories"),
            ("view_args", ""),
            ("view_path", "/node/116796"),
            ("view_base_path", ""),
            (
                "view_dom_id",
                "564c33262573b6ee5ad8d0673ea91d3d6b9012a98daa9de483dd48f5bcd240c0",
            ),
            ("pager_element", "0"),
            ("_drupal_ajax", "1"),
            ("ajax_page_state[theme]", "insead_core"),
            ("ajax_page_state[theme_token]", ""),
        ];
        let headers = [
            (
                "User-Agent",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36",
            ),
            ("Accept", "application/json, text/javascript, */*; q=0.01"),
            ("X-Requested-With", "XMLHttpRequest"),
            (
                "Referer",
                "https://www.insead.edu/newsroom/news?sort_by=field_publishing_date&sort_order=DESC&search_api_fulltext=",
            ),
        ];

        Self {
            base_url: "https://www.insead.edu".to_string(),
            listing_url: "https://www.insead.edu/views/ajax".to_string(),
            format: ListingFormat::DrupalAjax,
            page_param: "page".to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            max_pages: 10,
            page_delay_ms: 2_000,
        }
    }
}

impl SourceConfig {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }
}

/// CSS selectors describing one article card on a listing page.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub card: String,
    pub link: String,
    /// Title element; the link text is used when unset or empty.
    pub title: Option<String>,
    pub date: String,
    pub image: String,
    pub summary: Option<String>,
    /// Marker of an intentionally empty listing.
    pub empty: Option<String>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            card: "div.story-card-object".to_string(),
            link: "h3.list-object__heading a.h3__link".to_string(),
            title: None,
            date: "time[datetime]".to_string(),
            image: "a.link--image-overlay img".to_string(),
            summary: Some(".list-object__description".to_string()),
            empty: Some(".view-empty".to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            retry: RetryConfig::default(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Airtable field ids the record fields are written to.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FieldMap {
    pub title: String,
    pub published_date: String,
    pub image_url: String,
    pub article_url: String,
    /// Summary is only written when the table has a column for it.
    pub summary: Option<String>,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            title: "fldEhhyuhrKxmpjl0".to_string(),
            published_date: "fldJZNPnajc0SHyh9".to_string(),
            image_url: "fldy48rpwvX54YoaU".to_string(),
            article_url: "fldUo3r63Cnh6exMR".to_string(),
            summary: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AirtableConfig {
    pub api_url: String,
    pub base_id: String,
    pub table_id: String,
    /// Column *name* of the article URL, used in lookup formulas.
    pub url_column: String,
    pub fields: FieldMap,
    /// Let Airtable coerce values (e.g. date strings) into column types.
    pub typecast: bool,
    pub timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for AirtableConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.airtable.com".to_string(),
            base_id: "appoz4aD0Hjolycwd".to_string(),
            table_id: "tblLnvZF5bb6oj9ef".to_string(),
            url_column: "articleURL".to_string(),
            fields: FieldMap::default(),
            typecast: true,
            timeout_secs: 20,
            retry: RetryConfig {
                max_attempts: 5,
                ..RetryConfig::default()
            },
        }
    }
}

impl AirtableConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load the config file at `path`, or the defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let shown = path.display().to_string();
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: shown.clone(),
                    source,
                })?;
                let config = Self::from_yaml(&raw).map_err(|source| ConfigError::Yaml {
                    path: shown.clone(),
                    source,
                })?;
                info!(path = %shown, "Loaded configuration");
                config
            }
            None => {
                info!("No config file given; using built-in defaults");
                Self::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        // An empty document deserializes to unit, not to the defaults.
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.max_pages == 0 {
            return Err(ConfigError::Invalid("source.max_pages must be at least 1".into()));
        }
        for (key, value) in [
            ("source.base_url", &self.source.base_url),
            ("source.listing_url", &self.source.listing_url),
            ("airtable.api_url", &self.airtable.api_url),
        ] {
            Url::parse(value)
                .map_err(|e| ConfigError::Invalid(format!("{key} `{value}` is not a URL: {e}")))?;
        }
        if self.fetch.retry.max_attempts == 0 || self.airtable.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.airtable.base_id.is_empty() || self.airtable.table_id.is_empty() {
            return Err(ConfigError::Invalid("airtable base_id and table_id are required".into()));
        }
        Ok(())
    }
}
