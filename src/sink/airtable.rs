//! Airtable implementation of [`RecordStore`].
//!
//! Records are written and read by field id (`returnFieldsByFieldId`), so
//! renaming a column in the Airtable UI does not break the pipeline. Lookups
//! by key use a `filterByFormula` on the URL column, which Airtable only
//! accepts by column name.
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | list | `GET /v0/{base}/{table}?pageSize=100&offset=..` |
//! | lookup | `GET /v0/{base}/{table}?filterByFormula=..&maxRecords=1` |
//! | insert | `POST /v0/{base}/{table}` |
//! | update | `PATCH /v0/{base}/{table}/{record_id}` |

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::error::Error;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};

use super::RecordStore;
use crate::config::{AirtableConfig, FieldMap};
use crate::error::SinkError;
use crate::models::{ArticleRecord, StoredRecord};
use crate::utils::truncate_for_log;

const PAGE_SIZE: &str = "100";

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    records: Vec<AirtableRecord>,
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AirtableRecord {
    id: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

pub struct AirtableStore {
    client: Client,
    table_url: String,
    url_column: String,
    fields: FieldMap,
    typecast: bool,
}

impl fmt::Debug for AirtableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AirtableStore")
            .field("table_url", &self.table_url)
            .field("url_column", &self.url_column)
            .finish_non_exhaustive()
    }
}

impl AirtableStore {
    pub fn new(config: &AirtableConfig, api_key: &str) -> Result<Self, Box<dyn Error>> {
        let mut auth = HeaderValue::try_from(format!("Bearer {api_key}"))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()?;

        Ok(Self::with_client(config, client))
    }

    fn with_client(config: &AirtableConfig, client: Client) -> Self {
        Self {
            client,
            table_url: table_url(config),
            url_column: config.url_column.clone(),
            fields: config.fields.clone(),
            typecast: config.typecast,
        }
    }

    /// Field-id keyed payload for a record.
    fn to_fields(&self, record: &ArticleRecord) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert(self.fields.title.clone(), json!(record.title));
        fields.insert(self.fields.image_url.clone(), json!(record.image_url));
        fields.insert(self.fields.article_url.clone(), json!(record.url));
        if !record.published_date.is_empty() {
            fields.insert(self.fields.published_date.clone(), json!(record.published_date));
        }
        if let Some(summary) = &self.fields.summary {
            fields.insert(summary.clone(), json!(record.summary));
        }
        fields
    }

    fn from_fields(&self, fields: &Map<String, Value>) -> ArticleRecord {
        let text = |id: &str| {
            fields
                .get(id)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        ArticleRecord {
            url: text(&self.fields.article_url),
            title: text(&self.fields.title),
            published_date: text(&self.fields.published_date),
            image_url: text(&self.fields.image_url),
            summary: self.fields.summary.as_deref().map(text).unwrap_or_default(),
        }
    }

    fn stored(&self, record: AirtableRecord) -> StoredRecord {
        StoredRecord {
            record: self.from_fields(&record.fields),
            id: record.id,
        }
    }

    fn lookup_formula(&self, key: &str) -> String {
        format!("{{{}}} = '{}'", self.url_column, escape_formula_string(key))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, SinkError> {
        let response = request.send().await.map_err(|e| SinkError::from_reqwest(&e))?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::from_status(status, &truncate_for_log(&body, 300), retry_after));
        }
        response.json::<T>().await.map_err(|e| SinkError::from_reqwest(&e))
    }
}

fn table_url(config: &AirtableConfig) -> String {
    format!(
        "{}/v0/{}/{}",
        config.api_url.trim_end_matches('/'),
        urlencoding::encode(&config.base_id),
        urlencoding::encode(&config.table_id)
    )
}

/// Quote a value for use inside a single-quoted Airtable formula string.
fn escape_formula_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

impl RecordStore for AirtableStore {
    #[instrument(level = "info", skip_all)]
    async fn list_all(&self) -> Result<Vec<StoredRecord>, SinkError> {
        let mut stored = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut query = vec![
                ("pageSize", PAGE_SIZE.to_string()),
                ("returnFieldsByFieldId", "true".to_string()),
            ];
            if let Some(o) = &offset {
                query.push(("offset", o.clone()));
            }
            let page: ListResponse = self.send(self.client.get(&self.table_url).query(&query)).await?;
            debug!(records = page.records.len(), "Listed Airtable page");
            stored.extend(page.records.into_iter().map(|r| self.stored(r)));

            match page.offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(stored)
    }

    #[instrument(level = "debug", skip(self))]
    async fn find_by_key(&self, key: &str) -> Result<Option<StoredRecord>, SinkError> {
        let query = [
            ("filterByFormula", self.lookup_formula(key)),
            ("maxRecords", "1".to_string()),
            ("returnFieldsByFieldId", "true".to_string()),
        ];
        let page: ListResponse = self.send(self.client.get(&self.table_url).query(&query)).await?;
        Ok(page.records.into_iter().next().map(|r| self.stored(r)))
    }

    #[instrument(level = "debug", skip_all, fields(url = %record.url))]
    async fn insert(&self, record: &ArticleRecord) -> Result<StoredRecord, SinkError> {
        let body = json!({ "fields": self.to_fields(record), "typecast": self.typecast });
        let created: AirtableRecord = self
            .send(
                self.client
                    .post(&self.table_url)
                    .query(&[("returnFieldsByFieldId", "true")])
                    .json(&body),
            )
            .await?;
        Ok(StoredRecord {
            id: created.id,
            record: record.clone(),
        })
    }

    #[instrument(level = "debug", skip(self, record), fields(url = %record.url))]
    async fn update(&self, id: &str, record: &ArticleRecord) -> Result<(), SinkError> {
        let body = json!({ "fields": self.to_fields(record), "typecast": self.typecast });
        let url = format!("{}/{}", self.table_url, urlencoding::encode(id));
        let _: AirtableRecord = self
            .send(
                self.client
                    .patch(url)
                    .query(&[("returnFieldsByFieldId", "true")])
                    .json(&body),
            )
            .await?;
        Ok(())
    }

    /// Compare only the columns a write would send. A PATCH leaves unsent
    /// columns untouched, so an empty fresh date never differs from a
    /// stored one.
    fn content_changed(&self, stored: &ArticleRecord, fresh: &ArticleRecord) -> bool {
        let stored = self.to_fields(stored);
        self.to_fields(fresh)
            .iter()
            .any(|(column, value)| stored.get(column) != Some(value))
    }
}
