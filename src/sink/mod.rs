//! Idempotent writes into the external record store.
//!
//! [`RecordStore`] is the capability the pipeline needs from any tabular or
//! key-value store: list, lookup by key, insert, update. [`SinkWriter`]
//! builds `upsert` on top of it, keyed by canonical URL:
//!
//! - absent: insert
//! - present with different content: update
//! - present and identical: no-op
//!
//! Re-running over an unchanged listing therefore performs zero writes.

pub mod airtable;

use std::cell::Cell;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

use crate::error::SinkError;
use crate::models::{ArticleRecord, StoredRecord, UpsertOutcome};
use crate::normalize::canonical_url;
use crate::retry::{Backoff, with_backoff};

pub trait RecordStore {
    async fn list_all(&self) -> Result<Vec<StoredRecord>, SinkError>;

    async fn find_by_key(&self, key: &str) -> Result<Option<StoredRecord>, SinkError>;

    async fn insert(&self, record: &ArticleRecord) -> Result<StoredRecord, SinkError>;

    async fn update(&self, id: &str, record: &ArticleRecord) -> Result<(), SinkError>;

    /// Whether writing `fresh` over `stored` would change anything the
    /// store keeps. Stores that persist only some fields override this.
    fn content_changed(&self, stored: &ArticleRecord, fresh: &ArticleRecord) -> bool {
        stored.content_differs(fresh)
    }
}

pub struct SinkWriter<S> {
    store: S,
    backoff: Backoff,
    /// Existing records by canonical URL, once primed.
    index: Option<HashMap<String, StoredRecord>>,
}

impl<S> SinkWriter<S>
where
    S: RecordStore,
{
    pub fn new(store: S, backoff: Backoff) -> Self {
        Self {
            store,
            backoff,
            index: None,
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[cfg(test)]
    pub fn is_primed(&self) -> bool {
        self.index.is_some()
    }

    /// Load every stored record into a local index so lookups stay local.
    #[instrument(level = "info", skip_all)]
    pub async fn prime(&mut self) -> Result<usize, SinkError> {
        let store = &self.store;
        let stored = with_backoff(&self.backoff, "list_all", move || store.list_all()).await?;

        let index: HashMap<String, StoredRecord> = stored
            .into_iter()
            .filter(|s| !s.record.url.trim().is_empty())
            .map(|s| (canonical_url(&s.record.url), s))
            .collect();
        let count = index.len();
        self.index = Some(index);
        info!(count, "Loaded existing article URLs from the store");
        Ok(count)
    }

    /// Insert, update or leave alone, keyed by `record.url`.
    ///
    /// `record` must already be normalized.
    #[instrument(level = "debug", skip_all, fields(url = %record.url))]
    pub async fn upsert(&mut self, record: &ArticleRecord) -> Result<UpsertOutcome, SinkError> {
        let existing = self.lookup(&record.url).await?;
        let store = &self.store;

        match existing {
            None => {
                // A timed-out POST may still have created the row.
                let retrying = Cell::new(false);
                let retrying = &retrying;
                let stored = with_backoff(&self.backoff, "insert", move || async move {
                    if retrying.replace(true) {
                        if let Some(existing) = store.find_by_key(&record.url).await? {
                            debug!(id = %existing.id, "Earlier insert attempt was stored");
                            return Ok(existing);
                        }
                    }
                    store.insert(record).await
                })
                .await?;
                self.remember(stored);
                Ok(UpsertOutcome::Inserted)
            }
            Some(stored) if store.content_changed(&stored.record, record) => {
                let id = stored.id;
                let id_ref = id.as_str();
                with_backoff(&self.backoff, "update", move || store.update(id_ref, record)).await?;
                self.remember(StoredRecord {
                    id,
                    record: record.clone(),
                });
                Ok(UpsertOutcome::Updated)
            }
            Some(_) => {
                debug!("Stored record already up to date");
                Ok(UpsertOutcome::Unchanged)
            }
        }
    }

    async fn lookup(&self, key: &str) -> Result<Option<StoredRecord>, SinkError> {
        if let Some(index) = &self.index {
            return Ok(index.get(key).cloned());
        }
        let store = &self.store;
        with_backoff(&self.backoff, "lookup", move || store.find_by_key(key)).await
    }

    fn remember(&mut self, stored: StoredRecord) {
        if let Some(index) = &mut self.index {
            index.insert(canonical_url(&stored.record.url), stored);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;
    use std::time::Duration;

    fn record(url: &str, title: &str) -> ArticleRecord {
        ArticleRecord {
            url: url.to_string(),
            title: title.to_string(),
            published_date: "2025-05-06".to_string(),
            image_url: String::new(),
            summary: String::new(),
        }
    }

    fn writer(store: MemoryStore) -> SinkWriter<MemoryStore> {
        SinkWriter::new(store, Backoff::immediate(3))
    }

    #[tokio::test]
    async fn test_insert_then_unchanged() {
        let mut writer = writer(MemoryStore::new());
        let r = record("https://www.insead.edu/a", "A");

        assert_eq!(writer.upsert(&r).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(writer.upsert(&r).await.unwrap(), UpsertOutcome::Unchanged);
        assert_eq!(writer.store().writes(), 1);
    }

    #[tokio::test]
    async fn test_changed_content_updates_in_place() {
        let mut writer = writer(MemoryStore::with_records(vec![record("https://www.insead.edu/a", "Old")]));

        let outcome = writer.upsert(&record("https://www.insead.edu/a", "New")).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);

        let stored = writer.store().records();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, "rec0");
        assert_eq!(stored[0].record.title, "New");
    }

    #[tokio::test]
    async fn test_primed_index_avoids_remote_lookups() {
        let mut writer = writer(MemoryStore::with_records(vec![record(
            "https://www.insead.edu/a/",
            "A",
        )]));
        assert_eq!(writer.prime().await.unwrap(), 1);
        assert!(writer.is_primed());

        let outcome = writer.upsert(&record("https://www.insead.edu/a", "A")).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged);

        let b = record("https://www.insead.edu/b", "B");
        assert_eq!(writer.upsert(&b).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(writer.upsert(&b).await.unwrap(), UpsertOutcome::Unchanged);
        assert_eq!(writer.store().lookups(), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let store = MemoryStore::new();
        store.fail_writes(vec![
            SinkError::RateLimit {
                retry_after: Some(Duration::ZERO),
            },
            SinkError::RateLimit { retry_after: None },
        ]);
        let mut writer = writer(store);

        let outcome = writer.upsert(&record("https://www.insead.edu/a", "A")).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);
        assert_eq!(writer.store().inserts(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_exhaustion_fails_item() {
        let store = MemoryStore::new();
        store.fail_writes((0..3).map(|_| SinkError::RateLimit { retry_after: None }).collect());
        let mut writer = writer(store);

        let err = writer.upsert(&record("https://www.insead.edu/a", "A")).await.unwrap_err();
        assert!(matches!(err, SinkError::RateLimit { .. }));
        assert_eq!(writer.store().inserts(), 0);
    }

    #[tokio::test]
    async fn test_lost_insert_ack_does_not_duplicate_row() {
        let store = MemoryStore::new();
        store.fail_after_write(vec![SinkError::Unavailable("operation timed out".into())]);
        let mut writer = writer(store);
        writer.prime().await.unwrap();

        let r = record("https://www.insead.edu/a", "A");
        assert_eq!(writer.upsert(&r).await.unwrap(), UpsertOutcome::Inserted);
        assert_eq!(writer.upsert(&r).await.unwrap(), UpsertOutcome::Unchanged);

        let rows = writer.store().records();
        assert_eq!(rows.iter().filter(|s| s.record.url == r.url).count(), 1);
        assert_eq!(writer.store().lookups(), 1);
    }

    #[tokio::test]
    async fn test_auth_and_schema_are_not_retried() {
        let store = MemoryStore::new();
        store.fail_writes(vec![SinkError::Schema("INVALID_VALUE_FOR_COLUMN".into())]);
        store.fail_reads(vec![SinkError::Auth("HTTP 401".into())]);
        let mut writer = writer(store);

        let err = writer.upsert(&record("https://www.insead.edu/a", "A")).await.unwrap_err();
        assert!(err.is_fatal());

        let err = writer.upsert(&record("https://www.insead.edu/a", "A")).await.unwrap_err();
        assert!(matches!(err, SinkError::Schema(_)));

        assert_eq!(
            writer.upsert(&record("https://www.insead.edu/a", "A")).await.unwrap(),
            UpsertOutcome::Inserted
        );
    }

    #[tokio::test]
    async fn test_prime_failure_leaves_writer_unprimed() {
        let store = MemoryStore::new();
        store.fail_reads(vec![SinkError::Schema("bad table".into())]);
        let mut writer = writer(store);

        assert!(writer.prime().await.is_err());
        assert!(!writer.is_primed());
    }
}
