//! In-process stand-ins for the two external services, used by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{FetchError, SinkError};
use crate::fetch::transport::{HttpTransport, PageRequest};
use crate::models::{ArticleRecord, StoredRecord};
use crate::sink::RecordStore;

/// Replays canned responses in order. Once the script runs out it answers
/// with an empty AJAX command list, i.e. "no more pages".
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<String, FetchError>>>,
    requests: Mutex<Vec<PageRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<String, FetchError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Page numbers requested so far, in order.
    pub fn pages_requested(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.query.iter().find(|(k, _)| k == "page").map(|(_, v)| v.clone()))
            .collect()
    }
}

impl HttpTransport for ScriptedTransport {
    async fn get(&self, request: &PageRequest) -> Result<String, FetchError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("[]".to_string()))
    }
}

/// Wrap listing HTML the way the Drupal `views/ajax` endpoint does.
pub fn ajax_body(html: &str) -> String {
    serde_json::json!([
        {"command": "settings", "settings": {}, "merge": true},
        {"command": "insert", "method": "replaceWith", "data": html},
    ])
    .to_string()
}

/// Listing card markup in the default extraction schema's layout.
pub fn story_card(href: Option<&str>, title: &str) -> String {
    let link = match href {
        Some(h) => format!(r#"<a class="h3__link" href="{h}">{title}</a>"#),
        None => format!("<span>{title}</span>"),
    };
    format!(
        r#"<div class="story-card-object">
             <h3 class="list-object__heading">{link}</h3>
             <time datetime="2025-05-06T09:00:00Z">6 May 2025</time>
           </div>"#
    )
}

/// Record store held in memory, with injectable failures.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<StoredRecord>>,
    inserts: Mutex<usize>,
    updates: Mutex<usize>,
    lookups: Mutex<usize>,
    read_failures: Mutex<VecDeque<SinkError>>,
    write_failures: Mutex<VecDeque<SinkError>>,
    ack_failures: Mutex<VecDeque<SinkError>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ArticleRecord>) -> Self {
        let store = Self::new();
        {
            let mut stored = store.records.lock().unwrap();
            for (i, record) in records.into_iter().enumerate() {
                stored.push(StoredRecord {
                    id: format!("rec{i}"),
                    record,
                });
            }
        }
        store
    }

    /// Fail the next reads (`list_all` / `find_by_key`) with these errors.
    pub fn fail_reads(&self, errors: Vec<SinkError>) {
        self.read_failures.lock().unwrap().extend(errors);
    }

    /// Fail the next writes (`insert` / `update`) with these errors.
    pub fn fail_writes(&self, errors: Vec<SinkError>) {
        self.write_failures.lock().unwrap().extend(errors);
    }

    /// Store the next inserts, then report these errors anyway, like a
    /// request whose response never arrived.
    pub fn fail_after_write(&self, errors: Vec<SinkError>) {
        self.ack_failures.lock().unwrap().extend(errors);
    }

    pub fn records(&self) -> Vec<StoredRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn inserts(&self) -> usize {
        *self.inserts.lock().unwrap()
    }

    pub fn updates(&self) -> usize {
        *self.updates.lock().unwrap()
    }

    pub fn writes(&self) -> usize {
        self.inserts() + self.updates()
    }

    pub fn lookups(&self) -> usize {
        *self.lookups.lock().unwrap()
    }

    fn next_read_failure(&self) -> Option<SinkError> {
        self.read_failures.lock().unwrap().pop_front()
    }

    fn next_write_failure(&self) -> Option<SinkError> {
        self.write_failures.lock().unwrap().pop_front()
    }
}

impl RecordStore for MemoryStore {
    async fn list_all(&self) -> Result<Vec<StoredRecord>, SinkError> {
        if let Some(e) = self.next_read_failure() {
            return Err(e);
        }
        Ok(self.records())
    }

    async fn find_by_key(&self, key: &str) -> Result<Option<StoredRecord>, SinkError> {
        if let Some(e) = self.next_read_failure() {
            return Err(e);
        }
        *self.lookups.lock().unwrap() += 1;
        Ok(self.records().into_iter().find(|s| s.record.url == key))
    }

    async fn insert(&self, record: &ArticleRecord) -> Result<StoredRecord, SinkError> {
        if let Some(e) = self.next_write_failure() {
            return Err(e);
        }
        let mut records = self.records.lock().unwrap();
        let stored = StoredRecord {
            id: format!("rec{}", records.len()),
            record: record.clone(),
        };
        records.push(stored.clone());
        *self.inserts.lock().unwrap() += 1;
        if let Some(e) = self.ack_failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        Ok(stored)
    }

    async fn update(&self, id: &str, record: &ArticleRecord) -> Result<(), SinkError> {
        if let Some(e) = self.next_write_failure() {
            return Err(e);
        }
        let mut records = self.records.lock().unwrap();
        let Some(stored) = records.iter_mut().find(|s| s.id == id) else {
            return Err(SinkError::Schema(format!("no record {id}")));
        };
        stored.record = record.clone();
        *self.updates.lock().unwrap() += 1;
        Ok(())
    }
}
