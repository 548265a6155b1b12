//! Data models shared by every pipeline stage.
//!
//! - [`ArticleRecord`]: one article extracted from a listing card
//! - [`UpsertOutcome`]: what the sink did with a record
//! - [`RunSummary`]: per-run tallies and the ordered error list, owned by
//!   the orchestrator and logged once at the end

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An article as extracted from a listing card.
///
/// `url` is the identity: after normalization it is the canonical URL and
/// two records with the same `url` are the same article. Optional fields
/// are empty strings when the card does not carry them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ArticleRecord {
    pub url: String,
    pub title: String,
    /// `YYYY-MM-DD` once normalized.
    pub published_date: String,
    pub image_url: String,
    pub summary: String,
}

impl ArticleRecord {
    /// True when any stored content differs. The identity key is ignored.
    pub fn content_differs(&self, other: &ArticleRecord) -> bool {
        self.title != other.title
            || self.published_date != other.published_date
            || self.image_url != other.image_url
            || self.summary != other.summary
    }
}

/// A record as it exists in the external store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    /// Store-assigned id.
    pub id: String,
    pub record: ArticleRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

impl fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UpsertOutcome::Inserted => "inserted",
            UpsertOutcome::Updated => "updated",
            UpsertOutcome::Unchanged => "unchanged",
        })
    }
}

/// One failed item: a page, a card, or a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub item_ref: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pages_fetched: u32,
    /// Article cards found on listing pages.
    pub items_seen: usize,
    /// Inserted plus updated.
    pub items_written: usize,
    pub items_inserted: usize,
    pub items_updated: usize,
    pub items_unchanged: usize,
    /// Duplicates of an article already handled in this run.
    pub items_skipped: usize,
    pub items_failed: usize,
    pub errors: Vec<ItemError>,
    /// Set when the run stopped early on a fatal error.
    pub aborted: bool,
    pub abort_reason: Option<String>,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            pages_fetched: 0,
            items_seen: 0,
            items_written: 0,
            items_inserted: 0,
            items_updated: 0,
            items_unchanged: 0,
            items_skipped: 0,
            items_failed: 0,
            errors: Vec::new(),
            aborted: false,
            abort_reason: None,
        }
    }

    pub fn record_outcome(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => {
                self.items_inserted += 1;
                self.items_written += 1;
            }
            UpsertOutcome::Updated => {
                self.items_updated += 1;
                self.items_written += 1;
            }
            UpsertOutcome::Unchanged => self.items_unchanged += 1,
        }
    }

    pub fn record_failure(&mut self, item_ref: impl Into<String>, reason: impl Into<String>) {
        self.items_failed += 1;
        self.errors.push(ItemError {
            item_ref: item_ref.into(),
            reason: reason.into(),
        });
    }

    pub fn abort(&mut self, reason: impl Into<String>) {
        self.aborted = true;
        self.abort_reason = Some(reason.into());
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pages={} seen={} written={} (inserted={} updated={}) unchanged={} skipped={} failed={}",
            self.pages_fetched,
            self.items_seen,
            self.items_written,
            self.items_inserted,
            self.items_updated,
            self.items_unchanged,
            self.items_skipped,
            self.items_failed,
        )?;
        if let Some(reason) = &self.abort_reason {
            write!(f, " aborted=\"{reason}\"")?;
        }
        Ok(())
    }
}
