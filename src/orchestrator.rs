//! One ingestion run, end to end.
//!
//! ```text
//! Idle -> Fetching -> Parsing -> Writing -> (next page) ... -> Summarizing -> Done
//! ```
//!
//! Pages are walked in order until one comes back empty or `max_pages` is
//! reached. A page whose markup no longer matches the card selector counts
//! as one failure and also ends the walk. Every page, card and record fails on its own: the failure lands
//! in the [`RunSummary`] and the run moves on. The only exception is a sink
//! credential error, which jumps straight to `Summarizing` and marks the
//! run as aborted. Every run ends in `Done` with a finished summary.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::config::SourceConfig;
use crate::fetch::Fetcher;
use crate::fetch::transport::HttpTransport;
use crate::models::RunSummary;
use crate::normalize::normalize;
use crate::parse::{ExtractionSchema, parse_listing};
use crate::sink::{RecordStore, SinkWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Fetching,
    Parsing,
    Writing,
    Summarizing,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why the page loop stopped.
enum PageStep {
    Continue,
    EndOfListing,
    /// The listing can no longer be read; later pages would fail the same way.
    Drifted,
    Abort(String),
}

pub struct Orchestrator<T, S> {
    fetcher: Fetcher<T>,
    schema: ExtractionSchema,
    writer: SinkWriter<S>,
    base_url: Url,
    max_pages: u32,
    page_delay: Duration,
    phase: RunPhase,
}

impl<T, S> Orchestrator<T, S>
where
    T: HttpTransport,
    S: RecordStore,
{
    pub fn new(
        fetcher: Fetcher<T>,
        schema: ExtractionSchema,
        writer: SinkWriter<S>,
        source: &SourceConfig,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            fetcher,
            schema,
            writer,
            base_url: Url::parse(&source.base_url)?,
            max_pages: source.max_pages,
            page_delay: source.page_delay(),
            phase: RunPhase::Idle,
        })
    }

    #[cfg(test)]
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    #[cfg(test)]
    pub fn writer(&self) -> &SinkWriter<S> {
        &self.writer
    }

    fn transition(&mut self, next: RunPhase) {
        debug!(from = %self.phase, to = %next, "Run phase");
        self.phase = next;
    }

    /// Execute one run. Never leaves a run unterminated.
    #[instrument(level = "info", skip_all, fields(max_pages = self.max_pages))]
    pub async fn run(&mut self) -> RunSummary {
        let mut summary = RunSummary::new();
        info!("Starting ingestion run");

        if let Err(e) = self.writer.prime().await {
            if e.is_fatal() {
                error!(error = %e, "Sink rejected credentials; aborting run");
                summary.abort(e.to_string());
                return self.summarize(summary);
            }
            warn!(error = %e, "Could not preload existing records; falling back to per-item lookups");
        }

        let mut handled: HashSet<String> = HashSet::new();
        for page in 0..self.max_pages {
            if page > 0 && !self.page_delay.is_zero() {
                sleep(self.page_delay).await;
            }
            match self.process_page(page, &mut handled, &mut summary).await {
                PageStep::Continue => {}
                PageStep::EndOfListing => {
                    info!(page, "No more articles found; ending pagination");
                    break;
                }
                PageStep::Drifted => {
                    warn!(page, "Listing markup no longer matches; ending pagination");
                    break;
                }
                PageStep::Abort(reason) => {
                    summary.abort(reason);
                    break;
                }
            }
        }

        self.summarize(summary)
    }

    async fn process_page(
        &mut self,
        page: u32,
        handled: &mut HashSet<String>,
        summary: &mut RunSummary,
    ) -> PageStep {
        let page_ref = format!("page {page}");

        self.transition(RunPhase::Fetching);
        let html = match self.fetcher.fetch_page(page).await {
            Ok(Some(html)) => html,
            Ok(None) => return PageStep::EndOfListing,
            Err(e) => {
                error!(page, error = %e, "Page fetch failed");
                summary.record_failure(page_ref, e.to_string());
                return PageStep::Continue;
            }
        };
        summary.pages_fetched += 1;

        self.transition(RunPhase::Parsing);
        let parsed = match parse_listing(&html, &self.schema, &self.base_url) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(page, error = %e, "Page parse failed; site format may have changed");
                summary.record_failure(page_ref, e.to_string());
                return PageStep::Drifted;
            }
        };
        if parsed.is_empty() {
            return PageStep::EndOfListing;
        }
        info!(page, cards = parsed.cards_seen, "Found article cards");

        summary.items_seen += parsed.cards_seen;
        summary.items_skipped += parsed.duplicates;
        for skipped in &parsed.skipped {
            summary.record_failure(format!("{page_ref} card {}", skipped.index), skipped.reason.clone());
        }

        self.transition(RunPhase::Writing);
        for record in parsed.records {
            let record = normalize(record);
            if !handled.insert(record.url.clone()) {
                debug!(page, url = %record.url, "Already handled in this run");
                summary.items_skipped += 1;
                continue;
            }

            match self.writer.upsert(&record).await {
                Ok(outcome) => {
                    info!(page, url = %record.url, title = %record.title, %outcome, "Article written");
                    summary.record_outcome(outcome);
                }
                Err(e) if e.is_fatal() => {
                    error!(page, url = %record.url, error = %e, "Sink rejected credentials; aborting run");
                    summary.record_failure(record.url, e.to_string());
                    return PageStep::Abort(e.to_string());
                }
                Err(e) => {
                    error!(page, url = %record.url, error = %e, "Article write failed");
                    summary.record_failure(record.url, e.to_string());
                }
            }
        }
        PageStep::Continue
    }

    fn summarize(&mut self, mut summary: RunSummary) -> RunSummary {
        self.transition(RunPhase::Summarizing);
        summary.finish();
        for item in &summary.errors {
            warn!(item = %item.item_ref, reason = %item.reason, "Failed item");
        }
        info!(
            pages = summary.pages_fetched,
            seen = summary.items_seen,
            written = summary.items_written,
            inserted = summary.items_inserted,
            updated = summary.items_updated,
            unchanged = summary.items_unchanged,
            skipped = summary.items_skipped,
            failed = summary.items_failed,
            aborted = summary.aborted,
            "Run summary: {summary}"
        );
        self.transition(RunPhase::Done);
        summary
    }
}
