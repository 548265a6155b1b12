//! # Newsroom Ingest
//!
//! A scheduled scrape-to-table pipeline: walks a newsroom's article
//! listing, extracts one record per article card, normalizes it, and
//! upserts it into an Airtable table keyed by canonical article URL.
//!
//! ## Usage
//!
//! ```sh
//! AIRTABLE_API_KEY=pat... newsroom_ingest --config newsroom.yaml
//! ```
//!
//! ## Architecture
//!
//! 1. **Fetching**: request listing pages through a retrying HTTP transport
//! 2. **Parsing**: extract article cards with a fixed CSS-selector schema
//! 3. **Normalizing**: canonical URL, ISO date, trimmed text
//! 4. **Writing**: idempotent upsert into the record store
//! 5. **Summarizing**: one run summary in the log (and optionally JSON)
//!
//! The process exits non-zero only on fatal conditions (missing or rejected
//! credentials, invalid configuration). Per-item failures are reported in
//! the run summary and the log.

use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info};

mod cli;
mod config;
mod error;
mod fetch;
mod logging;
mod models;
mod normalize;
mod orchestrator;
mod outputs;
mod parse;
mod retry;
mod sink;
#[cfg(test)]
mod testing;
mod utils;

use cli::Cli;
use config::Config;
use fetch::Fetcher;
use fetch::transport::{ReqwestTransport, RetryTransport};
use orchestrator::Orchestrator;
use outputs::json;
use parse::ExtractionSchema;
use retry::Backoff;
use sink::SinkWriter;
use sink::airtable::AirtableStore;
use utils::{ensure_writable_dir, parent_dir};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();

    ensure_writable_dir(parent_dir(&args.log_file)).await?;
    let _log_guard = logging::configure_logging(&args.log_file);

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "newsroom_ingest starting up");
    debug!(?args.config, ?args.max_pages, log_file = %args.log_file.display(), "Parsed CLI arguments");

    let mut config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };
    if let Some(max_pages) = args.max_pages {
        config.source.max_pages = max_pages;
        config.validate()?;
    }

    let Some(api_key) = args
        .airtable_api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
    else {
        error!("AIRTABLE_API_KEY missing");
        return Err("AIRTABLE_API_KEY missing".into());
    };

    // ---- Wire the pipeline ----
    let transport = RetryTransport::new(
        ReqwestTransport::new(&config.source.headers, config.fetch.timeout())?,
        Backoff::from(&config.fetch.retry),
    );
    let fetcher = Fetcher::new(transport, &config.source)?;
    let schema = ExtractionSchema::compile(&config.schema)?;
    let store = AirtableStore::new(&config.airtable, api_key)?;
    let writer = SinkWriter::new(store, Backoff::from(&config.airtable.retry));
    let mut orchestrator = Orchestrator::new(fetcher, schema, writer, &config.source)?;

    let summary = orchestrator.run().await;

    if let Some(path) = &args.summary_json {
        if let Err(e) = json::write_summary(&summary, path).await {
            error!(path = %path.display(), error = %e, "Failed to write run summary JSON");
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        added = summary.items_inserted,
        updated = summary.items_updated,
        failed = summary.items_failed,
        "Execution complete"
    );

    if let Some(reason) = summary.abort_reason {
        return Err(format!("run aborted: {reason}").into());
    }
    Ok(())
}
