//! Command-line interface definitions.
//!
//! The scheduler invokes the binary with no arguments; everything has a
//! default and the only secret comes from the environment.

use clap::Parser;
use std::path::PathBuf;

/// Scrape the newsroom listing and upsert its articles into Airtable.
///
/// # Examples
///
/// ```sh
/// # Scheduled run: defaults plus AIRTABLE_API_KEY from the environment
/// newsroom_ingest
///
/// # Custom config, shorter crawl, summary artifact
/// newsroom_ingest -c newsroom.yaml --max-pages 2 --summary-json out/summary.json
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Airtable personal access token
    #[arg(long, env = "AIRTABLE_API_KEY", hide_env_values = true)]
    pub airtable_api_key: Option<String>,

    /// Override the maximum number of listing pages to walk
    #[arg(long)]
    pub max_pages: Option<u32>,

    /// Append-only run log
    #[arg(short, long, default_value = "newsroom_ingest.log")]
    pub log_file: PathBuf,

    /// Also write the run summary as JSON to this path
    #[arg(long)]
    pub summary_json: Option<PathBuf>,
}
