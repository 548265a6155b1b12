//! JSON output of the run summary.
//!
//! The scheduler archives this file with the log so a run can be inspected
//! (or alerted on) without parsing log lines.

use std::error::Error;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

use crate::models::RunSummary;
use crate::utils::{ensure_writable_dir, parent_dir};

/// Write `summary` as pretty-printed JSON to `path`, creating parent
/// directories as needed.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_summary(summary: &RunSummary, path: &Path) -> Result<(), Box<dyn Error>> {
    let json = serde_json::to_string_pretty(summary)?;
    ensure_writable_dir(parent_dir(path)).await?;
    fs::write(path, json).await?;
    info!("Wrote run summary JSON");
    Ok(())
}
