//! JSON output of batch reports.
//!
//! The report is written with the same camelCase shape the REST layer
//! serves, so a client can read either interchangeably.

use super::report_path;
use crate::models::BatchReport;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

/// Write `report` as pretty JSON under `report_dir`.
///
/// # Returns
///
/// The path of the written file: `{report_dir}/{date}/{HHMMSS}_{label}.json`.
#[instrument(level = "info", skip_all, fields(report_dir = %report_dir.display(), %label))]
pub async fn write_report(
    report: &BatchReport,
    report_dir: &Path,
    label: &str,
) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(report)?;
    let path = report_path(report_dir, report, label, "json");

    if let Some(parent) = path.parent() {
        info!(dir = %parent.display(), "Ensuring JSON directory exists");
        if let Err(e) = fs::create_dir_all(parent).await {
            error!(dir = %parent.display(), error = %e, "Failed to create JSON dir");
            return Err(e.into());
        }
    }

    fs::write(&path, json).await?;
    info!(path = %path.display(), outcomes = report.outcomes.len(), "Wrote JSON report");
    Ok(path)
}
