//! Batch report output in JSON and Markdown.
//!
//! # Submodules
//!
//! - [`json`]: Writes a `BatchReport` as JSON for other tools to consume
//! - [`markdown`]: Renders a `BatchReport` as a readable summary
//!
//! # Output Structure
//!
//! Both files for one run share a stem built from the batch start time
//! (local clock) and a label naming the command:
//!
//! ```text
//! report_dir/
//! └── 2025-05-06/
//!     ├── 093012_sync.json
//!     ├── 093012_sync.md
//!     └── 101500_sync-projects.json
//! ```

use crate::models::BatchReport;
use crate::utils::slugify_title;
use chrono::Local;
use std::path::{Path, PathBuf};

pub mod json;
pub mod markdown;

/// `<dir>/<YYYY-MM-DD>/<HHMMSS>_<label>.<extension>` for `report`.
pub fn report_path(dir: &Path, report: &BatchReport, label: &str, extension: &str) -> PathBuf {
    let started = report.started_at.with_timezone(&Local);
    let label = match slugify_title(label) {
        slug if slug.is_empty() => "batch".to_string(),
        slug => slug,
    };
    dir.join(started.format("%Y-%m-%d").to_string())
        .join(format!("{}_{}.{}", started.format("%H%M%S"), label, extension))
}
