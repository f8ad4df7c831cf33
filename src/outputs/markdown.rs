//! Markdown rendering of batch reports.
//!
//! The document opens with a counts table, then lists the items per
//! outcome. Failed items show the stage they stopped at; stored GitHub
//! projects list any sub-fetch that came back empty.

use super::report_path;
use crate::models::{BatchReport, CanonicalRecord, SyncOutcome};
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument};

fn record_link(record: &CanonicalRecord) -> String {
    let url = match record {
        CanonicalRecord::Article(a) => &a.source_url,
        CanonicalRecord::Project(p) => &p.github_url,
    };
    format!("[{}]({})", record.title().replace(['[', ']'], ""), url)
}

fn push_stored(md: &mut String, heading: &str, outcomes: &[&SyncOutcome]) {
    if outcomes.is_empty() {
        return;
    }
    md.push_str(&format!("\n## {} ({})\n\n", heading, outcomes.len()));
    for outcome in outcomes {
        let (SyncOutcome::Created { id, record, warnings } | SyncOutcome::Updated { id, record, warnings }) =
            outcome
        else {
            continue;
        };
        md.push_str(&format!(
            "- {} `{}` (#{}, {})\n",
            record_link(record),
            record.natural_key(),
            id,
            record.collection()
        ));
        for w in warnings {
            md.push_str(&format!("\t- missing {}: {}\n", w.sub_fetch, w.reason));
        }
    }
}

/// Render `report` as a Markdown document titled `title`.
pub fn report_to_markdown(report: &BatchReport, title: &str) -> String {
    let mut md = String::new();
    md.push_str(&format!("# {}\n\n", title));
    md.push_str(&format!(
        "Started {} · finished {}{}\n\n",
        report.started_at.to_rfc3339(),
        report.finished_at.to_rfc3339(),
        if report.cancelled { " · **cancelled**" } else { "" }
    ));

    md.push_str("| Total | Created | Updated | Failed | Skipped |\n");
    md.push_str("|------:|--------:|--------:|-------:|--------:|\n");
    md.push_str(&format!(
        "| {} | {} | {} | {} | {} |\n",
        report.total,
        report.created_count,
        report.updated_count,
        report.failed_count,
        report.skipped_count
    ));

    let created: Vec<&SyncOutcome> = report
        .outcomes
        .iter()
        .filter(|o| matches!(o, SyncOutcome::Created { .. }))
        .collect();
    let updated: Vec<&SyncOutcome> = report
        .outcomes
        .iter()
        .filter(|o| matches!(o, SyncOutcome::Updated { .. }))
        .collect();
    push_stored(&mut md, "Created", &created);
    push_stored(&mut md, "Updated", &updated);

    if report.failed_count > 0 {
        md.push_str(&format!("\n## Failed ({})\n\n", report.failed_count));
        md.push_str("| Item | Stage | Reason |\n|------|-------|--------|\n");
        for outcome in &report.outcomes {
            if let SyncOutcome::Failed { natural_key, stage, reason } = outcome {
                md.push_str(&format!(
                    "| `{}` | {} | {} |\n",
                    natural_key,
                    stage,
                    reason.replace('|', "\\|").replace('\n', " ")
                ));
            }
        }
    }
    md
}

/// Write the Markdown rendering of `report` next to its JSON twin.
#[instrument(level = "info", skip_all, fields(report_dir = %report_dir.display(), %label))]
pub async fn write_markdown(
    report: &BatchReport,
    report_dir: &Path,
    label: &str,
) -> Result<PathBuf, Box<dyn Error>> {
    let path = report_path(report_dir, report, label, "md");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let title = format!("Sync report: {}", label);
    fs::write(&path, report_to_markdown(report, &title)).await?;
    info!(path = %path.display(), "Wrote Markdown report");
    Ok(path)
}
