//! # catalog_sync
//!
//! Imports third-party content into a content catalog: CSDN blog articles
//! are scraped from HTML, GitHub repositories are assembled from the REST
//! API, and both are normalized into canonical records with duplicate
//! detection by natural key.
//!
//! ## Features
//!
//! - Selector chains with fallbacks for CSDN page layouts
//! - Five concurrent GitHub sub-fetches per repository, tolerant of partial failure
//! - Insert-or-update by natural key, or reject duplicates with `--skip-existing`
//! - Bounded-concurrency batches with per-item failure isolation and Ctrl-C cancellation
//! - Retries with exponential backoff for timeouts, 5xx and rate limits
//! - JSON and Markdown batch reports
//!
//! ## Usage
//!
//! ```sh
//! catalog_sync import https://blog.csdn.net/someone/article/details/123
//! catalog_sync -r ./reports sync --file urls.txt
//! GITHUB_TOKEN=ghp_xxx catalog_sync -c config.yaml sync-projects
//! ```
//!
//! ## Architecture
//!
//! 1. **Routing**: pick the pipeline from the URL host
//! 2. **Fetching**: download the page or the GitHub API resources
//! 3. **Extraction**: turn HTML or JSON into intermediate records
//! 4. **Canonicalization**: map into catalog records
//! 5. **Persistence**: resolve duplicates and write to the JSON catalog
//! 6. **Output**: emit per-item results and write the batch report

use chrono::Utc;
use clap::Parser;
use std::error::Error;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod canonical;
mod cli;
mod config;
mod dedup;
mod error;
mod fetcher;
mod models;
mod outputs;
mod report;
mod scrapers;
mod store;
mod sync;
mod utils;

use cli::{Cli, Command, parse_url_list};
use config::Settings;
use fetcher::{HttpFetcher, RetryFetcher};
use models::BatchReport;
use outputs::{json, markdown};
use report::TracingReporter;
use store::JsonFileStore;
use sync::SyncOrchestrator;
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "catalog_sync starting up");

    let args = Cli::parse();
    debug!(?args.command, ?args.config, ?args.store, "Parsed CLI arguments");

    // --- Configuration ---
    let settings = Settings::load(args.config.as_deref()).await?.apply_cli(&args);
    settings.validate()?;
    info!(
        store = %settings.store_path,
        concurrency = settings.concurrency,
        has_github_token = settings.github_token().is_some(),
        "Configuration ready"
    );

    // Early check: ensure the report dir is writable before doing any work
    if let Some(dir) = &args.report_dir
        && let Err(e) = ensure_writable_dir(dir).await
    {
        error!(path = %dir, error = %e, "Report directory is not writable (fix perms or choose a different path)");
        return Err(e);
    }

    // --- Services ---
    let fetcher = RetryFetcher::from_settings(HttpFetcher::from_settings(&settings)?, &settings);
    let store = JsonFileStore::open(&settings.store_path).await?;
    let orchestrator = SyncOrchestrator::new(fetcher, store, TracingReporter::default(), settings.clone());

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing in-flight items and stopping");
            ctrl_c_token.cancel();
        }
    });

    // --- Run ---
    let started_at = Utc::now();
    let (label, report) = match &args.command {
        Command::Import { url } => {
            let outcome = orchestrator.import_one(url).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            let report = BatchReport::from_outcomes(1, vec![outcome], false, started_at, Utc::now());
            ("import", report)
        }
        Command::Sync { urls, file } => {
            let mut all = urls.clone();
            if let Some(path) = file {
                let text = tokio::fs::read_to_string(path).await?;
                let from_file = parse_url_list(&text);
                info!(path = %path, count = from_file.len(), "Loaded URL list");
                all.extend(from_file);
            }
            if all.is_empty() {
                error!("No URLs given; pass them as arguments or with --file");
                return Err("no URLs to sync".into());
            }
            ("sync", orchestrator.sync_batch(all, &cancel).await?)
        }
        Command::SyncProjects => ("sync-projects", orchestrator.sync_tracked_projects(&cancel).await?),
    };
    info!(
        path = %orchestrator.store().path().display(),
        "Catalog up to date"
    );

    // ---- Report output ----
    if let Some(dir) = &args.report_dir {
        let dir = Path::new(dir);
        if let Err(e) = json::write_report(&report, dir, label).await {
            error!(error = %e, "Failed to write JSON report");
        }
        if let Err(e) = markdown::write_markdown(&report, dir, label).await {
            error!(error = %e, "Failed to write Markdown report");
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        created = report.created_count,
        updated = report.updated_count,
        failed = report.failed_count,
        skipped = report.skipped_count,
        "Execution complete"
    );

    Ok(())
}
