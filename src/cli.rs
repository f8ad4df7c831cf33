//! Command-line interface definitions for catalog_sync.
//!
//! Options can be given as flags or environment variables. Anything not
//! given here falls back to the YAML config file, then to built-in defaults.

use clap::{Parser, Subcommand};

/// Command-line arguments for catalog_sync.
///
/// # Examples
///
/// ```sh
/// # Import a single article
/// catalog_sync import https://blog.csdn.net/someone/article/details/123
///
/// # Sync a list of URLs, four at a time, writing the report to ./reports
/// catalog_sync --concurrency 4 -r ./reports sync --file urls.txt
///
/// # Sync every tracked GitHub project
/// GITHUB_TOKEN=ghp_xxx catalog_sync -c config.yaml sync-projects
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to config.yaml file
    #[arg(short, long, env = "CATALOG_SYNC_CONFIG")]
    pub config: Option<String>,

    /// GitHub API token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// GitHub API base URL (for GitHub Enterprise)
    #[arg(long)]
    pub github_api_base: Option<String>,

    /// Maximum number of items synced concurrently
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Number of recent commits stored per repository
    #[arg(long)]
    pub commit_limit: Option<u32>,

    /// Retries for timeouts, 5xx and rate limits (0 disables retrying)
    #[arg(long)]
    pub max_retries: Option<usize>,

    /// First retry delay in milliseconds, doubled on each attempt
    #[arg(long)]
    pub retry_base_delay_ms: Option<u64>,

    /// Upper bound on a single retry delay in milliseconds
    #[arg(long)]
    pub retry_max_delay_ms: Option<u64>,

    /// Path of the JSON catalog file
    #[arg(short, long)]
    pub store: Option<String>,

    /// Reject items that already exist instead of updating them
    #[arg(long)]
    pub skip_existing: bool,

    /// Output directory for JSON and Markdown batch reports
    #[arg(short, long)]
    pub report_dir: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Import one article or repository by URL
    Import {
        url: String,
    },
    /// Sync a batch of URLs
    Sync {
        /// URLs to sync
        urls: Vec<String>,

        /// File with one URL per line (blank lines and `#` comments ignored)
        #[arg(short, long)]
        file: Option<String>,
    },
    /// Sync every tracked GitHub project
    SyncProjects,
}

/// Parse a URL list file: one URL per line, `#` starts a comment.
pub fn parse_url_list(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
