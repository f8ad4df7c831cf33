//! Error taxonomy for the sync pipeline.
//!
//! - [`ConfigError`] is fatal: the subsystem cannot run (missing credential,
//!   malformed source URL, unreadable config file).
//! - [`FetchError`], [`ParseError`], [`DuplicateError`] and [`StorageError`]
//!   are item-level and end up as a `Failed` outcome inside a batch.
//! - [`SyncError`] wraps the item-level errors for a single pipeline run.

use crate::models::Collection;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("{url} unreachable: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("rate limited by {url}")]
    RateLimited {
        url: String,
        retry_after: Option<Duration>,
    },
}

impl FetchError {
    /// Transient failures worth another attempt. Client errors and parse
    /// failures are not: the same input gives the same answer.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout { .. }
            | FetchError::Unreachable { .. }
            | FetchError::RateLimited { .. } => true,
            FetchError::HttpStatus { status, .. } => (500..600).contains(status),
        }
    }

    pub fn url(&self) -> &str {
        match self {
            FetchError::Unreachable { url, .. }
            | FetchError::HttpStatus { url, .. }
            | FetchError::Timeout { url }
            | FetchError::RateLimited { url, .. } => url,
        }
    }
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("no title or body found in {url}")]
    NoContentFound { url: String },

    #[error("malformed JSON from {url}: {source}")]
    Json {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("a GitHub token is required (set GITHUB_TOKEN or github_token in the config file)")]
    MissingGithubToken,

    #[error("not a GitHub repository URL: {0}")]
    InvalidRepoUrl(String),

    #[error("not a valid http(s) source URL: {0}")]
    InvalidSourceUrl(String),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{collection} record {natural_key} already exists")]
pub struct DuplicateError {
    pub collection: Collection,
    pub natural_key: String,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("record {0} not found")]
    NotFound(crate::models::RecordId),

    #[error("{collection} record {natural_key} already stored")]
    KeyConflict {
        collection: Collection,
        natural_key: String,
    },
}

/// Anything that can stop a single item's pipeline.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Duplicate(#[from] DuplicateError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
