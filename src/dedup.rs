//! Natural keys and duplicate resolution.
//!
//! A record is identified by its natural key within its collection:
//! - articles: the source URL reduced to `scheme://host/path`
//! - projects: lowercased `owner/repo`
//!
//! Before persisting, the gate looks the key up and decides between
//! inserting, updating the existing record, or rejecting the item.

use crate::error::{ConfigError, DuplicateError, StorageError};
use crate::models::{Collection, RecordId};
use crate::store::CatalogStore;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// What to do when a natural key is already stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Overwrite the stored record (re-sync).
    #[default]
    Upsert,
    /// Leave the stored record alone and report a duplicate.
    SkipExisting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Insert,
    UpdateExisting(RecordId),
    Reject(DuplicateError),
}

/// Parse an http(s) URL, rejecting anything without a host.
pub fn parse_source_url(url: &str) -> Result<Url, ConfigError> {
    let parsed = Url::parse(url.trim()).map_err(|_| ConfigError::InvalidSourceUrl(url.to_string()))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some_and(|h| !h.is_empty()) => Ok(parsed),
        _ => Err(ConfigError::InvalidSourceUrl(url.to_string())),
    }
}

/// Article key: `scheme://host/path`, host lowercased, no query, no
/// fragment, no trailing slash.
pub fn article_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
    let path = url.path().trim_end_matches('/');
    format!("{}://{}{}{}", url.scheme(), host, port, path)
}

pub fn normalize_article_url(url: &str) -> Result<String, ConfigError> {
    parse_source_url(url).map(|parsed| article_key(&parsed))
}

/// Decide what happens to `natural_key` given what is already stored.
pub fn resolve(
    policy: DedupPolicy,
    collection: Collection,
    natural_key: &str,
    existing: Option<RecordId>,
) -> Resolution {
    match (existing, policy) {
        (None, _) => Resolution::Insert,
        (Some(id), DedupPolicy::Upsert) => Resolution::UpdateExisting(id),
        (Some(_), DedupPolicy::SkipExisting) => Resolution::Reject(DuplicateError {
            collection,
            natural_key: natural_key.to_string(),
        }),
    }
}

/// [`resolve`] against a live store.
#[derive(Debug, Clone, Copy, Default)]
pub struct DedupGate {
    policy: DedupPolicy,
}

impl DedupGate {
    pub fn new(policy: DedupPolicy) -> Self {
        Self { policy }
    }

    pub async fn check<S: CatalogStore>(
        &self,
        store: &S,
        collection: Collection,
        natural_key: &str,
    ) -> Result<Resolution, StorageError> {
        let existing = store
            .find_by_natural_key(collection, natural_key)
            .await?
            .map(|stored| stored.id);
        let resolution = resolve(self.policy, collection, natural_key, existing);
        debug!(%collection, natural_key, ?resolution, "Resolved natural key");
        Ok(resolution)
    }
}
