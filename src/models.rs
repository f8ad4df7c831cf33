//! Data models for scraped sources and their canonical catalog records.
//!
//! Records move through three shapes during a sync:
//! - Transient inputs: [`RawDocument`], [`ExtractedArticle`], [`RepositorySnapshot`]
//! - Canonical records: [`CanonicalArticle`], [`CanonicalProject`], wrapped in [`CanonicalRecord`]
//! - Results: [`SyncOutcome`] per item, folded into a [`BatchReport`] per batch
//!
//! Everything handed to the REST layer serializes with camelCase field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// What kind of source a request targets. Decides the request identity the
/// fetcher presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// A CSDN blog page, scraped as HTML.
    Csdn,
    /// A GitHub REST endpoint returning JSON.
    GitHubRepo,
    /// A GitHub REST endpoint asked for raw content (README).
    GitHubRaw,
    /// Any other page.
    Generic,
}

impl SourceKind {
    pub fn is_github(self) -> bool {
        matches!(self, SourceKind::GitHubRepo | SourceKind::GitHubRaw)
    }
}

/// A fetched response body, discarded once it has been parsed.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub kind: SourceKind,
    /// The URL that was requested.
    pub url: String,
    /// HTTP status of the response (always 2xx when returned by a fetcher).
    pub status: u16,
    /// Decoded response body.
    pub body: String,
}

/// An article as pulled out of a CSDN page, before canonicalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedArticle {
    pub title: String,
    pub author: String,
    pub published_at: Option<DateTime<Utc>>,
    /// Ordered, duplicate free, never empty.
    pub tags: Vec<String>,
    pub body_text: String,
    /// Inner HTML of the element `body_text` was read from.
    pub content_html: String,
    pub view_count: u64,
    pub like_count: u64,
    pub collection_count: u64,
    pub source_url: String,
}

/// One contributor entry of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contributor {
    pub username: String,
    pub avatar_url: String,
    pub profile_url: String,
    pub contribution_count: u64,
}

/// One entry of the recent commit list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSummary {
    pub sha: String,
    /// First line of the commit message.
    pub message: String,
    pub author_name: String,
    pub committed_at: Option<DateTime<Utc>>,
    pub html_url: String,
}

/// Everything the aggregator managed to learn about one GitHub repository.
///
/// Each sub-fetch fills its own fields; a failed sub-fetch leaves them at
/// their defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepositorySnapshot {
    pub owner: String,
    pub repo: String,
    pub name: String,
    pub description: Option<String>,
    pub html_url: String,
    pub homepage_url: Option<String>,
    pub star_count: u64,
    pub fork_count: u64,
    pub watcher_count: u64,
    pub open_issue_count: u64,
    pub license_id: Option<String>,
    pub topics: Vec<String>,
    pub is_private: bool,
    pub is_archived: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub language_histogram: BTreeMap<String, u64>,
    pub contributors: Vec<Contributor>,
    pub readme_text: Option<String>,
    pub recent_commits: Vec<CommitSummary>,
}

/// The platform an article was imported from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "CSDN")]
    Csdn,
    GitHub,
    Personal,
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleStats {
    pub views: u64,
    pub likes: u64,
    pub collections: u64,
}

/// The persisted shape of an article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalArticle {
    pub natural_key: String,
    pub title: String,
    pub author: String,
    pub published_at: DateTime<Utc>,
    pub summary: String,
    pub body_text: String,
    /// Article markup as published; empty for placeholder records.
    #[serde(default)]
    pub content_html: String,
    pub tags: Vec<String>,
    pub read_time_minutes: u32,
    pub platform: Platform,
    pub source_url: String,
    pub stats: ArticleStats,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectStats {
    pub stars: u64,
    pub forks: u64,
    pub watchers: u64,
    pub issues: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Archived,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectCategory {
    Web,
    Mobile,
    Desktop,
    Library,
    Other,
}

/// The persisted shape of a GitHub project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalProject {
    /// Lowercased `owner/repo`.
    pub natural_key: String,
    pub owner: String,
    pub repo: String,
    pub title: String,
    pub description: String,
    pub github_url: String,
    pub demo_url: Option<String>,
    pub stats: ProjectStats,
    pub contributors: Vec<Contributor>,
    /// Sorted, duplicate free.
    pub technologies: Vec<String>,
    pub license: String,
    pub visibility: Visibility,
    pub category: ProjectCategory,
    pub status: ProjectStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub readme: Option<String>,
    pub recent_commits: Vec<CommitSummary>,
    pub synced_at: DateTime<Utc>,
}

/// Which canonical collection a record belongs to. Natural keys are unique
/// per collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Articles,
    Projects,
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Collection::Articles => f.write_str("articles"),
            Collection::Projects => f.write_str("projects"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CanonicalRecord {
    Article(CanonicalArticle),
    Project(CanonicalProject),
}

impl CanonicalRecord {
    pub fn collection(&self) -> Collection {
        match self {
            CanonicalRecord::Article(_) => Collection::Articles,
            CanonicalRecord::Project(_) => Collection::Projects,
        }
    }

    pub fn natural_key(&self) -> &str {
        match self {
            CanonicalRecord::Article(a) => &a.natural_key,
            CanonicalRecord::Project(p) => &p.natural_key,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            CanonicalRecord::Article(a) => &a.title,
            CanonicalRecord::Project(p) => &p.title,
        }
    }
}

/// Identifier assigned by the storage collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The aggregator sub-fetches, named in partial-failure warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubFetch {
    Info,
    Contributors,
    Languages,
    Readme,
    Commits,
}

impl fmt::Display for SubFetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubFetch::Info => "info",
            SubFetch::Contributors => "contributors",
            SubFetch::Languages => "languages",
            SubFetch::Readme => "readme",
            SubFetch::Commits => "commits",
        };
        f.write_str(s)
    }
}

/// One sub-fetch that failed while the snapshot as a whole stayed usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialAggregationWarning {
    pub sub_fetch: SubFetch,
    pub reason: String,
}

/// Where an item's pipeline was when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Pending,
    Fetching,
    Parsing,
    Canonicalizing,
    Resolving,
    Persisting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Pending => "pending",
            Stage::Fetching => "fetching",
            Stage::Parsing => "parsing",
            Stage::Canonicalizing => "canonicalizing",
            Stage::Resolving => "resolving",
            Stage::Persisting => "persisting",
        };
        f.write_str(s)
    }
}

/// The result of syncing one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SyncOutcome {
    Created {
        id: RecordId,
        record: CanonicalRecord,
        warnings: Vec<PartialAggregationWarning>,
    },
    Updated {
        id: RecordId,
        record: CanonicalRecord,
        warnings: Vec<PartialAggregationWarning>,
    },
    Failed {
        #[serde(rename = "naturalKey")]
        natural_key: String,
        stage: Stage,
        reason: String,
    },
}

impl SyncOutcome {
    pub fn failed(natural_key: impl Into<String>, stage: Stage, reason: impl fmt::Display) -> Self {
        SyncOutcome::Failed {
            natural_key: natural_key.into(),
            stage,
            reason: reason.to_string(),
        }
    }

    pub fn natural_key(&self) -> &str {
        match self {
            SyncOutcome::Created { record, .. } | SyncOutcome::Updated { record, .. } => {
                record.natural_key()
            }
            SyncOutcome::Failed { natural_key, .. } => natural_key,
        }
    }

    pub fn record(&self) -> Option<&CanonicalRecord> {
        match self {
            SyncOutcome::Created { record, .. } | SyncOutcome::Updated { record, .. } => {
                Some(record)
            }
            SyncOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SyncOutcome::Failed { .. })
    }

    pub fn status_label(&self) -> &'static str {
        match self {
            SyncOutcome::Created { .. } => "created",
            SyncOutcome::Updated { .. } => "updated",
            SyncOutcome::Failed { .. } => "failed",
        }
    }
}

/// Summary of one batch sync, returned to the caller even when every item failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// Items submitted to the batch.
    pub total: usize,
    pub created_count: usize,
    pub updated_count: usize,
    pub failed_count: usize,
    /// Items never dispatched because the batch was cancelled.
    pub skipped_count: usize,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One outcome per dispatched item, in submission order.
    pub outcomes: Vec<SyncOutcome>,
}

impl BatchReport {
    /// Fold per-item outcomes into counts in a single pass.
    pub fn from_outcomes(
        total: usize,
        outcomes: Vec<SyncOutcome>,
        cancelled: bool,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let (mut created, mut updated, mut failed) = (0, 0, 0);
        for outcome in &outcomes {
            match outcome {
                SyncOutcome::Created { .. } => created += 1,
                SyncOutcome::Updated { .. } => updated += 1,
                SyncOutcome::Failed { .. } => failed += 1,
            }
        }
        BatchReport {
            total,
            created_count: created,
            updated_count: updated,
            failed_count: failed,
            skipped_count: total.saturating_sub(outcomes.len()),
            cancelled,
            started_at,
            finished_at,
            outcomes,
        }
    }
}
