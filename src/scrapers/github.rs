//! GitHub repository aggregator.
//!
//! A repository record is assembled from five REST endpoints:
//!
//! | Sub-fetch | Endpoint | Fills |
//! |-----------|----------|-------|
//! | info | `GET /repos/{owner}/{repo}` | name, description, counters, license, flags, dates |
//! | contributors | `.../contributors` | contributor list |
//! | languages | `.../languages` | language histogram |
//! | readme | `.../readme` (raw accept) | README text |
//! | commits | `.../commits?per_page=N` | recent commits |
//!
//! The five requests run concurrently and are joined without
//! short-circuiting: each failure only leaves its own fields at their
//! defaults and adds a [`PartialAggregationWarning`]. Callers decide what a
//! missing `info` sub-fetch means; the aggregator itself never fails once
//! the URL has been accepted.

use crate::error::{ConfigError, FetchError, ParseError, SyncError};
use crate::fetcher::SourceFetcher;
use crate::models::{
    CommitSummary, Contributor, PartialAggregationWarning, RawDocument, RepositorySnapshot,
    SourceKind, SubFetch,
};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

static REPO_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^https?://(?i:www\.)?(?i:github\.com)/([A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)/([A-Za-z0-9._-]+?)(?:\.git)?/?(?:[/?#].*)?$",
    )
    .expect("static regex")
});

/// GitHub caps `per_page` at 100.
const USER_REPOS_PAGE_SIZE: usize = 100;
const USER_REPOS_MAX_PAGES: usize = 10;

/// The `owner/repo` pair identifying a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoInfo {
    pub owner: String,
    pub repo: String,
}

impl RepoInfo {
    /// GitHub names are case-insensitive, so the key is lowercased.
    pub fn natural_key(&self) -> String {
        format!("{}/{}", self.owner, self.repo).to_lowercase()
    }
}

/// Parse `owner/repo` out of a repository URL.
///
/// Accepts `http(s)://[www.]github.com/<owner>/<repo>` with an optional
/// `.git` suffix and any trailing path, query, or fragment
/// (`/tree/main`, `?tab=readme`). Everything else is rejected before any
/// network call is made.
pub fn extract_repo_info(url: &str) -> Result<RepoInfo, ConfigError> {
    let caps = REPO_URL_RE
        .captures(url.trim())
        .ok_or_else(|| ConfigError::InvalidRepoUrl(url.to_string()))?;
    let owner = caps[1].to_string();
    let repo = caps[2].to_string();
    if repo == "." || repo == ".." {
        return Err(ConfigError::InvalidRepoUrl(url.to_string()));
    }
    Ok(RepoInfo { owner, repo })
}

/// Canonical web URL of a repository.
pub fn format_repo_url(info: &RepoInfo) -> String {
    format!("https://github.com/{}/{}", info.owner, info.repo)
}

/// True for `github.com` and `www.github.com`.
pub fn is_github_host(host: &str) -> bool {
    matches!(host.to_ascii_lowercase().as_str(), "github.com" | "www.github.com")
}

#[derive(Debug, Deserialize)]
struct RepoDto {
    name: String,
    #[serde(default)]
    description: Option<String>,
    html_url: String,
    #[serde(default)]
    homepage: Option<String>,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
    #[serde(default)]
    watchers_count: u64,
    #[serde(default)]
    open_issues_count: u64,
    #[serde(default)]
    license: Option<LicenseDto>,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct LicenseDto {
    #[serde(default)]
    spdx_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContributorDto {
    login: String,
    #[serde(default)]
    avatar_url: String,
    #[serde(default)]
    html_url: String,
    #[serde(default)]
    contributions: u64,
}

#[derive(Debug, Deserialize)]
struct CommitDto {
    sha: String,
    #[serde(default)]
    html_url: String,
    commit: CommitDetailDto,
}

#[derive(Debug, Deserialize)]
struct CommitDetailDto {
    #[serde(default)]
    message: String,
    #[serde(default)]
    author: Option<CommitAuthorDto>,
}

#[derive(Debug, Deserialize)]
struct CommitAuthorDto {
    #[serde(default)]
    name: String,
    #[serde(default)]
    date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct UserRepoDto {
    html_url: String,
}

fn decode<T: DeserializeOwned>(doc: &RawDocument) -> Result<T, ParseError> {
    serde_json::from_str(&doc.body).map_err(|source| ParseError::Json {
        url: doc.url.clone(),
        source,
    })
}

/// A snapshot plus the sub-fetches that failed while building it.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub snapshot: RepositorySnapshot,
    pub warnings: Vec<PartialAggregationWarning>,
}

impl Aggregation {
    pub fn missing(&self, sub_fetch: SubFetch) -> Option<&PartialAggregationWarning> {
        self.warnings.iter().find(|w| w.sub_fetch == sub_fetch)
    }
}

/// Joins the per-endpoint GitHub responses for one repository.
#[derive(Debug)]
pub struct RepositoryAggregator<F> {
    fetcher: F,
    api_base: String,
    commit_limit: u32,
}

impl<F> RepositoryAggregator<F>
where
    F: SourceFetcher,
{
    pub fn new(fetcher: F, api_base: &str, commit_limit: u32) -> Self {
        Self {
            fetcher,
            api_base: api_base.trim_end_matches('/').to_string(),
            commit_limit: commit_limit.max(1),
        }
    }

    fn repo_endpoint(&self, info: &RepoInfo) -> String {
        format!(
            "{}/repos/{}/{}",
            self.api_base,
            urlencoding::encode(&info.owner),
            urlencoding::encode(&info.repo)
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SyncError> {
        let doc = self.fetcher.fetch(url, SourceKind::GitHubRepo).await?;
        Ok(decode(&doc)?)
    }

    async fn get_contributors(&self, url: &str) -> Result<Vec<ContributorDto>, SyncError> {
        let doc = self.fetcher.fetch(url, SourceKind::GitHubRepo).await?;
        // Empty repositories answer 204 with no body.
        if doc.status == 204 || doc.body.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(decode(&doc)?)
    }

    async fn get_readme(&self, url: &str) -> Result<Option<String>, FetchError> {
        let doc = self.fetcher.fetch(url, SourceKind::GitHubRaw).await?;
        Ok(Some(doc.body).filter(|text| !text.trim().is_empty()))
    }

    /// Fetch and join everything known about the repository at `repo_url`.
    ///
    /// # Errors
    ///
    /// Only [`ConfigError::InvalidRepoUrl`], raised before any request.
    /// Sub-fetch failures are reported through [`Aggregation::warnings`].
    #[instrument(level = "info", skip(self))]
    pub async fn aggregate(&self, repo_url: &str) -> Result<Aggregation, ConfigError> {
        let info = extract_repo_info(repo_url)?;
        let base = self.repo_endpoint(&info);
        let contributors_url = format!("{base}/contributors");
        let languages_url = format!("{base}/languages");
        let readme_url = format!("{base}/readme");
        let commits_url = format!("{base}/commits?per_page={}", self.commit_limit);

        let (repo, contributors, languages, readme, commits) = tokio::join!(
            self.get_json::<RepoDto>(&base),
            self.get_contributors(&contributors_url),
            self.get_json::<BTreeMap<String, u64>>(&languages_url),
            self.get_readme(&readme_url),
            self.get_json::<Vec<CommitDto>>(&commits_url),
        );

        let mut warnings = Vec::new();
        let mut note = |sub_fetch: SubFetch, reason: String| {
            warn!(%sub_fetch, %reason, "Sub-fetch failed; leaving defaults");
            warnings.push(PartialAggregationWarning { sub_fetch, reason });
        };

        let mut snapshot = RepositorySnapshot {
            owner: info.owner.clone(),
            repo: info.repo.clone(),
            name: info.repo.clone(),
            html_url: format_repo_url(&info),
            ..RepositorySnapshot::default()
        };

        match repo {
            Ok(dto) => {
                snapshot.name = dto.name;
                snapshot.description = dto.description.filter(|d| !d.trim().is_empty());
                snapshot.html_url = dto.html_url;
                snapshot.homepage_url = dto.homepage.filter(|h| !h.trim().is_empty());
                snapshot.star_count = dto.stargazers_count;
                snapshot.fork_count = dto.forks_count;
                snapshot.watcher_count = dto.watchers_count;
                snapshot.open_issue_count = dto.open_issues_count;
                snapshot.license_id = dto
                    .license
                    .and_then(|l| l.spdx_id)
                    .filter(|id| !id.is_empty() && id != "NOASSERTION");
                snapshot.topics = dto.topics;
                snapshot.is_private = dto.private;
                snapshot.is_archived = dto.archived;
                snapshot.created_at = dto.created_at;
                snapshot.updated_at = dto.updated_at;
            }
            Err(e) => note(SubFetch::Info, e.to_string()),
        }

        match contributors {
            Ok(list) => {
                snapshot.contributors = list
                    .into_iter()
                    .map(|c| Contributor {
                        username: c.login,
                        avatar_url: c.avatar_url,
                        profile_url: c.html_url,
                        contribution_count: c.contributions,
                    })
                    .collect();
            }
            Err(e) => note(SubFetch::Contributors, e.to_string()),
        }

        match languages {
            Ok(histogram) => snapshot.language_histogram = histogram,
            Err(e) => note(SubFetch::Languages, e.to_string()),
        }

        match readme {
            Ok(text) => snapshot.readme_text = text,
            Err(FetchError::HttpStatus { status: 404, .. }) => {
                note(SubFetch::Readme, "repository has no README".to_string())
            }
            Err(e) => note(SubFetch::Readme, e.to_string()),
        }

        match commits {
            Ok(list) => {
                snapshot.recent_commits = list
                    .into_iter()
                    .map(|c| {
                        let (author_name, committed_at) = c
                            .commit
                            .author
                            .map(|a| (a.name, a.date))
                            .unwrap_or_default();
                        CommitSummary {
                            sha: c.sha,
                            message: c.commit.message.lines().next().unwrap_or("").to_string(),
                            author_name,
                            committed_at,
                            html_url: c.html_url,
                        }
                    })
                    .collect();
            }
            Err(e) => note(SubFetch::Commits, e.to_string()),
        }

        info!(
            repo = %info.natural_key(),
            contributors = snapshot.contributors.len(),
            languages = snapshot.language_histogram.len(),
            commits = snapshot.recent_commits.len(),
            failed_sub_fetches = warnings.len(),
            "Aggregated repository"
        );
        Ok(Aggregation { snapshot, warnings })
    }

    /// Web URLs of every repository visible to the token's user, most
    /// recently updated first.
    #[instrument(level = "info", skip(self))]
    pub async fn list_user_repositories(&self) -> Result<Vec<String>, SyncError> {
        let mut urls = Vec::new();
        for page in 1..=USER_REPOS_MAX_PAGES {
            let url = format!(
                "{}/user/repos?sort=updated&per_page={}&page={}",
                self.api_base, USER_REPOS_PAGE_SIZE, page
            );
            let repos: Vec<UserRepoDto> = self.get_json(&url).await?;
            let count = repos.len();
            urls.extend(repos.into_iter().map(|r| r.html_url));
            debug!(page, count, "Listed user repositories");
            if count < USER_REPOS_PAGE_SIZE {
                break;
            }
        }
        info!(count = urls.len(), "Listed user repositories");
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const API: &str = "https://api.test";

    /// Serves canned bodies keyed by full URL; anything else is a 404.
    #[derive(Default)]
    struct FakeGitHub {
        routes: HashMap<String, Result<(u16, String), FetchError>>,
        calls: Mutex<Vec<(String, SourceKind)>>,
    }

    impl FakeGitHub {
        fn ok(mut self, path: &str, body: &str) -> Self {
            self.routes.insert(format!("{API}{path}"), Ok((200, body.to_string())));
            self
        }

        fn status(mut self, path: &str, status: u16) -> Self {
            self.routes.insert(format!("{API}{path}"), Ok((status, String::new())));
            self
        }

        fn err(mut self, path: &str, err: FetchError) -> Self {
            self.routes.insert(format!("{API}{path}"), Err(err));
            self
        }
    }

    impl SourceFetcher for FakeGitHub {
        async fn fetch(&self, url: &str, kind: SourceKind) -> Result<RawDocument, FetchError> {
            self.calls.lock().unwrap().push((url.to_string(), kind));
            match self.routes.get(url) {
                Some(Ok((status, body))) if (200..300).contains(status) => Ok(RawDocument {
                    kind,
                    url: url.to_string(),
                    status: *status,
                    body: body.clone(),
                }),
                Some(Ok((status, _))) => Err(FetchError::HttpStatus { url: url.to_string(), status: *status }),
                Some(Err(e)) => Err(e.clone()),
                None => Err(FetchError::HttpStatus { url: url.to_string(), status: 404 }),
            }
        }
    }

    const REPO_JSON: &str = r#"{
        "name": "widget",
        "description": "A widget",
        "html_url": "https://github.com/acme/widget",
        "homepage": "",
        "stargazers_count": 42,
        "forks_count": 7,
        "watchers_count": 42,
        "open_issues_count": 3,
        "license": {"spdx_id": "MIT"},
        "topics": ["web", "rust"],
        "private": false,
        "archived": true,
        "created_at": "2020-01-01T00:00:00Z",
        "updated_at": "2024-02-02T00:00:00Z"
    }"#;

    const COMMITS_JSON: &str = r#"[
        {"sha": "abc123", "html_url": "https://github.com/acme/widget/commit/abc123",
         "commit": {"message": "Fix bug\n\nLong body", "author": {"name": "Ann", "date": "2024-02-01T10:00:00Z"}}}
    ]"#;

    fn full_fake() -> FakeGitHub {
        FakeGitHub::default()
            .ok("/repos/acme/widget", REPO_JSON)
            .ok(
                "/repos/acme/widget/contributors",
                r#"[{"login":"ann","avatar_url":"https://a/ann.png","html_url":"https://github.com/ann","contributions":10}]"#,
            )
            .ok("/repos/acme/widget/languages", r#"{"Rust": 1000, "HTML": 20}"#)
            .ok("/repos/acme/widget/readme", "# Widget\n")
            .ok("/repos/acme/widget/commits?per_page=5", COMMITS_JSON)
    }

    #[tokio::test]
    async fn test_aggregate_joins_all_sub_fetches() {
        let fake = full_fake();
        let aggregator = RepositoryAggregator::new(&fake, API, 5);
        let agg = aggregator.aggregate("https://github.com/acme/widget").await.unwrap();

        assert!(agg.warnings.is_empty());
        let s = &agg.snapshot;
        assert_eq!(s.name, "widget");
        assert_eq!(s.star_count, 42);
        assert_eq!(s.license_id.as_deref(), Some("MIT"));
        assert_eq!(s.homepage_url, None);
        assert!(s.is_archived);
        assert_eq!(s.contributors.len(), 1);
        assert_eq!(s.contributors[0].username, "ann");
        assert_eq!(s.language_histogram.keys().collect::<Vec<_>>(), vec!["HTML", "Rust"]);
        assert_eq!(s.readme_text.as_deref(), Some("# Widget\n"));
        assert_eq!(s.recent_commits.len(), 1);
        assert_eq!(s.recent_commits[0].message, "Fix bug");
        assert_eq!(s.recent_commits[0].author_name, "Ann");

        let calls = fake.calls.lock().unwrap();
        assert_eq!(calls.len(), 5);
        assert!(calls.iter().any(|(u, k)| u.ends_with("/readme") && *k == SourceKind::GitHubRaw));
    }

    #[tokio::test]
    async fn test_contributors_failure_keeps_repo_info() {
        let fake = full_fake().err(
            "/repos/acme/widget/contributors",
            FetchError::Timeout { url: "contributors".to_string() },
        );
        let aggregator = RepositoryAggregator::new(&fake, API, 5);
        let agg = aggregator.aggregate("https://github.com/acme/widget").await.unwrap();

        assert!(agg.snapshot.contributors.is_empty());
        assert_eq!(agg.snapshot.name, "widget");
        assert_eq!(agg.snapshot.star_count, 42);
        assert_eq!(agg.warnings.len(), 1);
        assert!(agg.missing(SubFetch::Contributors).is_some());
        assert!(agg.missing(SubFetch::Info).is_none());
    }

    #[tokio::test]
    async fn test_missing_readme_and_empty_contributors() {
        let fake = full_fake()
            .status("/repos/acme/widget/readme", 404)
            .ok("/repos/acme/widget/contributors", "");
        let aggregator = RepositoryAggregator::new(&fake, API, 5);
        let agg = aggregator.aggregate("https://github.com/acme/widget").await.unwrap();

        assert_eq!(agg.snapshot.readme_text, None);
        assert!(agg.snapshot.contributors.is_empty());
        let readme = agg.missing(SubFetch::Readme).unwrap();
        assert_eq!(readme.reason, "repository has no README");
        assert!(agg.missing(SubFetch::Contributors).is_none());
    }

    #[tokio::test]
    async fn test_info_failure_is_reported_not_raised() {
        let fake = full_fake()
            .status("/repos/acme/widget", 500)
            .ok("/repos/acme/widget/languages", "not json");
        let aggregator = RepositoryAggregator::new(&fake, API, 5);
        let agg = aggregator.aggregate("https://github.com/acme/widget.git").await.unwrap();

        assert!(agg.missing(SubFetch::Info).is_some());
        assert!(agg.missing(SubFetch::Languages).is_some());
        assert_eq!(agg.snapshot.name, "widget");
        assert_eq!(agg.snapshot.html_url, "https://github.com/acme/widget");
        assert_eq!(agg.snapshot.contributors.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_url_fails_before_any_request() {
        let fake = FakeGitHub::default();
        let aggregator = RepositoryAggregator::new(&fake, API, 5);
        let err = aggregator.aggregate("https://gitlab.com/acme/widget").await.unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRepoUrl(_)));
        assert!(fake.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_user_repositories() {
        let fake = FakeGitHub::default().ok(
            "/user/repos?sort=updated&per_page=100&page=1",
            r#"[{"html_url":"https://github.com/me/a"},{"html_url":"https://github.com/me/b"}]"#,
        );
        let aggregator = RepositoryAggregator::new(&fake, "https://api.test/", 5);
        let urls = aggregator.list_user_repositories().await.unwrap();
        assert_eq!(urls, vec!["https://github.com/me/a", "https://github.com/me/b"]);
    }

    #[test]
    fn test_extract_repo_info_round_trips() {
        let cases = [
            ("https://github.com/rust-lang/rust", "https://github.com/rust-lang/rust"),
            ("http://www.github.com/rust-lang/rust/", "https://github.com/rust-lang/rust"),
            ("https://github.com/tokio-rs/tokio.git", "https://github.com/tokio-rs/tokio"),
            ("https://GitHub.com/serde-rs/serde/tree/master/serde", "https://github.com/serde-rs/serde"),
            ("https://github.com/a/my.repo?tab=readme#top", "https://github.com/a/my.repo"),
        ];
        for (input, expected) in cases {
            let info = extract_repo_info(input).unwrap();
            let formatted = format_repo_url(&info);
            assert_eq!(formatted, expected, "{input}");
            assert_eq!(extract_repo_info(&formatted).unwrap(), info);
        }
    }

    #[test]
    fn test_extract_repo_info_rejects_malformed() {
        for bad in [
            "https://github.com/rust-lang",
            "https://github.com/",
            "ftp://github.com/a/b",
            "https://github.com.evil.io/a/b",
            "https://notgithub.com/a/b",
            "https://github.com/a/..",
            "github.com/a/b",
            "https://github.com/-bad/repo",
        ] {
            assert!(extract_repo_info(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_natural_key_is_lowercase() {
        let info = extract_repo_info("https://github.com/Rust-Lang/Rust").unwrap();
        assert_eq!(info.natural_key(), "rust-lang/rust");
    }
}
