//! Sync orchestration: one URL, a batch of URLs, or every tracked project.
//!
//! Each item walks the same pipeline:
//!
//! ```text
//! Pending → Fetching → Parsing → Canonicalizing → Resolving → Persisting → Created | Updated
//! ```
//!
//! and stops with `Failed(stage, reason)` at the first stage that errors.
//! Routing is by host:
//!
//! | Host | Route | Fetches |
//! |------|-------|---------|
//! | `*.csdn.net` | CSDN article | the page |
//! | `github.com`, `www.github.com` | GitHub project | five API sub-fetches |
//! | anything else | placeholder article | none |
//!
//! # Batches
//!
//! Items run concurrently up to `concurrency`, outcomes come back in input
//! order, and one failing item never affects another. Cancelling the token
//! stops dispatch of further items; items already in flight finish and are
//! counted. Configuration problems that make the whole batch pointless (a
//! GitHub item without a token) fail the batch before anything is fetched.

use crate::canonical::{canonicalize_article, canonicalize_project, other_stub};
use crate::config::Settings;
use crate::dedup::{DedupGate, DedupPolicy, Resolution, normalize_article_url, parse_source_url};
use crate::error::{ConfigError, SyncError};
use crate::fetcher::SourceFetcher;
use crate::models::{
    BatchReport, CanonicalRecord, PartialAggregationWarning, SourceKind, Stage, SubFetch,
    SyncOutcome,
};
use crate::report::SyncReporter;
use crate::scrapers::csdn::{CsdnExtractor, is_csdn_host};
use crate::scrapers::github::{RepositoryAggregator, extract_repo_info, is_github_host};
use crate::store::CatalogStore;
use chrono::Utc;
use futures::{StreamExt, future, stream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Where a URL goes, with its natural key.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Csdn { key: String },
    GitHub { key: String },
    Other { key: String },
}

impl Route {
    fn key(&self) -> &str {
        match self {
            Route::Csdn { key } | Route::GitHub { key } | Route::Other { key } => key,
        }
    }
}

fn route(url: &str) -> Result<Route, ConfigError> {
    let parsed = parse_source_url(url)?;
    let host = parsed.host_str().unwrap_or_default();
    if is_github_host(host) {
        let info = extract_repo_info(url)?;
        Ok(Route::GitHub { key: info.natural_key() })
    } else if is_csdn_host(host) {
        Ok(Route::Csdn { key: normalize_article_url(url)? })
    } else {
        Ok(Route::Other { key: normalize_article_url(url)? })
    }
}

fn targets_github(url: &str) -> bool {
    parse_source_url(url)
        .map(|parsed| parsed.host_str().is_some_and(is_github_host))
        .unwrap_or(false)
}

/// Drives fetch, extraction, canonicalization, dedup and storage.
pub struct SyncOrchestrator<F, S, R> {
    fetcher: F,
    store: S,
    reporter: R,
    settings: Settings,
    extractor: CsdnExtractor,
    gate: DedupGate,
}

impl<F, S, R> SyncOrchestrator<F, S, R>
where
    F: SourceFetcher,
    S: CatalogStore,
    R: SyncReporter,
{
    pub fn new(fetcher: F, store: S, reporter: R, settings: Settings) -> Self {
        let policy = if settings.skip_existing {
            DedupPolicy::SkipExisting
        } else {
            DedupPolicy::Upsert
        };
        Self {
            fetcher,
            store,
            reporter,
            settings,
            extractor: CsdnExtractor::new(),
            gate: DedupGate::new(policy),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn require_github_token(&self) -> Result<(), ConfigError> {
        self.settings
            .github_token()
            .map(|_| ())
            .ok_or(ConfigError::MissingGithubToken)
    }

    fn aggregator(&self) -> RepositoryAggregator<&F> {
        RepositoryAggregator::new(
            &self.fetcher,
            &self.settings.github_api_base,
            self.settings.commit_limit,
        )
    }

    /// Import a single article or repository.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] when the URL is malformed, or targets GitHub without
    /// a configured token. Everything after that is reported as a
    /// [`SyncOutcome::Failed`].
    #[instrument(level = "info", skip_all, fields(%url))]
    pub async fn import_one(&self, url: &str) -> Result<SyncOutcome, ConfigError> {
        let outcome = self.process(url).await?;
        self.reporter.emit(&outcome);
        Ok(outcome)
    }

    async fn process(&self, url: &str) -> Result<SyncOutcome, ConfigError> {
        let route = route(url)?;
        debug!(natural_key = route.key(), ?route, "Routed URL");
        let outcome = match route {
            Route::Csdn { key } => self.sync_article(url, key).await,
            Route::GitHub { key } => {
                self.require_github_token()?;
                self.sync_project(url, key).await?
            }
            Route::Other { key } => {
                let record = CanonicalRecord::Article(other_stub(&key, url, Utc::now()));
                self.persist(record, Vec::new()).await
            }
        };
        Ok(outcome)
    }

    async fn sync_article(&self, url: &str, key: String) -> SyncOutcome {
        let doc = match self.fetcher.fetch(url, SourceKind::Csdn).await {
            Ok(doc) => doc,
            Err(e) => return SyncOutcome::failed(key, Stage::Fetching, e),
        };
        let extracted = match self.extractor.extract(&doc) {
            Ok(article) => article,
            Err(e) => return SyncOutcome::failed(key, Stage::Parsing, e),
        };
        let record = CanonicalRecord::Article(canonicalize_article(&key, &extracted, Utc::now()));
        self.persist(record, Vec::new()).await
    }

    async fn sync_project(&self, url: &str, key: String) -> Result<SyncOutcome, ConfigError> {
        let aggregation = self.aggregator().aggregate(url).await?;
        if let Some(missing) = aggregation.missing(SubFetch::Info) {
            return Ok(SyncOutcome::failed(
                key,
                Stage::Fetching,
                format!("repository info unavailable: {}", missing.reason),
            ));
        }
        let record = CanonicalRecord::Project(canonicalize_project(&aggregation.snapshot, Utc::now()));
        Ok(self.persist(record, aggregation.warnings).await)
    }

    async fn persist(
        &self,
        record: CanonicalRecord,
        warnings: Vec<PartialAggregationWarning>,
    ) -> SyncOutcome {
        let collection = record.collection();
        let key = record.natural_key().to_string();

        let resolution = match self.gate.check(&self.store, collection, &key).await {
            Ok(resolution) => resolution,
            Err(e) => return SyncOutcome::failed(key, Stage::Resolving, e),
        };

        let stored: Result<SyncOutcome, SyncError> = match resolution {
            Resolution::Reject(duplicate) => {
                return SyncOutcome::failed(key, Stage::Resolving, SyncError::from(duplicate));
            }
            Resolution::Insert => self
                .store
                .insert(record.clone())
                .await
                .map(|id| SyncOutcome::Created { id, record, warnings })
                .map_err(SyncError::from),
            Resolution::UpdateExisting(id) => self
                .store
                .update(id, record.clone())
                .await
                .map(|()| SyncOutcome::Updated { id, record, warnings })
                .map_err(SyncError::from),
        };
        stored.unwrap_or_else(|e| SyncOutcome::failed(key, Stage::Persisting, e))
    }

    /// Sync every URL, at most `concurrency` at a time.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingGithubToken`] when any URL targets GitHub and no
    /// token is configured; nothing is fetched in that case. Per-item
    /// configuration problems (a malformed URL) become `Failed(pending)`.
    #[instrument(level = "info", skip_all, fields(total = urls.len()))]
    pub async fn sync_batch(
        &self,
        urls: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, ConfigError> {
        let started_at = Utc::now();
        let total = urls.len();

        if urls.iter().any(|url| targets_github(url)) {
            self.require_github_token()?;
        }

        let concurrency = self.settings.concurrency.max(1);
        info!(total, concurrency, "Starting batch");

        let outcomes: Vec<SyncOutcome> = stream::iter(urls.iter())
            .take_while(|_| future::ready(!cancel.is_cancelled()))
            .map(|url| async move {
                let outcome = match self.process(url).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        let key = normalize_article_url(url).unwrap_or_else(|_| url.trim().to_string());
                        SyncOutcome::failed(key, Stage::Pending, e)
                    }
                };
                self.reporter.emit(&outcome);
                outcome
            })
            .buffered(concurrency)
            .collect()
            .await;

        let cancelled = cancel.is_cancelled();
        if cancelled {
            warn!(dispatched = outcomes.len(), total, "Batch cancelled");
        }

        let report = BatchReport::from_outcomes(total, outcomes, cancelled, started_at, Utc::now());
        self.reporter.batch_finished(&report);
        Ok(report)
    }

    /// Sync the configured tracked projects, or every repository of the
    /// token's user when none are configured.
    #[instrument(level = "info", skip_all)]
    pub async fn sync_tracked_projects(
        &self,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, SyncError> {
        self.require_github_token()?;
        let urls = if self.settings.tracked_projects.is_empty() {
            self.aggregator().list_user_repositories().await?
        } else {
            self.settings.tracked_projects.clone()
        };
        info!(count = urls.len(), "Syncing tracked projects");
        Ok(self.sync_batch(urls, cancel).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::models::{Platform, RawDocument, RecordId};
    use crate::report::RecordingReporter;
    use crate::store::MemoryStore;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const API: &str = "https://api.test";

    /// Canned responses by URL; unknown URLs are 404s.
    #[derive(Default)]
    struct FakeWeb {
        routes: HashMap<String, Result<String, FetchError>>,
        calls: Mutex<Vec<String>>,
        cancel_on_call: Option<(usize, CancellationToken)>,
    }

    impl FakeWeb {
        fn page(mut self, url: &str, body: &str) -> Self {
            self.routes.insert(url.to_string(), Ok(body.to_string()));
            self
        }

        fn fail(mut self, url: &str, err: FetchError) -> Self {
            self.routes.insert(url.to_string(), Err(err));
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl SourceFetcher for FakeWeb {
        async fn fetch(&self, url: &str, kind: SourceKind) -> Result<RawDocument, FetchError> {
            let count = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(url.to_string());
                calls.len()
            };
            if let Some((n, token)) = &self.cancel_on_call
                && *n == count
            {
                token.cancel();
            }
            match self.routes.get(url) {
                Some(Ok(body)) => Ok(RawDocument {
                    kind,
                    url: url.to_string(),
                    status: 200,
                    body: body.clone(),
                }),
                Some(Err(e)) => Err(e.clone()),
                None => Err(FetchError::HttpStatus { url: url.to_string(), status: 404 }),
            }
        }
    }

    fn csdn_url(n: usize) -> String {
        format!("https://blog.csdn.net/someone/article/details/{n}")
    }

    fn csdn_page(title: &str) -> String {
        format!(
            r#"<html><body><h1 class="title-article">{title}</h1>
               <div id="content_views"><p>{}</p></div></body></html>"#,
            "字".repeat(1200)
        )
    }

    fn settings() -> Settings {
        Settings {
            github_api_base: API.to_string(),
            ..Settings::default()
        }
    }

    fn with_token() -> Settings {
        Settings {
            github_token: Some("token".to_string()),
            ..settings()
        }
    }

    fn github_web() -> FakeWeb {
        FakeWeb::default()
            .page(
                &format!("{API}/repos/acme/widget"),
                r#"{"name":"widget","html_url":"https://github.com/acme/widget","stargazers_count":3,"topics":["web"]}"#,
            )
            .page(&format!("{API}/repos/acme/widget/languages"), r#"{"Rust": 10}"#)
            .page(&format!("{API}/repos/acme/widget/readme"), "# widget")
            .page(&format!("{API}/repos/acme/widget/commits?per_page=5"), "[]")
            .fail(
                &format!("{API}/repos/acme/widget/contributors"),
                FetchError::Timeout { url: "contributors".to_string() },
            )
    }

    #[tokio::test]
    async fn test_import_twice_creates_then_updates() {
        let tracked_url = format!("{}?spm=1001#comments", csdn_url(1));
        let web = FakeWeb::default()
            .page(&csdn_url(1), &csdn_page("Hello"))
            .page(&tracked_url, &csdn_page("Hello again"));
        let store = MemoryStore::new();
        let reporter = RecordingReporter::default();
        let sync = SyncOrchestrator::new(&web, &store, &reporter, settings());

        let first = sync.import_one(&csdn_url(1)).await.unwrap();
        let second = sync.import_one(&tracked_url).await.unwrap();

        match (&first, &second) {
            (SyncOutcome::Created { id: a, record, .. }, SyncOutcome::Updated { id: b, .. }) => {
                assert_eq!(a, b);
                match record {
                    CanonicalRecord::Article(article) => {
                        assert_eq!(article.title, "Hello");
                        assert_eq!(article.tags, vec!["CSDN".to_string(), "技术".to_string()]);
                        assert_eq!(article.read_time_minutes, 3);
                        assert_eq!(article.platform, Platform::Csdn);
                        assert!(article.content_html.starts_with("<p>字"));
                    }
                    other => panic!("unexpected record {other:?}"),
                }
            }
            other => panic!("unexpected outcomes {other:?}"),
        }
        assert_eq!(store.len(), 1);
        assert_eq!(reporter.outcomes.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_skip_existing_rejects_second_import() {
        let web = FakeWeb::default().page(&csdn_url(1), &csdn_page("Hello"));
        let store = MemoryStore::new();
        let sync = SyncOrchestrator::new(
            &web,
            &store,
            RecordingReporter::default(),
            Settings { skip_existing: true, ..settings() },
        );

        sync.import_one(&csdn_url(1)).await.unwrap();
        let second = sync.import_one(&csdn_url(1)).await.unwrap();
        assert!(matches!(second, SyncOutcome::Failed { stage: Stage::Resolving, .. }));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_other_host_becomes_stub_without_fetching() {
        let web = FakeWeb::default();
        let sync = SyncOrchestrator::new(&web, MemoryStore::new(), RecordingReporter::default(), settings());

        let outcome = sync.import_one("https://example.org/post").await.unwrap();
        let record = outcome.record().unwrap();
        match record {
            CanonicalRecord::Article(article) => {
                assert_eq!(article.platform, Platform::Other);
                assert_eq!(article.read_time_minutes, 5);
                assert_eq!(article.natural_key, "https://example.org/post");
            }
            other => panic!("unexpected record {other:?}"),
        }
        assert!(web.calls().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_and_parse_failures_carry_stage() {
        let web = FakeWeb::default()
            .fail(&csdn_url(1), FetchError::Timeout { url: csdn_url(1) })
            .page(&csdn_url(2), "<html><body><p>nothing here</p></body></html>");
        let sync = SyncOrchestrator::new(&web, MemoryStore::new(), RecordingReporter::default(), settings());

        let fetch_failed = sync.import_one(&csdn_url(1)).await.unwrap();
        assert!(matches!(fetch_failed, SyncOutcome::Failed { stage: Stage::Fetching, .. }));
        let parse_failed = sync.import_one(&csdn_url(2)).await.unwrap();
        match parse_failed {
            SyncOutcome::Failed { stage, natural_key, reason } => {
                assert_eq!(stage, Stage::Parsing);
                assert_eq!(natural_key, csdn_url(2));
                assert!(reason.contains("no title or body"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_batch_isolates_failing_item() {
        let mut web = FakeWeb::default();
        for n in 1..=5 {
            web = web.page(&csdn_url(n), &csdn_page(&format!("Post {n}")));
        }
        let web = web.fail(&csdn_url(3), FetchError::HttpStatus { url: csdn_url(3), status: 500 });
        let reporter = RecordingReporter::default();
        let sync = SyncOrchestrator::new(&web, MemoryStore::new(), &reporter, settings());

        let urls: Vec<String> = (1..=5).map(csdn_url).collect();
        let report = sync.sync_batch(urls, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.total, 5);
        assert_eq!(report.created_count, 4);
        assert_eq!(report.failed_count, 1);
        assert_eq!(report.skipped_count, 0);
        assert!(!report.cancelled);
        let keys: Vec<&str> = report.outcomes.iter().map(SyncOutcome::natural_key).collect();
        let expected: Vec<String> = (1..=5).map(csdn_url).collect();
        assert_eq!(keys, expected.iter().map(String::as_str).collect::<Vec<_>>());
        assert!(report.outcomes[2].is_failed());
        assert_eq!(reporter.reports.lock().unwrap().len(), 1);
        assert_eq!(reporter.outcomes.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_batch_malformed_url_is_pending_failure() {
        let web = FakeWeb::default().page(&csdn_url(1), &csdn_page("Hello"));
        let sync = SyncOrchestrator::new(&web, MemoryStore::new(), RecordingReporter::default(), settings());

        let urls = vec!["not a url".to_string(), csdn_url(1)];
        let report = sync.sync_batch(urls, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.failed_count, 1);
        assert_eq!(report.created_count, 1);
        assert!(matches!(
            &report.outcomes[0],
            SyncOutcome::Failed { stage: Stage::Pending, natural_key, .. } if natural_key == "not a url"
        ));
    }

    #[tokio::test]
    async fn test_batch_with_github_item_needs_token() {
        let web = FakeWeb::default();
        let sync = SyncOrchestrator::new(&web, MemoryStore::new(), RecordingReporter::default(), settings());

        let urls = vec![csdn_url(1), "https://github.com/acme/widget".to_string()];
        let err = sync.sync_batch(urls, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ConfigError::MissingGithubToken));
        assert!(web.calls().is_empty());

        let err = sync.import_one("https://github.com/acme/widget").await.unwrap_err();
        assert!(matches!(err, ConfigError::MissingGithubToken));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_dispatches_nothing() {
        let web = FakeWeb::default();
        let sync = SyncOrchestrator::new(&web, MemoryStore::new(), RecordingReporter::default(), settings());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = sync.sync_batch((1..=3).map(csdn_url).collect(), &cancel).await.unwrap();
        assert!(report.cancelled);
        assert!(report.outcomes.is_empty());
        assert_eq!(report.skipped_count, 3);
        assert!(web.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_finishes_in_flight_item() {
        let cancel = CancellationToken::new();
        let mut web = FakeWeb {
            cancel_on_call: Some((2, cancel.clone())),
            ..FakeWeb::default()
        };
        for n in 1..=5 {
            web = web.page(&csdn_url(n), &csdn_page("Post"));
        }
        let sync = SyncOrchestrator::new(
            &web,
            MemoryStore::new(),
            RecordingReporter::default(),
            Settings { concurrency: 1, ..settings() },
        );

        let report = sync.sync_batch((1..=5).map(csdn_url).collect(), &cancel).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.created_count, 2);
        assert_eq!(report.skipped_count, 3);
        assert_eq!(
            report.created_count + report.updated_count + report.failed_count + report.skipped_count,
            report.total
        );
    }

    #[tokio::test]
    async fn test_project_import_keeps_partial_warnings() {
        let web = github_web();
        let store = MemoryStore::new();
        let sync = SyncOrchestrator::new(&web, &store, RecordingReporter::default(), with_token());

        let outcome = sync.import_one("https://github.com/acme/widget/tree/main").await.unwrap();
        match outcome {
            SyncOutcome::Created { id, record: CanonicalRecord::Project(project), warnings } => {
                assert_eq!(id, RecordId(1));
                assert_eq!(project.natural_key, "acme/widget");
                assert_eq!(project.stats.stars, 3);
                assert_eq!(project.technologies, vec!["Rust".to_string()]);
                assert!(project.contributors.is_empty());
                assert_eq!(warnings.len(), 1);
                assert_eq!(warnings[0].sub_fetch, SubFetch::Contributors);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_project_without_repo_info_fails_at_fetching() {
        let web = github_web().fail(
            &format!("{API}/repos/acme/widget"),
            FetchError::HttpStatus { url: "info".to_string(), status: 404 },
        );
        let store = MemoryStore::new();
        let sync = SyncOrchestrator::new(&web, &store, RecordingReporter::default(), with_token());

        let outcome = sync.import_one("https://github.com/acme/widget").await.unwrap();
        assert!(matches!(
            &outcome,
            SyncOutcome::Failed { stage: Stage::Fetching, natural_key, .. } if natural_key == "acme/widget"
        ));
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_invalid_repo_url_is_config_error() {
        let sync = SyncOrchestrator::new(FakeWeb::default(), MemoryStore::new(), RecordingReporter::default(), with_token());
        let err = sync.import_one("https://github.com/only-owner").await.unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRepoUrl(_)));
    }

    #[tokio::test]
    async fn test_sync_tracked_projects_uses_configured_list() {
        let web = github_web();
        let settings = Settings {
            tracked_projects: vec!["https://github.com/acme/widget".to_string()],
            ..with_token()
        };
        let sync = SyncOrchestrator::new(&web, MemoryStore::new(), RecordingReporter::default(), settings);

        let report = sync.sync_tracked_projects(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.created_count, 1);
        assert!(!web.calls().iter().any(|u| u.contains("/user/repos")));
    }

    #[tokio::test]
    async fn test_sync_tracked_projects_lists_user_repos_when_empty() {
        let web = github_web().page(
            &format!("{API}/user/repos?sort=updated&per_page=100&page=1"),
            r#"[{"html_url":"https://github.com/acme/widget"}]"#,
        );
        let sync = SyncOrchestrator::new(&web, MemoryStore::new(), RecordingReporter::default(), with_token());

        let report = sync.sync_tracked_projects(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.created_count, 1);
        assert_eq!(report.outcomes[0].natural_key(), "acme/widget");
    }
}
