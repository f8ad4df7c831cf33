//! HTTP access to scrape targets and the GitHub REST API.
//!
//! # Architecture
//!
//! - [`SourceFetcher`]: core trait, one request in, one [`RawDocument`] out
//! - [`HttpFetcher`]: reqwest implementation that picks a request identity per [`SourceKind`]
//! - [`RetryFetcher`]: decorator adding exponential backoff to any fetcher
//!
//! # Retry Strategy
//!
//! Only transient failures are retried (timeouts, connection failures, 5xx,
//! rate limits). The delay between attempts is
//!
//! ```text
//! delay = max(min(base_delay * 2^(attempt-1), max_delay), retry_after) + random_jitter(0..250ms)
//! ```
//!
//! with `retry_after` itself capped at `max_delay`.

use crate::config::Settings;
use crate::error::{ConfigError, FetchError};
use crate::models::{RawDocument, SourceKind};
use rand::{Rng, rng};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode, redirect::Policy};
use std::fmt;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const BROWSER_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const BROWSER_ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8";
const CSDN_REFERER: &str = "https://blog.csdn.net/";
const GITHUB_JSON_ACCEPT: &str = "application/vnd.github+json";
const GITHUB_RAW_ACCEPT: &str = "application/vnd.github.raw+json";
const GITHUB_API_VERSION: &str = "2022-11-28";

/// Fetches the raw content behind a URL.
///
/// Implementors never retry; wrap them in [`RetryFetcher`] for that.
pub trait SourceFetcher {
    async fn fetch(&self, url: &str, kind: SourceKind) -> Result<RawDocument, FetchError>;
}

impl<T: SourceFetcher> SourceFetcher for &T {
    async fn fetch(&self, url: &str, kind: SourceKind) -> Result<RawDocument, FetchError> {
        (**self).fetch(url, kind).await
    }
}

/// reqwest-backed fetcher.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    /// Ready-made `Authorization` value, marked sensitive.
    github_auth: Option<HeaderValue>,
}

impl fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("github_auth", &self.github_auth.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpFetcher {
    /// # Errors
    ///
    /// [`ConfigError::InvalidSetting`] when the token cannot be sent as a
    /// header value (control characters, line breaks), or
    /// [`ConfigError::HttpClient`] when reqwest fails to build the client.
    pub fn new(timeout: Duration, github_token: Option<String>) -> Result<Self, ConfigError> {
        let github_auth = github_token
            .map(|token| {
                let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                    ConfigError::InvalidSetting {
                        name: "github_token",
                        reason: format!("not usable as an HTTP header value ({e})"),
                    }
                })?;
                value.set_sensitive(true);
                Ok::<_, ConfigError>(value)
            })
            .transpose()?;
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .gzip(true)
            .redirect(Policy::limited(8))
            .build()?;
        Ok(Self {
            client,
            github_auth,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        Self::new(
            settings.request_timeout(),
            settings.github_token().map(str::to_string),
        )
    }

    fn headers_for(&self, kind: SourceKind) -> HeaderMap {
        let mut headers = HeaderMap::new();
        match kind {
            SourceKind::Csdn | SourceKind::Generic => {
                headers.insert(header::USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
                headers.insert(header::ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
                headers.insert(
                    header::ACCEPT_LANGUAGE,
                    HeaderValue::from_static(BROWSER_ACCEPT_LANGUAGE),
                );
                headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
                headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
                if kind == SourceKind::Csdn {
                    headers.insert(header::REFERER, HeaderValue::from_static(CSDN_REFERER));
                }
            }
            SourceKind::GitHubRepo | SourceKind::GitHubRaw => {
                let accept = if kind == SourceKind::GitHubRaw {
                    GITHUB_RAW_ACCEPT
                } else {
                    GITHUB_JSON_ACCEPT
                };
                headers.insert(
                    header::USER_AGENT,
                    HeaderValue::from_static(concat!("catalog_sync/", env!("CARGO_PKG_VERSION"))),
                );
                headers.insert(header::ACCEPT, HeaderValue::from_static(accept));
                headers.insert(
                    "X-GitHub-Api-Version",
                    HeaderValue::from_static(GITHUB_API_VERSION),
                );
                if let Some(auth) = &self.github_auth {
                    headers.insert(header::AUTHORIZATION, auth.clone());
                }
            }
        }
        headers
    }
}

impl SourceFetcher for HttpFetcher {
    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, url: &str, kind: SourceKind) -> Result<RawDocument, FetchError> {
        let t0 = Instant::now();
        let response = self
            .client
            .get(url)
            .headers(self.headers_for(kind))
            .send()
            .await
            .map_err(|e| transport_error(url, &e))?;

        let status = response.status();
        if let Some(err) = classify_status(url, status, response.headers(), unix_now()) {
            debug!(status = status.as_u16(), elapsed_ms = t0.elapsed().as_millis() as u64, "Request rejected");
            return Err(err);
        }

        let body = response.text().await.map_err(|e| transport_error(url, &e))?;
        debug!(
            status = status.as_u16(),
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched"
        );
        Ok(RawDocument {
            kind,
            url: url.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

fn transport_error(url: &str, e: &reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Unreachable {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Map a non-success response to a [`FetchError`].
///
/// 429, and 403 with an exhausted `x-ratelimit-remaining`, are rate limits.
/// The wait hint comes from `retry-after` (seconds) or `x-ratelimit-reset`
/// (epoch seconds, relative to `now`).
pub fn classify_status(
    url: &str,
    status: StatusCode,
    headers: &HeaderMap,
    now: u64,
) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }

    let header_u64 = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };
    let quota_exhausted = header_u64("x-ratelimit-remaining") == Some(0);

    if status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::FORBIDDEN && quota_exhausted) {
        let retry_after = header_u64("retry-after")
            .or_else(|| header_u64("x-ratelimit-reset").map(|reset| reset.saturating_sub(now)))
            .map(Duration::from_secs);
        return Some(FetchError::RateLimited {
            url: url.to_string(),
            retry_after,
        });
    }

    Some(FetchError::HttpStatus {
        url: url.to_string(),
        status: status.as_u16(),
    })
}

/// Wrapper that adds exponential backoff retry logic to any [`SourceFetcher`].
pub struct RetryFetcher<T> {
    inner: T,
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl<T> RetryFetcher<T>
where
    T: SourceFetcher,
{
    pub fn new(inner: T, max_retries: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn from_settings(inner: T, settings: &Settings) -> Self {
        Self::new(
            inner,
            settings.retry.max_retries,
            settings.retry.base_delay(),
            settings.retry.max_delay(),
        )
    }

    fn delay_for(&self, attempt: usize, err: &FetchError) -> Duration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let mut delay = self.base_delay.saturating_mul(1 << shift);
        if delay > self.max_delay {
            delay = self.max_delay;
        }
        if let FetchError::RateLimited {
            retry_after: Some(hint),
            ..
        } = err
        {
            delay = delay.max((*hint).min(self.max_delay));
        }
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + Duration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetryFetcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetcher")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> SourceFetcher for RetryFetcher<T>
where
    T: SourceFetcher,
{
    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, url: &str, kind: SourceKind) -> Result<RawDocument, FetchError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match self.inner.fetch(url, kind).await {
                Ok(doc) => return Ok(doc),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                            url = e.url(),
                            error = %e,
                            "fetch exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt, &e);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        ?delay,
                        error = %e,
                        "fetch attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Scripted {
        responses: Mutex<VecDeque<Result<RawDocument, FetchError>>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(responses: Vec<Result<RawDocument, FetchError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl SourceFetcher for Scripted {
        async fn fetch(&self, url: &str, _kind: SourceKind) -> Result<RawDocument, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::Timeout { url: url.to_string() }))
        }
    }

    fn ok_doc(url: &str) -> Result<RawDocument, FetchError> {
        Ok(RawDocument {
            kind: SourceKind::Generic,
            url: url.to_string(),
            status: 200,
            body: "ok".to_string(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_errors() {
        let url = "https://blog.csdn.net/a";
        let inner = Scripted::new(vec![
            Err(FetchError::Timeout { url: url.to_string() }),
            Err(FetchError::HttpStatus { url: url.to_string(), status: 503 }),
            ok_doc(url),
        ]);
        let fetcher = RetryFetcher::new(&inner, 3, Duration::from_millis(100), Duration::from_secs(1));

        let doc = fetcher.fetch(url, SourceKind::Csdn).await.unwrap();
        assert_eq!(doc.body, "ok");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_does_not_retry_client_errors() {
        let url = "https://blog.csdn.net/missing";
        let inner = Scripted::new(vec![Err(FetchError::HttpStatus { url: url.to_string(), status: 404 })]);
        let fetcher = RetryFetcher::new(&inner, 3, Duration::from_millis(100), Duration::from_secs(1));

        let err = fetcher.fetch(url, SourceKind::Csdn).await.unwrap_err();
        assert_eq!(err, FetchError::HttpStatus { url: url.to_string(), status: 404 });
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_retries() {
        let url = "https://api.github.com/repos/a/b";
        let inner = Scripted::new(vec![]);
        let fetcher = RetryFetcher::new(&inner, 2, Duration::from_millis(100), Duration::from_secs(1));

        let err = fetcher.fetch(url, SourceKind::GitHubRepo).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout { .. }));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_respects_rate_limit_hint_and_cap() {
        let inner = Scripted::new(vec![]);
        let fetcher = RetryFetcher::new(&inner, 3, Duration::from_millis(100), Duration::from_secs(5));
        let limited = FetchError::RateLimited {
            url: "u".to_string(),
            retry_after: Some(Duration::from_secs(60)),
        };
        let delay = fetcher.delay_for(1, &limited);
        assert!(delay >= Duration::from_secs(5));
        assert!(delay <= Duration::from_millis(5_250));

        let timeout = FetchError::Timeout { url: "u".to_string() };
        let delay = fetcher.delay_for(3, &timeout);
        assert!(delay >= Duration::from_millis(400));
        assert!(delay <= Duration::from_millis(650));
    }

    #[test]
    fn test_classify_status() {
        let mut headers = HeaderMap::new();
        assert!(classify_status("u", StatusCode::OK, &headers, 0).is_none());
        assert_eq!(
            classify_status("u", StatusCode::NOT_FOUND, &headers, 0),
            Some(FetchError::HttpStatus { url: "u".to_string(), status: 404 })
        );
        // 403 without quota headers is a plain permission error
        assert!(matches!(
            classify_status("u", StatusCode::FORBIDDEN, &headers, 0),
            Some(FetchError::HttpStatus { status: 403, .. })
        ));

        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1030"));
        assert_eq!(
            classify_status("u", StatusCode::FORBIDDEN, &headers, 1000),
            Some(FetchError::RateLimited {
                url: "u".to_string(),
                retry_after: Some(Duration::from_secs(30)),
            })
        );

        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("7"));
        assert_eq!(
            classify_status("u", StatusCode::TOO_MANY_REQUESTS, &headers, 0),
            Some(FetchError::RateLimited {
                url: "u".to_string(),
                retry_after: Some(Duration::from_secs(7)),
            })
        );
    }

    #[tokio::test]
    async fn test_http_fetcher_sends_github_identity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/a/b"))
            .and(header("authorization", "Bearer secret"))
            .and(header("accept", GITHUB_JSON_ACCEPT))
            .and(header("x-github-api-version", GITHUB_API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"name":"b"}"#))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(Duration::from_secs(5), Some("secret".to_string())).unwrap();
        let doc = fetcher
            .fetch(&format!("{}/repos/a/b", server.uri()), SourceKind::GitHubRepo)
            .await
            .unwrap();
        assert_eq!(doc.status, 200);
        assert_eq!(doc.body, r#"{"name":"b"}"#);
    }

    #[tokio::test]
    async fn test_http_fetcher_sends_browser_identity_for_csdn() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/article"))
            .and(header_exists("user-agent"))
            .and(header_exists("accept-language"))
            .and(header("referer", CSDN_REFERER))
            .and(header("pragma", "no-cache"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(Duration::from_secs(5), None).unwrap();
        let doc = fetcher
            .fetch(&format!("{}/article", server.uri()), SourceKind::Csdn)
            .await
            .unwrap();
        assert_eq!(doc.body, "<html></html>");
    }

    #[tokio::test]
    async fn test_http_fetcher_maps_status_and_timeout() {
        let server = MockServer::start().await;
        Mock::given(path("/gone"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;
        Mock::given(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(Duration::from_millis(300), None).unwrap();
        let gone = fetcher
            .fetch(&format!("{}/gone", server.uri()), SourceKind::Generic)
            .await
            .unwrap_err();
        assert!(matches!(gone, FetchError::HttpStatus { status: 410, .. }));

        let slow = fetcher
            .fetch(&format!("{}/slow", server.uri()), SourceKind::Generic)
            .await
            .unwrap_err();
        assert!(matches!(slow, FetchError::Timeout { .. }));
    }

    #[test]
    fn test_unusable_token_is_rejected_up_front() {
        let err = HttpFetcher::new(Duration::from_secs(1), Some("ghp_abc\n".to_string())).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { name: "github_token", .. }));
        assert!(!err.to_string().contains("ghp_abc"));
    }

    #[test]
    fn test_debug_redacts_token() {
        let fetcher = HttpFetcher::new(Duration::from_secs(1), Some("secret".to_string())).unwrap();
        let shown = format!("{fetcher:?}");
        assert!(!shown.contains("secret"));
    }
}
