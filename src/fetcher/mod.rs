//! HTTP Fetcher (C6): produces HTML for `(url, locale)` behind one object-safe
//! trait, so the Worker can hold either fetcher variant as `Box<dyn Fetcher>`
//! chosen once at construction and never switched mid-listing.

pub mod browser;
pub mod http;
mod signals;

pub use browser::BrowserFetcher;
pub use http::HttpFetcher;
pub use signals::{BLOCK_SIGNALS, BodyClassification, MIN_REAL_CONTENT_LEN, REAL_LISTING_SIGNALS, classify_body};

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::cookie::Jar;
use thiserror::Error;
use tokio::fs;
use tracing::warn;

use crate::config::Locale;

/// Maximum backoff between retries, regardless of attempt number.
pub const MAX_BACKOFF: Duration = Duration::from_secs(25);

/// Default `Retry-After` assumed for a 429 response that doesn't specify one.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 90;

/// Maximum bytes of a failing response body persisted to the debug directory.
const DEBUG_DUMP_MAX_BYTES: usize = 120 * 1024;

/// Successful fetch result.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub html: String,
    pub http_status: u16,
    pub page_title: Option<String>,
    pub html_length: usize,
}

/// Why a fetch attempt failed, after exhausting its retry budget.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FetcherErrorKind {
    #[error("blocked")]
    Blocked,
    #[error("rate_limited")]
    RateLimited,
    #[error("not_found")]
    NotFound,
    #[error("server_error")]
    ServerError,
    #[error("short_content")]
    ShortContent,
    #[error("session_dead")]
    SessionDead,
    #[error("timeout")]
    Timeout,
}

#[derive(Debug, Error)]
#[error("fetch failed ({kind}): {message}")]
pub struct FetcherError {
    pub kind: FetcherErrorKind,
    pub message: String,
    /// Present only for `RateLimited`: how long the caller should wait before
    /// the next attempt.
    pub retry_after: Option<Duration>,
}

impl FetcherError {
    #[must_use]
    pub fn new(kind: FetcherErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), retry_after: None }
    }

    #[must_use]
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self {
            kind: FetcherErrorKind::RateLimited,
            message: format!("rate limited, retry after {}s", retry_after.as_secs()),
            retry_after: Some(retry_after),
        }
    }
}

/// Produces HTML for `(url, locale)`. Implementations own their own
/// session/cookie state and are not required to be reentrant: the Worker
/// drives one fetch at a time per instance.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&mut self, url: &str, locale: Locale) -> Result<FetchResult, FetcherError>;

    /// Cookies accumulated over this fetcher's session, handed to the Image
    /// Downloader so its requests pass the catalog CDN's authentication check.
    /// Default implementation returns an empty jar for fetchers with nothing
    /// worth harvesting.
    async fn cookie_jar(&self) -> Arc<Jar> {
        Arc::new(Jar::default())
    }

    /// Forces the next `fetch` call to start from a fresh session (fresh
    /// cookies, fresh User-Agent). Used by the Worker's locale-mismatch retry
    /// path (§4.9 step 6e) to rule out session poisoning as the cause.
    async fn discard_session(&mut self) {}

    /// Releases any held resources (browser process, connection pool). Called
    /// once after the Worker finishes all locales for a listing.
    async fn shutdown(&mut self) {}
}

/// Backoff for attempt `n` (1-based), scaled multiplicatively from `base` and
/// capped at [`MAX_BACKOFF`].
#[must_use]
pub fn backoff_for_attempt(base: Duration, attempt: u32) -> Duration {
    let scaled = base.saturating_mul(attempt.max(1));
    scaled.min(MAX_BACKOFF)
}

fn slugify(url: &str) -> String {
    let slug: String = url
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    slug.chars().rev().take(80).collect::<Vec<_>>().into_iter().rev().collect()
}

/// Persists a truncated copy of a failing response body under
/// `{logs_root}/debug/`, keyed by URL slug, timestamp, and failure kind.
/// Best-effort: a write failure is logged, never propagated.
pub async fn dump_debug_html(logs_root: &Path, url: &str, kind: FetcherErrorKind, html: &str) {
    let debug_dir = logs_root.join("debug");
    if let Err(err) = fs::create_dir_all(&debug_dir).await {
        warn!(%err, "failed to create debug dump directory");
        return;
    }

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let truncated = html.as_bytes().get(..DEBUG_DUMP_MAX_BYTES).unwrap_or(html.as_bytes());

    let path = debug_dir.join(format!("{}_{}_{:?}.html", slugify(url), timestamp, kind));
    if let Err(err) = fs::write(&path, truncated).await {
        warn!(%err, path = %path.display(), "failed to write debug html dump");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_scales_with_attempt() {
        let base = Duration::from_secs(2);
        assert_eq!(backoff_for_attempt(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_for_attempt(base, 3), Duration::from_secs(6));
    }

    #[test]
    fn test_backoff_capped_at_max() {
        let base = Duration::from_secs(10);
        assert_eq!(backoff_for_attempt(base, 10), MAX_BACKOFF);
    }

    #[test]
    fn test_slugify_truncates_and_strips_punctuation() {
        let slug = slugify("https://www.example.com/hotel/very-long-name.en.html");
        assert!(slug.len() <= 80);
        assert!(!slug.contains(['/', '.', ':']));
    }

    #[tokio::test]
    async fn test_dump_debug_html_writes_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        dump_debug_html(dir.path(), "https://example.com/a.html", FetcherErrorKind::Blocked, "<html>blocked</html>")
            .await;
        let debug_dir = dir.path().join("debug");
        let mut entries = tokio::fs::read_dir(&debug_dir).await.expect("read debug dir");
        let entry = entries.next_entry().await.expect("read entry").expect("one entry");
        assert!(entry.file_name().to_string_lossy().contains("Blocked"));
    }
}
