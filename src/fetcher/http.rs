//! Variant B: challenge-solving HTTP client.
//!
//! Maintains a long-lived session with the catalog's GDPR-bypass cookies
//! pre-injected. A "poison counter" tracks consecutive 403/short-content
//! responses; at 2 the session is discarded and rebuilt with a fresh
//! User-Agent. Any 2xx resets the counter.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::cookie::Jar;
use reqwest::{Client, StatusCode};
use tracing::{info, instrument, warn};
use url::Url;

use super::signals::{BodyClassification, classify_body};
use super::{
    DEFAULT_RETRY_AFTER_SECS, FetchResult, Fetcher, FetcherError, FetcherErrorKind, backoff_for_attempt,
    dump_debug_html,
};
use crate::config::{Config, Locale, locale_accept_language, locale_cookie_value};

const POISON_THRESHOLD: u32 = 2;

/// Cookies the catalog requires to bypass its GDPR consent interstitial.
/// Injected into every session at construction.
const GDPR_BYPASS_COOKIES: &[(&str, &str)] = &[("OptanonAlertBoxClosed", "1"), ("CookieConsent", "true")];

/// Challenge-solving `reqwest`-based Fetcher (Variant B).
pub struct HttpFetcher {
    client: Client,
    jar: Arc<Jar>,
    user_agents: Vec<String>,
    ua_index: usize,
    poison_count: u32,
    max_retries: u32,
    min_delay: Duration,
    max_delay: Duration,
    debug_dumps: bool,
    logs_root: PathBuf,
    catalog_root: Url,
    timeout: Duration,
}

fn build_client(jar: Arc<Jar>, timeout: Duration) -> Result<Client, FetcherError> {
    Client::builder()
        .cookie_provider(jar)
        .timeout(timeout)
        .gzip(true)
        .build()
        .map_err(|err| FetcherError::new(FetcherErrorKind::SessionDead, err.to_string()))
}

impl HttpFetcher {
    /// Builds a fresh session against `catalog_root`, seeding the GDPR-bypass
    /// cookies immediately so the first request never hits the consent wall.
    ///
    /// # Errors
    ///
    /// Returns `FetcherError::SessionDead` if the HTTP client fails to build.
    pub fn new(config: &Config, catalog_root: Url) -> Result<Self, FetcherError> {
        let jar = Arc::new(Jar::default());
        for (name, value) in GDPR_BYPASS_COOKIES {
            jar.add_cookie_str(&format!("{name}={value}"), &catalog_root);
        }
        let client = build_client(jar.clone(), config.browser_timeout)?;

        Ok(Self {
            client,
            jar,
            user_agents: config.user_agents.clone(),
            ua_index: 0,
            poison_count: 0,
            max_retries: config.max_retries,
            min_delay: config.min_request_delay,
            max_delay: config.max_request_delay,
            debug_dumps: config.debug_html_dumps,
            logs_root: config.logs_root.clone(),
            catalog_root,
            timeout: config.browser_timeout,
        })
    }

    fn current_user_agent(&self) -> &str {
        self.user_agents
            .get(self.ua_index % self.user_agents.len().max(1))
            .map_or("Mozilla/5.0", String::as_str)
    }

    fn rotate_user_agent(&mut self) {
        self.ua_index = self.ua_index.wrapping_add(1);
    }

    /// Discards the session: fresh cookie jar (re-seeded), fresh client, next
    /// User-Agent in rotation, poison counter reset.
    fn rebuild_session(&mut self) -> Result<(), FetcherError> {
        self.rotate_user_agent();
        let jar = Arc::new(Jar::default());
        for (name, value) in GDPR_BYPASS_COOKIES {
            jar.add_cookie_str(&format!("{name}={value}"), &self.catalog_root);
        }
        self.client = build_client(jar.clone(), self.timeout)?;
        self.jar = jar;
        self.poison_count = 0;
        Ok(())
    }

    fn set_locale_cookie(&self, locale: Locale) {
        let value = locale_cookie_value(locale);
        self.jar.add_cookie_str(&format!("bkng_locale={value}"), &self.catalog_root);
    }

    async fn sleep_before_attempt(&self, attempt: u32) {
        let base = if self.max_delay > self.min_delay {
            let span = (self.max_delay - self.min_delay).as_millis() as u64;
            let extra = rand::thread_rng().gen_range(0..=span);
            self.min_delay + Duration::from_millis(extra)
        } else {
            self.min_delay
        };
        let delay = backoff_for_attempt(base, attempt);
        tokio::time::sleep(delay).await;
    }

    async fn dump_if_enabled(&self, url: &str, kind: FetcherErrorKind, html: &str) {
        if self.debug_dumps {
            dump_debug_html(&self.logs_root, url, kind, html).await;
        }
    }

    async fn attempt(&mut self, url: &str, locale: Locale, attempt_no: u32) -> Result<FetchResult, FetcherError> {
        self.set_locale_cookie(locale);

        let response = self
            .client
            .get(url)
            .header("Accept-Language", locale_accept_language(locale))
            .header("User-Agent", self.current_user_agent().to_string())
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    FetcherError::new(FetcherErrorKind::Timeout, err.to_string())
                } else {
                    FetcherError::new(FetcherErrorKind::SessionDead, err.to_string())
                }
            })?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(FetcherError::rate_limited(Duration::from_secs(retry_after)));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(FetcherError::new(FetcherErrorKind::NotFound, "404"));
        }
        if status == StatusCode::FORBIDDEN {
            self.poison_count += 1;
            let body = response.text().await.unwrap_or_default();
            self.dump_if_enabled(url, FetcherErrorKind::Blocked, &body).await;
            return Err(FetcherError::new(FetcherErrorKind::Blocked, "403 forbidden"));
        }
        if status.is_server_error() {
            return Err(FetcherError::new(FetcherErrorKind::ServerError, status.to_string()));
        }
        if !status.is_success() {
            return Err(FetcherError::new(FetcherErrorKind::SessionDead, status.to_string()));
        }

        let html = response.text().await.map_err(|err| {
            FetcherError::new(FetcherErrorKind::SessionDead, err.to_string())
        })?;

        match classify_body(&html) {
            BodyClassification::RealListing => {
                self.poison_count = 0;
                let html_length = html.len();
                let page_title = html
                    .split("<title>")
                    .nth(1)
                    .and_then(|rest| rest.split("</title>").next())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                Ok(FetchResult { html, http_status: status.as_u16(), page_title, html_length })
            }
            BodyClassification::ShortContent => {
                self.poison_count += 1;
                self.dump_if_enabled(url, FetcherErrorKind::ShortContent, &html).await;
                Err(FetcherError::new(FetcherErrorKind::ShortContent, format!("{} bytes", html.len())))
            }
            BodyClassification::Blocked => {
                self.poison_count += 1;
                self.dump_if_enabled(url, FetcherErrorKind::Blocked, &html).await;
                Err(FetcherError::new(FetcherErrorKind::Blocked, "block signal detected"))
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn cookie_jar(&self) -> Arc<Jar> {
        self.jar.clone()
    }

    async fn discard_session(&mut self) {
        if let Err(err) = self.rebuild_session() {
            warn!(%err, "failed to rebuild session on forced discard");
        }
    }

    #[instrument(skip(self))]
    async fn fetch(&mut self, url: &str, locale: Locale) -> Result<FetchResult, FetcherError> {
        let mut last_err = None;

        for attempt_no in 1..=self.max_retries.max(1) {
            if self.poison_count >= POISON_THRESHOLD {
                if let Err(err) = self.rebuild_session() {
                    return Err(err);
                }
                info!("session poisoned twice, rebuilt with fresh identity");
            }

            self.sleep_before_attempt(attempt_no).await;

            match self.attempt(url, locale, attempt_no).await {
                Ok(result) => return Ok(result),
                Err(err) if err.kind == FetcherErrorKind::NotFound => return Err(err),
                Err(err) => {
                    warn!(attempt = attempt_no, kind = ?err.kind, "fetch attempt failed");
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| FetcherError::new(FetcherErrorKind::SessionDead, "exhausted retries")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_config() -> Config {
        let mut config = Config::default_for_test();
        config.max_retries = 1;
        config.min_request_delay = Duration::from_millis(1);
        config.max_request_delay = Duration::from_millis(2);
        config
    }

    #[test]
    fn test_new_seeds_gdpr_cookies() {
        use reqwest::cookie::CookieStore;
        let config = test_config();
        let root = Url::parse("https://www.example.com/").expect("valid url");
        let fetcher = HttpFetcher::new(&config, root.clone()).expect("builds");
        let header = fetcher.jar.cookies(&root);
        assert!(header.is_some());
    }

    #[test]
    fn test_current_user_agent_rotates() {
        let config = test_config();
        let root = Url::parse("https://www.example.com/").expect("valid url");
        let mut fetcher = HttpFetcher::new(&config, root).expect("builds");
        let first = fetcher.current_user_agent().to_string();
        fetcher.rotate_user_agent();
        let second = fetcher.current_user_agent().to_string();
        assert_ne!(first, second);
    }

    #[test]
    fn test_rebuild_session_resets_poison_count() {
        let config = test_config();
        let root = Url::parse("https://www.example.com/").expect("valid url");
        let mut fetcher = HttpFetcher::new(&config, root).expect("builds");
        fetcher.poison_count = 2;
        fetcher.rebuild_session().expect("rebuilds");
        assert_eq!(fetcher.poison_count, 0);
    }
}
