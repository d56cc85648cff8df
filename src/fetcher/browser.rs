//! Variant A: headless-browser driver over the Chrome DevTools Protocol.
//!
//! One [`BrowserFetcher`] is constructed per listing and reused across every
//! locale. A session-invalid error from the driver is never retried on the
//! same driver: the browser is closed and relaunched through the same
//! candidate-binary order, then the caller retries the current locale once.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    DeleteCookiesParams, GetCookiesParams, SetCookieParams, SetExtraHttpHeadersParams,
};
use futures::StreamExt;
use reqwest::cookie::Jar;
use tracing::{instrument, warn};
use url::Url;

use super::signals::{BodyClassification, classify_body};
use super::{FetchResult, Fetcher, FetcherError, FetcherErrorKind, dump_debug_html};
use crate::config::{Config, Locale, locale_accept_language, locale_cookie_value};

/// Browser binaries tried in order; the first whose executable exists wins.
#[cfg(target_os = "linux")]
const CANDIDATE_BROWSERS: &[&str] = &[
    "/usr/bin/brave-browser",
    "/usr/bin/google-chrome",
    "/usr/bin/microsoft-edge",
    "/usr/bin/opera",
    "/usr/bin/chromium",
];

#[cfg(target_os = "macos")]
const CANDIDATE_BROWSERS: &[&str] = &[
    "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
    "/Applications/Opera.app/Contents/MacOS/Opera",
];

#[cfg(target_os = "windows")]
const CANDIDATE_BROWSERS: &[&str] = &[
    r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe",
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
    r"C:\Program Files\Opera\opera.exe",
];

/// Selectors, tried in order, any of which indicates a real listing page has
/// finished rendering.
const LISTING_READY_SELECTORS: &[&str] = &[
    r#"[data-testid="property-description"]"#,
    "#hp_facilities_box",
    r#"[data-testid="title"]"#,
];

/// Overlay dismiss-button selectors for consent/pop-up interstitials.
const OVERLAY_DISMISS_SELECTORS: &[&str] =
    &[r#"#onetrust-accept-btn-handler"#, r#"[aria-label="Dismiss sign in information."]"#, ".modal-mask"];

const GALLERY_OPEN_SELECTOR: &str = r#"[data-testid="gallery-image"]"#;
const GALLERY_SCROLL_SELECTOR: &str = r#"[data-testid="gallery-scroll-container"]"#;

fn first_existing_browser() -> Option<&'static str> {
    CANDIDATE_BROWSERS.iter().find(|path| Path::new(path).exists()).copied()
}

/// Headless-Chrome Fetcher (Variant A), driven via `chromiumoxide`.
pub struct BrowserFetcher {
    browser: Option<Browser>,
    page: Option<Page>,
    catalog_root: Url,
    timeout: Duration,
    page_load_wait: Duration,
    scroll_iterations: u32,
    debug_dumps: bool,
    logs_root: PathBuf,
    session_navigated: bool,
    current_locale_cookie: Option<String>,
}

async fn launch_browser(timeout: Duration) -> Result<Browser, FetcherError> {
    let Some(executable) = first_existing_browser() else {
        return Err(FetcherError::new(
            FetcherErrorKind::SessionDead,
            "no candidate browser binary found on this host",
        ));
    };

    let config = BrowserConfig::builder()
        .chrome_executable(executable)
        .no_sandbox()
        .args(vec![
            "--disable-gpu",
            "--disable-extensions",
            "--disable-blink-features=AutomationControlled",
        ])
        .request_timeout(timeout)
        .build()
        .map_err(|err| FetcherError::new(FetcherErrorKind::SessionDead, err))?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|err| FetcherError::new(FetcherErrorKind::SessionDead, err.to_string()))?;

    tokio::spawn(async move { while handler.next().await.is_some() {} });

    Ok(browser)
}

impl BrowserFetcher {
    /// Launches a browser via the candidate-binary order. The browser is not
    /// yet navigated anywhere; that happens on the first `fetch` call so the
    /// locale-preference cookie can be set before the catalog root loads.
    ///
    /// # Errors
    ///
    /// Returns `FetcherError::SessionDead` if no candidate browser exists or
    /// launch fails.
    ///
    /// `catalog_root` must be scheme-qualified (e.g. `https://www.booking.com/`):
    /// it is used directly as a CDP navigation target and as the cookie-jar
    /// origin, both of which reject a bare hostname.
    pub async fn new(config: &Config, catalog_root: Url) -> Result<Self, FetcherError> {
        let browser = launch_browser(config.browser_timeout).await?;
        Ok(Self {
            browser: Some(browser),
            page: None,
            catalog_root,
            timeout: config.browser_timeout,
            page_load_wait: config.page_load_wait,
            scroll_iterations: config.scroll_iterations,
            debug_dumps: config.debug_html_dumps,
            logs_root: config.logs_root.clone(),
            session_navigated: false,
            current_locale_cookie: None,
        })
    }

    async fn relaunch(&mut self) -> Result<(), FetcherError> {
        if let Some(mut old) = self.browser.take() {
            let _ = old.close().await;
        }
        self.page = None;
        self.session_navigated = false;
        self.browser = Some(launch_browser(self.timeout).await?);
        Ok(())
    }

    async fn ensure_page(&mut self) -> Result<&Page, FetcherError> {
        if self.page.is_none() {
            let browser = self
                .browser
                .as_ref()
                .ok_or_else(|| FetcherError::new(FetcherErrorKind::SessionDead, "browser not running"))?;
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|err| FetcherError::new(FetcherErrorKind::SessionDead, err.to_string()))?;
            self.page = Some(page);
        }
        Ok(self.page.as_ref().expect("just inserted"))
    }

    async fn apply_locale(&mut self, locale: Locale) -> Result<(), FetcherError> {
        let accept_language = locale_accept_language(locale).to_string();
        let cookie_value = locale_cookie_value(locale).to_string();
        let catalog_root = self.catalog_root.clone();

        let page = self.ensure_page().await?;

        let headers = SetExtraHttpHeadersParams::builder()
            .headers([("Accept-Language".to_string(), accept_language)].into_iter().collect())
            .build()
            .map_err(|err| FetcherError::new(FetcherErrorKind::SessionDead, err))?;
        page.execute(headers)
            .await
            .map_err(|err| FetcherError::new(FetcherErrorKind::SessionDead, err.to_string()))?;

        if !self.session_navigated {
            page.goto(catalog_root.as_str())
                .await
                .map_err(|err| FetcherError::new(FetcherErrorKind::SessionDead, err.to_string()))?;
            self.session_navigated = true;
        }

        if self.current_locale_cookie.is_some() {
            if let Ok(delete) =
                DeleteCookiesParams::builder().name("bkng_locale").url(catalog_root.to_string()).build()
            {
                let _ = page.execute(delete).await;
            }
        }

        let set_cookie = SetCookieParams::builder()
            .name("bkng_locale")
            .value(cookie_value.clone())
            .url(catalog_root.to_string())
            .build()
            .map_err(|err| FetcherError::new(FetcherErrorKind::SessionDead, err))?;
        page.execute(set_cookie)
            .await
            .map_err(|err| FetcherError::new(FetcherErrorKind::SessionDead, err.to_string()))?;

        self.current_locale_cookie = Some(cookie_value);
        Ok(())
    }

    async fn dismiss_overlays(&self, page: &Page) {
        for selector in OVERLAY_DISMISS_SELECTORS {
            if let Ok(element) = page.find_element(*selector).await {
                let _ = element.click().await;
            }
        }
    }

    async fn scroll_for_lazy_load(&self, page: &Page) {
        for _ in 0..self.scroll_iterations {
            let _ = page.evaluate("window.scrollBy(0, window.innerHeight)").await;
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
    }

    async fn open_and_scroll_gallery(&self, page: &Page) {
        if let Ok(element) = page.find_element(GALLERY_OPEN_SELECTOR).await {
            let _ = element.click().await;
            tokio::time::sleep(Duration::from_millis(300)).await;
            if let Ok(gallery) = page.find_element(GALLERY_SCROLL_SELECTOR).await {
                for _ in 0..self.scroll_iterations {
                    let _ = gallery.scroll_into_view().await;
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            }
        }
    }

    async fn wait_for_listing_ready(&self, page: &Page) -> bool {
        let deadline = tokio::time::Instant::now() + self.page_load_wait;
        while tokio::time::Instant::now() < deadline {
            for selector in LISTING_READY_SELECTORS {
                if page.find_element(*selector).await.is_ok() {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        false
    }

    async fn dump_if_enabled(&self, url: &str, kind: FetcherErrorKind, html: &str) {
        if self.debug_dumps {
            dump_debug_html(&self.logs_root, url, kind, html).await;
        }
    }
}

#[async_trait]
impl Fetcher for BrowserFetcher {
    /// Reads the live session's cookies off the page via CDP and mirrors them
    /// into a `reqwest` jar so the Image Downloader's plain HTTP requests
    /// carry the same authentication the browser session already earned.
    async fn cookie_jar(&self) -> Arc<Jar> {
        let jar = Arc::new(Jar::default());
        let Some(page) = self.page.as_ref() else {
            return jar;
        };
        match page.execute(GetCookiesParams::default()).await {
            Ok(response) => {
                for cookie in &response.result.cookies {
                    jar.add_cookie_str(&format!("{}={}", cookie.name, cookie.value), &self.catalog_root);
                }
            }
            Err(err) => warn!(%err, "failed to read browser cookies"),
        }
        jar
    }

    /// Forces a fresh browser session (new process, empty cookie jar) so the
    /// next `fetch` can't be blamed on leftover session-poisoning.
    async fn discard_session(&mut self) {
        if let Err(err) = self.relaunch().await {
            warn!(%err, "failed to relaunch browser on forced discard");
        }
    }

    #[instrument(skip(self))]
    async fn fetch(&mut self, url: &str, locale: Locale) -> Result<FetchResult, FetcherError> {
        match self.fetch_once(url, locale).await {
            Ok(result) => Ok(result),
            Err(err) if err.kind == FetcherErrorKind::SessionDead => {
                warn!("browser session died, relaunching and retrying once");
                self.relaunch().await?;
                self.fetch_once(url, locale).await
            }
            Err(err) => Err(err),
        }
    }

    async fn shutdown(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            let _ = browser.close().await;
        }
    }
}

impl BrowserFetcher {
    async fn fetch_once(&mut self, url: &str, locale: Locale) -> Result<FetchResult, FetcherError> {
        self.apply_locale(locale).await?;

        let page = self.ensure_page().await?;
        page.goto(url)
            .await
            .map_err(|err| FetcherError::new(FetcherErrorKind::SessionDead, err.to_string()))?;

        let ready = self.wait_for_listing_ready(page).await;
        self.dismiss_overlays(page).await;
        self.scroll_for_lazy_load(page).await;
        self.open_and_scroll_gallery(page).await;

        let html = page
            .content()
            .await
            .map_err(|err| FetcherError::new(FetcherErrorKind::SessionDead, err.to_string()))?;

        if !ready {
            self.dump_if_enabled(url, FetcherErrorKind::ShortContent, &html).await;
        }

        match classify_body(&html) {
            BodyClassification::RealListing => {
                let html_length = html.len();
                let page_title = page.get_title().await.ok().flatten();
                Ok(FetchResult { html, http_status: 200, page_title, html_length })
            }
            BodyClassification::ShortContent => {
                self.dump_if_enabled(url, FetcherErrorKind::ShortContent, &html).await;
                Err(FetcherError::new(FetcherErrorKind::ShortContent, format!("{} bytes", html.len())))
            }
            BodyClassification::Blocked => {
                self.dump_if_enabled(url, FetcherErrorKind::Blocked, &html).await;
                Err(FetcherError::new(FetcherErrorKind::Blocked, "block signal detected"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_existing_browser_returns_none_when_nothing_installed() {
        // On CI/test sandboxes none of the hardcoded paths exist; the
        // function must degrade to None rather than panicking.
        let _ = first_existing_browser();
    }

    #[test]
    fn test_candidate_browsers_tries_brave_first() {
        assert!(CANDIDATE_BROWSERS[0].to_lowercase().contains("brave"));
    }
}
