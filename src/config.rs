//! Process-wide configuration: locale tables, retry/backoff parameters, VPN policy.
//!
//! Loaded once at startup from environment variables with typed defaults, then
//! validated before any component is constructed. Locale string tables are
//! compiled-in `const`/`static` data — they are not runtime-editable.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Two-letter locale tag paired with its catalog-specific attributes.
pub type Locale = &'static str;

/// Locales the harvester knows how to address, in the original's preferred order.
/// `en` is always moved to the front of `LOCALES_ENABLED` regardless of this order.
pub const KNOWN_LOCALES: &[Locale] = &[
    "en", "es", "de", "fr", "it", "pt", "nl", "ru", "ar", "tr", "hu", "pl", "zh", "no", "fi",
    "sv", "da", "ja", "ko",
];

/// URL suffix inserted before `.html` to request a locale (empty for English).
#[must_use]
pub fn locale_url_suffix(locale: Locale) -> &'static str {
    match locale {
        "en" => "",
        "es" => ".es",
        "fr" => ".fr",
        "de" => ".de",
        "it" => ".it",
        "pt" => ".pt",
        "nl" => ".nl",
        "ru" => ".ru",
        "ar" => ".ar",
        "tr" => ".tr",
        "hu" => ".hu",
        "pl" => ".pl",
        "zh" => ".zh",
        "no" => ".no",
        "fi" => ".fi",
        "sv" => ".sv",
        "da" => ".da",
        "ja" => ".ja",
        "ko" => ".ko",
        _ => "",
    }
}

/// Catalog-specific locale tag used in the site's preference cookie, distinct from
/// the 2-letter tag (e.g. `en -> en-gb`, `zh -> zh-cn`, `no -> nb`, `pt -> pt-pt`).
#[must_use]
pub fn locale_cookie_value(locale: Locale) -> &'static str {
    match locale {
        "en" => "en-gb",
        "zh" => "zh-cn",
        "no" => "nb",
        "pt" => "pt-pt",
        other => other,
    }
}

/// Full `Accept-Language` header value for a locale.
#[must_use]
pub fn locale_accept_language(locale: Locale) -> &'static str {
    match locale {
        "en" => "en-US,en;q=0.9",
        "es" => "es-ES,es;q=0.9",
        "de" => "de-DE,de;q=0.9",
        "fr" => "fr-FR,fr;q=0.9",
        "it" => "it-IT,it;q=0.9",
        "pt" => "pt-PT,pt;q=0.9",
        "nl" => "nl-NL,nl;q=0.9",
        "ru" => "ru-RU,ru;q=0.9",
        "ar" => "ar;q=0.9",
        "tr" => "tr-TR,tr;q=0.9",
        "hu" => "hu-HU,hu;q=0.9",
        "pl" => "pl-PL,pl;q=0.9",
        "zh" => "zh-CN,zh;q=0.9",
        "no" => "nb-NO,nb;q=0.9",
        "fi" => "fi-FI,fi;q=0.9",
        "sv" => "sv-SE,sv;q=0.9",
        "da" => "da-DK,da;q=0.9",
        "ja" => "ja-JP,ja;q=0.9",
        "ko" => "ko-KR,ko;q=0.9",
        _ => "en-US,en;q=0.9",
    }
}

/// Rotation pool for request headers. Real desktop browser strings, overridable for tests.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:123.0) Gecko/20100101 Firefox/123.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 Edg/122.0.0.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
];

/// English-speaking countries first, to avoid the catalog serving non-English content
/// to an `en` request made from a Spanish-IP egress node.
pub const DEFAULT_VPN_COUNTRIES: &[&str] =
    &["US", "UK", "CA", "DE", "FR", "NL", "IT", "ES"];

/// Immutable process-wide settings. Constructed once at startup via [`Config::load`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Ordered locales to scrape, default locale always first.
    pub locales_enabled: Vec<Locale>,
    /// The locale under which images are downloaded and that is always tried first.
    pub default_locale: Locale,

    pub batch_size: i64,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub min_request_delay: Duration,
    pub max_request_delay: Duration,

    pub use_browser_driver: bool,
    pub download_images: bool,
    pub image_max_w: u32,
    pub image_max_h: u32,
    pub image_min_w: u32,
    pub image_min_h: u32,
    pub image_quality: u8,
    pub max_image_workers: usize,

    pub vpn_enabled: bool,
    pub vpn_countries: Vec<String>,
    pub vpn_rotate_every_n_listings: u32,
    pub vpn_command: String,

    /// Hostname of the catalog root, used as the cookie domain, the browser
    /// driver's once-per-session navigation target, and the image downloader's
    /// `Referer` header.
    pub catalog_root: String,

    pub data_root: PathBuf,
    pub images_root: PathBuf,
    pub logs_root: PathBuf,

    pub dispatcher_worker_concurrency: usize,
    pub dispatcher_poll_interval: Duration,
    pub dispatcher_warmup: Duration,

    pub browser_timeout: Duration,
    pub page_load_wait: Duration,
    pub scroll_iterations: u32,

    pub user_agents: Vec<String>,
    pub debug_html_dumps: bool,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from environment variables, filling in typed defaults,
    /// then validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if [`Config::validate`] rejects the loaded values.
    pub fn load() -> Result<Self> {
        let default_locale: Locale = match env_string("DEFAULT_LOCALE", "en").as_str() {
            "en" => "en",
            other => KNOWN_LOCALES
                .iter()
                .find(|l| **l == other)
                .copied()
                .unwrap_or("en"),
        };

        let locales_enabled: Vec<Locale> = env::var("LOCALES_ENABLED")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .filter_map(|tag| {
                        let tag = tag.trim();
                        KNOWN_LOCALES.iter().find(|l| **l == tag).copied()
                    })
                    .collect()
            })
            .filter(|v: &Vec<Locale>| !v.is_empty())
            .unwrap_or_else(|| vec!["en", "es", "de", "fr", "it"]);

        let data_root = PathBuf::from(env_string("DATA_ROOT", "./data"));
        let images_root = PathBuf::from(env_string("IMAGES_ROOT", "./data/images"));
        let logs_root = PathBuf::from(env_string("LOGS_ROOT", "./data/logs"));

        let vpn_countries: Vec<String> = env::var("VPN_COUNTRIES")
            .ok()
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect())
            .filter(|v: &Vec<String>| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_VPN_COUNTRIES.iter().map(|s| (*s).to_string()).collect());

        let config = Self {
            locales_enabled,
            default_locale,
            batch_size: env_or("BATCH_SIZE", 5),
            max_retries: env_or("MAX_RETRIES", 3),
            retry_delay: Duration::from_secs(env_or("RETRY_DELAY_SECONDS", 60)),
            min_request_delay: Duration::from_millis(
                (env_or::<f64>("MIN_REQUEST_DELAY_SECONDS", 2.0) * 1000.0) as u64,
            ),
            max_request_delay: Duration::from_millis(
                (env_or::<f64>("MAX_REQUEST_DELAY_SECONDS", 5.0) * 1000.0) as u64,
            ),
            use_browser_driver: env_bool("USE_BROWSER_DRIVER", false),
            download_images: env_bool("DOWNLOAD_IMAGES", true),
            image_max_w: env_or("IMAGE_MAX_W", 1920),
            image_max_h: env_or("IMAGE_MAX_H", 1080),
            image_min_w: env_or("IMAGE_MIN_W", 200),
            image_min_h: env_or("IMAGE_MIN_H", 150),
            image_quality: env_or("IMAGE_QUALITY", 85),
            max_image_workers: env_or("MAX_IMAGE_WORKERS", 5),
            vpn_enabled: env_bool("VPN_ENABLED", false),
            vpn_countries,
            vpn_rotate_every_n_listings: env_or("VPN_ROTATE_EVERY_N_LISTINGS", 50),
            vpn_command: env_string("VPN_COMMAND", "nordvpn"),
            catalog_root: env_string("CATALOG_ROOT", "www.booking.com"),
            data_root,
            images_root,
            logs_root,
            dispatcher_worker_concurrency: env_or("DISPATCHER_WORKER_CONCURRENCY", 1),
            dispatcher_poll_interval: Duration::from_secs(env_or(
                "DISPATCHER_POLL_INTERVAL_SECONDS",
                30,
            )),
            dispatcher_warmup: Duration::from_secs(env_or("DISPATCHER_WARMUP_SECONDS", 5)),
            browser_timeout: Duration::from_secs(env_or("BROWSER_TIMEOUT_SECONDS", 30)),
            page_load_wait: Duration::from_secs(env_or("PAGE_LOAD_WAIT_SECONDS", 5)),
            scroll_iterations: env_or("SCROLL_ITERATIONS", 3),
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| (*s).to_string()).collect(),
            debug_html_dumps: env_bool("DEBUG_HTML_DUMPS", true),
        };

        config.validate()?;
        Ok(config)
    }

    /// Rejects nonsensical configuration combinations. Called by [`Config::load`];
    /// exposed separately so tests can validate hand-built configs.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid combination found.
    pub fn validate(&self) -> Result<()> {
        if self.locales_enabled.is_empty() {
            bail!("LOCALES_ENABLED must not be empty");
        }
        if self.batch_size <= 0 {
            bail!("BATCH_SIZE must be positive, got {}", self.batch_size);
        }
        if self.image_min_w > self.image_max_w || self.image_min_h > self.image_max_h {
            bail!(
                "IMAGE_MIN_W/H ({}/{}) must not exceed IMAGE_MAX_W/H ({}/{})",
                self.image_min_w,
                self.image_min_h,
                self.image_max_w,
                self.image_max_h
            );
        }
        if self.dispatcher_worker_concurrency == 0 {
            bail!("DISPATCHER_WORKER_CONCURRENCY must be at least 1");
        }
        if self.vpn_countries.is_empty() {
            bail!("VPN_COUNTRIES must not be empty when VPN rotation is ever used");
        }
        Ok(())
    }

    /// The locale order a worker iterates in: the default locale moved to the front.
    #[must_use]
    pub fn ordered_locales(&self) -> Vec<Locale> {
        let mut ordered = vec![self.default_locale];
        for locale in &self.locales_enabled {
            if *locale != self.default_locale {
                ordered.push(*locale);
            }
        }
        ordered
    }

    /// Creates the data/images/logs directories if they don't already exist.
    ///
    /// # Errors
    ///
    /// Returns an error if any directory cannot be created.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.data_root, &self.images_root, &self.logs_root] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }

    /// Path to the SQLite database file under `DATA_ROOT`.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_root.join("harvester.db")
    }
}

#[cfg(test)]
impl Config {
    /// A small, fast, fully-populated configuration for unit tests across the
    /// crate (fetcher, vpn, worker, dispatcher). Not used by the binary.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            locales_enabled: vec!["en", "es"],
            default_locale: "en",
            batch_size: 5,
            max_retries: 3,
            retry_delay: Duration::from_secs(60),
            min_request_delay: Duration::from_secs(2),
            max_request_delay: Duration::from_secs(5),
            use_browser_driver: false,
            download_images: true,
            image_max_w: 1920,
            image_max_h: 1080,
            image_min_w: 200,
            image_min_h: 150,
            image_quality: 85,
            max_image_workers: 5,
            vpn_enabled: false,
            vpn_countries: vec!["US".to_string()],
            vpn_rotate_every_n_listings: 50,
            vpn_command: "nordvpn".to_string(),
            catalog_root: "www.booking.com".to_string(),
            data_root: PathBuf::from("./data"),
            images_root: PathBuf::from("./data/images"),
            logs_root: PathBuf::from("./data/logs"),
            dispatcher_worker_concurrency: 1,
            dispatcher_poll_interval: Duration::from_secs(30),
            dispatcher_warmup: Duration::from_secs(5),
            browser_timeout: Duration::from_secs(30),
            page_load_wait: Duration::from_secs(5),
            scroll_iterations: 3,
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| (*s).to_string()).collect(),
            debug_html_dumps: true,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config::default_for_test()
    }

    #[test]
    fn test_validate_accepts_base_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_locales() {
        let mut cfg = base_config();
        cfg.locales_enabled.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_image_bounds() {
        let mut cfg = base_config();
        cfg.image_min_w = 3000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let mut cfg = base_config();
        cfg.batch_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_ordered_locales_moves_default_first() {
        let mut cfg = base_config();
        cfg.locales_enabled = vec!["es", "de", "en"];
        cfg.default_locale = "en";
        assert_eq!(cfg.ordered_locales(), vec!["en", "es", "de"]);
    }

    #[test]
    fn test_locale_cookie_value_distinct_from_tag() {
        assert_eq!(locale_cookie_value("en"), "en-gb");
        assert_eq!(locale_cookie_value("zh"), "zh-cn");
        assert_eq!(locale_cookie_value("no"), "nb");
        assert_eq!(locale_cookie_value("pt"), "pt-pt");
        assert_eq!(locale_cookie_value("de"), "de");
    }

    #[test]
    fn test_locale_url_suffix_default_is_empty() {
        assert_eq!(locale_url_suffix("en"), "");
        assert_eq!(locale_url_suffix("es"), ".es");
    }
}
