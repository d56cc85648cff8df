//! Locale-suffix URL manipulation: the glue between a canonical queue URL and
//! the locale-specific URL actually fetched.
//!
//! Both functions here are pure and idempotent under re-application, which is
//! relied on by the Worker (`build_locale_url`) and the bulk-ingest collaborator's
//! contract (`strip_locale_suffix`, exercised here only for its use inside
//! `build_locale_url`).

use std::sync::LazyLock;

use regex::Regex;

use crate::config::{Locale, locale_url_suffix};

/// Matches a trailing locale suffix: `.es.html`, `.zh-cn.html`, etc. Case-insensitive.
#[allow(clippy::expect_used)]
static LOCALE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.[a-z]{2}(-[a-z]{2,4})?\.html$").expect("valid regex")); // Static pattern, safe to panic

/// Strips any existing locale suffix from a URL, leaving a bare `.html` ending.
/// Idempotent: applying this twice is the same as applying it once.
#[must_use]
pub fn strip_locale_suffix(url: &str) -> String {
    if LOCALE_SUFFIX.is_match(url) {
        LOCALE_SUFFIX.replace(url, ".html").into_owned()
    } else {
        url.to_string()
    }
}

/// Builds the URL for `locale` from any URL (canonical or already locale-suffixed),
/// by stripping any existing suffix first then inserting the target one.
///
/// Idempotent under re-application with a different locale:
/// `build_locale_url(build_locale_url(u, X), Y) == build_locale_url(u, Y)`.
#[must_use]
pub fn build_locale_url(url: &str, locale: Locale) -> String {
    let stripped = strip_locale_suffix(url);
    let suffix = locale_url_suffix(locale);
    if suffix.is_empty() {
        stripped
    } else {
        stripped.replacen(".html", &format!("{suffix}.html"), 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_locale_suffix_removes_two_letter_suffix() {
        assert_eq!(
            strip_locale_suffix("https://www.catalog/hotel/example.es.html"),
            "https://www.catalog/hotel/example.html"
        );
    }

    #[test]
    fn test_strip_locale_suffix_removes_hyphenated_suffix() {
        assert_eq!(
            strip_locale_suffix("https://www.catalog/hotel/example.zh-cn.html"),
            "https://www.catalog/hotel/example.html"
        );
    }

    #[test]
    fn test_strip_locale_suffix_leaves_canonical_url_untouched() {
        let url = "https://www.catalog/hotel/example.html";
        assert_eq!(strip_locale_suffix(url), url);
    }

    #[test]
    fn test_strip_locale_suffix_is_idempotent() {
        let url = "https://www.catalog/hotel/example.es.html";
        let once = strip_locale_suffix(url);
        let twice = strip_locale_suffix(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_build_locale_url_default_locale_has_no_suffix() {
        assert_eq!(
            build_locale_url("https://www.catalog/hotel/example.html", "en"),
            "https://www.catalog/hotel/example.html"
        );
    }

    #[test]
    fn test_build_locale_url_inserts_suffix_before_html() {
        assert_eq!(
            build_locale_url("https://www.catalog/hotel/example.html", "es"),
            "https://www.catalog/hotel/example.es.html"
        );
    }

    #[test]
    fn test_build_locale_url_strips_existing_suffix_first() {
        // Without the strip, a stored .es.html URL would become .es.de.html for German.
        assert_eq!(
            build_locale_url("https://www.catalog/hotel/example.es.html", "de"),
            "https://www.catalog/hotel/example.de.html"
        );
    }

    #[test]
    fn test_build_locale_url_is_idempotent_across_locales() {
        let canonical = "https://www.catalog/hotel/example.html";
        let via_fr = build_locale_url(canonical, "fr");
        let direct_de = build_locale_url(canonical, "de");
        let via_fr_then_de = build_locale_url(&via_fr, "de");
        assert_eq!(via_fr_then_de, direct_de);
    }

    #[test]
    fn test_build_locale_url_reapply_same_locale_is_stable() {
        let canonical = "https://www.catalog/hotel/example.html";
        let once = build_locale_url(canonical, "es");
        let twice = build_locale_url(&once, "es");
        assert_eq!(once, twice);
    }
}
