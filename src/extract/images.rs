//! Hotel-image URL discovery and normalization.
//!
//! Only URLs under the catalog's hotel-image CDN path are ever accepted; design
//! assets, user avatars, destination photos, and tracking pixels living on
//! neighboring paths of the same CDN are rejected by the same regex.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

/// The only CDN path hotel images may live under. Case-insensitive.
#[allow(clippy::expect_used)]
static HOTEL_IMAGE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)bstatic\.com/xdata/images/hotel/").expect("valid regex")); // Static pattern, safe to panic

/// Matches the resolution segment of an image URL: `/max300x200/`, `/max1024/`,
/// `/square60/`. Replaced wholesale with the maximum-resolution form.
#[allow(clippy::expect_used)]
static RESOLUTION_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)/(max\d+x\d+|max\d+|square\d+)/").expect("valid regex") // Static pattern, safe to panic
});

const MAX_RESOLUTION_SEGMENT: &str = "/max1280x900/";

/// True iff `url` points at the hotel-image CDN path (and nowhere else on the CDN).
#[must_use]
pub fn is_hotel_image_url(url: &str) -> bool {
    HOTEL_IMAGE_PATH.is_match(url)
}

/// Rewrites any resolution segment in `url` to the maximum-resolution form.
/// URLs without a recognized resolution segment are returned unchanged.
#[must_use]
pub fn normalize_to_max_resolution(url: &str) -> String {
    RESOLUTION_SEGMENT
        .replace(url, MAX_RESOLUTION_SEGMENT)
        .into_owned()
}

#[allow(clippy::expect_used)]
fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|_| {
        Selector::parse("nonexistent-element-marker").expect("trivial selector always parses") // Static pattern, safe to panic
    })
}

/// Scans `img` elements (src, data-src, data-lazy-src, srcset), `og:image`, and
/// `data-photos` JSON payloads for hotel-image CDN URLs, normalizing and
/// deduplicating the result. Order is not significant; callers treat this as a set.
#[must_use]
pub fn extract_image_urls(document: &Html) -> Vec<String> {
    let mut found: BTreeSet<String> = BTreeSet::new();

    let img_selector = selector("img");
    for element in document.select(&img_selector) {
        for attr in ["src", "data-src", "data-lazy-src"] {
            if let Some(value) = element.value().attr(attr) {
                collect_candidate(&mut found, value);
            }
        }
        if let Some(srcset) = element.value().attr("srcset") {
            for entry in srcset.split(',') {
                if let Some(url) = entry.trim().split_whitespace().next() {
                    collect_candidate(&mut found, url);
                }
            }
        }
    }

    let og_image_selector = selector(r#"meta[property="og:image"]"#);
    for element in document.select(&og_image_selector) {
        if let Some(value) = element.value().attr("content") {
            collect_candidate(&mut found, value);
        }
    }

    let data_photos_selector = selector("[data-photos]");
    for element in document.select(&data_photos_selector) {
        if let Some(raw) = element.value().attr("data-photos") {
            collect_from_json_payload(&mut found, raw);
        }
    }

    found.into_iter().collect()
}

fn collect_candidate(found: &mut BTreeSet<String>, url: &str) {
    let url = url.trim();
    if !url.is_empty() && is_hotel_image_url(url) {
        found.insert(normalize_to_max_resolution(url));
    }
}

fn collect_from_json_payload(found: &mut BTreeSet<String>, raw: &str) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return;
    };
    collect_strings_from_json(found, &value);
}

fn collect_strings_from_json(found: &mut BTreeSet<String>, value: &serde_json::Value) {
    match value {
        serde_json::Value::String(s) => collect_candidate(found, s),
        serde_json::Value::Array(items) => {
            for item in items {
                collect_strings_from_json(found, item);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                collect_strings_from_json(found, item);
            }
        }
        _ => {}
    }
}
