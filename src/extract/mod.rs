//! Extractor (C7): pure `(html, requested_locale) -> record` transformation.
//!
//! No I/O. Two parse views of the same document are built once in
//! `Extractor::new` and reused across every field: a `scraper::Html` DOM tree for
//! attribute/class/id/meta queries, and a tiny XPath-subset evaluator (absolute
//! id lookup plus child-index traversal only) for the handful of legacy
//! selectors that only ever address elements that way.

mod authenticator;
mod images;
mod rating;
mod xpath;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use scraper::{ElementRef, Html, Selector};

use crate::config::Locale;

pub use authenticator::{best_matching_locale, validate as authenticate};
pub use images::{extract_image_urls, is_hotel_image_url, normalize_to_max_resolution};

/// One entry of a listing's room list.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Room {
    pub name: String,
    pub price: Option<String>,
    pub capacity: Option<String>,
    pub bed_info: Option<String>,
}

/// The full set of fields the Extractor can populate for one `(listing, locale)`.
#[derive(Debug, Clone, Default)]
pub struct ExtractedRecord {
    pub name: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<i64>,
    pub rating_category: Option<String>,
    pub review_scores: BTreeMap<String, f64>,
    pub services: Vec<String>,
    pub facilities: BTreeMap<String, Vec<String>>,
    pub house_rules: Option<String>,
    pub important_info: Option<String>,
    pub rooms: Vec<Room>,
    pub image_urls: Vec<String>,
    /// Locale the content actually authenticated as, which may differ from the
    /// locale that was requested.
    pub detected_locale: String,
}

impl ExtractedRecord {
    /// True once a name has been found; the Worker treats an unnamed record as
    /// `no_data` and does not store it.
    #[must_use]
    pub fn has_name(&self) -> bool {
        self.name.is_some()
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn first_text(document: &Html, css: &str) -> Option<String> {
    let sel = selector(css)?;
    document.select(&sel).find_map(|el| {
        let text = collapse_whitespace(&el.text().collect::<String>());
        (!text.is_empty()).then_some(text)
    })
}

fn first_attr(document: &Html, css: &str, attr: &str) -> Option<String> {
    let sel = selector(css)?;
    document.select(&sel).find_map(|el| {
        el.value()
            .attr(attr)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    })
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").trim().to_string()
}

/// Every `<script type="application/ld+json">` payload on the page, parsed.
fn json_ld_blocks(document: &Html) -> Vec<serde_json::Value> {
    let Some(sel) = selector(r#"script[type="application/ld+json"]"#) else {
        return Vec::new();
    };
    document
        .select(&sel)
        .filter_map(|el| {
            let raw = el.text().collect::<String>();
            serde_json::from_str::<serde_json::Value>(&raw).ok()
        })
        .collect()
}

fn json_ld_string_field<'a>(blocks: &'a [serde_json::Value], field: &str) -> Option<&'a str> {
    blocks.iter().find_map(|v| v.get(field)).and_then(|v| v.as_str())
}

/// Strips a leading run of `*` star-rating glyphs and the catalog's own brand
/// suffix from a page `<title>`/`og:title` value.
fn strip_title_noise(raw: &str) -> String {
    let no_stars = raw.trim_start_matches(['★', '*']).trim();
    let no_brand = no_stars
        .strip_suffix(" | Booking.com")
        .unwrap_or(no_stars)
        .trim();

    // Drop a trailing ", City, Country" tail when both segments are short — the
    // catalog appends these to `og:title` but not to the cleaner testid fields.
    let parts: Vec<&str> = no_brand.rsplitn(3, ", ").collect();
    if parts.len() == 3 && parts[0].len() <= 35 && parts[1].len() <= 35 {
        parts[2].trim().to_string()
    } else {
        no_brand.to_string()
    }
}

/// Deterministic stop tokens: any occurrence in a DOM address block marks the
/// start of rating-commentary noise the catalog concatenates into the same node.
const ADDRESS_NOISE_MARKERS: &[&str] = &[
    "Location",
    "Ubicación",
    "Lage",
    "Emplacement",
    "Posizione",
    "Localização",
    "Locatie",
    "Расположение",
    "rated",
    "customers",
    "clientes",
    "Kunden",
    "clients",
    "clienti",
];

const MAX_ADDRESS_LEN: usize = 200;

fn strip_address_noise(raw: &str) -> String {
    let cut = ADDRESS_NOISE_MARKERS
        .iter()
        .filter_map(|marker| raw.find(marker))
        .min()
        .unwrap_or(raw.len());
    let truncated = &raw[..cut];
    let truncated = collapse_whitespace(truncated);
    if truncated.chars().count() > MAX_ADDRESS_LEN {
        truncated.chars().take(MAX_ADDRESS_LEN).collect()
    } else {
        truncated
    }
}

fn extract_name(document: &Html, json_ld: &[serde_json::Value]) -> Option<String> {
    first_text(document, r#"[data-testid="title"]"#)
        .or_else(|| first_text(document, r#"[data-testid="property-name"]"#))
        .or_else(|| {
            first_attr(document, r#"meta[property="og:title"]"#, "content").map(|raw| strip_title_noise(&raw))
        })
        .or_else(|| first_attr(document, r#"meta[name="title"]"#, "content"))
        .or_else(|| xpath::evaluate_text(document, xpath::XPATH_HOTEL_NAME))
        .or_else(|| json_ld_string_field(json_ld, "name").map(str::to_string))
}

fn extract_address(document: &Html, json_ld: &[serde_json::Value]) -> Option<String> {
    if let Some(address) = json_ld.iter().find_map(|v| v.get("address")) {
        if let Some(s) = address.as_str() {
            return Some(collapse_whitespace(s));
        }
        if let Some(obj) = address.as_object() {
            let parts: Vec<&str> = ["streetAddress", "addressLocality", "addressCountry"]
                .iter()
                .filter_map(|k| obj.get(*k).and_then(|v| v.as_str()))
                .collect();
            if !parts.is_empty() {
                return Some(parts.join(", "));
            }
        }
    }

    first_text(document, r#"[data-testid="address"]"#)
        .or_else(|| first_text(document, "#hp_address_subtitle"))
        .or_else(|| xpath::evaluate_text(document, xpath::XPATH_ADDRESS))
        .map(|raw| strip_address_noise(&raw))
}

fn extract_review_count(document: &Html) -> Option<i64> {
    let text = first_text(document, r#"[data-testid="review-score"]"#)
        .or_else(|| first_text(document, ".reviewscore"))?;
    rating::extract_review_count(&text)
}

fn extract_services(document: &Html) -> Vec<String> {
    let Some(sel) = selector(r#"[data-testid="facility-badge"], .hp_desc_important_facilities li"#) else {
        return Vec::new();
    };
    document
        .select(&sel)
        .filter_map(|el| {
            let text = collapse_whitespace(&el.text().collect::<String>());
            (!text.is_empty()).then_some(text)
        })
        .collect()
}

fn extract_facilities(document: &Html) -> BTreeMap<String, Vec<String>> {
    let Some(group_sel) = selector(r#"[data-testid="facility-group"]"#) else {
        return BTreeMap::new();
    };
    let Some(heading_sel) = selector(".facility-group-heading, h3") else {
        return BTreeMap::new();
    };
    let Some(item_sel) = selector("li") else {
        return BTreeMap::new();
    };

    let mut facilities = BTreeMap::new();
    for group in document.select(&group_sel) {
        let Some(heading) = group.select(&heading_sel).next() else {
            continue;
        };
        let category = collapse_whitespace(&heading.text().collect::<String>());
        if category.is_empty() {
            continue;
        }
        let items: Vec<String> = group
            .select(&item_sel)
            .filter_map(|el| {
                let text = collapse_whitespace(&el.text().collect::<String>());
                (!text.is_empty()).then_some(text)
            })
            .collect();
        if !items.is_empty() {
            facilities.insert(category, items);
        }
    }
    facilities
}

fn extract_rooms(document: &Html, json_ld: &[serde_json::Value]) -> Vec<Room> {
    const MAX_ROOMS: usize = 20;
    let mut rooms = Vec::new();

    if let Some(room_sel) = selector(r#"[data-testid="room-block"], .maxotelroomarea, .hprt-table tr"#) {
        for el in document.select(&room_sel) {
            if rooms.len() >= MAX_ROOMS {
                break;
            }
            if let Some(room) = room_from_element(el) {
                rooms.push(room);
            }
        }
    }

    if rooms.is_empty() {
        if let Some(places) = json_ld.iter().find_map(|v| v.get("containsPlace")).and_then(|v| v.as_array()) {
            for place in places.iter().take(MAX_ROOMS) {
                if let Some(name) = place.get("name").and_then(|v| v.as_str()) {
                    rooms.push(Room {
                        name: name.to_string(),
                        price: None,
                        capacity: None,
                        bed_info: None,
                    });
                }
            }
        }
    }

    rooms.truncate(MAX_ROOMS);
    rooms
}

fn room_from_element(el: ElementRef<'_>) -> Option<Room> {
    let name_sel = selector(r#"[data-testid="room-name"], .hprt-roomtype-icon-link, td"#)?;
    let price_sel = selector(r#"[data-testid="price"], .hprt-price-price"#)?;
    let capacity_sel = selector(r#"[data-testid="occupancy"], .hprt-occupancy"#)?;
    let bed_sel = selector(r#"[data-testid="bed-type"], .hprt-roomtype-bed"#)?;

    let name = el
        .select(&name_sel)
        .next()
        .map(|e| collapse_whitespace(&e.text().collect::<String>()))
        .filter(|s| !s.is_empty())?;

    let price = el
        .select(&price_sel)
        .next()
        .map(|e| collapse_whitespace(&e.text().collect::<String>()))
        .filter(|s| !s.is_empty());
    let capacity = el
        .select(&capacity_sel)
        .next()
        .map(|e| collapse_whitespace(&e.text().collect::<String>()))
        .filter(|s| !s.is_empty());
    let bed_info = el
        .select(&bed_sel)
        .next()
        .map(|e| collapse_whitespace(&e.text().collect::<String>()))
        .filter(|s| !s.is_empty());

    Some(Room { name, price, capacity, bed_info })
}

/// Extracts a gated text field: the first non-empty candidate selector whose
/// text authenticates against `locale` wins; the rest are discarded as
/// wrong-locale noise.
fn extract_gated(document: &Html, selectors: &[&str], locale: Locale) -> Option<String> {
    selectors.iter().find_map(|css| {
        let text = first_text(document, css)?;
        authenticator::validate(&text, locale).then_some(text)
    })
}

/// Runs the full field-extraction pipeline against `html` for `requested_locale`.
#[must_use]
pub fn extract(html: &str, requested_locale: Locale) -> ExtractedRecord {
    let document = Html::parse_document(html);
    let json_ld = json_ld_blocks(&document);

    let name = extract_name(&document, &json_ld);
    let address = extract_address(&document, &json_ld);
    let (rating, review_count_from_rating) = rating::extract_rating(&document, &json_ld);
    let review_count = extract_review_count(&document).or(review_count_from_rating);
    let review_scores = rating::extract_review_scores(&document);
    let rating_category = rating::extract_rating_category(&document, rating, requested_locale);

    let description = extract_gated(
        &document,
        &[
            r#"[data-testid="property-description"]"#,
            "#property_description_content",
            r#"meta[name="description"]"#,
        ],
        requested_locale,
    );
    let house_rules = extract_gated(
        &document,
        &[r#"[data-testid="house-rules"]"#, "#house-rules-room"],
        requested_locale,
    );
    let important_info = extract_gated(
        &document,
        &[r#"[data-testid="property-important-info"]"#, "#important_information"],
        requested_locale,
    );

    let services = extract_services(&document);
    let facilities = extract_facilities(&document);
    let rooms = extract_rooms(&document, &json_ld);
    let image_urls = extract_image_urls(&document);

    let sample_for_locale_detection = description
        .as_deref()
        .map(str::to_string)
        .unwrap_or_else(|| services.join(" "));

    let detected_locale = if authenticator::validate(&sample_for_locale_detection, requested_locale) {
        requested_locale.to_string()
    } else {
        authenticator::best_matching_locale(&sample_for_locale_detection).to_string()
    };

    ExtractedRecord {
        name,
        address,
        description,
        rating,
        review_count,
        rating_category,
        review_scores,
        services,
        facilities,
        house_rules,
        important_info,
        rooms,
        image_urls,
        detected_locale,
    }
}
