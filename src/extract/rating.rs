//! Numeric rating, per-category sub-scores, and the rating-category label.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

use crate::config::Locale;

#[allow(clippy::expect_used)]
static DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:[.,]\d)?)").expect("valid regex")); // Static pattern, safe to panic
#[allow(clippy::expect_used)]
static ARIA_OUT_OF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+(?:[.,]\d)?)\s*out of").expect("valid regex")); // Static pattern, safe to panic
#[allow(clippy::expect_used)]
static REVIEW_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d,.]{1,12})\s*review").expect("valid regex")); // Static pattern, safe to panic

fn parse_decimal(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse::<f64>().ok()
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

/// Extracts the numeric rating, trying DOM score components, aria-labels,
/// itemprop markup, then JSON-LD `aggregateRating`, in that order. Returns the
/// rating plus, when JSON-LD carries it, the review count alongside it.
#[must_use]
pub fn extract_rating(document: &Html, json_ld: &[serde_json::Value]) -> (Option<f64>, Option<i64>) {
    if let Some(sel) = selector(r#"[data-testid="review-score"] div[aria-hidden="true"]"#) {
        if let Some(text) = document.select(&sel).next().map(|el| el.text().collect::<String>()) {
            if let Some(m) = DECIMAL.find(&text) {
                if let Some(value) = parse_decimal(m.as_str()) {
                    return (Some(value), None);
                }
            }
        }
    }

    if let Some(sel) = selector("[aria-label]") {
        for el in document.select(&sel) {
            if let Some(label) = el.value().attr("aria-label") {
                if let Some(m) = ARIA_OUT_OF.captures(label) {
                    if let Some(value) = m.get(1).and_then(|g| parse_decimal(g.as_str())) {
                        return (Some(value), None);
                    }
                }
            }
        }
    }

    if let Some(sel) = selector(r#"[itemprop="ratingValue"]"#) {
        if let Some(raw) = document.select(&sel).next().and_then(|el| {
            el.value()
                .attr("content")
                .map(str::to_string)
                .or_else(|| Some(el.text().collect::<String>()))
        }) {
            if let Some(value) = parse_decimal(raw.trim()) {
                return (Some(value), None);
            }
        }
    }

    if let Some(agg) = json_ld.iter().find_map(|v| v.get("aggregateRating")) {
        let rating = agg.get("ratingValue").and_then(json_number);
        let count = agg.get("reviewCount").and_then(json_number).map(|n| n as i64);
        if rating.is_some() {
            return (rating, count);
        }
    }

    (None, None)
}

fn json_number(value: &serde_json::Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_str().and_then(parse_decimal))
}

/// Extracts `N reviews` style counts from free text, used as a fallback when
/// the structured sources in [`extract_rating`] don't carry one.
#[must_use]
pub fn extract_review_count(text: &str) -> Option<i64> {
    let captures = REVIEW_COUNT.captures(text)?;
    let digits: String = captures.get(1)?.as_str().chars().filter(char::is_ascii_digit).collect();
    digits.parse::<i64>().ok()
}

/// Extracts the per-category sub-score breakdown (e.g. "Cleanliness" -> 9.1).
#[must_use]
pub fn extract_review_scores(document: &Html) -> BTreeMap<String, f64> {
    let Some(row_sel) = selector(r#"[data-testid="review-subscore"]"#) else {
        return BTreeMap::new();
    };
    let Some(label_sel) = selector(".review-subscore-label, span") else {
        return BTreeMap::new();
    };

    let mut scores = BTreeMap::new();
    for row in document.select(&row_sel) {
        let text = row.text().collect::<String>();
        let Some(m) = DECIMAL.find(&text) else { continue };
        let Some(value) = parse_decimal(m.as_str()) else { continue };
        let label = row
            .select(&label_sel)
            .next()
            .map(|el| el.text().collect::<String>())
            .unwrap_or_default();
        let label = label.split_whitespace().collect::<Vec<_>>().join(" ");
        if !label.is_empty() {
            scores.insert(label, value);
        }
    }
    scores
}

struct CategoryWords {
    locale: Locale,
    exceptional: &'static str,
    excellent: &'static str,
    very_good: &'static str,
    good: &'static str,
    fair: &'static str,
}

const CATEGORY_WORDS: &[CategoryWords] = &[
    CategoryWords { locale: "en", exceptional: "Exceptional", excellent: "Excellent", very_good: "Very good", good: "Good", fair: "Fair" },
    CategoryWords { locale: "es", exceptional: "Excepcional", excellent: "Fabuloso", very_good: "Muy bien", good: "Bien", fair: "Aceptable" },
    CategoryWords { locale: "de", exceptional: "Außergewöhnlich", excellent: "Fantastisch", very_good: "Sehr gut", good: "Gut", fair: "Ausreichend" },
    CategoryWords { locale: "fr", exceptional: "Exceptionnel", excellent: "Fabuleux", very_good: "Très bien", good: "Bien", fair: "Correct" },
    CategoryWords { locale: "it", exceptional: "Eccezionale", excellent: "Favoloso", very_good: "Molto buono", good: "Buono", fair: "Sufficiente" },
    CategoryWords { locale: "pt", exceptional: "Excecional", excellent: "Fabuloso", very_good: "Muito bom", good: "Bom", fair: "Razoável" },
    CategoryWords { locale: "nl", exceptional: "Uitzonderlijk", excellent: "Fantastisch", very_good: "Zeer goed", good: "Goed", fair: "Redelijk" },
    CategoryWords { locale: "ru", exceptional: "Потрясающе", excellent: "Превосходно", very_good: "Очень хорошо", good: "Хорошо", fair: "Неплохо" },
];

fn words_for(locale: Locale) -> &'static CategoryWords {
    CATEGORY_WORDS
        .iter()
        .find(|w| w.locale == locale)
        .unwrap_or(&CATEGORY_WORDS[0])
}

fn category_from_rating(rating: f64, words: &CategoryWords) -> &'static str {
    if rating >= 9.0 {
        words.exceptional
    } else if rating >= 8.0 {
        words.excellent
    } else if rating >= 7.0 {
        words.very_good
    } else if rating >= 6.0 {
        words.good
    } else {
        words.fair
    }
}

/// Reads the rating-category label from the DOM in `locale` or English;
/// falls back to a numeric-threshold derivation from `rating` when neither
/// DOM word is present.
#[must_use]
pub fn extract_rating_category(document: &Html, rating: Option<f64>, locale: Locale) -> Option<String> {
    if let Some(sel) = selector(r#"[data-testid="review-score"] div[aria-hidden="true"] + div"#) {
        if let Some(text) = document.select(&sel).next().map(|el| el.text().collect::<String>()) {
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            let words = words_for(locale);
            let english = &CATEGORY_WORDS[0];
            for candidate in [
                words.exceptional, words.excellent, words.very_good, words.good, words.fair,
                english.exceptional, english.excellent, english.very_good, english.good, english.fair,
            ] {
                if text.eq_ignore_ascii_case(candidate) {
                    return Some(candidate.to_string());
                }
            }
        }
    }

    rating.map(|r| category_from_rating(r, words_for(locale)).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_review_count_parses_digits() {
        assert_eq!(extract_review_count("1,234 reviews"), Some(1234));
    }

    #[test]
    fn test_extract_review_count_no_match_is_none() {
        assert_eq!(extract_review_count("no numbers here"), None);
    }

    #[test]
    fn test_category_from_rating_thresholds() {
        let words = words_for("en");
        assert_eq!(category_from_rating(9.4, words), "Exceptional");
        assert_eq!(category_from_rating(8.2, words), "Excellent");
        assert_eq!(category_from_rating(7.1, words), "Very good");
        assert_eq!(category_from_rating(6.0, words), "Good");
        assert_eq!(category_from_rating(4.5, words), "Fair");
    }

    #[test]
    fn test_extract_rating_category_falls_back_to_numeric() {
        let document = Html::parse_document("<html><body></body></html>");
        assert_eq!(
            extract_rating_category(&document, Some(9.1), "en").as_deref(),
            Some("Exceptional")
        );
    }

    #[test]
    fn test_extract_rating_category_none_without_rating() {
        let document = Html::parse_document("<html><body></body></html>");
        assert_eq!(extract_rating_category(&document, None, "en"), None);
    }

    #[test]
    fn test_extract_rating_from_aggregate_rating_json_ld() {
        let json_ld = vec![serde_json::json!({
            "aggregateRating": { "ratingValue": "8.7", "reviewCount": 512 }
        })];
        let document = Html::parse_document("<html><body></body></html>");
        let (rating, count) = extract_rating(&document, &json_ld);
        assert_eq!(rating, Some(8.7));
        assert_eq!(count, Some(512));
    }
}
