//! Response-classification signals: the text fragments that distinguish a
//! real listing page from a block page, a challenge page, or a thin stub.

/// Minimum body length for a 200 response to even be considered for the
/// real-listing signal check; below this it's `short_content` regardless.
pub const MIN_REAL_CONTENT_LEN: usize = 5000;

/// Substrings that only appear in the catalog's actual listing markup.
pub const REAL_LISTING_SIGNALS: &[&str] = &[
    "property-description",
    "hp_facilities_box",
    "maxotelroomarea",
    "reviewscore",
    "review-score",
    "b2hotelpage",
    "hoteldetails",
];

/// Substrings indicating a bot-challenge or consent interstitial rather than
/// the listing itself.
pub const BLOCK_SIGNALS: &[&str] = &[
    "just a moment",
    "access denied",
    "403 forbidden",
    "privacymanager",
    "cookie-consent",
    "please verify you are a human",
    "enable javascript",
    "checking your browser",
];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Outcome of classifying a 200 response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyClassification {
    RealListing,
    ShortContent,
    Blocked,
}

/// Classifies a successful (200) response body per the length/signal table.
#[must_use]
pub fn classify_body(html: &str) -> BodyClassification {
    let lowered = html.to_lowercase();
    if html.len() < MIN_REAL_CONTENT_LEN {
        return BodyClassification::ShortContent;
    }
    if contains_any(&lowered, BLOCK_SIGNALS) {
        return BodyClassification::Blocked;
    }
    if contains_any(&lowered, REAL_LISTING_SIGNALS) {
        return BodyClassification::RealListing;
    }
    BodyClassification::ShortContent
}
