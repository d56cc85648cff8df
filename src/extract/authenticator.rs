//! Language authenticator: refuses extracted text that was served in the wrong locale.
//!
//! Per-locale signal tables are short, high-frequency, low-ambiguity tokens (articles,
//! common verbs, domain-specific nouns). Ported in spirit (not verbatim text — the
//! original's tables are for its own eight locales) for `en`, `es`, `de`, `fr`, `it`,
//! `pt`, `nl`, `ru`; any other configured locale has no table and is treated as
//! insufficient signal, so it always authenticates.

use crate::config::Locale;

/// Positive and negative substring tables for one locale.
struct SignalSet {
    locale: Locale,
    positive: &'static [&'static str],
    negative: &'static [&'static str],
}

/// `positive` tokens are short, high-frequency words of the locale itself.
/// `negative` tokens are positive signals borrowed from *other* locales, chosen to be
/// unlikely loan-words (so their presence is real evidence of contamination).
const SIGNAL_SETS: &[SignalSet] = &[
    SignalSet {
        locale: "en",
        positive: &["the ", "breakfast", "swimming", "bedroom", "check-in", "free wifi"],
        negative: &["frühstück", "habitaci", "завтрак", "petit-déjeuner", "ontbijt"],
    },
    SignalSet {
        locale: "es",
        positive: &["está ", "habitaci", "desayuno", "piscina", "gratis"],
        negative: &["breakfast", "frühstück", "завтрак", "zwembad", "chambre"],
    },
    SignalSet {
        locale: "de",
        positive: &["das ", "verfüg", "zimmer", "frühstück", "kostenlos"],
        negative: &["breakfast", "habitaci", "завтрак", "petit-déjeuner", "piscina"],
    },
    SignalSet {
        locale: "fr",
        positive: &["le ", "chambre", "petit-déjeuner", "piscine", "gratuit"],
        negative: &["breakfast", "frühstück", "завтрак", "habitaci", "zwembad"],
    },
    SignalSet {
        locale: "it",
        positive: &["la ", "camera", "colazione", "piscina", "gratuito"],
        negative: &["breakfast", "frühstück", "завтрак", "chambre", "zwembad"],
    },
    SignalSet {
        locale: "pt",
        positive: &["está ", "quarto", "pequeno-almoço", "piscina", "gratuito"],
        negative: &["breakfast", "frühstück", "завтрак", "zwembad", "chambre"],
    },
    SignalSet {
        locale: "nl",
        positive: &["de ", "kamer", "ontbijt", "zwembad", "gratis"],
        negative: &["breakfast", "frühstück", "завтрак", "habitaci", "chambre"],
    },
    SignalSet {
        locale: "ru",
        positive: &["гостини", "завтрак", "бесплатно", "номер"],
        negative: &["breakfast", "frühstück", "habitaci", "chambre", "zwembad"],
    },
];

fn signal_set(locale: Locale) -> Option<&'static SignalSet> {
    SIGNAL_SETS.iter().find(|set| set.locale == locale)
}

fn count_hits(lowercased: &str, tokens: &[&str]) -> usize {
    tokens.iter().filter(|token| lowercased.contains(*token)).count()
}

/// Minimum text length below which there's insufficient signal to judge locale at all.
const MIN_SIGNAL_LEN: usize = 30;

/// Minimum negative-hit count required before a mismatch can be declared.
const MIN_NEGATIVE_HITS: usize = 3;

/// Validates that `text` plausibly belongs to `locale`.
///
/// Pure function: the same input always produces the same output, and a text that
/// once validates for a locale keeps validating for it (nothing here depends on
/// mutable state).
#[must_use]
pub fn validate(text: &str, locale: Locale) -> bool {
    if text.chars().count() < MIN_SIGNAL_LEN {
        return true;
    }
    let Some(set) = signal_set(locale) else {
        return true;
    };

    let lowered = text.to_lowercase();
    let pos_hits = count_hits(&lowered, set.positive);
    let neg_hits = count_hits(&lowered, set.negative);

    !(neg_hits >= MIN_NEGATIVE_HITS && neg_hits > pos_hits)
}

/// Scores `text` against every known locale's positive signals and returns the
/// best-scoring locale. Used to populate `detected_locale` when the requested
/// locale's authentication fails.
#[must_use]
pub fn best_matching_locale(text: &str) -> Locale {
    let lowered = text.to_lowercase();
    SIGNAL_SETS
        .iter()
        .max_by_key(|set| count_hits(&lowered, set.positive))
        .map_or("en", |set| set.locale)
}
