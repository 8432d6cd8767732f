//! Text normalization and edit-distance similarity.
//!
//! Everything here is pure: the classifier and the confirmation/cancellation
//! vocabularies all compare against the same normalized form, so "Telé",
//! "tele." and "TELE" are the same token.

use unicode_normalization::UnicodeNormalization;

/// Decompose to NFD, drop combining marks, drop everything that is not a
/// letter, digit or whitespace, lowercase and trim.
pub fn normalize(text: &str) -> String {
    let stripped: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    stripped.to_lowercase().trim().to_string()
}

fn is_combining_mark(c: char) -> bool {
    // U+0300..U+036F covers the diacritics produced by NFD for Latin text.
    ('\u{0300}'..='\u{036f}').contains(&c)
}

/// Similarity in [0, 1] between the normalized forms of `a` and `b`,
/// 1.0 meaning identical. Two empty strings are identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let norm_a = normalize(a);
    let norm_b = normalize(b);
    let max_len = norm_a.chars().count().max(norm_b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = strsim::levenshtein(&norm_a, &norm_b);
    1.0 - (distance as f64 / max_len as f64)
}

/// Length-adaptive threshold: 2-3 letter tokens must match near-exactly,
/// otherwise edit distance produces false positives on short words.
pub fn adaptive_threshold(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len <= 3 {
        0.9
    } else {
        0.8
    }
}

/// Convenience check: similarity against the adaptive threshold.
pub fn adaptive_similarity_check(a: &str, b: &str) -> bool {
    similarity(a, b) >= adaptive_threshold(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_accents_and_punctuation() {
        assert_eq!(normalize("¡Hola, cómo estás?"), "hola como estas");
        assert_eq!(normalize("Telé"), "tele");
        assert_eq!(normalize("  Room-Service 1010!  "), "roomservice 1010");
    }

    #[test]
    fn normalize_empty_and_symbol_only() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("*** !!! ---"), "");
    }

    #[test]
    fn similarity_identical_after_normalization() {
        assert!(similarity("café", "cafe") >= 0.95);
        assert_eq!(similarity("", ""), 1.0);
    }

    #[test]
    fn similarity_distinguishes_unrelated_words() {
        assert!(similarity("café", "té") < 0.9);
        assert!(similarity("internet", "mantenimiento") < 0.5);
    }

    #[test]
    fn threshold_tightens_for_short_tokens() {
        assert_eq!(adaptive_threshold("it", "ti"), 0.9);
        assert_eq!(adaptive_threshold("luz", "lus"), 0.9);
        assert_eq!(adaptive_threshold("internet", "internt"), 0.8);
    }

    #[test]
    fn adaptive_check_accepts_typos_on_long_words() {
        assert!(adaptive_similarity_check("mantenimento", "mantenimiento"));
        assert!(!adaptive_similarity_check("it", "ama"));
    }
}
