//! Answer Normalization
//!
//! Every comparison the engine makes between a player's answer, the round
//! letter and the lexicon goes through [`normalize`], so all three sides are
//! folded the same way: trimmed, lowercased, diacritics removed.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Normalize free text for comparison.
///
/// Decomposes to NFD and drops combining marks, so `"Ávila "` and `"avila"`
/// compare equal.
pub fn normalize(input: &str) -> String {
    input
        .trim()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Check that an already-normalized answer begins with the round letter.
///
/// The letter is normalized here as well, so callers may pass `'É'`.
pub fn starts_with_letter(normalized: &str, letter: char) -> bool {
    let folded = normalize(&letter.to_string());
    !folded.is_empty() && normalized.starts_with(folded.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_diacritics() {
        assert_eq!(normalize("Borboleta"), "borboleta");
        assert_eq!(normalize("  Ávila "), "avila");
        assert_eq!(normalize("Pêssego"), "pessego");
        assert_eq!(normalize("Ação"), "acao");
    }

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize("  Çedilha Ñandu ");
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn test_starts_with_letter() {
        assert!(starts_with_letter("baleia", 'B'));
        assert!(starts_with_letter("agua", 'Á'));
        assert!(!starts_with_letter("gato", 'B'));
        assert!(!starts_with_letter("", 'B'));
    }
}
