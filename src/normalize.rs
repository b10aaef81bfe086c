//! Text normalization for fingerprinting and embedding.
//!
//! Both forms start from the same token-truncated text:
//! 1. Split on whitespace
//! 2. Keep the first `max_tokens` tokens
//! 3. Rejoin with single spaces
//!
//! The fingerprint form is additionally NFKC-normalized and lowercased so that
//! descriptions differing only in case, composition or spacing fold together.

use unicode_normalization::UnicodeNormalization;

/// Keep only the first `max_tokens` whitespace-delimited tokens.
pub fn truncate_tokens(text: &str, max_tokens: usize) -> String {
    text.split_whitespace()
        .take(max_tokens)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Canonical text a dedup key is computed from.
pub fn fingerprint_text(text: &str, max_tokens: usize) -> String {
    let truncated = truncate_tokens(text, max_tokens);
    let folded = truncated.nfkc().collect::<String>().to_lowercase();

    // NFKC can turn compatibility characters (e.g. U+3000) into plain spaces
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_to_max_tokens() {
        assert_eq!(truncate_tokens("a b c d e", 3), "a b c");
    }

    #[test]
    fn collapses_whitespace_runs() {
        assert_eq!(truncate_tokens("  a \t b\n\nc  ", 128), "a b c");
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(truncate_tokens("", 128), "");
        assert_eq!(fingerprint_text("   ", 128), "");
    }

    #[test]
    fn fingerprint_folds_case_and_spacing() {
        assert_eq!(
            fingerprint_text("A fine red wine", 128),
            fingerprint_text("a   FINE red wine", 128)
        );
    }

    #[test]
    fn fingerprint_folds_composed_and_decomposed_accents() {
        let composed = "Ros\u{e9} from Provence";
        let decomposed = "Rose\u{301} from Provence";
        assert_ne!(composed, decomposed);
        assert_eq!(fingerprint_text(composed, 128), fingerprint_text(decomposed, 128));
    }

    #[test]
    fn fingerprint_applies_compatibility_forms() {
        assert_eq!(fingerprint_text("\u{fb01}ne", 128), "fine");
        assert_eq!(fingerprint_text("red\u{3000}wine", 128), "red wine");
    }

    #[test]
    fn fingerprint_ignores_text_past_the_limit() {
        let base = vec!["word"; 128].join(" ");
        let a = format!("{base} tail one");
        let b = format!("{base} other tail");
        assert_eq!(fingerprint_text(&a, 128), fingerprint_text(&b, 128));
    }
}
