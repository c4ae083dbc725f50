//! Text normalization for comparing answer cards
//!
//! Two answer cards must not read the same to the learner. This module
//! reduces display text to a comparison key so that differences in quote
//! style, casing or combining marks don't let duplicates through.

use unicode_normalization::UnicodeNormalization;

const COMBINING_DOT_ABOVE: char = '\u{0307}';

/// Normalize answer text for duplicate detection
///
/// - Replaces Unicode quote and hyphen variants with ASCII equivalents
/// - Folds the Turkish dotted/dotless I family (`İ`, `I`, `ı`, `i`) to `i`
/// - Strips combining dot-above marks left over from decomposition
/// - Lowercases and collapses whitespace
///
/// A plain `to_lowercase` turns `İ` into `i̇` (i + U+0307) and leaves `ı`
/// alone, so "İstanbul", "istanbul" and "ıstanbul" would all compare as
/// different words.
pub fn normalize_option_text(text: &str) -> String {
    let folded = text
        .nfd()
        .filter(|c| *c != COMBINING_DOT_ABOVE)
        .map(|c| match c {
            // Single quote variants: ' (U+2018), ' (U+2019), ‚ (U+201A), ‛ (U+201B),
            // ′ (U+2032), ＇ (U+FF07), ʼ (U+02BC), `, ´ (U+00B4)
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' | '\u{FF07}'
            | '\u{02BC}' | '`' | '\u{00B4}' => '\'',

            // Double quote variants: " (U+201C), " (U+201D), „ (U+201E), ‟ (U+201F), ＂ (U+FF02)
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{FF02}' => '"',

            // Hyphen/dash variants: ‐ (U+2010), ‑ (U+2011), ‒ (U+2012), – (U+2013),
            // — (U+2014), − (U+2212), － (U+FF0D)
            '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2212}'
            | '\u{FF0D}' => '-',

            'I' | '\u{0130}' | '\u{0131}' => 'i',

            _ => c,
        })
        .collect::<String>();

    folded
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .nfc()
        .collect()
}

/// Whether two display strings would look like the same answer.
pub fn same_option_text(a: &str, b: &str) -> bool {
    normalize_option_text(a) == normalize_option_text(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turkish_capital_dotted_i() {
        assert_eq!(normalize_option_text("İstanbul"), "istanbul");
        assert_eq!(normalize_option_text("ISTANBUL"), "istanbul");
        assert_eq!(normalize_option_text("ıstanbul"), "istanbul");
    }

    #[test]
    fn test_strips_combining_dot_above() {
        // Lowercasing "İ" with the default mapping yields "i\u{0307}"
        assert_eq!(normalize_option_text("i\u{0307}yi"), "iyi");
    }

    #[test]
    fn test_other_accents_survive() {
        assert_eq!(normalize_option_text("Çiçek"), "çiçek");
        assert_ne!(normalize_option_text("güzel"), normalize_option_text("guzel"));
    }

    #[test]
    fn test_quotes_and_whitespace() {
        assert_eq!(
            normalize_option_text("  l\u{2019}eau   froide "),
            normalize_option_text("l'eau froide")
        );
        assert!(same_option_text("Hello\u{2013}there", "hello-there"));
    }
}
