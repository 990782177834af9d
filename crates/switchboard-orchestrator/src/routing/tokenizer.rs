//! Request text normalisation.

use super::types::TokenSet;

/// Lower-cases `raw_text`, strips punctuation and splits on whitespace.
///
/// Punctuation is removed rather than replaced, so `"don't."` yields
/// `"don't"` and `"re-use,"` yields `"re-use"`. Underscores, hyphens and
/// apostrophes are kept because they occur inside identifiers and words.
/// Empty or all-punctuation input yields an empty set.
#[must_use]
pub fn tokenize(raw_text: &str) -> TokenSet {
    raw_text
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '\''))
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect()
}
