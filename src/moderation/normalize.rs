//! Content normalization for the word filter
//!
//! Message text is folded into plain lowercase ASCII before any word
//! matching, then reduced further into two derived forms. All three forms are
//! computed once per message and shared by every filter rule.

use deunicode::deunicode_with_tofu;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Cyrillic letters commonly used to spoof Latin text
const CYRILLIC_LOOKALIKES: &str = "абвгдеёжзийклмнопрстуфхцчшщъыьэюя";

/// ASCII the lookalikes read as, position for position
const ASCII_FOLDS: &str = "abbrdeex3nnknmhonpctyoxu4wwbbbeor";

/// Lookalike translation table, applied before the general ASCII fold so the
/// visual mapping wins over transliteration
static LOOKALIKE_TABLE: LazyLock<HashMap<char, char>> =
    LazyLock::new(|| CYRILLIC_LOOKALIKES.chars().zip(ASCII_FOLDS.chars()).collect());

/// Fold text into lowercase ASCII.
///
/// Lowercases, maps Cyrillic lookalikes to the Latin letters they imitate,
/// then strips the remaining diacritics and non-ASCII. Characters with no
/// ASCII equivalent are dropped.
#[must_use]
pub fn fold(content: &str) -> String {
    let translated: String = content
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| LOOKALIKE_TABLE.get(&c).copied().unwrap_or(c))
        .collect();
    deunicode_with_tofu(&translated, "").to_lowercase()
}

/// The three matching forms derived from one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedContent {
    /// Folded lowercase ASCII with spacing intact
    pub folded: String,
    /// Folded text with all whitespace removed
    pub spaceless: String,
    /// Spaceless text with ASCII punctuation removed as well
    pub skeleton: String,
}

impl NormalizedContent {
    /// Normalize message text into its three matching forms
    #[must_use]
    pub fn new(content: &str) -> Self {
        let folded = fold(content);
        let spaceless: String = folded.chars().filter(|c| !c.is_whitespace()).collect();
        let skeleton: String = spaceless
            .chars()
            .filter(|c| !c.is_ascii_punctuation())
            .collect();

        Self {
            folded,
            spaceless,
            skeleton,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_lowercases_ascii() {
        assert_eq!(fold("Hello World"), "hello world");
    }

    #[test]
    fn test_fold_maps_cyrillic_lookalikes() {
        // Full Cyrillic spoof of a Latin word
        assert_eq!(fold("вад"), "bad");
        // A single substituted letter inside Latin text
        assert_eq!(fold("bаd"), "bad");
        // Uppercase lookalikes fold the same way
        assert_eq!(fold("ВАД"), "bad");
    }

    #[test]
    fn test_fold_strips_diacritics() {
        assert_eq!(fold("naïve"), "naive");
        assert_eq!(fold("crème brûlée"), "creme brulee");
    }

    #[test]
    fn test_lookalike_table_covers_every_letter() {
        assert_eq!(
            CYRILLIC_LOOKALIKES.chars().count(),
            ASCII_FOLDS.chars().count()
        );
        for c in CYRILLIC_LOOKALIKES.chars() {
            assert!(LOOKALIKE_TABLE.contains_key(&c), "missing fold for {c}");
        }
    }

    #[test]
    fn test_normalized_forms() {
        let normalized = NormalizedContent::new("B a.d W-o r,d");

        assert_eq!(normalized.folded, "b a.d w-o r,d");
        assert_eq!(normalized.spaceless, "ba.dw-or,d");
        assert_eq!(normalized.skeleton, "badword");
    }

    #[test]
    fn test_spaceless_keeps_punctuation() {
        let normalized = NormalizedContent::new("w.o.r.d");

        assert_eq!(normalized.folded, "w.o.r.d");
        assert_eq!(normalized.spaceless, "w.o.r.d");
        assert_eq!(normalized.skeleton, "word");
    }

    #[test]
    fn test_clean_text_passes_through() {
        let normalized = NormalizedContent::new("just a normal sentence");

        assert_eq!(normalized.folded, "just a normal sentence");
        assert_eq!(normalized.spaceless, "justanormalsentence");
        assert_eq!(normalized.skeleton, "justanormalsentence");
    }
}
