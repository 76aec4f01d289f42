//! Canonical display-name normalization.
//!
//! Every raw name scraped from the provider passes through [`NameNormalizer`]
//! before any lookup happens, so two spellings that differ only in case,
//! Unicode composition or stray whitespace land on the same string.

use std::collections::HashSet;

use unicode_normalization::UnicodeNormalization;

use crate::constants::bare_name;

/// Parenthesized contents kept exactly as written instead of being title-cased.
const DEFAULT_CLUB_ABBREVIATIONS: &[&str] = &[
    "SSDC",
    "AIK",
    "AIK Dart",
    "HMT",
    "HMT Dart",
    "TYO",
    "TYO DC",
    "DK Pilo",
    "AC DC",
    "BDC",
    "NDC",
    "Mitt i DC",
    "SpikKastarna",
];

const QUOTE_CHARS: &[char] = &['"', '\'', '“', '”', '«', '»'];

/// Returns true for zero-width and other invisible formatting characters.
pub fn is_invisible(c: char) -> bool {
    matches!(c, '\u{200B}'..='\u{200F}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}')
}

/// Whether a normalized name is a single short token such as "Mats".
///
/// Bare first names are ambiguous across clubs and get club context attached
/// by the matcher instead of being merged globally.
pub fn is_bare_first_name(name: &str) -> bool {
    let len = name.chars().count();
    !name.is_empty()
        && !name.chars().any(|c| c.is_whitespace() || c == '(' || c == ')')
        && (bare_name::MIN_LEN..=bare_name::MAX_LEN).contains(&len)
}

/// Title-cases one whitespace-free token.
///
/// Hyphenated parts are capitalized independently and quoted nickname tokens
/// are returned untouched.
pub fn title_case_word(word: &str) -> String {
    if is_quoted(word) {
        return word.to_string();
    }
    word.split('-').map(capitalize).collect::<Vec<_>>().join("-")
}

fn is_quoted(word: &str) -> bool {
    word.chars().count() >= 2 && word.starts_with(QUOTE_CHARS) && word.ends_with(QUOTE_CHARS)
}

fn capitalize(part: &str) -> String {
    let mut chars = part.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };

    let mut out = String::with_capacity(part.len());
    let upper = first.to_uppercase();
    // Multi-char uppercase forms (ß -> SS) would not survive a second pass.
    if upper.len() == 1 {
        out.extend(upper);
    } else {
        out.push(first);
    }
    out.extend(chars.flat_map(char::to_lowercase));
    out
}

fn title_case_words(text: &str) -> String {
    text.split_whitespace()
        .map(title_case_word)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Produces the canonical display form of a player name.
#[derive(Debug, Clone)]
pub struct NameNormalizer {
    club_abbreviations: HashSet<String>,
}

impl Default for NameNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl NameNormalizer {
    /// Creates a normalizer with the built-in club abbreviation list.
    pub fn new() -> Self {
        Self {
            club_abbreviations: DEFAULT_CLUB_ABBREVIATIONS
                .iter()
                .map(|abbr| abbr.to_lowercase())
                .collect(),
        }
    }

    /// Creates a normalizer with additional abbreviations on top of the defaults.
    pub fn with_abbreviations<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalizer = Self::new();
        normalizer.club_abbreviations.extend(
            extra
                .into_iter()
                .map(|abbr| abbr.as_ref().trim().to_lowercase())
                .filter(|abbr| !abbr.is_empty()),
        );
        normalizer
    }

    /// Whether parenthesized content is a known club abbreviation.
    pub fn is_club_abbreviation(&self, content: &str) -> bool {
        self.club_abbreviations.contains(&content.trim().to_lowercase())
    }

    /// Normalizes a raw player name into its canonical display form.
    ///
    /// The result is stable under repeated application and the function never
    /// fails; an empty input comes back empty.
    ///
    /// # Arguments
    /// * `raw` - Name as scraped from the provider
    ///
    /// # Returns
    /// * `String` - Title-cased, NFC-composed name with whitespace collapsed
    ///
    /// # Examples
    /// ```
    /// use dart_identity::identity::NameNormalizer;
    ///
    /// let normalizer = NameNormalizer::new();
    /// assert_eq!(normalizer.normalize("MIKAEL  granath"), "Mikael Granath");
    /// assert_eq!(normalizer.normalize("anna-karin berg"), "Anna-Karin Berg");
    /// assert_eq!(normalizer.normalize("mats (SSDC)"), "Mats (SSDC)");
    /// assert_eq!(normalizer.normalize("mats (dartanjang)"), "Mats (Dartanjang)");
    /// ```
    pub fn normalize(&self, raw: &str) -> String {
        if raw.is_empty() {
            return String::new();
        }

        let cleaned: String = raw.nfc().filter(|c| !is_invisible(*c)).collect();
        let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

        let composed = match (collapsed.find('('), collapsed.rfind(')')) {
            (Some(open), Some(close)) if open < close => {
                let prefix = title_case_words(&collapsed[..open]);
                let content = collapsed[open + 1..close].trim();
                let suffix = title_case_words(&collapsed[close + 1..]);

                let content = if self.is_club_abbreviation(content) {
                    content.to_string()
                } else {
                    title_case_words(content)
                };

                let mut parts = Vec::with_capacity(3);
                if !prefix.is_empty() {
                    parts.push(prefix);
                }
                if !content.is_empty() {
                    parts.push(format!("({content})"));
                }
                if !suffix.is_empty() {
                    parts.push(suffix);
                }
                parts.join(" ")
            }
            _ => title_case_words(&collapsed),
        };

        // Case mapping can leave decomposed sequences behind.
        composed.nfc().collect()
    }

    /// Normalizes an optional name, passing `None` through.
    pub fn normalize_opt(&self, raw: Option<&str>) -> Option<String> {
        raw.map(|name| self.normalize(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_title_case() {
        let normalizer = NameNormalizer::new();
        assert_eq!(normalizer.normalize("mikael granath"), "Mikael Granath");
        assert_eq!(normalizer.normalize("MIKAEL GRANATH"), "Mikael Granath");
        assert_eq!(normalizer.normalize("Mikael Granath"), "Mikael Granath");
    }

    #[test]
    fn test_whitespace_collapsed() {
        let normalizer = NameNormalizer::new();
        assert_eq!(normalizer.normalize("  Peter \t  Berg  "), "Peter Berg");
    }

    #[test]
    fn test_invisible_characters_removed() {
        let normalizer = NameNormalizer::new();
        assert_eq!(
            normalizer.normalize("Mikael\u{200B} Gran\u{FEFF}ath"),
            "Mikael Granath"
        );
        assert_eq!(normalizer.normalize("Pe\u{00AD}ter"), "Peter");
    }

    #[test]
    fn test_nfc_composition() {
        let normalizer = NameNormalizer::new();
        // "Jarfalla" spelled with combining diaeresis and ring
        let decomposed = "ja\u{0308}rfa\u{0308}lla a\u{030A}berg";
        assert_eq!(normalizer.normalize(decomposed), "Järfälla Åberg");
    }

    #[test]
    fn test_hyphenated_parts_capitalized() {
        let normalizer = NameNormalizer::new();
        assert_eq!(normalizer.normalize("per-erik SVENSSON"), "Per-Erik Svensson");
        assert_eq!(normalizer.normalize("ANNA-KARIN"), "Anna-Karin");
    }

    #[test]
    fn test_quoted_nickname_kept_verbatim() {
        let normalizer = NameNormalizer::new();
        assert_eq!(
            normalizer.normalize("johan \"theBULL\" lind"),
            "Johan \"theBULL\" Lind"
        );
    }

    #[test]
    fn test_paren_club_abbreviation_preserved() {
        let normalizer = NameNormalizer::new();
        assert_eq!(normalizer.normalize("MATS (SSDC)"), "Mats (SSDC)");
        assert_eq!(normalizer.normalize("mats (ssdc)"), "Mats (ssdc)");
        assert_eq!(normalizer.normalize("Mats (TYO DC)"), "Mats (TYO DC)");
    }

    #[test]
    fn test_paren_content_title_cased() {
        let normalizer = NameNormalizer::new();
        assert_eq!(
            normalizer.normalize("mats andersson (DARTANJANG)"),
            "Mats Andersson (Dartanjang)"
        );
        assert_eq!(
            normalizer.normalize("Lars ( stockholm  BULLSEYE )"),
            "Lars (Stockholm Bullseye)"
        );
        assert_eq!(normalizer.normalize("Lars (mitt i dc)"), "Lars (mitt i dc)");
    }

    #[test]
    fn test_extra_abbreviations() {
        let normalizer = NameNormalizer::with_abbreviations(["NWDC"]);
        assert_eq!(normalizer.normalize("olle (NWDC)"), "Olle (NWDC)");
        assert_eq!(NameNormalizer::new().normalize("olle (NWDC)"), "Olle (Nwdc)");
    }

    #[test]
    fn test_empty_and_none_pass_through() {
        let normalizer = NameNormalizer::new();
        assert_eq!(normalizer.normalize(""), "");
        assert_eq!(normalizer.normalize_opt(None), None);
        assert_eq!(
            normalizer.normalize_opt(Some("peder")),
            Some("Peder".to_string())
        );
    }

    #[test]
    fn test_sharp_s_not_expanded() {
        let normalizer = NameNormalizer::new();
        assert_eq!(normalizer.normalize("ßandra"), "ßandra");
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let normalizer = NameNormalizer::new();
        let inputs = [
            "mikael granath",
            "MIKAEL GRANATH",
            "  per-erik   o'BRIEN ",
            "mats (ssdc)",
            "mats (dartanjang) jr",
            "a (b (c) d) e",
            "(SSDC)",
            "lars ()",
            "ßtefan ǆukić",
            "İlker Yıldız",
            "ja\u{0308}rfa\u{0308}lla",
            "johan \"the bull\" lind",
            "\u{200B}",
            "x",
            "-",
            "o'neil mc-donald",
        ];

        for input in inputs {
            let once = normalizer.normalize(input);
            let twice = normalizer.normalize(&once);
            assert_eq!(once, twice, "normalization not idempotent for {input:?}");
        }
    }

    #[test]
    fn test_is_bare_first_name() {
        assert!(is_bare_first_name("Mats"));
        assert!(is_bare_first_name("Lisa"));
        assert!(!is_bare_first_name("Bo"));
        assert!(!is_bare_first_name("Mats Andersson"));
        assert!(!is_bare_first_name("Mats(SSDC)"));
        assert!(!is_bare_first_name("Abcdefghijklmnopq"));
        assert!(!is_bare_first_name(""));
    }

    #[test]
    fn test_title_case_word() {
        assert_eq!(title_case_word("granath"), "Granath");
        assert_eq!(title_case_word("GRAN-ath"), "Gran-Ath");
        assert_eq!(title_case_word("\"Bullen\""), "\"Bullen\"");
        assert_eq!(title_case_word(""), "");
    }
}
