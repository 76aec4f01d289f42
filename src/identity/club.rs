//! Team label to canonical club resolution.
//!
//! Provider team labels carry division markers ("AIK Dart SL6",
//! "Spikkastarna B (Grupp 2)") and historical spellings. The resolver strips
//! the division part and maps known aliases so that every label of one club
//! resolves to the same string.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use super::normalizer::is_invisible;

static TRAILING_PARENTHESIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\([^)]*\)$").expect("valid division parenthesis pattern"));

static TRAILING_DIVISION_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s+(SL\d+|DS|\d+F[A-Z]+|\d+[A-Z]+|Superligan)$")
        .expect("valid division code pattern")
});

/// Curated label variants, keyed case-insensitively.
const DEFAULT_CLUB_ALIASES: &[(&str, &str)] = &[
    ("AIK", "AIK Dart"),
    ("AIK Dart", "AIK Dart"),
    ("AIK Dartförening", "AIK Dart"),
    ("Solna AIK", "AIK Dart"),
    ("Engelen", "HMT Dart"),
    ("HMT Dart", "HMT Dart"),
    ("Spikkastarna B", "SpikKastarna"),
    ("SpikKastarna", "SpikKastarna"),
    ("Järfalla", "Järfälla"),
];

/// Words that say nothing about which club a label belongs to.
const DART_WORDS: &[&str] = &[
    "dc",
    "dart",
    "darts",
    "dartclub",
    "dartklubb",
    "dartförening",
    "club",
];

/// Groups of label fragments known to denote the same club.
const SAME_CLUB_GROUPS: &[&[&str]] = &[
    &["nacka", "wermdö", "värmdö"],
    &["stockholm bullseye", "bullseye"],
    &["spikkastarna", "spik kastarna"],
    &["dartanjang", "d'artanjang"],
    &["mitt i dc", "mitt i"],
    &["belkin power", "belkin"],
];

/// Removes trailing division markers from a team label.
///
/// # Examples
/// ```
/// use dart_identity::identity::club::strip_division;
///
/// assert_eq!(strip_division("AIK Dart SL6"), "AIK Dart");
/// assert_eq!(strip_division("Spikkastarna B (Grupp 2)"), "Spikkastarna B");
/// assert_eq!(strip_division("Oilers 2FA"), "Oilers");
/// ```
pub fn strip_division(label: &str) -> String {
    let mut current = label.trim().to_string();
    loop {
        let without_paren = TRAILING_PARENTHESIS.replace(&current, "");
        let without_code = TRAILING_DIVISION_CODE.replace(&without_paren, "");
        let next = without_code.trim().to_string();
        if next == current || next.is_empty() {
            return if next.is_empty() { current } else { next };
        }
        current = next;
    }
}

fn club_core(name: &str) -> String {
    name.split_whitespace()
        .filter(|word| !DART_WORDS.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

fn fold_spelling(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| match c {
            'å' | 'ä' => 'a',
            'ö' => 'o',
            other => other,
        })
        .collect()
}

/// Maps team labels to canonical club names.
#[derive(Debug, Clone)]
pub struct ClubContextResolver {
    aliases: HashMap<String, String>,
}

impl Default for ClubContextResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ClubContextResolver {
    /// Creates a resolver with the built-in alias table.
    pub fn new() -> Self {
        let aliases = DEFAULT_CLUB_ALIASES
            .iter()
            .map(|(alias, canonical)| (alias.to_lowercase(), canonical.to_string()))
            .collect();
        Self { aliases }
    }

    /// Creates a resolver with configured aliases layered over the defaults.
    pub fn with_aliases<'a, I>(extra: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut resolver = Self::new();
        for (alias, canonical) in extra {
            resolver
                .aliases
                .insert(alias.trim().to_lowercase(), canonical.trim().to_string());
        }
        resolver
    }

    /// Resolves a raw team label to its canonical club name.
    ///
    /// Empty or whitespace-only labels resolve to an empty string.
    pub fn resolve(&self, label: &str) -> String {
        let cleaned: String = label.nfkc().filter(|c| !is_invisible(*c)).collect();
        let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            return String::new();
        }

        let stripped = strip_division(&collapsed);
        match self.aliases.get(&stripped.to_lowercase()) {
            Some(canonical) => canonical.clone(),
            None => stripped,
        }
    }

    /// Resolves an optional label, treating `None` as no club.
    pub fn resolve_opt(&self, label: Option<&str>) -> Option<String> {
        label
            .map(|label| self.resolve(label))
            .filter(|club| !club.is_empty())
    }

    /// Whether two labels denote the same club.
    ///
    /// Stricter signals are tried first: identical resolution, identical core
    /// name once generic dart words are dropped, spelling-folded equality,
    /// containment of one long name in the other and finally the curated
    /// group list. The check is symmetric.
    pub fn same_club(&self, a: &str, b: &str) -> bool {
        let a = self.resolve(a).to_lowercase();
        let b = self.resolve(b).to_lowercase();
        if a.is_empty() || b.is_empty() {
            return false;
        }
        if a == b {
            return true;
        }

        let (core_a, core_b) = (club_core(&a), club_core(&b));
        if core_a.chars().count() >= 3 && core_a == core_b {
            return true;
        }

        if fold_spelling(&a) == fold_spelling(&b) {
            return true;
        }

        if a.chars().count() >= 5 && b.chars().count() >= 5 && (a.contains(&b) || b.contains(&a)) {
            return true;
        }

        SAME_CLUB_GROUPS.iter().any(|group| {
            group.iter().any(|key| a.contains(key)) && group.iter().any(|key| b.contains(key))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_division_codes() {
        assert_eq!(strip_division("AIK Dart SL6"), "AIK Dart");
        assert_eq!(strip_division("SSDC DS"), "SSDC");
        assert_eq!(strip_division("Dartanjang 3B"), "Dartanjang");
        assert_eq!(strip_division("Oilers 2FA"), "Oilers");
        assert_eq!(strip_division("Bullseye Superligan"), "Bullseye");
        assert_eq!(strip_division("HMT Dart (Division 2)"), "HMT Dart");
    }

    #[test]
    fn test_strip_division_requires_separator() {
        assert_eq!(strip_division("Birds"), "Birds");
        assert_eq!(strip_division("BIRDS"), "BIRDS");
    }

    #[test]
    fn test_strip_division_repeated_markers() {
        assert_eq!(strip_division("AIK Dart SL6 (Grupp A)"), "AIK Dart");
    }

    #[test]
    fn test_strip_division_never_empties_label() {
        assert_eq!(strip_division("(Division 1)"), "(Division 1)");
        assert_eq!(strip_division("DS"), "DS");
    }

    #[test]
    fn test_resolve_aliases_case_insensitive() {
        let resolver = ClubContextResolver::new();
        assert_eq!(resolver.resolve("AIK"), "AIK Dart");
        assert_eq!(resolver.resolve("aik dartförening SL4"), "AIK Dart");
        assert_eq!(resolver.resolve("Solna AIK"), "AIK Dart");
        assert_eq!(resolver.resolve("Engelen 2B"), "HMT Dart");
        assert_eq!(resolver.resolve("Spikkastarna B (Grupp 2)"), "SpikKastarna");
        assert_eq!(resolver.resolve("Järfalla"), "Järfälla");
    }

    #[test]
    fn test_resolve_unknown_label_is_cleaned() {
        let resolver = ClubContextResolver::new();
        assert_eq!(resolver.resolve("  Dartanjang\u{200B}  SL2 "), "Dartanjang");
        assert_eq!(resolver.resolve("Mitt\u{00A0}i DC"), "Mitt i DC");
    }

    #[test]
    fn test_resolve_empty_label() {
        let resolver = ClubContextResolver::new();
        assert_eq!(resolver.resolve(""), "");
        assert_eq!(resolver.resolve("   "), "");
        assert_eq!(resolver.resolve_opt(None), None);
        assert_eq!(resolver.resolve_opt(Some(" ")), None);
    }

    #[test]
    fn test_configured_aliases_override_defaults() {
        let extra: HashMap<String, String> = [
            ("Tyresö DK".to_string(), "Tyresö Dart".to_string()),
            ("AIK".to_string(), "AIK".to_string()),
        ]
        .into_iter()
        .collect();
        let resolver = ClubContextResolver::with_aliases(&extra);
        assert_eq!(resolver.resolve("tyresö dk SL3"), "Tyresö Dart");
        assert_eq!(resolver.resolve("AIK"), "AIK");
    }

    #[test]
    fn test_same_club_variants() {
        let resolver = ClubContextResolver::new();
        assert!(resolver.same_club("AIK SL6", "AIK Dartförening 2A"));
        assert!(resolver.same_club("Dartanjang DC", "Dartanjang"));
        assert!(resolver.same_club("Nacka DC", "Wermdö Dart"));
        assert!(resolver.same_club("Stockholm Bullseye", "Bullseye Superligan"));
        assert!(resolver.same_club("Spik Kastarna", "SpikKastarna"));
        assert!(resolver.same_club("Mitt i DC", "Mitt i DC SL2"));
    }

    #[test]
    fn test_different_clubs() {
        let resolver = ClubContextResolver::new();
        assert!(!resolver.same_club("SSDC", "Dartanjang"));
        assert!(!resolver.same_club("AIK Dart", "HMT Dart"));
        assert!(!resolver.same_club("", "AIK"));
    }

    #[test]
    fn test_same_club_is_symmetric() {
        let resolver = ClubContextResolver::new();
        let labels = [
            "AIK SL6",
            "HMT Dart",
            "Engelen",
            "Nacka DC",
            "Wermdö",
            "SSDC DS",
            "Dartanjang 2B",
            "Stockholm Bullseye",
            "",
        ];
        for a in labels {
            for b in labels {
                assert_eq!(
                    resolver.same_club(a, b),
                    resolver.same_club(b, a),
                    "same_club not symmetric for {a:?} / {b:?}"
                );
            }
        }
    }
}
