//! Name comparison helpers shared by the matcher and the repair tools.

use crate::constants::consolidation::{TYPO_LONG_PART_LEN, TYPO_MIN_PART_LEN};

use super::normalizer::title_case_word;

/// Edit distance between two strings, or `None` when it exceeds `max`.
///
/// The length difference is a lower bound on the distance, so pairs that
/// cannot be within `max` are rejected before any comparison work.
pub fn bounded_edit_distance(a: &str, b: &str, max: usize) -> Option<usize> {
    let (len_a, len_b) = (a.chars().count(), b.chars().count());
    if len_a.abs_diff(len_b) > max {
        return None;
    }
    let distance = strsim::levenshtein(a, b);
    (distance <= max).then_some(distance)
}

/// Lowercased whitespace-separated parts of a name.
pub fn name_parts(name: &str) -> Vec<String> {
    name.split_whitespace().map(str::to_lowercase).collect()
}

/// Why two names were proposed as a typo pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypoMatch {
    pub differing_part: usize,
    pub distance: usize,
}

/// Checks whether two full names plausibly differ by a single typo.
///
/// Both names need the same number of parts (at least two), at least one part
/// identical, exactly one differing part, and that part must start with the
/// same letter, be at least four characters long on both sides and be within
/// one edit (two edits when the shorter part has ten or more characters).
///
/// This keeps distinct first names such as Peter/Peder or Larry/Carry apart.
///
/// # Examples
/// ```
/// use dart_identity::identity::similarity::typo_match;
///
/// assert!(typo_match("Alexander Feldin", "Alexander Felldin").is_some());
/// assert!(typo_match("Peter", "Peder").is_none());
/// assert!(typo_match("Larry Olsson", "Carry Olsson").is_none());
/// ```
pub fn typo_match(a: &str, b: &str) -> Option<TypoMatch> {
    let parts_a = name_parts(a);
    let parts_b = name_parts(b);
    if parts_a.len() < 2 || parts_a.len() != parts_b.len() {
        return None;
    }

    let differing: Vec<usize> = (0..parts_a.len())
        .filter(|&i| parts_a[i] != parts_b[i])
        .collect();
    if differing.len() != 1 {
        return None;
    }

    let index = differing[0];
    let (part_a, part_b) = (&parts_a[index], &parts_b[index]);

    if part_a.chars().next() != part_b.chars().next() {
        return None;
    }

    let shorter = part_a.chars().count().min(part_b.chars().count());
    if shorter < TYPO_MIN_PART_LEN {
        return None;
    }

    let max_edits = if shorter >= TYPO_LONG_PART_LEN { 2 } else { 1 };
    bounded_edit_distance(part_a, part_b, max_edits).map(|distance| TypoMatch {
        differing_part: index,
        distance,
    })
}

/// Similarity ratio in `0.0..=1.0` between two names, ignoring case.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let a = name_parts(a).join(" ");
    let b = name_parts(b).join(" ");
    strsim::normalized_levenshtein(&a, &b)
}

/// Scores how presentable a display name is.
///
/// Longer, multi-word, consistently title-cased names win; all-lowercase
/// and all-caps spellings are penalized.
pub fn name_quality_score(name: &str) -> i64 {
    let words: Vec<&str> = name.split_whitespace().collect();
    let mut score = name.chars().count() as i64 * 2;

    if words.len() >= 2 {
        score += 100;
    }

    let title_cased = !words.is_empty()
        && words.iter().all(|word| {
            let mut chars = word.chars();
            chars.next().is_some_and(char::is_uppercase) && chars.all(|c| !c.is_uppercase())
        });
    if title_cased {
        score += 200;
    }

    if name.chars().next().is_some_and(char::is_uppercase) {
        score += 20;
    }

    let has_letters = name.chars().any(char::is_alphabetic);
    if has_letters && !name.chars().any(char::is_uppercase) {
        score -= 50;
    }
    if has_letters && !name.chars().any(char::is_lowercase) {
        score -= 40;
    }

    score
}

fn simple_title_case(name: &str) -> String {
    name.split_whitespace()
        .map(title_case_word)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Picks the canonical spelling for two names of the same person.
///
/// Both names are title-cased before scoring; ties keep the first argument.
pub fn choose_canonical_name(first: &str, second: &str) -> String {
    let first = simple_title_case(first);
    let second = simple_title_case(second);
    if name_quality_score(&second) > name_quality_score(&first) {
        second
    } else {
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_edit_distance_length_guard() {
        assert_eq!(bounded_edit_distance("feldin", "felldin", 1), Some(1));
        assert_eq!(bounded_edit_distance("ab", "abcd", 1), None);
        assert_eq!(bounded_edit_distance("same", "same", 0), Some(0));
        assert_eq!(bounded_edit_distance("kitten", "sitting", 2), None);
        assert_eq!(bounded_edit_distance("kitten", "sitting", 3), Some(3));
    }

    #[test]
    fn test_typo_match_accepts_surname_typo() {
        let found = typo_match("Johan Feldin", "Johan Felldin").expect("typo pair");
        assert_eq!(found.differing_part, 1);
        assert_eq!(found.distance, 1);
    }

    #[test]
    fn test_typo_match_rejects_distinct_first_names() {
        assert!(typo_match("Peter", "Peder").is_none());
        assert!(typo_match("Larry", "Carry").is_none());
        assert!(typo_match("Larry Olsson", "Carry Olsson").is_none());
        assert!(typo_match("Per Berg", "Pär Berg").is_none());
        assert!(typo_match("Ola Berg", "Ola Borg").is_some());
    }

    #[test]
    fn test_typo_match_rejects_structural_differences() {
        assert!(typo_match("Feldin", "Felldin").is_none());
        assert!(typo_match("Johan Feldin", "Johan Erik Felldin").is_none());
        assert!(typo_match("Johan Feldin", "Jonas Felldin").is_none());
        assert!(typo_match("Johan Feldin", "Johan Feldin").is_none());
    }

    #[test]
    fn test_typo_match_two_edits_for_long_parts() {
        assert!(typo_match("Anna Kristoffersson", "Anna Kristofersen").is_none());
        assert!(typo_match("Anna Kristoffersson", "Anna Kristofferson").is_some());
        assert!(typo_match("Anna Kristoffersson", "Anna Kristofersson").is_some());
        assert!(typo_match("Anna Kristoffersson", "Anna Kristoferson").is_some());
        assert!(typo_match("Anna Lindgren", "Anna Lindgrem").is_some());
        assert!(typo_match("Anna Lindgren", "Anna Lingdrem").is_none());
    }

    #[test]
    fn test_name_similarity() {
        assert!((name_similarity("Mats Andersson", "MATS ANDERSSON") - 1.0).abs() < f64::EPSILON);
        assert!(name_similarity("Mats Andersson", "Mats Anderson") > 0.9);
        assert!(name_similarity("Mats Andersson", "Lisa Berg") < 0.5);
    }

    #[test]
    fn test_name_quality_score_prefers_title_case() {
        assert!(name_quality_score("Mikael Granath") > name_quality_score("mikael granath"));
        assert!(name_quality_score("Mikael Granath") > name_quality_score("MIKAEL GRANATH"));
        assert!(name_quality_score("Mats Andersson") > name_quality_score("Mats"));
    }

    #[test]
    fn test_choose_canonical_name() {
        assert_eq!(
            choose_canonical_name("mikael granath", "Mikael Granath"),
            "Mikael Granath"
        );
        assert_eq!(choose_canonical_name("Mats", "mats andersson"), "Mats Andersson");
        // equal after title-casing: first argument wins
        assert_eq!(choose_canonical_name("PETER BERG", "peter berg"), "Peter Berg");
    }
}
