//! Merging near-duplicate identities back into one.
//!
//! Two rule sets find duplicates: names that differ only by case, and
//! multi-part names that differ by a single small typo in one part. Both
//! end in [`merge_players`], which moves every reference from the loser to
//! the survivor before deleting the loser.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, instrument};

use super::normalizer::NameNormalizer;
use super::similarity::{name_quality_score, name_similarity, typo_match};
use crate::constants::consolidation::SUGGESTION_SIMILARITY;
use crate::error::AppError;
use crate::store::{
    GlobalMappingRepo, ObservationRepo, OverrideRepo, PlayerId, PlayerRepo, PlayerUsage,
    RosterEntry,
};

/// What one loser-into-survivor merge rewrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub survivor_id: PlayerId,
    pub loser_id: PlayerId,
    pub loser_name: String,
    pub observations_moved: usize,
    pub observations_dropped: usize,
    pub overrides_updated: usize,
    pub overrides_deleted: usize,
    pub mappings_updated: usize,
    pub mappings_deleted: usize,
}

/// Moves every reference from `loser` to `survivor` and deletes `loser`.
///
/// Observations that would duplicate an existing survivor row and overrides
/// or mappings that would point a Player at itself are deleted.
pub fn merge_players(
    conn: &Connection,
    loser: PlayerId,
    survivor: PlayerId,
) -> Result<MergeOutcome, AppError> {
    if loser == survivor {
        return Err(AppError::validation(format!(
            "cannot merge player {loser} into itself"
        )));
    }
    let players = PlayerRepo::new(conn);
    let loser_player = players.require(loser)?;
    let survivor_player = players.require(survivor)?;

    let (observations_moved, observations_dropped) =
        ObservationRepo::new(conn).merge_player(loser, survivor)?;

    let overrides = OverrideRepo::new(conn);
    let (orig_updated, orig_deleted) = overrides.merge_original(loser, survivor)?;
    let (target_updated, target_deleted) =
        overrides.merge_target(loser, survivor, &survivor_player.name)?;

    let (mappings_updated, mappings_deleted) =
        GlobalMappingRepo::new(conn).merge_player(loser, survivor)?;

    players.delete(loser)?;
    debug!(
        "Merged '{}' into '{}': {observations_moved} moved, {observations_dropped} dropped",
        loser_player.name, survivor_player.name
    );

    Ok(MergeOutcome {
        survivor_id: survivor,
        loser_id: loser,
        loser_name: loser_player.name,
        observations_moved,
        observations_dropped,
        overrides_updated: orig_updated + target_updated,
        overrides_deleted: orig_deleted + target_deleted,
        mappings_updated,
        mappings_deleted,
    })
}

/// Players whose names differ only by case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseGroup {
    pub canonical_name: String,
    pub survivor: PlayerUsage,
    pub losers: Vec<PlayerUsage>,
}

impl CaseGroup {
    pub fn needs_rename(&self) -> bool {
        self.survivor.player.name != self.canonical_name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseOutcome {
    pub canonical_name: String,
    pub survivor_id: PlayerId,
    pub renamed: bool,
    pub merges: Vec<MergeOutcome>,
}

/// Two names one typo apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypoPair {
    pub survivor: PlayerUsage,
    pub loser: PlayerUsage,
    pub differing_part: usize,
    pub distance: usize,
}

/// Why two roster entries look like the same person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKind {
    CaseDifference,
    HighSimilarity,
    SubstringMatch,
    FirstNameOnly,
}

impl DuplicateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateKind::CaseDifference => "case_difference",
            DuplicateKind::HighSimilarity => "high_similarity",
            DuplicateKind::SubstringMatch => "substring_match",
            DuplicateKind::FirstNameOnly => "first_name_only",
        }
    }
}

/// A proposed global mapping derived from a team roster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappingSuggestion {
    pub team_label: String,
    pub source_name: String,
    pub target_name: String,
    pub kind: DuplicateKind,
    pub similarity: f64,
    pub confidence: u8,
}

fn classify(a: &str, b: &str, similarity: f64) -> Option<DuplicateKind> {
    let (la, lb) = (a.to_lowercase(), b.to_lowercase());
    let (la, lb) = (
        la.split_whitespace().collect::<Vec<_>>().join(" "),
        lb.split_whitespace().collect::<Vec<_>>().join(" "),
    );
    if la == lb {
        return Some(DuplicateKind::CaseDifference);
    }
    if similarity >= SUGGESTION_SIMILARITY {
        return Some(DuplicateKind::HighSimilarity);
    }
    if la.contains(&lb) || lb.contains(&la) {
        let shorter = a.trim().chars().count().min(b.trim().chars().count());
        return (shorter >= 3).then_some(DuplicateKind::SubstringMatch);
    }
    let (wa, wb): (Vec<&str>, Vec<&str>) = (la.split(' ').collect(), lb.split(' ').collect());
    let first_name_only = (wa.len() == 1 && wb.len() > 1 && wa[0] == wb[0])
        || (wb.len() == 1 && wa.len() > 1 && wb[0] == wa[0]);
    first_name_only.then_some(DuplicateKind::FirstNameOnly)
}

/// Orders a duplicate pair as `(source, target)`: the better-presented
/// name is kept, then the more used one, then the older one.
fn orient<'a>(a: &'a RosterEntry, b: &'a RosterEntry) -> (&'a RosterEntry, &'a RosterEntry) {
    let key = |entry: &RosterEntry| {
        (
            name_quality_score(&entry.name),
            entry.matches,
            std::cmp::Reverse(entry.player_id),
        )
    };
    if key(a) >= key(b) { (b, a) } else { (a, b) }
}

pub struct DuplicateConsolidator {
    normalizer: NameNormalizer,
}

impl DuplicateConsolidator {
    pub fn new(normalizer: NameNormalizer) -> Self {
        Self { normalizer }
    }

    /// Groups of Players equal under Unicode lowercasing.
    ///
    /// The survivor is the oldest member already in canonical form; when
    /// none is, the oldest member is kept and renamed.
    pub fn case_groups(&self, conn: &Connection) -> Result<Vec<CaseGroup>, AppError> {
        let mut groups: BTreeMap<String, Vec<PlayerUsage>> = BTreeMap::new();
        for usage in PlayerRepo::new(conn).all_with_usage()? {
            groups
                .entry(usage.player.name.to_lowercase())
                .or_default()
                .push(usage);
        }

        let mut result = Vec::new();
        for (_, mut members) in groups {
            if members.len() < 2 {
                continue;
            }
            members.sort_by_key(|usage| usage.player.id);
            let canonical_pos = members
                .iter()
                .position(|usage| self.normalizer.normalize(&usage.player.name) == usage.player.name);
            let (survivor_pos, canonical_name) = match canonical_pos {
                Some(pos) => (pos, members[pos].player.name.clone()),
                None => (0, self.normalizer.normalize(&members[0].player.name)),
            };
            let survivor = members.remove(survivor_pos);
            result.push(CaseGroup {
                canonical_name,
                survivor,
                losers: members,
            });
        }
        Ok(result)
    }

    /// Merges one case group. Run inside one unit of work.
    #[instrument(skip(self, conn, group), fields(name = %group.canonical_name))]
    pub fn apply_case_group(&self, conn: &Connection, group: &CaseGroup) -> Result<CaseOutcome, AppError> {
        let survivor = group.survivor.player.id;
        let mut merges = Vec::with_capacity(group.losers.len());
        for loser in &group.losers {
            merges.push(merge_players(conn, loser.player.id, survivor)?);
        }

        let renamed = group.needs_rename();
        if renamed {
            PlayerRepo::new(conn).rename(survivor, &group.canonical_name)?;
            OverrideRepo::new(conn).refresh_target_names()?;
        }

        info!(
            "Consolidated {} case variant(s) into '{}'",
            merges.len(),
            group.canonical_name
        );
        Ok(CaseOutcome {
            canonical_name: group.canonical_name.clone(),
            survivor_id: survivor,
            renamed,
            merges,
        })
    }

    /// All typo pairs, survivors first by id.
    ///
    /// Separated identities (`"Name (Club)"`) are skipped: their names
    /// differ on purpose.
    pub fn typo_pairs(&self, conn: &Connection) -> Result<Vec<TypoPair>, AppError> {
        let candidates: Vec<PlayerUsage> = PlayerRepo::new(conn)
            .all_with_usage()?
            .into_iter()
            .filter(|usage| !usage.player.name.contains('('))
            .collect();

        // Pairs must share at least one identical part in the same position.
        let mut buckets: HashMap<(usize, usize, String), Vec<usize>> = HashMap::new();
        for (i, usage) in candidates.iter().enumerate() {
            let parts: Vec<String> = usage
                .player
                .name
                .split_whitespace()
                .map(str::to_lowercase)
                .collect();
            if parts.len() < 2 {
                continue;
            }
            for (position, part) in parts.iter().enumerate() {
                buckets
                    .entry((parts.len(), position, part.clone()))
                    .or_default()
                    .push(i);
            }
        }

        let mut seen: BTreeSet<(usize, usize)> = BTreeSet::new();
        for members in buckets.values() {
            for (x, &i) in members.iter().enumerate() {
                for &j in &members[x + 1..] {
                    seen.insert((i.min(j), i.max(j)));
                }
            }
        }

        let mut pairs = Vec::new();
        for (i, j) in seen {
            let (a, b) = (&candidates[i], &candidates[j]);
            let Some(found) = typo_match(&a.player.name, &b.player.name) else {
                continue;
            };
            let a_survives = a.observations > b.observations
                || (a.observations == b.observations && a.player.id < b.player.id);
            let (survivor, loser) = if a_survives { (a, b) } else { (b, a) };
            pairs.push(TypoPair {
                survivor: survivor.clone(),
                loser: loser.clone(),
                differing_part: found.differing_part,
                distance: found.distance,
            });
        }
        pairs.sort_by_key(|pair| (pair.survivor.player.id, pair.loser.player.id));
        Ok(pairs)
    }

    /// Merges one reviewed typo pair. Run inside one unit of work.
    pub fn apply_typo_pair(&self, conn: &Connection, pair: &TypoPair) -> Result<MergeOutcome, AppError> {
        let outcome = merge_players(conn, pair.loser.player.id, pair.survivor.player.id)?;
        info!(
            "Merged typo '{}' into '{}'",
            pair.loser.player.name, pair.survivor.player.name
        );
        Ok(outcome)
    }

    /// Duplicate-looking names inside each team roster, as mapping suggestions.
    ///
    /// Confidence is the similarity ratio capped at 95.
    pub fn roster_suggestions(
        &self,
        conn: &Connection,
        team_pattern: Option<&str>,
        min_confidence: u8,
    ) -> Result<Vec<MappingSuggestion>, AppError> {
        let mut by_team: BTreeMap<String, Vec<RosterEntry>> = BTreeMap::new();
        for entry in ObservationRepo::new(conn).rosters(team_pattern)? {
            by_team.entry(entry.team_label.clone()).or_default().push(entry);
        }

        let mut candidates = Vec::new();
        for (team_label, roster) in &by_team {
            for (i, a) in roster.iter().enumerate() {
                for b in &roster[i + 1..] {
                    let similarity = name_similarity(&a.name, &b.name);
                    let Some(kind) = classify(&a.name, &b.name, similarity) else {
                        continue;
                    };
                    let confidence = ((similarity * 100.0) as u8).min(95);
                    if confidence < min_confidence {
                        continue;
                    }
                    let (source, target) = orient(a, b);
                    candidates.push((source.player_id, MappingSuggestion {
                        team_label: team_label.clone(),
                        source_name: source.name.clone(),
                        target_name: target.name.clone(),
                        kind,
                        similarity,
                        confidence,
                    }));
                }
            }
        }

        // One suggestion per source Player, the strongest one.
        candidates.sort_by(|(_, a), (_, b)| {
            b.confidence
                .cmp(&a.confidence)
                .then_with(|| a.team_label.cmp(&b.team_label))
                .then_with(|| a.source_name.cmp(&b.source_name))
                .then_with(|| a.target_name.cmp(&b.target_name))
        });
        let mut proposed_sources: BTreeSet<PlayerId> = BTreeSet::new();
        let suggestions = candidates
            .into_iter()
            .filter(|(source_id, _)| proposed_sources.insert(*source_id))
            .map(|(_, suggestion)| suggestion)
            .collect();
        Ok(suggestions)
    }
}

/// Splits reviewed work into batches of at most `size` items.
pub fn batches<T>(items: &[T], size: usize) -> Vec<&[T]> {
    items.chunks(size.max(1)).collect()
}

/// Splits approved typo pairs into those that can merge in one run and those
/// touching a Player an earlier pair already merges away.
///
/// The held-back pairs need a fresh scan once the first merges are applied.
pub fn disjoint_pairs<'a>(pairs: Vec<&'a TypoPair>) -> (Vec<&'a TypoPair>, Vec<&'a TypoPair>) {
    let mut merged_away: HashSet<PlayerId> = HashSet::new();
    let mut ready = Vec::new();
    let mut held_back = Vec::new();
    for pair in pairs {
        if merged_away.contains(&pair.survivor.player.id)
            || merged_away.contains(&pair.loser.player.id)
        {
            held_back.push(pair);
        } else {
            merged_away.insert(pair.loser.player.id);
            ready.push(pair);
        }
    }
    (ready, held_back)
}

/// Items of one batch picked by 1-based position.
///
/// # Errors
/// * `AppError::Validation` - a position is outside the batch
pub fn select_approved<'a, T>(batch: &'a [T], positions: &[usize]) -> Result<Vec<&'a T>, AppError> {
    let mut unique: Vec<usize> = positions.to_vec();
    unique.sort_unstable();
    unique.dedup();
    unique
        .into_iter()
        .map(|position| {
            position
                .checked_sub(1)
                .and_then(|index| batch.get(index))
                .ok_or_else(|| {
                    AppError::validation(format!(
                        "item {position} is not in this batch of {}",
                        batch.len()
                    ))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Database, NewOverride, PlayerRegistry, SubMatch};
    use chrono::NaiveDate;

    fn observe(db: &Database, sub_match_id: i64, player: PlayerId, team: &str) {
        let observations = ObservationRepo::new(db.conn());
        observations
            .upsert_sub_match(&SubMatch {
                id: sub_match_id,
                played_at: NaiveDate::from_ymd_opt(2024, 3, 1)
                    .unwrap()
                    .and_hms_opt(19, 0, 0)
                    .unwrap(),
                team1_label: team.to_string(),
                team2_label: "Opponents".to_string(),
            })
            .unwrap();
        observations.insert(sub_match_id, player, 1, 0.0).unwrap();
    }

    #[test]
    fn test_case_group_survivor_is_canonical_member() {
        let db = Database::open_in_memory().unwrap();
        let players = PlayerRepo::new(db.conn());
        let lower = players.get_or_create("mikael granath").unwrap();
        let proper = players.get_or_create("Mikael Granath").unwrap();
        let upper = players.get_or_create("MIKAEL GRANATH").unwrap();
        observe(&db, 1, lower, "AIK");
        observe(&db, 2, upper, "AIK");
        observe(&db, 3, proper, "AIK");

        let consolidator = DuplicateConsolidator::new(NameNormalizer::new());
        let groups = consolidator.case_groups(db.conn()).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].survivor.player.id, proper);
        assert!(!groups[0].needs_rename());

        let outcome = consolidator.apply_case_group(db.conn(), &groups[0]).unwrap();
        assert_eq!(outcome.merges.len(), 2);
        assert_eq!(players.all().unwrap().len(), 1);
        assert_eq!(
            ObservationRepo::new(db.conn()).count_for_player(proper).unwrap(),
            3
        );
    }

    #[test]
    fn test_case_group_renames_when_no_member_is_canonical() {
        let db = Database::open_in_memory().unwrap();
        let players = PlayerRepo::new(db.conn());
        let lower = players.get_or_create("anna berg").unwrap();
        players.get_or_create("ANNA BERG").unwrap();

        let consolidator = DuplicateConsolidator::new(NameNormalizer::new());
        let groups = consolidator.case_groups(db.conn()).unwrap();
        assert_eq!(groups[0].survivor.player.id, lower);
        assert!(groups[0].needs_rename());

        let outcome = consolidator.apply_case_group(db.conn(), &groups[0]).unwrap();
        assert!(outcome.renamed);
        assert_eq!(players.require(lower).unwrap().name, "Anna Berg");
    }

    #[test]
    fn test_merge_repoints_overrides_and_drops_self_references() {
        let db = Database::open_in_memory().unwrap();
        let players = PlayerRepo::new(db.conn());
        let keep = players.get_or_create("Mats Berg").unwrap();
        let lose = players.get_or_create("mats berg").unwrap();
        let bare = players.get_or_create("Mats").unwrap();
        observe(&db, 1, bare, "SSDC");
        observe(&db, 2, keep, "SSDC");
        let overrides = OverrideRepo::new(db.conn());
        overrides
            .record(&NewOverride {
                sub_match_id: 1,
                original_player_id: bare,
                target_player_id: lose,
                target_name: "mats berg".to_string(),
                confidence: 85,
                reason: "test".to_string(),
            })
            .unwrap();
        observe(&db, 2, lose, "SSDC");
        overrides
            .record(&NewOverride {
                sub_match_id: 2,
                original_player_id: lose,
                target_player_id: keep,
                target_name: "Mats Berg".to_string(),
                confidence: 95,
                reason: "case variation".to_string(),
            })
            .unwrap();

        let outcome = merge_players(db.conn(), lose, keep).unwrap();
        assert_eq!(outcome.observations_dropped, 1);
        assert_eq!(outcome.overrides_deleted, 1);
        let repointed = overrides.find(1, bare).unwrap().unwrap();
        assert_eq!(repointed.target_player_id, keep);
        assert_eq!(repointed.target_name, "Mats Berg");
        assert!(players.find_by_name("mats berg").unwrap().is_none());
    }

    #[test]
    fn test_typo_pairs_and_guards() {
        let db = Database::open_in_memory().unwrap();
        let players = PlayerRepo::new(db.conn());
        let feldin = players.get_or_create("Alexander Feldin").unwrap();
        let felldin = players.get_or_create("Alexander Felldin").unwrap();
        players.get_or_create("Peter").unwrap();
        players.get_or_create("Peder").unwrap();
        players.get_or_create("Larry Olsson").unwrap();
        players.get_or_create("Carry Olsson").unwrap();
        players.get_or_create("Alexander Feldin (SSDC)").unwrap();
        observe(&db, 1, felldin, "AIK");

        let consolidator = DuplicateConsolidator::new(NameNormalizer::new());
        let pairs = consolidator.typo_pairs(db.conn()).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].survivor.player.id, felldin);
        assert_eq!(pairs[0].loser.player.id, feldin);
        assert_eq!(pairs[0].distance, 1);
    }

    #[test]
    fn test_chained_typo_pairs_merge_once_per_run() {
        let db = Database::open_in_memory().unwrap();
        let players = PlayerRepo::new(db.conn());
        let feldin = players.get_or_create("Alexander Feldin").unwrap();
        let felldin = players.get_or_create("Alexander Felldin").unwrap();
        let fellldin = players.get_or_create("Alexander Fellldin").unwrap();
        for id in 1..=3 {
            observe(&db, id, feldin, "AIK");
        }
        observe(&db, 4, felldin, "AIK");
        observe(&db, 5, felldin, "AIK");
        observe(&db, 6, fellldin, "AIK");

        let consolidator = DuplicateConsolidator::new(NameNormalizer::new());
        let pairs = consolidator.typo_pairs(db.conn()).unwrap();
        assert_eq!(pairs.len(), 2);

        let (ready, held_back) = disjoint_pairs(pairs.iter().collect());
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].loser.player.id, felldin);
        assert_eq!(held_back.len(), 1);
        assert_eq!(held_back[0].survivor.player.id, felldin);

        for pair in ready {
            consolidator.apply_typo_pair(db.conn(), pair).unwrap();
        }
        assert!(players.find_by_name("Alexander Felldin").unwrap().is_none());
        assert_eq!(ObservationRepo::new(db.conn()).count_for_player(feldin).unwrap(), 5);
        assert_eq!(ObservationRepo::new(db.conn()).count_for_player(fellldin).unwrap(), 1);
    }

    #[test]
    fn test_batches_and_selection() {
        let items: Vec<u32> = (1..=45).collect();
        let chunks = batches(&items, 20);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].len(), 5);

        let picked = select_approved(chunks[1], &[1, 3, 3]).unwrap();
        assert_eq!(picked, vec![&21, &23]);
        assert!(select_approved(chunks[2], &[6]).unwrap_err().is_validation());
        assert!(select_approved(chunks[2], &[0]).is_err());
    }

    #[test]
    fn test_roster_suggestions() {
        let db = Database::open_in_memory().unwrap();
        let players = PlayerRepo::new(db.conn());
        let proper = players.get_or_create("Mikael Granath").unwrap();
        let lower = players.get_or_create("mikael granath").unwrap();
        let bare = players.get_or_create("Mikael").unwrap();
        let other = players.get_or_create("Johan Ek").unwrap();
        observe(&db, 1, proper, "AIK SL6");
        observe(&db, 2, lower, "AIK SL6");
        observe(&db, 3, bare, "AIK SL6");
        observe(&db, 4, other, "AIK SL6");

        let consolidator = DuplicateConsolidator::new(NameNormalizer::new());
        let suggestions = consolidator
            .roster_suggestions(db.conn(), Some("AIK"), 0)
            .unwrap();
        let case = suggestions
            .iter()
            .find(|s| s.kind == DuplicateKind::CaseDifference)
            .unwrap();
        assert_eq!(case.source_name, "mikael granath");
        assert_eq!(case.target_name, "Mikael Granath");
        assert_eq!(case.confidence, 95);
        assert!(suggestions.iter().all(|s| s.source_name != "Johan Ek"));
        assert!(
            suggestions
                .iter()
                .any(|s| s.source_name == "Mikael" && s.kind == DuplicateKind::SubstringMatch)
        );
    }
}
