//! Detection of identities that conflate two people.
//!
//! One person does not play for two unrelated clubs at the same time. The
//! detector groups a Player's history into per-club activity periods and
//! flags club pairs whose periods intersect for longer than a tolerance.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::constants::overlap;
use crate::error::AppError;
use crate::identity::club::ClubContextResolver;
use crate::store::{ObservationContext, ObservationRepo, Player, PlayerRepo, SubMatchId};

/// Club used for labels that resolve to nothing.
pub const UNKNOWN_CLUB: &str = "Unknown";

/// Thresholds for period building and overlap flagging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OverlapSettings {
    pub min_club_matches: usize,
    pub tolerance_days: i64,
    pub merge_gap_days: i64,
    pub season_gap_days: i64,
}

impl Default for OverlapSettings {
    fn default() -> Self {
        Self {
            min_club_matches: overlap::MIN_CLUB_MATCHES,
            tolerance_days: overlap::TOLERANCE_DAYS,
            merge_gap_days: overlap::MERGE_GAP_DAYS,
            season_gap_days: overlap::SEASON_GAP_DAYS,
        }
    }
}

/// A contiguous stretch of activity for one club.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityPeriod {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub matches: usize,
    pub team_labels: BTreeSet<String>,
    #[serde(skip)]
    pub observation_ids: Vec<i64>,
    #[serde(skip)]
    pub sub_match_ids: Vec<SubMatchId>,
}

impl ActivityPeriod {
    fn from_observation(obs: &ObservationContext) -> Self {
        Self {
            start: obs.played_at,
            end: obs.played_at,
            matches: 1,
            team_labels: BTreeSet::from([obs.team_label.clone()]),
            observation_ids: vec![obs.observation_id],
            sub_match_ids: vec![obs.sub_match_id],
        }
    }

    fn push(&mut self, obs: &ObservationContext) {
        self.start = self.start.min(obs.played_at);
        self.end = self.end.max(obs.played_at);
        self.matches += 1;
        self.team_labels.insert(obs.team_label.clone());
        self.observation_ids.push(obs.observation_id);
        self.sub_match_ids.push(obs.sub_match_id);
    }

    fn absorb(&mut self, other: ActivityPeriod) {
        self.start = self.start.min(other.start);
        self.end = self.end.max(other.end);
        self.matches += other.matches;
        self.team_labels.extend(other.team_labels);
        self.observation_ids.extend(other.observation_ids);
        self.sub_match_ids.extend(other.sub_match_ids);
    }

    /// Whether `at` falls inside the period, inclusive.
    pub fn covers(&self, at: NaiveDateTime) -> bool {
        self.start <= at && at <= self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

/// All activity of one Player for one standardized club.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClubActivity {
    pub club: String,
    pub matches: usize,
    pub periods: Vec<ActivityPeriod>,
}

impl ClubActivity {
    pub fn first_match(&self) -> Option<NaiveDateTime> {
        self.periods.iter().map(|p| p.start).min()
    }

    pub fn last_match(&self) -> Option<NaiveDateTime> {
        self.periods.iter().map(|p| p.end).max()
    }
}

/// Two clubs active at the same time for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverlapFinding {
    pub club_a: String,
    pub club_b: String,
    pub overlap_days: i64,
    pub overlap_start: NaiveDateTime,
    pub overlap_end: NaiveDateTime,
}

/// Overlap analysis of one Player.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerOverlapReport {
    pub player: Player,
    pub total_matches: usize,
    pub activities: Vec<ClubActivity>,
    pub findings: Vec<OverlapFinding>,
}

impl PlayerOverlapReport {
    pub fn has_overlap(&self) -> bool {
        !self.findings.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct OverlapDetector {
    clubs: ClubContextResolver,
    settings: OverlapSettings,
}

impl OverlapDetector {
    pub fn new(clubs: ClubContextResolver, settings: OverlapSettings) -> Self {
        Self { clubs, settings }
    }

    pub fn settings(&self) -> &OverlapSettings {
        &self.settings
    }

    pub fn clubs(&self) -> &ClubContextResolver {
        &self.clubs
    }

    /// Standardized club for a team label.
    pub fn club_for(&self, team_label: &str) -> String {
        let club = self.clubs.resolve(team_label);
        if club.is_empty() {
            UNKNOWN_CLUB.to_string()
        } else {
            club
        }
    }

    /// Builds per-club activity from a date-ordered history.
    ///
    /// Observations are first clustered per team label, splitting wherever
    /// the label goes quiet for longer than a season break. Clusters of the
    /// same club are then merged when they overlap or sit within
    /// `merge_gap_days` of each other.
    pub fn club_activity(&self, history: &[ObservationContext]) -> Vec<ClubActivity> {
        let mut by_label: BTreeMap<&str, Vec<&ObservationContext>> = BTreeMap::new();
        for obs in history {
            by_label.entry(obs.team_label.as_str()).or_default().push(obs);
        }

        let mut by_club: BTreeMap<String, Vec<ActivityPeriod>> = BTreeMap::new();
        for (label, mut observations) in by_label {
            observations.sort_by_key(|obs| (obs.played_at, obs.observation_id));
            let mut clusters: Vec<ActivityPeriod> = Vec::new();
            for obs in observations {
                match clusters.last_mut() {
                    Some(current)
                        if (obs.played_at - current.end).num_days() <= self.settings.season_gap_days =>
                    {
                        current.push(obs)
                    }
                    _ => clusters.push(ActivityPeriod::from_observation(obs)),
                }
            }
            by_club.entry(self.club_for(label)).or_default().extend(clusters);
        }

        by_club
            .into_iter()
            .map(|(club, mut clusters)| {
                clusters.sort_by_key(|period| (period.start, period.end));
                let mut periods: Vec<ActivityPeriod> = Vec::new();
                for cluster in clusters {
                    match periods.last_mut() {
                        Some(current)
                            if (cluster.start - current.end).num_days() <= self.settings.merge_gap_days =>
                        {
                            current.absorb(cluster)
                        }
                        _ => periods.push(cluster),
                    }
                }
                for period in &mut periods {
                    period.observation_ids.sort_unstable();
                    period.sub_match_ids.sort_unstable();
                    period.sub_match_ids.dedup();
                }
                ClubActivity {
                    matches: periods.iter().map(|p| p.matches).sum(),
                    club,
                    periods,
                }
            })
            .collect()
    }

    /// Checks one club pair. Symmetric in its arguments.
    pub fn check_pair(&self, a: &ClubActivity, b: &ClubActivity) -> Option<OverlapFinding> {
        let min = self.settings.min_club_matches;
        if a.club == b.club || a.matches < min || b.matches < min {
            return None;
        }
        if self.clubs.same_club(&a.club, &b.club) {
            return None;
        }

        let (first, second) = if a.club <= b.club { (a, b) } else { (b, a) };
        let mut best: Option<OverlapFinding> = None;
        for p in &first.periods {
            for q in &second.periods {
                let start = p.start.max(q.start);
                let end = p.end.min(q.end);
                if start > end {
                    continue;
                }
                let days = (end - start).num_days();
                let better = match &best {
                    None => true,
                    Some(current) => {
                        days > current.overlap_days
                            || (days == current.overlap_days && start < current.overlap_start)
                    }
                };
                if better {
                    best = Some(OverlapFinding {
                        club_a: first.club.clone(),
                        club_b: second.club.clone(),
                        overlap_days: days,
                        overlap_start: start,
                        overlap_end: end,
                    });
                }
            }
        }
        best.filter(|finding| finding.overlap_days > self.settings.tolerance_days)
    }

    /// All flagged club pairs of one activity set.
    pub fn detect(&self, activities: &[ClubActivity]) -> Vec<OverlapFinding> {
        let mut findings = Vec::new();
        for (i, a) in activities.iter().enumerate() {
            for b in &activities[i + 1..] {
                if let Some(finding) = self.check_pair(a, b) {
                    debug!(
                        "{} / {} overlap for {} days",
                        finding.club_a, finding.club_b, finding.overlap_days
                    );
                    findings.push(finding);
                }
            }
        }
        findings.sort_by(|x, y| {
            y.overlap_days
                .cmp(&x.overlap_days)
                .then_with(|| x.club_a.cmp(&y.club_a))
                .then_with(|| x.club_b.cmp(&y.club_b))
        });
        findings
    }

    /// Timeline and findings for one Player.
    pub fn analyze(&self, conn: &Connection, player: &Player) -> Result<PlayerOverlapReport, AppError> {
        let history = ObservationRepo::new(conn).history(player.id)?;
        let activities = self.club_activity(&history);
        let findings = self.detect(&activities);
        Ok(PlayerOverlapReport {
            player: player.clone(),
            total_matches: history.len(),
            activities,
            findings,
        })
    }

    /// Looks a Player up by exact name and analyzes it.
    pub fn analyze_by_name(&self, conn: &Connection, name: &str) -> Result<PlayerOverlapReport, AppError> {
        let player = PlayerRepo::new(conn).require_by_name(name)?;
        self.analyze(conn, &player)
    }

    /// Reports for every active multi-label Player that has an overlap.
    pub fn scan(
        &self,
        conn: &Connection,
        min_total_matches: usize,
        limit: Option<usize>,
    ) -> Result<Vec<PlayerOverlapReport>, AppError> {
        let candidates = ObservationRepo::new(conn).active_players(min_total_matches, 2)?;
        info!(
            "Scanning {} players with {min_total_matches}+ matches under 2+ team labels",
            candidates.len()
        );

        let mut reports = Vec::new();
        for candidate in candidates {
            let player = Player {
                id: candidate.player_id,
                name: candidate.name,
            };
            let report = self.analyze(conn, &player)?;
            if report.has_overlap() {
                reports.push(report);
                if limit.is_some_and(|limit| reports.len() >= limit) {
                    break;
                }
            }
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn detector() -> OverlapDetector {
        OverlapDetector::new(ClubContextResolver::new(), OverlapSettings::default())
    }

    fn weekly(start: (i32, u32, u32), count: usize, label: &str, first_id: i64) -> Vec<ObservationContext> {
        let base = NaiveDate::from_ymd_opt(start.0, start.1, start.2)
            .unwrap()
            .and_hms_opt(19, 0, 0)
            .unwrap();
        (0..count)
            .map(|i| ObservationContext {
                observation_id: first_id + i as i64,
                sub_match_id: first_id + i as i64,
                player_id: 1,
                team_label: label.to_string(),
                played_at: base + Duration::days(7 * i as i64),
            })
            .collect()
    }

    #[test]
    fn test_sequential_clubs_not_flagged() {
        let mut history = weekly((2022, 1, 10), 30, "Club A", 1);
        history.extend(weekly((2023, 1, 9), 30, "Club B", 100));
        let detector = detector();
        let activities = detector.club_activity(&history);
        assert_eq!(activities.len(), 2);
        assert!(detector.detect(&activities).is_empty());
    }

    #[test]
    fn test_concurrent_clubs_flagged() {
        let mut history = weekly((2023, 1, 9), 20, "Oilers 2B", 1);
        history.extend(weekly((2023, 1, 11), 20, "Bullseye Superligan", 100));
        let detector = detector();
        let activities = detector.club_activity(&history);
        let findings = detector.detect(&activities);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].club_a, "Bullseye");
        assert_eq!(findings[0].club_b, "Oilers");
        assert!(findings[0].overlap_days > 100);
    }

    #[test]
    fn test_check_pair_is_symmetric() {
        let mut history = weekly((2023, 1, 9), 10, "Oilers", 1);
        history.extend(weekly((2023, 2, 1), 10, "Birds", 100));
        let detector = detector();
        let activities = detector.club_activity(&history);
        let ab = detector.check_pair(&activities[0], &activities[1]);
        let ba = detector.check_pair(&activities[1], &activities[0]);
        assert!(ab.is_some());
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_same_club_spellings_not_flagged() {
        let mut history = weekly((2023, 1, 9), 10, "AIK SL6", 1);
        history.extend(weekly((2023, 1, 10), 10, "AIK Dartförening", 100));
        history.extend(weekly((2023, 1, 11), 10, "Spikkastarna B", 200));
        history.extend(weekly((2023, 1, 12), 10, "SpikKastarna 2A", 300));
        let detector = detector();
        let activities = detector.club_activity(&history);
        assert_eq!(activities.len(), 2);
        assert_eq!(activities[0].matches, 20);
        // AIK Dart vs SpikKastarna is a real conflict
        assert_eq!(detector.detect(&activities).len(), 1);
    }

    #[test]
    fn test_small_clubs_and_short_overlaps_ignored() {
        let detector = detector();
        let mut history = weekly((2023, 1, 9), 20, "Oilers", 1);
        history.extend(weekly((2023, 2, 1), 4, "Birds", 100));
        assert!(detector.detect(&detector.club_activity(&history)).is_empty());

        // Birds starts as Oilers ends: overlap below tolerance
        let mut history = weekly((2023, 1, 9), 10, "Oilers", 1);
        history.extend(weekly((2023, 3, 6), 10, "Birds", 100));
        assert!(detector.detect(&detector.club_activity(&history)).is_empty());
    }

    #[test]
    fn test_periods_split_on_season_gap_and_merge_short_breaks() {
        let mut history = weekly((2022, 1, 10), 10, "Oilers", 1);
        // three-week break, same season
        history.extend(weekly((2022, 4, 4), 5, "Oilers 2B", 50));
        // next season
        history.extend(weekly((2023, 1, 9), 10, "Oilers", 100));
        let activities = detector().club_activity(&history);
        assert_eq!(activities.len(), 1);
        let periods = &activities[0].periods;
        assert_eq!(periods.len(), 2);
        assert_eq!(periods[0].matches, 15);
        assert_eq!(periods[1].matches, 10);
        assert!(periods[1].covers(periods[1].start));
    }
}
