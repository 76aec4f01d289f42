use chrono::{Duration, NaiveDate, NaiveDateTime};
use rusqlite::Connection;

use crate::store::{
    GlobalMappingRepo, NewOverride, ObservationRepo, OverrideRepo, PlayerId, PlayerRegistry,
    PlayerRepo, SubMatch, SubMatchId,
};

const OPPONENT_LABEL: &str = "Opponents";

/// Seeds an identity store with players, sub-matches and observations.
///
/// Intended for tests only; every method panics on a store error so test
/// setup stays readable.
pub struct TestDataBuilder<'c> {
    conn: &'c Connection,
}

/// Parses `YYYY-MM-DD` into an evening match time.
pub fn match_time(date: &str) -> NaiveDateTime {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .unwrap_or_else(|e| panic!("bad test date '{date}': {e}"))
        .and_hms_opt(19, 0, 0)
        .expect("19:00 is a valid time")
}

impl<'c> TestDataBuilder<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Ensures a player named `name` exists.
    pub fn player(self, name: &str) -> Self {
        self.player_id(name);
        self
    }

    /// Id of `name`, creating the player when needed.
    pub fn player_id(&self, name: &str) -> PlayerId {
        PlayerRepo::new(self.conn)
            .get_or_create(name)
            .unwrap_or_else(|e| panic!("cannot create player '{name}': {e}"))
    }

    /// Highest sub-match id stored so far, zero for an empty store.
    pub fn last_sub_match(&self) -> SubMatchId {
        self.conn
            .query_row("SELECT COALESCE(MAX(id), 0) FROM sub_matches", [], |row| {
                row.get(0)
            })
            .expect("sub_matches is queryable")
    }

    /// One observation of `name` playing for `team_label` in a new sub-match.
    pub fn observe(self, name: &str, team_label: &str, played_at: NaiveDateTime) -> Self {
        let player_id = self.player_id(name);
        let sub_match = SubMatch {
            id: self.last_sub_match() + 1,
            played_at,
            team1_label: team_label.to_string(),
            team2_label: OPPONENT_LABEL.to_string(),
        };
        let observations = ObservationRepo::new(self.conn);
        observations
            .upsert_sub_match(&sub_match)
            .expect("sub-match insert");
        observations
            .insert(sub_match.id, player_id, 1, 0.0)
            .expect("observation insert");
        self
    }

    /// `matches` observations `every_days` apart starting at `start` (`YYYY-MM-DD`).
    pub fn series(
        self,
        name: &str,
        team_label: &str,
        start: &str,
        matches: usize,
        every_days: i64,
    ) -> Self {
        let first = match_time(start);
        (0..matches).fold(self, |builder, i| {
            builder.observe(name, team_label, first + Duration::days(i as i64 * every_days))
        })
    }

    pub fn weekly_series(self, name: &str, team_label: &str, start: &str, weeks: usize) -> Self {
        self.series(name, team_label, start, weeks, 7)
    }

    /// Redirects `original`'s observation in `sub_match_id` to `target`.
    pub fn override_to(
        self,
        sub_match_id: SubMatchId,
        original: &str,
        target: &str,
        confidence: u8,
    ) -> Self {
        let new = NewOverride {
            sub_match_id,
            original_player_id: self.player_id(original),
            target_player_id: self.player_id(target),
            target_name: target.to_string(),
            confidence,
            reason: "test".to_string(),
        };
        OverrideRepo::new(self.conn)
            .add_strict(&new)
            .unwrap_or_else(|e| panic!("cannot add override: {e}"));
        self
    }

    /// A reviewed mapping from `source` onto `target`, ready to apply.
    pub fn confirmed_mapping(self, source: &str, target: &str) -> Self {
        let mappings = GlobalMappingRepo::new(self.conn);
        let id = mappings
            .suggest(source, target, "manual", 95, None)
            .unwrap_or_else(|e| panic!("cannot suggest mapping: {e}"));
        mappings
            .approve(id, Some("tests"))
            .unwrap_or_else(|e| panic!("cannot approve mapping {id}: {e}"));
        self
    }
}
