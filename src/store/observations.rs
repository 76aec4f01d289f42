use rusqlite::{Connection, OptionalExtension, params};

use super::models::{Observation, ObservationContext, PlayerId, SubMatch, SubMatchId};
use crate::error::AppError;

/// One row of the import audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionRecord {
    pub sub_match_id: SubMatchId,
    pub team_number: u8,
    pub raw_name: String,
    pub observation_id: Option<i64>,
    pub decision: String,
    pub confidence: u8,
    pub rationale: String,
}

/// A Player with enough activity to be worth an overlap scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivePlayer {
    pub player_id: PlayerId,
    pub name: String,
    pub total_matches: usize,
    pub team_labels: usize,
}

/// One Player's appearances under one team label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub team_label: String,
    pub player_id: PlayerId,
    pub name: String,
    pub matches: usize,
}

/// Repository for sub-matches, observations and the resolution log.
pub struct ObservationRepo<'c> {
    conn: &'c Connection,
}

impl<'c> ObservationRepo<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Inserts the sub-match context unless it is already stored.
    pub fn upsert_sub_match(&self, sub_match: &SubMatch) -> Result<(), AppError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO sub_matches (id, played_at, team1_label, team2_label)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                sub_match.id,
                sub_match.played_at,
                sub_match.team1_label,
                sub_match.team2_label
            ],
        )?;
        Ok(())
    }

    /// Stores the label of one side when it was recorded empty.
    pub fn fill_team_label(
        &self,
        sub_match_id: SubMatchId,
        team_number: u8,
        label: &str,
    ) -> Result<(), AppError> {
        let sql = match team_number {
            1 => "UPDATE sub_matches SET team1_label = ?2 WHERE id = ?1 AND team1_label = ''",
            2 => "UPDATE sub_matches SET team2_label = ?2 WHERE id = ?1 AND team2_label = ''",
            other => {
                return Err(AppError::validation(format!(
                    "team number must be 1 or 2, got {other}"
                )));
            }
        };
        self.conn.execute(sql, params![sub_match_id, label])?;
        Ok(())
    }

    pub fn get_sub_match(&self, id: SubMatchId) -> Result<Option<SubMatch>, AppError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, played_at, team1_label, team2_label FROM sub_matches WHERE id = ?1",
                [id],
                |row| {
                    Ok(SubMatch {
                        id: row.get(0)?,
                        played_at: row.get(1)?,
                        team1_label: row.get(2)?,
                        team2_label: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    /// Inserts an observation, returning its id and whether it was new.
    pub fn insert(
        &self,
        sub_match_id: SubMatchId,
        player_id: PlayerId,
        team_number: u8,
        performance_value: f64,
    ) -> Result<(i64, bool), AppError> {
        if !(1..=2).contains(&team_number) {
            return Err(AppError::validation(format!(
                "team number must be 1 or 2, got {team_number}"
            )));
        }
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO observations (sub_match_id, player_id, team_number, performance_value)
             VALUES (?1, ?2, ?3, ?4)",
            params![sub_match_id, player_id, team_number, performance_value],
        )?;
        if inserted == 1 {
            return Ok((self.conn.last_insert_rowid(), true));
        }
        let id = self.conn.query_row(
            "SELECT id FROM observations WHERE sub_match_id = ?1 AND player_id = ?2 AND team_number = ?3",
            params![sub_match_id, player_id, team_number],
            |row| row.get(0),
        )?;
        Ok((id, false))
    }

    pub fn get(&self, id: i64) -> Result<Option<Observation>, AppError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, sub_match_id, player_id, team_number, performance_value
                 FROM observations WHERE id = ?1",
                [id],
                |row| {
                    Ok(Observation {
                        id: row.get(0)?,
                        sub_match_id: row.get(1)?,
                        player_id: row.get(2)?,
                        team_number: row.get(3)?,
                        performance_value: row.get(4)?,
                    })
                },
            )
            .optional()?)
    }

    /// Full history of one Player with team label and date, oldest first.
    pub fn history(&self, player_id: PlayerId) -> Result<Vec<ObservationContext>, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT o.id, o.sub_match_id, o.player_id,
                    CASE o.team_number WHEN 1 THEN s.team1_label ELSE s.team2_label END,
                    s.played_at
             FROM observations o
             JOIN sub_matches s ON s.id = o.sub_match_id
             WHERE o.player_id = ?1
             ORDER BY s.played_at, o.id",
        )?;
        let rows = stmt.query_map([player_id], |row| {
            Ok(ObservationContext {
                observation_id: row.get(0)?,
                sub_match_id: row.get(1)?,
                player_id: row.get(2)?,
                team_label: row.get(3)?,
                played_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Team label of the side `player_id` played on in one sub-match.
    pub fn team_label_for(
        &self,
        sub_match_id: SubMatchId,
        player_id: PlayerId,
    ) -> Result<Option<String>, AppError> {
        Ok(self
            .conn
            .query_row(
                "SELECT CASE o.team_number WHEN 1 THEN s.team1_label ELSE s.team2_label END
                 FROM observations o
                 JOIN sub_matches s ON s.id = o.sub_match_id
                 WHERE o.sub_match_id = ?1 AND o.player_id = ?2
                 ORDER BY o.id
                 LIMIT 1",
                params![sub_match_id, player_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Moves specific observations to another Player.
    pub fn reassign(&self, observation_ids: &[i64], new_player_id: PlayerId) -> Result<usize, AppError> {
        let mut stmt = self
            .conn
            .prepare("UPDATE observations SET player_id = ?1 WHERE id = ?2")?;
        let mut moved = 0;
        for id in observation_ids {
            moved += stmt.execute(params![new_player_id, id])?;
        }
        Ok(moved)
    }

    /// Moves every observation of `from` to `into`.
    ///
    /// Rows that would duplicate an existing `(sub_match, player, team)` row
    /// of `into` are dropped. Returns `(moved, dropped)`.
    pub fn merge_player(&self, from: PlayerId, into: PlayerId) -> Result<(usize, usize), AppError> {
        let moved = self.conn.execute(
            "UPDATE OR IGNORE observations SET player_id = ?1 WHERE player_id = ?2",
            params![into, from],
        )?;
        let dropped = self
            .conn
            .execute("DELETE FROM observations WHERE player_id = ?1", [from])?;
        Ok((moved, dropped))
    }

    pub fn count_for_player(&self, player_id: PlayerId) -> Result<usize, AppError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM observations WHERE player_id = ?1",
            [player_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Players with at least `min_total` observations under `min_labels`
    /// distinct team labels, most active first.
    pub fn active_players(
        &self,
        min_total: usize,
        min_labels: usize,
    ) -> Result<Vec<ActivePlayer>, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.name, COUNT(o.id) AS total,
                    COUNT(DISTINCT CASE o.team_number WHEN 1 THEN s.team1_label ELSE s.team2_label END) AS labels
             FROM players p
             JOIN observations o ON o.player_id = p.id
             JOIN sub_matches s ON s.id = o.sub_match_id
             GROUP BY p.id
             HAVING total >= ?1 AND labels >= ?2
             ORDER BY total DESC, p.id ASC",
        )?;
        let rows = stmt.query_map(params![min_total as i64, min_labels as i64], |row| {
            Ok(ActivePlayer {
                player_id: row.get(0)?,
                name: row.get(1)?,
                total_matches: row.get::<_, i64>(2)? as usize,
                team_labels: row.get::<_, i64>(3)? as usize,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Per-team rosters for labels containing `pattern` (all labels when
    /// `None`), ordered by label then name.
    pub fn rosters(&self, pattern: Option<&str>) -> Result<Vec<RosterEntry>, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT label, p.id, p.name, COUNT(*) AS matches
             FROM (SELECT o.player_id,
                          CASE o.team_number WHEN 1 THEN s.team1_label ELSE s.team2_label END AS label
                   FROM observations o
                   JOIN sub_matches s ON s.id = o.sub_match_id)
             JOIN players p ON p.id = player_id
             WHERE ?1 IS NULL OR label LIKE ?1
             GROUP BY label, p.id
             ORDER BY label, p.name",
        )?;
        let like = pattern.map(|pattern| format!("%{pattern}%"));
        let rows = stmt.query_map([like], |row| {
            Ok(RosterEntry {
                team_label: row.get(0)?,
                player_id: row.get(1)?,
                name: row.get(2)?,
                matches: row.get::<_, i64>(3)? as usize,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Observation id recorded for an already resolved raw observation.
    pub fn find_resolution(
        &self,
        sub_match_id: SubMatchId,
        team_number: u8,
        raw_name: &str,
    ) -> Result<Option<ResolutionRecord>, AppError> {
        Ok(self
            .conn
            .query_row(
                "SELECT sub_match_id, team_number, raw_name, observation_id, decision, confidence, rationale
                 FROM resolution_log
                 WHERE sub_match_id = ?1 AND team_number = ?2 AND raw_name = ?3",
                params![sub_match_id, team_number, raw_name],
                |row| {
                    Ok(ResolutionRecord {
                        sub_match_id: row.get(0)?,
                        team_number: row.get(1)?,
                        raw_name: row.get(2)?,
                        observation_id: row.get(3)?,
                        decision: row.get(4)?,
                        confidence: row.get(5)?,
                        rationale: row.get(6)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn log_resolution(&self, record: &ResolutionRecord) -> Result<(), AppError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO resolution_log
                (sub_match_id, team_number, raw_name, observation_id, decision, confidence, rationale)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.sub_match_id,
                record.team_number,
                record.raw_name,
                record.observation_id,
                record.decision,
                record.confidence,
                record.rationale
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Database, PlayerRegistry, PlayerRepo};
    use chrono::NaiveDate;

    fn sub_match(id: SubMatchId, day: u32, team1: &str, team2: &str) -> SubMatch {
        SubMatch {
            id,
            played_at: NaiveDate::from_ymd_opt(2024, 1, day)
                .unwrap()
                .and_hms_opt(19, 0, 0)
                .unwrap(),
            team1_label: team1.to_string(),
            team2_label: team2.to_string(),
        }
    }

    #[test]
    fn test_insert_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let repo = ObservationRepo::new(db.conn());
        let player = PlayerRepo::new(db.conn()).get_or_create("Mats").unwrap();
        repo.upsert_sub_match(&sub_match(10, 1, "SSDC", "Dartanjang"))
            .unwrap();

        let (first, inserted) = repo.insert(10, player, 1, 23.5).unwrap();
        assert!(inserted);
        let (second, inserted) = repo.insert(10, player, 1, 23.5).unwrap();
        assert!(!inserted);
        assert_eq!(first, second);
        assert_eq!(repo.get(first).unwrap().unwrap().performance_value, 23.5);
    }

    #[test]
    fn test_insert_rejects_bad_team_number() {
        let db = Database::open_in_memory().unwrap();
        let repo = ObservationRepo::new(db.conn());
        assert!(repo.insert(1, 1, 3, 0.0).unwrap_err().is_validation());
    }

    #[test]
    fn test_history_uses_side_label() {
        let db = Database::open_in_memory().unwrap();
        let repo = ObservationRepo::new(db.conn());
        let player = PlayerRepo::new(db.conn()).get_or_create("Mats").unwrap();
        repo.upsert_sub_match(&sub_match(1, 2, "SSDC SL6", "Dartanjang"))
            .unwrap();
        repo.upsert_sub_match(&sub_match(2, 1, "AIK", "Dartanjang 2B"))
            .unwrap();
        repo.insert(1, player, 1, 0.0).unwrap();
        repo.insert(2, player, 2, 0.0).unwrap();

        let history = repo.history(player).unwrap();
        let labels: Vec<_> = history.iter().map(|o| o.team_label.as_str()).collect();
        assert_eq!(labels, vec!["Dartanjang 2B", "SSDC SL6"]);
        assert_eq!(
            repo.team_label_for(1, player).unwrap(),
            Some("SSDC SL6".to_string())
        );
    }

    #[test]
    fn test_merge_player_drops_duplicates() {
        let db = Database::open_in_memory().unwrap();
        let players = PlayerRepo::new(db.conn());
        let repo = ObservationRepo::new(db.conn());
        let keep = players.get_or_create("Mikael Granath").unwrap();
        let lose = players.get_or_create("mikael granath").unwrap();
        repo.upsert_sub_match(&sub_match(1, 1, "A", "B")).unwrap();
        repo.upsert_sub_match(&sub_match(2, 2, "A", "B")).unwrap();
        repo.insert(1, keep, 1, 0.0).unwrap();
        repo.insert(1, lose, 1, 0.0).unwrap();
        repo.insert(2, lose, 1, 0.0).unwrap();

        let (moved, dropped) = repo.merge_player(lose, keep).unwrap();
        assert_eq!((moved, dropped), (1, 1));
        assert_eq!(repo.count_for_player(keep).unwrap(), 2);
        assert_eq!(repo.count_for_player(lose).unwrap(), 0);
    }

    #[test]
    fn test_rosters_group_by_label() {
        let db = Database::open_in_memory().unwrap();
        let players = PlayerRepo::new(db.conn());
        let repo = ObservationRepo::new(db.conn());
        let mats = players.get_or_create("Mats").unwrap();
        let anna = players.get_or_create("Anna Berg").unwrap();
        repo.upsert_sub_match(&sub_match(1, 1, "SSDC SL6", "Dartanjang"))
            .unwrap();
        repo.upsert_sub_match(&sub_match(2, 2, "SSDC SL6", "AIK"))
            .unwrap();
        repo.insert(1, mats, 1, 0.0).unwrap();
        repo.insert(2, mats, 1, 0.0).unwrap();
        repo.insert(1, anna, 2, 0.0).unwrap();

        let all = repo.rosters(None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].team_label, "Dartanjang");
        assert_eq!(all[1].matches, 2);

        let ssdc = repo.rosters(Some("SSDC")).unwrap();
        assert_eq!(ssdc.len(), 1);
        assert_eq!(ssdc[0].player_id, mats);
    }

    #[test]
    fn test_resolution_log_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        let repo = ObservationRepo::new(db.conn());
        assert!(repo.find_resolution(5, 1, "mats").unwrap().is_none());
        let record = ResolutionRecord {
            sub_match_id: 5,
            team_number: 1,
            raw_name: "mats".to_string(),
            observation_id: None,
            decision: "create_new".to_string(),
            confidence: 0,
            rationale: "no candidates".to_string(),
        };
        repo.log_resolution(&record).unwrap();
        assert_eq!(repo.find_resolution(5, 1, "mats").unwrap(), Some(record));
    }
}
