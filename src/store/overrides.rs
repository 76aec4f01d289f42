use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::models::{NewOverride, ObservationOverride, PlayerId, SubMatchId};
use crate::error::AppError;

/// Override evidence for one (bare original name, target, team label) triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstNameTargetRow {
    pub original_name: String,
    pub target_player_id: PlayerId,
    pub target_name: String,
    pub team_label: String,
    pub uses: usize,
}

/// Repository for per-observation identity corrections.
pub struct OverrideRepo<'c> {
    conn: &'c Connection,
}

fn override_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ObservationOverride> {
    Ok(ObservationOverride {
        id: row.get(0)?,
        sub_match_id: row.get(1)?,
        original_player_id: row.get(2)?,
        target_player_id: row.get(3)?,
        target_name: row.get(4)?,
        confidence: row.get(5)?,
        reason: row.get(6)?,
        created_at: row.get(7)?,
    })
}

const OVERRIDE_COLUMNS: &str = "id, sub_match_id, original_player_id, target_player_id, target_name, confidence, reason, created_at";

fn validate(new: &NewOverride) -> Result<(), AppError> {
    if new.original_player_id == new.target_player_id {
        return Err(AppError::validation(format!(
            "override for sub-match {} points player {} at itself",
            new.sub_match_id, new.original_player_id
        )));
    }
    if !(1..=100).contains(&new.confidence) {
        return Err(AppError::validation(format!(
            "override confidence must be within 1..=100, got {}",
            new.confidence
        )));
    }
    Ok(())
}

impl<'c> OverrideRepo<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn insert(&self, new: &NewOverride, or_ignore: bool) -> Result<usize, AppError> {
        let verb = if or_ignore { "INSERT OR IGNORE" } else { "INSERT" };
        let sql = format!(
            "{verb} INTO observation_overrides
                (sub_match_id, original_player_id, target_player_id, target_name, confidence, reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
        );
        Ok(self.conn.execute(
            &sql,
            params![
                new.sub_match_id,
                new.original_player_id,
                new.target_player_id,
                new.target_name,
                new.confidence,
                new.reason
            ],
        )?)
    }

    /// Records an override unless one already exists for the same key.
    ///
    /// The first decision for a `(sub_match, original)` pair wins; a repeat is
    /// a no-op and returns `false`.
    pub fn record(&self, new: &NewOverride) -> Result<bool, AppError> {
        validate(new)?;
        let inserted = self.insert(new, true)? == 1;
        if inserted {
            debug!(
                "Override sub_match={} {} -> {} ({})",
                new.sub_match_id, new.original_player_id, new.target_player_id, new.reason
            );
        }
        Ok(inserted)
    }

    /// Inserts an override requested explicitly by a disambiguation tool.
    ///
    /// Unlike [`record`](Self::record), an existing key is an error.
    pub fn add_strict(&self, new: &NewOverride) -> Result<i64, AppError> {
        validate(new)?;
        if let Some(existing) = self.find(new.sub_match_id, new.original_player_id)? {
            return Err(AppError::validation(format!(
                "override already exists for sub-match {} and player {} (-> {})",
                new.sub_match_id, new.original_player_id, existing.target_name
            )));
        }
        self.insert(new, false)?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Replaces whatever override exists for the key with a new row.
    pub fn supersede(&self, new: &NewOverride) -> Result<i64, AppError> {
        validate(new)?;
        self.conn.execute(
            "DELETE FROM observation_overrides WHERE sub_match_id = ?1 AND original_player_id = ?2",
            params![new.sub_match_id, new.original_player_id],
        )?;
        self.insert(new, false)?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn find(
        &self,
        sub_match_id: SubMatchId,
        original_player_id: PlayerId,
    ) -> Result<Option<ObservationOverride>, AppError> {
        let sql = format!(
            "SELECT {OVERRIDE_COLUMNS} FROM observation_overrides
             WHERE sub_match_id = ?1 AND original_player_id = ?2"
        );
        Ok(self
            .conn
            .query_row(&sql, params![sub_match_id, original_player_id], override_from_row)
            .optional()?)
    }

    /// Identity an observation resolves to once its override is applied.
    pub fn effective_player(
        &self,
        sub_match_id: SubMatchId,
        player_id: PlayerId,
    ) -> Result<PlayerId, AppError> {
        Ok(self
            .find(sub_match_id, player_id)?
            .map(|o| o.target_player_id)
            .unwrap_or(player_id))
    }

    pub fn list_for_original(&self, player_id: PlayerId) -> Result<Vec<ObservationOverride>, AppError> {
        self.list_where("original_player_id = ?1", player_id)
    }

    pub fn list_targeting(&self, player_id: PlayerId) -> Result<Vec<ObservationOverride>, AppError> {
        self.list_where("target_player_id = ?1", player_id)
    }

    fn list_where(&self, condition: &str, player_id: PlayerId) -> Result<Vec<ObservationOverride>, AppError> {
        let sql = format!(
            "SELECT {OVERRIDE_COLUMNS} FROM observation_overrides WHERE {condition} ORDER BY sub_match_id, id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([player_id], override_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Number of overrides redirecting to `player_id`.
    pub fn count_targeting(&self, player_id: PlayerId) -> Result<usize, AppError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM observation_overrides WHERE target_player_id = ?1",
            [player_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Override usage grouped by original name, target and team label.
    ///
    /// Feeds the matcher's first-name index; the team label is the side the
    /// original player was observed on in the overridden sub-match.
    pub fn first_name_targets(&self) -> Result<Vec<FirstNameTargetRow>, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT po.name, ov.target_player_id, ov.target_name,
                    CASE o.team_number WHEN 1 THEN s.team1_label ELSE s.team2_label END AS label,
                    COUNT(*) AS uses
             FROM observation_overrides ov
             JOIN players po ON po.id = ov.original_player_id
             JOIN observations o
               ON o.sub_match_id = ov.sub_match_id AND o.player_id = ov.original_player_id
             JOIN sub_matches s ON s.id = ov.sub_match_id
             GROUP BY po.name, ov.target_player_id, ov.target_name, label
             ORDER BY po.name, ov.target_player_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(FirstNameTargetRow {
                original_name: row.get(0)?,
                target_player_id: row.get(1)?,
                target_name: row.get(2)?,
                team_label: row.get(3)?,
                uses: row.get::<_, i64>(4)? as usize,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Repoints overrides whose original is `from` to `into`.
    ///
    /// Overrides that would become self-referential, or collide with an
    /// override `into` already has for the same sub-match, are deleted.
    /// Returns `(updated, deleted)`.
    pub fn merge_original(&self, from: PlayerId, into: PlayerId) -> Result<(usize, usize), AppError> {
        let mut deleted = self.conn.execute(
            "DELETE FROM observation_overrides WHERE original_player_id = ?1 AND target_player_id = ?2",
            params![from, into],
        )?;
        let updated = self.conn.execute(
            "UPDATE OR IGNORE observation_overrides SET original_player_id = ?1 WHERE original_player_id = ?2",
            params![into, from],
        )?;
        deleted += self.conn.execute(
            "DELETE FROM observation_overrides WHERE original_player_id = ?1",
            [from],
        )?;
        Ok((updated, deleted))
    }

    /// Repoints overrides targeting `from` to `into`, deleting the ones that
    /// would become self-referential. Returns `(updated, deleted)`.
    pub fn merge_target(
        &self,
        from: PlayerId,
        into: PlayerId,
        into_name: &str,
    ) -> Result<(usize, usize), AppError> {
        let deleted = self.conn.execute(
            "DELETE FROM observation_overrides WHERE target_player_id = ?1 AND original_player_id = ?2",
            params![from, into],
        )?;
        let updated = self.conn.execute(
            "UPDATE observation_overrides SET target_player_id = ?1, target_name = ?2
             WHERE target_player_id = ?3",
            params![into, into_name, from],
        )?;
        Ok((updated, deleted))
    }

    /// Moves overrides of `from` in the given sub-matches to the new original.
    pub fn move_original(
        &self,
        from: PlayerId,
        to: PlayerId,
        sub_match_ids: &[SubMatchId],
    ) -> Result<usize, AppError> {
        let mut moved = 0;
        for sub_match_id in sub_match_ids {
            self.conn.execute(
                "DELETE FROM observation_overrides
                 WHERE sub_match_id = ?1 AND original_player_id = ?2 AND target_player_id = ?3",
                params![sub_match_id, from, to],
            )?;
            moved += self.conn.execute(
                "UPDATE OR IGNORE observation_overrides SET original_player_id = ?1
                 WHERE sub_match_id = ?2 AND original_player_id = ?3",
                params![to, sub_match_id, from],
            )?;
        }
        Ok(moved)
    }

    /// Points one override at a different target.
    pub fn retarget(&self, override_id: i64, target: PlayerId, target_name: &str) -> Result<(), AppError> {
        let changed = self.conn.execute(
            "UPDATE observation_overrides SET target_player_id = ?1, target_name = ?2
             WHERE id = ?3 AND original_player_id <> ?1",
            params![target, target_name, override_id],
        )?;
        if changed == 0 {
            return Err(AppError::validation(format!(
                "override {override_id} cannot be retargeted to player {target}"
            )));
        }
        Ok(())
    }

    /// Re-reads every target name from the players table.
    pub fn refresh_target_names(&self) -> Result<usize, AppError> {
        Ok(self.conn.execute(
            "UPDATE observation_overrides
             SET target_name = (SELECT name FROM players WHERE id = target_player_id)
             WHERE target_name <> (SELECT name FROM players WHERE id = target_player_id)",
            [],
        )?)
    }
}
