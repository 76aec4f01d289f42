//! Coarse merge suggestions and their review lifecycle.
//!
//! A mapping starts as `suggested`, is reviewed into `confirmed` or
//! `rejected`, and only confirmed mappings can be applied. Applying rewrites
//! observations and overrides from the source identity to the target and
//! stamps `applied_at`; the source Player row itself is left for
//! [`PlayerRepo::find_unreferenced`](super::PlayerRepo::find_unreferenced)
//! cleanup.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::{info, warn};

use super::models::{GlobalMapping, MappingStatus, PlayerId};
use super::observations::ObservationRepo;
use super::overrides::OverrideRepo;
use super::players::PlayerRepo;
use crate::error::AppError;
use crate::identity::similarity::choose_canonical_name;

const MAPPING_SELECT: &str = "SELECT g.id, g.source_player_id, ps.name, g.target_player_id, pt.name,
        g.canonical_name, g.confidence, g.mapping_type, g.status, g.notes, g.approved_by,
        g.created_at, g.applied_at
     FROM global_mappings g
     JOIN players ps ON ps.id = g.source_player_id
     JOIN players pt ON pt.id = g.target_player_id";

fn mapping_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GlobalMapping> {
    Ok(GlobalMapping {
        id: row.get(0)?,
        source_player_id: row.get(1)?,
        source_name: row.get(2)?,
        target_player_id: row.get(3)?,
        target_name: row.get(4)?,
        canonical_name: row.get(5)?,
        confidence: row.get(6)?,
        mapping_type: row.get(7)?,
        status: row.get(8)?,
        notes: row.get(9)?,
        approved_by: row.get(10)?,
        created_at: row.get(11)?,
        applied_at: row.get(12)?,
    })
}

/// What applying a mapping would change (or changed).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyOutcome {
    pub mapping_id: i64,
    pub source_name: String,
    pub target_name: String,
    pub canonical_name: String,
    pub observations_moved: usize,
    pub overrides_repointed: usize,
    pub overrides_deleted: usize,
    pub renamed_target: bool,
    pub dry_run: bool,
}

/// An applied mapping whose source still carries observations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyIssue {
    pub mapping: GlobalMapping,
    pub remaining_observations: usize,
}

/// Repository for the `global_mappings` table.
pub struct GlobalMappingRepo<'c> {
    conn: &'c Connection,
}

impl<'c> GlobalMappingRepo<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Stores a new `suggested` mapping from `source_name` to `target_name`.
    ///
    /// # Errors
    /// * `AppError::PlayerNotFound` - either name is unknown
    /// * `AppError::Validation` - source equals target, or the source already
    ///   has a mapping
    pub fn suggest(
        &self,
        source_name: &str,
        target_name: &str,
        mapping_type: &str,
        confidence: u8,
        notes: Option<&str>,
    ) -> Result<i64, AppError> {
        let players = PlayerRepo::new(self.conn);
        let source = players.require_by_name(source_name)?;
        let target = players.require_by_name(target_name)?;

        if source.id == target.id {
            return Err(AppError::validation(format!(
                "cannot map '{source_name}' onto itself"
            )));
        }
        if confidence > 100 {
            return Err(AppError::validation(format!(
                "confidence must be within 0..=100, got {confidence}"
            )));
        }
        if let Some(existing) = self.find_by_source(source.id)? {
            return Err(AppError::validation(format!(
                "'{}' already has mapping {} ({}) to '{}'",
                source.name, existing.id, existing.status, existing.target_name
            )));
        }

        let canonical_name = choose_canonical_name(&target.name, &source.name);
        self.conn.execute(
            "INSERT INTO global_mappings
                (source_player_id, target_player_id, canonical_name, confidence, mapping_type, status, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                source.id,
                target.id,
                canonical_name,
                confidence,
                mapping_type,
                MappingStatus::Suggested,
                notes
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(
            "Suggested mapping {id}: '{}' -> '{}' ({mapping_type}, {confidence}%)",
            source.name, target.name
        );
        Ok(id)
    }

    pub fn get(&self, id: i64) -> Result<GlobalMapping, AppError> {
        let sql = format!("{MAPPING_SELECT} WHERE g.id = ?1");
        self.conn
            .query_row(&sql, [id], mapping_from_row)
            .optional()?
            .ok_or(AppError::MappingNotFound { id })
    }

    pub fn find_by_source(&self, source_player_id: PlayerId) -> Result<Option<GlobalMapping>, AppError> {
        let sql = format!("{MAPPING_SELECT} WHERE g.source_player_id = ?1");
        Ok(self
            .conn
            .query_row(&sql, [source_player_id], mapping_from_row)
            .optional()?)
    }

    /// Mappings filtered by status, highest confidence first.
    pub fn list(
        &self,
        status: Option<MappingStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<GlobalMapping>, AppError> {
        let sql = format!(
            "{MAPPING_SELECT}
             WHERE (?1 IS NULL OR g.status = ?1)
             ORDER BY g.confidence DESC, g.id ASC
             LIMIT ?2"
        );
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![status, limit], mapping_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// All confirmed mappings, applied or not.
    pub fn confirmed(&self) -> Result<Vec<GlobalMapping>, AppError> {
        self.list(Some(MappingStatus::Confirmed), None)
    }

    /// Confirmed mappings that have not been applied yet.
    pub fn pending_applications(&self) -> Result<Vec<GlobalMapping>, AppError> {
        Ok(self
            .confirmed()?
            .into_iter()
            .filter(|m| m.applied_at.is_none())
            .collect())
    }

    fn set_status(
        &self,
        mapping: &GlobalMapping,
        to: MappingStatus,
        approved_by: Option<&str>,
        notes: Option<&str>,
    ) -> Result<(), AppError> {
        self.conn.execute(
            "UPDATE global_mappings
             SET status = ?1,
                 approved_by = COALESCE(?2, approved_by),
                 notes = COALESCE(?3, notes),
                 updated_at = datetime('now')
             WHERE id = ?4",
            params![to, approved_by, notes, mapping.id],
        )?;
        info!(
            "Mapping {} '{}' -> '{}': {} -> {}",
            mapping.id, mapping.source_name, mapping.target_name, mapping.status, to
        );
        Ok(())
    }

    /// Moves a suggested (or previously rejected) mapping to `confirmed`.
    pub fn approve(&self, id: i64, approved_by: Option<&str>) -> Result<(), AppError> {
        let mapping = self.get(id)?;
        match mapping.status {
            MappingStatus::Suggested | MappingStatus::Rejected => {
                self.set_status(&mapping, MappingStatus::Confirmed, approved_by, None)
            }
            MappingStatus::Confirmed => Err(AppError::invalid_transition(
                id,
                mapping.status.as_str(),
                MappingStatus::Confirmed.as_str(),
            )),
        }
    }

    /// Moves a mapping to `rejected`. Applied mappings cannot be rejected.
    pub fn reject(&self, id: i64, note: Option<&str>) -> Result<(), AppError> {
        let mapping = self.get(id)?;
        if mapping.status == MappingStatus::Rejected || mapping.applied_at.is_some() {
            return Err(AppError::invalid_transition(
                id,
                if mapping.applied_at.is_some() {
                    "applied"
                } else {
                    mapping.status.as_str()
                },
                MappingStatus::Rejected.as_str(),
            ));
        }
        self.set_status(&mapping, MappingStatus::Rejected, None, note)
    }

    /// Checks that a mapping may be applied and reports what would change.
    ///
    /// Read-only; [`apply`](Self::apply) runs the same checks before writing.
    pub fn plan_apply(&self, id: i64) -> Result<ApplyOutcome, AppError> {
        let mapping = self.get(id)?;
        if mapping.status != MappingStatus::Confirmed {
            return Err(AppError::invalid_transition(
                id,
                mapping.status.as_str(),
                "applied",
            ));
        }
        if mapping.applied_at.is_some() {
            return Err(AppError::validation(format!(
                "mapping {id} has already been applied"
            )));
        }

        // Chains (A -> B while B -> C is pending) must be applied target first.
        let chained: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM global_mappings
                 WHERE id <> ?1 AND status = 'confirmed' AND applied_at IS NULL
                   AND (target_player_id = ?2 OR source_player_id = ?3)
                 ORDER BY id LIMIT 1",
                params![id, mapping.source_player_id, mapping.target_player_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(other) = chained {
            return Err(AppError::validation(format!(
                "mapping {id} is chained with pending mapping {other}; apply or reject that one first"
            )));
        }

        // Two identities seen in the same sub-match are two people.
        let shared: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM observations a
             WHERE a.player_id = ?1
               AND EXISTS (SELECT 1 FROM observations b
                           WHERE b.sub_match_id = a.sub_match_id AND b.player_id = ?2)",
            params![mapping.source_player_id, mapping.target_player_id],
            |row| row.get(0),
        )?;
        if shared > 0 {
            return Err(AppError::validation(format!(
                "'{}' and '{}' both appear in {shared} sub-match(es); applying would hide those observations",
                mapping.source_name, mapping.target_name
            )));
        }

        let observations = ObservationRepo::new(self.conn).count_for_player(mapping.source_player_id)?;
        let overrides = OverrideRepo::new(self.conn);
        let override_refs = overrides.list_for_original(mapping.source_player_id)?.len()
            + overrides.count_targeting(mapping.source_player_id)?;

        Ok(ApplyOutcome {
            mapping_id: id,
            renamed_target: mapping.canonical_name != mapping.target_name,
            source_name: mapping.source_name,
            target_name: mapping.target_name,
            canonical_name: mapping.canonical_name,
            observations_moved: observations,
            overrides_repointed: override_refs,
            overrides_deleted: 0,
            dry_run: true,
        })
    }

    /// Applies a confirmed mapping. Run inside a unit of work.
    pub fn apply(&self, id: i64) -> Result<ApplyOutcome, AppError> {
        let plan = self.plan_apply(id)?;
        let mapping = self.get(id)?;
        let (source, target) = (mapping.source_player_id, mapping.target_player_id);

        let players = PlayerRepo::new(self.conn);
        let mut renamed_target = false;
        if plan.renamed_target {
            match players.find_by_name(&mapping.canonical_name)? {
                Some(holder) if holder.id != target && holder.id != source => {
                    warn!(
                        "Keeping target name '{}': canonical '{}' belongs to player {}",
                        mapping.target_name, mapping.canonical_name, holder.id
                    );
                }
                Some(holder) if holder.id == source => {
                    // Source still owns the canonical spelling; free it first.
                    players.rename(source, &format!("{} [merged #{}]", holder.name, mapping.id))?;
                    players.rename(target, &mapping.canonical_name)?;
                    renamed_target = true;
                }
                _ => {
                    players.rename(target, &mapping.canonical_name)?;
                    renamed_target = true;
                }
            }
        }
        let target_name = players.require(target)?.name;

        let (observations_moved, dropped) = ObservationRepo::new(self.conn).merge_player(source, target)?;
        if dropped > 0 {
            return Err(AppError::validation(format!(
                "applying mapping {id} would drop {dropped} observation(s)"
            )));
        }

        let overrides = OverrideRepo::new(self.conn);
        let (orig_updated, orig_deleted) = overrides.merge_original(source, target)?;
        let (target_updated, target_deleted) = overrides.merge_target(source, target, &target_name)?;

        self.conn.execute(
            "UPDATE global_mappings SET applied_at = datetime('now'), updated_at = datetime('now')
             WHERE id = ?1",
            [id],
        )?;

        info!(
            "Applied mapping {id}: '{}' -> '{}' ({observations_moved} observations)",
            mapping.source_name, target_name
        );

        Ok(ApplyOutcome {
            mapping_id: id,
            source_name: mapping.source_name,
            target_name,
            canonical_name: mapping.canonical_name,
            observations_moved,
            overrides_repointed: orig_updated + target_updated,
            overrides_deleted: orig_deleted + target_deleted,
            renamed_target,
            dry_run: false,
        })
    }

    /// Repoints mappings from a Player that is being merged away.
    ///
    /// Mappings that would become self-referential or give the survivor a
    /// second mapping as source are deleted. Returns `(updated, deleted)`.
    pub fn merge_player(&self, from: PlayerId, into: PlayerId) -> Result<(usize, usize), AppError> {
        let mut deleted = self.conn.execute(
            "DELETE FROM global_mappings
             WHERE (source_player_id = ?1 AND target_player_id = ?2)
                OR (source_player_id = ?2 AND target_player_id = ?1)",
            params![from, into],
        )?;
        let mut updated = self.conn.execute(
            "UPDATE OR IGNORE global_mappings
             SET source_player_id = ?1, updated_at = datetime('now')
             WHERE source_player_id = ?2",
            params![into, from],
        )?;
        deleted += self
            .conn
            .execute("DELETE FROM global_mappings WHERE source_player_id = ?1", [from])?;
        updated += self.conn.execute(
            "UPDATE global_mappings
             SET target_player_id = ?1, updated_at = datetime('now')
             WHERE target_player_id = ?2",
            params![into, from],
        )?;
        Ok((updated, deleted))
    }

    /// Applied mappings whose source has picked up observations again.
    pub fn verify(&self) -> Result<Vec<VerifyIssue>, AppError> {
        let observations = ObservationRepo::new(self.conn);
        let mut issues = Vec::new();
        for mapping in self.confirmed()? {
            if mapping.applied_at.is_none() {
                continue;
            }
            let remaining = observations.count_for_player(mapping.source_player_id)?;
            if remaining > 0 {
                issues.push(VerifyIssue {
                    mapping,
                    remaining_observations: remaining,
                });
            }
        }
        Ok(issues)
    }

    /// Writes mappings with `status` (all when `None`) to `path` as a JSON
    /// array, returning how many were written.
    pub fn export(&self, path: &Path, status: Option<MappingStatus>) -> Result<usize, AppError> {
        let mappings = self.list(status, None)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&mappings)?)?;
        info!("Exported {} mappings to {}", mappings.len(), path.display());
        Ok(mappings.len())
    }
}
