use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::{debug, info};

use super::models::{Player, PlayerId};
use crate::error::AppError;
use crate::identity::normalizer::is_bare_first_name;

/// Lookup and lazy creation of canonical identities.
///
/// This is the surface the statistics side of the application depends on;
/// the repair tools use the richer [`PlayerRepo`] API directly.
pub trait PlayerRegistry {
    /// Returns the id for `name`, inserting a new Player when none exists.
    fn get_or_create(&self, name: &str) -> Result<PlayerId, AppError>;

    /// Returns the display name for `id`, if the Player exists.
    fn get(&self, id: PlayerId) -> Result<Option<String>, AppError>;
}

/// A Player together with how many observations reference it directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerUsage {
    pub player: Player,
    pub observations: usize,
}

/// Repository for the `players` table.
pub struct PlayerRepo<'c> {
    conn: &'c Connection,
}

fn usage_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlayerUsage> {
    Ok(PlayerUsage {
        player: Player {
            id: row.get(0)?,
            name: row.get(1)?,
        },
        observations: row.get::<_, i64>(2)? as usize,
    })
}

impl<'c> PlayerRepo<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Exact (case-sensitive) lookup.
    pub fn find_by_name(&self, name: &str) -> Result<Option<Player>, AppError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name FROM players WHERE name = ?1",
                [name],
                |row| {
                    Ok(Player {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?)
    }

    /// Fetches a Player that must exist.
    pub fn require(&self, id: PlayerId) -> Result<Player, AppError> {
        self.conn
            .query_row("SELECT id, name FROM players WHERE id = ?1", [id], |row| {
                Ok(Player {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .optional()?
            .ok_or(AppError::PlayerIdNotFound { id })
    }

    /// Fetches a Player by exact name that must exist.
    pub fn require_by_name(&self, name: &str) -> Result<Player, AppError> {
        self.find_by_name(name)?
            .ok_or_else(|| AppError::player_not_found(name))
    }

    /// Players whose name equals `name` ignoring ASCII case, most used first.
    ///
    /// Ties on usage are broken by the lower id so the order is stable.
    pub fn find_case_cluster(&self, name: &str) -> Result<Vec<PlayerUsage>, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.name, COUNT(o.id) AS used
             FROM players p
             LEFT JOIN observations o ON o.player_id = p.id
             WHERE p.name = ?1 COLLATE NOCASE
             GROUP BY p.id
             ORDER BY used DESC, p.id ASC",
        )?;
        let rows = stmt.query_map([name], usage_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Players whose name equals `name` under full Unicode case folding.
    pub fn find_case_folded(&self, name: &str) -> Result<Vec<Player>, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name FROM players WHERE fold_case(name) = fold_case(?1) ORDER BY id",
        )?;
        let rows = stmt.query_map([name], |row| {
            Ok(Player {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// All Players ordered by id.
    pub fn all(&self) -> Result<Vec<Player>, AppError> {
        let mut stmt = self.conn.prepare("SELECT id, name FROM players ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Player {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// All Players with their direct observation counts, ordered by id.
    pub fn all_with_usage(&self) -> Result<Vec<PlayerUsage>, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.name, COUNT(o.id)
             FROM players p
             LEFT JOIN observations o ON o.player_id = p.id
             GROUP BY p.id
             ORDER BY p.id",
        )?;
        let rows = stmt.query_map([], usage_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn observation_count(&self, id: PlayerId) -> Result<usize, AppError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM observations WHERE player_id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Players with no observations and no override or mapping references.
    ///
    /// These are leftovers of merges and splits and are safe to delete.
    pub fn find_unreferenced(&self) -> Result<Vec<Player>, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.name FROM players p
             WHERE NOT EXISTS (SELECT 1 FROM observations o WHERE o.player_id = p.id)
               AND NOT EXISTS (SELECT 1 FROM observation_overrides ov
                               WHERE ov.original_player_id = p.id OR ov.target_player_id = p.id)
               AND NOT EXISTS (SELECT 1 FROM global_mappings g
                               WHERE g.source_player_id = p.id OR g.target_player_id = p.id)
             ORDER BY p.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Player {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Deletes unreferenced Players, only bare first names unless `all`.
    ///
    /// Returns the deleted rows; with `dry_run` nothing is deleted.
    pub fn cleanup_unused(&self, all: bool, dry_run: bool) -> Result<Vec<Player>, AppError> {
        let unused: Vec<Player> = self
            .find_unreferenced()?
            .into_iter()
            .filter(|player| all || is_bare_first_name(&player.name))
            .collect();
        if !dry_run {
            for player in &unused {
                self.delete(player.id)?;
            }
            info!("Deleted {} unused players", unused.len());
        }
        Ok(unused)
    }

    /// Renames a Player, rejecting names already taken by another Player.
    pub fn rename(&self, id: PlayerId, new_name: &str) -> Result<(), AppError> {
        if let Some(existing) = self.find_by_name(new_name)?
            && existing.id != id
        {
            return Err(AppError::validation(format!(
                "cannot rename player {id} to '{new_name}': name belongs to player {}",
                existing.id
            )));
        }
        let changed = self.conn.execute(
            "UPDATE players SET name = ?1 WHERE id = ?2",
            params![new_name, id],
        )?;
        if changed == 0 {
            return Err(AppError::PlayerIdNotFound { id });
        }
        debug!("Renamed player {id} to '{new_name}'");
        Ok(())
    }

    /// Deletes a Player row. Callers must have moved every reference first.
    pub fn delete(&self, id: PlayerId) -> Result<(), AppError> {
        self.conn
            .execute("DELETE FROM players WHERE id = ?1", [id])?;
        Ok(())
    }
}

impl PlayerRegistry for PlayerRepo<'_> {
    fn get_or_create(&self, name: &str) -> Result<PlayerId, AppError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::validation("player name cannot be empty"));
        }
        if let Some(player) = self.find_by_name(name)? {
            return Ok(player.id);
        }
        self.conn
            .execute("INSERT INTO players (name) VALUES (?1)", [name])?;
        let id = self.conn.last_insert_rowid();
        debug!("Created player {id} '{name}'");
        Ok(id)
    }

    fn get(&self, id: PlayerId) -> Result<Option<String>, AppError> {
        Ok(self
            .conn
            .query_row("SELECT name FROM players WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    #[test]
    fn test_get_or_create_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let repo = PlayerRepo::new(db.conn());
        let first = repo.get_or_create("Mikael Granath").unwrap();
        let second = repo.get_or_create("Mikael Granath").unwrap();
        assert_eq!(first, second);
        assert_eq!(repo.get(first).unwrap(), Some("Mikael Granath".to_string()));
        assert_eq!(repo.get(first + 100).unwrap(), None);
    }

    #[test]
    fn test_get_or_create_rejects_empty_name() {
        let db = Database::open_in_memory().unwrap();
        let repo = PlayerRepo::new(db.conn());
        assert!(repo.get_or_create("   ").unwrap_err().is_validation());
    }

    #[test]
    fn test_find_case_cluster_orders_by_usage() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let repo = PlayerRepo::new(conn);
        let lower = repo.get_or_create("mikael granath").unwrap();
        let upper = repo.get_or_create("MIKAEL GRANATH").unwrap();
        repo.get_or_create("Mikael Berg").unwrap();

        conn.execute(
            "INSERT INTO sub_matches (id, played_at) VALUES (1, '2024-01-01 19:00:00')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO observations (sub_match_id, player_id, team_number) VALUES (1, ?1, 1)",
            [upper],
        )
        .unwrap();

        let cluster = repo.find_case_cluster("Mikael Granath").unwrap();
        let ids: Vec<_> = cluster.iter().map(|usage| usage.player.id).collect();
        assert_eq!(ids, vec![upper, lower]);
        assert_eq!(cluster[0].observations, 1);
    }

    #[test]
    fn test_find_case_folded_matches_non_ascii() {
        let db = Database::open_in_memory().unwrap();
        let repo = PlayerRepo::new(db.conn());
        let id = repo.get_or_create("ÅSA VALL").unwrap();
        // NOCASE only folds ASCII, so Å and å stay distinct there
        assert!(repo.find_case_cluster("åsa vall").unwrap().is_empty());
        let folded = repo.find_case_folded("åsa vall").unwrap();
        assert_eq!(folded.len(), 1);
        assert_eq!(folded[0].id, id);
    }

    #[test]
    fn test_rename_rejects_taken_name() {
        let db = Database::open_in_memory().unwrap();
        let repo = PlayerRepo::new(db.conn());
        let a = repo.get_or_create("Peter Berg").unwrap();
        repo.get_or_create("Peder Berg").unwrap();
        assert!(repo.rename(a, "Peder Berg").unwrap_err().is_validation());
        repo.rename(a, "Peter Bergh").unwrap();
        assert_eq!(repo.require(a).unwrap().name, "Peter Bergh");
    }

    #[test]
    fn test_find_unreferenced() {
        let db = Database::open_in_memory().unwrap();
        let repo = PlayerRepo::new(db.conn());
        let orphan = repo.get_or_create("Nobody").unwrap();
        let unused = repo.find_unreferenced().unwrap();
        assert_eq!(unused.len(), 1);
        assert_eq!(unused[0].id, orphan);
    }

    #[test]
    fn test_cleanup_unused_keeps_full_names_by_default() {
        let db = Database::open_in_memory().unwrap();
        let repo = PlayerRepo::new(db.conn());
        let bare = repo.get_or_create("Mats").unwrap();
        repo.get_or_create("Mats Andersson (SSDC)").unwrap();

        let preview = repo.cleanup_unused(false, true).unwrap();
        assert_eq!(preview.len(), 1);
        assert_eq!(preview[0].id, bare);
        assert_eq!(repo.all().unwrap().len(), 2);

        repo.cleanup_unused(false, false).unwrap();
        assert!(repo.find_by_name("Mats").unwrap().is_none());
        assert_eq!(repo.cleanup_unused(true, false).unwrap().len(), 1);
        assert!(repo.all().unwrap().is_empty());
    }
}
