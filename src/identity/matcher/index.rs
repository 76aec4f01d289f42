//! In-memory lookup tables owned by one [`IdentityMatcher`](super::IdentityMatcher).
//!
//! The index is built from the store once and refreshed explicitly. Import
//! pushes incremental updates after each committed unit so later
//! observations in the same run see earlier decisions.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::AppError;
use crate::identity::club::ClubContextResolver;
use crate::identity::normalizer::is_bare_first_name;
use crate::store::{GlobalMappingRepo, OverrideRepo, PlayerId, PlayerRepo};

static YEAR_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_(\d{4})$").expect("valid year suffix pattern"));

/// A Player whose name carries a disambiguating club, `"Base (Club)"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeparatedIdentity {
    pub player_id: PlayerId,
    pub name: String,
    pub base: String,
    /// Club part with any `_YYYY` split suffix removed.
    pub club: String,
    pub year: Option<i32>,
}

impl SeparatedIdentity {
    /// Parses `"Base (Club)"` or `"Base (Club_2023)"`.
    pub fn parse(player_id: PlayerId, name: &str) -> Option<Self> {
        let name = name.trim();
        let inner = name.strip_suffix(')')?;
        let open = inner.rfind('(')?;
        let base = inner[..open].trim();
        let club_part = inner[open + 1..].trim();
        if base.is_empty() || club_part.is_empty() || base.contains('(') {
            return None;
        }

        let (club, year) = match YEAR_SUFFIX.captures(club_part) {
            Some(caps) => {
                let year = caps.get(1).and_then(|m| m.as_str().parse().ok());
                (YEAR_SUFFIX.replace(club_part, "").trim().to_string(), year)
            }
            None => (club_part.to_string(), None),
        };
        if club.is_empty() {
            return None;
        }

        Some(Self {
            player_id,
            name: name.to_string(),
            base: base.to_string(),
            club,
            year,
        })
    }

    /// Lookup key of the base name.
    pub fn key(&self) -> String {
        self.base.to_lowercase()
    }
}

/// Evidence that a bare first name meant a specific Player in one club.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstNameTarget {
    pub target_player_id: PlayerId,
    pub target_name: String,
    pub club: String,
    pub uses: usize,
}

/// Target of a confirmed global mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedMapping {
    pub mapping_id: i64,
    pub target_player_id: PlayerId,
    pub target_name: String,
}

/// Counts reported after a (re)build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub separated_identities: usize,
    pub first_names: usize,
    pub confirmed_mappings: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MatcherIndex {
    separated: HashMap<String, Vec<SeparatedIdentity>>,
    first_names: HashMap<String, Vec<FirstNameTarget>>,
    confirmed: HashMap<String, ConfirmedMapping>,
}

impl MatcherIndex {
    /// Builds a fresh index from the store.
    pub fn build(conn: &Connection, clubs: &ClubContextResolver) -> Result<Self, AppError> {
        let mut index = Self::default();

        for player in PlayerRepo::new(conn).all()? {
            index.record_player(player.id, &player.name);
        }

        for row in OverrideRepo::new(conn).first_name_targets()? {
            if !is_bare_first_name(&row.original_name) {
                continue;
            }
            let club = clubs.resolve(&row.team_label);
            if club.is_empty() {
                continue;
            }
            index.add_first_name_uses(
                &row.original_name,
                row.target_player_id,
                &row.target_name,
                &club,
                row.uses,
            );
        }

        for mapping in GlobalMappingRepo::new(conn).confirmed()? {
            index.record_confirmed_mapping(
                &mapping.source_name,
                ConfirmedMapping {
                    mapping_id: mapping.id,
                    target_player_id: mapping.target_player_id,
                    target_name: mapping.target_name,
                },
            );
        }

        let stats = index.stats();
        info!(
            "Matcher index built: {} separated identities, {} first names, {} confirmed mappings",
            stats.separated_identities, stats.first_names, stats.confirmed_mappings
        );
        Ok(index)
    }

    /// Replaces the contents with a fresh build.
    pub fn refresh(&mut self, conn: &Connection, clubs: &ClubContextResolver) -> Result<(), AppError> {
        *self = Self::build(conn, clubs)?;
        Ok(())
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            separated_identities: self.separated.values().map(Vec::len).sum(),
            first_names: self.first_names.len(),
            confirmed_mappings: self.confirmed.len(),
        }
    }

    /// Registers a Player; only separated identities are kept.
    pub fn record_player(&mut self, player_id: PlayerId, name: &str) {
        let Some(identity) = SeparatedIdentity::parse(player_id, name) else {
            return;
        };
        let entry = self.separated.entry(identity.key()).or_default();
        if entry.iter().any(|existing| existing.player_id == player_id) {
            return;
        }
        debug!("Indexed separated identity '{}'", identity.name);
        entry.push(identity);
        entry.sort_by_key(|identity| identity.player_id);
    }

    /// Counts one more use of `bare_name` meaning `target` in `club`.
    pub fn record_first_name_use(
        &mut self,
        bare_name: &str,
        target_player_id: PlayerId,
        target_name: &str,
        club: &str,
    ) {
        self.add_first_name_uses(bare_name, target_player_id, target_name, club, 1);
    }

    fn add_first_name_uses(
        &mut self,
        bare_name: &str,
        target_player_id: PlayerId,
        target_name: &str,
        club: &str,
        uses: usize,
    ) {
        let targets = self.first_names.entry(bare_name.to_lowercase()).or_default();
        match targets
            .iter_mut()
            .find(|t| t.target_player_id == target_player_id && t.club == club)
        {
            Some(existing) => existing.uses += uses,
            None => targets.push(FirstNameTarget {
                target_player_id,
                target_name: target_name.to_string(),
                club: club.to_string(),
                uses,
            }),
        }
    }

    pub fn record_confirmed_mapping(&mut self, source_name: &str, mapping: ConfirmedMapping) {
        self.confirmed.insert(source_name.to_lowercase(), mapping);
    }

    /// Separated identities whose base equals `base`, ignoring case.
    pub fn separated_for(&self, base: &str) -> &[SeparatedIdentity] {
        self.separated
            .get(&base.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Separated identities whose base is `first_name` followed by more words.
    pub fn separated_starting_with(&self, first_name: &str) -> Vec<&SeparatedIdentity> {
        let prefix = format!("{} ", first_name.to_lowercase());
        let mut found: Vec<&SeparatedIdentity> = self
            .separated
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .flat_map(|(_, identities)| identities.iter())
            .collect();
        found.sort_by_key(|identity| identity.player_id);
        found
    }

    pub fn first_name_targets(&self, bare_name: &str) -> &[FirstNameTarget] {
        self.first_names
            .get(&bare_name.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Confirmed mapping whose source name equals `source_name`, ignoring case.
    pub fn confirmed_mapping(&self, source_name: &str) -> Option<&ConfirmedMapping> {
        self.confirmed.get(&source_name.to_lowercase())
    }
}
