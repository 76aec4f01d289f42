//! Resolution of one raw observation to a canonical identity.
//!
//! [`IdentityMatcher::resolve`] normalizes the name, resolves the club and
//! runs the ordered [`rules`]. It only reads from the store; persisting the
//! decision is the caller's job (see [`crate::import`]).

pub mod index;
pub mod rules;

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::Mutex;

use lru::LruCache;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::constants::{self, confidence};
use crate::error::AppError;
use crate::identity::club::ClubContextResolver;
use crate::identity::normalizer::{NameNormalizer, is_bare_first_name};
use crate::store::{Player, PlayerId};

pub use index::{ConfirmedMapping, FirstNameTarget, IndexStats, MatcherIndex, SeparatedIdentity};
pub use rules::{MatchRule, RuleEnv};

/// Outcome class of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    ExactMatch,
    CaseVariation,
    FirstNameContext,
    ClubVariant,
    CreateClubVariant,
    GlobalMapping,
    CaseInsensitive,
    HyphenVariant,
    CreateNew,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::ExactMatch => "exact_match",
            Decision::CaseVariation => "case_variation",
            Decision::FirstNameContext => "first_name_context",
            Decision::ClubVariant => "club_variant",
            Decision::CreateClubVariant => "create_club_variant",
            Decision::GlobalMapping => "global_mapping",
            Decision::CaseInsensitive => "case_insensitive",
            Decision::HyphenVariant => "hyphen_variant",
            Decision::CreateNew => "create_new",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "exact_match" => Decision::ExactMatch,
            "case_variation" => Decision::CaseVariation,
            "first_name_context" => Decision::FirstNameContext,
            "club_variant" => Decision::ClubVariant,
            "create_club_variant" => Decision::CreateClubVariant,
            "global_mapping" => Decision::GlobalMapping,
            "case_insensitive" => Decision::CaseInsensitive,
            "hyphen_variant" => Decision::HyphenVariant,
            "create_new" => Decision::CreateNew,
            other => return Err(AppError::validation(format!("unknown decision '{other}'"))),
        })
    }
}

/// Result of matching one `(name, team label)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchDecision {
    pub decision: Decision,
    pub target_player_id: Option<PlayerId>,
    pub target_name: String,
    pub confidence: u8,
    pub rationale: String,
}

impl MatchDecision {
    pub(crate) fn to_player(
        decision: Decision,
        player: &Player,
        confidence: u8,
        rationale: String,
    ) -> Self {
        Self {
            decision,
            target_player_id: Some(player.id),
            target_name: player.name.clone(),
            confidence,
            rationale,
        }
    }

    pub(crate) fn create_new(name: &str, rationale: &str) -> Self {
        Self {
            decision: Decision::CreateNew,
            target_player_id: None,
            target_name: name.to_string(),
            confidence: confidence::NONE,
            rationale: rationale.to_string(),
        }
    }

    /// High tier: safe to accept without review.
    pub fn is_high_confidence(&self) -> bool {
        self.confidence >= confidence::HIGH_TIER
    }

    /// Medium tier: accepted, but worth a warning.
    pub fn is_medium_confidence(&self) -> bool {
        (confidence::MEDIUM_TIER..confidence::HIGH_TIER).contains(&self.confidence)
    }
}

/// Normalized inputs shared by every rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchContext {
    pub raw_name: String,
    pub name: String,
    /// Resolved club, `None` when the label is missing or empty.
    pub club: Option<String>,
    pub is_bare: bool,
}

/// Matcher bound to one store's index.
pub struct IdentityMatcher {
    normalizer: NameNormalizer,
    clubs: ClubContextResolver,
    index: MatcherIndex,
    rules: Vec<Box<dyn MatchRule>>,
    club_cache: Mutex<LruCache<String, String>>,
}

impl IdentityMatcher {
    /// Creates a matcher with an empty index. Call [`refresh`](Self::refresh)
    /// before matching against an existing store.
    pub fn new(normalizer: NameNormalizer, clubs: ClubContextResolver) -> Self {
        let capacity = NonZeroUsize::new(constants::CLUB_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            normalizer,
            clubs,
            index: MatcherIndex::default(),
            rules: rules::default_rules(),
            club_cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Replaces the team-label cache with one of `size` entries.
    pub fn with_club_cache_size(mut self, size: usize) -> Self {
        let capacity = NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN);
        self.club_cache = Mutex::new(LruCache::new(capacity));
        self
    }

    /// Creates a matcher and builds its index from `conn`.
    pub fn build(
        conn: &Connection,
        normalizer: NameNormalizer,
        clubs: ClubContextResolver,
    ) -> Result<Self, AppError> {
        let mut matcher = Self::new(normalizer, clubs);
        matcher.refresh(conn)?;
        Ok(matcher)
    }

    /// Rebuilds the index from the store.
    pub fn refresh(&mut self, conn: &Connection) -> Result<(), AppError> {
        self.index.refresh(conn, &self.clubs)
    }

    pub fn index(&self) -> &MatcherIndex {
        &self.index
    }

    /// Mutable index access for post-commit incremental updates.
    pub fn index_mut(&mut self) -> &mut MatcherIndex {
        &mut self.index
    }

    pub fn normalizer(&self) -> &NameNormalizer {
        &self.normalizer
    }

    pub fn clubs(&self) -> &ClubContextResolver {
        &self.clubs
    }

    /// Rule names in evaluation order.
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    /// Resolves a team label, memoizing results.
    pub fn resolve_club(&self, label: &str) -> String {
        let mut cache = self
            .club_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(club) = cache.get(label) {
            return club.clone();
        }
        let club = self.clubs.resolve(label);
        cache.put(label.to_string(), club.clone());
        club
    }

    /// Builds the rule context for a raw observation.
    pub fn context(&self, raw_name: &str, team_label: Option<&str>) -> MatchContext {
        let name = self.normalizer.normalize(raw_name);
        let club = team_label
            .map(|label| self.resolve_club(label))
            .filter(|club| !club.is_empty());
        MatchContext {
            raw_name: raw_name.to_string(),
            is_bare: is_bare_first_name(&name),
            name,
            club,
        }
    }

    /// Decides which identity `raw_name` seen for `team_label` denotes.
    ///
    /// Reads only; the same store state always yields the same decision.
    #[instrument(skip(self, conn))]
    pub fn resolve(
        &self,
        conn: &Connection,
        raw_name: &str,
        team_label: Option<&str>,
    ) -> Result<MatchDecision, AppError> {
        let ctx = self.context(raw_name, team_label);
        self.resolve_context(conn, &ctx)
    }

    /// Runs the rules for an already built context.
    pub fn resolve_context(
        &self,
        conn: &Connection,
        ctx: &MatchContext,
    ) -> Result<MatchDecision, AppError> {
        if ctx.name.is_empty() {
            return Ok(MatchDecision::create_new("", "empty name"));
        }

        let env = RuleEnv {
            conn,
            index: &self.index,
            clubs: &self.clubs,
        };
        for rule in &self.rules {
            if let Some(decision) = rule.try_match(ctx, &env)? {
                debug!(
                    "'{}' ({:?}) -> {} '{}' [{}%] via {}",
                    ctx.name,
                    ctx.club,
                    decision.decision,
                    decision.target_name,
                    decision.confidence,
                    rule.name()
                );
                return Ok(decision);
            }
        }
        Ok(MatchDecision::create_new(&ctx.name, "no rule matched"))
    }
}
