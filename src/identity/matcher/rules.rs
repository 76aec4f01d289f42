//! The ordered resolution rules.
//!
//! Each rule either produces a [`MatchDecision`] or has no opinion. The
//! matcher evaluates them in the order returned by [`default_rules`] and the
//! first decision wins.

use rusqlite::Connection;

use super::index::{MatcherIndex, SeparatedIdentity};
use super::{Decision, MatchContext, MatchDecision};
use crate::constants::confidence;
use crate::error::AppError;
use crate::identity::club::ClubContextResolver;
use crate::store::{OverrideRepo, PlayerRepo};

/// Everything a rule may read while deciding.
pub struct RuleEnv<'a> {
    pub conn: &'a Connection,
    pub index: &'a MatcherIndex,
    pub clubs: &'a ClubContextResolver,
}

pub trait MatchRule: Send + Sync {
    /// Short identifier used in logs and rationales.
    fn name(&self) -> &'static str;

    fn try_match(
        &self,
        ctx: &MatchContext,
        env: &RuleEnv<'_>,
    ) -> Result<Option<MatchDecision>, AppError>;
}

/// The rule list in priority order.
pub fn default_rules() -> Vec<Box<dyn MatchRule>> {
    vec![
        Box::new(CaseClusterRule),
        Box::new(FirstNameContextRule),
        Box::new(ClubVariantRule),
        Box::new(GlobalMappingRule),
        Box::new(CaseInsensitiveRule),
        Box::new(HyphenVariantRule),
        Box::new(CreateNewRule),
    ]
}

/// Players equal to the name ignoring ASCII case.
pub struct CaseClusterRule;

impl MatchRule for CaseClusterRule {
    fn name(&self) -> &'static str {
        "case_cluster"
    }

    fn try_match(
        &self,
        ctx: &MatchContext,
        env: &RuleEnv<'_>,
    ) -> Result<Option<MatchDecision>, AppError> {
        let cluster = PlayerRepo::new(env.conn).find_case_cluster(&ctx.name)?;
        let Some(primary) = cluster.first() else {
            return Ok(None);
        };

        if cluster.len() > 1 {
            if primary.player.name == ctx.name {
                return Ok(Some(MatchDecision::to_player(
                    Decision::ExactMatch,
                    &primary.player,
                    confidence::EXACT,
                    format!(
                        "primary of {} case variants ({} observations)",
                        cluster.len(),
                        primary.observations
                    ),
                )));
            }
            return Ok(Some(MatchDecision::to_player(
                Decision::CaseVariation,
                &primary.player,
                confidence::CASE_VARIATION_PRIMARY,
                format!(
                    "'{}' is a case variant of primary '{}' ({} observations)",
                    ctx.name, primary.player.name, primary.observations
                ),
            )));
        }

        // A bare first name seen with a club may still denote someone else.
        if primary.player.name == ctx.name && !(ctx.is_bare && ctx.club.is_some()) {
            return Ok(Some(MatchDecision::to_player(
                Decision::ExactMatch,
                &primary.player,
                confidence::EXACT,
                "exact name match".to_string(),
            )));
        }
        Ok(None)
    }
}

/// Reuses what a bare first name meant earlier in the same club.
pub struct FirstNameContextRule;

impl MatchRule for FirstNameContextRule {
    fn name(&self) -> &'static str {
        "first_name_context"
    }

    fn try_match(
        &self,
        ctx: &MatchContext,
        env: &RuleEnv<'_>,
    ) -> Result<Option<MatchDecision>, AppError> {
        let Some(club) = ctx.club.as_deref() else {
            return Ok(None);
        };
        if !ctx.is_bare {
            return Ok(None);
        }

        let best = env
            .index
            .first_name_targets(&ctx.name)
            .iter()
            .filter(|target| target.club == club)
            .filter(|target| {
                // A club-suffixed target must name the same club.
                match SeparatedIdentity::parse(target.target_player_id, &target.target_name) {
                    Some(identity) => env.clubs.resolve(&identity.club) == club,
                    None => true,
                }
            })
            .max_by(|a, b| {
                a.uses
                    .cmp(&b.uses)
                    .then_with(|| b.target_player_id.cmp(&a.target_player_id))
            });

        Ok(best.map(|target| MatchDecision {
            decision: Decision::FirstNameContext,
            target_player_id: Some(target.target_player_id),
            target_name: target.target_name.clone(),
            confidence: confidence::FIRST_NAME_CONTEXT,
            rationale: format!(
                "'{}' in {club} resolved to '{}' {} time(s) before",
                ctx.name, target.target_name, target.uses
            ),
        }))
    }
}

/// Picks the `"Base (Club)"` identity for the observation's club.
pub struct ClubVariantRule;

impl ClubVariantRule {
    /// Ranks a variant against the resolved club: 2 exact, 1 standardized.
    fn club_rank(identity: &SeparatedIdentity, club: &str, clubs: &ClubContextResolver) -> u8 {
        if identity.club.to_lowercase() == club.to_lowercase() {
            2
        } else if clubs.resolve(&identity.club).to_lowercase() == club.to_lowercase() {
            1
        } else {
            0
        }
    }
}

impl MatchRule for ClubVariantRule {
    fn name(&self) -> &'static str {
        "club_variant"
    }

    fn try_match(
        &self,
        ctx: &MatchContext,
        env: &RuleEnv<'_>,
    ) -> Result<Option<MatchDecision>, AppError> {
        let Some(club) = ctx.club.as_deref() else {
            return Ok(None);
        };

        let mut candidates: Vec<&SeparatedIdentity> = env.index.separated_for(&ctx.name).iter().collect();
        let partial = candidates.is_empty() && ctx.is_bare;
        if partial {
            candidates = env.index.separated_starting_with(&ctx.name);
        }
        if candidates.is_empty() {
            return Ok(None);
        }

        // Prefer exact club, then the undated variant, then the latest year.
        let best = candidates
            .iter()
            .map(|identity| (Self::club_rank(identity, club, env.clubs), *identity))
            .filter(|(rank, _)| *rank > 0)
            .max_by(|(rank_a, a), (rank_b, b)| {
                rank_a
                    .cmp(rank_b)
                    .then_with(|| a.year.is_none().cmp(&b.year.is_none()))
                    .then_with(|| a.year.cmp(&b.year))
                    .then_with(|| b.player_id.cmp(&a.player_id))
            });

        if let Some((rank, identity)) = best {
            let (score, how) = if rank == 2 {
                (confidence::CLUB_VARIANT_EXACT, "exact")
            } else {
                (confidence::CLUB_VARIANT_STANDARDIZED, "standardized")
            };
            return Ok(Some(MatchDecision {
                decision: Decision::ClubVariant,
                target_player_id: Some(identity.player_id),
                target_name: identity.name.clone(),
                confidence: score,
                rationale: format!("club variant for {club} ({how} club match)"),
            }));
        }

        let base = if partial { ctx.name.clone() } else { candidates[0].base.clone() };
        Ok(Some(MatchDecision {
            decision: Decision::CreateClubVariant,
            target_player_id: None,
            target_name: format!("{base} ({club})"),
            confidence: confidence::CREATE_CLUB_VARIANT,
            rationale: format!(
                "'{}' has {} club variant(s), none for {club}",
                ctx.name,
                candidates.len()
            ),
        }))
    }
}

/// Follows a confirmed global mapping.
pub struct GlobalMappingRule;

impl MatchRule for GlobalMappingRule {
    fn name(&self) -> &'static str {
        "global_mapping"
    }

    fn try_match(
        &self,
        ctx: &MatchContext,
        env: &RuleEnv<'_>,
    ) -> Result<Option<MatchDecision>, AppError> {
        Ok(env
            .index
            .confirmed_mapping(&ctx.name)
            .map(|mapping| MatchDecision {
                decision: Decision::GlobalMapping,
                target_player_id: Some(mapping.target_player_id),
                target_name: mapping.target_name.clone(),
                confidence: confidence::GLOBAL_MAPPING,
                rationale: format!("confirmed global mapping {}", mapping.mapping_id),
            }))
    }
}

/// Players equal to the name under full Unicode case folding.
pub struct CaseInsensitiveRule;

impl MatchRule for CaseInsensitiveRule {
    fn name(&self) -> &'static str {
        "case_insensitive"
    }

    fn try_match(
        &self,
        ctx: &MatchContext,
        env: &RuleEnv<'_>,
    ) -> Result<Option<MatchDecision>, AppError> {
        let candidates = PlayerRepo::new(env.conn).find_case_folded(&ctx.name)?;
        match candidates.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(MatchDecision::to_player(
                Decision::CaseInsensitive,
                only,
                confidence::CASE_INSENSITIVE,
                "single case-insensitive match".to_string(),
            ))),
            several => {
                let overrides = OverrideRepo::new(env.conn);
                let mut best = &several[0];
                let mut best_refs = overrides.count_targeting(best.id)?;
                for candidate in &several[1..] {
                    let refs = overrides.count_targeting(candidate.id)?;
                    if refs > best_refs {
                        best = candidate;
                        best_refs = refs;
                    }
                }
                Ok(Some(MatchDecision::to_player(
                    Decision::CaseInsensitive,
                    best,
                    confidence::CASE_INSENSITIVE_PRIORITIZED,
                    format!(
                        "{} case-insensitive matches, most referenced by overrides ({best_refs})",
                        several.len()
                    ),
                )))
            }
        }
    }
}

/// Swaps hyphens and spaces.
pub struct HyphenVariantRule;

impl HyphenVariantRule {
    fn variants(name: &str) -> Vec<String> {
        let mut variants = Vec::new();
        if name.contains('-') {
            variants.push(name.replace('-', " "));
        }
        for (i, c) in name.char_indices() {
            if c == ' ' {
                variants.push(format!("{}-{}", &name[..i], &name[i + 1..]));
            }
        }
        let hyphenated = name.replace(' ', "-");
        if hyphenated != name && !variants.contains(&hyphenated) {
            variants.push(hyphenated);
        }
        variants.dedup();
        variants
    }
}

impl MatchRule for HyphenVariantRule {
    fn name(&self) -> &'static str {
        "hyphen_variant"
    }

    fn try_match(
        &self,
        ctx: &MatchContext,
        env: &RuleEnv<'_>,
    ) -> Result<Option<MatchDecision>, AppError> {
        let players = PlayerRepo::new(env.conn);
        for variant in Self::variants(&ctx.name) {
            if let Some(player) = players.find_by_name(&variant)? {
                return Ok(Some(MatchDecision::to_player(
                    Decision::HyphenVariant,
                    &player,
                    confidence::HYPHEN_VARIANT,
                    format!("hyphen/space variant of '{}'", ctx.name),
                )));
            }
        }
        Ok(None)
    }
}

/// Always matches; the caller creates the Player.
pub struct CreateNewRule;

impl MatchRule for CreateNewRule {
    fn name(&self) -> &'static str {
        "create_new"
    }

    fn try_match(
        &self,
        ctx: &MatchContext,
        _env: &RuleEnv<'_>,
    ) -> Result<Option<MatchDecision>, AppError> {
        Ok(Some(MatchDecision::create_new(&ctx.name, "no existing identity matched")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_order() {
        let names: Vec<_> = default_rules().iter().map(|rule| rule.name()).collect();
        assert_eq!(
            names,
            vec![
                "case_cluster",
                "first_name_context",
                "club_variant",
                "global_mapping",
                "case_insensitive",
                "hyphen_variant",
                "create_new",
            ]
        );
    }

    #[test]
    fn test_hyphen_variants() {
        assert_eq!(
            HyphenVariantRule::variants("Anna-Karin Berg"),
            vec![
                "Anna Karin Berg".to_string(),
                "Anna-Karin-Berg".to_string()
            ]
        );
        assert_eq!(
            HyphenVariantRule::variants("Anna Karin"),
            vec!["Anna-Karin".to_string()]
        );
        assert!(HyphenVariantRule::variants("Mats").is_empty());
    }

    #[test]
    fn test_hyphen_variants_join_every_space() {
        assert_eq!(
            HyphenVariantRule::variants("Lars Erik Olsson"),
            vec![
                "Lars-Erik Olsson".to_string(),
                "Lars Erik-Olsson".to_string(),
                "Lars-Erik-Olsson".to_string()
            ]
        );
    }
}
