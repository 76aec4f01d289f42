//! Splitting one conflated identity into club- and time-coherent ones.

use std::collections::HashSet;

use chrono::{Datelike, NaiveDateTime};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::matcher::SeparatedIdentity;
use super::overlap::{OverlapDetector, OverlapFinding};
use crate::error::AppError;
use crate::store::{
    ObservationRepo, OverrideRepo, Player, PlayerId, PlayerRegistry, PlayerRepo, SubMatchId,
};

/// One new identity the split would produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplitCluster {
    pub club: String,
    pub new_name: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub matches: usize,
    pub existing_player_id: Option<PlayerId>,
    #[serde(skip)]
    pub observation_ids: Vec<i64>,
    #[serde(skip)]
    pub sub_match_ids: Vec<SubMatchId>,
}

/// Everything needed to review and apply a split.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitPlan {
    pub player: Player,
    pub findings: Vec<OverlapFinding>,
    pub clusters: Vec<SplitCluster>,
}

impl SplitPlan {
    pub fn is_needed(&self) -> bool {
        !self.findings.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplitTarget {
    pub player_id: PlayerId,
    pub name: String,
    pub observations_moved: usize,
}

/// Result of applying a split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplitOutcome {
    pub player: Player,
    pub targets: Vec<SplitTarget>,
    pub overrides_moved: usize,
    pub overrides_retargeted: usize,
    pub remaining_observations: usize,
    pub warnings: Vec<String>,
}

/// Strips characters that would break the `"Name (Club)"` form.
fn club_for_name(club: &str) -> String {
    club.replace(['(', ')'], "").trim().to_string()
}

/// `candidate`, or `candidate` with a `_2`, `_3`, ... counter inside the
/// parentheses when the plan already uses it.
fn unique_name(taken: &HashSet<String>, candidate: &str) -> String {
    if !taken.contains(candidate) {
        return candidate.to_string();
    }
    let stem = candidate.strip_suffix(')').unwrap_or(candidate);
    (2..)
        .map(|n| format!("{stem}_{n})"))
        .find(|name| !taken.contains(name))
        .unwrap_or_else(|| candidate.to_string())
}

pub struct IdentitySplitter {
    detector: OverlapDetector,
}

impl IdentitySplitter {
    pub fn new(detector: OverlapDetector) -> Self {
        Self { detector }
    }

    pub fn detector(&self) -> &OverlapDetector {
        &self.detector
    }

    /// Builds the split plan for a Player. Read-only.
    pub fn plan(&self, conn: &Connection, player: &Player) -> Result<SplitPlan, AppError> {
        let report = self.detector.analyze(conn, player)?;
        let base = SeparatedIdentity::parse(player.id, &player.name)
            .map(|identity| identity.base)
            .unwrap_or_else(|| player.name.clone());

        let players = PlayerRepo::new(conn);
        let mut clusters = Vec::new();
        let mut taken: HashSet<String> = HashSet::new();
        for activity in &report.activities {
            let club = club_for_name(&activity.club);
            let dated = activity.periods.len() > 1;
            for period in &activity.periods {
                let new_name = if dated {
                    unique_name(&taken, &format!("{base} ({club}_{})", period.start.year()))
                } else {
                    unique_name(&taken, &format!("{base} ({club})"))
                };
                taken.insert(new_name.clone());
                let existing_player_id = players.find_by_name(&new_name)?.map(|p| p.id);
                clusters.push(SplitCluster {
                    club: activity.club.clone(),
                    new_name,
                    start: period.start,
                    end: period.end,
                    matches: period.matches,
                    existing_player_id,
                    observation_ids: period.observation_ids.clone(),
                    sub_match_ids: period.sub_match_ids.clone(),
                });
            }
        }

        Ok(SplitPlan {
            player: player.clone(),
            findings: report.findings,
            clusters,
        })
    }

    /// Applies a plan. Run inside one unit of work.
    ///
    /// Plans without overlap findings are rejected; a Player that moved
    /// clubs between seasons is one person.
    #[instrument(skip(self, conn, plan), fields(player = %plan.player.name))]
    pub fn apply(&self, conn: &Connection, plan: &SplitPlan) -> Result<SplitOutcome, AppError> {
        if !plan.is_needed() {
            return Err(AppError::validation(format!(
                "'{}' has no overlapping club activity; nothing to split",
                plan.player.name
            )));
        }
        let original = plan.player.id;
        let players = PlayerRepo::new(conn);
        let observations = ObservationRepo::new(conn);
        let overrides = OverrideRepo::new(conn);

        let mut targets = Vec::new();
        let mut overrides_moved = 0;
        for cluster in &plan.clusters {
            if cluster.new_name == plan.player.name {
                return Err(AppError::validation(format!(
                    "split cluster for {} would keep the original name",
                    cluster.club
                )));
            }
            let target = players.get_or_create(&cluster.new_name)?;
            let moved = observations.reassign(&cluster.observation_ids, target)?;
            overrides_moved += overrides.move_original(original, target, &cluster.sub_match_ids)?;
            targets.push(SplitTarget {
                player_id: target,
                name: cluster.new_name.clone(),
                observations_moved: moved,
            });
        }

        let mut warnings = Vec::new();
        let mut overrides_retargeted = 0;
        for pointing in overrides.list_targeting(original)? {
            match self.cluster_for_override(conn, plan, &targets, pointing.sub_match_id, pointing.original_player_id)? {
                Some(target) => {
                    overrides.retarget(pointing.id, target.player_id, &target.name)?;
                    overrides_retargeted += 1;
                }
                None => warnings.push(format!(
                    "override {} (sub-match {}) still targets '{}'",
                    pointing.id, pointing.sub_match_id, plan.player.name
                )),
            }
        }

        let remaining_observations = observations.count_for_player(original)?;
        if remaining_observations > 0 {
            let message = format!(
                "'{}' still has {remaining_observations} observation(s) after the split",
                plan.player.name
            );
            warn!("{message}");
            warnings.push(message);
        }

        info!(
            "Split '{}' into {} identities ({} overrides moved, {} retargeted)",
            plan.player.name,
            targets.len(),
            overrides_moved,
            overrides_retargeted
        );
        Ok(SplitOutcome {
            player: plan.player.clone(),
            targets,
            overrides_moved,
            overrides_retargeted,
            remaining_observations,
            warnings,
        })
    }

    /// Cluster covering an overridden observation's club and date.
    fn cluster_for_override<'t>(
        &self,
        conn: &Connection,
        plan: &SplitPlan,
        targets: &'t [SplitTarget],
        sub_match_id: SubMatchId,
        original_player_id: PlayerId,
    ) -> Result<Option<&'t SplitTarget>, AppError> {
        let observations = ObservationRepo::new(conn);
        let Some(sub_match) = observations.get_sub_match(sub_match_id)? else {
            return Ok(None);
        };
        let Some(label) = observations.team_label_for(sub_match_id, original_player_id)? else {
            return Ok(None);
        };
        let club = self.detector.club_for(&label);
        Ok(plan
            .clusters
            .iter()
            .zip(targets)
            .find(|(cluster, _)| {
                cluster.club == club
                    && cluster.start <= sub_match.played_at
                    && sub_match.played_at <= cluster.end
            })
            .map(|(_, target)| target))
    }
}
