//! Observation import: raw scraped names in, resolved observations out.
//!
//! Every raw observation is one unit of work. The matcher decides, the
//! import policy below turns the decision into writes, and the resolution
//! log makes a second import of the same data a no-op.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::constants::confidence;
use crate::error::AppError;
use crate::identity::{Decision, IdentityMatcher, MatchContext, MatchDecision};
use crate::store::{
    Database, NewOverride, ObservationRepo, OverrideRepo, PlayerId, PlayerRegistry, PlayerRepo,
    ResolutionRecord, SubMatch, SubMatchId,
};
use crate::summary::BatchSummary;

/// One scraped `(name, team, time)` occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub sub_match_id: SubMatchId,
    pub played_at: NaiveDateTime,
    pub team_number: u8,
    pub team_label: String,
    #[serde(default)]
    pub opponent_label: String,
    pub raw_name: String,
    #[serde(default)]
    pub performance_value: f64,
}

impl RawObservation {
    fn sub_match(&self) -> SubMatch {
        let (team1_label, team2_label) = if self.team_number == 2 {
            (self.opponent_label.clone(), self.team_label.clone())
        } else {
            (self.team_label.clone(), self.opponent_label.clone())
        };
        SubMatch {
            id: self.sub_match_id,
            played_at: self.played_at,
            team1_label,
            team2_label,
        }
    }

    fn unit_label(&self) -> String {
        format!(
            "sub-match {} team {} '{}'",
            self.sub_match_id, self.team_number, self.raw_name
        )
    }
}

/// Producer of raw observations.
pub trait ObservationSource {
    /// Short description used in logs.
    fn describe(&self) -> String;

    fn observations(&mut self) -> Result<Vec<RawObservation>, AppError>;
}

/// Observations read from a JSON array on disk.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ObservationSource for JsonFileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn observations(&mut self) -> Result<Vec<RawObservation>, AppError> {
        let content = std::fs::read_to_string(&self.path)?;
        let observations: Vec<RawObservation> = serde_json::from_str(&content)?;
        debug!(
            "Read {} observations from {}",
            observations.len(),
            self.path.display()
        );
        Ok(observations)
    }
}

/// In-memory observations, handed out once.
#[derive(Debug, Default)]
pub struct VecSource {
    observations: Vec<RawObservation>,
}

impl VecSource {
    pub fn new(observations: Vec<RawObservation>) -> Self {
        Self { observations }
    }
}

impl ObservationSource for VecSource {
    fn describe(&self) -> String {
        format!("{} in-memory observations", self.observations.len())
    }

    fn observations(&mut self) -> Result<Vec<RawObservation>, AppError> {
        Ok(std::mem::take(&mut self.observations))
    }
}

/// What import did with one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportAction {
    /// Stored on the matched Player.
    Accepted,
    /// Stored on the matched Player, medium confidence.
    AcceptedWithWarning,
    /// Stored on a newly created Player.
    Created,
    /// Stored on the incoming spelling with an override to the primary.
    CaseRedirect,
    /// Bare first name stored on itself with an override to a club identity.
    Contextual,
    /// Seen before; nothing written.
    AlreadyResolved,
    /// Unusable input; nothing written.
    Skipped,
}

impl ImportAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportAction::Accepted => "accepted",
            ImportAction::AcceptedWithWarning => "accepted_with_warning",
            ImportAction::Created => "created",
            ImportAction::CaseRedirect => "case_redirect",
            ImportAction::Contextual => "contextual",
            ImportAction::AlreadyResolved => "already_resolved",
            ImportAction::Skipped => "skipped",
        }
    }
}

/// A Player row that either exists or is created on commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlayerRef {
    Existing { id: PlayerId, name: String },
    Create { name: String },
}

impl PlayerRef {
    fn lookup(conn: &Connection, name: &str) -> Result<Self, AppError> {
        Ok(match PlayerRepo::new(conn).find_by_name(name)? {
            Some(player) => PlayerRef::Existing {
                id: player.id,
                name: player.name,
            },
            None => PlayerRef::Create {
                name: name.to_string(),
            },
        })
    }

    pub fn name(&self) -> &str {
        match self {
            PlayerRef::Existing { name, .. } | PlayerRef::Create { name } => name,
        }
    }

    /// Returns `(id, name, created)`.
    fn materialize(&self, conn: &Connection) -> Result<(PlayerId, String, bool), AppError> {
        match self {
            PlayerRef::Existing { id, name } => Ok((*id, name.clone(), false)),
            PlayerRef::Create { name } => {
                let players = PlayerRepo::new(conn);
                let existed = players.find_by_name(name)?.is_some();
                let id = players.get_or_create(name)?;
                Ok((id, name.clone(), !existed))
            }
        }
    }
}

/// The writes one observation needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportPlan {
    pub raw_name: String,
    pub name: String,
    pub club: Option<String>,
    pub decision: MatchDecision,
    pub action: ImportAction,
    /// Player the observation row is stored on.
    pub holder: Option<PlayerRef>,
    /// Player an override redirects the observation to.
    pub redirect: Option<PlayerRef>,
    pub override_confidence: u8,
    pub warning: Option<String>,
}

/// Result of one observation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedObservation {
    pub sub_match_id: SubMatchId,
    pub team_number: u8,
    pub plan: ImportPlan,
    pub observation_id: Option<i64>,
    pub player_id: Option<PlayerId>,
    pub effective_player: Option<String>,
}

/// Index changes to push once a unit has committed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum IndexUpdate {
    Player {
        id: PlayerId,
        name: String,
    },
    FirstNameUse {
        bare_name: String,
        target_id: PlayerId,
        target_name: String,
        club: String,
    },
}

/// Drives an [`ObservationSource`] through the matcher into the store.
pub struct ImportJob<'m> {
    matcher: &'m mut IdentityMatcher,
    dry_run: bool,
}

impl<'m> ImportJob<'m> {
    pub fn new(matcher: &'m mut IdentityMatcher, dry_run: bool) -> Self {
        Self { matcher, dry_run }
    }

    /// Decides how to store one observation without writing anything.
    pub fn plan(&self, conn: &Connection, raw: &RawObservation) -> Result<ImportPlan, AppError> {
        let ctx = self.matcher.context(&raw.raw_name, Some(&raw.team_label));
        let decision = self.matcher.resolve_context(conn, &ctx)?;
        if ctx.name.is_empty() {
            return Ok(ImportPlan {
                raw_name: raw.raw_name.clone(),
                name: ctx.name,
                club: ctx.club,
                decision,
                action: ImportAction::Skipped,
                holder: None,
                redirect: None,
                override_confidence: 0,
                warning: Some("empty player name".to_string()),
            });
        }
        apply_policy(conn, ctx, decision)
    }

    /// Imports one observation as its own unit of work.
    #[instrument(skip(self, db, raw), fields(sub_match = raw.sub_match_id, name = %raw.raw_name))]
    pub fn import_one(
        &mut self,
        db: &mut Database,
        raw: &RawObservation,
    ) -> Result<ImportedObservation, AppError> {
        if self.dry_run {
            return self.preview(db.conn(), raw);
        }

        let label = raw.unit_label();
        let this = &*self;
        let (imported, updates) = db.unit_of_work(&label, |tx| this.commit(tx, raw))?;
        let index = self.matcher.index_mut();
        for update in updates {
            match update {
                IndexUpdate::Player { id, name } => index.record_player(id, &name),
                IndexUpdate::FirstNameUse {
                    bare_name,
                    target_id,
                    target_name,
                    club,
                } => index.record_first_name_use(&bare_name, target_id, &target_name, &club),
            }
        }
        Ok(imported)
    }

    /// Imports everything `source` yields, one unit per observation.
    pub fn run(
        &mut self,
        db: &mut Database,
        source: &mut dyn ObservationSource,
    ) -> Result<BatchSummary, AppError> {
        let observations = source.observations()?;
        info!(
            "Importing {} observations from {}",
            observations.len(),
            source.describe()
        );

        let mut summary = BatchSummary::new("import", self.dry_run);
        for raw in &observations {
            match self.import_one(db, raw) {
                Ok(imported) => {
                    let plan = &imported.plan;
                    match plan.action {
                        ImportAction::AlreadyResolved => summary.record_skipped("already_resolved"),
                        ImportAction::Skipped => summary.record_skipped("skipped"),
                        _ => summary.record(plan.decision.decision.as_str()),
                    }
                    if let Some(warning) = &plan.warning {
                        summary.warn(format!("{}: {warning}", raw.unit_label()));
                    }
                }
                Err(err) => summary.record_error(raw.unit_label(), &err),
            }
        }

        info!(
            "Import finished: {} ok, {} skipped, {} failed",
            summary.succeeded, summary.skipped, summary.failed
        );
        Ok(summary)
    }

    fn already_resolved(
        conn: &Connection,
        raw: &RawObservation,
    ) -> Result<Option<ImportedObservation>, AppError> {
        let Some(record) = ObservationRepo::new(conn).find_resolution(
            raw.sub_match_id,
            raw.team_number,
            &raw.raw_name,
        )?
        else {
            return Ok(None);
        };
        let decision = MatchDecision {
            decision: record.decision.parse().unwrap_or(Decision::CreateNew),
            target_player_id: None,
            target_name: String::new(),
            confidence: record.confidence,
            rationale: record.rationale,
        };
        Ok(Some(ImportedObservation {
            sub_match_id: raw.sub_match_id,
            team_number: raw.team_number,
            plan: ImportPlan {
                raw_name: raw.raw_name.clone(),
                name: String::new(),
                club: None,
                decision,
                action: ImportAction::AlreadyResolved,
                holder: None,
                redirect: None,
                override_confidence: 0,
                warning: None,
            },
            observation_id: record.observation_id,
            player_id: None,
            effective_player: None,
        }))
    }

    fn preview(&self, conn: &Connection, raw: &RawObservation) -> Result<ImportedObservation, AppError> {
        if let Some(done) = Self::already_resolved(conn, raw)? {
            return Ok(done);
        }
        let plan = self.plan(conn, raw)?;
        let player_id = match &plan.holder {
            Some(PlayerRef::Existing { id, .. }) => Some(*id),
            _ => None,
        };
        let effective_player = plan
            .redirect
            .as_ref()
            .or(plan.holder.as_ref())
            .map(|player| player.name().to_string());
        Ok(ImportedObservation {
            sub_match_id: raw.sub_match_id,
            team_number: raw.team_number,
            plan,
            observation_id: None,
            player_id,
            effective_player,
        })
    }

    fn commit(
        &self,
        conn: &Connection,
        raw: &RawObservation,
    ) -> Result<(ImportedObservation, Vec<IndexUpdate>), AppError> {
        if let Some(done) = Self::already_resolved(conn, raw)? {
            return Ok((done, Vec::new()));
        }

        let observations = ObservationRepo::new(conn);
        let plan = self.plan(conn, raw)?;
        let mut updates = Vec::new();

        let Some(holder) = &plan.holder else {
            observations.log_resolution(&ResolutionRecord {
                sub_match_id: raw.sub_match_id,
                team_number: raw.team_number,
                raw_name: raw.raw_name.clone(),
                observation_id: None,
                decision: plan.decision.decision.as_str().to_string(),
                confidence: plan.decision.confidence,
                rationale: plan.decision.rationale.clone(),
            })?;
            return Ok((
                ImportedObservation {
                    sub_match_id: raw.sub_match_id,
                    team_number: raw.team_number,
                    plan,
                    observation_id: None,
                    player_id: None,
                    effective_player: None,
                },
                updates,
            ));
        };

        observations.upsert_sub_match(&raw.sub_match())?;
        if !raw.team_label.is_empty() {
            observations.fill_team_label(raw.sub_match_id, raw.team_number, &raw.team_label)?;
        }

        let (player_id, player_name, created) = holder.materialize(conn)?;
        if created {
            updates.push(IndexUpdate::Player {
                id: player_id,
                name: player_name.clone(),
            });
        }
        let (observation_id, _) = observations.insert(
            raw.sub_match_id,
            player_id,
            raw.team_number,
            raw.performance_value,
        )?;

        let mut effective_player = player_name.clone();
        if let Some(redirect) = &plan.redirect {
            let (target_id, target_name, created) = redirect.materialize(conn)?;
            if created {
                updates.push(IndexUpdate::Player {
                    id: target_id,
                    name: target_name.clone(),
                });
            }
            let inserted = OverrideRepo::new(conn).record(&NewOverride {
                sub_match_id: raw.sub_match_id,
                original_player_id: player_id,
                target_player_id: target_id,
                target_name: target_name.clone(),
                confidence: plan.override_confidence,
                reason: plan.decision.decision.as_str().to_string(),
            })?;
            if inserted
                && plan.action == ImportAction::Contextual
                && let Some(club) = &plan.club
            {
                updates.push(IndexUpdate::FirstNameUse {
                    bare_name: player_name.clone(),
                    target_id,
                    target_name: target_name.clone(),
                    club: club.clone(),
                });
            }
            effective_player = target_name;
        }

        observations.log_resolution(&ResolutionRecord {
            sub_match_id: raw.sub_match_id,
            team_number: raw.team_number,
            raw_name: raw.raw_name.clone(),
            observation_id: Some(observation_id),
            decision: plan.decision.decision.as_str().to_string(),
            confidence: plan.decision.confidence,
            rationale: plan.decision.rationale.clone(),
        })?;

        debug!(
            "'{}' -> '{}' ({}, {})",
            raw.raw_name,
            effective_player,
            plan.decision.decision,
            plan.action.as_str()
        );
        Ok((
            ImportedObservation {
                sub_match_id: raw.sub_match_id,
                team_number: raw.team_number,
                plan,
                observation_id: Some(observation_id),
                player_id: Some(player_id),
                effective_player: Some(effective_player),
            },
            updates,
        ))
    }
}

/// Turns a matcher decision into storage targets.
///
/// * Bare first names seen with a club and decided below the high tier, or
///   via a first-name or club-variant rule, stay on the bare Player with an
///   override to the club identity, so first-name evidence keeps building.
/// * Case variations keep the incoming spelling when that row exists and
///   redirect to the primary spelling.
/// * Other decisions at or above the medium tier are accepted; the rest
///   create the normalized name.
fn apply_policy(
    conn: &Connection,
    ctx: MatchContext,
    decision: MatchDecision,
) -> Result<ImportPlan, AppError> {
    let mut plan = ImportPlan {
        raw_name: ctx.raw_name.clone(),
        name: ctx.name.clone(),
        club: ctx.club.clone(),
        decision,
        action: ImportAction::Created,
        holder: None,
        redirect: None,
        override_confidence: 0,
        warning: None,
    };
    let decision = &plan.decision;

    if ctx.is_bare
        && let Some(club) = &ctx.club
        && (matches!(
            decision.decision,
            Decision::FirstNameContext | Decision::ClubVariant | Decision::CreateClubVariant
        ) || !decision.is_high_confidence())
    {
        let (redirect, override_confidence) = match (decision.decision, decision.target_player_id) {
            (Decision::FirstNameContext | Decision::ClubVariant, Some(id)) => (
                PlayerRef::Existing {
                    id,
                    name: decision.target_name.clone(),
                },
                decision.confidence,
            ),
            (Decision::CreateClubVariant, _) => (
                PlayerRef::lookup(conn, &decision.target_name)?,
                confidence::CONTEXTUAL_OVERRIDE,
            ),
            _ => (
                PlayerRef::lookup(conn, &format!("{} ({club})", ctx.name))?,
                confidence::CONTEXTUAL_OVERRIDE,
            ),
        };
        plan.holder = Some(PlayerRef::lookup(conn, &ctx.name)?);
        plan.redirect = Some(redirect);
        plan.override_confidence = override_confidence;
        plan.action = ImportAction::Contextual;
        return Ok(plan);
    }

    match (decision.decision, decision.target_player_id) {
        (Decision::CaseVariation, Some(primary_id)) => {
            let primary = PlayerRef::Existing {
                id: primary_id,
                name: decision.target_name.clone(),
            };
            match PlayerRepo::new(conn).find_by_name(&ctx.name)? {
                Some(incoming) if incoming.id != primary_id => {
                    plan.holder = Some(PlayerRef::Existing {
                        id: incoming.id,
                        name: incoming.name,
                    });
                    plan.redirect = Some(primary);
                    plan.override_confidence = decision.confidence;
                    plan.action = ImportAction::CaseRedirect;
                }
                _ => {
                    plan.holder = Some(primary);
                    plan.action = ImportAction::Accepted;
                }
            }
        }
        (_, Some(target_id)) if decision.confidence >= confidence::MEDIUM_TIER => {
            if decision.is_medium_confidence() {
                plan.warning = Some(format!(
                    "accepted '{}' as '{}' at {}% ({})",
                    ctx.name, decision.target_name, decision.confidence, decision.decision
                ));
                plan.action = ImportAction::AcceptedWithWarning;
            } else {
                plan.action = ImportAction::Accepted;
            }
            plan.holder = Some(PlayerRef::Existing {
                id: target_id,
                name: decision.target_name.clone(),
            });
        }
        (Decision::CreateClubVariant, None) => {
            plan.holder = Some(PlayerRef::lookup(conn, &decision.target_name)?);
        }
        _ => {
            plan.holder = Some(PlayerRef::lookup(conn, &ctx.name)?);
        }
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{ClubContextResolver, NameNormalizer};
    use chrono::NaiveDate;

    fn raw(sub_match_id: SubMatchId, day: u32, team: &str, name: &str) -> RawObservation {
        RawObservation {
            sub_match_id,
            played_at: NaiveDate::from_ymd_opt(2024, 2, day)
                .unwrap()
                .and_hms_opt(19, 30, 0)
                .unwrap(),
            team_number: 1,
            team_label: team.to_string(),
            opponent_label: "Opponents".to_string(),
            raw_name: name.to_string(),
            performance_value: 42.0,
        }
    }

    fn setup() -> (Database, IdentityMatcher) {
        let db = Database::open_in_memory().unwrap();
        let matcher = IdentityMatcher::build(
            db.conn(),
            NameNormalizer::new(),
            ClubContextResolver::new(),
        )
        .unwrap();
        (db, matcher)
    }

    #[test]
    fn test_case_spellings_resolve_to_one_player() {
        let (mut db, mut matcher) = setup();
        let mut source = VecSource::new(vec![
            raw(1, 1, "AIK SL6", "mikael granath"),
            raw(2, 8, "AIK SL6", "Mikael Granath"),
            raw(3, 15, "AIK SL6", "MIKAEL GRANATH"),
        ]);
        let summary = ImportJob::new(&mut matcher, false)
            .run(&mut db, &mut source)
            .unwrap();

        assert_eq!(summary.succeeded, 3);
        let players = PlayerRepo::new(db.conn()).all().unwrap();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].name, "Mikael Granath");
        assert_eq!(
            ObservationRepo::new(db.conn())
                .count_for_player(players[0].id)
                .unwrap(),
            3
        );
    }

    #[test]
    fn test_reimport_is_a_no_op() {
        let (mut db, mut matcher) = setup();
        let observations = vec![raw(1, 1, "SSDC", "Anna Berg"), raw(2, 2, "SSDC", "Mats")];

        let first = ImportJob::new(&mut matcher, false)
            .run(&mut db, &mut VecSource::new(observations.clone()))
            .unwrap();
        assert_eq!(first.succeeded, 2);
        let players_after_first = PlayerRepo::new(db.conn()).all().unwrap();

        let second = ImportJob::new(&mut matcher, false)
            .run(&mut db, &mut VecSource::new(observations))
            .unwrap();
        assert_eq!(second.succeeded, 0);
        assert_eq!(second.count("already_resolved"), 2);
        assert_eq!(PlayerRepo::new(db.conn()).all().unwrap(), players_after_first);
    }

    #[test]
    fn test_bare_name_creates_club_identity_per_club() {
        let (mut db, mut matcher) = setup();
        let mut job = ImportJob::new(&mut matcher, false);

        let first = job.import_one(&mut db, &raw(1, 1, "SSDC SL3", "Mats")).unwrap();
        assert_eq!(first.plan.action, ImportAction::Contextual);
        assert_eq!(first.effective_player.as_deref(), Some("Mats (SSDC)"));

        let again = job.import_one(&mut db, &raw(2, 8, "SSDC SL3", "Mats")).unwrap();
        assert_eq!(again.plan.decision.decision, Decision::FirstNameContext);
        assert_eq!(again.effective_player.as_deref(), Some("Mats (SSDC)"));

        let other_club = job
            .import_one(&mut db, &raw(3, 9, "Dartanjang", "Mats"))
            .unwrap();
        assert_ne!(other_club.effective_player.as_deref(), Some("Mats (SSDC)"));
        assert_eq!(other_club.effective_player.as_deref(), Some("Mats (Dartanjang)"));

        let bare = PlayerRepo::new(db.conn()).require_by_name("Mats").unwrap();
        assert_eq!(OverrideRepo::new(db.conn()).list_for_original(bare.id).unwrap().len(), 3);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let (mut db, mut matcher) = setup();
        let summary = ImportJob::new(&mut matcher, true)
            .run(&mut db, &mut VecSource::new(vec![raw(1, 1, "AIK", "Johan Ek")]))
            .unwrap();
        assert!(summary.dry_run);
        assert_eq!(summary.count("create_new"), 1);
        assert!(PlayerRepo::new(db.conn()).all().unwrap().is_empty());
    }

    #[test]
    fn test_empty_name_is_skipped_with_warning() {
        let (mut db, mut matcher) = setup();
        let summary = ImportJob::new(&mut matcher, false)
            .run(&mut db, &mut VecSource::new(vec![raw(1, 1, "AIK", "  \u{200b} ")]))
            .unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.warnings.len(), 1);
        assert!(!summary.has_failures());

        let logged = ObservationRepo::new(db.conn())
            .find_resolution(1, 1, "  \u{200b} ")
            .unwrap()
            .unwrap();
        assert_eq!(logged.observation_id, None);
        assert_eq!(logged.rationale, "empty name");
    }

    #[test]
    fn test_json_source_reads_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("observations.json");
        std::fs::write(
            &path,
            r#"[{"sub_match_id": 7, "played_at": "2024-02-01T19:30:00",
                 "team_number": 2, "team_label": "Oilers", "raw_name": "Anna-Karin Ek"}]"#,
        )
        .unwrap();

        let observations = JsonFileSource::new(&path).observations().unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].opponent_label, "");
        assert_eq!(observations[0].sub_match().team2_label, "Oilers");
    }
}
