//! Handlers for every CLI subcommand.
//!
//! Handlers write their results to an injected writer, as text or as JSON
//! with `--json`. Batch handlers print a [`BatchSummary`] and turn failed
//! units into [`AppError::BatchFailed`] so the process exits non-zero.

use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use crate::cli::{
    Cli, Command, ConfigCommand, ConsolidateCommand, MappingsCommand, OverlapCommand,
    OverridesCommand, SplitCommand,
};
use crate::config::Config;
use crate::error::AppError;
use crate::identity::consolidate::{batches, disjoint_pairs, select_approved};
use crate::identity::overlap::ClubActivity;
use crate::identity::{
    CaseGroup, CaseOutcome, DuplicateConsolidator, IdentityMatcher, IdentitySplitter,
    MappingSuggestion, MatchDecision, MergeOutcome, OverlapDetector, PlayerOverlapReport,
    SplitOutcome, SplitPlan, TypoPair,
};
use crate::import::{ImportJob, JsonFileSource};
use crate::store::{
    ApplyOutcome, Database, GlobalMapping, GlobalMappingRepo, MappingStatus, NewOverride,
    ObservationOverride, ObservationRepo, OverrideRepo, Player, PlayerRepo, VerifyIssue,
};
use crate::summary::BatchSummary;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Writes results either as pretty JSON or as rendered text.
struct Output<'w> {
    out: &'w mut dyn Write,
    json: bool,
}

impl Output<'_> {
    fn emit<T, F>(&mut self, value: &T, render: F) -> Result<(), AppError>
    where
        T: Serialize + ?Sized,
        F: FnOnce(&T) -> String,
    {
        if self.json {
            serde_json::to_writer_pretty(&mut *self.out, value)?;
            writeln!(self.out)?;
        } else {
            write!(self.out, "{}", render(value))?;
        }
        Ok(())
    }

    /// Prints the items of a batch run followed by its summary.
    fn finish<T, F>(&mut self, items: &[T], summary: BatchSummary, render: F) -> Result<(), AppError>
    where
        T: Serialize,
        F: Fn(&T) -> String,
    {
        let report = BatchReport {
            items,
            summary: &summary,
        };
        self.emit(&report, |report| {
            let mut text = String::new();
            for item in report.items {
                text.push_str(&render(item));
            }
            if !report.items.is_empty() {
                text.push('\n');
            }
            text.push_str(&report.summary.to_string());
            text
        })?;
        summary.into_result().map(|_| ())
    }
}

#[derive(Serialize)]
struct BatchReport<'a, T: Serialize> {
    items: &'a [T],
    summary: &'a BatchSummary,
}

/// Runs the parsed command line against `config`, printing to `out`.
///
/// # Errors
/// Propagates the first error of single-target commands. Batch commands
/// return `AppError::BatchFailed` after printing their summary when any
/// unit failed.
pub async fn run(cli: &Cli, config: &Config, out: &mut dyn Write) -> Result<(), AppError> {
    let mut output = Output {
        out,
        json: cli.json,
    };

    if let Command::Config { action } = &cli.command {
        return handle_config(action, config, &mut output).await;
    }

    let mut db = open_database(cli, config)?;
    match &cli.command {
        Command::Import { file, dry_run } => {
            handle_import(&mut db, config, file, *dry_run, &mut output)
        }
        Command::Match { name, team } => {
            handle_match(&db, config, name, team.as_deref(), &mut output)
        }
        Command::Overlap { action } => handle_overlap(&db, config, action, &mut output),
        Command::Split { action } => handle_split(&mut db, config, action, &mut output),
        Command::Consolidate { action } => {
            handle_consolidate(&mut db, config, action, &mut output)
        }
        Command::Mappings { action } => handle_mappings(&mut db, config, action, &mut output),
        Command::Overrides { action } => handle_overrides(&mut db, action, &mut output),
        Command::Config { .. } => Ok(()),
    }
}

/// Opens the identity store, `--db` taking precedence over the config.
pub fn open_database(cli: &Cli, config: &Config) -> Result<Database, AppError> {
    let path = cli.db.clone().unwrap_or_else(|| config.database_path());
    Ok(Database::open(&path, config.busy_timeout())?.with_max_attempts(config.max_attempts))
}

fn build_matcher(conn: &Connection, config: &Config) -> Result<IdentityMatcher, AppError> {
    let mut matcher = IdentityMatcher::new(config.normalizer(), config.club_resolver())
        .with_club_cache_size(config.matcher.club_cache_size);
    matcher.refresh(conn)?;
    Ok(matcher)
}

fn detector(config: &Config) -> OverlapDetector {
    OverlapDetector::new(config.club_resolver(), config.overlap_settings())
}

// Import and match

fn handle_import(
    db: &mut Database,
    config: &Config,
    file: &Path,
    dry_run: bool,
    output: &mut Output<'_>,
) -> Result<(), AppError> {
    let mut matcher = build_matcher(db.conn(), config)?;
    let mut source = JsonFileSource::new(file);
    let summary = ImportJob::new(&mut matcher, dry_run).run(db, &mut source)?;
    output.emit(&summary, |summary| summary.to_string())?;
    summary.into_result().map(|_| ())
}

#[derive(Serialize)]
struct MatchReport<'a> {
    raw_name: &'a str,
    team_label: Option<&'a str>,
    normalized_name: String,
    club: Option<String>,
    #[serde(flatten)]
    decision: MatchDecision,
}

fn handle_match(
    db: &Database,
    config: &Config,
    name: &str,
    team: Option<&str>,
    output: &mut Output<'_>,
) -> Result<(), AppError> {
    let matcher = build_matcher(db.conn(), config)?;
    let ctx = matcher.context(name, team);
    let decision = matcher.resolve_context(db.conn(), &ctx)?;
    let report = MatchReport {
        raw_name: name,
        team_label: team,
        normalized_name: ctx.name,
        club: ctx.club,
        decision,
    };
    output.emit(&report, render_match)
}

fn render_match(report: &MatchReport<'_>) -> String {
    let decision = &report.decision;
    let mut text = format!(
        "'{}' -> '{}'",
        report.normalized_name, decision.target_name
    );
    if let Some(id) = decision.target_player_id {
        let _ = write!(text, " (#{id})");
    } else {
        text.push_str(" (new player)");
    }
    let _ = writeln!(text);
    if let Some(club) = &report.club {
        let _ = writeln!(text, "  club:       {club}");
    }
    let _ = writeln!(text, "  decision:   {}", decision.decision);
    let _ = writeln!(text, "  confidence: {}%", decision.confidence);
    let _ = writeln!(text, "  rationale:  {}", decision.rationale);
    text
}

// Overlap and split

fn handle_overlap(
    db: &Database,
    config: &Config,
    action: &OverlapCommand,
    output: &mut Output<'_>,
) -> Result<(), AppError> {
    let detector = detector(config);
    match action {
        OverlapCommand::Analyze { player } => {
            let report = detector.analyze_by_name(db.conn(), player)?;
            output.emit(&report, render_overlap_report)
        }
        OverlapCommand::Batch { min_matches, limit } => {
            let min_matches = min_matches.unwrap_or(config.overlap.scan_min_total_matches);
            let reports = detector.scan(db.conn(), min_matches, *limit)?;
            output.emit(&reports, |reports| {
                if reports.is_empty() {
                    return "No overlapping identities found.\n".to_string();
                }
                let mut text = format!("{} overlapping identities\n\n", reports.len());
                for report in reports {
                    text.push_str(&render_overlap_report(report));
                    text.push('\n');
                }
                text
            })
        }
        OverlapCommand::Timeline { player } => {
            let report = detector.analyze_by_name(db.conn(), player)?;
            output.emit(&report.activities, |activities| {
                render_timeline(&report.player, activities)
            })
        }
    }
}

fn render_overlap_report(report: &PlayerOverlapReport) -> String {
    let mut text = format!(
        "{} (#{}): {} matches across {} clubs\n",
        report.player.name,
        report.player.id,
        report.total_matches,
        report.activities.len()
    );
    for activity in &report.activities {
        let span = match (activity.first_match(), activity.last_match()) {
            (Some(first), Some(last)) => format!(
                "{} .. {}",
                first.format(DATE_FORMAT),
                last.format(DATE_FORMAT)
            ),
            _ => "-".to_string(),
        };
        let _ = writeln!(
            text,
            "  {:<28} {:>4} matches  {span}",
            activity.club, activity.matches
        );
    }
    if report.findings.is_empty() {
        text.push_str("  no overlap\n");
    }
    for finding in &report.findings {
        let _ = writeln!(
            text,
            "  OVERLAP {} / {}: {} days ({} .. {})",
            finding.club_a,
            finding.club_b,
            finding.overlap_days,
            finding.overlap_start.format(DATE_FORMAT),
            finding.overlap_end.format(DATE_FORMAT)
        );
    }
    text
}

fn render_timeline(player: &Player, activities: &[ClubActivity]) -> String {
    let mut periods: Vec<_> = activities
        .iter()
        .flat_map(|activity| activity.periods.iter().map(move |p| (&activity.club, p)))
        .collect();
    periods.sort_by(|(club_a, a), (club_b, b)| a.start.cmp(&b.start).then(club_a.cmp(club_b)));

    let mut text = format!("Timeline for {} (#{})\n", player.name, player.id);
    for (club, period) in periods {
        let labels: Vec<&str> = period.team_labels.iter().map(String::as_str).collect();
        let _ = writeln!(
            text,
            "  {} .. {}  {:<28} {:>4} matches  [{}]",
            period.start.format(DATE_FORMAT),
            period.end.format(DATE_FORMAT),
            club,
            period.matches,
            labels.join(", ")
        );
    }
    text
}

fn handle_split(
    db: &mut Database,
    config: &Config,
    action: &SplitCommand,
    output: &mut Output<'_>,
) -> Result<(), AppError> {
    let splitter = IdentitySplitter::new(detector(config));
    match action {
        SplitCommand::Analyze { player } => {
            let player = PlayerRepo::new(db.conn()).require_by_name(player)?;
            let plan = splitter.plan(db.conn(), &player)?;
            output.emit(&plan, render_split_plan)
        }
        SplitCommand::Apply { player, force } => {
            let player = PlayerRepo::new(db.conn()).require_by_name(player)?;
            let plan = splitter.plan(db.conn(), &player)?;
            if !plan.is_needed() || !force {
                return output.emit(&plan, |plan| {
                    let mut text = render_split_plan(plan);
                    if plan.is_needed() {
                        text.push_str("Dry run: pass --force to split.\n");
                    }
                    text
                });
            }
            let label = format!("split {}", player.name);
            let outcome = db.unit_of_work(&label, |tx| {
                let plan = splitter.plan(tx, &player)?;
                splitter.apply(tx, &plan)
            })?;
            output.emit(&outcome, render_split_outcome)
        }
        SplitCommand::Batch {
            min_matches,
            limit,
            force,
        } => {
            let min_matches = min_matches.unwrap_or(config.overlap.scan_min_total_matches);
            let reports = splitter.detector().scan(db.conn(), min_matches, *limit)?;
            let mut summary = BatchSummary::new("split batch", !force);

            if !force {
                let mut plans = Vec::new();
                for report in &reports {
                    match splitter.plan(db.conn(), &report.player) {
                        Ok(plan) => {
                            summary.record("would_split");
                            plans.push(plan);
                        }
                        Err(err) => summary.record_error(&report.player.name, &err),
                    }
                }
                return output.finish(&plans, summary, render_split_plan);
            }

            let mut outcomes: Vec<SplitOutcome> = Vec::new();
            for report in &reports {
                let player = &report.player;
                let result = db.unit_of_work(&format!("split {}", player.name), |tx| {
                    let plan = splitter.plan(tx, player)?;
                    splitter.apply(tx, &plan)
                });
                match result {
                    Ok(outcome) => {
                        summary.record("split");
                        for warning in &outcome.warnings {
                            summary.warn(format!("{}: {warning}", player.name));
                        }
                        outcomes.push(outcome);
                    }
                    Err(err) => summary.record_error(&player.name, &err),
                }
            }
            output.finish(&outcomes, summary, render_split_outcome)
        }
    }
}

fn render_split_plan(plan: &SplitPlan) -> String {
    let mut text = format!("Split plan for {} (#{})\n", plan.player.name, plan.player.id);
    if !plan.is_needed() {
        text.push_str("  no overlap, nothing to split\n");
        return text;
    }
    for finding in &plan.findings {
        let _ = writeln!(
            text,
            "  overlap {} / {}: {} days",
            finding.club_a, finding.club_b, finding.overlap_days
        );
    }
    for cluster in &plan.clusters {
        let existing = match cluster.existing_player_id {
            Some(id) => format!(" (existing #{id})"),
            None => String::new(),
        };
        let _ = writeln!(
            text,
            "  -> {:<36} {:>4} matches  {} .. {}{existing}",
            cluster.new_name,
            cluster.matches,
            cluster.start.format(DATE_FORMAT),
            cluster.end.format(DATE_FORMAT)
        );
    }
    text
}

fn render_split_outcome(outcome: &SplitOutcome) -> String {
    let mut text = format!(
        "Split {} (#{})\n",
        outcome.player.name, outcome.player.id
    );
    for target in &outcome.targets {
        let _ = writeln!(
            text,
            "  -> {} (#{}): {} observations",
            target.name, target.player_id, target.observations_moved
        );
    }
    let _ = writeln!(
        text,
        "  overrides moved {}, retargeted {}, {} observations left on the original",
        outcome.overrides_moved, outcome.overrides_retargeted, outcome.remaining_observations
    );
    for warning in &outcome.warnings {
        let _ = writeln!(text, "  warning: {warning}");
    }
    text
}

// Consolidation

#[derive(Serialize)]
struct TypoBatch<'a> {
    batch: usize,
    batches: usize,
    items: Vec<NumberedPair<'a>>,
}

#[derive(Serialize)]
struct NumberedPair<'a> {
    position: usize,
    #[serde(flatten)]
    pair: &'a TypoPair,
}

fn handle_consolidate(
    db: &mut Database,
    config: &Config,
    action: &ConsolidateCommand,
    output: &mut Output<'_>,
) -> Result<(), AppError> {
    let consolidator = DuplicateConsolidator::new(config.normalizer());
    match action {
        ConsolidateCommand::Case { force } => {
            let groups = consolidator.case_groups(db.conn())?;
            let mut summary = BatchSummary::new("case consolidation", !force);
            if !force {
                groups.iter().for_each(|_| summary.record("would_merge"));
                return output.finish(&groups, summary, render_case_group);
            }

            let mut outcomes: Vec<CaseOutcome> = Vec::new();
            for group in &groups {
                let label = format!("case group '{}'", group.canonical_name);
                match db.unit_of_work(&label, |tx| consolidator.apply_case_group(tx, group)) {
                    Ok(outcome) => {
                        summary.record("merged");
                        outcomes.push(outcome);
                    }
                    Err(err) => summary.record_error(&label, &err),
                }
            }
            output.finish(&outcomes, summary, render_case_outcome)
        }
        ConsolidateCommand::Typo {
            batch,
            approve,
            force,
        } => {
            let pairs = consolidator.typo_pairs(db.conn())?;
            let chunks = batches(&pairs, config.consolidation.typo_batch_size);
            if chunks.is_empty() {
                let empty: Vec<TypoPair> = Vec::new();
                return output.emit(&empty, |_| "No typo candidates found.\n".to_string());
            }
            let current = batch
                .checked_sub(1)
                .and_then(|index| chunks.get(index))
                .ok_or_else(|| {
                    AppError::validation(format!(
                        "batch {batch} does not exist, there are {} batches",
                        chunks.len()
                    ))
                })?;

            if approve.is_empty() {
                let view = TypoBatch {
                    batch: *batch,
                    batches: chunks.len(),
                    items: current
                        .iter()
                        .enumerate()
                        .map(|(i, pair)| NumberedPair {
                            position: i + 1,
                            pair,
                        })
                        .collect(),
                };
                return output.emit(&view, render_typo_batch);
            }

            let (selected, held_back) = disjoint_pairs(select_approved(current, approve)?);
            let mut summary = BatchSummary::new("typo consolidation", !force);
            for pair in held_back {
                summary.record_skipped("merged_earlier_in_batch");
                summary.warn(format!(
                    "'{}' -> '{}' touches a name merged earlier in this batch; rescan to review it",
                    pair.loser.player.name, pair.survivor.player.name
                ));
            }
            if !force {
                selected.iter().for_each(|_| summary.record("would_merge"));
                let items: Vec<&TypoPair> = selected;
                return output.finish(&items, summary, |pair| render_typo_pair(pair));
            }

            let mut outcomes: Vec<MergeOutcome> = Vec::new();
            for pair in selected {
                let label = format!(
                    "merge '{}' into '{}'",
                    pair.loser.player.name, pair.survivor.player.name
                );
                match db.unit_of_work(&label, |tx| consolidator.apply_typo_pair(tx, pair)) {
                    Ok(outcome) => {
                        summary.record("merged");
                        outcomes.push(outcome);
                    }
                    Err(err) => summary.record_error(&label, &err),
                }
            }
            output.finish(&outcomes, summary, render_merge)
        }
    }
}

fn render_case_group(group: &CaseGroup) -> String {
    let losers: Vec<String> = group
        .losers
        .iter()
        .map(|l| format!("'{}' ({})", l.player.name, l.observations))
        .collect();
    let rename = if group.needs_rename() {
        format!(", rename to '{}'", group.canonical_name)
    } else {
        String::new()
    };
    format!(
        "'{}' (#{}, {}) <- {}{rename}\n",
        group.survivor.player.name,
        group.survivor.player.id,
        group.survivor.observations,
        losers.join(", ")
    )
}

fn render_case_outcome(outcome: &CaseOutcome) -> String {
    let moved: usize = outcome.merges.iter().map(|m| m.observations_moved).sum();
    let renamed = if outcome.renamed { ", renamed" } else { "" };
    format!(
        "'{}' (#{}): merged {} players, {moved} observations moved{renamed}\n",
        outcome.canonical_name,
        outcome.survivor_id,
        outcome.merges.len()
    )
}

fn render_typo_pair(pair: &TypoPair) -> String {
    format!(
        "'{}' ({}) -> '{}' ({}), part {} differs by {}\n",
        pair.loser.player.name,
        pair.loser.observations,
        pair.survivor.player.name,
        pair.survivor.observations,
        pair.differing_part + 1,
        pair.distance
    )
}

fn render_typo_batch(view: &TypoBatch<'_>) -> String {
    let mut text = format!("Batch {} of {}\n", view.batch, view.batches);
    for item in &view.items {
        let _ = write!(text, "  {:>3}. {}", item.position, render_typo_pair(item.pair));
    }
    text.push_str("Approve with --approve 1,2,... and apply with --force.\n");
    text
}

fn render_merge(outcome: &MergeOutcome) -> String {
    format!(
        "'{}' (#{}) -> #{}: {} observations moved, {} dropped, {} overrides updated, {} mappings updated\n",
        outcome.loser_name,
        outcome.loser_id,
        outcome.survivor_id,
        outcome.observations_moved,
        outcome.observations_dropped,
        outcome.overrides_updated,
        outcome.mappings_updated
    )
}

// Global mappings

#[derive(Serialize)]
struct CleanupReport {
    dry_run: bool,
    players: Vec<Player>,
}

fn handle_mappings(
    db: &mut Database,
    config: &Config,
    action: &MappingsCommand,
    output: &mut Output<'_>,
) -> Result<(), AppError> {
    match action {
        MappingsCommand::Suggest {
            source,
            target,
            mapping_type,
            confidence,
            notes,
        } => {
            let id = db.unit_of_work("suggest mapping", |tx| {
                GlobalMappingRepo::new(tx).suggest(
                    source,
                    target,
                    mapping_type,
                    *confidence,
                    notes.as_deref(),
                )
            })?;
            let mapping = GlobalMappingRepo::new(db.conn()).get(id)?;
            output.emit(&mapping, render_mapping)
        }
        MappingsCommand::Generate {
            team,
            min_confidence,
            force,
        } => {
            let min_confidence =
                min_confidence.unwrap_or(config.consolidation.suggestion_min_confidence);
            let suggestions = DuplicateConsolidator::new(config.normalizer())
                .roster_suggestions(db.conn(), team.as_deref(), min_confidence)?;
            let mut summary = BatchSummary::new("mapping generation", !force);
            if !force {
                suggestions.iter().for_each(|_| summary.record("would_suggest"));
                return output.finish(&suggestions, summary, render_suggestion);
            }

            let mut created: Vec<&MappingSuggestion> = Vec::new();
            for suggestion in &suggestions {
                let label = format!(
                    "suggest '{}' -> '{}'",
                    suggestion.source_name, suggestion.target_name
                );
                let notes = format!("{} in {}", suggestion.kind.as_str(), suggestion.team_label);
                let result = db.unit_of_work(&label, |tx| {
                    GlobalMappingRepo::new(tx).suggest(
                        &suggestion.source_name,
                        &suggestion.target_name,
                        suggestion.kind.as_str(),
                        suggestion.confidence,
                        Some(notes.as_str()),
                    )
                });
                match result {
                    Ok(_) => {
                        summary.record("suggested");
                        created.push(suggestion);
                    }
                    Err(err) => summary.record_error(&label, &err),
                }
            }
            output.finish(&created, summary, |s| render_suggestion(s))
        }
        MappingsCommand::List { status, limit } => {
            let status = parse_status(status.as_deref())?;
            let mappings = GlobalMappingRepo::new(db.conn()).list(status, *limit)?;
            output.emit(&mappings, |mappings| {
                if mappings.is_empty() {
                    return "No mappings.\n".to_string();
                }
                mappings.iter().map(render_mapping).collect()
            })
        }
        MappingsCommand::Approve { id, by } => {
            db.unit_of_work(&format!("approve mapping {id}"), |tx| {
                GlobalMappingRepo::new(tx).approve(*id, by.as_deref())
            })?;
            let mapping = GlobalMappingRepo::new(db.conn()).get(*id)?;
            output.emit(&mapping, render_mapping)
        }
        MappingsCommand::Reject { id, note } => {
            db.unit_of_work(&format!("reject mapping {id}"), |tx| {
                GlobalMappingRepo::new(tx).reject(*id, note.as_deref())
            })?;
            let mapping = GlobalMappingRepo::new(db.conn()).get(*id)?;
            output.emit(&mapping, render_mapping)
        }
        MappingsCommand::Apply { id, all, force } => {
            let ids: Vec<i64> = match id {
                Some(id) if !all => {
                    let outcome = apply_mapping(db, *id, *force)?;
                    return output.emit(&outcome, render_apply);
                }
                _ => GlobalMappingRepo::new(db.conn())
                    .pending_applications()?
                    .into_iter()
                    .map(|mapping| mapping.id)
                    .collect(),
            };

            let mut summary = BatchSummary::new("mapping application", !force);
            let mut outcomes: Vec<ApplyOutcome> = Vec::new();
            for id in ids {
                match apply_mapping(db, id, *force) {
                    Ok(outcome) => {
                        summary.record(if *force { "applied" } else { "would_apply" });
                        outcomes.push(outcome);
                    }
                    Err(err) => summary.record_error(format!("mapping {id}"), &err),
                }
            }
            output.finish(&outcomes, summary, render_apply)
        }
        MappingsCommand::Export { path, status } => {
            let status = parse_status(status.as_deref())?;
            let written = GlobalMappingRepo::new(db.conn()).export(path, status)?;
            info!("Exported {written} mappings to {}", path.display());
            #[derive(Serialize)]
            struct Exported<'a> {
                path: &'a Path,
                mappings: usize,
            }
            output.emit(
                &Exported {
                    path,
                    mappings: written,
                },
                |e| format!("Wrote {} mappings to {}\n", e.mappings, e.path.display()),
            )
        }
        MappingsCommand::Verify => {
            let issues = GlobalMappingRepo::new(db.conn()).verify()?;
            output.emit(&issues, |issues| render_verify(issues))
        }
        MappingsCommand::Cleanup { all, force } => {
            let players = if *force {
                db.unit_of_work("cleanup unused players", |tx| {
                    PlayerRepo::new(tx).cleanup_unused(*all, false)
                })?
            } else {
                PlayerRepo::new(db.conn()).cleanup_unused(*all, true)?
            };
            let report = CleanupReport {
                dry_run: !force,
                players,
            };
            output.emit(&report, |report| {
                let verb = if report.dry_run { "Would delete" } else { "Deleted" };
                let mut text = format!("{verb} {} unused players\n", report.players.len());
                for player in &report.players {
                    let _ = writeln!(text, "  {} (#{})", player.name, player.id);
                }
                text
            })
        }
    }
}

fn parse_status(status: Option<&str>) -> Result<Option<MappingStatus>, AppError> {
    status.map(str::parse::<MappingStatus>).transpose()
}

/// Plans one mapping read-only, or applies it in its own unit of work.
fn apply_mapping(db: &mut Database, id: i64, force: bool) -> Result<ApplyOutcome, AppError> {
    if !force {
        return GlobalMappingRepo::new(db.conn()).plan_apply(id);
    }
    db.unit_of_work(&format!("apply mapping {id}"), |tx| {
        GlobalMappingRepo::new(tx).apply(id)
    })
}

fn render_mapping(mapping: &GlobalMapping) -> String {
    let applied = match mapping.applied_at {
        Some(at) => format!(", applied {}", at.format(DATE_FORMAT)),
        None => String::new(),
    };
    format!(
        "#{:<5} {:<10} '{}' -> '{}' as '{}' ({}, {}%){applied}\n",
        mapping.id,
        mapping.status,
        mapping.source_name,
        mapping.target_name,
        mapping.canonical_name,
        mapping.mapping_type,
        mapping.confidence
    )
}

fn render_suggestion(suggestion: &MappingSuggestion) -> String {
    format!(
        "{:<24} '{}' -> '{}' ({}, {}%)\n",
        suggestion.team_label,
        suggestion.source_name,
        suggestion.target_name,
        suggestion.kind.as_str(),
        suggestion.confidence
    )
}

fn render_apply(outcome: &ApplyOutcome) -> String {
    let verb = if outcome.dry_run { "Would apply" } else { "Applied" };
    let rename = if outcome.renamed_target {
        format!(", target renamed to '{}'", outcome.canonical_name)
    } else {
        String::new()
    };
    format!(
        "{verb} mapping {}: '{}' -> '{}', {} observations moved, {} overrides repointed, {} deleted{rename}\n",
        outcome.mapping_id,
        outcome.source_name,
        outcome.target_name,
        outcome.observations_moved,
        outcome.overrides_repointed,
        outcome.overrides_deleted
    )
}

fn render_verify(issues: &[VerifyIssue]) -> String {
    if issues.is_empty() {
        return "All applied mappings are clean.\n".to_string();
    }
    let mut text = format!("{} applied mappings have new observations\n", issues.len());
    for issue in issues {
        let _ = writeln!(
            text,
            "  #{} '{}' -> '{}': {} observations on the source",
            issue.mapping.id,
            issue.mapping.source_name,
            issue.mapping.target_name,
            issue.remaining_observations
        );
    }
    text
}

// Overrides

#[derive(Serialize)]
struct OverrideListing {
    player: Player,
    outgoing: Vec<ObservationOverride>,
    incoming: Vec<ObservationOverride>,
}

/// Builds an override after checking that `original` played in the sub-match.
fn new_override(
    conn: &Connection,
    sub_match_id: i64,
    original: &str,
    target: &str,
    confidence: u8,
    reason: &str,
) -> Result<NewOverride, AppError> {
    let players = PlayerRepo::new(conn);
    let original = players.require_by_name(original)?;
    let target = players.require_by_name(target)?;
    if ObservationRepo::new(conn)
        .team_label_for(sub_match_id, original.id)?
        .is_none()
    {
        return Err(AppError::validation(format!(
            "'{}' has no observation in sub-match {sub_match_id}",
            original.name
        )));
    }
    Ok(NewOverride {
        sub_match_id,
        original_player_id: original.id,
        target_player_id: target.id,
        target_name: target.name,
        confidence,
        reason: reason.to_string(),
    })
}

fn handle_overrides(
    db: &mut Database,
    action: &OverridesCommand,
    output: &mut Output<'_>,
) -> Result<(), AppError> {
    let (sub_match, original, target, confidence, reason, supersede) = match action {
        OverridesCommand::List { player } => {
            let player = PlayerRepo::new(db.conn()).require_by_name(player)?;
            let overrides = OverrideRepo::new(db.conn());
            let listing = OverrideListing {
                outgoing: overrides.list_for_original(player.id)?,
                incoming: overrides.list_targeting(player.id)?,
                player,
            };
            return output.emit(&listing, render_override_listing);
        }
        OverridesCommand::Add {
            sub_match,
            original,
            target,
            confidence,
            reason,
        } => (sub_match, original, target, confidence, reason, false),
        OverridesCommand::Supersede {
            sub_match,
            original,
            target,
            confidence,
            reason,
        } => (sub_match, original, target, confidence, reason, true),
    };

    let label = format!("override {original} in sub-match {sub_match}");
    let stored = db.unit_of_work(&label, |tx| {
        let new = new_override(tx, *sub_match, original, target, *confidence, reason)?;
        let overrides = OverrideRepo::new(tx);
        if supersede {
            overrides.supersede(&new)?;
        } else {
            overrides.add_strict(&new)?;
        }
        overrides
            .find(new.sub_match_id, new.original_player_id)?
            .ok_or_else(|| AppError::Custom("override vanished after insert".to_string()))
    })?;
    output.emit(&stored, |o| render_override(o, "Stored override"))
}

fn render_override(o: &ObservationOverride, prefix: &str) -> String {
    format!(
        "{prefix} #{}: sub-match {}, player #{} -> '{}' (#{}), {}% ({})\n",
        o.id,
        o.sub_match_id,
        o.original_player_id,
        o.target_name,
        o.target_player_id,
        o.confidence,
        o.reason
    )
}

fn render_override_listing(listing: &OverrideListing) -> String {
    let mut text = format!("Overrides for {} (#{})\n", listing.player.name, listing.player.id);
    if listing.outgoing.is_empty() && listing.incoming.is_empty() {
        text.push_str("  none\n");
    }
    for o in &listing.outgoing {
        text.push_str(&render_override(o, "  from"));
    }
    for o in &listing.incoming {
        text.push_str(&render_override(o, "  to  "));
    }
    text
}

// Configuration

async fn handle_config(
    action: &ConfigCommand,
    config: &Config,
    output: &mut Output<'_>,
) -> Result<(), AppError> {
    match action {
        ConfigCommand::Show => output.emit(config, Config::render),
        ConfigCommand::Init { force } => {
            let path = Config::get_config_path();
            if Path::new(&path).exists() && !force {
                return Err(AppError::validation(format!(
                    "config file {path} already exists, pass --force to overwrite"
                )));
            }
            Config::default().save_to_path(&path).await?;
            info!("Wrote default config to {path}");
            output.emit(&path, |path| format!("Config written to {path}\n"))
        }
    }
}
