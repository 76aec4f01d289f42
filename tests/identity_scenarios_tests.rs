use dart_identity::{
    identity::{
        ClubContextResolver, Decision, DuplicateConsolidator, IdentityMatcher, IdentitySplitter,
        NameNormalizer, OverlapDetector, OverlapSettings,
        matcher::{MatchRule, RuleEnv, rules::default_rules},
    },
    import::{ImportJob, RawObservation, VecSource},
    store::{Database, ObservationRepo, OverrideRepo, PlayerRepo},
    testing_utils::{TestDataBuilder, match_time},
};

fn raw(sub_match_id: i64, date: &str, team_label: &str, raw_name: &str) -> RawObservation {
    RawObservation {
        sub_match_id,
        played_at: match_time(date),
        team_number: 1,
        team_label: team_label.to_string(),
        opponent_label: "Visitors".to_string(),
        raw_name: raw_name.to_string(),
        performance_value: 21.5,
    }
}

fn matcher(db: &Database) -> IdentityMatcher {
    IdentityMatcher::build(db.conn(), NameNormalizer::new(), ClubContextResolver::new()).unwrap()
}

fn detector() -> OverlapDetector {
    OverlapDetector::new(ClubContextResolver::new(), OverlapSettings::default())
}

/// Case variants of one name collapse into a single properly cased Player
#[test]
fn test_case_variants_import_as_one_player() {
    let mut db = Database::open_in_memory().unwrap();
    let mut matcher = matcher(&db);
    let mut source = VecSource::new(vec![
        raw(1, "2024-01-08", "Dartanjang 2", "mikael granath"),
        raw(2, "2024-01-15", "Dartanjang 2", "Mikael Granath"),
        raw(3, "2024-01-22", "Dartanjang 2", "MIKAEL GRANATH"),
    ]);

    let summary = ImportJob::new(&mut matcher, false)
        .run(&mut db, &mut source)
        .unwrap();
    assert!(!summary.has_failures());

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

/// A bare first name never borrows another club's first-name mapping
#[test]
fn test_bare_name_does_not_cross_clubs() {
    let mut db = Database::open_in_memory().unwrap();
    let mut matcher = matcher(&db);
    let mut job = ImportJob::new(&mut matcher, false);

    let ssdc = job
        .import_one(&mut db, &raw(1, "2024-01-08", "SSDC", "Mats"))
        .unwrap();
    let ssdc_again = job
        .import_one(&mut db, &raw(2, "2024-01-15", "SSDC", "Mats"))
        .unwrap();
    assert_eq!(ssdc_again.plan.decision.decision, Decision::FirstNameContext);
    assert_eq!(ssdc.effective_player, ssdc_again.effective_player);

    let dartanjang = job
        .import_one(&mut db, &raw(3, "2024-01-16", "Dartanjang", "Mats"))
        .unwrap();
    assert_ne!(dartanjang.plan.decision.decision, Decision::FirstNameContext);
    assert_ne!(dartanjang.effective_player, ssdc.effective_player);

    // Every observation stays on the bare name; overrides carry the identity.
    let bare = PlayerRepo::new(db.conn()).require_by_name("Mats").unwrap();
    let overrides = OverrideRepo::new(db.conn()).list_for_original(bare.id).unwrap();
    assert_eq!(overrides.len(), 3);
    let redirected = OverrideRepo::new(db.conn())
        .effective_player(3, bare.id)
        .unwrap();
    let redirected = PlayerRepo::new(db.conn()).require(redirected).unwrap();
    assert_eq!(Some(redirected.name), dartanjang.effective_player);
}

/// Moving clubs between seasons is not an overlap
#[test]
fn test_consecutive_clubs_are_not_flagged() {
    let db = Database::open_in_memory().unwrap();
    let builder = TestDataBuilder::new(db.conn())
        .series("Anna Berg", "Club A", "2022-01-03", 80, 4)
        .series("Anna Berg", "Club B", "2023-01-02", 80, 4);
    let anna = PlayerRepo::new(db.conn())
        .require(builder.player_id("Anna Berg"))
        .unwrap();

    let report = detector().analyze(db.conn(), &anna).unwrap();
    assert_eq!(report.total_matches, 160);
    assert!(!report.has_overlap());
    assert!(detector().scan(db.conn(), 30, None).unwrap().is_empty());

    let splitter = IdentitySplitter::new(detector());
    let plan = splitter.plan(db.conn(), &anna).unwrap();
    assert!(!plan.is_needed());
}

/// Two clubs active at the same time are flagged and split
#[test]
fn test_concurrent_clubs_are_split() {
    let mut db = Database::open_in_memory().unwrap();
    let builder = TestDataBuilder::new(db.conn())
        .series("Johan", "Oilers 2B", "2023-01-02", 40, 3)
        .series("Johan", "Birds", "2023-01-03", 40, 3)
        .weekly_series("Lisa Holm", "Birds", "2023-01-03", 40);
    let johan_id = builder.player_id("Johan");

    let reports = detector().scan(db.conn(), 30, None).unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].player.id, johan_id);

    let splitter = IdentitySplitter::new(detector());
    let johan = PlayerRepo::new(db.conn()).require(johan_id).unwrap();
    let outcome = db
        .unit_of_work("split Johan", |tx| {
            let plan = splitter.plan(tx, &johan)?;
            splitter.apply(tx, &plan)
        })
        .unwrap();
    assert_eq!(outcome.remaining_observations, 0);
    let mut names: Vec<_> = outcome.targets.iter().map(|t| t.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["Johan (Birds)", "Johan (Oilers)"]);

    // Later observations under the bare name resolve per club.
    let matcher = matcher(&db);
    let decision = matcher
        .resolve(db.conn(), "Johan", Some("Oilers 3A"))
        .unwrap();
    assert_eq!(decision.target_name, "Johan (Oilers)");
}

/// Single-letter typos are proposed; short first names are not
#[test]
fn test_typo_pairs() {
    let db = Database::open_in_memory().unwrap();
    TestDataBuilder::new(db.conn())
        .weekly_series("Alexander Feldin", "Oilers", "2024-01-08", 6)
        .weekly_series("Alexander Felldin", "Oilers", "2024-04-01", 2)
        .weekly_series("Peter", "Birds", "2024-01-08", 3)
        .weekly_series("Peder", "Birds", "2024-02-05", 3);

    let pairs = DuplicateConsolidator::new(NameNormalizer::new())
        .typo_pairs(db.conn())
        .unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].survivor.player.name, "Alexander Feldin");
    assert_eq!(pairs[0].loser.player.name, "Alexander Felldin");
    assert_eq!(pairs[0].differing_part, 1);
}

/// The same store state always yields the same decisions
#[test]
fn test_resolution_is_deterministic() {
    let seed = |db: &Database| {
        TestDataBuilder::new(db.conn())
            .weekly_series("Mikael Granath", "SSDC 1", "2024-01-08", 4)
            .weekly_series("mikael granath", "SSDC 1", "2024-03-04", 2)
            .weekly_series("Anna-Karin Berg", "Oilers", "2024-01-08", 3)
            .weekly_series("Mats (SSDC)", "SSDC 1", "2024-01-08", 3)
            .player("Mats");
    };
    let first = Database::open_in_memory().unwrap();
    let second = Database::open_in_memory().unwrap();
    seed(&first);
    seed(&second);

    let inputs = [
        ("MIKAEL GRANATH", Some("SSDC 2")),
        ("anna karin berg", Some("Oilers")),
        ("Mats", Some("SSDC 1")),
        ("Mats", Some("Dartanjang")),
        ("Nobody Known", None),
    ];
    let (a, b) = (matcher(&first), matcher(&second));
    for (name, team) in inputs {
        let left = a.resolve(first.conn(), name, team).unwrap();
        let right = b.resolve(second.conn(), name, team).unwrap();
        assert_eq!(left, right, "decision for {name:?} differs");
        assert_eq!(left, a.resolve(first.conn(), name, team).unwrap());
    }
}

/// Every rule's decision lands in its confidence tier, and a new identity
/// is proposed only when no earlier rule had an opinion
#[test]
fn test_decision_tiers_follow_rules() {
    let db = Database::open_in_memory().unwrap();
    let builder = TestDataBuilder::new(db.conn())
        .weekly_series("Mikael Granath", "SSDC 1", "2024-01-08", 3)
        .weekly_series("ANNA-KARIN BERG", "Oilers", "2024-01-08", 3)
        .weekly_series("anna-karin berg", "Oilers", "2024-03-04", 1)
        .weekly_series("Mats", "SSDC 1", "2024-01-09", 1);
    let mats_match = builder.last_sub_match();
    builder
        .override_to(mats_match, "Mats", "Mats Andersson", 85)
        .player("Johan (Oilers)")
        .player("Johan (Birds)")
        .player("Micke")
        .confirmed_mapping("Micke", "Mikael Granath")
        .player("åsa vall")
        .player("Per Olof Lind");

    let matcher = matcher(&db);
    let cases = [
        ("mikael granath", Some("SSDC 1"), Decision::ExactMatch, "Mikael Granath"),
        ("anna-karin berg", Some("Oilers"), Decision::CaseVariation, "ANNA-KARIN BERG"),
        ("Mats", Some("SSDC 1"), Decision::FirstNameContext, "Mats Andersson"),
        ("Johan", Some("Oilers 2B"), Decision::ClubVariant, "Johan (Oilers)"),
        ("Johan", Some("Dartanjang"), Decision::CreateClubVariant, "Johan (Dartanjang)"),
        ("Micke", Some("SSDC 1"), Decision::GlobalMapping, "Mikael Granath"),
        ("ÅSA VALL", None, Decision::CaseInsensitive, "åsa vall"),
        ("per-olof lind", None, Decision::HyphenVariant, "Per Olof Lind"),
        ("Nobody Known", None, Decision::CreateNew, "Nobody Known"),
    ];

    let rules = default_rules();
    let env = RuleEnv {
        conn: db.conn(),
        index: matcher.index(),
        clubs: matcher.clubs(),
    };
    for (raw_name, team, expected, target) in cases {
        let decision = matcher.resolve(db.conn(), raw_name, team).unwrap();
        assert_eq!(decision.decision, expected, "decision for {raw_name:?} in {team:?}");
        assert_eq!(decision.target_name, target, "target for {raw_name:?}");

        let tier = match decision.decision {
            Decision::ExactMatch
            | Decision::CaseVariation
            | Decision::FirstNameContext
            | Decision::ClubVariant
            | Decision::CreateClubVariant
            | Decision::GlobalMapping => 90..=100,
            Decision::CaseInsensitive | Decision::HyphenVariant => 75..=89,
            Decision::CreateNew => 0..=0,
        };
        assert!(
            tier.contains(&decision.confidence),
            "{} at {}% for {raw_name:?}",
            decision.decision,
            decision.confidence
        );

        // The decision comes from the first rule with an opinion.
        let ctx = matcher.context(raw_name, team);
        let first = rules
            .iter()
            .find_map(|rule| rule.try_match(&ctx, &env).unwrap())
            .unwrap();
        assert_eq!(first, decision);
        let earlier_hits = rules[..rules.len() - 1]
            .iter()
            .filter(|rule| rule.try_match(&ctx, &env).unwrap().is_some())
            .count();
        assert_eq!(decision.decision == Decision::CreateNew, earlier_hits == 0);
    }
}
