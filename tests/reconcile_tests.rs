mod grading_support;

use gradeflow::{
    config::GradingConfig,
    reconcile::{
        CollectedScores, CriterionPlan, CriterionScore, ReconcileError, ScoreOrigin,
        auto_full_scores, reconcile,
    },
};
use grading_support::rubric;

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

#[test]
fn pure_ai_mode_with_defaults() {
    let rubric = rubric();
    let config = GradingConfig::builder().build();
    let plan = CriterionPlan::new(&rubric, config.manual_for_run(), config.auto_full_score());

    assert!(plan.manual.is_empty());
    assert_eq!(plan.auto_full, names(&["Portada"]));
    assert_eq!(plan.automatic, names(&["Introducción"]));
    assert!(plan.dropped.is_empty());

    let scores = CollectedScores {
        auto_full: auto_full_scores(&rubric, &plan),
        automatic: vec![CriterionScore::new("Introducción", 42.0, "Clara")],
        narrative: "n".into(),
        summary: "s".into(),
        ..CollectedScores::default()
    };
    let result = reconcile(&rubric, &plan, &scores).expect("reconcile");

    assert_eq!(result.entries[0].criterion, "Portada");
    assert_eq!(result.entries[0].score, 5.0);
    assert_eq!(result.entries[0].origin, ScoreOrigin::AutoFullScore);
    assert_eq!(result.entries[0].justification, "Cumple");
    assert_eq!(result.entries[1].origin, ScoreOrigin::Automatic);
    assert_eq!(result.total(), 47.0);
    assert_eq!(result.maximum(), 65.0);
}

#[test]
fn hybrid_defaults_absent_from_rubric_are_dropped() {
    let rubric = rubric();
    let config = GradingConfig::builder().hybrid(true).build();
    let plan = CriterionPlan::new(&rubric, config.manual_for_run(), config.auto_full_score());

    assert!(plan.manual.is_empty());
    assert_eq!(
        plan.dropped,
        names(&["Formato, ortografía y gramática", "Referencias"])
    );
    assert_eq!(plan.automatic, names(&["Introducción"]));
}

#[test]
fn override_moves_criterion_to_manual() {
    let rubric = rubric();
    let config = GradingConfig::builder()
        .hybrid(true)
        .build()
        .with_manual_override(names(&["Introducción"]));
    let plan = CriterionPlan::new(&rubric, config.manual_for_run(), config.auto_full_score());

    assert_eq!(plan.manual, names(&["Introducción"]));
    assert_eq!(plan.auto_full, names(&["Portada"]));
    assert!(plan.automatic.is_empty());
    assert!(!plan.needs_evaluator());
}

#[test]
fn manual_wins_over_other_sources() {
    let rubric = rubric();
    let plan = CriterionPlan::new(&rubric, &names(&["Introducción", "Portada"]), &names(&["Portada"]));
    let scores = CollectedScores {
        manual: vec![
            CriterionScore::new("Introducción", 10.0, "tutor"),
            CriterionScore::new("Portada", 2.0, "sin logo"),
        ],
        auto_full: auto_full_scores(&rubric, &plan),
        automatic: vec![CriterionScore::new("Introducción", 55.0, "modelo")],
        ..CollectedScores::default()
    };
    let result = reconcile(&rubric, &plan, &scores).expect("reconcile");

    assert!(result.entries.iter().all(|e| e.origin == ScoreOrigin::Manual));
    assert_eq!(result.entries[0].score, 2.0);
    assert_eq!(result.entries[1].score, 10.0);
}

#[test]
fn names_match_rubric_for_every_origin_mix() {
    let rubric = rubric();
    let all = names(&["Portada", "Introducción"]);
    let lists: [(Vec<String>, Vec<String>); 4] = [
        (vec![], vec![]),
        (vec![], names(&["Portada"])),
        (names(&["Introducción"]), names(&["Portada"])),
        (all.clone(), vec![]),
    ];

    for (manual, auto_full) in lists {
        let plan = CriterionPlan::new(&rubric, &manual, &auto_full);
        let scores = CollectedScores {
            manual: plan.manual.iter().map(|n| CriterionScore::new(n, 1.0, "")).collect(),
            auto_full: auto_full_scores(&rubric, &plan),
            automatic: plan.automatic.iter().map(|n| CriterionScore::new(n, 1.0, "")).collect(),
            ..CollectedScores::default()
        };
        let result = reconcile(&rubric, &plan, &scores).expect("reconcile");
        let got: Vec<String> = result.entries.iter().map(|e| e.criterion.clone()).collect();
        assert_eq!(got, all);
    }
}

#[test]
fn reconciliation_is_deterministic() {
    let rubric = rubric();
    let plan = CriterionPlan::new(&rubric, &[], &names(&["Portada"]));
    let scores = CollectedScores {
        auto_full: auto_full_scores(&rubric, &plan),
        automatic: vec![
            CriterionScore::new("Introducción", 33.5, "primera"),
            CriterionScore::new("Introducción", 12.0, "duplicada"),
            CriterionScore::new("Conclusión", 9.0, "fuera de plan"),
        ],
        narrative: "n".into(),
        summary: "s".into(),
        ..CollectedScores::default()
    };

    let first = serde_json::to_string(&reconcile(&rubric, &plan, &scores).expect("first"))
        .expect("serialize");
    let second = serde_json::to_string(&reconcile(&rubric, &plan, &scores).expect("second"))
        .expect("serialize");
    assert_eq!(first, second);
    assert!(first.contains("primera"));
    assert!(!first.contains("Conclusión"));
}

#[test]
fn missing_automatic_score_is_a_coverage_error() {
    let rubric = rubric();
    let plan = CriterionPlan::new(&rubric, &[], &names(&["Portada"]));
    let scores = CollectedScores {
        auto_full: auto_full_scores(&rubric, &plan),
        automatic: vec![CriterionScore::new("Conclusión", 9.0, "")],
        ..CollectedScores::default()
    };

    let err = reconcile(&rubric, &plan, &scores).expect_err("coverage");
    assert_eq!(
        err,
        ReconcileError::CriterionCoverage {
            criterion: "Introducción".into(),
            origin:    ScoreOrigin::Automatic,
        }
    );
    assert!(err.to_string().starts_with("criterion-coverage"));
}

#[test]
fn score_above_maximum_is_rejected() {
    let rubric = rubric();
    let plan = CriterionPlan::new(&rubric, &[], &names(&["Portada"]));
    let scores = CollectedScores {
        auto_full: auto_full_scores(&rubric, &plan),
        automatic: vec![CriterionScore::new("Introducción", 61.0, "")],
        ..CollectedScores::default()
    };

    assert!(matches!(
        reconcile(&rubric, &plan, &scores),
        Err(ReconcileError::ScoreOutOfRange { .. })
    ));
}
