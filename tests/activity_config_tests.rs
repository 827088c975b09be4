mod grading_support;

use std::fs;

use gradeflow::{
    activity::{ActivityKind, ResolvedActivity},
    config::GradingConfig,
};
use grading_support::{temp_root, write_course};

#[test]
fn resolves_spanish_course_document() {
    let root = temp_root("activity");
    let course = write_course(&root);

    let activity = ResolvedActivity::resolve(&course, 1, "1.1").expect("resolve");
    assert_eq!(activity.course, "FI08");
    assert_eq!(activity.config.kind, ActivityKind::Written);
    assert_eq!(activity.rubric.criteria.len(), 2);
    assert_eq!(activity.rubric_ref, "rubrica.json");
    assert!(activity.prompt_template.contains("evaluador"));

    let _ = fs::remove_dir_all(root);
}

#[test]
fn unknown_activity_and_missing_rubric_are_fatal() {
    let root = temp_root("activity-missing");
    let course = write_course(&root);

    let err = ResolvedActivity::resolve(&course, 1, "9.9").expect_err("unknown activity");
    assert!(err.to_string().contains("9.9"));

    fs::remove_file(root.join("rubrica.json")).expect("remove rubric");
    assert!(ResolvedActivity::resolve(&course, 1, "1.1").is_err());

    let _ = fs::remove_dir_all(root);
}

#[test]
fn manual_override_replaces_defaults_and_needs_hybrid() {
    let config = GradingConfig::builder().build();
    assert_eq!(config.effective_manual().len(), 2);
    assert!(config.manual_for_run().is_empty());

    let config = config
        .with_manual_override(vec!["Introducción".into()])
        .with_run_flags(true, false);
    assert_eq!(config.effective_manual(), ["Introducción".to_string()]);
    assert_eq!(config.manual_for_run(), ["Introducción".to_string()]);
    assert_eq!(config.auto_full_score(), ["Portada".to_string()]);
}
