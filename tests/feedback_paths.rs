mod grading_support;

use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use gradeflow::{
    discovery::{Submission, SubmissionFormat},
    feedback::{FeedbackWriter, assemble},
    reconcile::{EvaluationResult, ScoreEntry, ScoreOrigin},
    util::sanitize_segment,
};
use grading_support::activity;

#[test]
fn segments_are_sanitized() {
    assert_eq!(sanitize_segment("Ana  Pérez"), "Ana_Pérez");
    assert_eq!(sanitize_segment("a<b>c:d\"e|f?g*h"), "a_b_c_d_e_f_g_h");
    assert_eq!(sanitize_segment(".."), "unnamed");
    assert_eq!(sanitize_segment(".oculto."), "oculto");
}

#[test]
fn record_path_follows_course_layout() {
    let mut activity = activity();
    activity.course = "FI 08".into();
    activity.unit = 2;
    activity.config.id = "1.3".into();

    let writer = FeedbackWriter::new("salidas");
    assert_eq!(
        writer.record_path(&activity, "Ana:Pérez"),
        Path::new("salidas/FI_08/unidad_2/actividad_1.3/Ana_Pérez.json")
    );
}

#[test]
fn assembled_record_serializes_in_camel_case() {
    let submission = Submission {
        identity: "Ana".into(),
        path:     PathBuf::from("entregas/Ana_123456_assignsubmission_file_.pdf"),
        format:   SubmissionFormat::Pdf,
    };
    let result = EvaluationResult {
        entries:   vec![
            ScoreEntry {
                criterion:     "Portada".into(),
                score:         5.0,
                maximum:       5.0,
                justification: "Cumple".into(),
                origin:        ScoreOrigin::AutoFullScore,
            },
            ScoreEntry {
                criterion:     "Introducción".into(),
                score:         33.3,
                maximum:       60.0,
                justification: "Clara".into(),
                origin:        ScoreOrigin::Automatic,
            },
        ],
        narrative: "Buen trabajo.".into(),
        summary:   "Bien.".into(),
    };
    let at = Utc
        .with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .single()
        .expect("timestamp");

    let record = assemble(&submission, &activity(), &result, at);
    let json = serde_json::to_value(&record).expect("serialize");

    assert_eq!(json["metadata"]["studentId"], "Ana");
    assert_eq!(
        json["metadata"]["sourceFile"],
        "Ana_123456_assignsubmission_file_.pdf"
    );
    assert_eq!(json["metadata"]["timestamp"], "2026-03-01T12:00:00Z");
    assert_eq!(json["metadata"]["activityId"], "1.1");
    assert_eq!(json["metadata"]["rubricRef"], "rubrica.json");
    assert_eq!(json["scores"][0]["origin"], "auto-full-score");
    assert_eq!(json["total"], 38.3);
    assert_eq!(json["maximum"], 65.0);
}
