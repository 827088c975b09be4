mod grading_support;

use std::{
    io::Cursor,
    path::{Path, PathBuf},
    time::Duration,
};

use gradeflow::{
    discovery::{Submission, SubmissionFormat},
    manual::{ManualInputError, ReviewViewer, ScoreSource, TerminalScoreSource},
    rubric::RubricCriterion,
};
use grading_support::rubric;

fn submission() -> Submission {
    Submission {
        identity: "Ana".into(),
        path:     PathBuf::from("Ana.pdf"),
        format:   SubmissionFormat::Pdf,
    }
}

fn criteria() -> Vec<RubricCriterion> {
    rubric().criteria
}

#[tokio::test]
async fn reprompts_until_valid_and_keeps_comment() {
    let input = Cursor::new("abc\n\n7\n4\nBuena portada\n2,5e1\n\n");
    let mut output = Vec::new();
    let mut source = TerminalScoreSource::new(input, &mut output);

    let scores = source
        .collect(&submission(), &criteria())
        .await
        .expect("scores");

    assert_eq!(scores.len(), 2);
    assert_eq!(scores[0].criterion, "Portada");
    assert_eq!(scores[0].score, 4.0);
    assert_eq!(scores[0].justification, "Buena portada");
    assert_eq!(scores[1].criterion, "Introducción");
    assert_eq!(scores[1].score, 25.0);
    assert_eq!(scores[1].justification, "");

    drop(source);
    let shown = String::from_utf8_lossy(&output);
    assert!(shown.contains("Completa"));
    assert!(shown.contains("Eso no es un número."));
    assert!(shown.contains("Ingresa un número."));
}

#[tokio::test]
async fn end_of_input_aborts_instead_of_scoring_zero() {
    let mut source = TerminalScoreSource::new(Cursor::new("5\nok\n"), std::io::sink());

    let err = source
        .collect(&submission(), &criteria())
        .await
        .expect_err("aborted");
    match err {
        ManualInputError::Aborted { criterion } => assert_eq!(criterion, "Introducción"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn converted_pdf_keeps_dotted_stems() {
    let viewer = ReviewViewer::new(Duration::from_secs(5), PathBuf::from("revision"));
    assert_eq!(
        viewer
            .pdf_target(Path::new("entregas/Ana_123_assignsubmission_file_Actividad 1.2.docx"))
            .expect("target"),
        Path::new("revision/Ana_123_assignsubmission_file_Actividad 1.2.pdf")
    );
    assert_eq!(
        viewer.pdf_target(Path::new("Bruno.doc")).expect("target"),
        Path::new("revision/Bruno.pdf")
    );
}
