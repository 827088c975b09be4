mod grading_support;

use std::fs;

use gradeflow::discovery::{SubmissionFormat, discover_dir, first_name, student_identity};
use grading_support::temp_root;

#[test]
fn identity_strips_moodle_suffixes() {
    assert_eq!(
        student_identity("Ana Pérez_123456_assignsubmission_file_Ensayo"),
        "Ana Pérez"
    );
    assert_eq!(student_identity("Bruno Díaz_98765_ensayo final"), "Bruno Díaz");
    assert_eq!(student_identity("carla_ruiz"), "carla_ruiz");
}

#[test]
fn first_name_handles_common_layouts() {
    assert_eq!(first_name("ANA MARÍA PÉREZ"), "Ana");
    assert_eq!(first_name("perez_ana"), "Ana");
    assert_eq!(first_name("bruno"), "Bruno");
}

#[test]
fn richest_format_wins_and_duplicates_are_ambiguous() {
    let dir = temp_root("discovery");
    for name in [
        "Ana Pérez_123456_assignsubmission_file_Ensayo.docx",
        "Ana Pérez_123456_assignsubmission_file_Ensayo.PDF",
        "Bruno_Diaz.md",
        "Bruno_Diaz.txt",
        "Carla Ruiz_111111_assignsubmission_file_a.pdf",
        "Carla Ruiz_111111_assignsubmission_file_b.pdf",
        "notas.xlsx",
        ".oculto.pdf",
    ] {
        fs::write(dir.join(name), "x").expect("write fixture");
    }

    let report = discover_dir(&dir).expect("discover");

    let picked: Vec<(&str, SubmissionFormat)> = report
        .submissions
        .iter()
        .map(|s| (s.identity.as_str(), s.format))
        .collect();
    assert_eq!(
        picked,
        [
            ("Ana Pérez", SubmissionFormat::Pdf),
            ("Bruno_Diaz", SubmissionFormat::Txt)
        ]
    );

    assert_eq!(report.ambiguous.len(), 1);
    assert_eq!(report.ambiguous[0].identity, "Carla Ruiz");
    assert_eq!(report.ambiguous[0].candidates.len(), 2);

    assert_eq!(report.ignored.len(), 1);
    assert!(report.table().contains("ambiguous"));

    let _ = fs::remove_dir_all(dir);
}

#[test]
fn identities_group_case_insensitively() {
    let dir = temp_root("discovery-case");
    fs::write(dir.join("Ana.docx"), "x").expect("write");
    fs::write(dir.join("ana.txt"), "x").expect("write");

    let report = discover_dir(&dir).expect("discover");
    assert_eq!(report.submissions.len(), 1);
    assert_eq!(report.submissions[0].identity, "Ana");
    assert_eq!(report.submissions[0].format, SubmissionFormat::Docx);

    let _ = fs::remove_dir_all(dir);
}
