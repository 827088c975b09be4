mod grading_support;

use std::{fs, path::PathBuf, time::Duration};

use gradeflow::{
    discovery::{Submission, SubmissionFormat},
    extract::{
        DecodeOutcome, DecodeQuality, DocumentDecoder, ExtractionError, ExtractionStatus,
        StandardDecoder, TextExtractor, decode_bytes, normalize_text,
    },
};
use grading_support::temp_root;

fn submission(path: PathBuf, format: SubmissionFormat) -> Submission {
    Submission {
        identity: "Ana".into(),
        path,
        format,
    }
}

#[test]
fn encoding_ladder_reports_each_rung() {
    let utf8 = decode_bytes("canción".as_bytes());
    assert_eq!(utf8.quality, DecodeQuality::Exact);
    assert_eq!(utf8.text, "canción");

    let bom = decode_bytes(b"\xEF\xBB\xBFhola");
    assert_eq!(bom.quality, DecodeQuality::Fallback("utf-8-sig"));
    assert_eq!(bom.text, "hola");

    let latin = decode_bytes(b"caf\xe9 \x93bien\x94");
    assert_eq!(latin.quality, DecodeQuality::Fallback("windows-1252"));
    assert_eq!(latin.text, "café \u{201C}bien\u{201D}");

    let binary = decode_bytes(b"\xff\x00\x01\xfe");
    assert_eq!(binary.quality, DecodeQuality::Lossy);
    assert!(binary.text.contains('\u{FFFD}'));
}

#[test]
fn normalization_keeps_indentation_and_squeezes_blank_lines() {
    let text = "a   b\r\n\r\n\r\n\r\n  c\t d  \n";
    assert_eq!(normalize_text(text), "a b\n\n  c d");
    assert_eq!(normalize_text(" \n\t\r\n "), "");
}

#[tokio::test]
async fn plain_text_files_are_classified() {
    let dir = temp_root("extract");
    let full = dir.join("full.txt");
    let blank = dir.join("blank.md");
    fs::write(&full, b"Mi ensayo\r\nsobre f\xedsica").expect("write full");
    fs::write(&blank, "   \n\n").expect("write blank");

    let extractor = TextExtractor::new(StandardDecoder::new(Duration::from_secs(5)));

    let ok = extractor.extract(&submission(full, SubmissionFormat::Txt)).await;
    assert_eq!(ok.status, ExtractionStatus::Ok);
    assert_eq!(ok.text, "Mi ensayo\nsobre física");
    assert_eq!(ok.quality, Some(DecodeQuality::Fallback("windows-1252")));

    let empty = extractor.extract(&submission(blank, SubmissionFormat::Md)).await;
    assert_eq!(empty.status, ExtractionStatus::Empty);
    assert!(empty.usable_text().is_err());

    let missing = extractor
        .extract(&submission(dir.join("nope.txt"), SubmissionFormat::Txt))
        .await;
    assert_eq!(missing.status, ExtractionStatus::Failed);
    assert!(missing.detail.is_some());

    let _ = fs::remove_dir_all(dir);
}

struct BrokenConverter;

impl DocumentDecoder for BrokenConverter {
    async fn decode(&self, _submission: &Submission) -> Result<DecodeOutcome, ExtractionError> {
        Err(ExtractionError::ToolMissing {
            format: SubmissionFormat::Pdf,
            tried:  "pdftotext".into(),
        })
    }
}

#[tokio::test]
async fn decoder_errors_become_failed_documents() {
    let extractor = TextExtractor::new(BrokenConverter);
    let doc = extractor
        .extract(&submission(PathBuf::from("ana.pdf"), SubmissionFormat::Pdf))
        .await;

    assert_eq!(doc.status, ExtractionStatus::Failed);
    let reason = doc.usable_text().expect_err("failed");
    assert!(reason.contains("pdftotext"));
}
