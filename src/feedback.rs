#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Feedback records: one JSON file per student, plus the grades summary read
//! back from them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tabled::{builder::Builder, settings::Style};
use tracing::{info, warn};

use crate::{
    activity::ResolvedActivity,
    discovery::Submission,
    reconcile::{EvaluationResult, ScoreEntry},
    util::{find_files, sanitize_segment},
};

/// Who and what a feedback record is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackMetadata {
    /// Student identity.
    pub student_id:  String,
    /// File the feedback was produced from.
    pub source_file: String,
    /// RFC 3339 UTC timestamp.
    pub timestamp:   String,
    /// Activity identifier.
    pub activity_id: String,
    /// Rubric file name.
    pub rubric_ref:  String,
}

/// The per-student output document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    /// Provenance.
    pub metadata:  FeedbackMetadata,
    /// One entry per rubric criterion, in rubric order.
    pub scores:    Vec<ScoreEntry>,
    /// Sum of scores.
    pub total:     f64,
    /// Sum of maxima.
    pub maximum:   f64,
    /// Feedback narrative.
    pub narrative: String,
    /// Short summary.
    pub summary:   String,
}

/// Rounds to two decimals so sums of fractional scores print cleanly.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Builds the feedback record for one reconciled submission.
pub fn assemble(
    submission: &Submission,
    activity: &ResolvedActivity,
    result: &EvaluationResult,
    timestamp: DateTime<Utc>,
) -> FeedbackRecord {
    FeedbackRecord {
        metadata:  FeedbackMetadata {
            student_id:  submission.identity.clone(),
            source_file: submission.source_file(),
            timestamp:   timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            activity_id: activity.id().to_string(),
            rubric_ref:  activity.rubric_ref.clone(),
        },
        scores:    result.entries.clone(),
        total:     round2(result.total()),
        maximum:   round2(result.maximum()),
        narrative: result.narrative.clone(),
        summary:   result.summary.clone(),
    }
}

/// Writes feedback records under an output root.
#[derive(Debug, Clone)]
pub struct FeedbackWriter {
    /// Output root.
    root: PathBuf,
}

impl FeedbackWriter {
    /// Creates a writer rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<root>/<course>/unidad_<unit>/actividad_<id>`, each segment
    /// sanitized.
    pub fn activity_dir(&self, activity: &ResolvedActivity) -> PathBuf {
        self.root
            .join(sanitize_segment(&activity.course))
            .join(format!("unidad_{}", activity.unit))
            .join(format!("actividad_{}", sanitize_segment(activity.id())))
    }

    /// Where the record for `identity` goes.
    pub fn record_path(&self, activity: &ResolvedActivity, identity: &str) -> PathBuf {
        self.activity_dir(activity)
            .join(format!("{}.json", sanitize_segment(identity)))
    }

    /// Writes `record` as pretty JSON and returns its path.
    pub fn write(&self, activity: &ResolvedActivity, record: &FeedbackRecord) -> Result<PathBuf> {
        let path = self.record_path(activity, &record.metadata.student_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(record).context("Could not serialize feedback")?;
        std::fs::write(&path, json).with_context(|| format!("Could not write {}", path.display()))?;
        info!("Wrote {}", path.display());
        Ok(path)
    }
}

/// Reads every feedback record in an activity output directory, skipping the
/// ledger files (names starting with `_`).
pub fn load_records(dir: &Path) -> Result<Vec<FeedbackRecord>> {
    ensure!(dir.is_dir(), "Not a directory: {}", dir.display());

    let mut records = Vec::new();
    for path in find_files(dir)? {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('_') || !name.ends_with(".json") {
            continue;
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        match serde_json::from_str::<FeedbackRecord>(&text) {
            Ok(record) => records.push(record),
            Err(e) => warn!("Skipping {}: not a feedback record ({e})", path.display()),
        }
    }
    Ok(records)
}

/// Per-student totals and per-criterion scores for an activity.
#[derive(Debug, Clone, Default)]
pub struct GradesSummary {
    /// Records, ordered by student.
    records:   Vec<FeedbackRecord>,
    /// Criterion names, in the order of the first record.
    criteria:  Vec<String>,
}

impl GradesSummary {
    /// Builds a summary from loaded records.
    pub fn new(mut records: Vec<FeedbackRecord>) -> Self {
        records.sort_by(|a, b| a.metadata.student_id.cmp(&b.metadata.student_id));
        let criteria = records
            .first()
            .map(|r| r.scores.iter().map(|s| s.criterion.clone()).collect())
            .unwrap_or_default();
        Self { records, criteria }
    }

    /// Number of students.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no record was found.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Average, minimum and maximum total, if any record exists.
    pub fn stats(&self) -> Option<(f64, f64, f64)> {
        if self.records.is_empty() {
            return None;
        }
        let totals = self.records.iter().map(|r| r.total);
        let sum: f64 = totals.clone().sum();
        let min = totals.clone().fold(f64::INFINITY, f64::min);
        let max = totals.fold(f64::NEG_INFINITY, f64::max);
        Some((round2(sum / self.records.len() as f64), min, max))
    }

    /// Renders the per-student table.
    pub fn table(&self) -> String {
        let mut builder = Builder::default();
        let mut header = vec!["Student".to_string()];
        header.extend(self.criteria.iter().cloned());
        header.push("Total".into());
        builder.push_record(header);

        for record in &self.records {
            let mut row = vec![record.metadata.student_id.clone()];
            for criterion in &self.criteria {
                let cell = record
                    .scores
                    .iter()
                    .find(|s| &s.criterion == criterion)
                    .map(|s| s.score.to_string())
                    .unwrap_or_else(|| "-".into());
                row.push(cell);
            }
            row.push(format!("{}/{}", record.total, record.maximum));
            builder.push_record(row);
        }

        let mut table = builder.build();
        table.with(Style::modern());
        table.to_string()
    }
}
