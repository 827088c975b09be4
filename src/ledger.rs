#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Append-only audit trail of a batch.
//!
//! Each record is one JSON line in `_ledger.jsonl`, flushed to disk before
//! [`Ledger::append`] returns, so a crash keeps every completed outcome.
//! Closing the ledger consumes it and writes `_ledger_summary.json`.

use std::{
    collections::HashSet,
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tabled::{Table, Tabled, settings::Style};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::constants::{LEDGER_FILE, LEDGER_SUMMARY_FILE};

/// Terminal outcome of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Feedback was written.
    Success,
    /// Processing stopped with an error.
    Failure,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every submission reached a terminal state.
    Completed,
    /// The run was interrupted.
    Aborted,
}

/// One line of the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingRecord {
    /// Student identity.
    pub identity:  String,
    /// Outcome.
    pub outcome:   Outcome,
    /// Total score on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total:     Option<f64>,
    /// Error detail on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error:     Option<String>,
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
}

impl ProcessingRecord {
    /// Current time, formatted for records.
    fn now() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// A success record.
    pub fn success(identity: impl Into<String>, total: f64) -> Self {
        Self {
            identity:  identity.into(),
            outcome:   Outcome::Success,
            total:     Some(total),
            error:     None,
            timestamp: Self::now(),
        }
    }

    /// A failure record.
    pub fn failure(identity: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            identity:  identity.into(),
            outcome:   Outcome::Failure,
            total:     None,
            error:     Some(error.into()),
            timestamp: Self::now(),
        }
    }
}

/// A record as stored on disk, tagged with its run.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerLine {
    /// Run that wrote the line.
    run_id: String,
    /// The record itself.
    #[serde(flatten)]
    record: ProcessingRecord,
}

/// What `_ledger_summary.json` holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSummary {
    /// When the run closed.
    pub timestamp:               String,
    /// Activity graded.
    pub activity_id:             String,
    /// Run identifier.
    pub run_id:                  String,
    /// How the run ended.
    pub status:                  RunStatus,
    /// Records in this run.
    pub total:                   usize,
    /// Successful records.
    pub succeeded:               usize,
    /// Failed records.
    pub failed:                  usize,
    /// Every record of the run, in processing order.
    pub per_submission_outcomes: Vec<ProcessingRecord>,
}

/// Row of the summary table.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Student")]
    /// Identity.
    identity: String,
    #[tabled(rename = "Outcome")]
    /// Success or failure.
    outcome:  String,
    #[tabled(rename = "Total / Error")]
    /// Total on success, error detail on failure.
    detail:   String,
}

impl LedgerSummary {
    /// Whether any submission failed.
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Renders the per-submission outcomes.
    pub fn table(&self) -> String {
        let rows = self.per_submission_outcomes.iter().map(|r| OutcomeRow {
            identity: r.identity.clone(),
            outcome:  match r.outcome {
                Outcome::Success => "success".into(),
                Outcome::Failure => "failure".into(),
            },
            detail:   match (&r.total, &r.error) {
                (Some(total), _) => total.to_string(),
                (None, Some(error)) => error.clone(),
                (None, None) => String::new(),
            },
        });
        Table::new(rows).with(Style::modern()).to_string()
    }
}

/// Whether the ledger at `path` is empty or ends in a complete line.
fn ends_with_newline(path: &Path) -> Result<bool> {
    let mut file =
        File::open(path).with_context(|| format!("Could not open ledger {}", path.display()))?;
    if file.metadata().context("Could not stat ledger")?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))
        .and_then(|_| file.read_exact(&mut last))
        .with_context(|| format!("Could not read ledger tail {}", path.display()))?;
    Ok(last[0] == b'\n')
}

/// An open ledger for one run. Closing consumes it, so nothing can be
/// appended afterwards.
#[derive(Debug)]
pub struct Ledger {
    /// Activity output directory.
    dir:         PathBuf,
    /// Activity graded.
    activity_id: String,
    /// This run's identifier.
    run_id:      Uuid,
    /// Open `_ledger.jsonl`, in append mode.
    file:        File,
    /// Records appended in this run.
    records:     Vec<ProcessingRecord>,
    /// Identities recorded in this run.
    seen:        HashSet<String>,
}

impl Ledger {
    /// Opens (creating if needed) the ledger in `dir` and starts a new run.
    pub fn open(dir: &Path, activity_id: &str) -> Result<Self> {
        std::fs::create_dir_all(dir).with_context(|| format!("Could not create {}", dir.display()))?;
        let path = dir.join(LEDGER_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Could not open ledger {}", path.display()))?;
        if !ends_with_newline(&path)? {
            warn!("Ledger {} ends in a torn line; starting on a fresh one", path.display());
            file.write_all(b"\n").context("Could not terminate torn ledger line")?;
            file.sync_data().context("Could not flush ledger")?;
        }

        let run_id = Uuid::new_v4();
        debug!("Ledger {} opened for run {run_id}", path.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            activity_id: activity_id.to_string(),
            run_id,
            file,
            records: Vec::new(),
            seen: HashSet::new(),
        })
    }

    /// This run's identifier.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Records appended so far in this run.
    pub fn records(&self) -> &[ProcessingRecord] {
        &self.records
    }

    /// Appends `record` durably. A second record for the same identity in
    /// one run is rejected.
    pub fn append(&mut self, record: ProcessingRecord) -> Result<()> {
        if self.seen.contains(&record.identity) {
            bail!("{} is already recorded in run {}", record.identity, self.run_id);
        }

        let line = LedgerLine {
            run_id: self.run_id.to_string(),
            record,
        };
        let mut json = serde_json::to_string(&line).context("Could not serialize ledger record")?;
        json.push('\n');
        self.file
            .write_all(json.as_bytes())
            .context("Could not append to ledger")?;
        self.file.sync_data().context("Could not flush ledger")?;

        self.seen.insert(line.record.identity.clone());
        self.records.push(line.record);
        Ok(())
    }

    /// Ends the run, writes `_ledger_summary.json` and returns the summary.
    pub fn close(self, status: RunStatus) -> Result<LedgerSummary> {
        let succeeded = self
            .records
            .iter()
            .filter(|r| r.outcome == Outcome::Success)
            .count();
        let summary = LedgerSummary {
            timestamp: ProcessingRecord::now(),
            activity_id: self.activity_id,
            run_id: self.run_id.to_string(),
            status,
            total: self.records.len(),
            succeeded,
            failed: self.records.len() - succeeded,
            per_submission_outcomes: self.records,
        };

        let path = self.dir.join(LEDGER_SUMMARY_FILE);
        let json =
            serde_json::to_string_pretty(&summary).context("Could not serialize ledger summary")?;
        std::fs::write(&path, json).with_context(|| format!("Could not write {}", path.display()))?;
        Ok(summary)
    }

    /// Identities with a success outcome in any run recorded in `dir`.
    pub fn succeeded_identities(dir: &Path) -> Result<HashSet<String>> {
        let path = dir.join(LEDGER_FILE);
        if !path.exists() {
            return Ok(HashSet::new());
        }
        let file =
            File::open(&path).with_context(|| format!("Could not open ledger {}", path.display()))?;

        let lines: Vec<String> = BufReader::new(file)
            .lines()
            .collect::<std::io::Result<_>>()
            .with_context(|| format!("Could not read ledger {}", path.display()))?;
        let last = lines.len().saturating_sub(1);

        let mut identities = HashSet::new();
        for (n, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerLine>(line) {
                Ok(entry) if entry.record.outcome == Outcome::Success => {
                    identities.insert(entry.record.identity);
                }
                Ok(_) => {}
                Err(e) if n == last => warn!("Ignoring torn final ledger line: {e}"),
                Err(e) => warn!("Ignoring unreadable ledger line {}: {e}", n + 1),
            }
        }
        Ok(identities)
    }
}
