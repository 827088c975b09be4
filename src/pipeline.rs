#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Drives a batch: one submission at a time through extraction, manual entry,
//! evaluation, reconciliation and feedback, recording every outcome in the
//! ledger.
//!
//! Per-submission failures are recorded and the batch moves on. A shutdown
//! signal ends the batch: the submission in flight is recorded as
//! `interrupted` and the run is closed as aborted.

use std::{
    collections::HashSet,
    fmt::Display,
    future::Future,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    activity::{ActivityKind, ResolvedActivity},
    config::{GradingConfig, GradingPrompts},
    discovery::{DiscoveryReport, Submission, SubmissionFormat},
    evaluate::{CompletionService, EvaluationBatcher, EvaluationError},
    extract::{DocumentDecoder, TextExtractor},
    feedback::{FeedbackWriter, assemble, load_records},
    ledger::{Ledger, LedgerSummary, ProcessingRecord, RunStatus},
    manual::{ManualInputError, ReviewViewer, ScoreSource},
    reconcile::{
        CollectedScores, CriterionPlan, CriterionScore, ReconcileError, auto_full_scores,
        reconcile,
    },
    rubric::RubricCriterion,
};

/// Where a submission is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    /// Selected by discovery.
    Discovered,
    /// Text extracted.
    Extracted,
    /// Waiting for the tutor.
    AwaitingManualInput,
    /// Waiting for the evaluator.
    Evaluating,
    /// Scores merged.
    Reconciled,
    /// Feedback written.
    Recorded,
}

impl Display for SubmissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Discovered => "discovered",
            Self::Extracted => "extracted",
            Self::AwaitingManualInput => "awaiting-manual-input",
            Self::Evaluating => "evaluating",
            Self::Reconciled => "reconciled",
            Self::Recorded => "recorded",
        })
    }
}

/// Why one submission failed. Never fatal to the batch.
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// No usable text.
    #[error("{0}")]
    Extraction(String),
    /// The tutor did not finish scoring.
    #[error(transparent)]
    ManualInput(#[from] ManualInputError),
    /// The evaluator failed.
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    /// Scores could not be merged.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    /// The feedback file could not be written.
    #[error("feedback write failed: {0:#}")]
    Write(anyhow::Error),
}

/// A configured batch over one activity.
pub struct Pipeline<S, M, D> {
    /// Activity being graded.
    activity:  ResolvedActivity,
    /// Criterion split for this batch.
    plan:      CriterionPlan,
    /// Evaluator.
    batcher:   EvaluationBatcher<S>,
    /// Text extraction.
    extractor: TextExtractor<D>,
    /// Manual scores.
    scores:    M,
    /// Document viewer for the tutor, hybrid written activities only.
    viewer:    Option<ReviewViewer>,
    /// Feedback output.
    writer:    FeedbackWriter,
    /// Skip identities that already succeeded.
    resume:    bool,
}

impl<S, M, D> Pipeline<S, M, D>
where
    S: CompletionService,
    M: ScoreSource,
    D: DocumentDecoder,
{
    /// Plans the criterion split and builds the evaluator prefix.
    pub fn new(
        activity: ResolvedActivity,
        config: &GradingConfig,
        service: S,
        decoder: D,
        scores: M,
    ) -> Result<Self> {
        let plan = CriterionPlan::new(
            &activity.rubric,
            config.manual_for_run(),
            config.auto_full_score(),
        );
        info!(
            "Criteria: {} automatic, {} manual, {} auto-full",
            plan.automatic.len(),
            plan.manual.len(),
            plan.auto_full.len()
        );

        let batcher = EvaluationBatcher::new(service, &activity, &plan, GradingPrompts::load(), config)?;
        let viewer = (config.hybrid()
            && !plan.manual.is_empty()
            && activity.config.kind == ActivityKind::Written)
            .then(|| {
                ReviewViewer::new(config.tool_timeout(), std::env::temp_dir().join("gradeflow-review"))
            });

        Ok(Self {
            activity,
            plan,
            batcher,
            extractor: TextExtractor::new(decoder),
            scores,
            viewer,
            writer: FeedbackWriter::new(config.output_root()),
            resume: config.resume(),
        })
    }

    /// Disables the document viewer.
    pub fn without_viewer(mut self) -> Self {
        self.viewer = None;
        self
    }

    /// The criterion split in effect.
    pub fn plan(&self) -> &CriterionPlan {
        &self.plan
    }

    /// Directory holding this activity's feedback and ledger.
    pub fn output_dir(&self) -> PathBuf {
        self.writer.activity_dir(&self.activity)
    }

    /// Processes every submission in `report`.
    pub async fn run(&mut self, report: &DiscoveryReport) -> Result<LedgerSummary> {
        self.run_until(report, std::future::pending()).await
    }

    /// Processes submissions until done or until `shutdown` completes.
    /// Students with ambiguous hand-ins are recorded as failures up front.
    pub async fn run_until(
        &mut self,
        report: &DiscoveryReport,
        shutdown: impl Future<Output = ()>,
    ) -> Result<LedgerSummary> {
        let rejected = report
            .ambiguous
            .iter()
            .map(|ambiguous| {
                let reason = format!(
                    "ambiguous: {} {} files",
                    ambiguous.candidates.len(),
                    ambiguous.format
                );
                (ambiguous.identity.clone(), reason)
            })
            .collect();
        let already_graded = if self.resume {
            Ledger::succeeded_identities(&self.output_dir())?
        } else {
            HashSet::new()
        };
        self.run_batch(&report.submissions, rejected, &already_graded, shutdown)
            .await
    }

    /// Grades again every student that already has a feedback record, using
    /// the current rubric and prompt. Each record's source file is looked up
    /// by name in `originals`; students whose file is gone are recorded as
    /// failures. Records are overwritten in place.
    pub async fn reprocess(&mut self, originals: &Path) -> Result<LedgerSummary> {
        self.reprocess_until(originals, std::future::pending()).await
    }

    /// [`Pipeline::reprocess`], stopping early when `shutdown` completes.
    pub async fn reprocess_until(
        &mut self,
        originals: &Path,
        shutdown: impl Future<Output = ()>,
    ) -> Result<LedgerSummary> {
        let records = load_records(&self.output_dir())?;
        info!("Reprocessing {} existing record(s)", records.len());

        let mut submissions = Vec::new();
        let mut rejected = Vec::new();
        for record in records {
            let identity = record.metadata.student_id;
            let source = Path::new(&record.metadata.source_file)
                .file_name()
                .map(|name| originals.join(name));
            let located = source
                .filter(|path| path.is_file())
                .and_then(|path| SubmissionFormat::from_path(&path).map(|format| (path, format)));
            match located {
                Some((path, format)) => submissions.push(Submission {
                    identity,
                    path,
                    format,
                }),
                None => rejected.push((
                    identity,
                    format!(
                        "source file not found: {}",
                        record.metadata.source_file
                    ),
                )),
            }
        }

        self.run_batch(&submissions, rejected, &HashSet::new(), shutdown)
            .await
    }

    /// Records `rejected` as failures, then processes `submissions` in order,
    /// skipping `already_graded`.
    async fn run_batch(
        &mut self,
        submissions: &[Submission],
        rejected: Vec<(String, String)>,
        already_graded: &HashSet<String>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<LedgerSummary> {
        let mut ledger = Ledger::open(&self.output_dir(), self.activity.id())?;
        info!("Run {} over {} submission(s)", ledger.run_id(), submissions.len());

        for (identity, reason) in rejected {
            if already_graded.contains(&identity) {
                continue;
            }
            warn!("{identity} not graded: {reason}");
            ledger.append(ProcessingRecord::failure(&identity, reason))?;
        }

        tokio::pin!(shutdown);
        for submission in submissions {
            if already_graded.contains(&submission.identity) {
                info!("Skipping {}: graded in an earlier run", submission.identity);
                continue;
            }

            let outcome = tokio::select! {
                biased;
                _ = &mut shutdown => None,
                result = self.process(submission) => Some(result),
            };

            match outcome {
                None => {
                    warn!("Interrupted while processing {}", submission.identity);
                    ledger.append(ProcessingRecord::failure(&submission.identity, "interrupted"))?;
                    return ledger.close(RunStatus::Aborted);
                }
                Some(Ok(total)) => {
                    info!("{}: {total}", submission.identity);
                    ledger.append(ProcessingRecord::success(&submission.identity, total))?;
                }
                Some(Err(e)) => {
                    error!("{}: {e}", submission.identity);
                    ledger.append(ProcessingRecord::failure(&submission.identity, e.to_string()))?;
                }
            }
        }

        ledger.close(RunStatus::Completed)
    }

    /// Takes one submission to a terminal state and returns its total.
    async fn process(&mut self, submission: &Submission) -> Result<f64, SubmissionError> {
        let identity = submission.identity.as_str();
        let enter = |state: SubmissionState| debug!("{identity}: {state}");
        enter(SubmissionState::Discovered);

        let document = self.extractor.extract(submission).await;
        let text = document
            .usable_text()
            .map_err(SubmissionError::Extraction)?
            .to_string();
        enter(SubmissionState::Extracted);

        let rubric = &self.activity.rubric;
        let manual = if self.plan.manual.is_empty() {
            Vec::new()
        } else {
            enter(SubmissionState::AwaitingManualInput);
            if let Some(viewer) = &self.viewer {
                viewer.show(submission).await;
            }
            let criteria: Vec<RubricCriterion> = self
                .plan
                .manual
                .iter()
                .filter_map(|name| rubric.criterion(name))
                .cloned()
                .collect();
            self.scores.collect(submission, &criteria).await?
        };
        let auto_full = auto_full_scores(rubric, &self.plan);

        enter(SubmissionState::Evaluating);
        let given: Vec<CriterionScore> = manual.iter().chain(auto_full.iter()).cloned().collect();
        let reply = self.batcher.evaluate(identity, &text, &given).await?;
        let collected = CollectedScores {
            manual,
            auto_full,
            automatic: reply.criterion_scores(),
            narrative: reply.narrative,
            summary: reply.summary,
        };

        let result = reconcile(rubric, &self.plan, &collected)?;
        enter(SubmissionState::Reconciled);

        let record = assemble(submission, &self.activity, &result, Utc::now());
        self.writer
            .write(&self.activity, &record)
            .map_err(SubmissionError::Write)?;
        enter(SubmissionState::Recorded);

        Ok(record.total)
    }
}
