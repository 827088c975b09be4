#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Merges manual, auto-full-score and evaluator scores into exactly one entry
//! per rubric criterion.
//!
//! Precedence is manual > auto-full-score > automatic. The split of the rubric
//! into those three sets is computed once per batch as a [`CriterionPlan`];
//! [`reconcile`] is then a pure function of the plan and the collected scores.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{constants::AUTO_FULL_SCORE_JUSTIFICATION, rubric::Rubric};

/// Where a score came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScoreOrigin {
    /// Scored by the external evaluator.
    Automatic,
    /// Entered by the tutor.
    Manual,
    /// Awarded its maximum without evaluation.
    AutoFullScore,
}

impl Display for ScoreOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Automatic => "automatic",
            Self::Manual => "manual",
            Self::AutoFullScore => "auto-full-score",
        })
    }
}

/// A raw score for one criterion, as produced by a single source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    /// Criterion name as reported by the source.
    pub criterion:     String,
    /// Awarded score.
    pub score:         f64,
    /// Why the score was given.
    #[serde(default)]
    pub justification: String,
}

impl CriterionScore {
    /// Creates a score.
    pub fn new(criterion: impl Into<String>, score: f64, justification: impl Into<String>) -> Self {
        Self {
            criterion: criterion.into(),
            score,
            justification: justification.into(),
        }
    }
}

/// A reconciled score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    /// Rubric criterion name.
    pub criterion:     String,
    /// Awarded score, within `0..=maximum`.
    pub score:         f64,
    /// The criterion's maximum.
    pub maximum:       f64,
    /// Why the score was given.
    pub justification: String,
    /// Which source won.
    pub origin:        ScoreOrigin,
}

/// One entry per rubric criterion, in rubric order, plus the evaluator's
/// prose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Reconciled entries.
    pub entries:   Vec<ScoreEntry>,
    /// Feedback narrative addressed to the student.
    pub narrative: String,
    /// One-paragraph summary.
    pub summary:   String,
}

impl EvaluationResult {
    /// Sum of awarded scores.
    pub fn total(&self) -> f64 {
        self.entries.iter().map(|e| e.score).sum()
    }

    /// Sum of maxima.
    pub fn maximum(&self) -> f64 {
        self.entries.iter().map(|e| e.maximum).sum()
    }
}

/// Reasons a set of scores cannot be reconciled.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconcileError {
    /// The source responsible for a criterion did not score it.
    #[error("criterion-coverage: no {origin} score for `{criterion}`")]
    CriterionCoverage {
        /// Criterion left unscored.
        criterion: String,
        /// Source that should have scored it.
        origin:    ScoreOrigin,
    },
    /// A score falls outside `0..=maximum`.
    #[error("score-out-of-range: `{criterion}` scored {score} by {origin}, allowed 0..={maximum}")]
    ScoreOutOfRange {
        /// Criterion scored.
        criterion: String,
        /// Offending score.
        score:     f64,
        /// Criterion maximum.
        maximum:   f64,
        /// Source of the score.
        origin:    ScoreOrigin,
    },
}

/// How a rubric's criteria are split between the tutor, the auto-full rule
/// and the evaluator for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CriterionPlan {
    /// Criteria the tutor scores, in rubric order.
    pub manual:    Vec<String>,
    /// Criteria awarded their maximum, in rubric order.
    pub auto_full: Vec<String>,
    /// Criteria sent to the evaluator, in rubric order.
    pub automatic: Vec<String>,
    /// Configured names that the rubric does not declare.
    pub dropped:   Vec<String>,
}

impl CriterionPlan {
    /// Splits `rubric` given the manual list in effect and the auto-full list.
    /// Names missing from the rubric are dropped with one warning each; a name
    /// in both lists stays manual.
    pub fn new(rubric: &Rubric, manual: &[String], auto_full: &[String]) -> Self {
        let mut dropped = Vec::new();
        for name in manual.iter().chain(auto_full.iter()) {
            if !rubric.contains(name) && !dropped.contains(name) {
                warn!("Criterion `{name}` is configured but not in rubric `{}`; ignoring it", rubric.name);
                dropped.push(name.clone());
            }
        }

        let mut plan = Self {
            dropped,
            ..Self::default()
        };
        for name in rubric.names() {
            let listed = |list: &[String]| list.iter().any(|n| n == name);
            if listed(manual) {
                plan.manual.push(name.to_string());
            } else if listed(auto_full) {
                plan.auto_full.push(name.to_string());
            } else {
                plan.automatic.push(name.to_string());
            }
        }
        plan
    }

    /// Whether anything is left for the evaluator.
    pub fn needs_evaluator(&self) -> bool {
        !self.automatic.is_empty()
    }
}

/// Scores gathered for one submission, by source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectedScores {
    /// Tutor-entered scores.
    pub manual:    Vec<CriterionScore>,
    /// Auto-full scores.
    pub auto_full: Vec<CriterionScore>,
    /// Evaluator scores.
    pub automatic: Vec<CriterionScore>,
    /// Evaluator narrative.
    pub narrative: String,
    /// Evaluator summary.
    pub summary:   String,
}

/// Auto-full scores for every criterion of `plan.auto_full`.
pub fn auto_full_scores(rubric: &Rubric, plan: &CriterionPlan) -> Vec<CriterionScore> {
    plan.auto_full
        .iter()
        .filter_map(|name| rubric.criterion(name))
        .map(|c| CriterionScore::new(&c.name, c.maximum, AUTO_FULL_SCORE_JUSTIFICATION))
        .collect()
}

/// Finds the first score for `name`, comparing exactly first and then
/// case-insensitively with surrounding whitespace ignored.
fn find_score<'a>(scores: &'a [CriterionScore], name: &str) -> Option<&'a CriterionScore> {
    scores
        .iter()
        .find(|s| s.criterion == name)
        .or_else(|| {
            scores
                .iter()
                .find(|s| s.criterion.trim().to_lowercase() == name.trim().to_lowercase())
        })
}

/// Merges `scores` into one entry per rubric criterion, in rubric order.
pub fn reconcile(
    rubric: &Rubric,
    plan: &CriterionPlan,
    scores: &CollectedScores,
) -> Result<EvaluationResult, ReconcileError> {
    for stray in &scores.automatic {
        if find_score_in_names(&plan.automatic, &stray.criterion).is_none() {
            debug!("Ignoring evaluator score for `{}`, not an automatic criterion", stray.criterion);
        }
    }

    let mut entries = Vec::with_capacity(rubric.criteria.len());
    for criterion in &rubric.criteria {
        let name = criterion.name.as_str();
        let (origin, source) = if plan.manual.iter().any(|n| n == name) {
            (ScoreOrigin::Manual, &scores.manual)
        } else if plan.auto_full.iter().any(|n| n == name) {
            (ScoreOrigin::AutoFullScore, &scores.auto_full)
        } else {
            (ScoreOrigin::Automatic, &scores.automatic)
        };

        let Some(found) = find_score(source, name) else {
            return Err(ReconcileError::CriterionCoverage {
                criterion: name.to_string(),
                origin,
            });
        };
        if !(0.0..=criterion.maximum).contains(&found.score) {
            return Err(ReconcileError::ScoreOutOfRange {
                criterion: name.to_string(),
                score: found.score,
                maximum: criterion.maximum,
                origin,
            });
        }

        entries.push(ScoreEntry {
            criterion: name.to_string(),
            score: found.score,
            maximum: criterion.maximum,
            justification: found.justification.trim().to_string(),
            origin,
        });
    }

    Ok(EvaluationResult {
        entries,
        narrative: scores.narrative.trim().to_string(),
        summary: scores.summary.trim().to_string(),
    })
}

/// Matches a reported criterion against a list of names with the same
/// leniency as [`find_score`].
fn find_score_in_names<'a>(names: &'a [String], reported: &str) -> Option<&'a String> {
    names.iter().find(|n| *n == reported).or_else(|| {
        names
            .iter()
            .find(|n| n.trim().to_lowercase() == reported.trim().to_lowercase())
    })
}
