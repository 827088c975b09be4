//! # gradeflow
//!
//! Grades written submissions against a rubric. Criteria that can be judged
//! from extracted text are scored by an OpenAI-compatible model, criteria that
//! depend on layout or typography are entered by a tutor, and the two are
//! reconciled into one record per student. Every batch keeps an append-only
//! ledger so a run can be resumed after a crash or an interrupt.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Course and activity documents
pub mod activity;
/// Environment-driven configuration and embedded prompt assets
pub mod config;
/// Constant values used throughout
pub mod constants;
/// Finding one submission file per student
pub mod discovery;
/// Driving the external evaluation service
pub mod evaluate;
/// Turning files into normalized text
pub mod extract;
/// Feedback records and their on-disk layout
pub mod feedback;
/// Append-only record of a batch run
pub mod ledger;
/// Tutor-entered scores and document review
pub mod manual;
/// Per-submission state machine and batch orchestration
pub mod pipeline;
/// Helpers for spawning external tools
pub mod process;
/// Criterion precedence and score merging
pub mod reconcile;
/// Rubric documents
pub mod rubric;
/// Utility functions for convenience
pub mod util;
