#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Moodle appends `_<participant id>_assignsubmission_file_<name>` to
    /// downloaded submissions.
    pub static ref MOODLE_SUFFIX: Regex =
        Regex::new(r"(?i)_\d+_assignsubmission").expect("valid moodle suffix pattern");

    /// Fallback for exports that keep only a numeric id between underscores.
    pub static ref NUMERIC_ID_SUFFIX: Regex =
        Regex::new(r"_\d{4,}_").expect("valid numeric id pattern");

    /// Fenced code blocks, optionally tagged `json`.
    pub static ref FENCED_BLOCK: Regex =
        Regex::new(r"```(?:json)?\s*([\s\S]*?)```").expect("valid fenced block pattern");

    /// Characters that cannot appear in a path segment on common filesystems.
    pub static ref UNSAFE_PATH_CHARS: Regex =
        Regex::new(r#"[<>:"/\\|?*]"#).expect("valid unsafe path pattern");

    /// Runs of whitespace.
    pub static ref WHITESPACE_RUN: Regex = Regex::new(r"\s+").expect("valid whitespace pattern");

    /// Three or more consecutive newlines.
    pub static ref BLANK_LINE_RUN: Regex = Regex::new(r"\n{3,}").expect("valid newline pattern");
}

/// Criteria scored by the tutor when no override list is given.
pub const DEFAULT_MANUAL_CRITERIA: [&str; 2] = ["Formato, ortografía y gramática", "Referencias"];

/// Criteria that receive their maximum whenever they appear in the rubric.
pub const DEFAULT_AUTO_FULL_SCORE_CRITERIA: [&str; 1] = ["Portada"];

/// Justification attached to auto-full-score entries.
pub const AUTO_FULL_SCORE_JUSTIFICATION: &str = "Cumple";

/// Rough character-to-token ratio used for the input ceiling.
pub const CHARS_PER_TOKEN: usize = 4;

/// Default ceiling on estimated input tokens per evaluation call.
pub const MAX_INPUT_TOKENS: usize = 180_000;

/// Longest slice of a malformed reply echoed back in the repair prompt.
pub const REPAIR_ECHO_LIMIT: usize = 2_000;

/// File name of the append-only ledger inside an activity output directory.
pub const LEDGER_FILE: &str = "_ledger.jsonl";

/// File name of the per-run summary inside an activity output directory.
pub const LEDGER_SUMMARY_FILE: &str = "_ledger_summary.json";

/// Viewers tried in order when opening a document for review.
pub const PDF_VIEWERS: [&str; 3] = ["evince", "okular", "xdg-open"];
