#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use bon::Builder;

use crate::constants::{
    DEFAULT_AUTO_FULL_SCORE_CRITERIA, DEFAULT_MANUAL_CRITERIA, MAX_INPUT_TOKENS,
};

/// OpenAI credentials and optional tuning parameters sourced from the
/// environment.
#[derive(Clone, Debug)]
pub struct OpenAiEnv {
    /// Base URL for the OpenAI-compatible API endpoint.
    api_base:    String,
    /// API key used to authenticate OpenAI requests.
    api_key:     String,
    /// Model identifier for chat completions.
    model:       String,
    /// Optional temperature override, if provided.
    temperature: Option<f32>,
    /// Optional top-p override, if provided.
    top_p:       Option<f32>,
    /// Optional cap on completion tokens.
    max_tokens:  Option<u32>,
}

impl OpenAiEnv {
    /// Construct an `OpenAiEnv` from environment variables; returns `None` if
    /// any required field is missing.
    pub fn from_env() -> Option<Self> {
        let api_base = std::env::var("OPENAI_ENDPOINT").ok()?.trim().to_owned();
        let api_key = std::env::var("OPENAI_API_KEY").ok()?.trim().to_owned();
        let model = std::env::var("OPENAI_MODEL").ok()?.trim().to_owned();

        if api_base.is_empty() || api_key.is_empty() || model.is_empty() {
            return None;
        }

        Some(Self {
            api_base,
            api_key,
            model,
            temperature: read_parsed("OPENAI_TEMPERATURE"),
            top_p: read_parsed("OPENAI_TOP_P"),
            max_tokens: read_parsed("OPENAI_MAX_TOKENS"),
        })
    }

    /// Like [`OpenAiEnv::from_env`], but names the missing variables.
    pub fn require() -> Result<Self> {
        match Self::from_env() {
            Some(env) => Ok(env),
            None => bail!(
                "OpenAI is not configured: set OPENAI_ENDPOINT, OPENAI_API_KEY and OPENAI_MODEL \
                 (a .env file in the working directory is read too)"
            ),
        }
    }

    /// Returns the API base URL used for OpenAI requests.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Returns the API key used for OpenAI requests.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Returns the model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the configured temperature, if any.
    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    /// Returns the configured top_p, if any.
    pub fn top_p(&self) -> Option<f32> {
        self.top_p
    }

    /// Returns the configured completion token cap, if any.
    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens
    }
}

/// Batch-wide grading settings. Built once at batch start and passed down;
/// nothing in the crate reads these from process-wide state.
#[derive(Clone, Debug, Builder)]
pub struct GradingConfig {
    /// Criteria the tutor scores when no override list is supplied.
    #[builder(default = DEFAULT_MANUAL_CRITERIA.iter().map(ToString::to_string).collect())]
    default_manual:    Vec<String>,
    /// Operator-supplied list that replaces `default_manual` for this run.
    manual_override:   Option<Vec<String>>,
    /// Criteria that always receive their maximum.
    #[builder(default = DEFAULT_AUTO_FULL_SCORE_CRITERIA.iter().map(ToString::to_string).collect())]
    auto_full_score:   Vec<String>,
    /// Whether the tutor is asked for manual criteria at all.
    #[builder(default = false)]
    hybrid:            bool,
    /// How many times a rate-limited call is retried.
    #[builder(default = 3)]
    max_retries:       u32,
    /// Base delay between rate-limit retries; grows linearly per attempt.
    #[builder(default = Duration::from_millis(2_000))]
    retry_delay:       Duration,
    /// Ceiling on estimated input tokens per evaluation call.
    #[builder(default = MAX_INPUT_TOKENS)]
    max_input_tokens:  usize,
    /// Deadline for converters, extractors and archive tools.
    #[builder(default = Duration::from_secs(120))]
    tool_timeout:      Duration,
    /// Root under which feedback records are written.
    #[builder(default = PathBuf::from("outputs"))]
    output_root:       PathBuf,
    /// Skip identities that already succeeded in an earlier run.
    #[builder(default = false)]
    resume:            bool,
}

impl GradingConfig {
    /// Reads tunables from `GRADEFLOW_*` environment variables, falling back
    /// to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let output_root = std::env::var("GRADEFLOW_OUTPUT_DIR")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("outputs"));

        GradingConfig::builder()
            .max_retries(read_parsed("GRADEFLOW_MAX_RETRIES").unwrap_or(3))
            .retry_delay(read_duration_millis("GRADEFLOW_RETRY_DELAY_MS", 2_000))
            .max_input_tokens(read_parsed("GRADEFLOW_MAX_INPUT_TOKENS").unwrap_or(MAX_INPUT_TOKENS))
            .tool_timeout(read_timeout_secs("GRADEFLOW_TOOL_TIMEOUT_SECS", 120))
            .output_root(output_root)
            .build()
    }

    /// Returns the default manual list.
    pub fn default_manual(&self) -> &[String] {
        &self.default_manual
    }

    /// Returns the auto-full-score list.
    pub fn auto_full_score(&self) -> &[String] {
        &self.auto_full_score
    }

    /// Returns whether the tutor is asked for manual criteria.
    pub fn hybrid(&self) -> bool {
        self.hybrid
    }

    /// Returns how many times a rate-limited call is retried.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the base retry delay.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Returns the input-token ceiling.
    pub fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }

    /// Returns the deadline for external tools.
    pub fn tool_timeout(&self) -> Duration {
        self.tool_timeout
    }

    /// Returns the feedback output root.
    pub fn output_root(&self) -> &std::path::Path {
        &self.output_root
    }

    /// Returns whether already-succeeded identities are skipped.
    pub fn resume(&self) -> bool {
        self.resume
    }

    /// The manual list in effect: the override when present, otherwise the
    /// default. The two are never merged.
    pub fn effective_manual(&self) -> &[String] {
        self.manual_override
            .as_deref()
            .unwrap_or(self.default_manual.as_slice())
    }

    /// The manual list this run actually asks the tutor for. Outside hybrid
    /// mode nothing is entered by hand and the evaluator scores those
    /// criteria too.
    pub fn manual_for_run(&self) -> &[String] {
        if self.hybrid { self.effective_manual() } else { &[] }
    }

    /// Returns a copy with the operator's manual list installed.
    pub fn with_manual_override(mut self, names: Vec<String>) -> Self {
        self.manual_override = Some(names);
        self
    }

    /// Returns a copy with hybrid mode and resume toggled.
    pub fn with_run_flags(mut self, hybrid: bool, resume: bool) -> Self {
        self.hybrid = hybrid;
        self.resume = resume;
        self
    }

    /// Returns a copy writing under a different output root.
    pub fn with_output_root(mut self, root: PathBuf) -> Self {
        self.output_root = root;
        self
    }
}

/// Prompt assets embedded in the binary.
#[derive(Clone, Debug)]
pub struct GradingPrompts {
    /// Schema the evaluator's reply must follow.
    output_schema:      String,
    /// Output contract appended to every prompt prefix.
    output_contract:    String,
    /// Header introducing tutor-entered scores.
    tutor_scores_intro: String,
}

impl GradingPrompts {
    /// Load prompt templates embedded in the binary.
    pub fn load() -> Self {
        let output_schema = include_str!("prompts/output_schema.json").trim().to_string();
        let output_contract = format!(
            include_str!("prompts/output_contract.md"),
            SCHEMA = include_str!("prompts/output_schema.json").trim(),
        );

        Self {
            output_schema,
            output_contract,
            tutor_scores_intro: include_str!("prompts/tutor_scores_intro.md").trim().to_string(),
        }
    }

    /// Returns the reply schema.
    pub fn output_schema(&self) -> &str {
        &self.output_schema
    }

    /// Returns the output contract.
    pub fn output_contract(&self) -> &str {
        &self.output_contract
    }

    /// Returns the tutor-score header.
    pub fn tutor_scores_intro(&self) -> &str {
        &self.tutor_scores_intro
    }

    /// Renders the line telling the evaluator how to address the student.
    pub fn student_addressing(&self, name: &str) -> String {
        format!(include_str!("prompts/student_addressing.md"), NAME = name)
            .trim()
            .to_string()
    }

    /// Renders the repair prompt for a reply that failed to parse.
    pub fn json_repair(&self, malformed: &str, error: &str) -> String {
        format!(
            include_str!("prompts/json_repair.md"),
            MALFORMED = malformed,
            ERROR = error,
            SCHEMA = self.output_schema,
        )
    }
}

/// Parses an environment variable into `T`, returning `None` when it is unset
/// or unparsable.
fn read_parsed<T: std::str::FromStr>(env: &str) -> Option<T> {
    std::env::var(env)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}

/// Parses an environment variable into a `Duration`, falling back to
/// `default_secs` when parsing fails or the variable is missing.
fn read_timeout_secs(env: &str, default_secs: u64) -> Duration {
    read_parsed::<u64>(env)
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}

/// Millisecond flavour of [`read_timeout_secs`].
fn read_duration_millis(env: &str, default_millis: u64) -> Duration {
    read_parsed::<u64>(env)
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_millis))
}
