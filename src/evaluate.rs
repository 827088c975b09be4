#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Scores the automatic criteria of a submission with a chat-completion
//! model.
//!
//! The rubric subset, activity framing and output contract form a
//! [`PromptPrefix`] that is identical for every call of a batch, so the
//! provider can cache it. Only the per-student user message changes.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_openai::{
    Client as OpenAIClient,
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    activity::ResolvedActivity,
    config::{GradingConfig, GradingPrompts, OpenAiEnv},
    constants::{CHARS_PER_TOKEN, FENCED_BLOCK, REPAIR_ECHO_LIMIT},
    discovery::first_name,
    reconcile::{CriterionPlan, CriterionScore},
    rubric::Rubric,
    util::truncate_chars,
};

/// Why an evaluation produced no usable scores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    /// The provider throttled us and retries ran out.
    #[error("rate-limited: {0}")]
    RateLimited(String),
    /// Transport or API failure.
    #[error("service error: {0}")]
    Service(String),
    /// The request would exceed the input ceiling; nothing was sent.
    #[error("input-too-large: about {estimated} tokens, limit is {limit}")]
    InputTooLarge {
        /// Estimated input tokens.
        estimated: usize,
        /// Configured ceiling.
        limit:     usize,
    },
    /// The reply could not be parsed, even after the repair call.
    #[error("malformed-response: {0}")]
    MalformedResponse(String),
}

/// A chat-completion provider: one system message, one user message, one
/// reply.
pub trait CompletionService {
    /// Sends the two messages and returns the reply text.
    async fn complete(&self, system: &str, user: &str) -> Result<String, EvaluationError>;
}

/// [`CompletionService`] backed by an OpenAI-compatible endpoint.
#[derive(Clone, Debug)]
pub struct OpenAiService {
    /// Configured client.
    client: OpenAIClient<OpenAIConfig>,
    /// Model and sampling parameters.
    env:    OpenAiEnv,
}

impl OpenAiService {
    /// Creates a client for the endpoint in `env`.
    pub fn new(env: OpenAiEnv) -> Self {
        let client = OpenAIClient::with_config(
            OpenAIConfig::new()
                .with_api_base(env.api_base().to_owned())
                .with_api_key(env.api_key().to_owned()),
        );
        Self { client, env }
    }

    /// Maps provider errors onto the evaluation taxonomy.
    fn classify(err: OpenAIError) -> EvaluationError {
        match err {
            OpenAIError::ApiError(api) => {
                let code = api.code.as_ref().map(|c| c.to_string()).unwrap_or_default();
                let kind = api.r#type.as_ref().map(|t| t.to_string()).unwrap_or_default();
                let message = api.message.to_lowercase();
                if code.contains("rate_limit")
                    || kind.contains("rate_limit")
                    || message.contains("rate limit")
                {
                    EvaluationError::RateLimited(api.message)
                } else {
                    EvaluationError::Service(api.message)
                }
            }
            other => EvaluationError::Service(other.to_string()),
        }
    }
}

impl CompletionService for OpenAiService {
    async fn complete(&self, system: &str, user: &str) -> Result<String, EvaluationError> {
        let build_err = |e: OpenAIError| EvaluationError::Service(e.to_string());

        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()
                .map_err(build_err)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user)
                .build()
                .map_err(build_err)?
                .into(),
        ];

        let mut request = CreateChatCompletionRequestArgs::default();
        request.model(self.env.model()).messages(messages);
        if let Some(temperature) = self.env.temperature() {
            request.temperature(temperature);
        }
        if let Some(top_p) = self.env.top_p() {
            request.top_p(top_p);
        }
        if let Some(max_tokens) = self.env.max_tokens() {
            request.max_completion_tokens(max_tokens);
        }
        let request = request.build().map_err(build_err)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(Self::classify)?;

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| EvaluationError::Service("reply has no content".into()))
    }
}

/// The shared, immutable system message of a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptPrefix(Arc<str>);

impl PromptPrefix {
    /// Builds the prefix from the activity framing, the rubric restricted to
    /// the automatic criteria, and the output contract.
    pub fn build(
        activity: &ResolvedActivity,
        plan: &CriterionPlan,
        prompts: &GradingPrompts,
    ) -> Result<Self> {
        let subset = activity.rubric.restricted_to(&plan.automatic);
        let rubric_json =
            serde_json::to_string_pretty(&subset).context("Could not serialize rubric subset")?;

        let mut text = String::new();
        text.push_str(activity.prompt_template.trim());
        text.push_str(&format!(
            "\n\n## Actividad {}: {}\n",
            activity.id(),
            activity.config.title
        ));
        if !activity.config.instructions.trim().is_empty() {
            text.push_str(&format!("\n{}\n", activity.config.instructions.trim()));
        }
        text.push_str(&format!("\n## Rúbrica\n\n```json\n{rubric_json}\n```\n\n"));
        text.push_str(prompts.output_contract());

        Ok(Self(Arc::from(text)))
    }

    /// The prefix text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One score as returned by the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyScore {
    /// Criterion name.
    pub criterion:     String,
    /// Awarded score.
    pub score:         f64,
    /// Maximum echoed back by the model; informational only.
    #[serde(default)]
    pub maximum:       Option<f64>,
    /// Why the score was given.
    #[serde(default)]
    pub justification: String,
}

/// The evaluator's reply, as required by the output contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorReply {
    /// Scores for the automatic criteria.
    pub scores:    Vec<ReplyScore>,
    /// Feedback narrative.
    pub narrative: String,
    /// Short summary.
    pub summary:   String,
}

impl EvaluatorReply {
    /// Converts the reply's scores into reconciler input.
    pub fn criterion_scores(&self) -> Vec<CriterionScore> {
        self.scores
            .iter()
            .map(|s| CriterionScore::new(&s.criterion, s.score, &s.justification))
            .collect()
    }
}

/// Parses a reply, trying the raw text, then a fenced block, then the
/// outermost brace span. `expect_scores` rejects an empty score list.
pub fn parse_reply(raw: &str, expect_scores: bool) -> Result<EvaluatorReply, String> {
    let trimmed = raw.trim();
    let mut candidates = vec![trimmed];
    if let Some(block) = FENCED_BLOCK.captures(trimmed).and_then(|c| c.get(1)) {
        candidates.push(block.as_str().trim());
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && start < end
    {
        candidates.push(&trimmed[start..=end]);
    }

    let mut last_error = String::from("reply is empty");
    for candidate in candidates {
        match serde_json::from_str::<EvaluatorReply>(candidate) {
            Ok(reply) if expect_scores && reply.scores.is_empty() => {
                last_error = "`scores` is empty".into();
            }
            Ok(reply) => return Ok(reply),
            Err(e) => last_error = e.to_string(),
        }
    }
    Err(last_error)
}

/// Sends submissions to a [`CompletionService`] under a shared prefix.
#[derive(Debug)]
pub struct EvaluationBatcher<S> {
    /// Provider.
    service:          S,
    /// Shared system message.
    prefix:           PromptPrefix,
    /// Prompt assets.
    prompts:          GradingPrompts,
    /// Full rubric, for maxima of tutor-entered criteria.
    rubric:           Rubric,
    /// Whether the reply must carry scores.
    expect_scores:    bool,
    /// Rate-limit retries.
    max_retries:      u32,
    /// Base retry delay.
    retry_delay:      Duration,
    /// Input ceiling in estimated tokens.
    max_input_tokens: usize,
}

impl<S: CompletionService> EvaluationBatcher<S> {
    /// Builds the batch prefix and wraps `service`.
    pub fn new(
        service: S,
        activity: &ResolvedActivity,
        plan: &CriterionPlan,
        prompts: GradingPrompts,
        config: &GradingConfig,
    ) -> Result<Self> {
        let prefix = PromptPrefix::build(activity, plan, &prompts)?;
        debug!("Prompt prefix is {} characters", prefix.as_str().chars().count());
        Ok(Self {
            service,
            prefix,
            prompts,
            rubric: activity.rubric.clone(),
            expect_scores: plan.needs_evaluator(),
            max_retries: config.max_retries(),
            retry_delay: config.retry_delay(),
            max_input_tokens: config.max_input_tokens(),
        })
    }

    /// The shared prefix.
    pub fn prefix(&self) -> &PromptPrefix {
        &self.prefix
    }

    /// Builds the per-student message: addressing line, scores already
    /// given by the tutor or the auto-full rule, then the text.
    pub fn user_message(&self, identity: &str, text: &str, given: &[CriterionScore]) -> String {
        let mut message = self.prompts.student_addressing(&first_name(identity));
        message.push_str("\n\n");

        if !given.is_empty() {
            message.push_str(self.prompts.tutor_scores_intro());
            message.push('\n');
            for score in given {
                let maximum = self
                    .rubric
                    .criterion(&score.criterion)
                    .map(|c| c.maximum)
                    .unwrap_or(score.score);
                message.push_str(&format!("- {}: {}/{}\n", score.criterion, score.score, maximum));
                if !score.justification.trim().is_empty() {
                    message.push_str(&format!(
                        "  Observación del tutor: {}\n",
                        score.justification.trim()
                    ));
                }
            }
            message.push('\n');
        }

        message.push_str("TEXTO DEL ESTUDIANTE:\n\n");
        message.push_str(text);
        message
    }

    /// Evaluates one submission.
    pub async fn evaluate(
        &self,
        identity: &str,
        text: &str,
        given: &[CriterionScore],
    ) -> Result<EvaluatorReply, EvaluationError> {
        let user = self.user_message(identity, text, given);
        let estimated =
            (self.prefix.as_str().chars().count() + user.chars().count()) / CHARS_PER_TOKEN;
        if estimated > self.max_input_tokens {
            return Err(EvaluationError::InputTooLarge {
                estimated,
                limit: self.max_input_tokens,
            });
        }

        let raw = self.call(self.prefix.as_str(), &user).await?;
        match parse_reply(&raw, self.expect_scores) {
            Ok(reply) => Ok(reply),
            Err(error) => {
                warn!("{identity}: reply is not valid JSON ({error}); asking for a repair");
                let repair = self
                    .prompts
                    .json_repair(truncate_chars(&raw, REPAIR_ECHO_LIMIT), &error);
                let repaired = self.call(self.prompts.output_contract(), &repair).await?;
                parse_reply(&repaired, self.expect_scores).map_err(EvaluationError::MalformedResponse)
            }
        }
    }

    /// Calls the service, retrying rate limits with linear backoff.
    async fn call(&self, system: &str, user: &str) -> Result<String, EvaluationError> {
        let mut attempt = 0;
        loop {
            match self.service.complete(system, user).await {
                Err(EvaluationError::RateLimited(detail)) if attempt < self.max_retries => {
                    attempt += 1;
                    let wait = self.retry_delay * attempt;
                    warn!(
                        "Rate limited ({detail}); retry {attempt}/{} in {:?}",
                        self.max_retries, wait
                    );
                    tokio::time::sleep(wait).await;
                }
                outcome => return outcome,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_reply() {
        let raw = "Aquí está:\n```json\n{\"scores\": [{\"criterion\": \"A\", \"score\": 3}], \
                   \"narrative\": \"n\", \"summary\": \"s\"}\n```";
        let reply = parse_reply(raw, true).expect("fenced");
        assert_eq!(reply.scores[0].criterion, "A");
    }

    #[test]
    fn empty_scores_rejected_when_expected() {
        let raw = r#"{"scores": [], "narrative": "n", "summary": "s"}"#;
        assert!(parse_reply(raw, true).is_err());
        assert!(parse_reply(raw, false).is_ok());
    }
}
