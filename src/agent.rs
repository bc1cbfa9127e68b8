//! LLM agent module for transcript summarization.
//!
//! The completion service is a seam: [`GeminiCompletion`] talks to the model
//! through rstructor, tests plug in their own [`CompletionService`]. Replies
//! are treated as untrusted text; [`parse_reply`] pulls the first JSON object
//! out of them and leaves shape repair to [`crate::normalize`].

use crate::config::{AgentConfig, Config};
use crate::summary::CanonicalSummary;
use async_trait::async_trait;
use rstructor::{GeminiClient, GeminiModel, LLMClient};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM request failed: {0}")]
    RequestFailed(String),
    #[error("LLM request failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
    #[error("no JSON object in reply")]
    NoJson,
    #[error("failed to parse response: {0}")]
    ParseError(String),
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),
    #[error("configuration error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),
}

impl AgentError {
    /// Whether another attempt could succeed. Only request failures qualify.
    pub fn is_transient(&self) -> bool {
        matches!(self, AgentError::RequestFailed(_))
    }
}

/// Anything that turns instructions plus content into a text reply.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, instructions: &str, content: &str) -> Result<String, AgentError>;
}

/// Gemini-backed completion.
pub struct GeminiCompletion {
    api_key: String,
    model: String,
}

impl GeminiCompletion {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, AgentError> {
        if config.agent.provider != "gemini" {
            return Err(AgentError::UnsupportedProvider(config.agent.provider.clone()));
        }
        Ok(Self::new(config.api_key()?, config.agent.model.clone()))
    }
}

#[async_trait]
impl CompletionService for GeminiCompletion {
    async fn complete(&self, instructions: &str, content: &str) -> Result<String, AgentError> {
        let client = GeminiClient::new(self.api_key.as_str())
            .map_err(|e| AgentError::RequestFailed(e.to_string()))?
            .model(parse_gemini_model(&self.model));

        let prompt = format!("{instructions}\n\n---\n\n{content}");
        let result = client
            .generate_with_metadata(&prompt)
            .await
            .map_err(|e| AgentError::RequestFailed(e.to_string()))?;

        debug!(model = %self.model, chars = result.text.len(), "completion received");
        Ok(result.text)
    }
}

/// Backoff between completion attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub max_attempts: u32,
    pub base: Duration,
}

impl Backoff {
    pub fn from_config(agent: &AgentConfig) -> Self {
        Self {
            max_attempts: agent.max_attempts.max(1),
            base: Duration::from_secs(agent.base_backoff_secs),
        }
    }

    /// Wait before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_secs(10),
        }
    }
}

/// Call the service, retrying transient failures with exponential backoff.
/// Permanent errors are returned as-is after the first attempt.
pub async fn complete_with_retry(
    service: &dyn CompletionService,
    instructions: &str,
    content: &str,
    backoff: Backoff,
) -> Result<String, AgentError> {
    let attempts = backoff.max_attempts.max(1);
    let mut last = String::new();
    for attempt in 1..=attempts {
        match service.complete(instructions, content).await {
            Ok(reply) => {
                if attempt > 1 {
                    info!(attempt, "completion succeeded after retry");
                }
                return Ok(reply);
            }
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                last = e.to_string();
                if attempt < attempts {
                    let delay = backoff.delay(attempt);
                    warn!(attempt, attempts, error = %e, ?delay, "completion failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(AgentError::Exhausted { attempts, last })
}

/// First balanced `{...}` span of `text`, ignoring braces inside strings.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a raw reply into a JSON object.
pub fn parse_reply(reply: &str) -> Result<Value, AgentError> {
    let span = extract_json(reply).ok_or(AgentError::NoJson)?;
    let value: Value = serde_json::from_str(span)
        .map_err(|e| AgentError::ParseError(format!("{}: {}", e, truncate(span, 200))))?;
    if !value.is_object() {
        return Err(AgentError::ParseError("reply is not an object".into()));
    }
    Ok(value)
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

/// Instructions sent ahead of every transcript.
pub fn build_instructions(persona: &str) -> String {
    let schema = schemars::schema_for!(CanonicalSummary);
    let schema = serde_json::to_string_pretty(&schema).unwrap_or_default();
    format!(
        r#"{persona}

Summarise the meeting transcript that follows.

You MUST respond with a single JSON object matching this schema:
{schema}

Rules:
- "date" is the meeting date as YYYY-MM-DD.
- "outline" is a list of {{"section": "...", "bullets": ["..."]}} topics.
- Scores are integers from 1 (lowest) to 10 (highest).
- Use "N/A" for unknown owners, due dates and citations.
- Only the james_grant_actions rows carry "james_grant_reference".

Do not include any markdown formatting or explanations. Only output the raw JSON object."#
    )
}

/// Parse a model string into a GeminiModel
fn parse_gemini_model(model: &str) -> GeminiModel {
    match model {
        "gemini-2.0-flash" => GeminiModel::Gemini20Flash,
        "gemini-2.5-flash" => GeminiModel::Gemini25Flash,
        "gemini-2.5-pro" => GeminiModel::Gemini25Pro,
        _ => GeminiModel::Gemini20Flash, // Default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl CompletionService for Flaky {
        async fn complete(&self, _: &str, _: &str) -> Result<String, AgentError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(AgentError::RequestFailed("503".into()))
            } else {
                Ok("{}".into())
            }
        }
    }

    struct Misconfigured {
        calls: AtomicU32,
    }

    #[async_trait]
    impl CompletionService for Misconfigured {
        async fn complete(&self, _: &str, _: &str) -> Result<String, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AgentError::UnsupportedProvider("openai".into()))
        }
    }

    #[test]
    fn test_extract_json_skips_prose_and_fences() {
        let reply = "Sure! Here it is:\n```json\n{\"a\": {\"b\": \"}\"}}\n```\n{\"c\": 1}";
        assert_eq!(extract_json(reply), Some("{\"a\": {\"b\": \"}\"}}"));
    }

    #[test]
    fn test_extract_json_handles_escaped_quotes() {
        let reply = r#"{"quote": "she said \"{hi}\""} trailing"#;
        assert_eq!(extract_json(reply), Some(r#"{"quote": "she said \"{hi}\""}"#));
    }

    #[test]
    fn test_extract_json_unbalanced() {
        assert_eq!(extract_json("{\"a\": 1"), None);
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_parse_reply_errors() {
        assert!(matches!(parse_reply("nothing"), Err(AgentError::NoJson)));
        assert!(matches!(
            parse_reply("{not json}"),
            Err(AgentError::ParseError(_))
        ));
        assert!(parse_reply("x {\"title\": \"t\"} y").unwrap().is_object());
    }

    #[test]
    fn test_backoff_doubles() {
        let backoff = Backoff {
            max_attempts: 3,
            base: Duration::from_secs(10),
        };
        assert_eq!(backoff.delay(1), Duration::from_secs(10));
        assert_eq!(backoff.delay(2), Duration::from_secs(20));
        assert_eq!(backoff.delay(3), Duration::from_secs(40));
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let service = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let backoff = Backoff {
            max_attempts: 3,
            base: Duration::from_millis(1),
        };
        let reply = complete_with_retry(&service, "i", "c", backoff).await.unwrap();
        assert_eq!(reply, "{}");
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let service = Flaky {
            failures: 5,
            calls: AtomicU32::new(0),
        };
        let backoff = Backoff {
            max_attempts: 2,
            base: Duration::from_millis(1),
        };
        let err = complete_with_retry(&service, "i", "c", backoff)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Exhausted { attempts: 2, .. }));
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let service = Misconfigured {
            calls: AtomicU32::new(0),
        };
        let backoff = Backoff {
            max_attempts: 3,
            base: Duration::from_secs(60),
        };
        let err = complete_with_retry(&service, "i", "c", backoff)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::UnsupportedProvider(_)));
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_transient_classification() {
        assert!(AgentError::RequestFailed("timeout".into()).is_transient());
        assert!(!AgentError::NoJson.is_transient());
        assert!(!AgentError::UnsupportedProvider("x".into()).is_transient());
        assert!(!AgentError::ParseError("bad".into()).is_transient());
    }

    #[test]
    fn test_instructions_embed_schema() {
        let text = build_instructions("You are a chief of staff.");
        assert!(text.starts_with("You are a chief of staff."));
        assert!(text.contains("key_takeaways"));
        assert!(text.contains("james_grant_reference"));
    }
}
