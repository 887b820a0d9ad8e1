//! LLM-backed scoring oracle.
//!
//! Talks to an OpenAI-compatible chat-completions endpoint (Together AI by
//! default). The client owns everything the engine must never worry about:
//! rate limiting between calls, bounded retries with backoff, per-process
//! caches for evaluations and generated candidates, and neutral fallbacks
//! when the model misbehaves.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::oracle::{OracleError, ScoringOracle};

const DEFAULT_BASE_URL: &str = "https://api.together.xyz/v1";
const DEFAULT_MODEL: &str = "meta-llama/Llama-3.3-70B-Instruct-Turbo-Free";

const DEFAULT_EVALUATION_PROMPT: &str = "You are an expert negotiation evaluator. \
    Given a conversation state with a goal and message history, \
    evaluate how well the conversation is progressing towards \
    achieving the negotiation goal on a scale from 0 to 1.";

const DEFAULT_GENERATION_PROMPT: &str = "You are an expert negotiator. \
    Generate strategic responses that are professional, persuasive, and goal-oriented. \
    Consider the context and history to craft effective messages \
    that move towards the negotiation goal.";

/// Score returned when the model's answer cannot be parsed or the API stays
/// unreachable: neutral, neither attractive nor repulsive to the search.
const NEUTRAL_SCORE: f64 = 0.5;

/// Configuration of the LLM client.
#[derive(Debug, Clone)]
pub struct LlmOracleConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub evaluation_prompt: String,
    pub generation_prompt: String,

    /// Minimum delay between two API calls.
    pub min_delay: Duration,

    /// Attempts per logical call before giving up.
    pub max_retries: usize,

    /// Base backoff delay, multiplied by the attempt number.
    pub retry_delay: Duration,

    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for LlmOracleConfig {
    fn default() -> Self {
        LlmOracleConfig {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            evaluation_prompt: DEFAULT_EVALUATION_PROMPT.to_string(),
            generation_prompt: DEFAULT_GENERATION_PROMPT.to_string(),
            min_delay: Duration::from_millis(100),
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Scoring oracle backed by a hosted text-generation service.
#[derive(Debug)]
pub struct LlmOracle {
    client: reqwest::Client,
    config: LlmOracleConfig,
    last_call: Mutex<Option<Instant>>,
    evaluation_cache: Mutex<HashMap<String, f64>>,
    generation_cache: Mutex<HashMap<String, Vec<String>>>,
}

impl LlmOracle {
    pub fn new(config: LlmOracleConfig) -> Result<Self, OracleError> {
        if config.api_key.is_empty() {
            return Err(OracleError::MissingApiKey);
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(LlmOracle {
            client,
            config,
            last_call: Mutex::new(None),
            evaluation_cache: Mutex::new(HashMap::new()),
            generation_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Serialises API calls and enforces the configured minimum delay.
    async fn rate_limit(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.config.min_delay {
                tokio::time::sleep(self.config.min_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn call_api(
        &self,
        messages: &[ChatMessage],
        temperature: f64,
        max_tokens: Option<u32>,
    ) -> Result<String, OracleError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let mut last_error = None;

        for attempt in 1..=self.config.max_retries {
            self.rate_limit().await;
            match self.try_call(&url, messages, temperature, max_tokens).await {
                Ok(content) => return Ok(content),
                Err(e) => {
                    log::warn!(
                        "oracle API call attempt {attempt}/{} failed: {e}",
                        self.config.max_retries
                    );
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(self.config.retry_delay * attempt as u32).await;
                    }
                }
            }
        }

        Err(OracleError::RetriesExhausted {
            attempts: self.config.max_retries,
            source: Box::new(
                last_error.unwrap_or(OracleError::Malformed("no attempts were made".to_string())),
            ),
        })
    }

    async fn try_call(
        &self,
        url: &str,
        messages: &[ChatMessage],
        temperature: f64,
        max_tokens: Option<u32>,
    ) -> Result<String, OracleError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(&ChatRequest {
                model: &self.config.model,
                messages,
                temperature,
                max_tokens,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body: ChatResponse = response.json().await?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| OracleError::Malformed("response carried no choices".to_string()))?;
        Ok(choice.message.content.trim().to_string())
    }
}

#[async_trait]
impl ScoringOracle for LlmOracle {
    async fn evaluate(&self, state_description: &str) -> Result<f64, OracleError> {
        if let Some(&cached) = self.evaluation_cache.lock().await.get(state_description) {
            return Ok(cached);
        }

        let messages = [
            ChatMessage::system(&self.config.evaluation_prompt),
            ChatMessage::user(format!(
                "Evaluate this conversation state:\n{state_description}\n\n\
                 Consider:\n\
                 1. Progress toward goal\n\
                 2. Professional tone\n\
                 3. Strategic effectiveness\n\n\
                 Respond with ONLY a number between 0 and 1."
            )),
        ];

        let value = match self.call_api(&messages, 0.1, None).await {
            Ok(raw) => match parse_score(&raw) {
                Some(value) => value,
                None => {
                    log::warn!("could not parse evaluation from oracle result: {raw}");
                    NEUTRAL_SCORE
                }
            },
            Err(e) => {
                log::error!("state evaluation failed, using neutral score: {e}");
                NEUTRAL_SCORE
            }
        };

        self.evaluation_cache
            .lock()
            .await
            .insert(state_description.to_string(), value);
        Ok(value)
    }

    async fn generate_actions(
        &self,
        state_description: &str,
        count: usize,
    ) -> Result<Vec<String>, OracleError> {
        if let Some(cached) = self.generation_cache.lock().await.get(state_description) {
            return Ok(cached.clone());
        }

        let messages = [
            ChatMessage::system(&self.config.generation_prompt),
            ChatMessage::user(format!(
                "Given this conversation state:\n{state_description}\n\n\
                 Generate {count} different possible responses \
                 that would help achieve the conversation goal. \
                 Each response should be strategic and different.\n\
                 Format: Return ONLY the responses, one per line."
            )),
        ];

        let actions = match self.call_api(&messages, 0.7, Some(150)).await {
            Ok(raw) => raw
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .take(count)
                .map(str::to_string)
                .collect(),
            Err(e) => {
                log::error!("response generation failed, using fallbacks: {e}");
                fallback_actions(count)
            }
        };

        self.generation_cache
            .lock()
            .await
            .insert(state_description.to_string(), actions.clone());
        Ok(actions)
    }
}

/// Parses the model's scalar answer, clamped into `[0, 1]`.
fn parse_score(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().map(|v| v.clamp(0.0, 1.0))
}

/// Canned replies used when generation keeps failing.
fn fallback_actions(count: usize) -> Vec<String> {
    [
        "I need more information to proceed.",
        "Could we clarify the current situation?",
        "Let's discuss this further.",
    ]
    .iter()
    .take(count)
    .map(|s| s.to_string())
    .collect()
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn system(content: &str) -> Self {
        ChatMessage {
            role: "system".to_string(),
            content: content.to_string(),
        }
    }

    fn user(content: String) -> Self {
        ChatMessage {
            role: "user".to_string(),
            content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_score_accepts_plain_numbers() {
        assert_eq!(parse_score("0.8"), Some(0.8));
        assert_eq!(parse_score("  0.25\n"), Some(0.25));
        assert_eq!(parse_score("1"), Some(1.0));
    }

    #[test]
    fn test_parse_score_clamps_out_of_range() {
        assert_eq!(parse_score("1.7"), Some(1.0));
        assert_eq!(parse_score("-0.3"), Some(0.0));
    }

    #[test]
    fn test_parse_score_rejects_prose() {
        assert_eq!(parse_score("I would say 0.8"), None);
        assert_eq!(parse_score(""), None);
    }

    #[test]
    fn test_fallback_actions_respect_count() {
        assert_eq!(fallback_actions(2).len(), 2);
        assert_eq!(fallback_actions(3).len(), 3);
        assert_eq!(fallback_actions(10).len(), 3);
    }

    #[test]
    fn test_new_rejects_missing_api_key() {
        let result = LlmOracle::new(LlmOracleConfig::default());
        assert_matches!(result, Err(OracleError::MissingApiKey));
    }

    #[test]
    fn test_config_defaults() {
        let config = LlmOracleConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.min_delay, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_cached_evaluation_skips_the_api() {
        let oracle = LlmOracle::new(LlmOracleConfig {
            api_key: "test-key".to_string(),
            ..LlmOracleConfig::default()
        })
        .unwrap();

        oracle
            .evaluation_cache
            .lock()
            .await
            .insert("state".to_string(), 0.9);

        // No server is running anywhere; only the cache can answer.
        let value = oracle.evaluate("state").await.unwrap();
        assert!((value - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_chat_request_serialization_omits_absent_max_tokens() {
        let messages = [ChatMessage::system("sys")];
        let request = ChatRequest {
            model: "m",
            messages: &messages,
            temperature: 0.1,
            max_tokens: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("max_tokens").is_none());
        assert_eq!(json["messages"][0]["role"], "system");
    }
}
