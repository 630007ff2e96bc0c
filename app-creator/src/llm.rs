//! Text-completion capability and the HTTP client that provides it.
//!
//! The workflow engine only ever sees the [`Completion`] trait: a stateless
//! prompt-in, text-out function. [`LlmClient`] implements it against either the
//! Anthropic Messages API or any OpenAI-compatible `/chat/completions` server
//! (LM Studio, llama.cpp server, vLLM, ...).

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_OPENAI_BASE_URL: &str = "http://localhost:1234/v1";

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";

const DEFAULT_SYSTEM: &str = "You are an expert software engineer. Follow the output format you are asked for exactly.";

/// Failure of a single completion call.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("API error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),
}

impl CompletionError {
    /// Whether another attempt at the same call could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            CompletionError::Transport(_)
            | CompletionError::RateLimited { .. }
            | CompletionError::Timeout(_) => true,
            CompletionError::Http { status, .. } => *status >= 500,
            CompletionError::Auth(_) | CompletionError::Malformed(_) => false,
        }
    }
}

/// A stateless text-in/text-out model.
pub trait Completion: Send + Sync {
    fn complete(
        &self,
        prompt: &str,
    ) -> impl Future<Output = Result<String, CompletionError>> + Send;
}

impl<T: Completion> Completion for &T {
    fn complete(
        &self,
        prompt: &str,
    ) -> impl Future<Output = Result<String, CompletionError>> + Send {
        (**self).complete(prompt)
    }
}

/// Which wire protocol the client speaks.
#[derive(Debug, Clone)]
pub enum Provider {
    Anthropic { api_key: String },
    OpenAiCompatible {
        base_url: String,
        api_key: Option<String>,
    },
}

// ── Anthropic wire types ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

// ── OpenAI-compatible wire types ──────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// HTTP completion client.
#[derive(Debug, Clone)]
pub struct LlmClient {
    provider: Provider,
    model: String,
    system: String,
    max_tokens: u32,
    temperature: f32,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(provider: Provider) -> Self {
        let model = match provider {
            Provider::Anthropic { .. } => DEFAULT_ANTHROPIC_MODEL.to_string(),
            Provider::OpenAiCompatible { .. } => "local-model".to_string(),
        };
        Self {
            provider,
            model,
            system: DEFAULT_SYSTEM.to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete_anthropic(
        &self,
        api_key: &str,
        prompt: &str,
    ) -> Result<String, CompletionError> {
        let body = serde_json::json!({
            "model": &self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "system": &self.system,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let resp = self
            .http
            .post(ANTHROPIC_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;
        let resp = check_status(resp).await?;

        let parsed: AnthropicResponse = resp
            .json()
            .await
            .map_err(|e| CompletionError::Malformed(e.to_string()))?;
        let text = parsed
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            return Err(CompletionError::Malformed(
                "response has no text blocks".to_string(),
            ));
        }
        Ok(text)
    }

    async fn complete_openai(
        &self,
        base_url: &str,
        api_key: Option<&str>,
        prompt: &str,
    ) -> Result<String, CompletionError> {
        let body = serde_json::json!({
            "model": &self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": &self.system },
                { "role": "user", "content": prompt },
            ],
        });

        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let mut req = self
            .http
            .post(url)
            .header("content-type", "application/json")
            .json(&body);
        if let Some(key) = api_key {
            req = req.bearer_auth(key);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;
        let resp = check_status(resp).await?;

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| CompletionError::Malformed(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CompletionError::Malformed("response has no choices".to_string()))
    }
}

impl Completion for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        tracing::debug!(model = %self.model, prompt_len = prompt.len(), "Requesting completion");
        match &self.provider {
            Provider::Anthropic { api_key } => self.complete_anthropic(api_key, prompt).await,
            Provider::OpenAiCompatible { base_url, api_key } => {
                self.complete_openai(base_url, api_key.as_deref(), prompt)
                    .await
            }
        }
    }
}

/// Map a non-success HTTP status to the matching [`CompletionError`].
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, CompletionError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = resp.text().await.unwrap_or_default();
    Err(classify_status(status.as_u16(), retry_after, body))
}

fn classify_status(status: u16, retry_after: Option<u64>, body: String) -> CompletionError {
    match status {
        401 | 403 => CompletionError::Auth(body),
        429 => CompletionError::RateLimited { retry_after },
        _ => CompletionError::Http { status, body },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(401, None, "bad key".into()),
            CompletionError::Auth(_)
        ));
        assert!(matches!(
            classify_status(429, Some(7), String::new()),
            CompletionError::RateLimited { retry_after: Some(7) }
        ));
        assert!(matches!(
            classify_status(502, None, "gateway".into()),
            CompletionError::Http { status: 502, .. }
        ));
    }

    #[test]
    fn retryable_errors() {
        assert!(CompletionError::Transport("reset".into()).is_retryable());
        assert!(CompletionError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(CompletionError::Http { status: 503, body: String::new() }.is_retryable());
        assert!(!CompletionError::Http { status: 400, body: String::new() }.is_retryable());
        assert!(!CompletionError::Auth(String::new()).is_retryable());
        assert!(!CompletionError::Malformed(String::new()).is_retryable());
    }

    #[test]
    fn parses_anthropic_text_blocks() {
        let raw = r#"{"content":[{"type":"text","text":"Looks "},{"type":"tool_use","id":"x","name":"y","input":{}},{"type":"text","text":"great"}]}"#;
        let resp: AnthropicResponse = serde_json::from_str(raw).unwrap();
        let text: String = resp
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect();
        assert_eq!(text, "Looks great");
    }

    #[test]
    fn parses_openai_choices() {
        let raw = r#"{"id":"1","choices":[{"index":0,"message":{"role":"assistant","content":"hi"}}]}"#;
        let resp: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("hi"));
    }

    #[test]
    fn default_models() {
        let c = LlmClient::new(Provider::Anthropic { api_key: "k".into() });
        assert_eq!(c.model(), DEFAULT_ANTHROPIC_MODEL);
        let c = LlmClient::new(Provider::OpenAiCompatible {
            base_url: DEFAULT_OPENAI_BASE_URL.into(),
            api_key: None,
        })
        .with_model("qwen2.5-coder");
        assert_eq!(c.model(), "qwen2.5-coder");
    }
}
