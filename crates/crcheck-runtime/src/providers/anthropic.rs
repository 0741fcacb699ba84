//! Anthropic Messages API backend.

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ApiKey, ChatMessage, Completion, LlmProvider, ProviderError, Role, TokenUsage};
use crate::config::ModelSettings;

pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

const API_VERSION: &str = "2023-06-01";

/// Longest error body excerpt carried into [`ProviderError::Api`].
const ERROR_EXCERPT_CHARS: usize = 300;

#[derive(Debug)]
pub struct AnthropicProvider {
    key: ApiKey,
    endpoint: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(key: ApiKey, base_url: &str) -> Result<Self, ProviderError> {
        let url = reqwest::Url::parse(base_url)
            .map_err(|e| ProviderError::NotConfigured(format!("invalid base_url {base_url:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ProviderError::NotConfigured(format!(
                "base_url must be http or https, got {}",
                url.scheme()
            )));
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("crcheck/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(Self {
            key,
            endpoint: format!("{}/messages", base_url.trim_end_matches('/')),
            client,
        })
    }

    /// Key from config, else `$ANTHROPIC_API_KEY`.
    pub fn connect(api_key: Option<&str>, base_url: &str) -> Result<Self, ProviderError> {
        Self::new(ApiKey::resolve(api_key, ANTHROPIC_API_KEY_ENV)?, base_url)
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    system: Vec<SystemBlock<'a>>,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct SystemBlock<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum CacheControl {
    Ephemeral,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
    #[serde(default)]
    cache_read_input_tokens: u32,
    #[serde(default)]
    cache_creation_input_tokens: u32,
}

impl From<WireUsage> for TokenUsage {
    fn from(u: WireUsage) -> Self {
        TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            cache_read_tokens: u.cache_read_input_tokens,
            cache_write_tokens: u.cache_creation_input_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// System messages become top-level blocks; the last one carries the cache
/// breakpoint when caching is on.
fn build_body<'a>(messages: &'a [ChatMessage], settings: &'a ModelSettings) -> MessagesRequest<'a> {
    let (system, conversation): (Vec<&ChatMessage>, Vec<&ChatMessage>) =
        messages.iter().partition(|m| m.role == Role::System);

    let last_system = system.len().saturating_sub(1);
    let system = system
        .into_iter()
        .enumerate()
        .map(|(i, m)| SystemBlock {
            kind: "text",
            text: &m.content,
            cache_control: (settings.prompt_caching && i == last_system).then_some(CacheControl::Ephemeral),
        })
        .collect();

    MessagesRequest {
        model: &settings.model,
        max_tokens: settings.max_tokens,
        temperature: settings.temperature,
        system,
        messages: conversation
            .into_iter()
            .map(|m| WireMessage {
                role: m.role,
                content: &m.content,
            })
            .collect(),
    }
}

fn read_completion(body: &str) -> Result<Completion, ProviderError> {
    let parsed: MessagesResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::MalformedBody(e.to_string()))?;

    let text = parsed
        .content
        .into_iter()
        .filter_map(|block| match block {
            ResponseBlock::Text { text } => Some(text),
            ResponseBlock::Other => None,
        })
        .collect::<String>();

    Ok(Completion {
        text,
        usage: parsed.usage.into(),
        model: parsed.model,
        stop_reason: parsed.stop_reason,
    })
}

fn status_error(status: u16, retry_after: Option<Duration>, body: &str) -> ProviderError {
    match status {
        401 | 403 => ProviderError::Unauthorized,
        429 => ProviderError::RateLimited { retry_after },
        _ => {
            let message = serde_json::from_str::<ErrorEnvelope>(body)
                .map(|envelope| envelope.error.message)
                .unwrap_or_else(|_| body.chars().take(ERROR_EXCERPT_CHARS).collect());
            ProviderError::Api { status, message }
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        settings: &ModelSettings,
    ) -> Result<Completion, ProviderError> {
        let body = build_body(&messages, settings);
        tracing::debug!(model = %settings.model, messages = body.messages.len(), "Calling Anthropic");

        let transport = |e: reqwest::Error| {
            if e.is_timeout() {
                ProviderError::Timeout(settings.timeout)
            } else {
                ProviderError::Transport(e.to_string())
            }
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", self.key.expose())
            .header("anthropic-version", API_VERSION)
            .timeout(settings.timeout)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = response.text().await.map_err(transport)?;

        if !status.is_success() {
            return Err(status_error(status.as_u16(), retry_after, &text));
        }
        read_completion(&text)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}
