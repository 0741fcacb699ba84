//! The remote reasoning service.
//!
//! Both model calls go through [`LlmProvider`]; nothing else in the crate
//! performs network I/O. A call takes a list of messages plus the
//! [`ModelSettings`] for its stage and returns free-form text. Recovering
//! structure from that text is `crcheck-core`'s job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::time::Duration;
use thiserror::Error;

use crate::config::ModelSettings;

pub mod secrets;

#[cfg(feature = "anthropic")]
mod anthropic;

pub use secrets::{ApiKey, KeyOrigin};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicProvider, ANTHROPIC_API_KEY_ENV, DEFAULT_BASE_URL};

/// A failed call to the reasoning service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Unreadable response body: {0}")]
    MalformedBody(String),

    #[error("API key rejected")]
    Unauthorized,

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Transient failures worth another attempt. Server errors, 408 and 429
    /// qualify; other 4xx responses and credential problems do not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transport(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::MalformedBody(_)
            | ProviderError::Timeout(_) => true,
            ProviderError::Api { status, .. } => *status >= 500 || *status == 408,
            ProviderError::Unauthorized | ProviderError::NotConfigured(_) => false,
        }
    }
}

/// Who a message is from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Text returned by one call.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
    /// Model that actually served the call
    pub model: String,
    pub stop_reason: Option<String>,
}

impl Completion {
    /// Generation stopped at the output token limit, so the text is cut off.
    pub fn is_truncated(&self) -> bool {
        self.stop_reason.as_deref() == Some("max_tokens")
    }
}

/// Token counts reported for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_read_tokens: u32,
    pub cache_write_tokens: u32,
}

impl TokenUsage {
    /// Billed input plus output; cache traffic is counted separately.
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
        self.cache_read_tokens += rhs.cache_read_tokens;
        self.cache_write_tokens += rhs.cache_write_tokens;
    }
}

/// A text-generation backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        settings: &ModelSettings,
    ) -> Result<Completion, ProviderError>;

    /// Short identifier used in logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_serialize_lowercase() {
        let json = serde_json::to_value(ChatMessage::system("rules")).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(ChatMessage::user("article").role, Role::User);
    }

    #[test]
    fn test_usage_adds_up() {
        let mut usage = TokenUsage {
            input_tokens: 100,
            output_tokens: 50,
            ..Default::default()
        };
        usage += TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            cache_read_tokens: 900,
            cache_write_tokens: 0,
        };
        assert_eq!(usage.total(), 165);
        assert_eq!(usage.cache_read_tokens, 900);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ProviderError::Transport("connection reset".into()).is_retryable());
        assert!(ProviderError::RateLimited { retry_after: None }.is_retryable());
        assert!(ProviderError::Timeout(Duration::from_secs(60)).is_retryable());
        assert!(ProviderError::Api { status: 529, message: "overloaded".into() }.is_retryable());
        assert!(ProviderError::Api { status: 408, message: "timeout".into() }.is_retryable());

        assert!(!ProviderError::Unauthorized.is_retryable());
        assert!(!ProviderError::NotConfigured("no key".into()).is_retryable());
        assert!(!ProviderError::Api { status: 400, message: "bad request".into() }.is_retryable());
    }
}
