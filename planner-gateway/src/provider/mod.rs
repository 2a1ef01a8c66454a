//! Generation provider abstraction.
//!
//! A provider takes the prior conversation turns plus the new user turn and
//! returns the model's reply text. The composer only depends on the
//! [`Provider`] trait; [`GeminiProvider`] is the production implementation.

mod gemini;

pub use gemini::GeminiProvider;

use async_trait::async_trait;
use planner_common::config::GeminiConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// Provider Trait
// ============================================================================

/// Unified interface for LLM providers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Send a chat completion request.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// Error from a provider.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub provider: String,
    pub model: String,
    pub message: String,
    pub status_code: Option<u16>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{}] {}", self.provider, self.model, self.message)
    }
}

impl std::error::Error for ProviderError {}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Role string for turns written by the user.
pub const ROLE_USER: &str = "user";
/// Role string for turns written by the model.
pub const ROLE_MODEL: &str = "model";

/// Unified chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model to use
    pub model: String,
    /// Prior turns followed by the turn being sent
    pub messages: Vec<Message>,
    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl ChatRequest {
    /// Start a chat from prior turns and send one more user message.
    pub fn new(model: impl Into<String>, history: Vec<Message>, message: impl Into<String>) -> Self {
        let mut messages = history;
        messages.push(Message::user(message));
        Self {
            model: model.into(),
            messages,
            max_tokens: None,
            temperature: None,
        }
    }

    /// Apply sampling settings; `None` leaves the API default in place.
    pub fn with_sampling(mut self, temperature: Option<f64>, max_tokens: Option<i64>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// The turn being sent, i.e. the last message.
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ROLE_USER.into(),
            content: content.into(),
        }
    }

    pub fn model(content: impl Into<String>) -> Self {
        Self {
            role: ROLE_MODEL.into(),
            content: content.into(),
        }
    }
}

/// Unified chat response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Provider name
    pub provider: String,
    /// Model used
    pub model: String,
    /// Response content
    pub content: String,
    /// Token usage
    pub usage: TokenUsage,
    /// Finish reason
    pub finish_reason: Option<String>,
    /// Response latency in milliseconds
    pub latency_ms: u64,
}

/// Token usage information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}

/// Build the generation provider, or `None` when no API key is configured.
pub fn create_provider(config: &GeminiConfig) -> Option<Arc<dyn Provider>> {
    let Some(key) = config.api_key() else {
        tracing::warn!("GEMINI_API_KEY not set, generation disabled");
        return None;
    };

    let provider = GeminiProvider::new(key).with_base_url(&config.base_url);
    tracing::info!(model = %config.model, "Gemini provider configured");
    Some(Arc::new(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_appends_user_turn() {
        let request = ChatRequest::new(
            "gemini-1.5-flash",
            vec![Message::user("hi"), Message::model("hello")],
            "how are you?",
        );

        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.last_message(), Some(&Message::user("how are you?")));
        assert_eq!(request.messages[1].role, "model");
    }

    #[test]
    fn test_chat_request_serialization() {
        let request = ChatRequest::new("gemini-1.5-flash", Vec::new(), "Hello");
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("gemini-1.5-flash"));
        assert!(json.contains("Hello"));
        assert!(!json.contains("max_tokens"));

        let json = serde_json::to_string(&request.with_sampling(Some(0.2), Some(256))).unwrap();
        assert!(json.contains(r#""max_tokens":256"#));
        assert!(json.contains(r#""temperature":0.2"#));
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError {
            provider: "gemini".into(),
            model: "gemini-1.5-flash".into(),
            message: "boom".into(),
            status_code: Some(500),
        };
        assert_eq!(err.to_string(), "[gemini:gemini-1.5-flash] boom");
    }

    #[test]
    fn test_create_provider_requires_key() {
        let mut config = GeminiConfig::default();
        assert!(create_provider(&config).is_none());

        config.api_key = Some(String::new());
        assert!(create_provider(&config).is_none());

        config.api_key = Some("key".into());
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.name(), "gemini");
    }
}
