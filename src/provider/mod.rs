//! # Model providers
//!
//! How the runtime talks to language and image models.
//!
//! - [`ModelProvider`] - streaming chat and image generation
//! - [`OpenAIProvider`] - OpenAI-compatible HTTP API (chat completions with SSE)
//! - [`MockProvider`] - queued responses for tests and offline runs
//!
//! ## Available Providers
//!
//! | Provider | Use Case | Requires |
//! |----------|----------|----------|
//! | `openai` | Production | `OPENAI_API_KEY` or `[openai] api_key` |
//! | `mock` | Testing | Nothing |
//!
//! Chat responses are streams of text fragments. Dropping the stream drops
//! the underlying HTTP response, which closes the connection.

mod mock;
mod openai;

pub use mock::MockProvider;
pub use openai::OpenAIProvider;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;

use crate::config::RuntimeConfig;
use crate::definition::Role;
use crate::error::AigneError;

/// Stream of completion text fragments
pub type ChatStream = BoxStream<'static, Result<String, AigneError>>;

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g., "openai", "mock")
    fn name(&self) -> &str;

    /// Start a chat completion and stream its text
    async fn chat(&self, request: ChatRequest) -> Result<ChatStream, AigneError>;

    /// Generate images, returning URLs or data URIs
    async fn generate_images(&self, request: ImageRequest) -> Result<Vec<String>, AigneError> {
        let _ = request;
        Err(AigneError::Unsupported {
            service: self.name().to_string(),
            capability: "Image generation".to_string(),
        })
    }
}

// ============================================================================
// REQUEST TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            temperature: None,
            top_p: None,
            max_tokens: None,
        }
    }

    pub fn with_message(mut self, role: Role, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage {
            role,
            content: content.into(),
        });
        self
    }

    pub fn system(self, content: impl Into<String>) -> Self {
        self.with_message(Role::System, content)
    }

    pub fn user(self, content: impl Into<String>) -> Self {
        self.with_message(Role::User, content)
    }

    /// Total characters across all messages
    pub fn prompt_len(&self) -> usize {
        self.messages.iter().map(|m| m.content.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub n: u32,
    pub size: Option<String>,
}

/// Concatenate a chat stream
pub async fn collect_text(mut stream: ChatStream) -> Result<String, AigneError> {
    let mut text = String::new();
    while let Some(fragment) = stream.next().await {
        text.push_str(&fragment?);
    }
    Ok(text)
}

// ============================================================================
// PROVIDER FACTORY
// ============================================================================

/// Create a provider instance by name
///
/// | Name | Description |
/// |------|-------------|
/// | `openai` | OpenAI-compatible API at `[openai] base_url` |
/// | `mock` | Echo provider with no configured responses |
pub fn create_provider(
    name: &str,
    config: &RuntimeConfig,
    client: reqwest::Client,
) -> Result<Arc<dyn ModelProvider>, AigneError> {
    match name.to_lowercase().as_str() {
        "openai" => {
            let api_key = config.openai.api_key.clone().ok_or_else(|| AigneError::Config {
                reason: "OPENAI_API_KEY is not set".to_string(),
            })?;
            Ok(Arc::new(
                OpenAIProvider::new(client, api_key).with_base_url(&config.openai.base_url),
            ))
        }
        "mock" => Ok(Arc::new(MockProvider::new())),
        _ => Err(AigneError::Config {
            reason: format!("Unknown provider: '{}'. Available: openai, mock", name),
        }),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn request_builder() {
        let request = ChatRequest::new("gpt-4o")
            .system("Be brief")
            .user("Hello");
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.prompt_len(), "Be brief".len() + "Hello".len());
    }

    #[test]
    fn factory_by_name() {
        let client = reqwest::Client::new();
        let mut config = RuntimeConfig::default();

        assert!(create_provider("MOCK", &config, client.clone()).is_ok());
        assert!(create_provider("openai", &config, client.clone()).is_err());
        config.openai.api_key = Some("sk-test".into());
        assert_eq!(
            create_provider("openai", &config, client.clone()).unwrap().name(),
            "openai"
        );
        assert!(create_provider("nope", &config, client).is_err());
    }

    #[tokio::test]
    async fn collect_text_concatenates_and_fails_fast() {
        let ok: ChatStream = stream::iter(vec![Ok("a".to_string()), Ok("b".to_string())]).boxed();
        assert_eq!(collect_text(ok).await.unwrap(), "ab");

        let failing: ChatStream = stream::iter(vec![
            Ok("a".to_string()),
            Err(AigneError::upstream("mock", "cut")),
        ])
        .boxed();
        assert!(collect_text(failing).await.is_err());
    }
}
