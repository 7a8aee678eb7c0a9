//! OpenAI-compatible provider
//!
//! Streams chat completions over SSE and generates images through
//! `/images/generations`. Works against any server exposing the same API.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::{ChatMessage, ChatRequest, ChatStream, ImageRequest, ModelProvider};
use crate::error::AigneError;
use crate::sse;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAIProvider {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post<T: Serialize>(&self, url: &str, payload: &T) -> Result<reqwest::Response, AigneError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(provider = "openai", status = %status, error = %body, "OpenAI API error");
            return Err(AigneError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
                message: api_error_message(&body),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ModelProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatStream, AigneError> {
        let payload = ChatCompletionRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_tokens,
            stream: true,
        };

        tracing::debug!(
            provider = "openai",
            model = %request.model,
            messages_count = request.messages.len(),
            "Sending streaming chat request"
        );

        let response = self.post(&self.endpoint("chat/completions"), &payload).await?;

        let fragments = sse::data_lines(Box::pin(response.bytes_stream())).filter_map(|line| async move {
            match line {
                Err(err) => Some(Err(err)),
                Ok(data) => match serde_json::from_str::<ChatCompletionChunk>(&data) {
                    Ok(chunk) => chunk
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|choice| choice.delta.content)
                        .filter(|content| !content.is_empty())
                        .map(Ok),
                    Err(err) => Some(Err(AigneError::malformed("openai", err))),
                },
            }
        });

        Ok(fragments.boxed())
    }

    async fn generate_images(&self, request: ImageRequest) -> Result<Vec<String>, AigneError> {
        let payload = ImageGenerationRequest {
            prompt: &request.prompt,
            model: request.model.as_deref(),
            n: request.n,
            size: request.size.as_deref(),
        };

        let response = self.post(&self.endpoint("images/generations"), &payload).await?;
        let body: ImageGenerationResponse = response
            .json()
            .await
            .map_err(|e| AigneError::malformed("openai", e))?;

        Ok(body
            .data
            .into_iter()
            .filter_map(|image| {
                image
                    .url
                    .or_else(|| image.b64_json.map(|b64| format!("data:image/png;base64,{}", b64)))
            })
            .collect())
    }
}

/// `error.message` from an OpenAI error body, or the raw body
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

// ============================================================================
// API TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageGenerationRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    n: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ImageGenerationResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: Option<String>,
    b64_json: Option<String>,
}
