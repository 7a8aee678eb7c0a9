//! Mock provider for testing
//!
//! Returns queued responses without making real API calls, streamed as
//! word-sized fragments so streaming consumers see several chunks.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;

use super::{ChatRequest, ChatStream, ImageRequest, ModelProvider};
use crate::error::AigneError;

/// Mock provider that returns predefined responses
pub struct MockProvider {
    /// Queue of responses to return (FIFO); `Err` simulates an upstream failure
    responses: Mutex<VecDeque<Result<String, String>>>,
    /// Response when the queue is empty
    default_response: String,
    /// Every chat request made, for assertions
    requests: Mutex<Vec<ChatRequest>>,
    image_requests: Mutex<Vec<ImageRequest>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            default_response: "Mock response".to_string(),
            requests: Mutex::new(Vec::new()),
            image_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let provider = Self::new();
        for response in responses {
            provider.queue_response(response);
        }
        provider
    }

    pub fn with_default(mut self, response: impl Into<String>) -> Self {
        self.default_response = response.into();
        self
    }

    pub fn queue_response(&self, response: impl Into<String>) {
        self.responses.lock().push_back(Ok(response.into()));
    }

    /// Make the next call in queue order fail
    pub fn queue_failure(&self, reason: impl Into<String>) {
        self.responses.lock().push_back(Err(reason.into()));
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.requests.lock().last().cloned()
    }

    pub fn image_requests(&self) -> Vec<ImageRequest> {
        self.image_requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Split into fragments that keep their trailing whitespace
fn fragments(text: &str) -> Vec<String> {
    text.split_inclusive(char::is_whitespace)
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatStream, AigneError> {
        self.requests.lock().push(request);

        let next = self.responses.lock().pop_front();
        let text = match next {
            Some(Ok(text)) => text,
            Some(Err(reason)) => return Err(AigneError::upstream("mock", reason)),
            None => self.default_response.clone(),
        };

        Ok(stream::iter(fragments(&text).into_iter().map(Ok)).boxed())
    }

    async fn generate_images(&self, request: ImageRequest) -> Result<Vec<String>, AigneError> {
        let count = request.n;
        self.image_requests.lock().push(request);
        Ok((0..count).map(|i| format!("mock://image/{}", i)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::collect_text;

    #[tokio::test]
    async fn default_response() {
        let provider = MockProvider::new();
        let stream = provider.chat(ChatRequest::new("m").user("Hello")).await.unwrap();
        assert_eq!(collect_text(stream).await.unwrap(), "Mock response");
    }

    #[tokio::test]
    async fn queued_responses_then_default() {
        let provider = MockProvider::with_responses(["first", "second"]).with_default("fallback");
        let mut texts = Vec::new();
        for _ in 0..3 {
            let stream = provider.chat(ChatRequest::new("m").user("x")).await.unwrap();
            texts.push(collect_text(stream).await.unwrap());
        }
        assert_eq!(texts, vec!["first", "second", "fallback"]);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn streams_word_fragments() {
        let provider = MockProvider::with_responses(["one two  three"]);
        let stream = provider.chat(ChatRequest::new("m")).await.unwrap();
        let parts: Vec<String> = stream.map(Result::unwrap).collect().await;
        assert_eq!(parts, vec!["one ", "two ", " ", "three"]);
    }

    #[tokio::test]
    async fn queued_failure_is_upstream_error() {
        let provider = MockProvider::new();
        provider.queue_failure("overloaded");
        let result = provider.chat(ChatRequest::new("m")).await;
        assert!(matches!(result, Err(AigneError::Upstream { .. })));
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn records_image_requests() {
        let provider = MockProvider::new();
        let images = provider
            .generate_images(ImageRequest {
                prompt: "sunset".into(),
                model: None,
                n: 2,
                size: Some("512x512".into()),
            })
            .await
            .unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(provider.image_requests()[0].prompt, "sunset");
    }
}
