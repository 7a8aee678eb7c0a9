//! Language-model agent
//!
//! Renders the message templates, then either streams the completion as
//! `$text` fragments (`output_format: text`) or collects it and parses a JSON
//! object (`output_format: json`), retrying the whole call on malformed output.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{render_logged, text_output};
use crate::context::ExecutionContext;
use crate::definition::{LlmConfig, OutputFormat, RunnableDefinition};
use crate::error::AigneError;
use crate::event_log::EventKind;
use crate::provider::{collect_text, ChatRequest, ChatStream};
use crate::retry::retry;
use crate::runnable::{Output, RunOptions, RunOutput, Runnable, RunnableResponseDelta};

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("valid fence regex"));

pub struct LlmAgent {
    definition: Arc<RunnableDefinition>,
    config: LlmConfig,
}

impl LlmAgent {
    pub fn new(definition: Arc<RunnableDefinition>, config: LlmConfig) -> Self {
        Self { definition, config }
    }

    async fn build_request(&self, input: &Output, ctx: &ExecutionContext) -> Result<ChatRequest, AigneError> {
        let data = Value::Object(input.clone());
        let model = self
            .config
            .model
            .clone()
            .unwrap_or_else(|| ctx.config().model.clone());

        let mut request = ChatRequest::new(model);
        request.temperature = self.config.temperature;
        request.top_p = self.config.top_p;
        request.max_tokens = self.config.max_tokens;

        for message in &self.config.messages {
            let content = render_logged(&message.content, &data, ctx, &self.definition.id).await?;
            request = request.with_message(message.role, content);
        }
        Ok(request)
    }

    async fn call(&self, request: ChatRequest, ctx: &ExecutionContext) -> Result<ChatStream, AigneError> {
        ctx.event_log().emit(EventKind::ProviderCalled {
            agent_id: self.definition.id.as_str().into(),
            model: request.model.clone(),
            message_count: request.messages.len(),
        });
        ctx.collaborators().call_ai(request).await
    }

    async fn complete_text(&self, request: ChatRequest, ctx: &ExecutionContext) -> Result<String, AigneError> {
        let text = collect_text(self.call(request, ctx).await?).await?;
        ctx.event_log().emit(EventKind::ProviderResponded {
            agent_id: self.definition.id.as_str().into(),
            output_len: text.len(),
        });
        Ok(text)
    }

    async fn complete_json(&self, request: ChatRequest, ctx: &ExecutionContext) -> Result<Output, AigneError> {
        let text = self.complete_text(request, ctx).await?;
        parse_json_object(&text).map_err(|reason| AigneError::malformed(&self.definition.id, reason))
    }
}

/// Parse a JSON object, accepting a fenced code block around it
pub(crate) fn parse_json_object(text: &str) -> Result<Output, String> {
    let body = FENCED_JSON
        .captures(text)
        .and_then(|c| c.get(1))
        .map_or(text.trim(), |m| m.as_str());

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got: {}", other)),
        Err(e) => Err(format!("invalid JSON: {}", e)),
    }
}

#[async_trait]
impl Runnable for LlmAgent {
    fn definition(&self) -> &RunnableDefinition {
        &self.definition
    }

    #[instrument(name = "llm", skip(self, input, ctx), fields(agent = %self.definition.id, stream = options.stream))]
    async fn run(
        &self,
        input: Output,
        options: RunOptions,
        ctx: &ExecutionContext,
    ) -> Result<RunOutput, AigneError> {
        let request = self.build_request(&input, ctx).await?;
        debug!(model = %request.model, prompt_len = request.prompt_len(), "Calling model");

        match self.config.output_format {
            OutputFormat::Json => {
                let object = retry(self.config.max_retries, || self.complete_json(request.clone(), ctx)).await?;
                Ok(RunOutput::for_options(object, options))
            }
            OutputFormat::Text if options.stream => {
                let fragments = self.call(request, ctx).await?;
                let deltas = fragments.map(|fragment| fragment.map(RunnableResponseDelta::text));
                Ok(RunOutput::Stream(deltas.boxed()))
            }
            OutputFormat::Text => {
                let text = self.complete_text(request, ctx).await?;
                Ok(RunOutput::Complete(text_output(text)))
            }
        }
    }
}
