//! HTTP API agent
//!
//! URL, header and body templates are rendered against the input plus the
//! declared secrets (`{{secrets.NAME}}`), then sent with the shared client.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use super::{render, render_logged, text_output};
use crate::context::ExecutionContext;
use crate::definition::{ApiConfig, RunnableDefinition};
use crate::error::AigneError;
use crate::runnable::{Output, RunOptions, RunOutput, Runnable};

pub struct ApiAgent {
    definition: Arc<RunnableDefinition>,
    config: ApiConfig,
}

impl ApiAgent {
    pub fn new(definition: Arc<RunnableDefinition>, config: ApiConfig) -> Self {
        Self { definition, config }
    }

    async fn secrets(&self, ctx: &ExecutionContext) -> Result<Map<String, Value>, AigneError> {
        let mut secrets = Map::new();
        for name in &self.config.secrets {
            let value = ctx
                .collaborators()
                .get_secret(ctx.project_id(), name)
                .await?
                .ok_or_else(|| AigneError::MissingSecret {
                    agent_id: self.definition.id.clone(),
                    name: name.clone(),
                })?;
            secrets.insert(name.clone(), Value::String(value));
        }
        Ok(secrets)
    }

    /// Rendered text only reaches the event log when no secret is in scope
    async fn render_field(&self, source: &str, data: &Value, ctx: &ExecutionContext) -> Result<String, AigneError> {
        if self.config.secrets.is_empty() {
            render_logged(source, data, ctx, &self.definition.id).await
        } else {
            render(source, data, ctx).await
        }
    }

    fn method(&self) -> Result<Method, AigneError> {
        Method::from_bytes(self.config.method.to_uppercase().as_bytes()).map_err(|_| {
            AigneError::invalid_definition(
                &self.definition.id,
                format!("unknown HTTP method '{}'", self.config.method),
            )
        })
    }
}

#[async_trait]
impl Runnable for ApiAgent {
    fn definition(&self) -> &RunnableDefinition {
        &self.definition
    }

    #[instrument(name = "api", skip(self, input, ctx), fields(agent = %self.definition.id))]
    async fn run(
        &self,
        input: Output,
        options: RunOptions,
        ctx: &ExecutionContext,
    ) -> Result<RunOutput, AigneError> {
        let method = self.method()?;
        let mut data = input;
        data.insert("secrets".to_string(), Value::Object(self.secrets(ctx).await?));
        let data = Value::Object(data);

        let url = self.render_field(&self.config.url, &data, ctx).await?;
        let mut request = ctx.http().request(method.clone(), &url);
        for (name, template) in &self.config.headers {
            let value = self.render_field(template, &data, ctx).await?;
            request = request.header(name.as_str(), value);
        }
        if let Some(body) = &self.config.body {
            let rendered = self.render_field(body, &data, ctx).await?;
            request = match serde_json::from_str::<Value>(&rendered) {
                Ok(json) => request.json(&json),
                Err(_) => request.body(rendered),
            };
        }

        debug!(method = %method, url = %url, "Sending API request");
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(AigneError::HttpStatus {
                status: status.as_u16(),
                url,
                message: text,
            });
        }

        let output = match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => map,
            _ => text_output(text),
        };
        Ok(RunOutput::for_options(output, options))
    }
}
