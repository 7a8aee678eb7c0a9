//! Image generation agent

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;

use super::render_logged;
use crate::context::ExecutionContext;
use crate::definition::{ImageConfig, RunnableDefinition};
use crate::error::AigneError;
use crate::provider::ImageRequest;
use crate::runnable::{Output, RunOptions, RunOutput, Runnable};

pub struct ImageAgent {
    definition: Arc<RunnableDefinition>,
    config: ImageConfig,
}

impl ImageAgent {
    pub fn new(definition: Arc<RunnableDefinition>, config: ImageConfig) -> Self {
        Self { definition, config }
    }
}

#[async_trait]
impl Runnable for ImageAgent {
    fn definition(&self) -> &RunnableDefinition {
        &self.definition
    }

    #[instrument(name = "image", skip(self, input, ctx), fields(agent = %self.definition.id))]
    async fn run(
        &self,
        input: Output,
        options: RunOptions,
        ctx: &ExecutionContext,
    ) -> Result<RunOutput, AigneError> {
        let prompt = render_logged(&self.config.prompt, &Value::Object(input), ctx, &self.definition.id).await?;
        let images = ctx
            .collaborators()
            .call_image(ImageRequest {
                prompt,
                model: self.config.model.clone(),
                n: self.config.n,
                size: self.config.size.clone(),
            })
            .await?;

        let mut output = Output::new();
        output.insert(
            "images".to_string(),
            Value::Array(images.into_iter().map(Value::String).collect()),
        );
        Ok(RunOutput::for_options(output, options))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, object};
    use super::*;
    use crate::agent::create_runnable;
    use crate::definition::AgentKind;
    use crate::provider::MockProvider;
    use serde_json::json;

    #[tokio::test]
    async fn renders_prompt_and_lists_images() {
        let provider = Arc::new(MockProvider::new());
        let def = RunnableDefinition::new(
            "draw",
            AgentKind::Image(ImageConfig {
                prompt: "A {{animal}} in watercolor".into(),
                model: Some("dall-e-3".into()),
                n: 2,
                size: None,
            }),
        );
        let ctx = context(vec![def.clone()], provider.clone());

        let output = create_runnable(Arc::new(def))
            .run(object(json!({"animal": "fox"})), RunOptions::complete(), &ctx)
            .await
            .unwrap()
            .into_output()
            .await
            .unwrap();

        assert_eq!(output, object(json!({"images": ["mock://image/0", "mock://image/1"]})));
        let requests = provider.image_requests();
        let request = &requests[0];
        assert_eq!(request.prompt, "A fox in watercolor");
        assert_eq!(request.model.as_deref(), Some("dall-e-3"));
    }

    #[tokio::test]
    async fn streaming_and_complete_agree() {
        let def = RunnableDefinition::new(
            "draw",
            AgentKind::Image(ImageConfig {
                prompt: "A {{animal}}".into(),
                model: None,
                n: 3,
                size: Some("512x512".into()),
            }),
        );
        let ctx = context(vec![def.clone()], Arc::new(MockProvider::new()));
        let runnable = create_runnable(Arc::new(def));
        let input = object(json!({"animal": "owl"}));

        let complete = runnable
            .run(input.clone(), RunOptions::complete(), &ctx)
            .await
            .unwrap()
            .into_output()
            .await
            .unwrap();
        let streamed = runnable.run(input, RunOptions::streaming(), &ctx).await.unwrap();
        assert!(matches!(streamed, RunOutput::Stream(_)));
        let streamed = streamed.into_output().await.unwrap();

        assert_eq!(complete, streamed);
        assert_eq!(
            complete,
            object(json!({"images": ["mock://image/0", "mock://image/1", "mock://image/2"]}))
        );
    }
}
