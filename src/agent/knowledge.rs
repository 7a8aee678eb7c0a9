//! Knowledge retrieval agent

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use super::render_logged;
use crate::collaborators::document_text;
use crate::context::ExecutionContext;
use crate::definition::{KnowledgeConfig, RunnableDefinition};
use crate::error::AigneError;
use crate::runnable::{Output, RunOptions, RunOutput, Runnable, TEXT_KEY};

pub struct KnowledgeAgent {
    definition: Arc<RunnableDefinition>,
    config: KnowledgeConfig,
}

impl KnowledgeAgent {
    pub fn new(definition: Arc<RunnableDefinition>, config: KnowledgeConfig) -> Self {
        Self { definition, config }
    }
}

#[async_trait]
impl Runnable for KnowledgeAgent {
    fn definition(&self) -> &RunnableDefinition {
        &self.definition
    }

    #[instrument(name = "knowledge", skip(self, input, ctx), fields(agent = %self.definition.id, knowledge = %self.config.knowledge))]
    async fn run(
        &self,
        input: Output,
        options: RunOptions,
        ctx: &ExecutionContext,
    ) -> Result<RunOutput, AigneError> {
        let data = Value::Object(input);
        let query = render_logged(&self.config.query, &data, ctx, &self.definition.id).await?;
        let docs = ctx
            .collaborators()
            .search_knowledge(&self.config.knowledge, &query, self.config.top_k)
            .await?;
        debug!(query = %query, hits = docs.len(), "Knowledge search finished");

        let text = docs.iter().map(document_text).collect::<Vec<_>>().join("\n\n");
        let mut output = Output::new();
        output.insert("docs".to_string(), Value::Array(docs));
        output.insert(TEXT_KEY.to_string(), Value::String(text));
        Ok(RunOutput::for_options(output, options))
    }
}
