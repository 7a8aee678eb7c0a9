//! Function agent: runs user code through the collaborators' sandbox

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use super::value_output;
use crate::context::ExecutionContext;
use crate::definition::{FunctionConfig, RunnableDefinition};
use crate::error::AigneError;
use crate::runnable::{Output, RunOptions, RunOutput, Runnable};

pub struct FunctionAgent {
    definition: Arc<RunnableDefinition>,
    config: FunctionConfig,
}

impl FunctionAgent {
    pub fn new(definition: Arc<RunnableDefinition>, config: FunctionConfig) -> Self {
        Self { definition, config }
    }
}

#[async_trait]
impl Runnable for FunctionAgent {
    fn definition(&self) -> &RunnableDefinition {
        &self.definition
    }

    #[instrument(name = "function", skip(self, input, ctx), fields(agent = %self.definition.id))]
    async fn run(
        &self,
        input: Output,
        options: RunOptions,
        ctx: &ExecutionContext,
    ) -> Result<RunOutput, AigneError> {
        let result = ctx
            .collaborators()
            .call_function(&self.config.code, &input)
            .await?;
        Ok(RunOutput::for_options(value_output(result), options))
    }
}
