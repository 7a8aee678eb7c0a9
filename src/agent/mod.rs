//! # Agent executors
//!
//! One executor per agent kind, built from a definition by [`create_runnable`].
//!
//! | Kind | Collaborator | Output |
//! |------|--------------|--------|
//! | `llm` | `call_ai` | `$text` fragments, or a parsed JSON object |
//! | `function` | `call_function` | object result, or `$text` |
//! | `api` | shared HTTP client | JSON object body, or `$text` |
//! | `remote` | another component | whatever the remote agent returns |
//! | `knowledge` | `search_knowledge` | `{ docs, $text }` |
//! | `image` | `call_image` | `{ images }` |
//! | `router` | `call_ai` + registry | output of the chosen agent |
//! | `pipeline` | registry | bound outputs |
//!
//! Every executor is wrapped so inputs are validated (defaults applied)
//! before it runs and complete outputs are validated after.

mod api;
mod function;
mod image;
mod knowledge;
mod llm;
pub mod remote;
mod router;

pub use api::ApiAgent;
pub use function::FunctionAgent;
pub use image::ImageAgent;
pub use knowledge::KnowledgeAgent;
pub use llm::LlmAgent;
pub use remote::RemoteAgent;
pub use router::RouterAgent;

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;

use crate::cache::CachedRunnable;
use crate::context::ExecutionContext;
use crate::definition::{AgentKind, RunnableDefinition};
use crate::error::AigneError;
use crate::event_log::EventKind;
use crate::pipeline::PipelineAgent;
use crate::runnable::{Output, RunOptions, RunOutput, Runnable, TEXT_KEY};
use crate::template::{self, RenderContext, Resolution};
use crate::validator;

/// Build the executor for a definition
pub fn create_runnable(def: Arc<RunnableDefinition>) -> Arc<dyn Runnable> {
    let executor: Arc<dyn Runnable> = match &def.kind {
        AgentKind::Llm(config) => Arc::new(LlmAgent::new(def.clone(), config.clone())),
        AgentKind::Function(config) => Arc::new(FunctionAgent::new(def.clone(), config.clone())),
        AgentKind::Api(config) => Arc::new(ApiAgent::new(def.clone(), config.clone())),
        AgentKind::Remote(config) => Arc::new(RemoteAgent::new(def.clone(), config.clone())),
        AgentKind::Knowledge(config) => Arc::new(KnowledgeAgent::new(def.clone(), config.clone())),
        AgentKind::Image(config) => Arc::new(ImageAgent::new(def.clone(), config.clone())),
        AgentKind::Router(config) => Arc::new(RouterAgent::new(def.clone(), config.clone())),
        AgentKind::Pipeline(config) => Arc::new(PipelineAgent::new(def.clone(), config.clone())),
    };

    let executor = if def.cache {
        Arc::new(CachedRunnable::new(executor)) as Arc<dyn Runnable>
    } else {
        executor
    };
    Arc::new(CheckedRunnable { inner: executor })
}

/// Input/output validation around an executor
struct CheckedRunnable {
    inner: Arc<dyn Runnable>,
}

#[async_trait]
impl Runnable for CheckedRunnable {
    fn definition(&self) -> &RunnableDefinition {
        self.inner.definition()
    }

    async fn run(
        &self,
        input: Output,
        options: RunOptions,
        ctx: &ExecutionContext,
    ) -> Result<RunOutput, AigneError> {
        let def = self.definition();
        let input = validator::prepare_input(def, input)?;
        match self.inner.run(input, options, ctx).await? {
            RunOutput::Complete(output) => {
                validator::validate_output(def, &output)?;
                Ok(RunOutput::Complete(output))
            }
            stream => Ok(stream),
        }
    }
}

// ═══════════════════════════════════════════
// SHARED HELPERS
// ═══════════════════════════════════════════

/// `{ "$text": text }`
pub(crate) fn text_output(text: impl Into<String>) -> Output {
    let mut output = Output::new();
    output.insert(TEXT_KEY.to_string(), Value::String(text.into()));
    output
}

/// Objects pass through; any other value becomes `$text`
pub(crate) fn value_output(value: Value) -> Output {
    match value {
        Value::Object(map) => map,
        Value::String(text) => text_output(text),
        other => text_output(other.to_string()),
    }
}

/// Render a template against `data` with the `memory` resolver registered
pub(crate) async fn render(
    source: &str,
    data: &Value,
    ctx: &ExecutionContext,
) -> Result<String, AigneError> {
    let render_ctx = RenderContext::new(data.clone())
        .with_concurrency(ctx.config().template_concurrency)
        .with_resolver("memory", memory_resolver(ctx));
    template::render(source, render_ctx).await
}

/// [`render`] and record the result in the event log
pub(crate) async fn render_logged(
    source: &str,
    data: &Value,
    ctx: &ExecutionContext,
    agent_id: &str,
) -> Result<String, AigneError> {
    let rendered = render(source, data, ctx).await?;
    ctx.event_log().emit(EventKind::TemplateResolved {
        agent_id: agent_id.into(),
        template: source.to_string(),
        result: rendered.clone(),
    });
    Ok(rendered)
}

/// `{{#memory}}key{{/memory}}` reads a project memory variable
fn memory_resolver(ctx: &ExecutionContext) -> impl Fn(&str) -> Resolution + Send + Sync + 'static {
    let ctx = ctx.clone();
    move |key: &str| Resolution::Pending(lookup_memory(ctx.clone(), key.trim().to_string()).boxed())
}

async fn lookup_memory(ctx: ExecutionContext, key: String) -> Result<Option<Value>, AigneError> {
    let variables = ctx
        .collaborators()
        .get_memory_variables(ctx.project_id())
        .await?;
    Ok(variables
        .into_iter()
        .find(|variable| variable.key == key)
        .map(|variable| variable.value))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::collaborators::InMemoryCollaborators;
    use crate::config::RuntimeConfig;
    use crate::provider::MockProvider;
    use crate::registry::Registry;

    pub fn object(value: Value) -> Output {
        value.as_object().cloned().unwrap()
    }

    pub fn collaborators(provider: Arc<MockProvider>) -> Arc<InMemoryCollaborators> {
        Arc::new(InMemoryCollaborators::new(provider).without_env_secrets())
    }

    pub fn context_with(
        defs: Vec<RunnableDefinition>,
        config: RuntimeConfig,
        collaborators: Arc<InMemoryCollaborators>,
    ) -> ExecutionContext {
        let registry = Arc::new(Registry::new("test", defs, config).unwrap());
        ExecutionContext::new(registry, collaborators)
    }

    pub fn context(defs: Vec<RunnableDefinition>, provider: Arc<MockProvider>) -> ExecutionContext {
        context_with(defs, RuntimeConfig::default(), collaborators(provider))
    }
}
