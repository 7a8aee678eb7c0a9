//! Runtime entry point
//!
//! ```rust,ignore
//! let project = Project::load("support.yaml")?;
//! let runtime = Runtime::from_project(project, RuntimeConfig::default().with_env())?;
//! let output = runtime
//!     .run("support", input, RunOptions::complete())
//!     .await?
//!     .into_output()
//!     .await?;
//! ```
//!
//! Every run gets a fresh [`ExecutionContext`]. Use [`Runtime::run_in`] with
//! a context from [`Runtime::context`] to inspect its event log afterwards.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde_json::Value;
use tracing::{error, info};

use crate::collaborators::InMemoryCollaborators;
use crate::config::RuntimeConfig;
use crate::context::{Collaborators, ExecutionContext};
use crate::definition::AgentRef;
use crate::delta::DeltaMerger;
use crate::error::AigneError;
use crate::event_log::EventKind;
use crate::project::Project;
use crate::registry::Registry;
use crate::runnable::{Output, RunOptions, RunOutput};

#[derive(Clone)]
pub struct Runtime {
    registry: Arc<Registry>,
    collaborators: Arc<dyn Collaborators>,
}

impl Runtime {
    pub fn new(registry: Arc<Registry>, collaborators: Arc<dyn Collaborators>) -> Self {
        Self {
            registry,
            collaborators,
        }
    }

    /// Registry and default collaborators for a project
    pub fn from_project(project: Project, config: RuntimeConfig) -> Result<Self, AigneError> {
        let registry = Registry::new(project.id, project.agents, config)?;
        let collaborators = InMemoryCollaborators::from_config(registry.config(), registry.http().clone())?;
        Ok(Self::new(Arc::new(registry), Arc::new(collaborators)))
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Fresh context for one run
    pub fn context(&self) -> ExecutionContext {
        ExecutionContext::new(Arc::clone(&self.registry), Arc::clone(&self.collaborators))
    }

    /// Run a local agent in a fresh context
    pub async fn run(&self, agent_id: &str, input: Output, options: RunOptions) -> Result<RunOutput, AigneError> {
        let ctx = self.context();
        self.run_in(&ctx, &AgentRef::local(agent_id), input, options).await
    }

    /// Run an agent, recording run events in `ctx`
    pub async fn run_in(
        &self,
        ctx: &ExecutionContext,
        agent: &AgentRef,
        input: Output,
        options: RunOptions,
    ) -> Result<RunOutput, AigneError> {
        let agent_id: Arc<str> = Arc::from(agent.to_string());
        info!(agent = %agent_id, task = %ctx.task_id(), stream = options.stream, "Run started");
        ctx.event_log().emit(EventKind::RunStarted {
            agent_id: Arc::clone(&agent_id),
            input: Value::Object(input.clone()),
            stream: options.stream,
        });
        let started = Instant::now();

        let result = match self.registry.resolve(agent).await {
            Ok(runnable) => runnable.run(input, options, ctx).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(RunOutput::Complete(output)) => {
                record_completed(ctx, &agent_id, &output, started);
                Ok(RunOutput::Complete(output))
            }
            Ok(RunOutput::Stream(mut deltas)) => {
                let ctx = ctx.clone();
                let stream = async_stream::stream! {
                    let mut merger = DeltaMerger::new();
                    while let Some(item) = deltas.next().await {
                        match item {
                            Ok(delta) => {
                                merger.apply(&delta);
                                yield Ok(delta);
                            }
                            Err(err) => {
                                record_failed(&ctx, &agent_id, &err);
                                yield Err(err);
                                return;
                            }
                        }
                    }
                    record_completed(&ctx, &agent_id, &merger.into_output(), started);
                };
                Ok(RunOutput::Stream(stream.boxed()))
            }
            Err(err) => {
                record_failed(ctx, &agent_id, &err);
                Err(err)
            }
        }
    }
}

fn record_completed(ctx: &ExecutionContext, agent_id: &Arc<str>, output: &Output, started: Instant) {
    let duration_ms = started.elapsed().as_millis() as u64;
    info!(agent = %agent_id, duration_ms, "Run completed");
    ctx.event_log().emit(EventKind::RunCompleted {
        agent_id: Arc::clone(agent_id),
        output: Value::Object(output.clone()),
        duration_ms,
    });
}

fn record_failed(ctx: &ExecutionContext, agent_id: &Arc<str>, err: &AigneError) {
    error!(agent = %agent_id, error = %err, "Run failed");
    ctx.event_log().emit(EventKind::RunFailed {
        agent_id: Arc::clone(agent_id),
        error: err.to_string(),
    });
}
