//! Per-run execution context
//!
//! One [`ExecutionContext`] is created for each top-level run and handed by
//! reference to every nested executor. It is cheap to clone: all state sits
//! behind one `Arc`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::error::AigneError;
use crate::event_log::EventLog;
use crate::provider::{ChatRequest, ChatStream, ImageRequest};
use crate::registry::Registry;
use crate::runnable::Output;

/// A project-level memory entry readable from prompts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryVariable {
    pub key: String,
    pub value: Value,
}

/// Namespace of a cached result
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheScope {
    pub project_id: String,
    pub agent_id: String,
}

/// Services executors call out to
///
/// Everything the runtime needs from the outside world goes through this
/// trait, so hosts can swap storage, sandboxing or model access.
#[async_trait]
pub trait Collaborators: Send + Sync {
    /// Start a streaming chat completion
    async fn call_ai(&self, request: ChatRequest) -> Result<ChatStream, AigneError>;

    async fn call_image(&self, request: ImageRequest) -> Result<Vec<String>, AigneError>;

    /// Run user code with `args` and return its result
    async fn call_function(&self, code: &str, args: &Output) -> Result<Value, AigneError>;

    async fn get_memory_variables(&self, project_id: &str) -> Result<Vec<MemoryVariable>, AigneError>;

    async fn query_cache(&self, scope: &CacheScope, cache_key: &str) -> Result<Option<Output>, AigneError>;

    async fn set_cache(
        &self,
        scope: &CacheScope,
        cache_key: &str,
        inputs: &Output,
        outputs: &Output,
    ) -> Result<(), AigneError>;

    /// Top `top_k` documents of a knowledge base for `query`
    async fn search_knowledge(
        &self,
        knowledge_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<Value>, AigneError>;

    async fn get_secret(&self, project_id: &str, name: &str) -> Result<Option<String>, AigneError>;
}

#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    task_id: String,
    project_id: String,
    registry: Arc<Registry>,
    collaborators: Arc<dyn Collaborators>,
    event_log: EventLog,
}

impl ExecutionContext {
    pub fn new(registry: Arc<Registry>, collaborators: Arc<dyn Collaborators>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                task_id: Uuid::new_v4().to_string(),
                project_id: registry.project_id().to_string(),
                registry,
                collaborators,
                event_log: EventLog::new(),
            }),
        }
    }

    /// Unique id of this run
    pub fn task_id(&self) -> &str {
        &self.inner.task_id
    }

    pub fn project_id(&self) -> &str {
        &self.inner.project_id
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn collaborators(&self) -> &dyn Collaborators {
        self.inner.collaborators.as_ref()
    }

    pub fn config(&self) -> &RuntimeConfig {
        self.inner.registry.config()
    }

    pub fn http(&self) -> &reqwest::Client {
        self.inner.registry.http()
    }

    pub fn event_log(&self) -> &EventLog {
        &self.inner.event_log
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("task_id", &self.inner.task_id)
            .field("project_id", &self.inner.project_id)
            .field("events", &self.inner.event_log.len())
            .finish()
    }
}
