//! Default in-process collaborators
//!
//! Model calls go to a [`ModelProvider`], functions run in a subprocess, and
//! memory, cache and knowledge live in concurrent maps. Secrets come from the
//! configuration first and the environment second.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::config::RuntimeConfig;
use crate::context::{CacheScope, Collaborators, MemoryVariable};
use crate::error::AigneError;
use crate::provider::{create_provider, ChatRequest, ChatStream, ImageRequest, ModelProvider};
use crate::runnable::Output;

// ═══════════════════════════════════════════
// FUNCTION SANDBOX
// ═══════════════════════════════════════════

/// Runs function code as `<interpreter> -c <code>` in a child process
///
/// Arguments arrive as JSON both on stdin and in `AIGNE_ARGS`. Stdout is
/// parsed as JSON when possible, otherwise returned as a string.
#[derive(Debug, Clone)]
pub struct FunctionSandbox {
    interpreter: String,
    timeout: Duration,
}

impl FunctionSandbox {
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }

    #[instrument(skip(self, code, args), fields(interpreter = %self.interpreter))]
    pub async fn call(&self, code: &str, args: &Output) -> Result<Value, AigneError> {
        let args_json = serde_json::to_string(args)
            .map_err(|e| AigneError::upstream("function", format!("Failed to encode args: {}", e)))?;

        let mut child = Command::new(&self.interpreter)
            .arg("-c")
            .arg(code)
            .env("AIGNE_ARGS", &args_json)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AigneError::upstream("function", format!("Failed to start: {}", e)))?;

        // Args are written while stdout is drained so neither pipe can fill up
        let stdin = child.stdin.take();
        let write_args = async move {
            if let Some(mut stdin) = stdin {
                // The script may exit without reading stdin
                let _ = stdin.write_all(args_json.as_bytes()).await;
            }
        };
        let run = async move {
            let ((), output) = tokio::join!(write_args, child.wait_with_output());
            output
        };

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| AigneError::Timeout {
                operation: "Function".to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            })?
            .map_err(|e| AigneError::upstream("function", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AigneError::upstream(
                "function",
                format!("exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(output_len = stdout.len(), "Function finished");
        Ok(serde_json::from_str(&stdout).unwrap_or(Value::String(stdout)))
    }
}

impl Default for FunctionSandbox {
    fn default() -> Self {
        Self::new("sh", Duration::from_secs(30))
    }
}

// ═══════════════════════════════════════════
// IN-MEMORY COLLABORATORS
// ═══════════════════════════════════════════

pub struct InMemoryCollaborators {
    provider: Arc<dyn ModelProvider>,
    sandbox: FunctionSandbox,
    /// project id → variables
    memory: DashMap<String, Vec<MemoryVariable>>,
    cache: DashMap<(CacheScope, String), Output>,
    /// knowledge id → documents
    knowledge: DashMap<String, Vec<Value>>,
    secrets: DashMap<String, String>,
    env_secrets: bool,
}

impl InMemoryCollaborators {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            provider,
            sandbox: FunctionSandbox::default(),
            memory: DashMap::new(),
            cache: DashMap::new(),
            knowledge: DashMap::new(),
            secrets: DashMap::new(),
            env_secrets: true,
        }
    }

    /// Provider, sandbox and secrets as configured
    pub fn from_config(config: &RuntimeConfig, client: reqwest::Client) -> Result<Self, AigneError> {
        let provider = create_provider(&config.provider, config, client)?;
        let collaborators = Self::new(provider).with_sandbox(FunctionSandbox::new(
            config.function.interpreter.clone(),
            config.function_timeout(),
        ));
        for (name, value) in &config.secrets {
            collaborators.secrets.insert(name.clone(), value.clone());
        }
        Ok(collaborators)
    }

    pub fn with_sandbox(mut self, sandbox: FunctionSandbox) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn with_secret(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }

    /// Only use explicitly configured secrets
    pub fn without_env_secrets(mut self) -> Self {
        self.env_secrets = false;
        self
    }

    pub fn set_memory(&self, project_id: &str, key: impl Into<String>, value: Value) {
        let key = key.into();
        let mut vars = self.memory.entry(project_id.to_string()).or_default();
        match vars.iter_mut().find(|v| v.key == key) {
            Some(existing) => existing.value = value,
            None => vars.push(MemoryVariable { key, value }),
        }
    }

    pub fn add_document(&self, knowledge_id: &str, document: Value) {
        self.knowledge
            .entry(knowledge_id.to_string())
            .or_default()
            .push(document);
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

/// Searchable text of a knowledge document
pub(crate) fn document_text(document: &Value) -> String {
    match document.get("content").and_then(Value::as_str) {
        Some(content) => content.to_string(),
        None => match document {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}

fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl Collaborators for InMemoryCollaborators {
    async fn call_ai(&self, request: ChatRequest) -> Result<ChatStream, AigneError> {
        self.provider.chat(request).await
    }

    async fn call_image(&self, request: ImageRequest) -> Result<Vec<String>, AigneError> {
        self.provider.generate_images(request).await
    }

    async fn call_function(&self, code: &str, args: &Output) -> Result<Value, AigneError> {
        self.sandbox.call(code, args).await
    }

    async fn get_memory_variables(&self, project_id: &str) -> Result<Vec<MemoryVariable>, AigneError> {
        Ok(self
            .memory
            .get(project_id)
            .map(|vars| vars.clone())
            .unwrap_or_default())
    }

    async fn query_cache(&self, scope: &CacheScope, cache_key: &str) -> Result<Option<Output>, AigneError> {
        Ok(self
            .cache
            .get(&(scope.clone(), cache_key.to_string()))
            .map(|entry| entry.clone()))
    }

    async fn set_cache(
        &self,
        scope: &CacheScope,
        cache_key: &str,
        _inputs: &Output,
        outputs: &Output,
    ) -> Result<(), AigneError> {
        self.cache
            .insert((scope.clone(), cache_key.to_string()), outputs.clone());
        Ok(())
    }

    /// Term-overlap ranking; ties keep insertion order
    async fn search_knowledge(
        &self,
        knowledge_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<Value>, AigneError> {
        let Some(documents) = self.knowledge.get(knowledge_id) else {
            return Err(AigneError::upstream(
                "knowledge",
                format!("unknown knowledge base '{}'", knowledge_id),
            ));
        };

        let query_terms = terms(query);
        let mut scored: Vec<(usize, &Value)> = documents
            .iter()
            .map(|doc| {
                let doc_terms = terms(&document_text(doc));
                let score = query_terms.iter().filter(|t| doc_terms.contains(t)).count();
                (score, doc)
            })
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    async fn get_secret(&self, _project_id: &str, name: &str) -> Result<Option<String>, AigneError> {
        if let Some(value) = self.secrets.get(name) {
            return Ok(Some(value.clone()));
        }
        if self.env_secrets {
            return Ok(std::env::var(name).ok().filter(|v| !v.is_empty()));
        }
        Ok(None)
    }
}
