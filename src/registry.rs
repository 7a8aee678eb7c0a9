//! Agent registry
//!
//! Owns the project's definitions, the shared HTTP client and the cache of
//! definitions fetched from remote components. Remote definitions are cached
//! for the registry's lifetime.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;
use reqwest::redirect::Policy;
use tracing::{debug, info};

use crate::agent::{create_runnable, remote};
use crate::config::RuntimeConfig;
use crate::definition::{AgentKind, AgentRef, RunnableDefinition};
use crate::error::AigneError;
use crate::pipeline::PipelineAgent;
use crate::runnable::Runnable;

pub struct Registry {
    project_id: String,
    config: RuntimeConfig,
    local: IndexMap<String, Arc<RunnableDefinition>>,
    remote: DashMap<AgentRef, Arc<RunnableDefinition>>,
    http: reqwest::Client,
}

fn build_client(config: &RuntimeConfig) -> Result<reqwest::Client, AigneError> {
    reqwest::Client::builder()
        .timeout(config.http_timeout())
        .connect_timeout(config.connect_timeout())
        .redirect(Policy::limited(config.http.max_redirects))
        .user_agent(concat!("aigne-runtime/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| AigneError::Config {
            reason: format!("Failed to build HTTP client: {}", e),
        })
}

impl Registry {
    pub fn new(
        project_id: impl Into<String>,
        definitions: Vec<RunnableDefinition>,
        config: RuntimeConfig,
    ) -> Result<Self, AigneError> {
        let mut local = IndexMap::with_capacity(definitions.len());
        for def in definitions {
            def.validate()?;
            if local.contains_key(&def.id) {
                return Err(AigneError::DuplicateId { id: def.id });
            }
            local.insert(def.id.clone(), Arc::new(def));
        }

        Ok(Self {
            project_id: project_id.into(),
            http: build_client(&config)?,
            config,
            local,
            remote: DashMap::new(),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn get(&self, id: &str) -> Option<&Arc<RunnableDefinition>> {
        self.local.get(id)
    }

    /// Local definitions in declaration order
    pub fn definitions(&self) -> impl Iterator<Item = &Arc<RunnableDefinition>> {
        self.local.values()
    }

    pub fn remote_cache_len(&self) -> usize {
        self.remote.len()
    }

    pub async fn resolve_definition(&self, agent: &AgentRef) -> Result<Arc<RunnableDefinition>, AigneError> {
        match agent {
            AgentRef::Local(id) => self
                .local
                .get(id)
                .cloned()
                .ok_or_else(|| AigneError::AgentNotFound { agent_id: id.clone() }),
            AgentRef::Remote { component, project, id } => {
                if let Some(cached) = self.remote.get(agent) {
                    return Ok(Arc::clone(cached.value()));
                }

                let base = self.config.component_url(component)?;
                let project = project.as_deref().unwrap_or(&self.project_id);
                let fetched = remote::fetch_definition(&self.http, &base, project, id).await?;
                info!(agent = %agent, "Fetched remote definition");

                let def = Arc::new(remote::proxy_definition(fetched, component, project, id));
                self.remote.insert(agent.clone(), Arc::clone(&def));
                Ok(def)
            }
        }
    }

    /// Executor for an agent reference
    pub async fn resolve(&self, agent: &AgentRef) -> Result<Arc<dyn Runnable>, AigneError> {
        let def = self.resolve_definition(agent).await?;
        debug!(agent = %agent, kind = def.kind.name(), "Resolved agent");
        Ok(create_runnable(def))
    }

    /// Plan every local pipeline and check every router without running them
    pub async fn validate_pipelines(&self) -> Result<usize, AigneError> {
        let mut count = 0;
        for def in self.local.values() {
            match &def.kind {
                AgentKind::Pipeline(config) => {
                    PipelineAgent::new(Arc::clone(def), config.clone()).plan(self).await?;
                    count += 1;
                }
                AgentKind::Router(_) => self.check_agent_cycles(def)?,
                _ => {}
            }
        }
        Ok(count)
    }

    /// Fail if `root` can reach itself through local steps or route candidates
    ///
    /// Remote agents are opaque here and end the walk.
    pub fn check_agent_cycles(&self, root: &RunnableDefinition) -> Result<(), AigneError> {
        let mut path = vec![root.id.clone()];
        let mut explored = HashSet::new();
        self.walk_references(root, &mut path, &mut explored)
    }

    fn walk_references(
        &self,
        def: &RunnableDefinition,
        path: &mut Vec<String>,
        explored: &mut HashSet<String>,
    ) -> Result<(), AigneError> {
        for agent in def.kind.referenced_agents() {
            let AgentRef::Local(id) = agent else {
                continue;
            };
            if let Some(start) = path.iter().position(|seen| seen == id) {
                let mut chain = path[start..].to_vec();
                chain.push(id.clone());
                return Err(AigneError::CyclicAgentReference {
                    chain: chain.join(" -> "),
                });
            }
            if explored.contains(id) {
                continue;
            }
            // Unknown ids are reported when the step is resolved
            let Some(next) = self.local.get(id) else {
                continue;
            };
            path.push(id.clone());
            self.walk_references(next, path, explored)?;
            path.pop();
            explored.insert(id.clone());
        }
        Ok(())
    }
}
