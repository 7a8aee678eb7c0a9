//! Project files
//!
//! A project is a YAML document listing agent definitions:
//!
//! ```yaml
//! id: support
//! agents:
//!   - id: answer
//!     type: llm
//!     inputs:
//!       question: { type: string, required: true }
//!     messages:
//!       - role: user
//!         content: "{{question}}"
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::error::AigneError;
use crate::definition::RunnableDefinition;
use crate::registry::Registry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub agents: Vec<RunnableDefinition>,
}

impl Project {
    pub fn from_yaml_str(content: &str) -> Result<Self, AigneError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, AigneError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    pub fn agent(&self, id: &str) -> Option<&RunnableDefinition> {
        self.agents.iter().find(|agent| agent.id == id)
    }

    /// Check definitions and plan every pipeline
    ///
    /// Returns the number of pipelines checked.
    pub async fn validate(&self, config: &RuntimeConfig) -> Result<usize, AigneError> {
        let registry = Registry::new(self.id.clone(), self.agents.clone(), config.clone())?;
        registry.validate_pipelines().await
    }
}
