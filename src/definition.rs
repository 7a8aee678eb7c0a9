//! Agent definitions
//!
//! A [`RunnableDefinition`] is the immutable description of one agent: its
//! declared inputs and outputs plus a kind-specific configuration selected by
//! the `type` discriminant. Definitions are loaded from project files or
//! fetched from remote components and shared through `Arc`.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::binding::Binding;
use crate::error::AigneError;
use crate::record::OrderedRecord;

/// Reserved step id addressing the pipeline input
pub const PIPELINE_INPUT: &str = "input";

static ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*$").expect("valid id regex"));

/// Check an agent or step id
pub fn validate_id(id: &str) -> Result<(), AigneError> {
    if ID_PATTERN.is_match(id) {
        Ok(())
    } else {
        Err(AigneError::invalid_definition(
            id,
            "ids start with a letter or '_' and contain only letters, digits, '_' or '-'",
        ))
    }
}

// ═══════════════════════════════════════════
// PARAMETERS
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[default]
    String,
    Number,
    Boolean,
    Object,
    Array,
    /// Text produced incrementally; a string once complete
    Stream,
}

impl ValueType {
    /// JSON schema fragment for a value of this type
    pub fn schema(&self) -> Value {
        match self {
            ValueType::String | ValueType::Stream => json!({"type": "string"}),
            ValueType::Number => json!({"type": "number"}),
            ValueType::Boolean => json!({"type": "boolean"}),
            ValueType::Object => json!({"type": "object"}),
            ValueType::Array => json!({"type": "array"}),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type", default)]
    pub value_type: ValueType,
    #[serde(default)]
    pub required: bool,
    /// Applied when the input omits the key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutSpec {
    #[serde(rename = "type", default)]
    pub value_type: ValueType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ═══════════════════════════════════════════
// DEFINITION
// ═══════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnableDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub inputs: OrderedRecord<String, ParamSpec>,
    #[serde(default)]
    pub outputs: OrderedRecord<String, OutSpec>,
    /// Wrap the executor in the result cache
    #[serde(default)]
    pub cache: bool,
    #[serde(flatten)]
    pub kind: AgentKind,
}

impl RunnableDefinition {
    pub fn new(id: impl Into<String>, kind: AgentKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: None,
            inputs: OrderedRecord::new(),
            outputs: OrderedRecord::new(),
            cache: false,
            kind,
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.inputs.insert(name.into(), spec);
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, spec: OutSpec) -> Self {
        self.outputs.insert(name.into(), spec);
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Inputs a caller must supply (required, no default)
    pub fn required_inputs(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .iter()
            .filter(|(_, spec)| spec.required && spec.default.is_none())
            .map(|(name, _)| name.as_str())
    }

    /// Structural checks that need no other definitions
    pub fn validate(&self) -> Result<(), AigneError> {
        validate_id(&self.id)?;
        match &self.kind {
            AgentKind::Pipeline(pipeline) => {
                for step in &pipeline.steps {
                    validate_id(&step.id)?;
                }
            }
            AgentKind::Router(router) if router.candidates.is_empty() => {
                return Err(AigneError::invalid_definition(&self.id, "router has no candidates"));
            }
            AgentKind::Llm(llm) if llm.messages.is_empty() => {
                return Err(AigneError::invalid_definition(&self.id, "llm agent has no messages"));
            }
            _ => {}
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════
// KIND-SPECIFIC CONFIG
// ═══════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentKind {
    Llm(LlmConfig),
    Function(FunctionConfig),
    Api(ApiConfig),
    Remote(RemoteConfig),
    Knowledge(KnowledgeConfig),
    Image(ImageConfig),
    Router(RouterConfig),
    Pipeline(PipelineConfig),
}

impl AgentKind {
    pub fn name(&self) -> &'static str {
        match self {
            AgentKind::Llm(_) => "llm",
            AgentKind::Function(_) => "function",
            AgentKind::Api(_) => "api",
            AgentKind::Remote(_) => "remote",
            AgentKind::Knowledge(_) => "knowledge",
            AgentKind::Image(_) => "image",
            AgentKind::Router(_) => "router",
            AgentKind::Pipeline(_) => "pipeline",
        }
    }

    /// Agents this one runs as steps or route candidates
    pub fn referenced_agents(&self) -> Vec<&AgentRef> {
        match self {
            AgentKind::Pipeline(config) => config.steps.iter().map(|step| &step.agent).collect(),
            AgentKind::Router(config) => config.candidates.iter().map(|c| &c.agent).collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    /// Template rendered against the agent input
    pub content: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub messages: Vec<PromptMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Extra attempts when json output does not parse
    #[serde(default)]
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionConfig {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// URL template
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// Header value templates
    #[serde(default)]
    pub headers: OrderedRecord<String, String>,
    /// Body template; sent as JSON when it renders to valid JSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Secrets exposed to templates as `{{secrets.NAME}}`
    #[serde(default)]
    pub secrets: Vec<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Agent id inside the remote project
    pub agent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    pub knowledge: String,
    /// Query template
    #[serde(default = "default_query")]
    pub query: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_query() -> String {
    "{{question}}".to_string()
}

fn default_top_k() -> usize {
    4
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Prompt template
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_image_count")]
    pub n: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

fn default_image_count() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteCandidate {
    pub agent: AgentRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    pub candidates: Vec<RouteCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default = "default_router_retries")]
    pub max_retries: u32,
}

fn default_router_retries() -> u32 {
    2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Steps in execution order
    pub steps: Vec<ProcessStep>,
    /// Pipeline outputs, keyed by output name
    #[serde(default)]
    pub output_bindings: OrderedRecord<String, Binding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStep {
    pub id: String,
    pub agent: AgentRef,
    #[serde(default)]
    pub inputs: OrderedRecord<String, Binding>,
}

// ═══════════════════════════════════════════
// AGENT REFERENCES
// ═══════════════════════════════════════════

/// Local agent id or an agent exposed by another component
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentRef {
    Local(String),
    Remote {
        component: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project: Option<String>,
        id: String,
    },
}

impl AgentRef {
    pub fn local(id: impl Into<String>) -> Self {
        AgentRef::Local(id.into())
    }

    pub fn agent_id(&self) -> &str {
        match self {
            AgentRef::Local(id) => id,
            AgentRef::Remote { id, .. } => id,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, AgentRef::Remote { .. })
    }
}

impl fmt::Display for AgentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentRef::Local(id) => f.write_str(id),
            AgentRef::Remote {
                component,
                project: Some(project),
                id,
            } => write!(f, "{}/{}/{}", component, project, id),
            AgentRef::Remote { component, id, .. } => write!(f, "{}/{}", component, id),
        }
    }
}
