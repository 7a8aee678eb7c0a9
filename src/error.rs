//! Error types with fix suggestions
//!
//! Every failure the runtime can report is an [`AigneError`] variant with a
//! stable `AIGNE-xxx` code. Callers that need to react to a class of failure
//! (retry, surface to a user, abort a pipeline) use [`AigneError::category`].

use thiserror::Error;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// Coarse classification of an [`AigneError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Graph or definition problem, detected before any executor runs
    Definition,
    /// Input or output failed its declared schema
    Validation,
    /// A collaborator (model, HTTP API, remote component) failed
    Upstream,
    /// Failure reported inside an already-started stream
    Stream,
    /// A declared secret is not configured
    MissingSecret,
    Template,
    NotFound,
    Config,
    Io,
}

#[derive(Error, Debug)]
pub enum AigneError {
    // ─────────────────────────────────────────────────────────────
    // Definition errors (AIGNE-010 to AIGNE-019)
    // ─────────────────────────────────────────────────────────────
    #[error("AIGNE-010: Invalid definition '{id}': {reason}")]
    InvalidDefinition { id: String, reason: String },

    #[error("AIGNE-011: Step '{step_id}' binds '{param}' from '{from}', which is not an earlier step")]
    ForwardReference {
        step_id: String,
        param: String,
        from: String,
    },

    #[error("AIGNE-012: Step '{step_id}' binds '{param}' from unknown step '{from}'")]
    UnknownStep {
        step_id: String,
        param: String,
        from: String,
    },

    #[error("AIGNE-013: Step '{step_id}' does not bind required parameter '{param}' of agent '{agent_id}'")]
    MissingRequiredParam {
        step_id: String,
        agent_id: String,
        param: String,
    },

    #[error("AIGNE-014: Output '{output}' binds from '{from}', which is not a step of pipeline '{pipeline_id}'")]
    UnknownOutputSource {
        pipeline_id: String,
        output: String,
        from: String,
    },

    #[error("AIGNE-015: Duplicate id '{id}'")]
    DuplicateId { id: String },

    #[error("AIGNE-016: Invalid property path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("AIGNE-017: Agents reference each other in a cycle: {chain}")]
    CyclicAgentReference { chain: String },

    // ─────────────────────────────────────────────────────────────
    // Validation errors (AIGNE-020 to AIGNE-029)
    // ─────────────────────────────────────────────────────────────
    #[error("AIGNE-020: Input of agent '{agent_id}' is invalid: {reason}")]
    InvalidInput { agent_id: String, reason: String },

    #[error("AIGNE-021: Output of agent '{agent_id}' is invalid: {reason}")]
    InvalidOutput { agent_id: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // Upstream errors (AIGNE-030 to AIGNE-039)
    // ─────────────────────────────────────────────────────────────
    #[error("AIGNE-030: {service} request failed: {reason}")]
    Upstream { service: String, reason: String },

    #[error("AIGNE-031: HTTP {status} from {url}: {message}")]
    HttpStatus {
        status: u16,
        url: String,
        message: String,
    },

    #[error("AIGNE-032: Malformed response from '{origin}': {reason}")]
    MalformedResponse { origin: String, reason: String },

    #[error("AIGNE-033: {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("AIGNE-034: {capability} is not supported by {service}")]
    Unsupported { service: String, capability: String },

    // ─────────────────────────────────────────────────────────────
    // Stream errors (AIGNE-040)
    // ─────────────────────────────────────────────────────────────
    #[error("AIGNE-040: Stream failed: {message}")]
    Stream { message: String },

    // ─────────────────────────────────────────────────────────────
    // Secret errors (AIGNE-050)
    // ─────────────────────────────────────────────────────────────
    #[error("AIGNE-050: Secret '{name}' required by agent '{agent_id}' is not configured")]
    MissingSecret { agent_id: String, name: String },

    // ─────────────────────────────────────────────────────────────
    // Template errors (AIGNE-060 to AIGNE-061)
    // ─────────────────────────────────────────────────────────────
    #[error("AIGNE-060: Template parse error at byte {position}: {details}")]
    TemplateParse { position: usize, details: String },

    // ─────────────────────────────────────────────────────────────
    // Lookup errors (AIGNE-070 to AIGNE-071)
    // ─────────────────────────────────────────────────────────────
    #[error("AIGNE-070: Agent '{agent_id}' not found")]
    AgentNotFound { agent_id: String },

    #[error("AIGNE-071: Component '{component}' is not configured")]
    UnknownComponent { component: String },

    // ─────────────────────────────────────────────────────────────
    // Pipeline errors (AIGNE-080)
    // ─────────────────────────────────────────────────────────────
    #[error("AIGNE-080: Step '{step_id}' (agent '{agent_id}') failed: {source}")]
    StepFailed {
        step_id: String,
        agent_id: String,
        source: Box<AigneError>,
    },

    // ─────────────────────────────────────────────────────────────
    // Config and IO errors (AIGNE-090 to AIGNE-093)
    // ─────────────────────────────────────────────────────────────
    #[error("AIGNE-090: Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("AIGNE-091: YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("AIGNE-092: IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AigneError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AigneError::InvalidDefinition { .. }
            | AigneError::ForwardReference { .. }
            | AigneError::UnknownStep { .. }
            | AigneError::MissingRequiredParam { .. }
            | AigneError::UnknownOutputSource { .. }
            | AigneError::DuplicateId { .. }
            | AigneError::InvalidPath { .. }
            | AigneError::CyclicAgentReference { .. } => ErrorCategory::Definition,
            AigneError::InvalidInput { .. } | AigneError::InvalidOutput { .. } => {
                ErrorCategory::Validation
            }
            AigneError::Upstream { .. }
            | AigneError::HttpStatus { .. }
            | AigneError::MalformedResponse { .. }
            | AigneError::Timeout { .. }
            | AigneError::Unsupported { .. } => ErrorCategory::Upstream,
            AigneError::Stream { .. } => ErrorCategory::Stream,
            AigneError::MissingSecret { .. } => ErrorCategory::MissingSecret,
            AigneError::TemplateParse { .. } => ErrorCategory::Template,
            AigneError::AgentNotFound { .. } | AigneError::UnknownComponent { .. } => {
                ErrorCategory::NotFound
            }
            AigneError::StepFailed { source, .. } => source.category(),
            AigneError::Config { .. } => ErrorCategory::Config,
            AigneError::YamlParse(_) | AigneError::Io(_) => ErrorCategory::Io,
        }
    }

    /// Innermost cause, looking through pipeline step wrappers
    pub fn root_cause(&self) -> &AigneError {
        match self {
            AigneError::StepFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub(crate) fn upstream(service: impl Into<String>, reason: impl ToString) -> Self {
        AigneError::Upstream {
            service: service.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn malformed(origin: impl Into<String>, reason: impl ToString) -> Self {
        AigneError::MalformedResponse {
            origin: origin.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_definition(id: impl Into<String>, reason: impl ToString) -> Self {
        AigneError::InvalidDefinition {
            id: id.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<reqwest::Error> for AigneError {
    fn from(err: reqwest::Error) -> Self {
        let service = match err.url() {
            Some(url) => url.host_str().unwrap_or("HTTP").to_string(),
            None => "HTTP".to_string(),
        };
        AigneError::upstream(service, err)
    }
}

impl FixSuggestion for AigneError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            AigneError::InvalidDefinition { .. } => {
                Some("Check the agent definition against the project file format")
            }
            AigneError::ForwardReference { .. } => {
                Some("A step can only bind from 'input' or from steps declared before it")
            }
            AigneError::UnknownStep { .. } => Some("Check the step id in the 'from' field"),
            AigneError::MissingRequiredParam { .. } => {
                Some("Add an input binding for the parameter or give it a default")
            }
            AigneError::UnknownOutputSource { .. } => {
                Some("Output bindings can only read from 'input' or a declared step")
            }
            AigneError::DuplicateId { .. } => Some("Ids must be unique within their scope"),
            AigneError::InvalidPath { .. } => {
                Some("Use dot or bracket notation: a.b.0 or a.b[0]")
            }
            AigneError::CyclicAgentReference { .. } => {
                Some("A pipeline or router cannot reach itself through its steps or candidates")
            }
            AigneError::InvalidInput { .. } => {
                Some("Provide every required input with the declared type")
            }
            AigneError::InvalidOutput { .. } => {
                Some("The agent did not produce its declared outputs; check its prompt or code")
            }
            AigneError::Upstream { .. } => Some("Check connectivity and provider credentials"),
            AigneError::HttpStatus { .. } => Some("Check the endpoint URL and request payload"),
            AigneError::MalformedResponse { .. } => {
                Some("Raise max_retries or make the prompt ask for strict JSON")
            }
            AigneError::Timeout { .. } => Some("Increase the timeout in aigne.toml"),
            AigneError::Unsupported { .. } => Some("Pick a provider that offers this capability"),
            AigneError::Stream { .. } => None,
            AigneError::MissingSecret { .. } => {
                Some("Set the secret in aigne.toml [secrets] or as an environment variable")
            }
            AigneError::TemplateParse { .. } => {
                Some("Check that every {{#section}} has a matching {{/section}}")
            }
            AigneError::AgentNotFound { .. } => Some("Check the agent id in the project file"),
            AigneError::UnknownComponent { .. } => {
                Some("Add the component base URL under [components] in aigne.toml")
            }
            AigneError::StepFailed { source, .. } => source.fix_suggestion(),
            AigneError::Config { .. } => Some("Check aigne.toml syntax"),
            AigneError::YamlParse(_) => Some("Check YAML indentation and syntax"),
            AigneError::Io(_) => Some("Check that the file exists and is readable"),
        }
    }
}

pub type Result<T, E = AigneError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_failed_reports_inner_category() {
        let err = AigneError::StepFailed {
            step_id: "answer".into(),
            agent_id: "llm".into(),
            source: Box::new(AigneError::MissingSecret {
                agent_id: "llm".into(),
                name: "API_KEY".into(),
            }),
        };

        assert_eq!(err.category(), ErrorCategory::MissingSecret);
        assert!(matches!(err.root_cause(), AigneError::MissingSecret { .. }));
        assert!(err.to_string().contains("AIGNE-080"));
        assert!(err.to_string().contains("API_KEY"));
    }

    #[test]
    fn every_definition_error_has_suggestion() {
        let err = AigneError::ForwardReference {
            step_id: "a".into(),
            param: "x".into(),
            from: "b".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Definition);
        assert!(err.fix_suggestion().is_some());
    }
}
