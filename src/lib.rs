//! Aigne runtime - agent execution engine
//!
//! Runs pipelines of heterogeneous agents (model calls, functions, HTTP APIs,
//! remote components, retrieval) to completion or as a stream of deltas.

pub mod agent;
pub mod binding;
pub mod cache;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod datastore;
pub mod definition;
pub mod delta;
pub mod error;
pub mod event_log;
pub mod flow_graph;
pub mod jsonpath;
pub mod pipeline;
pub mod project;
pub mod provider;
pub mod record;
pub mod registry;
pub mod retry;
pub mod runnable;
pub mod runtime;
pub mod sse;
pub mod template;
pub mod validator;

pub use agent::create_runnable;
pub use binding::Binding;
pub use collaborators::{FunctionSandbox, InMemoryCollaborators};
pub use config::RuntimeConfig;
pub use context::{CacheScope, Collaborators, ExecutionContext, MemoryVariable};
pub use definition::{AgentKind, AgentRef, RunnableDefinition};
pub use delta::DeltaMerger;
pub use error::{AigneError, ErrorCategory, FixSuggestion};
pub use event_log::{Event, EventKind, EventLog};
pub use flow_graph::FlowGraph;
pub use pipeline::PipelineAgent;
pub use project::Project;
pub use record::OrderedRecord;
pub use registry::Registry;
pub use retry::retry;
pub use runnable::{Output, ResponseStream, RunOptions, RunOutput, Runnable, RunnableResponseDelta};
pub use runtime::Runtime;
pub use template::{RenderContext, Resolution, Resolver, Template};
