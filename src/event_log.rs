//! Execution event log
//!
//! Audit trail for one top-level run, shared by every nested executor
//! through the [`crate::context::ExecutionContext`].
//! - Event: envelope with id + timestamp + kind
//! - EventKind: run, step and fine-grained (template/provider/cache) events
//! - EventLog: thread-safe, append-only log

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Single event in the run log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since the run started (ms)
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

/// All event types
///
/// Uses Arc<str> for id fields to keep cloning cheap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // RUN LEVEL
    // ═══════════════════════════════════════════
    RunStarted {
        agent_id: Arc<str>,
        input: Value,
        stream: bool,
    },
    RunCompleted {
        agent_id: Arc<str>,
        output: Value,
        duration_ms: u64,
    },
    RunFailed {
        agent_id: Arc<str>,
        error: String,
    },

    // ═══════════════════════════════════════════
    // STEP LEVEL
    // ═══════════════════════════════════════════
    /// Step begins with its resolved inputs
    StepStarted {
        step_id: Arc<str>,
        agent_id: Arc<str>,
        /// Earlier steps this one reads from
        #[serde(default)]
        depends_on: Vec<Arc<str>>,
        inputs: Value,
        streaming: bool,
    },
    StepCompleted {
        step_id: Arc<str>,
        output: Value,
        duration_ms: u64,
    },
    StepFailed {
        step_id: Arc<str>,
        error: String,
        duration_ms: u64,
    },

    // ═══════════════════════════════════════════
    // FINE-GRAINED (template/provider/cache)
    // ═══════════════════════════════════════════
    TemplateResolved {
        agent_id: Arc<str>,
        template: String,
        result: String,
    },
    ProviderCalled {
        agent_id: Arc<str>,
        model: String,
        message_count: usize,
    },
    ProviderResponded {
        agent_id: Arc<str>,
        output_len: usize,
    },
    CacheHit {
        agent_id: Arc<str>,
        cache_key: String,
    },
    RouteSelected {
        agent_id: Arc<str>,
        selected: String,
    },
}

impl EventKind {
    /// Agent the event belongs to, if any
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::RunStarted { agent_id, .. }
            | Self::RunCompleted { agent_id, .. }
            | Self::RunFailed { agent_id, .. }
            | Self::StepStarted { agent_id, .. }
            | Self::TemplateResolved { agent_id, .. }
            | Self::ProviderCalled { agent_id, .. }
            | Self::ProviderResponded { agent_id, .. }
            | Self::CacheHit { agent_id, .. }
            | Self::RouteSelected { agent_id, .. } => Some(agent_id),
            Self::StepCompleted { .. } | Self::StepFailed { .. } => None,
        }
    }

    /// Pipeline step the event belongs to, if any
    pub fn step_id(&self) -> Option<&str> {
        match self {
            Self::StepStarted { step_id, .. }
            | Self::StepCompleted { step_id, .. }
            | Self::StepFailed { step_id, .. } => Some(step_id),
            _ => None,
        }
    }

    pub fn is_run_event(&self) -> bool {
        matches!(
            self,
            Self::RunStarted { .. } | Self::RunCompleted { .. } | Self::RunFailed { .. }
        )
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    /// Create a new event log (call at run start)
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event (thread-safe, returns event ID)
    pub fn emit(&self, kind: EventKind) -> u64 {
        let mut events = self.events.write();
        // Assign the id under the lock so ids follow append order
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        events.push(Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        });
        id
    }

    /// Get all events (cloned)
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    pub fn filter_step(&self, step_id: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.step_id() == Some(step_id))
            .collect()
    }

    pub fn filter_agent(&self, agent_id: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.agent_id() == Some(agent_id))
            .collect()
    }

    pub fn run_events(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.is_run_event())
            .collect()
    }

    /// Serialize to JSON for debugging
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.events()).unwrap_or(Value::Null)
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("len", &self.len()).finish()
    }
}
