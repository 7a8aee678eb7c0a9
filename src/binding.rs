//! Input bindings for pipeline steps and pipeline outputs
//!
//! Two forms (serde auto-detects via untagged):
//! - `{ from: step, path: a.b }` reads a value from an earlier step or `input`
//! - `{ value: <json> }` copies a literal

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::datastore::DataStore;
use crate::error::AigneError;
use crate::record::OrderedRecord;
use crate::runnable::Output;

/// Where a parameter's value comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Binding {
    /// Read from the output of `from`, optionally walking `path`
    Variable {
        from: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// Fixed value
    Literal { value: Value },
}

impl Binding {
    pub fn variable(from: impl Into<String>, path: Option<&str>) -> Self {
        Binding::Variable {
            from: from.into(),
            path: path.map(str::to_string),
        }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Binding::Literal {
            value: value.into(),
        }
    }

    /// Step id this binding reads from, if any
    pub fn source(&self) -> Option<&str> {
        match self {
            Binding::Variable { from, .. } => Some(from),
            Binding::Literal { .. } => None,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            Binding::Variable { path, .. } => path.as_deref(),
            Binding::Literal { .. } => None,
        }
    }

    /// Evaluate against stored outputs; `None` means undefined
    pub fn evaluate(&self, store: &DataStore) -> Result<Option<Value>, AigneError> {
        match self {
            Binding::Literal { value } => Ok(Some(value.clone())),
            Binding::Variable { from, path } => store.resolve(from, path.as_deref()),
        }
    }
}

/// Resolve every binding into an input object
///
/// Undefined values are omitted rather than set to null, so the callee's
/// defaults and required checks see a missing key.
pub fn resolve_bindings(
    bindings: &OrderedRecord<String, Binding>,
    store: &DataStore,
) -> Result<Output, AigneError> {
    let mut resolved = Output::new();
    for (key, binding) in bindings {
        if let Some(value) = binding.evaluate(store)? {
            resolved.insert(key.clone(), value);
        }
    }
    Ok(resolved)
}
