//! Step output storage for one pipeline run
//!
//! Owned by a single run and only touched by its orchestrator, so a plain
//! map is enough. The pipeline input is stored under [`PIPELINE_INPUT`].

use std::collections::HashMap;

use serde_json::Value;

use crate::definition::PIPELINE_INPUT;
use crate::error::AigneError;
use crate::jsonpath;
use crate::runnable::Output;

#[derive(Debug, Default)]
pub struct DataStore {
    /// step id -> output object as a JSON value
    results: HashMap<String, Value>,
}

impl DataStore {
    /// Store seeded with the pipeline input
    pub fn with_input(input: Output) -> Self {
        let mut store = Self::default();
        store.insert(PIPELINE_INPUT, input);
        store
    }

    pub fn insert(&mut self, step_id: impl Into<String>, output: Output) {
        self.results.insert(step_id.into(), Value::Object(output));
    }

    /// Read `path` from the output of `step_id`
    ///
    /// A step that has not run, or a path that walks off its output, yields
    /// `None`. Only a malformed path is an error.
    pub fn resolve(&self, step_id: &str, path: Option<&str>) -> Result<Option<Value>, AigneError> {
        let Some(output) = self.results.get(step_id) else {
            return Ok(None);
        };
        match path {
            None => Ok(Some(output.clone())),
            Some(path) => jsonpath::resolve(output, path),
        }
    }
}
