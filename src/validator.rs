//! Input and output validation against declared parameters
//!
//! Declared `inputs`/`outputs` are turned into a JSON schema and checked with
//! `jsonschema`. Inputs get defaults applied first; outputs are only checked
//! for complete (non-streamed) results.

use jsonschema::JSONSchema;
use serde_json::{json, Map, Value};

use crate::definition::RunnableDefinition;
use crate::error::AigneError;
use crate::runnable::Output;

/// Apply defaults, then check required inputs and types
pub fn prepare_input(def: &RunnableDefinition, mut input: Output) -> Result<Output, AigneError> {
    for (name, spec) in &def.inputs {
        if let Some(default) = &spec.default {
            if !input.contains_key(name) {
                input.insert(name.clone(), default.clone());
            }
        }
    }

    let schema = object_schema(
        def.inputs
            .iter()
            .map(|(name, spec)| (name.as_str(), spec.value_type.schema(), spec.required)),
    );
    check(&schema, &input).map_err(|reason| AigneError::InvalidInput {
        agent_id: def.id.clone(),
        reason,
    })?;
    Ok(input)
}

/// Check required outputs are present and declared outputs type-correct
pub fn validate_output(def: &RunnableDefinition, output: &Output) -> Result<(), AigneError> {
    if def.outputs.is_empty() {
        return Ok(());
    }
    let schema = object_schema(
        def.outputs
            .iter()
            .map(|(name, spec)| (name.as_str(), spec.value_type.schema(), spec.required)),
    );
    check(&schema, output).map_err(|reason| AigneError::InvalidOutput {
        agent_id: def.id.clone(),
        reason,
    })
}

fn object_schema<'a>(fields: impl Iterator<Item = (&'a str, Value, bool)>) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for (name, schema, is_required) in fields {
        if is_required {
            required.push(Value::String(name.to_string()));
        }
        properties.insert(name.to_string(), schema);
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// All schema violations joined into one message
fn check(schema: &Value, instance: &Output) -> Result<(), String> {
    let compiled = JSONSchema::compile(schema).map_err(|e| format!("invalid schema: {}", e))?;
    let instance = Value::Object(instance.clone());
    let result = compiled.validate(&instance);
    if let Err(errors) = result {
        let messages: Vec<String> = errors.map(|e| e.to_string()).collect();
        return Err(messages.join("; "));
    }
    Ok(())
}
