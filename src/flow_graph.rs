//! Flow graph built from pipeline steps (Arc<str> optimized)
//!
//! Building the graph is where pipeline bindings are validated: every `from`
//! must name `input` or a step declared earlier, so the declaration order is
//! always a valid execution order.

use std::collections::HashMap;
use std::sync::Arc;

use crate::definition::{PipelineConfig, ProcessStep, PIPELINE_INPUT};
use crate::error::AigneError;
use crate::jsonpath;
use crate::record::OrderedRecord;

/// Step dependencies of one pipeline
pub struct FlowGraph {
    /// Steps in declaration order
    steps: OrderedRecord<String, ProcessStep>,
    /// step_id -> steps it reads from (never `input`)
    predecessors: HashMap<Arc<str>, Vec<Arc<str>>>,
    /// step_id -> later steps reading from it
    successors: HashMap<Arc<str>, Vec<Arc<str>>>,
    /// Steps read by at least one output binding
    output_sources: Vec<Arc<str>>,
}

impl FlowGraph {
    pub fn build(pipeline_id: &str, config: &PipelineConfig) -> Result<Self, AigneError> {
        let capacity = config.steps.len();
        let mut steps: OrderedRecord<String, ProcessStep> = OrderedRecord::new();
        let mut predecessors: HashMap<Arc<str>, Vec<Arc<str>>> = HashMap::with_capacity(capacity);
        let mut successors: HashMap<Arc<str>, Vec<Arc<str>>> = HashMap::with_capacity(capacity);

        for step in &config.steps {
            if step.id == PIPELINE_INPUT {
                return Err(AigneError::invalid_definition(
                    pipeline_id,
                    format!("step id '{}' is reserved for the pipeline input", PIPELINE_INPUT),
                ));
            }
            if steps.contains(&step.id) {
                return Err(AigneError::DuplicateId {
                    id: format!("{}.{}", pipeline_id, step.id),
                });
            }

            let id: Arc<str> = Arc::from(step.id.as_str());
            let mut reads: Vec<Arc<str>> = Vec::new();
            for (param, binding) in &step.inputs {
                if let Some(path) = binding.path() {
                    jsonpath::parse(path)?;
                }
                let Some(from) = binding.source() else {
                    continue;
                };
                if from == PIPELINE_INPUT {
                    continue;
                }
                if !steps.contains(from) {
                    let declared = config.steps.iter().any(|s| s.id == from);
                    return Err(if declared {
                        AigneError::ForwardReference {
                            step_id: step.id.clone(),
                            param: param.clone(),
                            from: from.to_string(),
                        }
                    } else {
                        AigneError::UnknownStep {
                            step_id: step.id.clone(),
                            param: param.clone(),
                            from: from.to_string(),
                        }
                    });
                }
                if !reads.iter().any(|r| r.as_ref() == from) {
                    let source: Arc<str> = Arc::from(from);
                    successors
                        .entry(Arc::clone(&source))
                        .or_default()
                        .push(Arc::clone(&id));
                    reads.push(source);
                }
            }

            predecessors.insert(id, reads);
            steps.insert(step.id.clone(), step.clone());
        }

        let mut output_sources: Vec<Arc<str>> = Vec::new();
        for (output, binding) in &config.output_bindings {
            if let Some(path) = binding.path() {
                jsonpath::parse(path)?;
            }
            let Some(from) = binding.source() else {
                continue;
            };
            if from == PIPELINE_INPUT {
                continue;
            }
            if !steps.contains(from) {
                return Err(AigneError::UnknownOutputSource {
                    pipeline_id: pipeline_id.to_string(),
                    output: output.clone(),
                    from: from.to_string(),
                });
            }
            if !output_sources.iter().any(|s| s.as_ref() == from) {
                output_sources.push(Arc::from(from));
            }
        }

        Ok(Self {
            steps,
            predecessors,
            successors,
            output_sources,
        })
    }

    /// Steps in execution order
    pub fn steps(&self) -> impl Iterator<Item = &ProcessStep> {
        self.steps.values()
    }

    /// Steps `step_id` reads from
    #[inline]
    pub fn get_dependencies(&self, step_id: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.predecessors
            .get(step_id)
            .map(|v| v.as_slice())
            .unwrap_or(EMPTY)
    }

    /// Steps reading from `step_id`
    #[inline]
    pub fn get_successors(&self, step_id: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.successors
            .get(step_id)
            .map(|v| v.as_slice())
            .unwrap_or(EMPTY)
    }

    /// Feeds a pipeline output and no later step reads it
    pub fn is_terminal(&self, step_id: &str) -> bool {
        self.output_sources.iter().any(|s| s.as_ref() == step_id)
            && self.get_successors(step_id).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::Binding;
    use crate::definition::AgentRef;

    fn step(id: &str, reads: &[(&str, &str)]) -> ProcessStep {
        let mut inputs = OrderedRecord::new();
        for (param, from) in reads {
            inputs.insert(param.to_string(), Binding::variable(*from, None));
        }
        ProcessStep {
            id: id.to_string(),
            agent: AgentRef::local("agent"),
            inputs,
        }
    }

    fn pipeline(steps: Vec<ProcessStep>, outputs: &[(&str, &str)]) -> PipelineConfig {
        let mut output_bindings = OrderedRecord::new();
        for (name, from) in outputs {
            output_bindings.insert(name.to_string(), Binding::variable(*from, Some("$text")));
        }
        PipelineConfig {
            steps,
            output_bindings,
        }
    }

    #[test]
    fn chain_dependencies_and_terminals() {
        let config = pipeline(
            vec![
                step("classify", &[("q", "input")]),
                step("answer", &[("q", "input"), ("category", "classify")]),
            ],
            &[("$text", "answer"), ("category", "classify")],
        );
        let graph = FlowGraph::build("support", &config).unwrap();

        assert_eq!(graph.steps().count(), 2);
        assert_eq!(graph.get_dependencies("answer").len(), 1);
        assert_eq!(graph.get_dependencies("classify").len(), 0);
        assert_eq!(graph.get_successors("classify")[0].as_ref(), "answer");
        // classify feeds an output but answer depends on it
        assert!(!graph.is_terminal("classify"));
        assert!(graph.is_terminal("answer"));
    }

    #[test]
    fn forward_and_self_references_are_rejected() {
        let forward = pipeline(vec![step("a", &[("x", "b")]), step("b", &[])], &[]);
        assert!(matches!(
            FlowGraph::build("p", &forward),
            Err(AigneError::ForwardReference { .. })
        ));

        let itself = pipeline(vec![step("a", &[("x", "a")])], &[]);
        assert!(matches!(
            FlowGraph::build("p", &itself),
            Err(AigneError::ForwardReference { .. })
        ));
    }

    #[test]
    fn unknown_sources_are_rejected() {
        let unknown = pipeline(vec![step("a", &[("x", "ghost")])], &[]);
        assert!(matches!(
            FlowGraph::build("p", &unknown),
            Err(AigneError::UnknownStep { .. })
        ));

        let bad_output = pipeline(vec![step("a", &[])], &[("$text", "ghost")]);
        assert!(matches!(
            FlowGraph::build("p", &bad_output),
            Err(AigneError::UnknownOutputSource { .. })
        ));
    }

    #[test]
    fn reserved_and_duplicate_ids_are_rejected() {
        let reserved = pipeline(vec![step("input", &[])], &[]);
        assert!(matches!(
            FlowGraph::build("p", &reserved),
            Err(AigneError::InvalidDefinition { .. })
        ));

        let duplicate = pipeline(vec![step("a", &[]), step("a", &[])], &[]);
        assert!(matches!(
            FlowGraph::build("p", &duplicate),
            Err(AigneError::DuplicateId { .. })
        ));
    }
}
