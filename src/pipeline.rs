//! Pipeline orchestrator
//!
//! Runs process steps strictly in declaration order. Each step's input is
//! resolved from the pipeline input and earlier step outputs, and the pipeline
//! output from its output bindings.
//!
//! Before any step runs, the whole pipeline is planned: bindings are checked
//! by [`FlowGraph`], every step agent is resolved through the registry and
//! every required parameter of those agents must be bound.
//!
//! With `stream = true`, steps that feed a pipeline output and that no later
//! step reads (terminal steps) stream live; all other steps run to completion
//! first. A terminal step's `$text` fragments are forwarded as-is when the
//! pipeline's `$text` output is bound to them, other bound outputs are sent as
//! patches whenever their value changes, and a final patch carries whatever
//! was not forwarded yet.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::binding::{resolve_bindings, Binding};
use crate::context::ExecutionContext;
use crate::datastore::DataStore;
use crate::definition::{PipelineConfig, RunnableDefinition};
use crate::delta::DeltaMerger;
use crate::error::AigneError;
use crate::event_log::EventKind;
use crate::flow_graph::FlowGraph;
use crate::jsonpath;
use crate::record::OrderedRecord;
use crate::registry::Registry;
use crate::runnable::{Output, ResponseStream, RunOptions, RunOutput, Runnable, RunnableResponseDelta, TEXT_KEY};

pub struct PipelineAgent {
    definition: Arc<RunnableDefinition>,
    config: PipelineConfig,
}

/// A validated step with its resolved agent
pub struct PlannedStep {
    id: Arc<str>,
    inputs: OrderedRecord<String, Binding>,
    runnable: Arc<dyn Runnable>,
    depends_on: Vec<Arc<str>>,
    terminal: bool,
}

impl PlannedStep {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn agent_id(&self) -> &str {
        &self.runnable.definition().id
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Earlier steps whose outputs this step reads
    pub fn depends_on(&self) -> &[Arc<str>] {
        &self.depends_on
    }

    fn emit_started(&self, ctx: &ExecutionContext, inputs: &Output, streaming: bool) {
        info!(step = %self.id, agent = %self.agent_id(), streaming, "Step started");
        ctx.event_log().emit(EventKind::StepStarted {
            step_id: Arc::clone(&self.id),
            agent_id: self.agent_id().into(),
            depends_on: self.depends_on.clone(),
            inputs: Value::Object(inputs.clone()),
            streaming,
        });
    }

    fn emit_completed(&self, ctx: &ExecutionContext, output: &Output, elapsed: Duration) {
        debug!(step = %self.id, duration_ms = elapsed.as_millis() as u64, "Step completed");
        ctx.event_log().emit(EventKind::StepCompleted {
            step_id: Arc::clone(&self.id),
            output: Value::Object(output.clone()),
            duration_ms: elapsed.as_millis() as u64,
        });
    }

    /// Record the failure and wrap it with the step identity
    fn fail(&self, ctx: &ExecutionContext, err: AigneError, elapsed: Duration) -> AigneError {
        ctx.event_log().emit(EventKind::StepFailed {
            step_id: Arc::clone(&self.id),
            error: err.to_string(),
            duration_ms: elapsed.as_millis() as u64,
        });
        AigneError::StepFailed {
            step_id: self.id.to_string(),
            agent_id: self.agent_id().to_string(),
            source: Box::new(err),
        }
    }
}

impl PipelineAgent {
    pub fn new(definition: Arc<RunnableDefinition>, config: PipelineConfig) -> Self {
        Self { definition, config }
    }

    /// Validate bindings and resolve every step, without running anything
    pub async fn plan(&self, registry: &Registry) -> Result<Vec<PlannedStep>, AigneError> {
        registry.check_agent_cycles(&self.definition)?;
        let graph = FlowGraph::build(&self.definition.id, &self.config)?;
        let mut planned = Vec::with_capacity(self.config.steps.len());

        for step in graph.steps() {
            let runnable = registry.resolve(&step.agent).await?;
            let target = runnable.definition();
            if let Some(param) = target.required_inputs().find(|param| !step.inputs.contains(param)) {
                return Err(AigneError::MissingRequiredParam {
                    step_id: step.id.clone(),
                    agent_id: target.id.clone(),
                    param: param.to_string(),
                });
            }
            planned.push(PlannedStep {
                id: Arc::from(step.id.as_str()),
                inputs: step.inputs.clone(),
                depends_on: graph.get_dependencies(&step.id).to_vec(),
                terminal: graph.is_terminal(&step.id),
                runnable,
            });
        }
        Ok(planned)
    }
}

async fn run_to_completion(
    step: &PlannedStep,
    store: &mut DataStore,
    ctx: &ExecutionContext,
) -> Result<(), AigneError> {
    let started = Instant::now();
    let inputs = resolve_bindings(&step.inputs, store).map_err(|e| step.fail(ctx, e, started.elapsed()))?;
    step.emit_started(ctx, &inputs, false);

    let result = match step.runnable.run(inputs, RunOptions::complete(), ctx).await {
        Ok(output) => output.into_output().await,
        Err(err) => Err(err),
    };
    match result {
        Ok(output) => {
            let elapsed = started.elapsed();
            step.emit_completed(ctx, &output, elapsed);
            store.insert(step.id(), output);
            Ok(())
        }
        Err(err) => Err(step.fail(ctx, err, started.elapsed())),
    }
}

/// Whether the pipeline `$text` output is exactly `step_id`'s `$text`
fn forwards_text(bindings: &OrderedRecord<String, Binding>, step_id: &str) -> bool {
    matches!(
        bindings.get_str(TEXT_KEY),
        Some(Binding::Variable { from, path: Some(path) }) if from == step_id && path == TEXT_KEY
    )
}

fn evaluate_on(binding: &Binding, output: &Value) -> Result<Option<Value>, AigneError> {
    match binding.path() {
        None => Ok(Some(output.clone())),
        Some(path) => jsonpath::resolve(output, path),
    }
}

fn stream_steps(
    steps: Vec<PlannedStep>,
    bindings: OrderedRecord<String, Binding>,
    input: Output,
    ctx: ExecutionContext,
) -> ResponseStream {
    let stream = async_stream::stream! {
        let mut store = DataStore::with_input(input);
        // Output name -> value already sent in a patch
        let mut forwarded = Output::new();
        let mut text_forwarded = false;

        for step in &steps {
            if !step.is_terminal() {
                if let Err(err) = run_to_completion(step, &mut store, &ctx).await {
                    yield Err(err);
                    return;
                }
                continue;
            }

            let started = Instant::now();
            let inputs = match resolve_bindings(&step.inputs, &store) {
                Ok(inputs) => inputs,
                Err(err) => {
                    yield Err(step.fail(&ctx, err, started.elapsed()));
                    return;
                }
            };
            step.emit_started(&ctx, &inputs, true);

            let mut deltas = match step.runnable.run(inputs, RunOptions::streaming(), &ctx).await {
                Ok(output) => output.into_stream(),
                Err(err) => {
                    yield Err(step.fail(&ctx, err, started.elapsed()));
                    return;
                }
            };

            let forward_text = forwards_text(&bindings, step.id());
            let patched: Vec<(&String, &Binding)> = bindings
                .iter()
                .filter(|(name, binding)| {
                    binding.source() == Some(step.id()) && !(forward_text && name.as_str() == TEXT_KEY)
                })
                .collect();

            let mut merger = DeltaMerger::new();
            while let Some(item) = deltas.next().await {
                let delta = match item {
                    Ok(delta) => delta,
                    Err(err) => {
                        yield Err(step.fail(&ctx, err, started.elapsed()));
                        return;
                    }
                };
                merger.apply(&delta);

                let mut out = RunnableResponseDelta::default();
                if forward_text {
                    if let Some(fragment) = delta.text {
                        text_forwarded = true;
                        out.text = Some(fragment);
                    }
                }
                if !patched.is_empty() {
                    let snapshot = Value::Object(merger.snapshot());
                    let mut patch = Output::new();
                    for (name, binding) in &patched {
                        let value = match evaluate_on(binding, &snapshot) {
                            Ok(value) => value,
                            Err(err) => {
                                yield Err(step.fail(&ctx, err, started.elapsed()));
                                return;
                            }
                        };
                        if let Some(value) = value {
                            if forwarded.get(name.as_str()) != Some(&value) {
                                forwarded.insert(name.to_string(), value.clone());
                                patch.insert(name.to_string(), value);
                            }
                        }
                    }
                    if !patch.is_empty() {
                        out.delta = Some(patch);
                    }
                }
                if !out.is_empty() {
                    yield Ok(out);
                }
            }

            let output = merger.into_output();
            let elapsed = started.elapsed();
            step.emit_completed(&ctx, &output, elapsed);
            store.insert(step.id(), output);
        }

        let outputs = match resolve_bindings(&bindings, &store) {
            Ok(outputs) => outputs,
            Err(err) => {
                yield Err(err);
                return;
            }
        };
        let mut remaining = Output::new();
        for (name, value) in outputs {
            if text_forwarded && name == TEXT_KEY {
                continue;
            }
            if forwarded.get(&name) == Some(&value) {
                continue;
            }
            remaining.insert(name, value);
        }
        if !remaining.is_empty() {
            yield Ok(RunnableResponseDelta::patch(remaining));
        }
    };
    stream.boxed()
}

#[async_trait]
impl Runnable for PipelineAgent {
    fn definition(&self) -> &RunnableDefinition {
        &self.definition
    }

    #[instrument(name = "pipeline", skip(self, input, ctx), fields(pipeline = %self.definition.id, stream = options.stream))]
    async fn run(
        &self,
        input: Output,
        options: RunOptions,
        ctx: &ExecutionContext,
    ) -> Result<RunOutput, AigneError> {
        let steps = self.plan(ctx.registry()).await?;
        debug!(steps = steps.len(), "Pipeline planned");

        if options.stream {
            let stream = stream_steps(steps, self.config.output_bindings.clone(), input, ctx.clone());
            return Ok(RunOutput::Stream(stream));
        }

        let mut store = DataStore::with_input(input);
        for step in &steps {
            run_to_completion(step, &mut store, ctx).await?;
        }
        let output = resolve_bindings(&self.config.output_bindings, &store)?;
        Ok(RunOutput::Complete(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::create_runnable;
    use crate::agent::test_support::{context, object};
    use crate::definition::{
        AgentKind, AgentRef, FunctionConfig, LlmConfig, OutputFormat, ParamSpec, ProcessStep, PromptMessage,
        Role, RouteCandidate, RouterConfig,
    };
    use crate::provider::MockProvider;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn llm(id: &str, prompt: &str, format: OutputFormat) -> RunnableDefinition {
        RunnableDefinition::new(
            id,
            AgentKind::Llm(LlmConfig {
                messages: vec![PromptMessage {
                    role: Role::User,
                    content: prompt.into(),
                }],
                model: None,
                temperature: None,
                top_p: None,
                max_tokens: None,
                output_format: format,
                max_retries: 0,
            }),
        )
        .with_input(
            "question",
            ParamSpec {
                required: true,
                ..ParamSpec::default()
            },
        )
    }

    fn step(id: &str, agent: &str, inputs: &[(&str, Binding)]) -> ProcessStep {
        let mut record = OrderedRecord::new();
        for (name, binding) in inputs {
            record.insert(name.to_string(), binding.clone());
        }
        ProcessStep {
            id: id.into(),
            agent: AgentRef::local(agent),
            inputs: record,
        }
    }

    fn support_pipeline() -> Vec<RunnableDefinition> {
        let classify = llm("classify", "Classify: {{question}}", OutputFormat::Json);
        let answer = llm("answer", "[{{category}}] {{question}}", OutputFormat::Text);

        let mut outputs = OrderedRecord::new();
        outputs.insert("$text".to_string(), Binding::variable("answer", Some("$text")));
        outputs.insert("category".to_string(), Binding::variable("classify", Some("category")));

        let pipeline = RunnableDefinition::new(
            "support",
            AgentKind::Pipeline(PipelineConfig {
                steps: vec![
                    step("classify", "classify", &[("question", Binding::variable("input", Some("question")))]),
                    step(
                        "answer",
                        "answer",
                        &[
                            ("question", Binding::variable("input", Some("question"))),
                            ("category", Binding::variable("classify", Some("category"))),
                        ],
                    ),
                ],
                output_bindings: outputs,
            }),
        );
        vec![pipeline, classify, answer]
    }

    fn provider() -> Arc<MockProvider> {
        Arc::new(MockProvider::with_responses([
            r#"{"category": "billing"}"#,
            "Refunds take five days",
        ]))
    }

    #[tokio::test]
    async fn runs_steps_in_order_with_bindings() {
        let provider = provider();
        let defs = support_pipeline();
        let ctx = context(defs.clone(), provider.clone());

        let output = create_runnable(Arc::new(defs[0].clone()))
            .run(object(json!({"question": "refund?"})), RunOptions::complete(), &ctx)
            .await
            .unwrap()
            .into_output()
            .await
            .unwrap();

        assert_eq!(
            output,
            object(json!({"$text": "Refunds take five days", "category": "billing"}))
        );
        let requests = provider.requests();
        assert_eq!(requests[0].messages[0].content, "Classify: refund?");
        assert_eq!(requests[1].messages[0].content, "[billing] refund?");

        let started: Vec<_> = ctx
            .event_log()
            .events()
            .into_iter()
            .filter_map(|e| match e.kind {
                EventKind::StepStarted { step_id, depends_on, .. } => Some((step_id.to_string(), depends_on)),
                _ => None,
            })
            .collect();
        assert_eq!(
            started,
            vec![
                ("classify".to_string(), Vec::new()),
                ("answer".to_string(), vec![Arc::from("classify")]),
            ]
        );
    }

    #[tokio::test]
    async fn streaming_forwards_terminal_text() {
        let defs = support_pipeline();
        let ctx = context(defs.clone(), provider());

        let RunOutput::Stream(stream) = create_runnable(Arc::new(defs[0].clone()))
            .run(object(json!({"question": "refund?"})), RunOptions::streaming(), &ctx)
            .await
            .unwrap()
        else {
            panic!("expected a stream");
        };
        let deltas: Vec<RunnableResponseDelta> = stream.map(Result::unwrap).collect().await;

        // One delta per word, then the remaining output
        let fragments: Vec<_> = deltas.iter().filter_map(|d| d.text.clone()).collect();
        assert_eq!(fragments, vec!["Refunds ", "take ", "five ", "days"]);
        let last = deltas.last().unwrap();
        assert_eq!(last.delta, Some(object(json!({"category": "billing"}))));

        let mut merger = DeltaMerger::new();
        for delta in &deltas {
            merger.apply(delta);
        }
        assert_eq!(
            merger.into_output(),
            object(json!({"$text": "Refunds take five days", "category": "billing"}))
        );
    }

    #[tokio::test]
    async fn forward_reference_fails_before_any_call() {
        let provider = provider();
        let mut defs = support_pipeline();
        let AgentKind::Pipeline(config) = &mut defs[0].kind else {
            unreachable!()
        };
        config.steps[0]
            .inputs
            .insert("category".into(), Binding::variable("answer", None));
        let ctx = context(defs.clone(), provider.clone());

        let err = create_runnable(Arc::new(defs[0].clone()))
            .run(object(json!({"question": "q"})), RunOptions::complete(), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, AigneError::ForwardReference { .. }));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn unbound_required_param_is_rejected() {
        let provider = provider();
        let mut defs = support_pipeline();
        let AgentKind::Pipeline(config) = &mut defs[0].kind else {
            unreachable!()
        };
        config.steps[1].inputs = OrderedRecord::new();
        let ctx = context(defs.clone(), provider.clone());

        let err = create_runnable(Arc::new(defs[0].clone()))
            .run(object(json!({"question": "q"})), RunOptions::complete(), &ctx)
            .await
            .unwrap_err();
        match err {
            AigneError::MissingRequiredParam { step_id, param, .. } => {
                assert_eq!(step_id, "answer");
                assert_eq!(param, "question");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn step_failure_carries_step_and_agent() {
        let failing = RunnableDefinition::new(
            "explode",
            AgentKind::Function(FunctionConfig {
                code: "exit 1".into(),
            }),
        );
        let mut outputs = OrderedRecord::new();
        outputs.insert("result".to_string(), Binding::variable("boom", None));
        let pipeline = RunnableDefinition::new(
            "p",
            AgentKind::Pipeline(PipelineConfig {
                steps: vec![step("boom", "explode", &[])],
                output_bindings: outputs,
            }),
        );
        let ctx = context(vec![pipeline.clone(), failing], Arc::new(MockProvider::new()));

        for options in [RunOptions::complete(), RunOptions::streaming()] {
            let result = match create_runnable(Arc::new(pipeline.clone())).run(Output::new(), options, &ctx).await {
                Ok(output) => output.into_output().await,
                Err(err) => Err(err),
            };
            match result.unwrap_err() {
                AigneError::StepFailed { step_id, agent_id, source } => {
                    assert_eq!(step_id, "boom");
                    assert_eq!(agent_id, "explode");
                    assert!(matches!(*source, AigneError::Upstream { .. }));
                }
                other => panic!("unexpected error: {:?}", other),
            }
        }
        assert_eq!(ctx.event_log().filter_step("boom").len(), 4);
    }

    #[tokio::test]
    async fn missing_path_omits_the_input_key() {
        let echo = RunnableDefinition::new(
            "echo",
            AgentKind::Function(FunctionConfig {
                code: r#"echo "$AIGNE_ARGS""#.into(),
            }),
        );
        let mut outputs = OrderedRecord::new();
        outputs.insert("seen".to_string(), Binding::variable("echo", None));
        let pipeline = RunnableDefinition::new(
            "p",
            AgentKind::Pipeline(PipelineConfig {
                steps: vec![step(
                    "echo",
                    "echo",
                    &[
                        ("present", Binding::variable("input", Some("a.b"))),
                        ("absent", Binding::variable("input", Some("a.missing.deeper"))),
                        ("fixed", Binding::literal("x")),
                    ],
                )],
                output_bindings: outputs,
            }),
        );
        let ctx = context(vec![pipeline.clone(), echo], Arc::new(MockProvider::new()));

        let output = create_runnable(Arc::new(pipeline))
            .run(object(json!({"a": {"b": 1}})), RunOptions::complete(), &ctx)
            .await
            .unwrap()
            .into_output()
            .await
            .unwrap();
        assert_eq!(output, object(json!({"seen": {"present": 1, "fixed": "x"}})));
    }

    fn pipeline_of(id: &str, steps: Vec<ProcessStep>) -> RunnableDefinition {
        RunnableDefinition::new(
            id,
            AgentKind::Pipeline(PipelineConfig {
                steps,
                output_bindings: OrderedRecord::new(),
            }),
        )
    }

    #[tokio::test]
    async fn self_referencing_pipeline_is_rejected() {
        let provider = provider();
        let looping = pipeline_of("loop", vec![step("again", "loop", &[])]);
        let ctx = context(vec![looping.clone()], provider.clone());

        for options in [RunOptions::complete(), RunOptions::streaming()] {
            let err = create_runnable(Arc::new(looping.clone()))
                .run(Output::new(), options, &ctx)
                .await
                .err()
                .unwrap();
            match err {
                AigneError::CyclicAgentReference { chain } => assert_eq!(chain, "loop -> loop"),
                other => panic!("unexpected error: {:?}", other),
            }
        }
        assert!(matches!(
            ctx.registry().validate_pipelines().await,
            Err(AigneError::CyclicAgentReference { .. })
        ));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn cycle_through_nested_pipeline_and_router_is_rejected() {
        let provider = provider();
        let outer = pipeline_of("outer", vec![step("delegate", "inner", &[])]);
        let inner = pipeline_of("inner", vec![step("pick", "dispatch", &[])]);
        let dispatch = RunnableDefinition::new(
            "dispatch",
            AgentKind::Router(RouterConfig {
                candidates: vec![RouteCandidate {
                    agent: AgentRef::local("outer"),
                    description: None,
                }],
                model: None,
                instructions: None,
                max_retries: 0,
            }),
        );
        let ctx = context(vec![outer.clone(), inner, dispatch], provider.clone());

        let err = create_runnable(Arc::new(outer))
            .run(Output::new(), RunOptions::complete(), &ctx)
            .await
            .err()
            .unwrap();
        match err {
            AigneError::CyclicAgentReference { chain } => {
                assert_eq!(chain, "outer -> inner -> dispatch -> outer")
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn shared_step_agent_is_not_a_cycle() {
        let echo = RunnableDefinition::new(
            "echo",
            AgentKind::Function(FunctionConfig {
                code: r#"echo "$AIGNE_ARGS""#.into(),
            }),
        );
        let inner = pipeline_of("inner", vec![step("first", "echo", &[])]);
        let outer = pipeline_of(
            "outer",
            vec![step("a", "echo", &[]), step("b", "inner", &[]), step("c", "echo", &[])],
        );
        let ctx = context(vec![outer.clone(), inner, echo], Arc::new(MockProvider::new()));

        let planned = PipelineAgent::new(
            Arc::new(outer.clone()),
            match outer.kind {
                AgentKind::Pipeline(config) => config,
                _ => unreachable!(),
            },
        )
        .plan(ctx.registry())
        .await
        .unwrap();
        assert_eq!(planned.len(), 3);
        assert_eq!(ctx.registry().validate_pipelines().await.unwrap(), 2);
    }
}
