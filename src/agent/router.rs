//! Router agent
//!
//! Asks the model to pick one candidate agent and hands the input over to it.
//! The model must answer `{"agent": "<id>"}`; anything else, including an id
//! that is not a candidate, is malformed output and retried.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, instrument};

use super::llm::parse_json_object;
use crate::context::ExecutionContext;
use crate::definition::{RouteCandidate, RouterConfig, RunnableDefinition};
use crate::error::AigneError;
use crate::event_log::EventKind;
use crate::provider::{collect_text, ChatRequest};
use crate::retry::retry;
use crate::runnable::{Output, RunOptions, RunOutput, Runnable};

pub struct RouterAgent {
    definition: Arc<RunnableDefinition>,
    config: RouterConfig,
}

impl RouterAgent {
    pub fn new(definition: Arc<RunnableDefinition>, config: RouterConfig) -> Self {
        Self { definition, config }
    }

    fn system_prompt(&self) -> String {
        let mut prompt = String::new();
        if let Some(instructions) = &self.config.instructions {
            prompt.push_str(instructions);
            prompt.push_str("\n\n");
        }
        prompt.push_str("Choose the agent best suited to handle the input.\n\nAgents:\n");
        for candidate in &self.config.candidates {
            let line = match &candidate.description {
                Some(description) => format!("- {}: {}\n", candidate.agent.agent_id(), description),
                None => format!("- {}\n", candidate.agent.agent_id()),
            };
            prompt.push_str(&line);
        }
        prompt.push_str("\nRespond with only a JSON object: {\"agent\": \"<agent id>\"}");
        prompt
    }

    async fn choose(&self, request: ChatRequest, ctx: &ExecutionContext) -> Result<&RouteCandidate, AigneError> {
        let text = collect_text(ctx.collaborators().call_ai(request).await?).await?;
        let choice = parse_json_object(&text).map_err(|reason| AigneError::malformed(&self.definition.id, reason))?;
        let selected = choice.get("agent").and_then(Value::as_str).ok_or_else(|| {
            AigneError::malformed(&self.definition.id, "missing string field 'agent'")
        })?;

        self.config
            .candidates
            .iter()
            .find(|candidate| candidate.agent.agent_id() == selected)
            .ok_or_else(|| AigneError::malformed(&self.definition.id, format!("'{}' is not a candidate", selected)))
    }
}

#[async_trait]
impl Runnable for RouterAgent {
    fn definition(&self) -> &RunnableDefinition {
        &self.definition
    }

    #[instrument(name = "router", skip(self, input, ctx), fields(agent = %self.definition.id))]
    async fn run(
        &self,
        input: Output,
        options: RunOptions,
        ctx: &ExecutionContext,
    ) -> Result<RunOutput, AigneError> {
        ctx.registry().check_agent_cycles(&self.definition)?;
        let model = self
            .config
            .model
            .clone()
            .unwrap_or_else(|| ctx.config().model.clone());
        let request = ChatRequest::new(model)
            .system(self.system_prompt())
            .user(Value::Object(input.clone()).to_string());

        ctx.event_log().emit(EventKind::ProviderCalled {
            agent_id: self.definition.id.as_str().into(),
            model: request.model.clone(),
            message_count: request.messages.len(),
        });
        let candidate = retry(self.config.max_retries, || self.choose(request.clone(), ctx)).await?;

        info!(selected = %candidate.agent, "Route selected");
        ctx.event_log().emit(EventKind::RouteSelected {
            agent_id: self.definition.id.as_str().into(),
            selected: candidate.agent.to_string(),
        });

        let runnable = ctx.registry().resolve(&candidate.agent).await?;
        runnable.run(input, options, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{context, object};
    use super::*;
    use crate::agent::create_runnable;
    use crate::definition::{AgentKind, AgentRef, FunctionConfig, LlmConfig, OutputFormat, PromptMessage, Role};
    use crate::provider::MockProvider;
    use serde_json::json;

    fn defs() -> Vec<RunnableDefinition> {
        let router = RunnableDefinition::new(
            "triage",
            AgentKind::Router(RouterConfig {
                candidates: vec![
                    RouteCandidate {
                        agent: AgentRef::local("billing"),
                        description: Some("Payments and refunds".into()),
                    },
                    RouteCandidate {
                        agent: AgentRef::local("tech"),
                        description: None,
                    },
                ],
                model: None,
                instructions: None,
                max_retries: 1,
            }),
        );
        let billing = RunnableDefinition::new(
            "billing",
            AgentKind::Function(FunctionConfig {
                code: "echo billing".into(),
            }),
        );
        let tech = RunnableDefinition::new(
            "tech",
            AgentKind::Function(FunctionConfig {
                code: "echo tech".into(),
            }),
        );
        vec![router, billing, tech]
    }

    #[tokio::test]
    async fn runs_the_selected_candidate() {
        let provider = Arc::new(MockProvider::with_responses([r#"{"agent": "support"}"#, r#"{"agent": "billing"}"#]));
        let defs = defs();
        let ctx = context(defs.clone(), provider.clone());

        let output = create_runnable(Arc::new(defs[0].clone()))
            .run(object(json!({"question": "refund?"})), RunOptions::complete(), &ctx)
            .await
            .unwrap()
            .into_output()
            .await
            .unwrap();

        assert_eq!(output, object(json!({"$text": "billing"})));
        assert_eq!(provider.call_count(), 2);
        let requests = provider.requests();
        let system = &requests[0].messages[0].content;
        assert!(system.contains("- billing: Payments and refunds"));
        assert!(system.contains("- tech\n"));
        assert!(ctx
            .event_log()
            .events()
            .iter()
            .any(|e| e.kind == EventKind::RouteSelected { agent_id: "triage".into(), selected: "billing".into() }));
    }

    #[tokio::test]
    async fn unknown_choice_exhausts_retries() {
        let provider = Arc::new(MockProvider::new().with_default(r#"{"agent": "nobody"}"#));
        let defs = defs();
        let ctx = context(defs.clone(), provider.clone());

        let err = create_runnable(Arc::new(defs[0].clone()))
            .run(Output::new(), RunOptions::complete(), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, AigneError::MalformedResponse { .. }));
        assert_eq!(provider.call_count(), 2);
    }

    fn with_writer(mut defs: Vec<RunnableDefinition>) -> Vec<RunnableDefinition> {
        let AgentKind::Router(config) = &mut defs[0].kind else {
            unreachable!()
        };
        config.candidates.push(RouteCandidate {
            agent: AgentRef::local("writer"),
            description: Some("Free-form answers".into()),
        });
        defs.push(RunnableDefinition::new(
            "writer",
            AgentKind::Llm(LlmConfig {
                messages: vec![PromptMessage {
                    role: Role::User,
                    content: "Answer: {{question}}".into(),
                }],
                model: None,
                temperature: None,
                top_p: None,
                max_tokens: None,
                output_format: OutputFormat::Text,
                max_retries: 0,
            }),
        ));
        defs
    }

    #[tokio::test]
    async fn streaming_candidate_matches_complete_run() {
        let defs = with_writer(defs());
        let mut outputs = Vec::new();

        for options in [RunOptions::complete(), RunOptions::streaming()] {
            let provider = Arc::new(MockProvider::with_responses([r#"{"agent": "writer"}"#, "Refunds take five days"]));
            let ctx = context(defs.clone(), provider.clone());
            let output = create_runnable(Arc::new(defs[0].clone()))
                .run(object(json!({"question": "refund?"})), options, &ctx)
                .await
                .unwrap();
            assert_eq!(matches!(output, RunOutput::Stream(_)), options.stream);
            outputs.push(output.into_output().await.unwrap());
            assert_eq!(provider.requests()[1].messages[0].content, "Answer: refund?");
        }

        assert_eq!(outputs[0], object(json!({"$text": "Refunds take five days"})));
        assert_eq!(outputs[0], outputs[1]);
    }

    #[tokio::test]
    async fn self_routing_is_rejected_before_the_model_call() {
        let mut defs = defs();
        let AgentKind::Router(config) = &mut defs[0].kind else {
            unreachable!()
        };
        config.candidates.push(RouteCandidate {
            agent: AgentRef::local("triage"),
            description: None,
        });
        let provider = Arc::new(MockProvider::new().with_default(r#"{"agent": "triage"}"#));
        let ctx = context(defs.clone(), provider.clone());

        let err = create_runnable(Arc::new(defs[0].clone()))
            .run(Output::new(), RunOptions::complete(), &ctx)
            .await
            .unwrap_err();
        match err {
            AigneError::CyclicAgentReference { chain } => assert_eq!(chain, "triage -> triage"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(provider.call_count(), 0);
    }
}
