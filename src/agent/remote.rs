//! Agents exposed by other components
//!
//! ```text
//! POST {base}api/aigne/{project}/agents/{agent}/run        { input, options }
//! GET  {base}api/aigne/{project}/agents/{agent}/definition
//! ```
//!
//! Streaming runs answer with `text/event-stream` frames decoded by
//! [`crate::sse::decode_stream`]. Non-2xx answers carry `{ error: { message } }`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, instrument};
use url::Url;

use crate::context::ExecutionContext;
use crate::definition::{AgentKind, RemoteConfig, RunnableDefinition};
use crate::error::AigneError;
use crate::runnable::{Output, RunOptions, RunOutput, Runnable};
use crate::sse::{self, ErrorBody};

fn agent_url(base: &Url, project: &str, agent: &str, action: &str) -> Result<Url, AigneError> {
    base.join(&format!("api/aigne/{}/agents/{}/{}", project, agent, action))
        .map_err(|e| AigneError::Config {
            reason: format!("Invalid remote agent URL for '{}': {}", agent, e),
        })
}

/// Fail on non-2xx, taking the message from the error body when present
async fn ensure_success(response: reqwest::Response, url: &Url) -> Result<reqwest::Response, AigneError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|parsed| parsed.error.message)
        .unwrap_or(body);
    Err(AigneError::HttpStatus {
        status: status.as_u16(),
        url: url.to_string(),
        message,
    })
}

/// Fetch the definition a component publishes for one of its agents
pub async fn fetch_definition(
    http: &reqwest::Client,
    base: &Url,
    project: &str,
    agent: &str,
) -> Result<RunnableDefinition, AigneError> {
    let url = agent_url(base, project, agent, "definition")?;
    debug!(url = %url, "Fetching remote definition");
    let response = ensure_success(http.get(url.clone()).send().await?, &url).await?;
    response
        .json::<RunnableDefinition>()
        .await
        .map_err(|e| AigneError::malformed(url.as_str(), e))
}

/// Local stand-in for a fetched definition
///
/// Keeps the remote agent's declared inputs and outputs but always executes
/// remotely.
pub fn proxy_definition(
    remote: RunnableDefinition,
    component: &str,
    project: &str,
    agent: &str,
) -> RunnableDefinition {
    RunnableDefinition {
        id: agent.to_string(),
        name: remote.name,
        description: remote.description,
        inputs: remote.inputs,
        outputs: remote.outputs,
        cache: false,
        kind: AgentKind::Remote(RemoteConfig {
            component: component.to_string(),
            project: Some(project.to_string()),
            agent: agent.to_string(),
        }),
    }
}

pub struct RemoteAgent {
    definition: Arc<RunnableDefinition>,
    config: RemoteConfig,
}

impl RemoteAgent {
    pub fn new(definition: Arc<RunnableDefinition>, config: RemoteConfig) -> Self {
        Self { definition, config }
    }
}

#[async_trait]
impl Runnable for RemoteAgent {
    fn definition(&self) -> &RunnableDefinition {
        &self.definition
    }

    #[instrument(name = "remote", skip(self, input, ctx), fields(component = %self.config.component, agent = %self.config.agent))]
    async fn run(
        &self,
        input: Output,
        options: RunOptions,
        ctx: &ExecutionContext,
    ) -> Result<RunOutput, AigneError> {
        let base = ctx.config().component_url(&self.config.component)?;
        let project = self.config.project.as_deref().unwrap_or(ctx.project_id());
        let url = agent_url(&base, project, &self.config.agent, "run")?;

        let payload = json!({
            "input": input,
            "options": { "stream": options.stream },
        });
        let response = ctx.http().post(url.clone()).json(&payload).send().await?;
        let response = ensure_success(response, &url).await?;

        if options.stream {
            return Ok(RunOutput::Stream(sse::decode_stream(Box::pin(response.bytes_stream()))));
        }

        match response.json::<Value>().await {
            Ok(Value::Object(output)) => Ok(RunOutput::Complete(output)),
            Ok(other) => Err(AigneError::malformed(
                url.as_str(),
                format!("expected a JSON object, got: {}", other),
            )),
            Err(e) => Err(AigneError::malformed(url.as_str(), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{collaborators, context_with, object};
    use super::*;
    use crate::agent::create_runnable;
    use crate::config::RuntimeConfig;
    use crate::provider::MockProvider;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn setup(server: &MockServer) -> (RunnableDefinition, ExecutionContext) {
        let def = RunnableDefinition::new(
            "summarize",
            AgentKind::Remote(RemoteConfig {
                component: "writer".into(),
                project: Some("docs".into()),
                agent: "summary".into(),
            }),
        );
        let mut config = RuntimeConfig::default();
        config.components.insert("writer".into(), format!("{}/base", server.uri()));
        let ctx = context_with(vec![def.clone()], config, collaborators(Arc::new(MockProvider::new())));
        (def, ctx)
    }

    #[tokio::test]
    async fn complete_run_posts_input() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/base/api/aigne/docs/agents/summary/run"))
            .and(body_partial_json(json!({"input": {"text": "long"}, "options": {"stream": false}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"$text": "short"})))
            .mount(&server)
            .await;

        let (def, ctx) = setup(&server);
        let output = create_runnable(Arc::new(def))
            .run(object(json!({"text": "long"})), RunOptions::complete(), &ctx)
            .await
            .unwrap()
            .into_output()
            .await
            .unwrap();
        assert_eq!(output, object(json!({"$text": "short"})));
    }

    #[tokio::test]
    async fn streaming_run_decodes_sse() {
        let server = MockServer::start().await;
        let body = "data: {\"$text\":\"sh\"}\n\ndata: {\"$text\":\"ort\"}\n\ndata: {\"delta\":{\"words\":1}}\n\n";
        Mock::given(method("POST"))
            .and(path("/base/api/aigne/docs/agents/summary/run"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let (def, ctx) = setup(&server);
        let output = create_runnable(Arc::new(def))
            .run(Output::new(), RunOptions::streaming(), &ctx)
            .await
            .unwrap()
            .into_output()
            .await
            .unwrap();
        assert_eq!(output, object(json!({"$text": "short", "words": 1})));
    }

    #[tokio::test]
    async fn error_body_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"error": {"message": "no such agent"}})),
            )
            .mount(&server)
            .await;

        let (def, ctx) = setup(&server);
        let err = create_runnable(Arc::new(def))
            .run(Output::new(), RunOptions::complete(), &ctx)
            .await
            .unwrap_err();
        match err {
            AigneError::HttpStatus { status, message, .. } => {
                assert_eq!(status, 404);
                assert_eq!(message, "no such agent");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn fetches_definition() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/aigne/docs/agents/summary/definition"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "summary",
                "type": "llm",
                "inputs": {"text": {"type": "string", "required": true}},
                "messages": [{"role": "user", "content": "{{text}}"}]
            })))
            .mount(&server)
            .await;

        let base = Url::parse(&format!("{}/", server.uri())).unwrap();
        let fetched = fetch_definition(&reqwest::Client::new(), &base, "docs", "summary")
            .await
            .unwrap();
        let proxy = proxy_definition(fetched, "writer", "docs", "summary");
        assert_eq!(proxy.required_inputs().collect::<Vec<_>>(), vec!["text"]);
        assert_eq!(proxy.kind.name(), "remote");
    }
}
