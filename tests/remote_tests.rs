//! Pipelines calling agents hosted by another component

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use aigne_runtime::provider::MockProvider;
use aigne_runtime::{
    AigneError, InMemoryCollaborators, Output, Project, Registry, RunOptions, Runtime,
    RuntimeConfig,
};

const PROJECT: &str = r#"
id: local
agents:
  - id: digest
    type: pipeline
    inputs:
      text: { type: string, required: true }
    steps:
      - id: summarize
        agent: { component: kb, project: shared, id: summarize }
        inputs:
          text: { from: input, path: text }
    output_bindings:
      summary: { from: summarize, path: summary }
"#;

async fn mount_definition(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/aigne/shared/agents/summarize/definition"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "summarize",
            "type": "function",
            "code": "cat",
            "inputs": { "text": { "type": "string", "required": true } },
            "outputs": { "summary": { "type": "string" } }
        })))
        .expect(1)
        .mount(server)
        .await;
}

fn runtime(server: &MockServer) -> Runtime {
    let mut config = RuntimeConfig::default();
    config.components.insert("kb".into(), server.uri());
    let project = Project::from_yaml_str(PROJECT).unwrap();
    let registry = Registry::new(project.id, project.agents, config).unwrap();
    let collaborators = InMemoryCollaborators::new(Arc::new(MockProvider::new())).without_env_secrets();
    Runtime::new(Arc::new(registry), Arc::new(collaborators))
}

fn input(text: &str) -> Output {
    let mut input = Output::new();
    input.insert("text".into(), json!(text));
    input
}

#[tokio::test]
async fn remote_step_runs_through_component() {
    let server = MockServer::start().await;
    mount_definition(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/aigne/shared/agents/summarize/run"))
        .and(body_partial_json(json!({
            "input": { "text": "a long document" },
            "options": { "stream": false }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"summary": "short"})))
        .expect(2)
        .mount(&server)
        .await;

    let runtime = runtime(&server);
    for _ in 0..2 {
        let output = runtime
            .run("digest", input("a long document"), RunOptions::complete())
            .await
            .unwrap()
            .into_output()
            .await
            .unwrap();
        assert_eq!(Value::Object(output), json!({"summary": "short"}));
    }
    assert_eq!(runtime.registry().remote_cache_len(), 1);
}

#[tokio::test]
async fn remote_stream_is_forwarded() {
    let server = MockServer::start().await;
    mount_definition(&server).await;
    let body = "data: {\"delta\":{\"summary\":\"sh\"}}\n\ndata: {\"delta\":{\"summary\":\"short\"}}\n\n";
    Mock::given(method("POST"))
        .and(path("/api/aigne/shared/agents/summarize/run"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let output = runtime(&server)
        .run("digest", input("a long document"), RunOptions::streaming())
        .await
        .unwrap()
        .into_output()
        .await
        .unwrap();
    assert_eq!(Value::Object(output), json!({"summary": "short"}));
}

#[tokio::test]
async fn component_error_fails_the_step() {
    let server = MockServer::start().await;
    mount_definition(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/aigne/shared/agents/summarize/run"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"error": {"message": "model overloaded"}})),
        )
        .mount(&server)
        .await;

    let err = runtime(&server)
        .run("digest", input("a long document"), RunOptions::complete())
        .await
        .unwrap_err();

    match err {
        AigneError::StepFailed { step_id, source, .. } => {
            assert_eq!(step_id, "summarize");
            assert!(source.to_string().contains("model overloaded"));
        }
        other => panic!("expected step failure, got {other:?}"),
    }
}
