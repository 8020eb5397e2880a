//! End-to-end integration tests for toolrelay.
//!
//! These tests exercise the full pipeline from user message to final answer:
//! a scripted model, real HTTP tool providers on local ports, the registry
//! cache, the dispatcher, the agent loop and the gateway.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Json, Router,
    http::StatusCode,
    routing::{get, post},
};
use serde_json::{Value, json};

use toolrelay_agent::{AgentLoop, AgentStreamEvent, Termination};
use toolrelay_config::AppConfig;
use toolrelay_core::error::ModelError;
use toolrelay_core::message::{ContentBlock, ConversationTurn, validate_pairing};
use toolrelay_core::provider::{ModelClient, ModelRequest, ModelResponse, StopReason, Usage};
use toolrelay_tools::{RegistryCache, ToolDispatcher, ToolProviderEndpoint};

// ── Mock Model ───────────────────────────────────────────────────────────

/// A mock model that returns scripted responses in sequence and keeps
/// every request it saw.
struct ScriptedModel {
    responses: std::sync::Mutex<Vec<ModelResponse>>,
    requests: std::sync::Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, n: usize) -> ModelRequest {
        self.requests.lock().unwrap()[n].clone()
    }
}

#[async_trait::async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let mut requests = self.requests.lock().unwrap();
        let responses = self.responses.lock().unwrap();
        let call = requests.len();
        if call >= responses.len() {
            panic!(
                "ScriptedModel exhausted: call #{}, have {}",
                call,
                responses.len()
            );
        }
        requests.push(request);
        Ok(responses[call].clone())
    }
}

fn usage() -> Option<Usage> {
    Some(Usage {
        input_tokens: 10,
        output_tokens: 5,
    })
}

fn text_response(text: &str) -> ModelResponse {
    ModelResponse {
        content: vec![ContentBlock::text(text)],
        stop_reason: StopReason::EndTurn,
        usage: usage(),
        model: "mock".into(),
    }
}

fn tool_response(thought: &str, calls: &[(&str, &str, Value)]) -> ModelResponse {
    let mut content = Vec::new();
    if !thought.is_empty() {
        content.push(ContentBlock::text(thought));
    }
    for (id, name, input) in calls {
        content.push(ContentBlock::tool_use(*id, *name, input.clone()));
    }
    ModelResponse {
        content,
        stop_reason: StopReason::ToolUse,
        usage: usage(),
        model: "mock".into(),
    }
}

// ── Tool providers ───────────────────────────────────────────────────────

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn number_tool(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
            "required": ["a", "b"]
        }
    })
}

/// A calculator provider with `add`, `multiply` and `divide`.
async fn calculator(executions: Arc<AtomicUsize>) -> ToolProviderEndpoint {
    let app = Router::new()
        .route(
            "/tools",
            get(|| async {
                Json(json!({"tools": [
                    number_tool("add", "Add two numbers"),
                    number_tool("multiply", "Multiply two numbers"),
                    number_tool("divide", "Divide a by b"),
                ]}))
            }),
        )
        .route(
            "/execute",
            post(move |Json(body): Json<Value>| {
                let executions = executions.clone();
                async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    let a = body["arguments"]["a"].as_f64().unwrap_or(0.0);
                    let b = body["arguments"]["b"].as_f64().unwrap_or(0.0);
                    match body["tool"].as_str().unwrap_or_default() {
                        "add" => (StatusCode::OK, Json(json!({"result": a + b}))),
                        "multiply" => (StatusCode::OK, Json(json!({"result": a * b}))),
                        "divide" if b == 0.0 => (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            Json(json!({"error": "Division by zero"})),
                        ),
                        "divide" => (StatusCode::OK, Json(json!({"result": a / b}))),
                        other => (
                            StatusCode::NOT_FOUND,
                            Json(json!({"error": format!("no tool {other}")})),
                        ),
                    }
                }
            }),
        );
    ToolProviderEndpoint::new("calculator", serve(app).await)
}

/// A filesystem provider whose `read_file` echoes the path.
async fn filesystem() -> ToolProviderEndpoint {
    let app = Router::new()
        .route(
            "/tools",
            get(|| async {
                Json(json!({"tools": [
                    {"name": "read_file", "description": "Read a file"},
                    number_tool("add", "Shadowed add"),
                ]}))
            }),
        )
        .route(
            "/execute",
            post(|Json(body): Json<Value>| async move {
                let path = body["arguments"]["path"].as_str().unwrap_or_default().to_string();
                Json(json!({"result": {"path": path, "content": "hello"}}))
            }),
        );
    ToolProviderEndpoint::new("filesystem", serve(app).await)
}

fn dead_provider(name: &str) -> ToolProviderEndpoint {
    ToolProviderEndpoint::new(name, "http://127.0.0.1:1")
}

fn agent_over(model: Arc<ScriptedModel>, providers: Vec<ToolProviderEndpoint>) -> AgentLoop {
    let cache = Arc::new(RegistryCache::new(providers, Duration::from_secs(5)));
    let dispatcher = ToolDispatcher::new(cache, Duration::from_secs(5));
    AgentLoop::new(model, Arc::new(dispatcher), "mock")
}

fn tool_results(transcript: &[ConversationTurn]) -> Vec<(String, String, bool)> {
    transcript
        .iter()
        .filter_map(|turn| match turn {
            ConversationTurn::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Some((tool_use_id.clone(), content.clone(), *is_error)),
            _ => None,
        })
        .collect()
}

// ── E2E: Orchestration ───────────────────────────────────────────────────

#[tokio::test]
async fn e2e_calculator_tool_invocation() {
    let executions = Arc::new(AtomicUsize::new(0));
    let provider = calculator(executions.clone()).await;
    let model = Arc::new(ScriptedModel::new(vec![
        tool_response(
            "Let me add those.",
            &[("toolu_1", "add", json!({"a": 10, "b": 5}))],
        ),
        text_response("10 + 5 = 15"),
    ]));

    let outcome = agent_over(model.clone(), vec![provider])
        .run("What is 10 + 5?", 10)
        .await;

    assert_eq!(outcome.termination, Termination::Completed);
    assert_eq!(outcome.response, "10 + 5 = 15");
    assert_eq!(outcome.turns, 2);
    assert_eq!(outcome.tool_calls.len(), 1);
    assert_eq!(outcome.tool_calls[0].tool, "add");
    assert_eq!(outcome.usage.total_tokens(), 30);
    assert_eq!(executions.load(Ordering::SeqCst), 1);

    let results = tool_results(&outcome.transcript);
    assert_eq!(results, vec![("toolu_1".into(), "15.0".into(), false)]);
    validate_pairing(&outcome.transcript).unwrap();

    // The model saw the catalog and, on the second call, the tool result
    let first = model.request(0);
    let names: Vec<_> = first.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["add", "multiply", "divide"]);
    assert_eq!(model.request(1).turns.len(), 3);
}

#[tokio::test]
async fn e2e_tool_error_is_fed_back_to_model() {
    let provider = calculator(Arc::new(AtomicUsize::new(0))).await;
    let model = Arc::new(ScriptedModel::new(vec![
        tool_response("", &[("toolu_1", "divide", json!({"a": 10, "b": 0}))]),
        text_response("You cannot divide by zero."),
    ]));

    let outcome = agent_over(model, vec![provider])
        .run("What is 10 / 0?", 10)
        .await;

    assert_eq!(outcome.termination, Termination::Completed);
    assert_eq!(outcome.response, "You cannot divide by zero.");

    let results = tool_results(&outcome.transcript);
    assert_eq!(results.len(), 1);
    assert!(results[0].2);
    assert_eq!(
        results[0].1,
        r#"{"error":"Tool execution failed: 500 Division by zero"}"#
    );
}

#[tokio::test]
async fn e2e_unknown_tool_does_not_abort_run() {
    let provider = calculator(Arc::new(AtomicUsize::new(0))).await;
    let model = Arc::new(ScriptedModel::new(vec![
        tool_response("", &[("toolu_1", "sqrt", json!({"x": 16}))]),
        text_response("I have no sqrt tool."),
    ]));

    let outcome = agent_over(model, vec![provider]).run("sqrt 16", 10).await;

    assert_eq!(outcome.termination, Termination::Completed);
    let results = tool_results(&outcome.transcript);
    assert_eq!(
        results,
        vec![(
            "toolu_1".into(),
            r#"{"error":"Tool sqrt not found"}"#.into(),
            true
        )]
    );
}

#[tokio::test]
async fn e2e_multiple_calls_answered_in_emission_order() {
    let provider = calculator(Arc::new(AtomicUsize::new(0))).await;
    let model = Arc::new(ScriptedModel::new(vec![
        tool_response(
            "Both at once.",
            &[
                ("toolu_a", "multiply", json!({"a": 6, "b": 7})),
                ("toolu_b", "add", json!({"a": 1, "b": 2})),
            ],
        ),
        text_response("42 and 3"),
    ]));

    let outcome = agent_over(model, vec![provider]).run("6*7 and 1+2", 10).await;

    assert_eq!(outcome.termination, Termination::Completed);
    let ids: Vec<_> = outcome
        .tool_calls
        .iter()
        .map(|c| c.tool_use_id.as_str())
        .collect();
    assert_eq!(ids, vec!["toolu_a", "toolu_b"]);

    let results = tool_results(&outcome.transcript);
    assert_eq!(results[0], ("toolu_a".into(), "42.0".into(), false));
    assert_eq!(results[1], ("toolu_b".into(), "3.0".into(), false));
    validate_pairing(&outcome.transcript).unwrap();
}

#[tokio::test]
async fn e2e_tools_from_two_providers_first_wins_clash() {
    let calc = calculator(Arc::new(AtomicUsize::new(0))).await;
    let fs = filesystem().await;
    let model = Arc::new(ScriptedModel::new(vec![
        tool_response(
            "",
            &[
                ("toolu_1", "read_file", json!({"path": "/notes.txt"})),
                ("toolu_2", "add", json!({"a": 2, "b": 2})),
            ],
        ),
        text_response("done"),
    ]));

    let outcome = agent_over(model.clone(), vec![calc, fs]).run("read and add", 10).await;

    assert_eq!(outcome.termination, Termination::Completed);
    let results = tool_results(&outcome.transcript);
    assert_eq!(
        results[0].1,
        r#"{"content":"hello","path":"/notes.txt"}"#
    );
    // add stays with the calculator, which was configured first
    assert_eq!(results[1].1, "4.0");

    let tools = model.request(0).tools;
    assert_eq!(tools.iter().filter(|t| t.name == "add").count(), 1);
    assert!(tools.iter().any(|t| t.name == "read_file"));
}

#[tokio::test]
async fn e2e_one_provider_down_others_still_serve() {
    let calc = calculator(Arc::new(AtomicUsize::new(0))).await;
    let model = Arc::new(ScriptedModel::new(vec![
        tool_response("", &[("toolu_1", "add", json!({"a": 1, "b": 1}))]),
        text_response("2"),
    ]));

    let outcome = agent_over(model, vec![dead_provider("filesystem"), calc])
        .run("1 + 1", 10)
        .await;

    assert_eq!(outcome.termination, Termination::Completed);
    assert_eq!(outcome.response, "2");
}

#[tokio::test]
async fn e2e_all_providers_down_runs_without_tools() {
    let model = Arc::new(ScriptedModel::new(vec![text_response(
        "I have no tools right now, but hello.",
    )]));

    let outcome = agent_over(
        model.clone(),
        vec![dead_provider("filesystem"), dead_provider("calculator")],
    )
    .run("anything", 10)
    .await;

    assert_eq!(outcome.termination, Termination::Completed);
    assert_eq!(outcome.turns, 1);
    assert_eq!(outcome.response, "I have no tools right now, but hello.");
    assert!(outcome.tool_calls.is_empty());
    assert_eq!(model.calls(), 1);
    assert!(model.request(0).tools.is_empty());
}

#[tokio::test]
async fn e2e_turn_budget_is_enforced() {
    let provider = calculator(Arc::new(AtomicUsize::new(0))).await;
    let model = Arc::new(ScriptedModel::new(
        (0..3)
            .map(|i| {
                let id = format!("toolu_{i}");
                tool_response("", &[(id.as_str(), "add", json!({"a": i, "b": 1}))])
            })
            .collect(),
    ));

    let outcome = agent_over(model.clone(), vec![provider]).run("loop", 3).await;

    assert_eq!(outcome.termination, Termination::MaxTurnsExceeded);
    assert_eq!(outcome.response, "Max turns reached");
    assert_eq!(outcome.turns, 3);
    assert_eq!(outcome.tool_calls.len(), 3);
    assert_eq!(model.calls(), 3);
}

#[tokio::test]
async fn e2e_streaming_run_over_real_providers() {
    let provider = calculator(Arc::new(AtomicUsize::new(0))).await;
    let model = Arc::new(ScriptedModel::new(vec![
        tool_response("Adding.", &[("toolu_1", "add", json!({"a": 10, "b": 5}))]),
        text_response("15"),
    ]));

    let mut rx = agent_over(model, vec![provider]).run_stream("What is 10 + 5?", 10);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    let kinds: Vec<_> = events.iter().map(|e| e.event_type()).collect();
    assert_eq!(
        kinds,
        vec![
            "text_delta",
            "tool_use_start",
            "message_complete",
            "tool_executing",
            "tool_result",
            "text_delta",
            "message_complete",
            "done",
        ]
    );
    match events.last().unwrap() {
        AgentStreamEvent::Done {
            turns,
            status,
            response,
            ..
        } => {
            assert_eq!(*turns, 2);
            assert_eq!(status, "completed");
            assert_eq!(response, "15");
        }
        other => panic!("expected done, got {other:?}"),
    }
}

// ── E2E: Gateway ─────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_gateway_catalog_and_run() {
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    let provider = calculator(Arc::new(AtomicUsize::new(0))).await;
    let model = Arc::new(ScriptedModel::new(vec![
        tool_response("", &[("toolu_1", "multiply", json!({"a": 3, "b": 4}))]),
        text_response("12"),
    ]));

    let config = AppConfig::default();
    let cache = Arc::new(RegistryCache::new(vec![provider], Duration::from_secs(5)));
    let dispatcher = ToolDispatcher::new(cache.clone(), Duration::from_secs(5));
    let agent = AgentLoop::new(model, Arc::new(dispatcher), "mock");
    let state = Arc::new(toolrelay_gateway::GatewayState::new(config, agent, cache));

    let req = Request::builder().uri("/tools").body(Body::empty()).unwrap();
    let resp = toolrelay_gateway::build_router(state.clone())
        .oneshot(req)
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let catalog: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(catalog["count"], 3);

    let req = Request::builder()
        .method("POST")
        .uri("/agent/run")
        .header("content-type", "application/json")
        .body(Body::from(json!({"message": "3 * 4?"}).to_string()))
        .unwrap();
    let resp = toolrelay_gateway::build_router(state)
        .oneshot(req)
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let outcome: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(outcome["status"], "completed");
    assert_eq!(outcome["response"], "12");
    assert_eq!(outcome["tool_calls"][0]["tool"], "multiply");
}

// ── E2E: Configuration ───────────────────────────────────────────────────

#[tokio::test]
async fn e2e_config_file_drives_registry() {
    let provider = calculator(Arc::new(AtomicUsize::new(0))).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        format!(
            r#"
[agent]
default_max_turns = 4

[[tool_providers]]
name = "calculator"
url = "{}"
"#,
            provider.url
        ),
    )
    .unwrap();

    let config = AppConfig::load_from(&path).unwrap();
    assert_eq!(config.agent.default_max_turns, 4);
    assert_eq!(config.tool_providers.len(), 1);

    let registry = RegistryCache::from_config(&config).get().await.unwrap();
    assert_eq!(registry.len(), 3);
    assert!(registry.resolve("divide").is_ok());
}

#[test]
fn e2e_config_defaults_and_validation() {
    let config = AppConfig::default();
    config.validate().unwrap();
    assert_eq!(config.model.provider, "anthropic");
    assert_eq!(config.agent.default_max_turns, 10);
    assert_eq!(config.gateway.port, 8000);

    let mut bad = AppConfig::default();
    bad.agent.default_max_turns = 0;
    assert!(bad.validate().is_err());
}
