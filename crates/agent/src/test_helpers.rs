//! Shared test doubles for the agent loop.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use toolrelay_core::error::{ModelError, RegistryError, ToolError};
use toolrelay_core::message::ContentBlock;
use toolrelay_core::provider::{
    ModelClient, ModelEventReceiver, ModelRequest, ModelResponse, ModelStreamEvent, StopReason,
    ToolDefinition, Usage,
};
use toolrelay_core::tool::{ProviderFailure, ToolExecutionResult, ToolExecutor};

/// A model client that returns a sequence of scripted responses.
///
/// Each call to `complete` (or `stream`) takes the next entry.
/// Panics if more calls are made than responses provided.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<ModelResponse, ModelError>>>,
    streams: Mutex<VecDeque<Vec<Result<ModelStreamEvent, ModelError>>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Result<ModelResponse, ModelError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            streams: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Script raw event sequences for `stream`, bypassing the response replay.
    pub fn with_streams(streams: Vec<Vec<Result<ModelStreamEvent, ModelError>>>) -> Self {
        let model = Self::new(vec![]);
        *model.streams.lock().unwrap() = streams.into();
        model
    }

    /// A model that answers the same tool call forever.
    pub fn always_tool_use(turns: usize) -> Self {
        Self::new(
            (0..turns)
                .map(|i| {
                    let id = format!("toolu_{i}");
                    Ok(tool_use_response(
                        "",
                        vec![(id.as_str(), "add", serde_json::json!({"a": i, "b": 1}))],
                    ))
                })
                .collect(),
        )
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedModel: no more responses (call #{call})"))
    }

    async fn stream(&self, request: ModelRequest) -> Result<ModelEventReceiver, ModelError> {
        let scripted = self.streams.lock().unwrap().pop_front();
        let Some(events) = scripted else {
            // Fall back to replaying the next complete response
            let response = self.complete(request).await?;
            let events = toolrelay_core::provider::replay_events(&response);
            let (tx, rx) = tokio::sync::mpsc::channel(events.len().max(1));
            for event in events {
                tx.send(Ok(event)).await.unwrap();
            }
            return Ok(rx);
        };

        self.requests.lock().unwrap().push(request);
        let (tx, rx) = tokio::sync::mpsc::channel(events.len().max(1));
        for event in events {
            tx.send(event).await.unwrap();
        }
        Ok(rx)
    }
}

pub fn usage() -> Option<Usage> {
    Some(Usage {
        input_tokens: 10,
        output_tokens: 5,
    })
}

/// A final answer.
pub fn text_response(text: &str) -> ModelResponse {
    ModelResponse {
        content: vec![ContentBlock::text(text)],
        stop_reason: StopReason::EndTurn,
        usage: usage(),
        model: "mock-model".into(),
    }
}

/// A response asking for tool calls, optionally preceded by text.
pub fn tool_use_response(text: &str, calls: Vec<(&str, &str, serde_json::Value)>) -> ModelResponse {
    let mut content = Vec::new();
    if !text.is_empty() {
        content.push(ContentBlock::text(text));
    }
    content.extend(
        calls
            .into_iter()
            .map(|(id, name, input)| ContentBlock::tool_use(id, name, input)),
    );
    ModelResponse {
        content,
        stop_reason: StopReason::ToolUse,
        usage: usage(),
        model: "mock-model".into(),
    }
}

pub fn response_with_stop(text: &str, stop_reason: StopReason) -> ModelResponse {
    ModelResponse {
        stop_reason,
        ..text_response(text)
    }
}

struct MockTool {
    delay: Duration,
    result: ToolExecutionResult,
}

/// A tool executor with canned results, delays, and call bookkeeping.
pub struct MockTools {
    tools: HashMap<String, MockTool>,
    order: Vec<String>,
    catalog_failure: bool,
    started: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTools {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            catalog_failure: false,
            started: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_tool(mut self, name: &str, delay_ms: u64, result: ToolExecutionResult) -> Self {
        self.order.push(name.to_string());
        self.tools.insert(
            name.to_string(),
            MockTool {
                delay: Duration::from_millis(delay_ms),
                result,
            },
        );
        self
    }

    /// Make `definitions` fail as if every provider were down.
    pub fn unreachable() -> Self {
        Self {
            catalog_failure: true,
            ..Self::new()
        }
    }

    /// The standard calculator: `add` answers 15, `divide` fails.
    pub fn calculator() -> Self {
        Self::new()
            .with_tool("add", 0, ToolExecutionResult::Ok(serde_json::json!(15)))
            .with_tool(
                "divide",
                0,
                ToolExecutionResult::Err(ToolError::Rejected {
                    status: 500,
                    message: "Division by zero".into(),
                }),
            )
    }

    /// Tool names in the order their execution started.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// Largest number of calls that were in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ToolExecutor for MockTools {
    async fn definitions(&self) -> Result<Vec<ToolDefinition>, RegistryError> {
        if self.catalog_failure {
            return Err(RegistryError::AllProvidersFailed(vec![ProviderFailure {
                provider: "calculator".into(),
                reason: "connection refused".into(),
            }]));
        }
        Ok(self
            .order
            .iter()
            .map(|name| ToolDefinition {
                name: name.clone(),
                description: format!("{name} tool"),
                input_schema: toolrelay_core::provider::default_input_schema(),
            })
            .collect())
    }

    async fn execute(&self, name: &str, _arguments: serde_json::Value) -> ToolExecutionResult {
        self.started.lock().unwrap().push(name.to_string());
        let Some(tool) = self.tools.get(name) else {
            return ToolExecutionResult::Err(ToolError::UnknownTool(name.to_string()));
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(tool.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        tool.result.clone()
    }
}
