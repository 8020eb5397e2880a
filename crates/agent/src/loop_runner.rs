//! The orchestration loop.
//!
//! One run alternates between calling the model with the full history plus
//! the tool catalog and executing whatever tools it asks for, until the
//! model gives a final answer, the turn budget runs out, or something
//! fatal happens.

use std::sync::Arc;

use futures::StreamExt;
use futures::future::join_all;
use tokio::sync::mpsc;
use toolrelay_config::AppConfig;
use toolrelay_core::error::ModelError;
use toolrelay_core::provider::{ModelClient, ModelRequest, ModelResponse, StopReason, ToolDefinition};
use toolrelay_core::tool::{ToolCallRecord, ToolExecutionResult, ToolExecutor};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::outcome::{RunOutcome, Termination};
use crate::run_state::RunState;
use crate::stream_event::AgentStreamEvent;
use crate::stream_parser::{ParsedEvent, parse_model_stream};

const MAX_TURNS_RESPONSE: &str = "Max turns reached";
const CANCELLED: &str = "run cancelled by caller";

/// Drives runs against a model client and a tool executor.
#[derive(Clone)]
pub struct AgentLoop {
    model: Arc<dyn ModelClient>,
    tools: Arc<dyn ToolExecutor>,
    model_id: String,
    max_tokens: u32,
    temperature: f32,
    system_prompt: Option<String>,
    parallel_tool_calls: bool,
}

/// Where a run reports progress. Absent for non-streaming runs.
type EventSink<'a> = Option<&'a mpsc::Sender<AgentStreamEvent>>;

struct PendingCall {
    id: String,
    name: String,
    input: serde_json::Value,
}

impl From<(&str, &str, &serde_json::Value)> for PendingCall {
    fn from((id, name, input): (&str, &str, &serde_json::Value)) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input: input.clone(),
        }
    }
}

impl AgentLoop {
    pub fn new(
        model: Arc<dyn ModelClient>,
        tools: Arc<dyn ToolExecutor>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            model,
            tools,
            model_id: model_id.into(),
            max_tokens: 4096,
            temperature: 0.7,
            system_prompt: None,
            parallel_tool_calls: true,
        }
    }

    /// Build a loop with the model and agent settings from configuration.
    pub fn from_config(
        model: Arc<dyn ModelClient>,
        tools: Arc<dyn ToolExecutor>,
        config: &AppConfig,
    ) -> Self {
        let mut agent = Self::new(model, tools, &config.model.model)
            .with_max_tokens(config.model.max_tokens)
            .with_temperature(config.model.temperature)
            .with_parallel_tool_calls(config.agent.parallel_tool_calls);
        if let Some(ref prompt) = config.model.system_prompt {
            agent = agent.with_system_prompt(prompt);
        }
        agent
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = max;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Dispatch the tool calls of one turn concurrently (default) or one by one.
    pub fn with_parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.parallel_tool_calls = parallel;
        self
    }

    /// Run to completion and return the outcome.
    pub async fn run(&self, user_message: &str, max_turns: u32) -> RunOutcome {
        let state = RunState::new(user_message, max_turns);
        let span = info_span!("agent_run", run_id = %state.run_id());
        self.drive(state, None).instrument(span).await
    }

    /// Start a run in the background and stream its events.
    ///
    /// The receiver yields events in emission order and ends after one
    /// `Done` or `Error`. Dropping it cancels the run before its next model
    /// or tool call.
    pub fn run_stream(&self, user_message: &str, max_turns: u32) -> mpsc::Receiver<AgentStreamEvent> {
        let (tx, rx) = mpsc::channel::<AgentStreamEvent>(128);
        let agent = self.clone();
        let state = RunState::new(user_message, max_turns);
        let span = info_span!("agent_run", run_id = %state.run_id(), stream = true);

        tokio::spawn(
            async move {
                let outcome = agent.drive(state, Some(&tx)).await;
                if tx.is_closed() {
                    return;
                }

                let last = match outcome.termination {
                    Termination::Failed { message } => AgentStreamEvent::Error {
                        message,
                        turns_so_far: outcome.turns,
                        tool_calls: outcome.tool_calls,
                    },
                    termination => AgentStreamEvent::Done {
                        turns: outcome.turns,
                        tool_calls: outcome.tool_calls,
                        status: termination.status().to_string(),
                        response: outcome.response,
                        usage: outcome.usage,
                    },
                };
                let _ = tx.send(last).await;
            }
            .instrument(span),
        );

        rx
    }

    async fn drive(&self, mut state: RunState, events: EventSink<'_>) -> RunOutcome {
        info!(max_turns = state.max_turns(), "Agent run started");

        let definitions = match self.tools.definitions().await {
            Ok(defs) => defs,
            Err(e) => {
                warn!(error = %e, "Tool catalog unavailable, continuing without tools");
                Vec::new()
            }
        };

        loop {
            if !state.begin_turn() {
                warn!(max_turns = state.max_turns(), "Max turns reached");
                return finish(state, Termination::MaxTurnsExceeded, MAX_TURNS_RESPONSE);
            }
            if is_cancelled(events) {
                return cancelled(state);
            }

            let turn = state.turns_taken();
            debug!(turn, history = state.turns().len(), "Calling model");
            let request = self.request(&state, &definitions);

            let response = match events {
                None => self.model.complete(request).await.map(Some),
                Some(tx) => self.stream_turn(request, tx).await,
            };
            let response = match response {
                Ok(Some(r)) => r,
                Ok(None) => return cancelled(state),
                Err(e) => {
                    error!(turn, error = %e, "Model call failed");
                    let message = e.to_string();
                    return finish(state, Termination::Failed { message: message.clone() }, message);
                }
            };

            state.add_usage(response.usage);
            let stop_reason = response.stop_reason;

            if !emit(
                events,
                AgentStreamEvent::MessageComplete {
                    turn,
                    stop_reason: stop_reason.clone(),
                    blocks: response.content.clone(),
                },
            )
            .await
            {
                return cancelled(state);
            }

            let assistant = state.push_assistant(response.content);
            let text = assistant.text();
            let calls: Vec<PendingCall> =
                assistant.tool_uses().into_iter().map(PendingCall::from).collect();

            match stop_reason {
                StopReason::EndTurn | StopReason::StopSequence => {
                    return finish(state, Termination::Completed, text);
                }
                StopReason::ToolUse if calls.is_empty() => {
                    debug!(turn, "tool_use without tool calls, treating as final");
                    return finish(state, Termination::Completed, text);
                }
                StopReason::ToolUse => {
                    debug!(turn, count = calls.len(), "Executing tool calls");

                    for call in &calls {
                        state.record_call(ToolCallRecord {
                            tool: call.name.clone(),
                            input: call.input.clone(),
                            tool_use_id: call.id.clone(),
                        });
                        let executing = AgentStreamEvent::ToolExecuting {
                            tool: call.name.clone(),
                            id: call.id.clone(),
                            input: call.input.clone(),
                        };
                        if !emit(events, executing).await {
                            return cancelled(state);
                        }
                    }

                    let Some(results) = self.dispatch_all(&calls, events).await else {
                        return cancelled(state);
                    };
                    if is_cancelled(events) {
                        return cancelled(state);
                    }

                    // Results go in emission order, whatever order they finished in
                    for (call, result) in calls.iter().zip(&results) {
                        if let ToolExecutionResult::Err(e) = result {
                            warn!(tool = %call.name, id = %call.id, error = %e, "Tool call returned an error");
                        }
                        state.push_tool_result(&call.id, result);
                        let reported = AgentStreamEvent::ToolResult {
                            tool: call.name.clone(),
                            id: call.id.clone(),
                            content: result.to_content(),
                            is_error: result.is_error(),
                        };
                        if !emit(events, reported).await {
                            return cancelled(state);
                        }
                    }
                }
                StopReason::MaxTokens => {
                    warn!(turn, "Model output truncated by max_tokens");
                    return finish(state, Termination::Truncated, text);
                }
                StopReason::Other(reason) => {
                    error!(turn, stop_reason = %reason, "Unexpected stop reason");
                    let message = format!("Unexpected stop reason: {reason}");
                    return finish(state, Termination::Failed { message: message.clone() }, message);
                }
            }
        }
    }

    fn request(&self, state: &RunState, definitions: &[ToolDefinition]) -> ModelRequest {
        ModelRequest {
            model: self.model_id.clone(),
            system: self.system_prompt.clone(),
            turns: state.turns().to_vec(),
            tools: definitions.to_vec(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    /// One streaming model call. `Ok(None)` means the caller went away.
    async fn stream_turn(
        &self,
        request: ModelRequest,
        tx: &mpsc::Sender<AgentStreamEvent>,
    ) -> Result<Option<ModelResponse>, ModelError> {
        let rx = self.model.stream(request).await?;
        let mut parsed = std::pin::pin!(parse_model_stream(rx));

        while let Some(item) = parsed.next().await {
            let event = match item? {
                ParsedEvent::TextDelta { text } => AgentStreamEvent::TextDelta { text },
                ParsedEvent::ToolUseStart { tool, id } => AgentStreamEvent::ToolUseStart { tool, id },
                ParsedEvent::Done {
                    stop_reason,
                    message,
                    usage,
                } => {
                    return Ok(Some(ModelResponse {
                        content: message,
                        stop_reason,
                        usage,
                        model: self.model_id.clone(),
                    }));
                }
            };
            if tx.send(event).await.is_err() {
                return Ok(None);
            }
        }

        Err(ModelError::StreamInterrupted(
            "model stream ended without a result".into(),
        ))
    }

    /// Execute one turn's calls. `None` means the caller went away mid-way.
    async fn dispatch_all(
        &self,
        calls: &[PendingCall],
        events: EventSink<'_>,
    ) -> Option<Vec<ToolExecutionResult>> {
        if self.parallel_tool_calls {
            // join_all yields results in input order
            let futures = calls
                .iter()
                .map(|call| self.tools.execute(&call.name, call.input.clone()));
            return Some(join_all(futures).await);
        }

        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            if is_cancelled(events) {
                return None;
            }
            results.push(self.tools.execute(&call.name, call.input.clone()).await);
        }
        Some(results)
    }
}

fn finish(state: RunState, termination: Termination, response: impl Into<String>) -> RunOutcome {
    let outcome = state.finish(termination, response);
    info!(
        status = outcome.termination.status(),
        turns = outcome.turns,
        tool_calls = outcome.tool_calls.len(),
        total_tokens = outcome.usage.total_tokens(),
        "Agent run finished"
    );
    outcome
}

fn cancelled(state: RunState) -> RunOutcome {
    info!(turns = state.turns_taken(), "Stream receiver dropped, stopping run");
    state.finish(
        Termination::Failed {
            message: CANCELLED.into(),
        },
        CANCELLED,
    )
}

fn is_cancelled(events: EventSink<'_>) -> bool {
    events.is_some_and(|tx| tx.is_closed())
}

/// Send an event; `false` once nobody is listening.
async fn emit(events: EventSink<'_>, event: AgentStreamEvent) -> bool {
    match events {
        None => true,
        Some(tx) => tx.send(event).await.is_ok(),
    }
}
