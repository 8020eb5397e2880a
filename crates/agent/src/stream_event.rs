//! Agent-level streaming events.
//!
//! `AgentStreamEvent` combines the parser's per-call events with the loop's
//! own progress (tool execution, termination) so the gateway can forward a
//! run to clients over SSE as it happens.

use serde::{Deserialize, Serialize};
use toolrelay_core::message::ContentBlock;
use toolrelay_core::provider::{StopReason, Usage};
use toolrelay_core::tool::ToolCallRecord;

/// Events emitted by the agent during a streaming run, in emission order.
///
/// - `text_delta`       — partial assistant text
/// - `tool_use_start`   — the model opened a tool call
/// - `message_complete` — one model call finished
/// - `tool_executing`   — a tool call is being dispatched
/// - `tool_result`      — a tool call finished
/// - `done`             — the run ended without failing
/// - `error`            — the run failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    TextDelta {
        text: String,
    },

    ToolUseStart {
        tool: String,
        id: String,
    },

    MessageComplete {
        turn: u32,
        stop_reason: StopReason,
        blocks: Vec<ContentBlock>,
    },

    ToolExecuting {
        tool: String,
        id: String,
        input: serde_json::Value,
    },

    ToolResult {
        tool: String,
        id: String,
        content: String,
        is_error: bool,
    },

    /// Final event of a run that did not fail.
    Done {
        turns: u32,
        tool_calls: Vec<ToolCallRecord>,
        /// `completed`, `truncated` or `max_turns_exceeded`
        status: String,
        response: String,
        usage: Usage,
    },

    /// Final event of a failed run.
    Error {
        message: String,
        turns_so_far: u32,
        tool_calls: Vec<ToolCallRecord>,
    },
}

impl AgentStreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text_delta",
            Self::ToolUseStart { .. } => "tool_use_start",
            Self::MessageComplete { .. } => "message_complete",
            Self::ToolExecuting { .. } => "tool_executing",
            Self::ToolResult { .. } => "tool_result",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
