//! What a run hands back when it ends.

use serde::{Deserialize, Serialize};
use toolrelay_core::message::ConversationTurn;
use toolrelay_core::provider::Usage;
use toolrelay_core::tool::ToolCallRecord;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Termination {
    /// The model produced a final answer
    Completed,
    /// The model hit its own output token limit; the answer is partial
    Truncated,
    /// The turn budget ran out before a final answer
    MaxTurnsExceeded,
    /// A model call or the tool catalog failed
    Failed { message: String },
}

impl Termination {
    /// Wire name of the status.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Truncated => "truncated",
            Self::MaxTurnsExceeded => "max_turns_exceeded",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed { message } => write!(f, "failed: {message}"),
            other => f.write_str(other.status()),
        }
    }
}

/// Result of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Unique id of the run, also recorded on its log span
    pub run_id: String,

    /// Final answer text, or a description of why there is none
    pub response: String,

    /// Model calls made
    pub turns: u32,

    /// Every tool call the model requested, in request order
    pub tool_calls: Vec<ToolCallRecord>,

    pub termination: Termination,

    /// Token usage summed over all model calls
    pub usage: Usage,

    /// Full turn history of the run
    pub transcript: Vec<ConversationTurn>,
}
