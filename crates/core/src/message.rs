//! Conversation turn and content block types.
//!
//! These are the value objects that flow through a run:
//! the user's message opens the conversation, the model answers with
//! assistant content, and every tool use it requests is answered by a
//! tool result turn.

use serde::{Deserialize, Serialize};

/// A typed span within an assistant turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain assistant text.
    Text { text: String },

    /// A request to run a tool on the model's behalf.
    ToolUse {
        /// Model-assigned id, echoed back by the matching tool result
        id: String,
        /// Name of the tool to invoke
        name: String,
        /// Arguments as a JSON value
        input: serde_json::Value,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_use(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// One unit of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationTurn {
    /// The user's message.
    UserText { text: String },

    /// Everything the model produced in one call, in emission order.
    AssistantContent { blocks: Vec<ContentBlock> },

    /// The outcome of one tool call.
    ToolResult {
        tool_use_id: String,
        content: String,
        /// Set when the call failed; the content then carries the error payload
        #[serde(default)]
        is_error: bool,
    },
}

impl ConversationTurn {
    /// Create a user turn.
    pub fn user(text: impl Into<String>) -> Self {
        Self::UserText { text: text.into() }
    }

    /// Create an assistant turn from its content blocks.
    pub fn assistant(blocks: Vec<ContentBlock>) -> Self {
        Self::AssistantContent { blocks }
    }

    /// Create a tool result turn.
    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error,
        }
    }

    /// Concatenated text of an assistant turn (empty for other variants).
    pub fn text(&self) -> String {
        match self {
            Self::AssistantContent { blocks } => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    ContentBlock::ToolUse { .. } => None,
                })
                .collect(),
            _ => String::new(),
        }
    }

    /// The tool use blocks of an assistant turn, in emission order.
    pub fn tool_uses(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        match self {
            Self::AssistantContent { blocks } => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { id, name, input } => {
                        Some((id.as_str(), name.as_str(), input))
                    }
                    ContentBlock::Text { .. } => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Check that every tool result answers a tool use of the assistant turn
/// directly before its group, and that no tool use is left unanswered when
/// the next assistant turn (or the end of the history) is reached.
///
/// Returns a description of the first violation found.
pub fn validate_pairing(turns: &[ConversationTurn]) -> std::result::Result<(), String> {
    let mut pending: Vec<String> = Vec::new();
    let mut answerable: Vec<String> = Vec::new();

    for (i, turn) in turns.iter().enumerate() {
        match turn {
            ConversationTurn::AssistantContent { .. } => {
                if let Some(id) = pending.first() {
                    return Err(format!("tool use {id} has no result before turn {i}"));
                }
                answerable = turn.tool_uses().iter().map(|(id, _, _)| id.to_string()).collect();
                pending = answerable.clone();
            }
            ConversationTurn::ToolResult { tool_use_id, .. } => {
                if !answerable.contains(tool_use_id) {
                    return Err(format!(
                        "tool result {tool_use_id} at turn {i} has no matching tool use"
                    ));
                }
                match pending.iter().position(|id| id == tool_use_id) {
                    Some(0) => {
                        pending.remove(0);
                    }
                    Some(_) => {
                        return Err(format!("tool result {tool_use_id} at turn {i} is out of order"));
                    }
                    None => {
                        return Err(format!("tool use {tool_use_id} answered twice"));
                    }
                }
            }
            ConversationTurn::UserText { .. } => {
                if let Some(id) = pending.first() {
                    return Err(format!("tool use {id} has no result before turn {i}"));
                }
                answerable.clear();
            }
        }
    }

    match pending.first() {
        Some(id) => Err(format!("tool use {id} has no result")),
        None => Ok(()),
    }
}
