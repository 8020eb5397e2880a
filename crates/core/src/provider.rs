//! Model client trait — the abstraction over the hosted tool-calling LLM.
//!
//! A model client knows how to send the turn history plus the tool catalog
//! to the model and get an answer back, either as one structured response
//! or as an incremental sequence of low-level stream events.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::message::{ContentBlock, ConversationTurn};

/// A request to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// The model identifier (e.g., "claude-3-5-sonnet-20241022")
    pub model: String,

    /// Optional system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// The ordered turn history
    pub turns: Vec<ConversationTurn>,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    pub temperature: f32,
}

/// A tool definition from a provider catalog, forwarded to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// JSON Schema describing accepted arguments
    #[serde(rename = "inputSchema", default = "default_input_schema")]
    pub input_schema: serde_json::Value,
}

/// Schema assumed for tools that do not advertise one.
pub fn default_input_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}

/// Why the model stopped generating in one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StopReason {
    /// Final answer ready
    EndTurn,
    /// One or more tool calls requested
    ToolUse,
    /// Output truncated by the model's own token limit
    MaxTokens,
    /// A configured stop sequence was hit
    StopSequence,
    /// Anything this client does not know about
    Other(String),
}

impl StopReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::EndTurn => "end_turn",
            Self::ToolUse => "tool_use",
            Self::MaxTokens => "max_tokens",
            Self::StopSequence => "stop_sequence",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for StopReason {
    fn from(s: String) -> Self {
        match s.as_str() {
            "end_turn" => Self::EndTurn,
            "tool_use" => Self::ToolUse,
            "max_tokens" => Self::MaxTokens,
            "stop_sequence" => Self::StopSequence,
            _ => Self::Other(s),
        }
    }
}

impl From<StopReason> for String {
    fn from(reason: StopReason) -> Self {
        reason.as_str().to_string()
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complete (non-streaming) response from the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Content blocks in emission order
    pub content: Vec<ContentBlock>,

    /// Why generation stopped
    pub stop_reason: StopReason,

    /// Token usage statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Which model actually responded
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    /// Add another call's usage to this running total.
    pub fn accumulate(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// How a content block opens in a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockStart {
    /// A text block, possibly carrying initial text
    Text {
        #[serde(default)]
        text: String,
    },
    /// A tool use block; its input arrives as JSON fragments
    ToolUse { id: String, name: String },
}

/// An incremental fragment of an open content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

/// A low-level event of a streaming model call.
///
/// Blocks are keyed by `index`. Different indices may interleave, but each
/// index sees exactly one start, any number of deltas, and one stop, in
/// that order. The stream ends with one `MessageStop`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelStreamEvent {
    MessageStart {
        id: String,
        role: String,
        model: String,
    },
    ContentBlockStart {
        index: usize,
        block: BlockStart,
    },
    ContentBlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageStop {
        stop_reason: StopReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

/// Receiving half of a streaming model call.
pub type ModelEventReceiver =
    tokio::sync::mpsc::Receiver<std::result::Result<ModelStreamEvent, ModelError>>;

/// The core model client trait.
///
/// The agent loop calls `complete()` or `stream()` without knowing which
/// backend is behind it.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// A human-readable name for this client (e.g., "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ModelRequest) -> std::result::Result<ModelResponse, ModelError>;

    /// Send a request and get a stream of low-level events.
    ///
    /// Default implementation calls `complete()` and replays the response as
    /// a well-formed event sequence.
    async fn stream(
        &self,
        request: ModelRequest,
    ) -> std::result::Result<ModelEventReceiver, ModelError> {
        let response = self.complete(request).await?;
        let events = replay_events(&response);
        let (tx, rx) = tokio::sync::mpsc::channel(events.len().max(1));
        for event in events {
            let _ = tx.send(Ok(event)).await;
        }
        Ok(rx)
    }
}

/// Express a complete response as the event sequence a streaming call would
/// have produced.
pub fn replay_events(response: &ModelResponse) -> Vec<ModelStreamEvent> {
    let mut events = vec![ModelStreamEvent::MessageStart {
        id: String::new(),
        role: "assistant".into(),
        model: response.model.clone(),
    }];

    for (index, block) in response.content.iter().enumerate() {
        match block {
            ContentBlock::Text { text } => {
                events.push(ModelStreamEvent::ContentBlockStart {
                    index,
                    block: BlockStart::Text {
                        text: String::new(),
                    },
                });
                events.push(ModelStreamEvent::ContentBlockDelta {
                    index,
                    delta: BlockDelta::TextDelta { text: text.clone() },
                });
            }
            ContentBlock::ToolUse { id, name, input } => {
                events.push(ModelStreamEvent::ContentBlockStart {
                    index,
                    block: BlockStart::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                    },
                });
                events.push(ModelStreamEvent::ContentBlockDelta {
                    index,
                    delta: BlockDelta::InputJsonDelta {
                        partial_json: input.to_string(),
                    },
                });
            }
        }
        events.push(ModelStreamEvent::ContentBlockStop { index });
    }

    events.push(ModelStreamEvent::MessageStop {
        stop_reason: response.stop_reason.clone(),
        usage: response.usage,
    });
    events
}
