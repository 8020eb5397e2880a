//! Reassembles a streaming model call into content blocks.
//!
//! Low-level events arrive keyed by block index. Text is passed through as
//! soon as it arrives; tool input arrives as JSON fragments that are only
//! parsed once their block stops. When the terminal event arrives the
//! blocks are emitted as one message, ordered by index.

use std::collections::BTreeMap;

use futures::Stream;
use toolrelay_core::error::ModelError;
use toolrelay_core::message::ContentBlock;
use toolrelay_core::provider::{
    BlockDelta, BlockStart, ModelEventReceiver, ModelStreamEvent, StopReason, Usage,
};
use tracing::debug;

/// Normalized output of the parser.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    /// A fragment of assistant text, emitted as soon as it arrives
    TextDelta { text: String },
    /// The model opened a tool use block
    ToolUseStart { tool: String, id: String },
    /// The message is complete
    Done {
        stop_reason: StopReason,
        /// Assembled content blocks, in index order
        message: Vec<ContentBlock>,
        usage: Option<Usage>,
    },
}

/// Protocol violations in a model event stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamParseError {
    #[error("event for unknown content block {index}")]
    UnknownBlock { index: usize },

    #[error("content block {index} started twice")]
    DuplicateBlock { index: usize },

    #[error("event for content block {index} after it stopped")]
    BlockClosed { index: usize },

    #[error("{delta} delta sent to {block} block {index}")]
    DeltaKindMismatch {
        index: usize,
        block: &'static str,
        delta: &'static str,
    },

    #[error("tool input of block {index} is not valid JSON: {reason}")]
    InvalidToolInput { index: usize, reason: String },

    #[error("event after message_stop")]
    AfterMessageStop,

    #[error("stream ended before message_stop")]
    Incomplete,
}

impl From<StreamParseError> for ModelError {
    fn from(e: StreamParseError) -> Self {
        ModelError::InvalidResponse(e.to_string())
    }
}

#[derive(Debug)]
enum BlockBuilder {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        json: String,
        /// Set when the block stops
        input: Option<serde_json::Value>,
    },
}

impl BlockBuilder {
    fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::ToolUse { .. } => "tool_use",
        }
    }
}

#[derive(Debug)]
struct OpenBlock {
    builder: BlockBuilder,
    closed: bool,
}

/// Per-call parser state.
#[derive(Debug, Default)]
pub struct StreamParser {
    blocks: BTreeMap<usize, OpenBlock>,
    message_id: Option<String>,
    role: Option<String>,
    done: bool,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the terminal event has been consumed.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Consume one low-level event.
    pub fn feed(&mut self, event: ModelStreamEvent) -> Result<Option<ParsedEvent>, StreamParseError> {
        if self.done {
            return Err(StreamParseError::AfterMessageStop);
        }

        match event {
            ModelStreamEvent::MessageStart { id, role, .. } => {
                self.message_id = Some(id);
                self.role = Some(role);
                Ok(None)
            }

            ModelStreamEvent::ContentBlockStart { index, block } => {
                if self.blocks.contains_key(&index) {
                    return Err(StreamParseError::DuplicateBlock { index });
                }
                let (builder, parsed) = match block {
                    BlockStart::Text { text } => {
                        let parsed = (!text.is_empty()).then(|| ParsedEvent::TextDelta {
                            text: text.clone(),
                        });
                        (BlockBuilder::Text { text }, parsed)
                    }
                    BlockStart::ToolUse { id, name } => {
                        let parsed = ParsedEvent::ToolUseStart {
                            tool: name.clone(),
                            id: id.clone(),
                        };
                        (
                            BlockBuilder::ToolUse {
                                id,
                                name,
                                json: String::new(),
                                input: None,
                            },
                            Some(parsed),
                        )
                    }
                };
                self.blocks.insert(
                    index,
                    OpenBlock {
                        builder,
                        closed: false,
                    },
                );
                Ok(parsed)
            }

            ModelStreamEvent::ContentBlockDelta { index, delta } => {
                let block = self.open_block(index)?;
                match (&mut block.builder, delta) {
                    (BlockBuilder::Text { text }, BlockDelta::TextDelta { text: fragment }) => {
                        text.push_str(&fragment);
                        Ok(Some(ParsedEvent::TextDelta { text: fragment }))
                    }
                    (BlockBuilder::ToolUse { json, .. }, BlockDelta::InputJsonDelta { partial_json }) => {
                        json.push_str(&partial_json);
                        Ok(None)
                    }
                    (builder, delta) => Err(StreamParseError::DeltaKindMismatch {
                        index,
                        block: builder.kind(),
                        delta: match delta {
                            BlockDelta::TextDelta { .. } => "text",
                            BlockDelta::InputJsonDelta { .. } => "input_json",
                        },
                    }),
                }
            }

            ModelStreamEvent::ContentBlockStop { index } => {
                let block = self.open_block(index)?;
                block.closed = true;
                finish_block(index, &mut block.builder)?;
                Ok(None)
            }

            ModelStreamEvent::MessageStop { stop_reason, usage } => {
                self.done = true;
                let blocks = std::mem::take(&mut self.blocks);
                let mut message = Vec::with_capacity(blocks.len());
                for (index, mut block) in blocks {
                    // Blocks the model never stopped are finished here
                    if !block.closed {
                        finish_block(index, &mut block.builder)?;
                    }
                    message.push(match block.builder {
                        BlockBuilder::Text { text } => ContentBlock::Text { text },
                        BlockBuilder::ToolUse { id, name, input, .. } => ContentBlock::ToolUse {
                            id,
                            name,
                            input: input.unwrap_or_else(empty_input),
                        },
                    });
                }
                debug!(
                    message_id = self.message_id.as_deref().unwrap_or("-"),
                    role = self.role.as_deref().unwrap_or("-"),
                    blocks = message.len(),
                    "Model message assembled"
                );
                Ok(Some(ParsedEvent::Done {
                    stop_reason,
                    message,
                    usage,
                }))
            }
        }
    }

    /// Signal that the event source ended.
    pub fn finish(&self) -> Result<(), StreamParseError> {
        if self.done {
            Ok(())
        } else {
            Err(StreamParseError::Incomplete)
        }
    }

    fn open_block(&mut self, index: usize) -> Result<&mut OpenBlock, StreamParseError> {
        match self.blocks.get_mut(&index) {
            None => Err(StreamParseError::UnknownBlock { index }),
            Some(block) if block.closed => Err(StreamParseError::BlockClosed { index }),
            Some(block) => Ok(block),
        }
    }
}

fn empty_input() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn finish_block(index: usize, builder: &mut BlockBuilder) -> Result<(), StreamParseError> {
    if let BlockBuilder::ToolUse { json, input, .. } = builder {
        let parsed = if json.trim().is_empty() {
            empty_input()
        } else {
            serde_json::from_str(json).map_err(|e| StreamParseError::InvalidToolInput {
                index,
                reason: e.to_string(),
            })?
        };
        *input = Some(parsed);
    }
    Ok(())
}

/// Adapt a model event receiver into a stream of parsed events.
///
/// The stream ends after `Done` or after the first error. A source that
/// closes before `MessageStop` yields [`StreamParseError::Incomplete`].
pub fn parse_model_stream(
    rx: ModelEventReceiver,
) -> impl Stream<Item = Result<ParsedEvent, ModelError>> + Send {
    futures::stream::unfold(Some((rx, StreamParser::new())), |state| async move {
        let (mut rx, mut parser) = state?;
        loop {
            match rx.recv().await {
                Some(Ok(event)) => match parser.feed(event) {
                    Ok(Some(parsed)) => {
                        let next = if parser.is_done() {
                            None
                        } else {
                            Some((rx, parser))
                        };
                        return Some((Ok(parsed), next));
                    }
                    Ok(None) => continue,
                    Err(e) => return Some((Err(e.into()), None)),
                },
                Some(Err(e)) => return Some((Err(e), None)),
                None => {
                    let err = parser.finish().err().unwrap_or(StreamParseError::Incomplete);
                    return Some((Err(err.into()), None));
                }
            }
        }
    })
}
