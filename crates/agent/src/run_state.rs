//! Mutable state of one run.
//!
//! Created when a run starts, mutated only by the loop, and turned into a
//! [`RunOutcome`] when it ends.

use toolrelay_core::message::{ContentBlock, ConversationTurn};
use toolrelay_core::provider::Usage;
use toolrelay_core::tool::{ToolCallRecord, ToolExecutionResult};

use crate::outcome::{RunOutcome, Termination};

#[derive(Debug)]
pub struct RunState {
    run_id: String,
    turns: Vec<ConversationTurn>,
    turn_count: u32,
    max_turns: u32,
    tool_calls: Vec<ToolCallRecord>,
    usage: Usage,
}

impl RunState {
    /// Start a run whose history holds only the user's message.
    pub fn new(user_message: &str, max_turns: u32) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            turns: vec![ConversationTurn::user(user_message)],
            turn_count: 0,
            max_turns,
            tool_calls: Vec::new(),
            usage: Usage::default(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Claim the next turn. Returns `false` once the budget is spent.
    pub fn begin_turn(&mut self) -> bool {
        self.turn_count += 1;
        self.turn_count <= self.max_turns
    }

    /// Model calls made so far; never exceeds `max_turns`.
    pub fn turns_taken(&self) -> u32 {
        self.turn_count.min(self.max_turns)
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn add_usage(&mut self, usage: Option<Usage>) {
        if let Some(usage) = usage {
            self.usage.accumulate(&usage);
        }
    }

    /// Append the model's turn and return it.
    pub fn push_assistant(&mut self, blocks: Vec<ContentBlock>) -> &ConversationTurn {
        self.turns.push(ConversationTurn::assistant(blocks));
        &self.turns[self.turns.len() - 1]
    }

    pub fn record_call(&mut self, record: ToolCallRecord) {
        self.tool_calls.push(record);
    }

    /// Append the result turn answering `tool_use_id`.
    pub fn push_tool_result(&mut self, tool_use_id: &str, result: &ToolExecutionResult) {
        self.turns.push(ConversationTurn::tool_result(
            tool_use_id,
            result.to_content(),
            result.is_error(),
        ));
    }

    pub fn finish(self, termination: Termination, response: impl Into<String>) -> RunOutcome {
        RunOutcome {
            turns: self.turns_taken(),
            run_id: self.run_id,
            response: response.into(),
            tool_calls: self.tool_calls,
            termination,
            usage: self.usage,
            transcript: self.turns,
        }
    }
}
