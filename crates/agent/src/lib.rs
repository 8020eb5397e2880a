//! The toolrelay orchestration loop.
//!
//! A run follows a **call → interpret → act** cycle:
//!
//! 1. **Fetch** the consolidated tool catalog
//! 2. **Call** the model with the full turn history and the catalog
//! 3. **If tool use**: dispatch every requested call, append the results
//!    in the order the model asked for them, loop back to step 2
//! 4. **Otherwise**: stop, reporting how the run ended
//!
//! The loop runs until the model gives a final answer, its output is
//! truncated, the turn budget is spent, or a model call fails.

pub mod loop_runner;
pub mod outcome;
pub mod run_state;
pub mod stream_event;
pub mod stream_parser;

#[cfg(test)]
mod test_helpers;

pub use loop_runner::AgentLoop;
pub use outcome::{RunOutcome, Termination};
pub use run_state::RunState;
pub use stream_event::AgentStreamEvent;
pub use stream_parser::{ParsedEvent, StreamParseError, StreamParser, parse_model_stream};
