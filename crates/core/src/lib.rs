//! # toolrelay Core
//!
//! Domain types, traits, and error definitions for the toolrelay agent
//! orchestrator. This crate has **no HTTP dependencies** and uses tokio only
//! for its `mpsc` channel types; it defines the model that every other crate
//! implements against.
//!
//! ## Design Philosophy
//!
//! The two external seams of the orchestrator are traits defined here:
//! - [`ModelClient`] — the hosted tool-calling LLM
//! - [`ToolExecutor`] — the catalog of remote tools and their dispatch
//!
//! The agent loop only ever talks to these traits, so the Anthropic client
//! and the HTTP dispatcher can be swapped for scripted doubles in tests.

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ModelError, RegistryError, Result, ToolError};
pub use message::{ContentBlock, ConversationTurn};
pub use provider::{
    BlockDelta, BlockStart, ModelClient, ModelRequest, ModelResponse, ModelStreamEvent,
    ModelEventReceiver, StopReason, ToolDefinition, Usage,
};
pub use tool::{ProviderFailure, ToolCallRecord, ToolExecutionResult, ToolExecutor};
