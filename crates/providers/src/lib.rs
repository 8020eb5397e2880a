//! Model client implementations for toolrelay.
//!
//! All clients implement the `toolrelay_core::ModelClient` trait.
//! The router builds the configured one.

pub mod anthropic;
pub mod router;

pub use anthropic::{AnthropicClient, SseDecoder};
pub use router::build_from_config;
