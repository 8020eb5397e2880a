//! Remote tool plumbing for toolrelay.
//!
//! Tools live in external provider services. This crate builds the
//! consolidated catalog from their `GET /tools` endpoints, caches it for
//! the life of the process, and dispatches the model's tool calls to the
//! owning provider's `POST /execute`.

pub mod cache;
pub mod dispatcher;
pub mod registry;
pub mod wire;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache::RegistryCache;
pub use dispatcher::ToolDispatcher;
pub use registry::{ShadowedTool, ToolBinding, ToolProviderEndpoint, ToolRegistry};
