//! AgriSage capability kernel.
//!
//! This crate owns the pieces every other AgriSage crate reads but never
//! mutates during a request:
//!
//! - **[`tag`]** -- The closed [`IntentTag`] vocabulary shared by the
//!   classifier, the selector and tool descriptors.
//! - **[`registry`]** -- The immutable [`CapabilityRegistry`] snapshot: tool
//!   descriptors in declaration order, their handlers, and delegation scopes.
//! - **[`cache`]** -- [`ToolCache`], a [`moka`]-backed TTL
//!   read-through cache that individual tools may own.
//! - **[`error`]** -- Registry build errors and tool invocation errors via
//!   [`thiserror`].
//!
//! All public types are `Send + Sync` and designed to be shared behind an
//! [`std::sync::Arc`] across concurrent orchestration tasks.

pub mod cache;
pub mod error;
pub mod registry;
pub mod tag;

// Re-export the most commonly used types at the crate root for convenience.
pub use cache::ToolCache;
pub use error::{KernelError, Result, ToolError};
pub use registry::{
    CapabilityRegistry, FnHandler, RegistryBuilder, ToolBinding, ToolDescriptor, ToolHandler,
    ToolOutput,
};
pub use tag::IntentTag;
