//! # turnloop core
//!
//! Domain types, traits, and error definitions for the turnloop agent
//! orchestrator. This crate has **zero framework dependencies**: it defines
//! the conversation model and the two seams (the
//! completion [`Provider`] and the [`Tool`] contract) that every other crate
//! implements against.
//!
//! ## Design Philosophy
//!
//! Content is a closed tagged union ([`ContentBlock`]); every policy and the
//! dispatcher pattern-match on variants instead of probing string keys.
//! Providers and tools are traits so that tests can drive the whole loop with
//! scripted stand-ins.

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, ToolError};
pub use message::{
    ContentBlock, Conversation, ConversationId, ImageData, ResultPart, Role, Turn, TurnContent,
};
pub use provider::{CompletionRequest, CompletionResponse, Provider, ToolDefinition, Usage};
pub use tool::{Tool, ToolOutcome, ToolRegistry};
