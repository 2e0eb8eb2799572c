//! Completion provider implementations for turnloop.
//!
//! All providers implement the `turnloop_core::Provider` trait. The sampling
//! loop only ever sees the trait object.

pub mod anthropic;

pub use anthropic::AnthropicProvider;
