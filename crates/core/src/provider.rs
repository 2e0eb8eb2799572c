//! Provider trait: the abstraction over completion endpoints.
//!
//! A Provider knows how to send a conversation to a language model and get
//! the assistant's content blocks back. The orchestration core treats this as
//! an opaque RPC and never depends on a vendor SDK shape.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{ContentBlock, Turn};

/// One completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The model to use (e.g., "claude-3-5-sonnet-latest")
    pub model: String,

    /// System prompt
    #[serde(default)]
    pub system: String,

    /// The full turn sequence, policies already applied
    pub turns: Vec<Turn>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Whether the provider should honour cache markers
    #[serde(default)]
    pub cache_enabled: bool,
}

impl CompletionRequest {
    /// A single-turn, tool-less request, as used for auxiliary calls
    /// (summaries, journal entries).
    pub fn single(
        model: impl Into<String>,
        system: impl Into<String>,
        prompt: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            turns: vec![Turn::user(prompt)],
            tools: Vec::new(),
            max_tokens,
            cache_enabled: false,
        }
    }
}

/// A tool definition sent to the model so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Text and tool-use blocks, in the order the model produced them
    pub blocks: Vec<ContentBlock>,

    /// Token usage statistics
    #[serde(default)]
    pub usage: Usage,

    /// Which model actually responded (may differ from requested)
    #[serde(default)]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

impl CompletionResponse {
    /// Concatenated text blocks, newline separated.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Token usage information, including prompt-cache accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }
}

/// The core Provider trait.
///
/// Every completion backend implements this trait. The sampling loop calls
/// `complete()` without knowing which provider is being used. Timeouts are
/// the implementation's responsibility and surface as
/// [`ProviderError::Timeout`].
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;
}
