//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level text blocks
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Base64 image sources inside tool results
//! - Prompt caching via `cache_control` on marked blocks, the system prompt
//!   and the last tool definition

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use turnloop_config::{PROVIDER_CACHE_BLOCK_LIMIT, SessionConfig};
use turnloop_core::error::{Error, ProviderError};
use turnloop_core::message::{ContentBlock, ImageData, ResultPart, Turn, TurnContent};
use turnloop_core::provider::*;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider with the default request timeout.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_timeout(api_key, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(api_key: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Build a provider from the session configuration. A missing API key is
    /// an initialization failure.
    pub fn from_config(config: &SessionConfig) -> turnloop_core::Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                Error::Initialization(
                    "no API key configured (set ANTHROPIC_API_KEY or api_key in turnloop.toml)"
                        .into(),
                )
            })?;

        let provider = Self::with_timeout(api_key, Duration::from_secs(config.request_timeout_secs))?
            .with_base_url(&config.base_url);
        Ok(provider)
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build the system field. Anthropic puts the system prompt at the top
    /// level, not in messages.
    fn to_api_system(system: &str, cache_enabled: bool) -> Option<Vec<SystemBlock>> {
        if system.trim().is_empty() {
            return None;
        }
        Some(vec![SystemBlock {
            block_type: "text",
            text: system.to_string(),
            cache_control: CacheControl::when(cache_enabled),
        }])
    }

    /// Convert turns to Anthropic API format with content blocks. Only the
    /// newest `cache_budget` marked blocks keep their `cache_control`.
    fn to_api_messages(turns: &[Turn], cache_budget: usize) -> Vec<ApiMessage> {
        let mut remaining = cache_budget;
        let mut messages: Vec<ApiMessage> = turns
            .iter()
            .rev()
            .map(|turn| {
                let content = match &turn.content {
                    TurnContent::Text(text) => ApiContent::Text(text.clone()),
                    TurnContent::Blocks(blocks) => {
                        let mut api_blocks: Vec<ApiContentBlock> = blocks
                            .iter()
                            .rev()
                            .map(|b| {
                                let cached = b.cache_marker() && remaining > 0;
                                if cached {
                                    remaining -= 1;
                                }
                                Self::to_api_block(b, cached)
                            })
                            .collect();
                        api_blocks.reverse();
                        ApiContent::Blocks(api_blocks)
                    }
                };
                ApiMessage {
                    role: turn.role.to_string(),
                    content,
                }
            })
            .collect();
        messages.reverse();
        messages
    }

    fn to_api_block(block: &ContentBlock, cached: bool) -> ApiContentBlock {
        match block {
            ContentBlock::Text { text, .. } => ApiContentBlock::Text {
                text: text.clone(),
                cache_control: CacheControl::when(cached),
            },
            ContentBlock::ToolUse { id, name, input } => ApiContentBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            },
            ContentBlock::ToolResult {
                tool_use_id,
                is_error,
                parts,
                ..
            } => ApiContentBlock::ToolResult {
                tool_use_id: tool_use_id.clone(),
                content: parts
                    .iter()
                    .map(|part| match part {
                        ResultPart::Text { text } => ApiToolResultBlock::Text { text: text.clone() },
                        ResultPart::Image(image) => ApiToolResultBlock::Image {
                            source: ApiImageSource::from(image),
                        },
                    })
                    .collect(),
                is_error: *is_error,
                cache_control: CacheControl::when(cached),
            },
            ContentBlock::Image { image, .. } => ApiContentBlock::Image {
                source: ApiImageSource::from(image),
                cache_control: CacheControl::when(cached),
            },
        }
    }

    /// Convert tool definitions to Anthropic format. The last definition
    /// closes the cacheable tool prefix.
    fn to_api_tools(tools: &[ToolDefinition], cache_enabled: bool) -> Vec<ApiTool<'_>> {
        let last = tools.len().saturating_sub(1);
        tools
            .iter()
            .enumerate()
            .map(|(i, t)| ApiTool {
                name: &t.name,
                description: &t.description,
                input_schema: &t.parameters,
                cache_control: CacheControl::when(cache_enabled && i == last),
            })
            .collect()
    }

    /// Serialize a request. Turn markers are honoured first; the tool list
    /// and then the system prompt are marked only while the request stays
    /// within [`PROVIDER_CACHE_BLOCK_LIMIT`] cacheable blocks.
    fn encode_request(request: &CompletionRequest) -> Result<Vec<u8>, ProviderError> {
        let limit = if request.cache_enabled {
            PROVIDER_CACHE_BLOCK_LIMIT
        } else {
            0
        };
        let marked = request
            .turns
            .iter()
            .flat_map(|t| t.blocks())
            .filter(|b| b.cache_marker())
            .count();
        if marked > limit && limit > 0 {
            warn!(marked, limit, "Too many cache markers; keeping the newest");
        }

        let mut spare = limit - marked.min(limit);
        let cache_tools = !request.tools.is_empty() && spare > 0;
        if cache_tools {
            spare -= 1;
        }
        let cache_system = spare > 0;

        let body = ApiRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            messages: Self::to_api_messages(&request.turns, limit),
            system: Self::to_api_system(&request.system, cache_system),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(Self::to_api_tools(&request.tools, cache_tools))
            },
        };
        serde_json::to_vec(&body)
            .map_err(|e| ProviderError::Codec(format!("Failed to encode Anthropic request: {e}")))
    }

    /// Convert an Anthropic API response to our CompletionResponse.
    /// Thinking and other non-actionable blocks are dropped.
    fn to_completion_response(resp: AnthropicResponse) -> CompletionResponse {
        let blocks = resp
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(ContentBlock::text(text)),
                ResponseContentBlock::ToolUse { id, name, input } => {
                    Some(ContentBlock::tool_use(id, name, input))
                }
                ResponseContentBlock::Other => None,
            })
            .collect();

        CompletionResponse {
            blocks,
            usage: Usage {
                input_tokens: resp.usage.input_tokens,
                output_tokens: resp.usage.output_tokens,
                cache_creation_tokens: resp.usage.cache_creation_input_tokens,
                cache_read_tokens: resp.usage.cache_read_input_tokens,
            },
            model: resp.model,
            stop_reason: resp.stop_reason,
        }
    }
}

#[async_trait]
impl turnloop_core::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::encode_request(&request)?;

        debug!(
            provider = "anthropic",
            model = %request.model,
            turns = request.turns.len(),
            tools = request.tools.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid Anthropic API key".into(),
            ));
        }
        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let api_resp: AnthropicResponse = serde_json::from_slice(&bytes).map_err(|e| {
            ProviderError::Codec(format!("Failed to parse Anthropic response: {e}"))
        })?;

        debug!(
            provider = "anthropic",
            input_tokens = api_resp.usage.input_tokens,
            output_tokens = api_resp.usage.output_tokens,
            cache_read = api_resp.usage.cache_read_input_tokens,
            stop_reason = ?api_resp.stop_reason,
            "Completion received"
        );

        Ok(Self::to_completion_response(api_resp))
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<Vec<SystemBlock>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool<'a>>>,
}

/// Cache control settings for prompt caching.
#[derive(Debug, Clone, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    cache_type: &'static str,
}

impl CacheControl {
    fn when(on: bool) -> Option<Self> {
        on.then_some(Self {
            cache_type: "ephemeral",
        })
    }
}

#[derive(Debug, Serialize)]
struct SystemBlock {
    #[serde(rename = "type")]
    block_type: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: ApiContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Blocks(Vec<ApiContentBlock>),
}

#[derive(Debug, Clone, Serialize)]
struct ApiImageSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: String,
    data: String,
}

impl From<&ImageData> for ApiImageSource {
    fn from(image: &ImageData) -> Self {
        Self {
            source_type: "base64",
            media_type: image.media_type.clone(),
            data: STANDARD.encode(&image.data),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiToolResultBlock {
    Text { text: String },
    Image { source: ApiImageSource },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
    Image {
        source: ApiImageSource,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        content: Vec<ApiToolResultBlock>,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
}

#[derive(Debug, Serialize)]
struct ApiTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}
