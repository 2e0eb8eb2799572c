//! Turn and Conversation domain types.
//!
//! These are the core value objects that flow through the entire system:
//! the operator seeds a task → the loop appends assistant and tool-result
//! turns → policies mark and prune them → the provider sees the result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a turn's author.
///
/// Tool results travel back to the provider as `User` turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A binary image payload with its media type.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageData {
    pub media_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl ImageData {
    pub fn png(data: Vec<u8>) -> Self {
        Self {
            media_type: "image/png".into(),
            data,
        }
    }
}

// Image bytes are large; keep them out of logs.
impl std::fmt::Debug for ImageData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageData")
            .field("media_type", &self.media_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// One part of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultPart {
    Text { text: String },
    Image(ImageData),
}

/// The smallest unit of turn content.
///
/// `cached` is the cache breakpoint flag. It is only ever set on the last
/// block of a user turn, so the tool-use variant does not carry it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "is_false")]
        cached: bool,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        parts: Vec<ResultPart>,
        #[serde(default, skip_serializing_if = "is_false")]
        cached: bool,
    },
    Image {
        image: ImageData,
        #[serde(default, skip_serializing_if = "is_false")]
        cached: bool,
    },
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            cached: false,
        }
    }

    pub fn tool_use(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, is_error: bool, parts: Vec<ResultPart>) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            is_error,
            parts,
            cached: false,
        }
    }

    pub fn image(image: ImageData) -> Self {
        Self::Image {
            image,
            cached: false,
        }
    }

    /// Whether this block carries a cache breakpoint.
    pub fn cache_marker(&self) -> bool {
        match self {
            Self::Text { cached, .. } | Self::ToolResult { cached, .. } | Self::Image { cached, .. } => {
                *cached
            }
            Self::ToolUse { .. } => false,
        }
    }

    /// Set or clear the cache breakpoint. Returns `false` if the block kind
    /// cannot carry one.
    pub fn set_cache_marker(&mut self, on: bool) -> bool {
        match self {
            Self::Text { cached, .. } | Self::ToolResult { cached, .. } | Self::Image { cached, .. } => {
                *cached = on;
                true
            }
            Self::ToolUse { .. } => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Number of image parts inside a tool result (zero for other kinds).
    pub fn result_image_count(&self) -> usize {
        match self {
            Self::ToolResult { parts, .. } => parts
                .iter()
                .filter(|p| matches!(p, ResultPart::Image(_)))
                .count(),
            _ => 0,
        }
    }
}

/// Turn content: operator free text, or structured blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// One message exchanged in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: TurnContent,
}

impl Turn {
    /// A plain-string user turn (task text or an operator answer).
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: TurnContent::Text(text.into()),
        }
    }

    /// A block-structured user turn, e.g. tool results or a summary.
    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: TurnContent::Blocks(blocks),
        }
    }

    pub fn assistant(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: TurnContent::Blocks(blocks),
        }
    }

    pub fn is_block_structured(&self) -> bool {
        matches!(self.content, TurnContent::Blocks(_))
    }

    /// Blocks of a structured turn; empty for plain-string turns.
    pub fn blocks(&self) -> &[ContentBlock] {
        match &self.content {
            TurnContent::Blocks(blocks) => blocks,
            TurnContent::Text(_) => &[],
        }
    }

    pub fn blocks_mut(&mut self) -> Option<&mut Vec<ContentBlock>> {
        match &mut self.content {
            TurnContent::Blocks(blocks) => Some(blocks),
            TurnContent::Text(_) => None,
        }
    }

    pub fn has_cache_marker(&self) -> bool {
        self.blocks().iter().any(ContentBlock::cache_marker)
    }

    /// Tool invocation requests in source order.
    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str, &serde_json::Value)> {
        self.blocks().iter().filter_map(|b| match b {
            ContentBlock::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
            _ => None,
        })
    }

    /// All human-readable text in this turn: plain content, text blocks, and
    /// the text parts of tool results, joined by spaces.
    pub fn text(&self) -> String {
        match &self.content {
            TurnContent::Text(text) => text.clone(),
            TurnContent::Blocks(blocks) => {
                let mut pieces: Vec<&str> = Vec::new();
                for block in blocks {
                    match block {
                        ContentBlock::Text { text, .. } => pieces.push(text),
                        ContentBlock::ToolResult { parts, .. } => {
                            for part in parts {
                                if let ResultPart::Text { text } = part {
                                    pieces.push(text);
                                }
                            }
                        }
                        _ => {}
                    }
                }
                pieces.join(" ")
            }
        }
    }
}

/// The conversation store: an ordered sequence of turns with shared context.
///
/// Turns are only ever appended; the single exception is [`replace`], which
/// swaps the whole history atomically and must keep the original task turn.
///
/// [`replace`]: Conversation::replace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last turn was added or the history was replaced
    pub updated_at: DateTime<Utc>,

    turns: Vec<Turn>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            created_at: now,
            updated_at: now,
            turns: Vec::new(),
        }
    }

    /// Create a conversation seeded with the task turn.
    pub fn with_task(task: impl Into<String>) -> Self {
        let mut conversation = Self::new();
        conversation.append(Turn::user(task));
        conversation
    }

    /// Add a turn to the end of the conversation.
    pub fn append(&mut self, turn: Turn) {
        self.updated_at = Utc::now();
        self.turns.push(turn);
    }

    /// The trailing `n` turns (fewer if the conversation is shorter).
    pub fn last(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    /// Replace the whole history. The first turn of `turns` must equal the
    /// current first turn (the original task).
    pub fn replace(&mut self, turns: Vec<Turn>) -> Result<()> {
        let Some(task) = self.turns.first() else {
            return Err(Error::InvalidConversation(
                "cannot replace an empty conversation".into(),
            ));
        };
        match turns.first() {
            Some(first) if first == task => {}
            Some(_) => {
                return Err(Error::InvalidConversation(
                    "replacement must keep the original task as its first turn".into(),
                ));
            }
            None => {
                return Err(Error::InvalidConversation(
                    "replacement must not be empty".into(),
                ));
            }
        }
        self.updated_at = Utc::now();
        self.turns = turns;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Mutable view for in-place policies. A slice cannot grow or shrink,
    /// so the length invariant holds.
    pub fn turns_mut(&mut self) -> &mut [Turn] {
        &mut self.turns
    }

    /// The original task turn.
    pub fn task(&self) -> Option<&Turn> {
        self.turns.first()
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// User turns, newest first.
    pub fn user_turns_rev(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter().rev().filter(|t| t.role == Role::User)
    }

    /// Get the total token count estimate (rough: 4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.turns.iter().map(|t| t.text().len() / 4).sum()
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
