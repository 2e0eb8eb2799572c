//! History compression.
//!
//! Once the conversation grows past the configured threshold the whole
//! history is condensed by a cheaper model and replaced with the original
//! task plus a single summary turn.

use std::sync::Arc;

use tracing::{debug, info};
use turnloop_config::SummaryConfig;
use turnloop_core::error::{Error, Result};
use turnloop_core::message::{ContentBlock, Conversation, ResultPart, Role, Turn, TurnContent};
use turnloop_core::provider::{CompletionRequest, Provider};

/// Prefix of the synthetic turn that replaces the history.
pub const SUMMARY_MARKER: &str = "[CONVERSATION SUMMARY]";

const SUMMARY_INSTRUCTIONS: &str = "Please provide a detailed technical summary of this conversation. Include:
1. All file names and paths mentioned
2. Directory structures created or modified
3. Specific actions taken and their outcomes
4. Any technical decisions or solutions implemented
5. Current status of the task
6. Any pending or incomplete items
7. Code that was written or modified";

pub struct Summarizer {
    provider: Arc<dyn Provider>,
    model: String,
    max_tokens: u32,
    threshold: usize,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, max_tokens: u32, threshold: usize) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens,
            threshold,
        }
    }

    /// `None` when summarization is disabled.
    pub fn from_config(provider: Arc<dyn Provider>, config: &SummaryConfig) -> Option<Self> {
        let threshold = config.threshold()?;
        Some(Self::new(provider, &config.model, config.max_tokens, threshold))
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn should_summarize(&self, conversation: &Conversation) -> bool {
        conversation.len() > self.threshold
    }

    /// Replace the history with `[task, summary]`. Returns the turn count
    /// before replacement. On error the conversation is left untouched.
    pub async fn summarize(&self, conversation: &mut Conversation) -> Result<usize> {
        let turns_before = conversation.len();
        let task = conversation
            .task()
            .cloned()
            .ok_or_else(|| Error::Summarization("conversation has no task turn".into()))?;

        let prompt = build_prompt(&task.text(), &transcript(&conversation.turns()[1..]));
        debug!(
            model = %self.model,
            turns = turns_before,
            prompt_chars = prompt.len(),
            "Requesting conversation summary"
        );

        let request = CompletionRequest::single(&self.model, "", prompt, self.max_tokens);
        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|e| Error::Summarization(e.to_string()))?;

        let summary = response.text();
        if summary.trim().is_empty() {
            return Err(Error::Summarization("model returned an empty summary".into()));
        }

        conversation.replace(vec![task, summary_turn(&summary)])?;
        info!(
            turns_before,
            summary_chars = summary.len(),
            "Conversation compressed"
        );
        Ok(turns_before)
    }
}

/// The user turn that stands in for the summarized history.
pub fn summary_turn(summary: &str) -> Turn {
    Turn::user_blocks(vec![ContentBlock::text(format!("{SUMMARY_MARKER}\n\n{summary}"))])
}

/// Flatten turns to `\nROLE: text` lines. Tool results contribute their
/// text parts only; tool uses and images are omitted.
pub fn transcript(turns: &[Turn]) -> String {
    let mut out = String::new();
    for turn in turns {
        let role = match turn.role {
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
        };
        match &turn.content {
            TurnContent::Text(text) => {
                out.push_str(&format!("\n{role}: {text}"));
            }
            TurnContent::Blocks(blocks) => {
                for block in blocks {
                    match block {
                        ContentBlock::Text { text, .. } => {
                            out.push_str(&format!("\n{role}: {text}"));
                        }
                        ContentBlock::ToolResult { parts, .. } => {
                            for part in parts {
                                if let ResultPart::Text { text } = part {
                                    out.push_str(&format!("\n{role} (Tool Result): {text}"));
                                }
                            }
                        }
                        ContentBlock::ToolUse { .. } | ContentBlock::Image { .. } => {}
                    }
                }
            }
        }
    }
    out
}

pub fn build_prompt(task: &str, transcript: &str) -> String {
    format!(
        "{SUMMARY_INSTRUCTIONS}\n\nOriginal task prompt for context:\n{task}\n\nConversation to summarize:\n{transcript}"
    )
}
