//! Per-iteration journal entries.
//!
//! After each iteration the latest exchange is condensed by the journal
//! model and handed to a [`Journal`] for persistence. Journaling is best
//! effort: every failure is logged and swallowed.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use turnloop_config::JournalConfig;
use turnloop_core::error::{Error, Result};
use turnloop_core::message::Conversation;
use turnloop_core::provider::{CompletionRequest, Provider};

/// Storage for numbered journal entries.
#[async_trait]
pub trait Journal: Send + Sync {
    /// Entries already stored; numbering continues after this.
    async fn entry_count(&self) -> Result<usize>;

    async fn append(&self, entry_number: usize, summary: &str) -> Result<()>;
}

pub struct JournalWriter {
    journal: Arc<dyn Journal>,
    provider: Arc<dyn Provider>,
    model: String,
    max_tokens: u32,
    system_prompt: String,
    next_entry: usize,
}

impl JournalWriter {
    /// Attach to `journal`, continuing its entry numbering.
    pub async fn open(
        journal: Arc<dyn Journal>,
        provider: Arc<dyn Provider>,
        config: &JournalConfig,
    ) -> Result<Self> {
        let system_prompt = config
            .resolve_system_prompt()
            .map_err(|e| Error::Initialization(e.to_string()))?;
        let existing = journal.entry_count().await?;
        debug!(existing, "Journal opened");
        Ok(Self {
            journal,
            provider,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            system_prompt,
            next_entry: existing + 1,
        })
    }

    pub fn next_entry(&self) -> usize {
        self.next_entry
    }

    /// Summarize the latest exchange and append it. Never fails.
    pub async fn record(&mut self, conversation: &Conversation, assistant_text: &str) {
        match self.try_record(conversation, assistant_text).await {
            Ok(Some(n)) => info!(entry = n, "Journal entry written"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to write journal entry"),
        }
    }

    async fn try_record(
        &mut self,
        conversation: &Conversation,
        assistant_text: &str,
    ) -> Result<Option<usize>> {
        let user_text = conversation
            .user_turns_rev()
            .next()
            .map(|turn| turn.text())
            .unwrap_or_default();
        if user_text.trim().is_empty() || assistant_text.trim().is_empty() {
            debug!("Skipping journal entry, missing content");
            return Ok(None);
        }

        let request = CompletionRequest::single(
            &self.model,
            &self.system_prompt,
            entry_prompt(&user_text, assistant_text),
            self.max_tokens,
        );
        let response = self.provider.complete(request).await?;
        let summary = response.text();
        let summary = summary.trim();
        if summary.is_empty() {
            debug!("Skipping journal entry, no summary generated");
            return Ok(None);
        }

        let number = self.next_entry;
        self.journal.append(number, summary).await?;
        self.next_entry += 1;
        Ok(Some(number))
    }
}

pub fn entry_prompt(user: &str, assistant: &str) -> String {
    format!("Summarize this interaction:\nUser: {user}\nAssistant: {assistant}")
}
