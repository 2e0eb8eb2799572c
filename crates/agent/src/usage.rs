//! Token usage accounting across a session.

use serde::Serialize;
use turnloop_core::provider::Usage;

/// Recent (last response) and running-total token counters, including
/// prompt-cache creation and reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageTracker {
    recent: Usage,
    total: Usage,
    requests: u64,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, usage: &Usage) {
        self.recent = *usage;
        self.total.input_tokens += usage.input_tokens;
        self.total.output_tokens += usage.output_tokens;
        self.total.cache_creation_tokens += usage.cache_creation_tokens;
        self.total.cache_read_tokens += usage.cache_read_tokens;
        self.requests += 1;
    }

    pub fn recent(&self) -> Usage {
        self.recent
    }

    pub fn total(&self) -> Usage {
        self.total
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }

    /// One-line summary for logs and the final report.
    pub fn report(&self) -> String {
        let t = &self.total;
        format!(
            "{} requests | input {} | output {} | cache write {} | cache read {}",
            self.requests,
            t.input_tokens,
            t.output_tokens,
            t.cache_creation_tokens,
            t.cache_read_tokens
        )
    }
}
