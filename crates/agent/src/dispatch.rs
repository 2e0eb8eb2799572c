//! Tool dispatch: name resolution, invocation and result normalization.
//!
//! Nothing a tool does can abort the session. Unknown names, tool errors
//! and panics all come back as [`ToolOutcome::Failure`] and are reported to
//! the model as `is_error` results.

use std::ops::Range;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;
use futures::future::join_all;
use tracing::{debug, warn};
use turnloop_core::error::ToolError;
use turnloop_core::message::{ContentBlock, ResultPart, Turn};
use turnloop_core::provider::ToolDefinition;
use turnloop_core::tool::{ToolOutcome, ToolRegistry};

/// One tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

impl ToolCall {
    /// Every tool-use block of an assistant turn, in source order.
    pub fn from_turn(turn: &Turn) -> Vec<Self> {
        turn.tool_uses()
            .map(|(id, name, input)| Self {
                id: id.to_string(),
                name: name.to_string(),
                input: input.clone(),
            })
            .collect()
    }
}

pub struct ToolDispatcher {
    registry: ToolRegistry,
    parallel: bool,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            parallel: false,
        }
    }

    /// Allow consecutive concurrency-safe calls to run together.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    /// Invoke one tool. Never fails: every error path becomes a `Failure`.
    pub async fn dispatch(&self, name: &str, input: serde_json::Value) -> ToolOutcome {
        let Some(tool) = self.registry.get(name) else {
            warn!(tool = %name, "Model requested an unknown tool");
            return ToolError::NotFound(name.to_string()).into();
        };

        let start = Instant::now();
        let result = AssertUnwindSafe(tool.execute(input)).catch_unwind().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(outcome)) => {
                debug!(tool = %name, duration_ms, failed = outcome.is_failure(), "Tool finished");
                outcome
            }
            Ok(Err(e)) => {
                warn!(tool = %name, duration_ms, error = %e, "Tool execution failed");
                e.into()
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(tool = %name, duration_ms, panic = %message, "Tool panicked");
                ToolOutcome::failure(format!("Tool '{name}' panicked: {message}"))
            }
        }
    }

    /// Split calls into execution batches. Sequential mode gives one call per
    /// batch; parallel mode groups runs of consecutive concurrency-safe calls.
    pub fn batches(&self, calls: &[ToolCall]) -> Vec<Range<usize>> {
        let mut batches = Vec::new();
        let mut start = 0;
        while start < calls.len() {
            let mut end = start + 1;
            if self.parallel && self.is_safe(&calls[start].name) {
                while end < calls.len() && self.is_safe(&calls[end].name) {
                    end += 1;
                }
            }
            batches.push(start..end);
            start = end;
        }
        batches
    }

    /// Run one batch concurrently. Outcomes come back in request order and a
    /// failing call does not cancel its siblings.
    pub async fn dispatch_batch(&self, calls: &[ToolCall]) -> Vec<ToolOutcome> {
        join_all(
            calls
                .iter()
                .map(|call| self.dispatch(&call.name, call.input.clone())),
        )
        .await
    }

    /// Run every call, honouring the batch plan.
    pub async fn dispatch_all(&self, calls: &[ToolCall]) -> Vec<ToolOutcome> {
        let mut outcomes = Vec::with_capacity(calls.len());
        for range in self.batches(calls) {
            outcomes.extend(self.dispatch_batch(&calls[range]).await);
        }
        outcomes
    }

    fn is_safe(&self, name: &str) -> bool {
        self.registry
            .get(name)
            .is_some_and(|tool| tool.concurrency_safe())
    }
}

/// Convert an outcome into the `ToolResult` block sent back to the model.
pub fn to_result_block(tool_use_id: &str, outcome: ToolOutcome) -> ContentBlock {
    match outcome {
        ToolOutcome::Failure { message } => {
            ContentBlock::tool_result(tool_use_id, true, vec![ResultPart::Text { text: message }])
        }
        ToolOutcome::Success { text, image } => {
            let mut parts = Vec::new();
            if let Some(text) = text {
                parts.push(ResultPart::Text { text });
            }
            if let Some(image) = image {
                parts.push(ResultPart::Image(image));
            }
            ContentBlock::tool_result(tool_use_id, false, parts)
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
