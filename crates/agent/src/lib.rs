//! The sampling loop and everything it runs between requests.
//!
//! A session alternates between the model and the tools:
//!
//! 1. **Prepare context**: blank turns are filled, cache breakpoints are
//!    moved to the newest user turns and old tool-result images are dropped
//! 2. **Sample** the next assistant turn from the configured provider
//! 3. **If tool calls**: dispatch them, append one user turn of results and
//!    loop back to step 1
//! 4. **If text only**: ask the operator, who can continue or end the session
//! 5. **Compress** the history once it grows past the summary threshold
//!
//! Progress is reported through an [`EventSink`] so a display can follow the
//! session without sharing the conversation.

pub mod dispatch;
pub mod events;
pub mod input;
pub mod journal;
pub mod loop_runner;
pub mod policy;
pub mod summarize;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod usage;

pub use dispatch::{ToolCall, ToolDispatcher, to_result_block};
pub use events::{AgentEvent, EventSink, EventStream, TerminationReason};
pub use input::{OperatorInput, is_decline};
pub use journal::{Journal, JournalWriter};
pub use loop_runner::{OPERATOR_PROMPT, SamplingLoop, SessionAbort, SessionOutcome};
pub use policy::{CacheBreakpointPolicy, ImageRetentionPolicy};
pub use summarize::{SUMMARY_MARKER, Summarizer};
pub use usage::UsageTracker;
