//! Orchestration events and the channel that carries them.
//!
//! The loop publishes [`AgentEvent`]s through an [`EventSink`]; a single
//! consumer (the terminal display, a test) drains the matching
//! [`EventStream`]. Publishing never blocks and never fails.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;
use turnloop_core::provider::Usage;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The operator answered "no".
    OperatorDeclined,
    /// Operator input reached end of file.
    EndOfInput,
    /// The transport could not encode the request or decode the response.
    CodecError,
    /// Any other error; the caller receives a `SessionAbort`.
    Aborted,
}

/// Events emitted by the sampling loop.
///
/// Per-iteration order is `iteration_started`, `assistant_text`*,
/// then `tool_invoked`/`tool_result` pairs or `awaiting_input`, then
/// optionally `summarized`. `error` is always followed by `terminated`
/// unless it reports a recoverable summarization failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    IterationStarted { iteration: usize, turns: usize },

    /// One text block of the assistant's response.
    AssistantText { text: String },

    ToolInvoked {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    ToolResult {
        id: String,
        name: String,
        is_error: bool,
        /// Text parts of the result, newline joined
        text: String,
        images: usize,
    },

    AwaitingInput { prompt: String },

    /// The history was replaced by the task plus a summary turn.
    Summarized { turns_before: usize },

    Error { message: String },

    Terminated {
        reason: TerminationReason,
        iterations: usize,
        usage: Usage,
    },
}

impl AgentEvent {
    /// Event name, matching the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::IterationStarted { .. } => "iteration_started",
            Self::AssistantText { .. } => "assistant_text",
            Self::ToolInvoked { .. } => "tool_invoked",
            Self::ToolResult { .. } => "tool_result",
            Self::AwaitingInput { .. } => "awaiting_input",
            Self::Summarized { .. } => "summarized",
            Self::Error { .. } => "error",
            Self::Terminated { .. } => "terminated",
        }
    }
}

/// Create a connected sink and stream.
pub fn channel() -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, EventStream { rx })
}

/// Producer half. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl EventSink {
    /// A sink with no consumer; every event is dropped.
    pub fn detached() -> Self {
        channel().0
    }

    pub fn publish(&self, event: AgentEvent) {
        let kind = event.kind();
        if self.tx.send(event).is_err() {
            trace!(kind, "No event consumer attached, dropping event");
        }
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<AgentEvent>,
}

impl EventStream {
    /// Wait for the next event. `None` once every sink is dropped and the
    /// queue is empty.
    pub async fn recv(&mut self) -> Option<AgentEvent> {
        self.rx.recv().await
    }

    /// Everything queued right now, without waiting.
    pub fn drain(&mut self) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = AgentEvent::ToolInvoked {
            id: "toolu_1".into(),
            name: "bash".into(),
            input: serde_json::json!({"command": "ls"}),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tool_invoked");
        assert_eq!(json["type"], event.kind());
        assert_eq!(json["input"]["command"], "ls");

        let terminated = AgentEvent::Terminated {
            reason: TerminationReason::OperatorDeclined,
            iterations: 3,
            usage: Usage::default(),
        };
        let json = serde_json::to_value(&terminated).unwrap();
        assert_eq!(json["type"], "terminated");
        assert_eq!(json["reason"], "operator_declined");
    }

    #[test]
    fn kind_matches_tag_for_every_variant() {
        let events = vec![
            AgentEvent::IterationStarted {
                iteration: 1,
                turns: 1,
            },
            AgentEvent::AssistantText { text: "hi".into() },
            AgentEvent::ToolResult {
                id: "a".into(),
                name: "b".into(),
                is_error: false,
                text: "c".into(),
                images: 0,
            },
            AgentEvent::AwaitingInput {
                prompt: "next?".into(),
            },
            AgentEvent::Summarized { turns_before: 41 },
            AgentEvent::Error {
                message: "x".into(),
            },
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.kind());
        }
    }

    #[test]
    fn event_deserialization() {
        let json = r#"{"type":"assistant_text","text":"hi"}"#;
        let event: AgentEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, AgentEvent::AssistantText { text: "hi".into() });
    }

    #[tokio::test]
    async fn fifo_delivery() {
        let (sink, mut stream) = channel();
        for i in 1..=3 {
            sink.publish(AgentEvent::IterationStarted {
                iteration: i,
                turns: i,
            });
        }
        drop(sink);

        let mut seen = Vec::new();
        while let Some(AgentEvent::IterationStarted { iteration, .. }) = stream.recv().await {
            seen.push(iteration);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn publishing_without_consumer_is_fine() {
        let sink = EventSink::detached();
        sink.publish(AgentEvent::Error {
            message: "nobody listening".into(),
        });
    }

    #[tokio::test]
    async fn cloned_sinks_share_the_stream() {
        let (sink, mut stream) = channel();
        let other = sink.clone();
        sink.publish(AgentEvent::AssistantText { text: "a".into() });
        other.publish(AgentEvent::AssistantText { text: "b".into() });
        assert_eq!(stream.drain().len(), 2);
    }
}
