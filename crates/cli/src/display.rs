//! Terminal display: the single consumer of the session's event stream.

use std::io::Write;

use tokio::task::JoinHandle;
use turnloop_agent::{AgentEvent, EventStream, TerminationReason};

use crate::input::prompt_line;

/// Tool output longer than this is cut in the display (the model still sees
/// all of it).
const MAX_RESULT_LINES: usize = 20;

/// Print events until every sink is dropped. This task is the only writer
/// of session output, the operator prompt included.
pub fn spawn(mut events: EventStream) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = format_event(&event);
            if matches!(event, AgentEvent::AwaitingInput { .. }) {
                print!("{text}");
                std::io::stdout().flush().ok();
            } else {
                println!("{text}");
            }
        }
    })
}

pub fn format_event(event: &AgentEvent) -> String {
    match event {
        AgentEvent::IterationStarted { iteration, turns } => {
            format!("\n  ── iteration {iteration} ({turns} turns) ──")
        }
        AgentEvent::AssistantText { text } => indent("Assistant > ", text),
        AgentEvent::ToolInvoked { name, input, .. } => {
            format!("  Tool Use: {name} {input}")
        }
        AgentEvent::ToolResult {
            name,
            is_error,
            text,
            images,
            ..
        } => {
            let label = if *is_error { "Tool Error" } else { "Tool Result" };
            let mut out = indent(&format!("{label} [{name}] > "), &truncate_lines(text));
            if *images > 0 {
                out.push_str(&format!("\n  ({images} image(s) attached)"));
            }
            out
        }
        AgentEvent::AwaitingInput { prompt } => prompt_line(prompt),
        AgentEvent::Summarized { turns_before } => {
            format!("  [Summary] {turns_before} turns compressed into a summary")
        }
        AgentEvent::Error { message } => format!("  [Error] {message}"),
        AgentEvent::Terminated {
            reason,
            iterations,
            usage,
        } => {
            let why = match reason {
                TerminationReason::OperatorDeclined => "operator ended the session",
                TerminationReason::EndOfInput => "end of input",
                TerminationReason::CodecError => "provider response could not be decoded",
                TerminationReason::Aborted => "aborted",
            };
            format!(
                "\n  Session ended after {iterations} iteration(s): {why}\n  Tokens: input {} | output {} | cache write {} | cache read {}",
                usage.input_tokens,
                usage.output_tokens,
                usage.cache_creation_tokens,
                usage.cache_read_tokens
            )
        }
    }
}

fn indent(prefix: &str, text: &str) -> String {
    let pad = " ".repeat(prefix.chars().count());
    let mut out = String::new();
    for (i, line) in text.lines().enumerate() {
        if i > 0 {
            out.push('\n');
            out.push_str("  ");
            out.push_str(&pad);
        } else {
            out.push_str("  ");
            out.push_str(prefix);
        }
        out.push_str(line);
    }
    if out.is_empty() {
        out = format!("  {prefix}");
    }
    out
}

fn truncate_lines(text: &str) -> String {
    let total = text.lines().count();
    if total <= MAX_RESULT_LINES {
        return text.to_string();
    }
    let kept: Vec<&str> = text.lines().take(MAX_RESULT_LINES).collect();
    format!("{}\n... ({} more lines)", kept.join("\n"), total - MAX_RESULT_LINES)
}
