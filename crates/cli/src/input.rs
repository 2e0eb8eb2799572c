//! Terminal operator input.
//!
//! A background task reads stdin line by line and forwards each line over a
//! channel, so asking never blocks the runtime. During a session the display
//! task owns the prompt text (it renders `awaiting_input`), so the input is
//! switched to [`StdinInput::without_prompts`] and only reads.

use std::io::Write;

use async_trait::async_trait;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;
use turnloop_agent::OperatorInput;

pub struct StdinInput {
    lines: mpsc::Receiver<String>,
    echo_prompts: bool,
}

/// The operator prompt as shown in the terminal, cursor left after `You > `.
pub fn prompt_line(prompt: &str) -> String {
    format!("\n  {prompt}\n  You > ")
}

impl StdinInput {
    /// Start reading stdin. Must be called inside a Tokio runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut lines = BufReader::new(io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF (Ctrl+D)
                    Err(e) => {
                        warn!(error = %e, "Failed to read stdin");
                        break;
                    }
                }
            }
        });
        Self::from_receiver(rx)
    }

    fn from_receiver(lines: mpsc::Receiver<String>) -> Self {
        Self {
            lines,
            echo_prompts: true,
        }
    }

    /// Stop printing prompts; another task renders them.
    pub fn without_prompts(mut self) -> Self {
        self.echo_prompts = false;
        self
    }
}

#[async_trait]
impl OperatorInput for StdinInput {
    async fn ask(&mut self, prompt: &str) -> Option<String> {
        if self.echo_prompts {
            print!("{}", prompt_line(prompt));
            std::io::stdout().flush().ok();
        }
        self.lines.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn silent_input_still_reads_lines() {
        let (tx, rx) = mpsc::channel(4);
        let mut input = StdinInput::from_receiver(rx).without_prompts();
        assert!(!input.echo_prompts);

        tx.send("keep going".to_string()).await.unwrap();
        drop(tx);
        assert_eq!(input.ask("next?").await.as_deref(), Some("keep going"));
        assert_eq!(input.ask("next?").await, None);
    }

    #[test]
    fn prompt_line_leaves_cursor_after_marker() {
        assert_eq!(prompt_line("next?"), "\n  next?\n  You > ");
    }
}
