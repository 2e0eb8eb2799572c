//! Operator input seam.

use async_trait::async_trait;

/// Where the loop gets the operator's next instruction when the model
/// stops calling tools.
#[async_trait]
pub trait OperatorInput: Send {
    /// Show `prompt` and wait for an answer. `None` means end of input.
    async fn ask(&mut self, prompt: &str) -> Option<String>;
}

/// Whether an operator answer asks the session to end.
pub fn is_decline(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "no" | "n")
}
