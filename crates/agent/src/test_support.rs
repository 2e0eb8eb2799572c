//! Scripted providers, tools and operator input for driving the loop
//! without a network or a terminal.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use turnloop_core::error::{ProviderError, ToolError};
use turnloop_core::message::{ContentBlock, ImageData};
use turnloop_core::provider::{CompletionRequest, CompletionResponse, Provider, Usage};
use turnloop_core::tool::{Tool, ToolOutcome};

use crate::input::OperatorInput;

type Scripted = Result<CompletionResponse, ProviderError>;

/// A provider that replays scripted responses in order.
///
/// Requests for a model with its own script (see [`with_model_script`]) are
/// served from that script; everything else comes from the main queue. Every
/// request is recorded for later inspection.
///
/// [`with_model_script`]: ScriptedProvider::with_model_script
pub struct ScriptedProvider {
    main: Mutex<VecDeque<Scripted>>,
    per_model: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Scripted>) -> Self {
        Self {
            main: Mutex::new(responses.into()),
            per_model: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_model_script(self, model: impl Into<String>, responses: Vec<Scripted>) -> Self {
        lock(&self.per_model).insert(model.into(), responses.into());
        self
    }

    /// All requests seen so far, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let model = request.model.clone();
        lock(&self.requests).push(request);

        let next = match lock(&self.per_model).get_mut(&model) {
            Some(queue) => queue.pop_front(),
            None => lock(&self.main).pop_front(),
        };
        next.unwrap_or_else(|| {
            Err(ProviderError::ApiError {
                status_code: 500,
                message: format!("script exhausted for model {model}"),
            })
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A response with the given blocks and small fixed usage.
pub fn response(blocks: Vec<ContentBlock>) -> Scripted {
    Ok(CompletionResponse {
        blocks,
        usage: Usage {
            input_tokens: 10,
            output_tokens: 5,
            cache_creation_tokens: 0,
            cache_read_tokens: 0,
        },
        model: "scripted-model".into(),
        stop_reason: None,
    })
}

pub fn text_response(text: &str) -> Scripted {
    response(vec![ContentBlock::text(text)])
}

pub fn tool_response(id: &str, name: &str, input: serde_json::Value) -> Scripted {
    response(vec![ContentBlock::tool_use(id, name, input)])
}

/// Operator answers replayed in order; `None` once exhausted (end of input).
#[derive(Default)]
pub struct ScriptedInput {
    answers: VecDeque<String>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedInput {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handle to the prompts shown so far; stays valid after the input is
    /// moved into the loop.
    pub fn prompts(&self) -> Arc<Mutex<Vec<String>>> {
        self.prompts.clone()
    }
}

#[async_trait]
impl OperatorInput for ScriptedInput {
    async fn ask(&mut self, prompt: &str) -> Option<String> {
        lock(&self.prompts).push(prompt.to_string());
        self.answers.pop_front()
    }
}

/// Echoes its `text` argument.
pub struct EchoTool {
    safe: bool,
}

impl EchoTool {
    pub fn new() -> Self {
        Self { safe: false }
    }

    pub fn safe() -> Self {
        Self { safe: true }
    }
}

impl Default for EchoTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echoes back the input"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }
    fn concurrency_safe(&self) -> bool {
        self.safe
    }
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutcome, ToolError> {
        let text = arguments["text"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'text' argument".into()))?;
        Ok(ToolOutcome::text(text))
    }
}

/// Returns a fixed PNG payload with a caption.
pub struct ImageTool {
    bytes: Vec<u8>,
}

impl ImageTool {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

#[async_trait]
impl Tool for ImageTool {
    fn name(&self) -> &str {
        "screenshot"
    }
    fn description(&self) -> &str {
        "Captures the screen"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutcome, ToolError> {
        Ok(ToolOutcome::Success {
            text: Some("captured".into()),
            image: Some(ImageData::png(self.bytes.clone())),
        })
    }
}

/// Always returns an execution error.
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "fail"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutcome, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "fail".into(),
            reason: "disk on fire".into(),
        })
    }
}

/// Panics when executed.
pub struct PanickingTool;

#[async_trait]
impl Tool for PanickingTool {
    fn name(&self) -> &str {
        "panic"
    }
    fn description(&self) -> &str {
        "Panics"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutcome, ToolError> {
        panic!("boom");
    }
}

/// Sleeps, then records its name in a shared log and echoes `name:text`.
pub struct SlowTool {
    name: String,
    delay: Duration,
    log: Arc<Mutex<Vec<String>>>,
}

impl SlowTool {
    pub fn new(name: &str, delay: Duration, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            delay,
            log,
        }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Sleeps before answering"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    fn concurrency_safe(&self) -> bool {
        true
    }
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutcome, ToolError> {
        tokio::time::sleep(self.delay).await;
        lock(&self.log).push(self.name.clone());
        let text = arguments["text"].as_str().unwrap_or_default();
        Ok(ToolOutcome::text(format!("{}:{text}", self.name)))
    }
}
