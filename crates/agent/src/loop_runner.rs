//! The sampling loop.
//!
//! One session is one call to [`SamplingLoop::run`]. Each iteration applies
//! the context policies, asks the provider for the next assistant turn,
//! dispatches any tool calls and either loops straight back with their
//! results or hands control to the operator. The conversation is owned by
//! the loop for the whole session and returned on exit, whether the session
//! ended normally or not.

use std::sync::Arc;

use tracing::{debug, info, warn};
use turnloop_config::SessionConfig;
use turnloop_core::error::{Error, Result};
use turnloop_core::message::{ContentBlock, Conversation, ResultPart, Role, Turn};
use turnloop_core::provider::{CompletionRequest, Provider, ToolDefinition};

use crate::dispatch::{ToolCall, ToolDispatcher, to_result_block};
use crate::events::{AgentEvent, EventSink, TerminationReason};
use crate::input::{OperatorInput, is_decline};
use crate::journal::JournalWriter;
use crate::policy::{CacheBreakpointPolicy, ImageRetentionPolicy, fill_blank_turns};
use crate::summarize::Summarizer;
use crate::usage::UsageTracker;

/// Shown to the operator when the model stops calling tools.
pub const OPERATOR_PROMPT: &str = "What would you like to do next? Enter 'no' to exit";

/// A session that ended without error.
#[derive(Debug)]
pub struct SessionOutcome {
    pub conversation: Conversation,
    pub usage: UsageTracker,
    pub iterations: usize,
    pub reason: TerminationReason,
}

/// A session that ended on an unrecoverable error. Carries the store so the
/// caller can inspect it or start a new session from it.
#[derive(Debug, thiserror::Error)]
#[error("session aborted: {error}")]
pub struct SessionAbort {
    #[source]
    pub error: Error,
    pub conversation: Conversation,
    /// The last turn appended before the failure, if any.
    pub offending_turn: Option<Turn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    AwaitingModelResponse,
    Dispatching,
    AwaitingUserInput,
    Terminated,
}

/// What the loop does after an iteration.
#[derive(Debug)]
enum Decision {
    Continue,
    Stop(TerminationReason),
    Abort(Error),
}

pub struct SamplingLoop {
    provider: Arc<dyn Provider>,
    dispatcher: ToolDispatcher,
    sink: EventSink,
    input: Box<dyn OperatorInput>,
    model: String,
    max_tokens: u32,
    system_prompt: String,
    cache_enabled: bool,
    cache_policy: CacheBreakpointPolicy,
    image_policy: ImageRetentionPolicy,
    summarizer: Option<Summarizer>,
    journal: Option<JournalWriter>,
    required_tools: Vec<String>,
    usage: UsageTracker,
    state: LoopState,
}

impl SamplingLoop {
    /// Build a loop from the session configuration. Fails if the system
    /// prompt file cannot be read.
    pub fn new(
        config: &SessionConfig,
        provider: Arc<dyn Provider>,
        dispatcher: ToolDispatcher,
        sink: EventSink,
        input: Box<dyn OperatorInput>,
    ) -> Result<Self> {
        let system_prompt = config
            .resolve_system_prompt()
            .map_err(|e| Error::Initialization(e.to_string()))?;
        let breakpoints = if config.cache.enabled {
            config.cache.breakpoints
        } else {
            0
        };

        Ok(Self {
            summarizer: Summarizer::from_config(provider.clone(), &config.summary),
            provider,
            dispatcher,
            sink,
            input,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            system_prompt,
            cache_enabled: config.cache.enabled,
            cache_policy: CacheBreakpointPolicy::new(breakpoints),
            image_policy: ImageRetentionPolicy::new(config.images.keep_limit()),
            journal: None,
            required_tools: Vec::new(),
            usage: UsageTracker::new(),
            state: LoopState::AwaitingModelResponse,
        })
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_journal(mut self, journal: JournalWriter) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Refuse to start unless every named tool is registered.
    pub fn with_required_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_tools = names.into_iter().map(Into::into).collect();
        self
    }

    /// Drive the session to completion.
    pub async fn run(
        mut self,
        mut conversation: Conversation,
    ) -> std::result::Result<SessionOutcome, SessionAbort> {
        if let Err(error) = self.check_ready(&conversation) {
            return Err(self.abort(error, conversation, 0));
        }

        info!(
            conversation_id = %conversation.id,
            turns = conversation.len(),
            model = %self.model,
            tools = self.dispatcher.registry().len(),
            "Starting session"
        );

        let tools = self.dispatcher.definitions();
        let mut iteration = 0;

        loop {
            iteration += 1;
            self.transition(LoopState::AwaitingModelResponse);

            match self.iterate(&mut conversation, iteration, &tools).await {
                Decision::Continue => self.maybe_summarize(&mut conversation).await,
                Decision::Stop(reason) => {
                    self.transition(LoopState::Terminated);
                    info!(
                        ?reason,
                        iterations = iteration,
                        usage = %self.usage.report(),
                        "Session finished"
                    );
                    self.sink.publish(AgentEvent::Terminated {
                        reason,
                        iterations: iteration,
                        usage: self.usage.total(),
                    });
                    return Ok(SessionOutcome {
                        conversation,
                        usage: self.usage,
                        iterations: iteration,
                        reason,
                    });
                }
                Decision::Abort(error) => return Err(self.abort(error, conversation, iteration)),
            }
        }
    }

    async fn iterate(
        &mut self,
        conversation: &mut Conversation,
        iteration: usize,
        tools: &[ToolDefinition],
    ) -> Decision {
        self.sink.publish(AgentEvent::IterationStarted {
            iteration,
            turns: conversation.len(),
        });

        let blanks = fill_blank_turns(conversation.turns_mut());
        if blanks > 0 {
            debug!(blanks, "Replaced blank turns");
        }
        self.cache_policy.apply(conversation.turns_mut());
        let pruned = self.image_policy.apply(conversation.turns_mut());
        if pruned > 0 {
            debug!(pruned, "Dropped old tool result images");
        }

        let request = CompletionRequest {
            model: self.model.clone(),
            system: self.system_prompt.clone(),
            turns: conversation.turns().to_vec(),
            tools: tools.to_vec(),
            max_tokens: self.max_tokens,
            cache_enabled: self.cache_enabled,
        };

        let response = match self.provider.complete(request).await {
            Ok(response) => response,
            Err(e) if e.is_codec() => {
                warn!(error = %e, "Provider codec failure, ending session");
                self.sink.publish(AgentEvent::Error {
                    message: e.to_string(),
                });
                return Decision::Stop(TerminationReason::CodecError);
            }
            Err(e) => return Decision::Abort(e.into()),
        };

        self.usage.record(&response.usage);
        let recent = self.usage.recent();
        info!(
            iteration,
            input_tokens = recent.input_tokens,
            output_tokens = recent.output_tokens,
            cache_creation_tokens = recent.cache_creation_tokens,
            cache_read_tokens = recent.cache_read_tokens,
            "Model responded"
        );

        for block in &response.blocks {
            if let Some(text) = block.as_text() {
                self.sink.publish(AgentEvent::AssistantText {
                    text: text.to_string(),
                });
            }
        }
        let assistant_text = response.text();
        let assistant = Turn::assistant(response.blocks);
        let calls = ToolCall::from_turn(&assistant);
        conversation.append(assistant);

        if !calls.is_empty() {
            self.transition(LoopState::Dispatching);
            let results = self.run_tools(&calls).await;
            conversation.append(Turn::user_blocks(results));
            self.record_journal(conversation, &assistant_text).await;
            return Decision::Continue;
        }

        self.record_journal(conversation, &assistant_text).await;
        self.transition(LoopState::AwaitingUserInput);
        self.sink.publish(AgentEvent::AwaitingInput {
            prompt: OPERATOR_PROMPT.to_string(),
        });

        match self.input.ask(OPERATOR_PROMPT).await {
            None => Decision::Stop(TerminationReason::EndOfInput),
            Some(answer) if is_decline(&answer) => Decision::Stop(TerminationReason::OperatorDeclined),
            Some(answer) => {
                conversation.append(Turn::user(answer));
                Decision::Continue
            }
        }
    }

    /// Dispatch every call batch by batch. Returns one result block per call,
    /// in request order.
    async fn run_tools(&self, calls: &[ToolCall]) -> Vec<ContentBlock> {
        let mut results = Vec::with_capacity(calls.len());
        for range in self.dispatcher.batches(calls) {
            let batch = &calls[range];
            for call in batch {
                info!(tool = %call.name, id = %call.id, "Invoking tool");
                self.sink.publish(AgentEvent::ToolInvoked {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                });
            }

            let outcomes = self.dispatcher.dispatch_batch(batch).await;
            for (call, outcome) in batch.iter().zip(outcomes) {
                let block = to_result_block(&call.id, outcome);
                self.sink.publish(result_event(call, &block));
                results.push(block);
            }
        }
        results
    }

    async fn record_journal(&mut self, conversation: &Conversation, assistant_text: &str) {
        if let Some(journal) = self.journal.as_mut() {
            journal.record(conversation, assistant_text).await;
        }
    }

    async fn maybe_summarize(&mut self, conversation: &mut Conversation) {
        let Some(summarizer) = &self.summarizer else {
            return;
        };
        if !summarizer.should_summarize(conversation) {
            return;
        }

        info!(
            turns = conversation.len(),
            threshold = summarizer.threshold(),
            "Conversation over threshold, summarizing"
        );
        match summarizer.summarize(conversation).await {
            Ok(turns_before) => self.sink.publish(AgentEvent::Summarized { turns_before }),
            Err(e) => {
                warn!(error = %e, "Summarization failed, keeping full history");
                self.sink.publish(AgentEvent::Error {
                    message: e.to_string(),
                });
            }
        }
    }

    fn check_ready(&self, conversation: &Conversation) -> Result<()> {
        let Some(task) = conversation.task() else {
            return Err(Error::Initialization("conversation has no task turn".into()));
        };
        if task.role != Role::User || task.text().trim().is_empty() {
            return Err(Error::Initialization(
                "the task must be a non-empty user turn".into(),
            ));
        }
        for name in &self.required_tools {
            if !self.dispatcher.registry().contains(name) {
                return Err(Error::Initialization(format!(
                    "required tool '{name}' is not registered"
                )));
            }
        }
        Ok(())
    }

    fn abort(&mut self, error: Error, conversation: Conversation, iterations: usize) -> SessionAbort {
        warn!(error = %error, iterations, "Session aborted");
        self.transition(LoopState::Terminated);
        self.sink.publish(AgentEvent::Error {
            message: error.to_string(),
        });
        self.sink.publish(AgentEvent::Terminated {
            reason: TerminationReason::Aborted,
            iterations,
            usage: self.usage.total(),
        });
        SessionAbort {
            error,
            offending_turn: conversation.last_turn().cloned(),
            conversation,
        }
    }

    fn transition(&mut self, next: LoopState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "Loop state");
            self.state = next;
        }
    }
}

fn result_event(call: &ToolCall, block: &ContentBlock) -> AgentEvent {
    let (is_error, text) = match block {
        ContentBlock::ToolResult {
            is_error, parts, ..
        } => {
            let text = parts
                .iter()
                .filter_map(|part| match part {
                    ResultPart::Text { text } => Some(text.as_str()),
                    ResultPart::Image(_) => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            (*is_error, text)
        }
        _ => (false, String::new()),
    };
    AgentEvent::ToolResult {
        id: call.id.clone(),
        name: call.name.clone(),
        is_error,
        text,
        images: block.result_image_count(),
    }
}
