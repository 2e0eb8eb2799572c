//! `turnloop run`: run one session in the terminal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use tracing::{debug, warn};
use turnloop_agent::{JournalWriter, SamplingLoop, ToolDispatcher, events};
use turnloop_config::SessionConfig;
use turnloop_core::message::Conversation;
use turnloop_core::provider::Provider;
use turnloop_providers::AnthropicProvider;

use crate::commands::prompts;
use crate::display;
use crate::input::StdinInput;
use crate::journal::FileJournal;
use crate::transcript;

/// Where the session task comes from.
pub enum TaskSource {
    Text(String),
    File(PathBuf),
    /// Ask the operator to pick or write a prompt.
    Choose,
}

pub async fn run(config: SessionConfig, source: TaskSource, journal: bool) -> anyhow::Result<()> {
    // Fail early with setup instructions when no key is configured.
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables (a .env file works too):");
        eprintln!("    ANTHROPIC_API_KEY=sk-ant-...");
        eprintln!("    TURNLOOP_API_KEY=sk-ant-...     (takes precedence)");
        eprintln!();
        eprintln!("  Or add `api_key` to turnloop.toml.");
        eprintln!();
        bail!("No API key found. See above for setup instructions.");
    }

    let mut input = StdinInput::spawn();
    let task = match source {
        TaskSource::Text(task) => task,
        TaskSource::File(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read prompt {}", path.display()))?,
        TaskSource::Choose => prompts::choose_task(&config.session.prompts_dir, &mut input).await?,
    };

    let provider: Arc<dyn Provider> = Arc::new(AnthropicProvider::from_config(&config)?);
    let registry = turnloop_tools::default_registry(&config.tools);
    let tool_names = registry.names().join(", ");
    if config.tools.parallel && registry.concurrency_safe_names().is_empty() {
        warn!(
            "tools.parallel is set but no registered tool is concurrency-safe; \
             calls run one at a time"
        );
    }
    let dispatcher = ToolDispatcher::new(registry).with_parallel(config.tools.parallel);

    let (sink, stream) = events::channel();
    let display = display::spawn(stream);

    // From here on the display prints the operator prompt.
    let input = input.without_prompts();
    let mut agent = SamplingLoop::new(&config, provider.clone(), dispatcher, sink, Box::new(input))?
        .with_required_tools(["bash", "edit"]);

    let journal_path = (journal || config.journal.enabled).then(|| config.journal.path.clone());
    if let Some(path) = &journal_path {
        let file = Arc::new(FileJournal::new(path));
        let writer = JournalWriter::open(file, provider.clone(), &config.journal).await?;
        agent = agent.with_journal(writer);
    }

    println!();
    println!("  turnloop session");
    println!();
    println!("  Model:     {}", config.model);
    println!("  Tools:     {tool_names}");
    println!("  Workspace: {}", config.tools.workspace().display());
    match config.summary.threshold() {
        Some(max) => println!("  Summary:   after {max} turns"),
        None => println!("  Summary:   off"),
    }
    if let Some(path) = &journal_path {
        println!("  Journal:   {}", path.display());
    }
    println!();
    println!("  When the agent stops to ask, type 'no' (or Ctrl+D) to finish.");

    let result = agent.run(Conversation::with_task(task)).await;

    // The loop owned the only sink, so the display drains and stops.
    if let Err(e) = display.await {
        warn!(error = %e, "Display task failed");
    }

    let transcript_path = &config.session.transcript_path;
    match result {
        Ok(outcome) => {
            save_transcript(transcript_path, &outcome.conversation);
            println!();
            println!("  Usage: {}", outcome.usage.report());
            Ok(())
        }
        Err(abort) => {
            save_transcript(transcript_path, &abort.conversation);
            if let Some(turn) = &abort.offending_turn {
                debug!(role = ?turn.role, text = %turn.text(), "Last turn before abort");
            }
            eprintln!(
                "  The conversation ({} turns) was saved; rerun to start a new session.",
                abort.conversation.len()
            );
            Err(abort.into())
        }
    }
}

fn save_transcript(path: &std::path::Path, conversation: &Conversation) {
    match transcript::write(path, conversation) {
        Ok(()) => println!("  Transcript written to {}", path.display()),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to write transcript"),
    }
}
