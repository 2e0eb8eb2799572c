//! turnloop CLI, the main entry point.
//!
//! Commands:
//! - `run`      Run a session on a task, a prompt file or an interactively chosen prompt
//! - `prompts`  List saved prompt files
//! - `config`   Print the effective configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod display;
mod input;
mod journal;
mod transcript;

#[derive(Parser)]
#[command(
    name = "turnloop",
    about = "turnloop: drive a tool-using model session from the terminal",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./turnloop.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a session
    Run {
        /// Task text to start from
        #[arg(short, long, conflicts_with = "prompt")]
        task: Option<String>,

        /// Read the task from a prompt file
        #[arg(short, long)]
        prompt: Option<PathBuf>,

        /// Write journal entries for this session
        #[arg(short, long)]
        journal: bool,
    },

    /// List saved prompts
    Prompts,

    /// Show the effective configuration (API key redacted)
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Logs go to stderr so they never interleave with the session display.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            task,
            prompt,
            journal,
        } => {
            let source = match (task, prompt) {
                (Some(task), _) => commands::run::TaskSource::Text(task),
                (None, Some(path)) => commands::run::TaskSource::File(path),
                (None, None) => commands::run::TaskSource::Choose,
            };
            commands::run::run(config, source, journal).await?
        }
        Commands::Prompts => commands::prompts::run(&config)?,
        Commands::Config => commands::config_cmd::show(&config)?,
    }

    Ok(())
}
