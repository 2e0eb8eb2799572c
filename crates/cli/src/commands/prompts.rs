//! `turnloop prompts` and interactive prompt selection for `turnloop run`.
//!
//! Prompts are Markdown files in the configured prompts directory; the file
//! content is used verbatim as the session task.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use tracing::info;
use turnloop_agent::OperatorInput;
use turnloop_config::SessionConfig;

/// `*.md` files in `dir`, sorted by name. A missing directory has none.
pub fn list_prompts(dir: &Path) -> io::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut prompts = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "md") {
            prompts.push(path);
        }
    }
    prompts.sort();
    Ok(prompts)
}

pub fn run(config: &SessionConfig) -> anyhow::Result<()> {
    let dir = &config.session.prompts_dir;
    let prompts = list_prompts(dir)?;
    if prompts.is_empty() {
        println!("No prompts in {}", dir.display());
        return Ok(());
    }
    for (i, path) in prompts.iter().enumerate() {
        println!("  {}. {}", i + 1, display_name(path));
    }
    Ok(())
}

/// Ask the operator to pick a saved prompt or write a new one. A new prompt
/// is saved to `dir` before it is returned.
pub async fn choose_task(dir: &Path, input: &mut dyn OperatorInput) -> anyhow::Result<String> {
    let prompts = list_prompts(dir)?;
    println!();
    println!("  Available prompts ({}):", dir.display());
    for (i, path) in prompts.iter().enumerate() {
        println!("  {}. {}", i + 1, display_name(path));
    }
    let create = prompts.len() + 1;
    println!("  {create}. Create new prompt");
    println!();

    let choice = loop {
        let Some(answer) = input.ask("Select prompt number").await else {
            bail!("No prompt selected");
        };
        match answer.trim().parse::<usize>() {
            Ok(n) if (1..=create).contains(&n) => break n,
            _ => println!("  Please enter a number between 1 and {create}"),
        }
    };

    if choice == create {
        let name = input
            .ask("Enter new prompt filename (without .md)")
            .await
            .context("No prompt filename given")?;
        let text = input
            .ask("Enter your prompt")
            .await
            .context("No prompt text given")?;
        let path = save_prompt(dir, &name, &text)?;
        println!("  New prompt saved to {}", path.display());
        return Ok(text);
    }

    let path = &prompts[choice - 1];
    let task = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read prompt {}", path.display()))?;
    info!(prompt = %path.display(), "Selected prompt");
    Ok(task)
}

/// Write `text` to `<dir>/<name>.md`, creating the directory if needed.
pub fn save_prompt(dir: &Path, name: &str, text: &str) -> anyhow::Result<PathBuf> {
    let name = name.trim();
    let name = name.strip_suffix(".md").unwrap_or(name);
    if name.is_empty() || name.contains(['/', '\\']) {
        bail!("Invalid prompt filename: {name:?}");
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(format!("{name}.md"));
    std::fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

fn display_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
