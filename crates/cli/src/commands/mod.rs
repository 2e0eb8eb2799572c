pub mod config_cmd;
pub mod prompts;
pub mod run;

use std::path::Path;

use anyhow::Context;
use turnloop_config::{CONFIG_FILE_NAME, SessionConfig};

/// Load the session configuration from `path` (or `./turnloop.toml`) with
/// environment overrides applied.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<SessionConfig> {
    let path = path.unwrap_or(Path::new(CONFIG_FILE_NAME));
    SessionConfig::load_with_env(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}
