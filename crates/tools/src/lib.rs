//! Built-in tool implementations for turnloop.
//!
//! Tools give the agent the ability to interact with its workspace:
//! run shell commands and view or edit files.

pub mod bash;
pub mod edit;

use turnloop_config::ToolsConfig;
use turnloop_core::tool::ToolRegistry;

pub use bash::BashTool;
pub use edit::EditTool;

/// Create the default tool registry with every built-in tool, scoped to the
/// configured workspace directory.
pub fn default_registry(config: &ToolsConfig) -> ToolRegistry {
    let workspace = config.workspace();
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(
        BashTool::new(config.allowed_commands.clone())
            .with_workspace(workspace.clone())
            .with_timeout_secs(config.command_timeout_secs),
    ));
    registry.register(Box::new(EditTool::new(workspace)));
    registry
}
