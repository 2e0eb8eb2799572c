//! Edit tool: view, create and edit files in the workspace.
//!
//! Commands:
//! - `view`: list a directory (two levels, hidden entries skipped) or print a
//!   file with line numbers, optionally limited to `view_range`
//! - `create`: write `file_text`, creating parent directories
//! - `str_replace`: replace a unique `old_str` with `new_str`
//! - `insert`: insert `new_str` after line `insert_line` (0 = top of file)

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use turnloop_core::error::ToolError;
use turnloop_core::tool::{Tool, ToolOutcome};

/// Lines of context shown around an edit.
const SNIPPET_LINES: usize = 4;

/// Directory listings stop this many levels below the requested path.
const LIST_DEPTH: usize = 2;

pub struct EditTool {
    workspace: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum EditCommand {
    View {
        path: String,
        #[serde(default)]
        view_range: Option<[i64; 2]>,
    },
    Create {
        path: String,
        file_text: String,
    },
    StrReplace {
        path: String,
        old_str: String,
        #[serde(default)]
        new_str: String,
    },
    Insert {
        path: String,
        insert_line: usize,
        new_str: String,
    },
}

impl EditTool {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    /// Relative paths resolve against the workspace directory.
    fn resolve(&self, path: &str) -> Result<PathBuf, ToolError> {
        if path.trim().is_empty() {
            return Err(ToolError::InvalidArguments("Path cannot be empty".into()));
        }
        let p = Path::new(path);
        Ok(if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.workspace.join(p)
        })
    }

    async fn view(&self, path: &Path, view_range: Option<[i64; 2]>) -> Result<String, ToolError> {
        if path.is_dir() {
            if view_range.is_some() {
                return Err(invalid(
                    "The `view_range` parameter is not allowed when `path` points to a directory",
                ));
            }
            let mut entries = Vec::new();
            list_dir(path, LIST_DEPTH, &mut entries).await?;
            entries.sort();
            return Ok(format!(
                "Here's the files and directories up to {LIST_DEPTH} levels deep in {}, excluding hidden items:\n{}\n",
                path.display(),
                entries.join("\n")
            ));
        }

        let content = read_file(path).await?;
        let lines: Vec<&str> = content.split('\n').collect();
        let total = lines.len() as i64;

        let (start, shown) = match view_range {
            None => (1, content.clone()),
            Some([first, last]) => {
                if first < 1 || first > total {
                    return Err(invalid(format!(
                        "Invalid `view_range` [{first}, {last}]: its first element should be within [1, {total}]"
                    )));
                }
                if last > total {
                    return Err(invalid(format!(
                        "Invalid `view_range` [{first}, {last}]: its second element should not exceed the file's {total} lines"
                    )));
                }
                if last != -1 && last < first {
                    return Err(invalid(format!(
                        "Invalid `view_range` [{first}, {last}]: its second element should be -1 or at least {first}"
                    )));
                }
                let from = (first - 1) as usize;
                let to = if last == -1 { lines.len() } else { last as usize };
                (first as usize, lines[from..to].join("\n"))
            }
        };

        Ok(numbered(&shown, &path.display().to_string(), start))
    }

    async fn create(&self, path: &Path, file_text: &str) -> Result<String, ToolError> {
        write_file(path, file_text).await?;
        Ok(format!("File created successfully at: {}", path.display()))
    }

    async fn str_replace(&self, path: &Path, old_str: &str, new_str: &str) -> Result<String, ToolError> {
        if old_str.is_empty() {
            return Err(invalid("`old_str` must not be empty"));
        }
        let content = read_file(path).await?;

        let occurrences = content.matches(old_str).count();
        if occurrences == 0 {
            return Err(failed(format!(
                "No replacement was performed, old_str `{old_str}` did not appear verbatim in {}",
                path.display()
            )));
        }
        if occurrences > 1 {
            let lines: Vec<String> = content
                .split('\n')
                .enumerate()
                .filter(|(_, line)| line.contains(old_str))
                .map(|(i, _)| (i + 1).to_string())
                .collect();
            return Err(failed(format!(
                "No replacement was performed. Multiple occurrences of old_str `{old_str}` in lines [{}]. Please ensure it is unique",
                lines.join(", ")
            )));
        }

        let updated = content.replacen(old_str, new_str, 1);
        write_file(path, &updated).await?;

        let replacement_line = content
            .split(old_str)
            .next()
            .map(|before| before.matches('\n').count())
            .unwrap_or(0);
        let start = replacement_line.saturating_sub(SNIPPET_LINES);
        let end = replacement_line + SNIPPET_LINES + new_str.matches('\n').count();
        let snippet: Vec<&str> = updated.split('\n').skip(start).take(end - start + 1).collect();

        Ok(format!(
            "The file {} has been edited. {}Review the changes and make sure they are as expected. Edit the file again if necessary.",
            path.display(),
            numbered(&snippet.join("\n"), &format!("a snippet of {}", path.display()), start + 1)
        ))
    }

    async fn insert(&self, path: &Path, insert_line: usize, new_str: &str) -> Result<String, ToolError> {
        let content = read_file(path).await?;
        let lines: Vec<&str> = content.split('\n').collect();
        if insert_line > lines.len() {
            return Err(invalid(format!(
                "Invalid `insert_line` parameter: {insert_line}. It should be within [0, {}]",
                lines.len()
            )));
        }

        let new_lines: Vec<&str> = new_str.split('\n').collect();
        let mut updated: Vec<&str> = Vec::with_capacity(lines.len() + new_lines.len());
        updated.extend_from_slice(&lines[..insert_line]);
        updated.extend_from_slice(&new_lines);
        updated.extend_from_slice(&lines[insert_line..]);
        write_file(path, &updated.join("\n")).await?;

        let snippet_start = insert_line.saturating_sub(SNIPPET_LINES);
        let snippet_end = (insert_line + SNIPPET_LINES).min(lines.len());
        let mut snippet: Vec<&str> = lines[snippet_start..insert_line].to_vec();
        snippet.extend_from_slice(&new_lines);
        snippet.extend_from_slice(&lines[insert_line..snippet_end]);

        Ok(format!(
            "The file {} has been edited. {}Review the changes and make sure they are as expected (correct indentation, no duplicate lines, etc). Edit the file again if necessary.",
            path.display(),
            numbered(&snippet.join("\n"), "a snippet of the edited file", snippet_start + 1)
        ))
    }
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "View, create and edit files. `view` shows a file with line numbers or lists a directory; \
         `create` writes a new file; `str_replace` replaces one unique occurrence of `old_str`; \
         `insert` adds `new_str` after line `insert_line`."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "enum": ["view", "create", "str_replace", "insert"],
                    "description": "The operation to perform"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory path, relative to the workspace or absolute"
                },
                "file_text": {
                    "type": "string",
                    "description": "Content for `create`"
                },
                "view_range": {
                    "type": "array",
                    "items": { "type": "integer" },
                    "description": "Optional [start, end] line range for `view`; end may be -1"
                },
                "old_str": {
                    "type": "string",
                    "description": "Exact text to replace for `str_replace`"
                },
                "new_str": {
                    "type": "string",
                    "description": "Replacement text for `str_replace`, or text to add for `insert`"
                },
                "insert_line": {
                    "type": "integer",
                    "description": "Line after which `new_str` is inserted"
                }
            },
            "required": ["command", "path"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutcome, ToolError> {
        let command: EditCommand =
            serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        debug!(?command, "Executing edit command");

        let output = match command {
            EditCommand::View { path, view_range } => {
                let path = self.resolve(&path)?;
                self.view(&path, view_range).await?
            }
            EditCommand::Create { path, file_text } => {
                let path = self.resolve(&path)?;
                self.create(&path, &file_text).await?
            }
            EditCommand::StrReplace {
                path,
                old_str,
                new_str,
            } => {
                let path = self.resolve(&path)?;
                self.str_replace(&path, &old_str, &new_str).await?
            }
            EditCommand::Insert {
                path,
                insert_line,
                new_str,
            } => {
                let path = self.resolve(&path)?;
                self.insert(&path, insert_line, &new_str).await?
            }
        };

        Ok(ToolOutcome::text(output))
    }
}

fn invalid(reason: impl Into<String>) -> ToolError {
    ToolError::InvalidArguments(reason.into())
}

fn failed(reason: impl Into<String>) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: "edit".into(),
        reason: reason.into(),
    }
}

/// `cat -n` style rendering.
fn numbered(content: &str, descriptor: &str, first_line: usize) -> String {
    let body: Vec<String> = content
        .split('\n')
        .enumerate()
        .map(|(i, line)| format!("{:6}\t{line}", i + first_line))
        .collect();
    format!(
        "Here's the result of running `cat -n` on {descriptor}:\n{}\n",
        body.join("\n")
    )
}

async fn read_file(path: &Path) -> Result<String, ToolError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| failed(format!("Ran into {e} while trying to read {}", path.display())))
}

async fn write_file(path: &Path, content: &str) -> Result<(), ToolError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| failed(format!("Error creating {}: {e}", parent.display())))?;
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|e| failed(format!("Error writing to {}: {e}", path.display())))
}

/// Collect non-hidden entries up to `depth` levels below `dir`.
async fn list_dir(dir: &Path, depth: usize, out: &mut Vec<String>) -> Result<(), ToolError> {
    let mut pending = vec![(dir.to_path_buf(), 0usize)];
    while let Some((current, level)) = pending.pop() {
        let mut reader = tokio::fs::read_dir(&current)
            .await
            .map_err(|e| failed(format!("Cannot list {}: {e}", current.display())))?;
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| failed(format!("Cannot list {}: {e}", current.display())))?
        {
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let path = entry.path();
            out.push(path.display().to_string());
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if is_dir && level + 1 < depth {
                pending.push((path, level + 1));
            }
        }
    }
    Ok(())
}
