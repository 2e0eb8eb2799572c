//! Human-readable dump of a finished conversation.

use std::fmt::Write as _;
use std::path::Path;

use turnloop_core::message::{ContentBlock, Conversation, ImageData, ResultPart, Role, TurnContent};

const SEPARATOR_WIDTH: usize = 80;

pub fn render(conversation: &Conversation) -> String {
    let mut out = String::new();
    for turn in conversation.turns() {
        let role = match turn.role {
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
        };
        let _ = writeln!(out, "\n{role}:");

        match &turn.content {
            TurnContent::Text(text) => {
                let _ = writeln!(out, "{text}");
            }
            TurnContent::Blocks(blocks) => {
                for block in blocks {
                    render_block(&mut out, block);
                }
            }
        }
        let _ = writeln!(out, "{}", "-".repeat(SEPARATOR_WIDTH));
    }
    out
}

fn render_block(out: &mut String, block: &ContentBlock) {
    match block {
        ContentBlock::Text { text, .. } => {
            let _ = writeln!(out, "{text}");
        }
        ContentBlock::ToolUse { name, input, .. } => {
            let input = serde_json::to_string_pretty(input).unwrap_or_else(|_| input.to_string());
            let _ = writeln!(out, "Tool Use [{name}]\n{input}");
        }
        ContentBlock::ToolResult {
            tool_use_id,
            is_error,
            parts,
            ..
        } => {
            let flag = if *is_error { " (error)" } else { "" };
            let _ = writeln!(out, "Tool Result [{tool_use_id}]{flag}");
            for part in parts {
                match part {
                    ResultPart::Text { text } => {
                        let _ = writeln!(out, "{text}");
                    }
                    ResultPart::Image(image) => {
                        let _ = writeln!(out, "{}", image_placeholder(image));
                    }
                }
            }
        }
        ContentBlock::Image { image, .. } => {
            let _ = writeln!(out, "{}", image_placeholder(image));
        }
    }
}

fn image_placeholder(image: &ImageData) -> String {
    format!("Image ({}, {} bytes)", image.media_type, image.data.len())
}

/// Render `conversation` to `path`, creating parent directories.
pub fn write(path: &Path, conversation: &Conversation) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render(conversation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnloop_core::message::Turn;

    fn sample() -> Conversation {
        let mut conversation = Conversation::with_task("list files");
        conversation.append(Turn::assistant(vec![
            ContentBlock::text("Looking."),
            ContentBlock::tool_use("toolu_1", "bash", serde_json::json!({"command": "ls"})),
        ]));
        conversation.append(Turn::user_blocks(vec![ContentBlock::tool_result(
            "toolu_1",
            false,
            vec![
                ResultPart::Text {
                    text: "a.txt".into(),
                },
                ResultPart::Image(ImageData::png(vec![0; 42])),
            ],
        )]));
        conversation
    }

    #[test]
    fn renders_every_turn_with_separators() {
        let text = render(&sample());
        let separator = "-".repeat(80);
        assert_eq!(text.matches(&separator).count(), 3);
        assert!(text.starts_with("\nUSER:\nlist files\n"));
        assert!(text.contains("\nASSISTANT:\nLooking.\nTool Use [bash]\n{\n  \"command\": \"ls\"\n}\n"));
        assert!(text.contains("Tool Result [toolu_1]\na.txt\nImage (image/png, 42 bytes)\n"));
    }

    #[test]
    fn error_results_are_flagged() {
        let mut conversation = Conversation::with_task("t");
        conversation.append(Turn::user_blocks(vec![ContentBlock::tool_result(
            "x",
            true,
            vec![ResultPart::Text {
                text: "boom".into(),
            }],
        )]));
        assert!(render(&conversation).contains("Tool Result [x] (error)\nboom\n"));
    }

    #[test]
    fn write_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("transcript.txt");
        write(&path, &sample()).unwrap();
        assert!(std::fs::read_to_string(path).unwrap().contains("USER:"));
    }
}
