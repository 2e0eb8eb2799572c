use tracing::debug;
use turnloop_core::message::{ContentBlock, ResultPart, Turn};

/// Bounds the number of image parts kept across all tool results.
///
/// Images are counted over every `ToolResult` block; the oldest ones, in
/// original turn order, are dropped until at most `keep` remain. Everything
/// else in the turns is left untouched. `keep = None` disables pruning.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageRetentionPolicy {
    keep: Option<usize>,
}

impl ImageRetentionPolicy {
    pub fn new(keep: Option<usize>) -> Self {
        Self { keep }
    }

    pub fn keep(&self) -> Option<usize> {
        self.keep
    }

    /// Prune in place. Returns the number of images removed.
    pub fn apply(&self, turns: &mut [Turn]) -> usize {
        let Some(keep) = self.keep else {
            return 0;
        };

        let found: usize = turns
            .iter()
            .flat_map(|t| t.blocks())
            .map(ContentBlock::result_image_count)
            .sum();
        let excess = found.saturating_sub(keep);
        if excess == 0 {
            return 0;
        }

        let mut to_remove = excess;
        'turns: for turn in turns.iter_mut() {
            let Some(blocks) = turn.blocks_mut() else {
                continue;
            };
            for block in blocks.iter_mut() {
                if to_remove == 0 {
                    break 'turns;
                }
                if let ContentBlock::ToolResult { parts, .. } = block {
                    parts.retain(|part| {
                        if to_remove > 0 && matches!(part, ResultPart::Image(_)) {
                            to_remove -= 1;
                            false
                        } else {
                            true
                        }
                    });
                }
            }
        }

        debug!(found, kept = found - excess, removed = excess, "Pruned tool result images");
        excess
    }
}
