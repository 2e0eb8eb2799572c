//! Context policies applied to the turn sequence before every request.
//!
//! Both run in place on `&mut [Turn]`, so neither can change the number of
//! turns in the store.

pub mod cache;
pub mod images;

pub use cache::CacheBreakpointPolicy;
pub use images::ImageRetentionPolicy;

use turnloop_core::message::{ContentBlock, Turn, TurnContent};

/// Content sent in place of blank operator text or an empty model reply.
pub const BLANK_REPLACEMENT: &str = "continue";

/// Make every turn acceptable to the completion endpoint, which rejects
/// empty content. Blank plain-string turns become [`BLANK_REPLACEMENT`];
/// blank text blocks are dropped, and a block turn left with nothing (an
/// empty `end_turn` reply, say) gets one [`BLANK_REPLACEMENT`] text block.
/// Returns how many turns were changed.
pub fn fill_blank_turns(turns: &mut [Turn]) -> usize {
    let mut replaced = 0;
    for turn in turns.iter_mut() {
        match &mut turn.content {
            TurnContent::Text(text) => {
                if text.trim().is_empty() {
                    *text = BLANK_REPLACEMENT.to_string();
                    replaced += 1;
                }
            }
            TurnContent::Blocks(blocks) => {
                let before = blocks.len();
                blocks.retain(|b| b.as_text().is_none_or(|t| !t.trim().is_empty()));
                let emptied = blocks.is_empty();
                if emptied {
                    blocks.push(ContentBlock::text(BLANK_REPLACEMENT));
                }
                if emptied || blocks.len() != before {
                    replaced += 1;
                }
            }
        }
    }
    replaced
}
