use tracing::trace;
use turnloop_core::message::{Role, Turn};

/// Marks the most recent block-structured user turns as prompt-cache
/// breakpoints.
///
/// Scanning newest to oldest, each block-structured user turn takes one
/// marker on its last block until `capacity` are placed; the next older such
/// turn has its marker cleared and the scan stops. Plain-string user turns
/// are skipped without using a marker.
#[derive(Debug, Clone, Copy)]
pub struct CacheBreakpointPolicy {
    capacity: usize,
}

impl CacheBreakpointPolicy {
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn apply(&self, turns: &mut [Turn]) {
        let mut remaining = self.capacity;
        for (index, turn) in turns.iter_mut().enumerate().rev() {
            if turn.role != Role::User {
                continue;
            }
            let Some(blocks) = turn.blocks_mut() else {
                continue;
            };
            if remaining > 0 {
                remaining -= 1;
                let last = blocks.len().saturating_sub(1);
                for (i, block) in blocks.iter_mut().enumerate() {
                    block.set_cache_marker(i == last);
                }
                trace!(turn = index, "Cache breakpoint set");
            } else {
                for block in blocks.iter_mut() {
                    block.set_cache_marker(false);
                }
                trace!(turn = index, "Cache breakpoint cleared");
                break;
            }
        }
    }
}

impl Default for CacheBreakpointPolicy {
    fn default() -> Self {
        Self::new(2)
    }
}
