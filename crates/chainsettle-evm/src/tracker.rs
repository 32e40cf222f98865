//! Sliding window of recently projected block headers.
//!
//! Only confirmed blocks are projected, so a header that does not extend the
//! tracked head means the chain reorganised deeper than the confirmation
//! depth. The loop surfaces that instead of rewinding.

use std::collections::VecDeque;

use crate::fetcher::BlockSummary;

/// A header that does not build on the tracked head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentMismatch {
    /// Hash of the tracked head.
    pub expected: String,
    /// `parent_hash` of the incoming header.
    pub actual: String,
}

pub struct BlockTracker {
    /// Oldest first.
    window: VecDeque<BlockSummary>,
    window_size: usize,
}

impl BlockTracker {
    pub fn new(window_size: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size: window_size.max(1),
        }
    }

    /// Append the next header. Headers that do not directly follow the head
    /// (a gap, e.g. after a restart) reset the window.
    pub fn push(&mut self, block: BlockSummary) -> Result<(), ParentMismatch> {
        if let Some(head) = self.window.back() {
            if block.number == head.number + 1 {
                if block.parent_hash != head.hash {
                    return Err(ParentMismatch {
                        expected: head.hash.clone(),
                        actual: block.parent_hash,
                    });
                }
            } else {
                self.window.clear();
            }
        }
        if self.window.len() >= self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(number: u64, hash: &str, parent: &str) -> BlockSummary {
        BlockSummary {
            number,
            hash: hash.into(),
            parent_hash: parent.into(),
            timestamp: (number * 12) as i64,
        }
    }

    #[test]
    fn follows_a_linear_chain() {
        let mut tracker = BlockTracker::new(10);
        tracker.push(block(100, "0xa", "0x0")).unwrap();
        tracker.push(block(101, "0xb", "0xa")).unwrap();
        tracker.push(block(102, "0xc", "0xb")).unwrap();
        assert_eq!(tracker.window.back().unwrap().number, 102);
        assert_eq!(tracker.window.len(), 3);
        assert_eq!(tracker.window[1].hash, "0xb");
    }

    #[test]
    fn parent_mismatch_is_reported() {
        let mut tracker = BlockTracker::new(10);
        tracker.push(block(100, "0xa", "0x0")).unwrap();
        tracker.push(block(101, "0xb", "0xa")).unwrap();
        let err = tracker.push(block(102, "0xc2", "0xb2")).unwrap_err();
        assert_eq!(
            err,
            ParentMismatch {
                expected: "0xb".into(),
                actual: "0xb2".into()
            }
        );
        assert_eq!(tracker.window.back().unwrap().number, 101);
    }

    #[test]
    fn gap_resets_window() {
        let mut tracker = BlockTracker::new(10);
        tracker.push(block(100, "0xa", "0x0")).unwrap();
        tracker.push(block(150, "0xz", "0xy")).unwrap();
        assert_eq!(tracker.window.len(), 1);
        // the new head is checked from here on
        assert!(tracker.push(block(151, "0x1", "0xother")).is_err());
    }

    #[test]
    fn window_size_enforced() {
        let mut tracker = BlockTracker::new(5);
        for i in 0..10u64 {
            let prev = if i == 0 { "0x0".to_string() } else { format!("0x{}", i - 1) };
            tracker.push(block(i, &format!("0x{i}"), &prev)).unwrap();
        }
        assert_eq!(tracker.window.len(), 5);
        assert_eq!(tracker.window.front().unwrap().number, 5);
    }
}
