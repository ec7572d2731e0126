//! Chain tracker — keeps a sliding window of the last N accepted headers
//! so continuity and forks can be judged without asking the node.

use std::collections::VecDeque;

use crate::types::BlockHeader;

/// Returned by [`ChainTracker::accept`] when a header does not extend the tip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fork {
    /// Height of the tracked tip at the time of the mismatch.
    pub tip_height: u64,
    /// The header that failed to connect.
    pub header: BlockHeader,
}

/// Tracks the last N accepted headers, oldest first, contiguous by parent hash.
#[derive(Debug)]
pub struct ChainTracker {
    window: VecDeque<BlockHeader>,
    window_size: usize,
}

impl ChainTracker {
    /// Create a tracker retaining at most `window_size` headers.
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    /// Seed the tracker from stored headers (any order). Non-contiguous
    /// prefixes are dropped so the window always walks by parent hash.
    pub fn restore(window_size: usize, mut headers: Vec<BlockHeader>) -> Self {
        headers.sort_by_key(|h| h.height);
        let mut tracker = Self::new(window_size);
        for header in headers {
            if tracker.accept(header.clone()).is_err() {
                tracker.window.clear();
                tracker.window.push_back(header);
            }
        }
        tracker
    }

    /// Append `header` if it extends the tip.
    ///
    /// An empty tracker accepts any header as its base.
    pub fn accept(&mut self, header: BlockHeader) -> Result<(), Fork> {
        if let Some(tip) = self.window.back() {
            if !header.extends(tip) {
                return Err(Fork {
                    tip_height: tip.height,
                    header,
                });
            }
        }
        if self.window.len() >= self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(header);
        Ok(())
    }

    /// The most recently accepted header.
    pub fn tip(&self) -> Option<&BlockHeader> {
        self.window.back()
    }

    pub fn tip_height(&self) -> Option<u64> {
        self.tip().map(|h| h.height)
    }

    /// The oldest retained header.
    pub fn oldest(&self) -> Option<&BlockHeader> {
        self.window.front()
    }

    /// Header at `height`, if it is inside the window.
    pub fn header_at(&self, height: u64) -> Option<&BlockHeader> {
        let oldest = self.oldest()?.height;
        let offset = height.checked_sub(oldest)? as usize;
        self.window.get(offset)
    }

    /// Discard every header above `height`.
    pub fn rewind_to(&mut self, height: u64) {
        while let Some(back) = self.window.back() {
            if back.height > height {
                self.window.pop_back();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Iterate the window from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &BlockHeader> {
        self.window.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(height: u64, hash: &str, parent: &str) -> BlockHeader {
        BlockHeader {
            hash: hash.into(),
            height,
            parent_hash: parent.into(),
            timestamp: height as i64 * 600,
        }
    }

    fn chain(tracker: &mut ChainTracker, from: u64, to: u64) {
        for i in from..=to {
            let parent = format!("h{}", i.saturating_sub(1));
            tracker.accept(header(i, &format!("h{i}"), &parent)).unwrap();
        }
    }

    #[test]
    fn accept_contiguous_chain() {
        let mut tracker = ChainTracker::new(10);
        chain(&mut tracker, 100, 102);
        assert_eq!(tracker.tip_height(), Some(102));
        assert_eq!(tracker.len(), 3);
        assert_eq!(tracker.header_at(101).unwrap().hash, "h101");
        assert!(tracker.header_at(99).is_none());
        assert!(tracker.header_at(103).is_none());
    }

    #[test]
    fn accept_signals_fork() {
        let mut tracker = ChainTracker::new(10);
        chain(&mut tracker, 100, 101);
        let fork = tracker.accept(header(102, "x102", "other")).unwrap_err();
        assert_eq!(fork.tip_height, 101);
        assert_eq!(fork.header.hash, "x102");
        assert_eq!(tracker.tip_height(), Some(101));
    }

    #[test]
    fn rewind_truncates() {
        let mut tracker = ChainTracker::new(20);
        chain(&mut tracker, 100, 110);
        tracker.rewind_to(105);
        assert_eq!(tracker.tip().unwrap().hash, "h105");
        tracker.accept(header(106, "y106", "h105")).unwrap();
        assert_eq!(tracker.tip_height(), Some(106));
    }

    #[test]
    fn window_size_enforced() {
        let mut tracker = ChainTracker::new(5);
        chain(&mut tracker, 1, 10);
        assert_eq!(tracker.len(), 5);
        assert_eq!(tracker.oldest().unwrap().height, 6);
    }

    #[test]
    fn restore_keeps_contiguous_suffix() {
        let headers = vec![
            header(12, "h12", "h11"),
            header(10, "h10", "h9"),
            header(11, "h11", "h10"),
        ];
        let tracker = ChainTracker::restore(10, headers);
        assert_eq!(tracker.len(), 3);
        assert_eq!(tracker.tip_height(), Some(12));

        let gapped = vec![header(10, "h10", "h9"), header(12, "h12", "h11")];
        let tracker = ChainTracker::restore(10, gapped);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.tip_height(), Some(12));
    }
}
