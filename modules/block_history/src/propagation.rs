//! Depth propagation and threshold evaluation.
//!
//! Depth changes are pushed up the parent chain eagerly: a node is
//! recomputed from its current children and, only if its value grew, its
//! parent is recomputed in turn. Flushing is driven by an explicit queue of
//! window roots, extended with the children each eviction promotes.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use meridian_common::{BlockHash, BlockNumber};
use tracing::{debug, info};

use crate::block_node::BlockNode;
use crate::history_tree::BlockHistory;

impl BlockHistory {
    /// Evaluate the block at `hash` for confirmation, then walk its
    /// ancestors, recomputing children depth until a value stops growing or
    /// the walk leaves the resident tree.
    pub(crate) fn propagate_from(&mut self, hash: BlockHash) {
        self.check_confirmation(hash);

        let mut current = self.blocks.get(&hash).map(|b| b.parent_hash);
        while let Some(parent_hash) = current {
            let Some(parent) = self.blocks.get(&parent_hash) else {
                break;
            };

            let recomputed = parent.computed_children_depth(self);
            if recomputed <= parent.children_depth {
                break;
            }
            let next = parent.parent_hash;

            if let Some(parent) = self.blocks.get_mut(&parent_hash) {
                debug!(
                    number = %parent.number,
                    from = parent.children_depth,
                    to = recomputed,
                    "Children depth increased"
                );
                parent.children_depth = recomputed;
            }
            self.check_confirmation(parent_hash);
            current = Some(next);
        }
    }

    /// Fire the one-shot confirmation if the block has just become eligible.
    fn check_confirmation(&mut self, hash: BlockHash) {
        let num_confirmations = self.config.num_confirmations;
        let eligible = self
            .blocks
            .get(&hash)
            .is_some_and(|b| !b.confirmed && b.is_confirmable(num_confirmations));
        if eligible {
            // Cannot fail: the block was just looked up
            let _ = self.confirm_block(hash);
        }
    }

    /// A window root deep enough to leave the retained window.
    pub(crate) fn is_flushable(&self, block: &BlockNode) -> bool {
        !block.flushed
            && self.parent(block).is_none()
            && block.depth(self.head_block_number) >= BlockNumber::from(self.config.stream_size)
    }

    /// Flush every flushable root, cascading into the children each flush
    /// promotes to root. Blocks leave in ascending (number, hash) order.
    pub(crate) fn flush_window(&mut self) -> Vec<BlockNode> {
        self.drain_window(true)
    }

    /// As [`flush_window`](Self::flush_window), but without observer calls.
    /// Used to settle a restored snapshot.
    pub(crate) fn settle_window(&mut self) -> Vec<BlockNode> {
        self.drain_window(false)
    }

    fn drain_window(&mut self, notify: bool) -> Vec<BlockNode> {
        let mut queue: BinaryHeap<Reverse<(BlockNumber, BlockHash)>> = self
            .blocks
            .values()
            .filter(|b| self.is_flushable(b))
            .map(|b| Reverse((b.number, b.hash)))
            .collect();

        let mut flushed = Vec::new();
        while let Some(Reverse((_, hash))) = queue.pop() {
            let Some(block) = self.evict_root(hash, notify) else {
                continue;
            };
            queue.extend(
                self.children(&block.hash)
                    .filter(|c| self.is_flushable(c))
                    .map(|c| Reverse((c.number, c.hash))),
            );
            flushed.push(block);
        }
        flushed
    }

    /// Mark a root flushed, tell the observer if asked to, and drop it from
    /// the indexes.
    pub(crate) fn evict_root(&mut self, hash: BlockHash, notify: bool) -> Option<BlockNode> {
        let block = self.blocks.get_mut(&hash)?;
        if block.flushed {
            return None;
        }
        block.flushed = true;
        let number = block.number;

        if notify {
            info!(number = %number, hash = %hash, "Flushing block");
            self.observer.block_flushed(number, hash);
        } else {
            debug!(number = %number, hash = %hash, "Dropping restored block outside the window");
        }
        self.unlink_block(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::HistoryConfig;
    use crate::history_observer::drain_events;
    use crate::history_tree::tests::{assert_depths_consistent, hash, make_history, raw};

    #[test]
    fn test_propagation_stops_when_depth_does_not_grow() {
        let (mut history, _) = make_history(HistoryConfig::new(50, 100));
        // 1 -> 2 -> 3 -> 4 and a side branch 2 -> 5
        history.ingest(raw(1, 1, 0)).unwrap();
        history.ingest(raw(2, 2, 1)).unwrap();
        history.ingest(raw(3, 3, 2)).unwrap();
        history.ingest(raw(4, 4, 3)).unwrap();

        // Poison the root so a walk that reached it would be visible
        history.blocks.get_mut(&hash(1)).unwrap().children_depth = 40;
        history.ingest(raw(5, 3, 2)).unwrap();
        assert_eq!(history.get_block(&hash(1)).unwrap().children_depth, 40);
        assert_eq!(history.get_block(&hash(2)).unwrap().children_depth, 2);
    }

    #[test]
    fn test_long_chain_depths_stay_consistent() {
        let (mut history, queue) = make_history(HistoryConfig::new(7, 1000));
        for k in 1..=200u8 {
            history.ingest(raw(k, k as BlockNumber, k - 1)).unwrap();
        }
        assert_eq!(history.get_block(&hash(1)).unwrap().children_depth, 199);
        assert_eq!(drain_events(&queue).len(), 193);
        assert_depths_consistent(&history);
    }

    #[test]
    fn test_flushable_needs_depth_and_no_resident_parent() {
        let (mut history, _) = make_history(HistoryConfig::new(3, 4));
        history.ingest(raw(1, 1, 0)).unwrap();
        history.ingest(raw(2, 2, 1)).unwrap();
        history.ingest(raw(3, 4, 2)).unwrap();

        let one = history.get_block(&hash(1)).unwrap();
        let two = history.get_block(&hash(2)).unwrap();
        assert!(!history.is_flushable(one));
        assert!(!history.is_flushable(two));

        history.head_block_number = 5;
        let one = history.get_block(&hash(1)).unwrap();
        let two = history.get_block(&hash(2)).unwrap();
        assert!(history.is_flushable(one));
        assert!(!history.is_flushable(two));
    }

    #[test]
    fn test_settling_does_not_notify() {
        let (mut history, queue) = make_history(HistoryConfig::new(3, 2));
        history.ingest(raw(1, 1, 0)).unwrap();
        history.ingest(raw(2, 2, 1)).unwrap();
        history.head_block_number = 10;

        let settled = history.settle_window();
        assert_eq!(settled.len(), 2);
        assert!(settled.iter().all(|b| b.flushed));
        assert!(history.is_empty());
        assert!(drain_events(&queue).is_empty());
    }
}
