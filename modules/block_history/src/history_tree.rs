//! Fork-aware history of recent block headers.
//!
//! Tracks every block it is told about, keeps the longest descendant chain
//! length of each one up to date, confirms blocks whose descendant chain
//! reaches `num_confirmations` and flushes window roots once they sit
//! `stream_size` blocks below the head.

use std::collections::HashMap;

use meridian_common::{BlockHash, BlockNumber, RawBlock};
use tracing::{debug, info, warn};

use crate::block_node::BlockNode;
use crate::configuration::HistoryConfig;
use crate::history_error::BlockHistoryError;
use crate::history_observer::BlockHistoryObserver;

/// The set of retained blocks and the thresholds applied to them.
///
/// Operations are single-threaded and run to completion; see
/// [`service`](crate::service) for sharing a history between tasks.
pub struct BlockHistory {
    /// All resident blocks keyed by hash.
    pub(crate) blocks: HashMap<BlockHash, BlockNode>,
    /// Child hashes keyed by parent hash, in arrival order. The parent need
    /// not be resident.
    pub(crate) blocks_by_parent: HashMap<BlockHash, Vec<BlockHash>>,
    /// Highest block number ingested or announced.
    pub(crate) head_block_number: BlockNumber,
    pub(crate) config: HistoryConfig,
    pub(crate) observer: Box<dyn BlockHistoryObserver + Send>,
}

impl BlockHistory {
    /// Create an empty history.
    ///
    /// Fails if `num_confirmations` is zero.
    pub fn new(
        config: HistoryConfig,
        observer: Box<dyn BlockHistoryObserver + Send>,
    ) -> Result<Self, BlockHistoryError> {
        config.validate()?;
        Ok(Self {
            blocks: HashMap::new(),
            blocks_by_parent: HashMap::new(),
            head_block_number: 0,
            config,
            observer,
        })
    }

    pub fn head_block_number(&self) -> BlockNumber {
        self.head_block_number
    }

    pub fn num_confirmations(&self) -> u64 {
        self.config.num_confirmations
    }

    pub fn stream_size(&self) -> u64 {
        self.config.stream_size
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Returns the number of resident blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get_block(&self, hash: &BlockHash) -> Option<&BlockNode> {
        self.blocks.get(hash)
    }

    /// Like [`get_block`](Self::get_block), but a missing block is an error.
    pub fn block(&self, hash: &BlockHash) -> Result<&BlockNode, BlockHistoryError> {
        self.blocks.get(hash).ok_or(BlockHistoryError::BlockNotFound { hash: *hash })
    }

    /// `head_block_number - number` for the given block.
    pub fn depth(&self, hash: &BlockHash) -> Result<BlockNumber, BlockHistoryError> {
        Ok(self.block(hash)?.depth(self.head_block_number))
    }

    /// How far the head must still advance before the block may be flushed.
    pub fn blocks_until_flush(&self, hash: &BlockHash) -> Result<BlockNumber, BlockHistoryError> {
        let depth = self.depth(hash)?;
        Ok(BlockNumber::from(self.config.stream_size).saturating_sub(depth))
    }

    /// Resident children of `hash`, in arrival order.
    pub fn children<'a>(&'a self, hash: &BlockHash) -> impl Iterator<Item = &'a BlockNode> + 'a {
        self.blocks_by_parent
            .get(hash)
            .into_iter()
            .flatten()
            .filter_map(|child| self.blocks.get(child))
    }

    /// The block's parent, if it is resident.
    pub fn parent(&self, block: &BlockNode) -> Option<&BlockNode> {
        self.blocks.get(&block.parent_hash)
    }

    /// Blocks without a resident parent, ordered by number then hash.
    ///
    /// These are the current window roots: the oldest retained blocks and
    /// any fork roots whose parent never arrived.
    pub fn roots(&self) -> Vec<&BlockNode> {
        let mut roots: Vec<&BlockNode> =
            self.blocks.values().filter(|b| self.parent(b).is_none()).collect();
        roots.sort_by_key(|b| (b.number, b.hash));
        roots
    }

    /// Add a block from the feed.
    ///
    /// Re-delivering a known hash is a no-op that returns the stored block.
    /// Otherwise the block is linked to any resident parent and children,
    /// the head advances, descendant depths are propagated to ancestors, and
    /// confirm/flush callbacks fire for every threshold crossed as a result.
    ///
    /// The returned node reflects the block's state after all of that,
    /// including `flushed` if it was evicted straight away.
    pub fn ingest(&mut self, raw: RawBlock) -> Result<BlockNode, BlockHistoryError> {
        if let Some(existing) = self.blocks.get(&raw.hash) {
            if existing.raw() != raw {
                warn!(
                    hash = %raw.hash,
                    number = %raw.number,
                    "Re-delivered block disagrees with the stored one, keeping the original"
                );
            }
            return Ok(existing.clone());
        }

        self.check_links(&raw)?;

        let mut block = BlockNode::new(&raw, 0);
        block.children_depth = block.computed_children_depth(self);
        debug!(block = %block, "Ingesting block");
        self.insert_node(block);

        self.raise_head(raw.number);
        self.propagate_from(raw.hash);

        let latest = self.blocks.get(&raw.hash).cloned();
        if self.config.prune_forks_on_confirm {
            self.prune_forks();
        }
        let flushed = self.flush_window();

        if let Some(current) = self.blocks.get(&raw.hash) {
            return Ok(current.clone());
        }
        if let Some(evicted) = flushed.into_iter().find(|b| b.hash == raw.hash) {
            return Ok(evicted);
        }
        // Pruned as part of a losing fork
        latest.ok_or(BlockHistoryError::BlockNotFound { hash: raw.hash })
    }

    /// Raise the head from an external announcement and flush whatever
    /// falls out of the window. Returns the flushed hashes in flush order.
    pub fn advance_head(&mut self, number: BlockNumber) -> Vec<BlockHash> {
        if !self.raise_head(number) {
            return Vec::new();
        }
        self.flush_window().into_iter().map(|b| b.hash).collect()
    }

    /// Mark a block confirmed and notify the observer.
    ///
    /// Returns `Ok(false)` without notifying if it was already confirmed.
    pub fn confirm_block(&mut self, hash: BlockHash) -> Result<bool, BlockHistoryError> {
        let block =
            self.blocks.get_mut(&hash).ok_or(BlockHistoryError::BlockNotFound { hash })?;
        if block.confirmed {
            return Ok(false);
        }
        block.confirmed = true;
        let number = block.number;
        info!(number = %number, hash = %hash, "Block confirmed");
        self.observer.block_confirmed(number, hash);
        Ok(true)
    }

    /// Flush a window root regardless of its depth, then flush any of its
    /// children that are now flushable roots themselves.
    ///
    /// Fails if the block is unknown or its parent is still resident.
    pub fn flush_block(&mut self, hash: BlockHash) -> Result<BlockNode, BlockHistoryError> {
        let block = self.block(&hash)?;
        if self.parent(block).is_some() {
            return Err(BlockHistoryError::ParentRetained {
                hash,
                parent_hash: block.parent_hash,
            });
        }

        let flushed = self.evict_root(hash, true).ok_or(BlockHistoryError::BlockNotFound { hash })?;
        self.flush_window();
        Ok(flushed)
    }

    /// Drop losing forks.
    ///
    /// For every block whose children depth has reached the confirmation
    /// threshold, each shallower sibling branch (another child of the same
    /// parent hash) that is not itself confirmed is removed along with all of
    /// its descendants. A block confirmed through `confirm_block` below the
    /// threshold never wins a fork. The parent keeps its deepest child, so
    /// its children depth is unchanged. Removed blocks are reported through
    /// `fork_pruned`, never `block_flushed`. Returns the removed hashes.
    pub fn prune_forks(&mut self) -> Vec<BlockHash> {
        let num_confirmations = self.num_confirmations();
        let mut losers: Vec<(BlockNumber, BlockHash)> = Vec::new();
        for winner in self.blocks.values().filter(|b| b.is_confirmable(num_confirmations)) {
            losers.extend(
                self.children(&winner.parent_hash)
                    .filter(|sibling| {
                        !sibling.confirmed && sibling.children_depth < winner.children_depth
                    })
                    .map(|sibling| (sibling.number, sibling.hash)),
            );
        }
        losers.sort();
        losers.dedup();

        let mut pruned = Vec::new();
        for (_, hash) in losers {
            pruned.extend(self.remove_subtree(hash));
        }
        if !pruned.is_empty() {
            info!(count = pruned.len(), "Pruned losing forks");
        }
        pruned
    }

    /// Reject links that would break the parent/child number ordering, which
    /// also keeps the parent graph acyclic.
    pub(crate) fn check_links(&self, raw: &RawBlock) -> Result<(), BlockHistoryError> {
        if raw.hash == raw.parent_hash {
            return Err(BlockHistoryError::SelfParent { hash: raw.hash });
        }

        if let Some(parent) = self.blocks.get(&raw.parent_hash) {
            if parent.number >= raw.number {
                return Err(BlockHistoryError::InvalidBlockNumber {
                    hash: raw.hash,
                    parent: parent.number,
                    got: raw.number,
                });
            }
        }

        if let Some(child) = self.children(&raw.hash).find(|c| c.number <= raw.number) {
            return Err(BlockHistoryError::InvalidBlockNumber {
                hash: child.hash,
                parent: raw.number,
                got: child.number,
            });
        }

        Ok(())
    }

    /// Register a node in both indexes.
    pub(crate) fn insert_node(&mut self, block: BlockNode) {
        self.blocks_by_parent.entry(block.parent_hash).or_default().push(block.hash);
        self.blocks.insert(block.hash, block);
    }

    /// Drop a node from both indexes. Its own children stay indexed under
    /// its hash and become window roots.
    pub(crate) fn unlink_block(&mut self, hash: BlockHash) -> Option<BlockNode> {
        let block = self.blocks.remove(&hash)?;
        if let Some(siblings) = self.blocks_by_parent.get_mut(&block.parent_hash) {
            siblings.retain(|h| *h != hash);
            if siblings.is_empty() {
                self.blocks_by_parent.remove(&block.parent_hash);
            }
        }
        Some(block)
    }

    /// Returns true if the head moved.
    pub(crate) fn raise_head(&mut self, number: BlockNumber) -> bool {
        if number > self.head_block_number {
            self.head_block_number = number;
            true
        } else {
            false
        }
    }

    /// Remove a block and every descendant, root first.
    fn remove_subtree(&mut self, hash: BlockHash) -> Vec<BlockHash> {
        let mut removed = Vec::new();
        let mut stack = vec![hash];
        while let Some(h) = stack.pop() {
            stack.extend(self.children(&h).map(|c| c.hash));
            if let Some(block) = self.unlink_block(h) {
                debug!(block = %block, "Pruning fork block");
                self.observer.fork_pruned(block.number, block.hash);
                removed.push(block.hash);
            }
        }
        removed
    }
}
