//! Block representation within the block history.

use std::fmt;

use meridian_common::{BlockHash, BlockNumber, RawBlock};

use crate::history_tree::BlockHistory;

/// A block header tracked by the history, with its derived depth state.
///
/// Nodes hold no links to other nodes; children are looked up through the
/// owning [`BlockHistory`], which is passed in wherever it is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockNode {
    /// Block height.
    pub number: BlockNumber,
    /// Identity key.
    pub hash: BlockHash,
    pub parent_hash: BlockHash,
    /// Length of the longest descendant chain rooted here.
    pub children_depth: u64,
    /// Set once, when `children_depth` first reaches the confirmation threshold.
    pub confirmed: bool,
    /// Set once, when the block is evicted from the window.
    pub flushed: bool,
}

impl BlockNode {
    pub fn new(raw: &RawBlock, children_depth: u64) -> Self {
        Self {
            number: raw.number,
            hash: raw.hash,
            parent_hash: raw.parent_hash,
            children_depth,
            confirmed: false,
            flushed: false,
        }
    }

    /// The feed tuple this node was built from.
    pub fn raw(&self) -> RawBlock {
        RawBlock::new(self.number, self.hash, self.parent_hash)
    }

    /// Distance from the given head. Blocks above the head have depth 0.
    pub fn depth(&self, head_block_number: BlockNumber) -> BlockNumber {
        head_block_number.saturating_sub(self.number)
    }

    /// Longest descendant chain over the children resident in `history` now.
    pub fn computed_children_depth(&self, history: &BlockHistory) -> u64 {
        history.children(&self.hash).map(|child| 1 + child.children_depth).max().unwrap_or(0)
    }

    pub fn is_confirmable(&self, num_confirmations: u64) -> bool {
        self.children_depth >= num_confirmations
    }
}

impl fmt::Display for BlockNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Number: {}\tHash: {}\tChildren Depth: {}",
            self.number,
            self.hash.short(),
            self.children_depth
        )
    }
}
