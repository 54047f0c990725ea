//! Error types for block history operations.

use meridian_common::{BlockHash, BlockNumber};

/// Errors returned by [`BlockHistory`](crate::history_tree::BlockHistory) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockHistoryError {
    /// A block hash referenced by an operation is not resident in the history.
    #[error("block not in history: {hash}")]
    BlockNotFound { hash: BlockHash },

    /// Only a window root (no resident parent) may be flushed.
    #[error("cannot flush {hash}: parent {parent_hash} is still retained")]
    ParentRetained {
        hash: BlockHash,
        parent_hash: BlockHash,
    },

    /// The block names itself as its own parent.
    #[error("block {hash} is its own parent")]
    SelfParent { hash: BlockHash },

    /// A parent/child link would not strictly increase the block number.
    #[error("invalid block number for {hash}: {got} must exceed parent number {parent}")]
    InvalidBlockNumber {
        hash: BlockHash,
        parent: BlockNumber,
        got: BlockNumber,
    },

    /// A snapshot record field could not be parsed.
    #[error("malformed snapshot field {field} '{value}': {reason}")]
    Parse {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// Configuration values outside their allowed range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
