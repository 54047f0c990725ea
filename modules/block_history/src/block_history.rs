//! Meridian block history module
//! Tracks a fork-aware tree of recent block headers, confirming blocks once
//! enough descendants build on them and flushing blocks that fall out of the
//! retained trailing window.

pub mod block_node;
pub mod configuration;
pub mod history_error;
pub mod history_observer;
pub mod history_tree;
mod propagation;
pub mod service;
pub mod snapshot;

pub use block_node::BlockNode;
pub use configuration::HistoryConfig;
pub use history_error::BlockHistoryError;
pub use history_observer::{
    drain_events, BlockHistoryObserver, EventQueue, HistoryEvent, NoOpObserver, QueueObserver,
};
pub use history_tree::BlockHistory;
pub use service::{HistoryCommand, HistoryHandle};
pub use snapshot::{ChildrenDepth, FileSnapshotStore, SnapshotRecord, SnapshotStore};
