//! Observer trait for block history events.

use std::sync::{Arc, Mutex, PoisonError};

use meridian_common::{BlockHash, BlockNumber};

/// Callback receiver for threshold crossings in the block history.
///
/// Calls are made synchronously from inside `ingest`, `advance_head` and
/// `flush_block`, at most once per block for each event.
pub trait BlockHistoryObserver {
    /// The block's longest descendant chain reached the confirmation threshold.
    fn block_confirmed(&self, number: BlockNumber, hash: BlockHash);

    /// The block left the retained window and has been evicted.
    fn block_flushed(&self, number: BlockNumber, hash: BlockHash);

    /// The block was dropped as part of a losing fork.
    fn fork_pruned(&self, _number: BlockNumber, _hash: BlockHash) {}
}

/// Events recorded by [`QueueObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryEvent {
    Confirmed { number: BlockNumber, hash: BlockHash },
    Flushed { number: BlockNumber, hash: BlockHash },
    Pruned { number: BlockNumber, hash: BlockHash },
}

/// Shared event queue between the observer and whoever drains it.
pub type EventQueue = Arc<Mutex<Vec<HistoryEvent>>>;

/// Observer that queues events so a host can publish them later.
#[derive(Clone, Default)]
pub struct QueueObserver {
    events: EventQueue,
}

impl QueueObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle onto the queue, for draining after the observer has been
    /// moved into the history.
    pub fn queue(&self) -> EventQueue {
        self.events.clone()
    }

    fn push(&self, event: HistoryEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}

/// Take every queued event, leaving the queue empty.
pub fn drain_events(queue: &EventQueue) -> Vec<HistoryEvent> {
    std::mem::take(&mut *queue.lock().unwrap_or_else(PoisonError::into_inner))
}

impl BlockHistoryObserver for QueueObserver {
    fn block_confirmed(&self, number: BlockNumber, hash: BlockHash) {
        self.push(HistoryEvent::Confirmed { number, hash });
    }

    fn block_flushed(&self, number: BlockNumber, hash: BlockHash) {
        self.push(HistoryEvent::Flushed { number, hash });
    }

    fn fork_pruned(&self, number: BlockNumber, hash: BlockHash) {
        self.push(HistoryEvent::Pruned { number, hash });
    }
}

/// Observer for restores and tests that do not care about events.
pub struct NoOpObserver;

impl BlockHistoryObserver for NoOpObserver {
    fn block_confirmed(&self, _: BlockNumber, _: BlockHash) {}
    fn block_flushed(&self, _: BlockNumber, _: BlockHash) {}
}
