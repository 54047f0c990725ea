//! Single-owner task for sharing a block history between async callers.
//!
//! The history itself is not shared: one task owns it and applies commands
//! in the order they arrive, so every ingest finishes its propagation before
//! the next command is looked at.

use anyhow::{anyhow, Context, Result};
use meridian_common::{BlockHash, BlockNumber, RawBlock};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::block_node::BlockNode;
use crate::history_error::BlockHistoryError;
use crate::history_tree::BlockHistory;
use crate::snapshot::SnapshotRecord;

const DEFAULT_COMMAND_CAPACITY: usize = 256;

/// Requests handled by the owning task.
pub enum HistoryCommand {
    Ingest {
        block: RawBlock,
        reply: oneshot::Sender<Result<BlockNode, BlockHistoryError>>,
    },
    AdvanceHead {
        number: BlockNumber,
        reply: oneshot::Sender<Vec<BlockHash>>,
    },
    PruneForks {
        reply: oneshot::Sender<Vec<BlockHash>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<SnapshotRecord>>,
    },
}

/// Cloneable sender side of the history task.
#[derive(Clone)]
pub struct HistoryHandle {
    commands: mpsc::Sender<HistoryCommand>,
}

/// Move `history` into its own task. The task hands the history back
/// through the join handle once every [`HistoryHandle`] has been dropped.
pub fn spawn(history: BlockHistory, capacity: usize) -> (HistoryHandle, JoinHandle<BlockHistory>) {
    let (commands, receiver) = mpsc::channel(capacity);
    let task = tokio::spawn(run(history, receiver));
    (HistoryHandle { commands }, task)
}

/// [`spawn`] with the default command queue depth.
pub fn spawn_default(history: BlockHistory) -> (HistoryHandle, JoinHandle<BlockHistory>) {
    spawn(history, DEFAULT_COMMAND_CAPACITY)
}

async fn run(
    mut history: BlockHistory,
    mut commands: mpsc::Receiver<HistoryCommand>,
) -> BlockHistory {
    while let Some(command) = commands.recv().await {
        let delivered = match command {
            HistoryCommand::Ingest { block, reply } => reply.send(history.ingest(block)).is_ok(),
            HistoryCommand::AdvanceHead { number, reply } => {
                reply.send(history.advance_head(number)).is_ok()
            }
            HistoryCommand::PruneForks { reply } => reply.send(history.prune_forks()).is_ok(),
            HistoryCommand::Snapshot { reply } => reply.send(history.snapshot()).is_ok(),
        };
        if !delivered {
            debug!("History caller went away before the reply");
        }
    }

    info!(blocks = history.len(), "All history handles dropped, stopping");
    history
}

impl HistoryHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> HistoryCommand,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| anyhow!("block history task has stopped"))?;
        response.await.context("block history task dropped the request")
    }

    pub async fn ingest(&self, block: RawBlock) -> Result<BlockNode> {
        let result = self.request(|reply| HistoryCommand::Ingest { block, reply }).await?;
        Ok(result?)
    }

    pub async fn advance_head(&self, number: BlockNumber) -> Result<Vec<BlockHash>> {
        self.request(|reply| HistoryCommand::AdvanceHead { number, reply }).await
    }

    pub async fn prune_forks(&self) -> Result<Vec<BlockHash>> {
        self.request(|reply| HistoryCommand::PruneForks { reply }).await
    }

    pub async fn snapshot(&self) -> Result<Vec<SnapshotRecord>> {
        self.request(|reply| HistoryCommand::Snapshot { reply }).await
    }
}
