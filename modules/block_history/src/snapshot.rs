//! Snapshot records for persisting and restoring a block history.
//!
//! A snapshot is the ordered list of retained blocks with their settled
//! children depth. Restoring one trusts those depths: nothing is propagated
//! and no observer callbacks fire for state reached before the snapshot.

use std::{
    fs::File,
    io::{BufReader, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use meridian_common::{parse_block_number, BlockHash, RawBlock};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::block_node::BlockNode;
use crate::configuration::HistoryConfig;
use crate::history_error::BlockHistoryError;
use crate::history_observer::BlockHistoryObserver;
use crate::history_tree::BlockHistory;

/// Persisted form of one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    /// Decimal block number.
    pub number: String,
    pub hash: String,
    pub parent_hash: String,
    pub children_depth: ChildrenDepth,
}

/// Stored children depth. Written as an integer; older snapshots stored it
/// as a decimal string, which is only checked when the record is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChildrenDepth {
    Count(u64),
    Text(String),
}

impl From<u64> for ChildrenDepth {
    fn from(depth: u64) -> Self {
        Self::Count(depth)
    }
}

impl From<&BlockNode> for SnapshotRecord {
    fn from(block: &BlockNode) -> Self {
        Self {
            number: block.number.to_string(),
            hash: block.hash.to_string(),
            parent_hash: block.parent_hash.to_string(),
            children_depth: block.children_depth.into(),
        }
    }
}

impl BlockNode {
    pub fn to_snapshot(&self) -> SnapshotRecord {
        SnapshotRecord::from(self)
    }
}

impl SnapshotRecord {
    /// Decode the identifying fields back into a feed tuple.
    pub fn to_raw(&self) -> Result<RawBlock, BlockHistoryError> {
        let number = parse_block_number(&self.number).map_err(|e| BlockHistoryError::Parse {
            field: "number",
            value: self.number.clone(),
            reason: e.source.to_string(),
        })?;
        Ok(RawBlock::new(
            number,
            parse_hash("hash", &self.hash)?,
            parse_hash("parentHash", &self.parent_hash)?,
        ))
    }

    /// Decode the stored children depth.
    pub fn children_depth(&self) -> Result<u64, BlockHistoryError> {
        match &self.children_depth {
            ChildrenDepth::Count(depth) => Ok(*depth),
            ChildrenDepth::Text(text) => text.parse().map_err(|e: std::num::ParseIntError| {
                BlockHistoryError::Parse {
                    field: "childrenDepth",
                    value: text.clone(),
                    reason: e.to_string(),
                }
            }),
        }
    }
}

fn parse_hash(field: &'static str, value: &str) -> Result<BlockHash, BlockHistoryError> {
    value.parse::<BlockHash>().map_err(|e| BlockHistoryError::Parse {
        field,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

impl BlockHistory {
    /// Load one snapshot record.
    ///
    /// The persisted children depth is taken as settled, so no propagation
    /// runs. Confirmation status is derived from the threshold without
    /// notifying the observer. An already resident hash is left untouched.
    pub fn from_snapshot(
        &mut self,
        record: &SnapshotRecord,
    ) -> Result<BlockNode, BlockHistoryError> {
        let raw = record.to_raw()?;
        let children_depth = record.children_depth()?;
        if let Some(existing) = self.blocks.get(&raw.hash) {
            return Ok(existing.clone());
        }
        self.check_links(&raw)?;

        let mut block = BlockNode::new(&raw, children_depth);
        block.confirmed = block.is_confirmable(self.config.num_confirmations);
        self.insert_node(block.clone());
        self.raise_head(raw.number);
        Ok(block)
    }

    /// All resident blocks, ordered by number then hash so parents precede
    /// their children.
    pub fn snapshot(&self) -> Vec<SnapshotRecord> {
        let mut blocks: Vec<&BlockNode> = self.blocks.values().collect();
        blocks.sort_by_key(|b| (b.number, b.hash));
        blocks.into_iter().map(SnapshotRecord::from).collect()
    }

    /// Build a history from snapshot records.
    ///
    /// The first malformed record aborts the whole restore with a
    /// [`BlockHistoryError::Parse`], including a `childrenDepth` that is not a
    /// non-negative integer. Once loaded, any
    /// root already past the window is dropped silently, as its flush belongs
    /// to the run that wrote the snapshot.
    pub fn restore(
        config: HistoryConfig,
        observer: Box<dyn BlockHistoryObserver + Send>,
        records: &[SnapshotRecord],
    ) -> Result<Self, BlockHistoryError> {
        let mut history = Self::new(config, observer)?;
        for record in records {
            history.from_snapshot(record)?;
        }
        let settled = history.settle_window();
        info!(
            blocks = history.len(),
            dropped = settled.len(),
            head = %history.head_block_number,
            "Restored block history from snapshot"
        );
        Ok(history)
    }

    pub fn save_to<S: SnapshotStore>(&self, store: &mut S) -> Result<()> {
        store.save(&self.snapshot())
    }

    pub fn load_from<S: SnapshotStore>(
        config: HistoryConfig,
        observer: Box<dyn BlockHistoryObserver + Send>,
        store: &mut S,
    ) -> Result<Self> {
        let records = store.load()?;
        Ok(Self::restore(config, observer, &records)?)
    }
}

/// Somewhere to keep the latest snapshot.
pub trait SnapshotStore {
    /// The stored records, or none if nothing has been saved yet.
    fn load(&mut self) -> Result<Vec<SnapshotRecord>>;
    fn save(&mut self, records: &[SnapshotRecord]) -> Result<()>;
}

/// Keeps the snapshot as a single JSON file.
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&mut self) -> Result<Vec<SnapshotRecord>> {
        if !self.path.try_exists()? {
            return Ok(vec![]);
        }

        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).with_context(|| {
            format!("Error reading block history snapshot from {}", self.path.display())
        })
    }

    fn save(&mut self, records: &[SnapshotRecord]) -> Result<()> {
        let mut file = File::create(&self.path).context("could not write snapshot")?;
        file.write_all(&serde_json::to_vec_pretty(records)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history_observer::{drain_events, HistoryEvent, QueueObserver};
    use crate::history_tree::tests::{hash, make_history, raw};

    fn record(number: &str, h: u8, parent: u8, children_depth: u64) -> SnapshotRecord {
        SnapshotRecord {
            number: number.to_string(),
            hash: hash(h).to_string(),
            parent_hash: hash(parent).to_string(),
            children_depth: children_depth.into(),
        }
    }

    #[test]
    fn test_to_snapshot_writes_decimal_number_and_hex_hashes() {
        let mut block = BlockNode::new(&raw(2, 7, 1), 4);
        block.number = u128::from(u64::MAX) + 1;
        let json = serde_json::to_value(block.to_snapshot()).unwrap();

        assert_eq!(json["number"], "18446744073709551616");
        assert_eq!(json["hash"], hash(2).to_string());
        assert_eq!(json["parentHash"], hash(1).to_string());
        assert_eq!(json["childrenDepth"], 4);
    }

    #[test]
    fn test_children_depth_accepts_string_form() {
        let json = format!(
            r#"{{"number":"5","hash":"{}","parentHash":"{}","childrenDepth":"3"}}"#,
            hash(5),
            hash(4)
        );
        let parsed: SnapshotRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.children_depth().unwrap(), 3);
        assert_eq!(parsed.to_raw().unwrap(), raw(5, 5, 4));

        let (mut history, _) = make_history(HistoryConfig::new(3, 100));
        assert_eq!(history.from_snapshot(&parsed).unwrap().to_snapshot(), record("5", 5, 4, 3));
    }

    #[test]
    fn test_non_integer_children_depth_fails_with_parse_error() {
        let json = format!(
            r#"[{{"number":"5","hash":"{}","parentHash":"{}","childrenDepth":"three"}}]"#,
            hash(5),
            hash(4)
        );
        let records: Vec<SnapshotRecord> = serde_json::from_str(&json).unwrap();

        let result = BlockHistory::restore(
            HistoryConfig::new(3, 100),
            Box::new(QueueObserver::new()),
            &records,
        );
        assert!(matches!(
            result,
            Err(BlockHistoryError::Parse { field: "childrenDepth", ref value, .. }) if value == "three"
        ));
    }

    #[test]
    fn test_from_snapshot_round_trips_node_fields() {
        let (mut history, queue) = make_history(HistoryConfig::new(3, 100));
        let restored = history.from_snapshot(&record("12", 9, 8, 5)).unwrap();

        assert_eq!(restored.number, 12);
        assert_eq!(restored.hash, hash(9));
        assert_eq!(restored.parent_hash, hash(8));
        assert_eq!(restored.children_depth, 5);
        assert!(restored.confirmed);
        assert_eq!(restored.to_snapshot(), record("12", 9, 8, 5));
        assert_eq!(history.head_block_number(), 12);
        assert!(drain_events(&queue).is_empty());
    }

    #[test]
    fn test_malformed_fields_fail_with_parse_error() {
        let (mut history, _) = make_history(HistoryConfig::new(3, 100));

        let err = history.from_snapshot(&record("12x", 1, 0, 0)).unwrap_err();
        assert!(matches!(err, BlockHistoryError::Parse { field: "number", .. }));

        let mut bad_hash = record("12", 1, 0, 0);
        bad_hash.parent_hash = "0xnothex".to_string();
        let err = history.from_snapshot(&bad_hash).unwrap_err();
        assert!(matches!(err, BlockHistoryError::Parse { field: "parentHash", .. }));
        assert!(history.is_empty());
    }

    #[test]
    fn test_restore_aborts_on_first_bad_record() {
        let records = vec![record("1", 1, 0, 1), record("two", 2, 1, 0)];
        let result = BlockHistory::restore(
            HistoryConfig::new(3, 100),
            Box::new(QueueObserver::new()),
            &records,
        );
        assert!(matches!(result, Err(BlockHistoryError::Parse { .. })));
    }

    #[test]
    fn test_restore_rebuilds_indexes_without_callbacks() {
        let (mut original, _) = make_history(HistoryConfig::new(2, 100));
        for k in 1..=4u8 {
            original.ingest(raw(k, k as u128, k - 1)).unwrap();
        }
        original.ingest(raw(9, 3, 2)).unwrap();
        let records = original.snapshot();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0], record("1", 1, 0, 3));

        let observer = QueueObserver::new();
        let queue = observer.queue();
        let mut restored =
            BlockHistory::restore(HistoryConfig::new(2, 100), Box::new(observer), &records).unwrap();

        assert_eq!(restored.snapshot(), records);
        assert_eq!(restored.head_block_number(), 4);
        assert_eq!(restored.children(&hash(2)).count(), 2);
        assert!(restored.get_block(&hash(2)).unwrap().confirmed);
        assert!(!restored.get_block(&hash(3)).unwrap().confirmed);
        assert!(drain_events(&queue).is_empty());

        // Propagation carries on from the restored depths
        restored.ingest(raw(5, 5, 4)).unwrap();
        assert_eq!(
            drain_events(&queue),
            vec![HistoryEvent::Confirmed { number: 3, hash: hash(3) }]
        );
        assert_eq!(restored.get_block(&hash(1)).unwrap().children_depth, 4);
    }

    #[test]
    fn test_restore_drops_roots_outside_window_silently() {
        let records = vec![
            record("1", 1, 0, 0),
            record("10", 10, 9, 1),
            record("11", 11, 10, 0),
        ];
        let observer = QueueObserver::new();
        let queue = observer.queue();
        let restored =
            BlockHistory::restore(HistoryConfig::new(3, 5), Box::new(observer), &records).unwrap();

        assert!(restored.get_block(&hash(1)).is_none());
        assert_eq!(restored.len(), 2);
        assert!(drain_events(&queue).is_empty());
    }
}
