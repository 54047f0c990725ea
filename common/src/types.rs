//! Feed-level types shared between block sources and the block history.

use crate::hash::BlockHash;
use serde::{Deserialize, Deserializer, Serialize};
use std::num::ParseIntError;

/// Block height. Wide enough for networks whose heights exceed 64 bits.
pub type BlockNumber = u128;

/// Failure to read a block number from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid block number '{value}': {source}")]
pub struct BlockNumberParseError {
    pub value: String,
    #[source]
    pub source: ParseIntError,
}

/// Parse a block number given either in decimal or as `0x`-prefixed hex.
pub fn parse_block_number(value: &str) -> Result<BlockNumber, BlockNumberParseError> {
    let trimmed = value.trim();
    let parsed = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(digits) => BlockNumber::from_str_radix(digits, 16),
        None => trimmed.parse::<BlockNumber>(),
    };
    parsed.map_err(|source| BlockNumberParseError {
        value: value.to_string(),
        source,
    })
}

/// A block header tuple as delivered by the network feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBlock {
    #[serde(deserialize_with = "deserialize_block_number")]
    pub number: BlockNumber,
    pub hash: BlockHash,
    pub parent_hash: BlockHash,
}

impl RawBlock {
    pub fn new(number: BlockNumber, hash: BlockHash, parent_hash: BlockHash) -> Self {
        Self {
            number,
            hash,
            parent_hash,
        }
    }
}

/// Heights arrive as JSON integers, decimal strings or hex quantities.
/// Heights beyond `u64` must use one of the string forms.
fn deserialize_block_number<'de, D>(deserializer: D) -> Result<BlockNumber, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(u64),
        Text(String),
    }

    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(n) => Ok(n.into()),
        NumberOrText::Text(s) => parse_block_number(&s).map_err(serde::de::Error::custom),
    }
}
