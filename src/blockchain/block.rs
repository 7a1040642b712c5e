use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use super::constants::{
    GENESIS_DIFFICULTY, GENESIS_HASH, GENESIS_LAST_HASH, GENESIS_NONCE, GENESIS_TIMESTAMP,
    MINE_RATE, MINIMUM_DIFFICULTY, TIMESTAMP_REFRESH_INTERVAL,
};
use super::transaction::Transaction;

/// Errors that can occur while mining or validating a block
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("The block last_hash is not correct")]
    LastHashMismatch,

    #[error("The proof of work requirement of {difficulty} leading zero bits is not met")]
    ProofOfWork { difficulty: u32 },

    #[error("Block difficulty must only adjust by 1: {previous} -> {current}")]
    DifficultyJump { previous: u32, current: u32 },

    #[error("Block hash must be correct")]
    HashMismatch,

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Time the block was mined, in nanoseconds since the epoch
    pub timestamp: i64,

    /// Hash of the previous block
    pub last_hash: String,

    /// Hash of this block
    pub hash: String,

    /// Transactions included in this block
    pub data: Vec<Transaction>,

    /// Number of leading zero bits required of the hash
    pub difficulty: u32,

    /// Proof of work
    pub nonce: u64,
}

impl Block {
    /// The first block of every chain
    pub fn genesis() -> Self {
        Block {
            timestamp: GENESIS_TIMESTAMP,
            last_hash: GENESIS_LAST_HASH.to_string(),
            hash: GENESIS_HASH.to_string(),
            data: Vec::new(),
            difficulty: GENESIS_DIFFICULTY,
            nonce: GENESIS_NONCE,
        }
    }

    /// Mines a block on top of `last_block`
    ///
    /// The nonce is incremented until the hash has enough leading zero bits.
    /// Every `TIMESTAMP_REFRESH_INTERVAL` attempts the timestamp is refreshed
    /// and the difficulty re-adjusted against it, so a slow search relaxes the
    /// target it is working towards.
    pub fn mine_block(last_block: &Block, data: Vec<Transaction>) -> Result<Self, BlockError> {
        let data_json = serialize_data(&data)?;
        let last_hash = last_block.hash.clone();

        let mut nonce: u64 = 0;
        let mut timestamp = now_nanos();
        let mut difficulty = Self::adjust_difficulty(last_block, timestamp);

        loop {
            let hash = hash_fields(timestamp, &last_hash, &data_json, nonce, difficulty);

            if meets_difficulty(&hash, difficulty) {
                return Ok(Block {
                    timestamp,
                    last_hash,
                    hash,
                    data,
                    difficulty,
                    nonce,
                });
            }

            nonce += 1;
            if nonce % TIMESTAMP_REFRESH_INTERVAL == 0 {
                timestamp = now_nanos();
                difficulty = Self::adjust_difficulty(last_block, timestamp);
            }
        }
    }

    /// Difficulty for a block mined at `timestamp` after `last_block`
    ///
    /// Raised by one when the block came faster than `MINE_RATE`, lowered by
    /// one otherwise, never below `MINIMUM_DIFFICULTY`.
    pub fn adjust_difficulty(last_block: &Block, timestamp: i64) -> u32 {
        if timestamp.saturating_sub(last_block.timestamp) < MINE_RATE {
            return last_block.difficulty.saturating_add(1);
        }

        last_block
            .difficulty
            .saturating_sub(1)
            .max(MINIMUM_DIFFICULTY)
    }

    /// Calculates the hash of the block from its fields
    pub fn calculate_hash(&self) -> Result<String, BlockError> {
        let data_json = serialize_data(&self.data)?;
        Ok(hash_fields(
            self.timestamp,
            &self.last_hash,
            &data_json,
            self.nonce,
            self.difficulty,
        ))
    }

    /// Validates `block` as the successor of `last_block`
    pub fn is_valid_block(last_block: &Block, block: &Block) -> Result<(), BlockError> {
        if block.last_hash != last_block.hash {
            return Err(BlockError::LastHashMismatch);
        }

        if block.difficulty < MINIMUM_DIFFICULTY || !meets_difficulty(&block.hash, block.difficulty) {
            return Err(BlockError::ProofOfWork {
                difficulty: block.difficulty,
            });
        }

        if last_block.difficulty.abs_diff(block.difficulty) > 1 {
            return Err(BlockError::DifficultyJump {
                previous: last_block.difficulty,
                current: block.difficulty,
            });
        }

        if block.hash != block.calculate_hash()? {
            return Err(BlockError::HashMismatch);
        }

        Ok(())
    }
}

/// Current time in nanoseconds since the epoch
pub fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Number of leading zero bits of a hex encoded hash
pub fn leading_zero_bits(hash: &str) -> u32 {
    let mut bits = 0;

    for c in hash.chars() {
        match c.to_digit(16) {
            Some(0) => bits += 4,
            Some(nibble) => return bits + nibble.leading_zeros() - 28,
            None => return bits,
        }
    }

    bits
}

/// Checks if a hex encoded hash satisfies a difficulty
pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    leading_zero_bits(hash) >= difficulty
}

fn serialize_data(data: &[Transaction]) -> Result<String, BlockError> {
    serde_json::to_string(data).map_err(|e| BlockError::SerializationError(e.to_string()))
}

fn hash_fields(timestamp: i64, last_hash: &str, data_json: &str, nonce: u64, difficulty: u32) -> String {
    let mut hasher = Sha256::new();

    hasher.update(timestamp.to_be_bytes());
    hasher.update((last_hash.len() as u64).to_be_bytes());
    hasher.update(last_hash.as_bytes());
    hasher.update((data_json.len() as u64).to_be_bytes());
    hasher.update(data_json.as_bytes());
    hasher.update(nonce.to_be_bytes());
    hasher.update(difficulty.to_be_bytes());

    hex::encode(hasher.finalize())
}
