use std::path::Path;

use log::debug;
use sled::{Batch, Db, Tree};
use thiserror::Error;

use super::block::Block;

const CHAIN_LENGTH_KEY: &str = "chain_length";

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

/// Persistent storage for the chain
///
/// Blocks are keyed by their big-endian height so iteration yields them in
/// chain order.
pub struct ChainStorage {
    /// The database instance
    db: Db,

    /// Tree for blocks
    blocks: Tree,

    /// Tree for metadata
    metadata: Tree,
}

impl std::fmt::Debug for ChainStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainStorage")
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

impl ChainStorage {
    /// Opens (or creates) the storage at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::open(sled::open(path)?)
    }

    /// Storage that is deleted when dropped
    #[cfg(test)]
    pub fn temporary() -> Result<Self, StorageError> {
        Self::open(sled::Config::new().temporary(true).open()?)
    }

    fn open(db: Db) -> Result<Self, StorageError> {
        let blocks = db.open_tree("blocks")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            blocks,
            metadata,
        })
    }

    /// Stores `chain` in place of whatever was stored before
    pub fn save_chain(&self, chain: &[Block]) -> Result<(), StorageError> {
        let mut batch = Batch::default();

        for key in self.blocks.iter().keys() {
            batch.remove(key?);
        }

        for (height, block) in chain.iter().enumerate() {
            batch.insert(height_key(height).to_vec(), encode_block(block)?);
        }

        self.blocks.apply_batch(batch)?;
        self.save_length(chain.len())?;
        self.flush()?;

        debug!("Saved chain of {} blocks to storage", chain.len());
        Ok(())
    }

    /// Stores a block at `height`, extending the stored chain
    pub fn append_block(&self, height: usize, block: &Block) -> Result<(), StorageError> {
        self.blocks
            .insert(height_key(height).to_vec(), encode_block(block)?)?;
        self.save_length(height + 1)?;
        self.flush()
    }

    /// Loads the stored chain in height order
    pub fn load_chain(&self) -> Result<Vec<Block>, StorageError> {
        self.blocks
            .iter()
            .values()
            .map(|value| {
                let value = value?;
                bincode::deserialize::<Block>(&value)
                    .map_err(|e| StorageError::DeserializationError(e.to_string()))
            })
            .collect()
    }

    /// Gets the stored chain length
    pub fn chain_length(&self) -> Result<usize, StorageError> {
        match self.metadata.get(CHAIN_LENGTH_KEY)? {
            Some(value) => {
                let length: u64 = bincode::deserialize(&value)
                    .map_err(|e| StorageError::DeserializationError(e.to_string()))?;
                Ok(length as usize)
            }
            None => Ok(0),
        }
    }

    fn save_length(&self, length: usize) -> Result<(), StorageError> {
        let value = bincode::serialize(&(length as u64))
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        self.metadata.insert(CHAIN_LENGTH_KEY, value)?;
        Ok(())
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

fn height_key(height: usize) -> [u8; 8] {
    (height as u64).to_be_bytes()
}

fn encode_block(block: &Block) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(block).map_err(|e| StorageError::SerializationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::chain::Blockchain;
    use crate::blockchain::crypto::Address;
    use crate::blockchain::transaction::Transaction;

    fn mined_chain(blocks: usize) -> Vec<Block> {
        let mut blockchain = Blockchain::new();
        for _ in 0..blocks {
            blockchain
                .add_block(vec![Transaction::reward(&Address("miner".to_string()))])
                .unwrap();
        }
        blockchain.blocks().to_vec()
    }

    #[test]
    fn test_save_and_load_chain() {
        let storage = ChainStorage::temporary().unwrap();
        let chain = mined_chain(3);

        storage.save_chain(&chain).unwrap();

        assert_eq!(storage.load_chain().unwrap(), chain);
        assert_eq!(storage.chain_length().unwrap(), 4);
    }

    #[test]
    fn test_save_shorter_chain_replaces_stored_blocks() {
        let storage = ChainStorage::temporary().unwrap();

        storage.save_chain(&mined_chain(3)).unwrap();
        let replacement = mined_chain(1);
        storage.save_chain(&replacement).unwrap();

        assert_eq!(storage.load_chain().unwrap(), replacement);
        assert_eq!(storage.chain_length().unwrap(), 2);
    }

    #[test]
    fn test_blockchain_resumes_from_storage() {
        let storage = ChainStorage::temporary().unwrap();
        let chain = mined_chain(2);
        storage.save_chain(&chain).unwrap();

        let mut blockchain = Blockchain::from_storage(storage).unwrap();
        assert_eq!(blockchain.blocks(), chain.as_slice());

        blockchain
            .add_block(vec![Transaction::reward(&Address("miner".to_string()))])
            .unwrap();
        assert_eq!(blockchain.len(), 4);
    }

    #[test]
    fn test_invalid_stored_chain_is_reset() {
        let storage = ChainStorage::temporary().unwrap();
        let mut chain = mined_chain(2);
        chain[2].last_hash = "tampered".to_string();
        storage.save_chain(&chain).unwrap();

        let blockchain = Blockchain::from_storage(storage).unwrap();
        assert_eq!(blockchain.blocks(), &[Block::genesis()]);
    }

    #[test]
    fn test_truncated_stored_chain_is_reset() {
        let storage = ChainStorage::temporary().unwrap();
        storage.save_chain(&mined_chain(3)).unwrap();

        // The remaining prefix is still a valid chain
        storage.blocks.remove(height_key(3).to_vec()).unwrap();
        let remaining = storage.load_chain().unwrap();
        assert_eq!(remaining.len(), 3);
        assert!(Blockchain::is_valid_chain(&remaining).is_ok());
        assert_eq!(storage.chain_length().unwrap(), 4);

        let blockchain = Blockchain::from_storage(storage).unwrap();
        assert_eq!(blockchain.blocks(), &[Block::genesis()]);
    }
}
