use log::{info, warn};
use thiserror::Error;

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use super::block::{Block, BlockError};
use super::crypto::Address;
use super::storage::{ChainStorage, StorageError};
use super::transaction::{Transaction, TransactionError};
use super::wallet::Wallet;

/// Reasons a chain fails validation
#[derive(Debug, Error)]
pub enum ChainValidationError {
    #[error("Chain is empty")]
    Empty,

    #[error("Genesis block must be valid")]
    InvalidGenesis,

    #[error("Block {height} is invalid: {source}")]
    InvalidBlock {
        height: usize,
        #[source]
        source: BlockError,
    },

    #[error("Transaction {id} is invalid: {source}")]
    InvalidTransaction {
        id: String,
        #[source]
        source: TransactionError,
    },

    #[error("Transaction {0} is not unique")]
    DuplicateTransaction(String),

    #[error("Duplicate mining rewards in block {0}")]
    DuplicateReward(String),

    #[error("Sender {sender} spends more than once in block {hash}")]
    DuplicateSender { sender: Address, hash: String },

    #[error("Transaction {id} has an invalid input amount: expected {expected}, got {actual}")]
    InvalidInputAmount { id: String, expected: u64, actual: u64 },
}

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Cannot replace. The incoming chain of length {incoming} must be longer than {current}")]
    ChainTooShort { incoming: usize, current: usize },

    #[error("Cannot replace. Incoming chain is invalid: {0}")]
    InvalidChain(#[from] ChainValidationError),

    #[error("Invalid block: {0}")]
    InvalidBlock(#[from] BlockError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

/// A chain that passed `Blockchain::validate_chain`
///
/// Validation is the expensive half of a chain replacement, so it can run
/// before the chain lock is taken; `Blockchain::adopt_chain` then only
/// compares lengths.
#[derive(Debug, Clone)]
pub struct ValidChain(Vec<Block>);

impl ValidChain {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.0
    }
}

/// Represents the blockchain
#[derive(Debug)]
pub struct Blockchain {
    /// The chain of blocks, starting with genesis
    chain: Vec<Block>,

    /// Storage for blockchain data
    storage: Option<ChainStorage>,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockchain {
    /// Creates a new in-memory blockchain holding only the genesis block
    pub fn new() -> Self {
        Blockchain {
            chain: vec![Block::genesis()],
            storage: None,
        }
    }

    /// Creates a blockchain backed by persistent storage
    ///
    /// A chain found in storage is validated before it is used. A store that
    /// is empty, unreadable or holds an invalid chain is reset to genesis.
    ///
    /// # Arguments
    ///
    /// * `storage_path` - The path to the storage directory
    pub fn with_storage<P: AsRef<Path>>(storage_path: P) -> Result<Self, BlockchainError> {
        let storage = ChainStorage::new(storage_path)?;
        Self::from_storage(storage)
    }

    pub(crate) fn from_storage(storage: ChainStorage) -> Result<Self, BlockchainError> {
        let chain = match storage.load_chain() {
            Ok(blocks) if blocks.is_empty() => {
                info!("No existing blockchain found in storage, creating genesis block");
                None
            }
            Ok(blocks) if storage.chain_length().ok() != Some(blocks.len()) => {
                warn!(
                    "Stored blockchain is truncated ({} blocks stored, {:?} recorded), starting from genesis",
                    blocks.len(),
                    storage.chain_length().ok()
                );
                None
            }
            Ok(blocks) => match Self::is_valid_chain(&blocks) {
                Ok(()) => {
                    info!("Loaded blockchain of {} blocks from storage", blocks.len());
                    Some(blocks)
                }
                Err(err) => {
                    warn!("Stored blockchain is invalid, starting from genesis: {}", err);
                    None
                }
            },
            Err(err) => {
                warn!("Failed to load blockchain from storage, starting from genesis: {}", err);
                None
            }
        };

        let chain = match chain {
            Some(chain) => chain,
            None => {
                let genesis = vec![Block::genesis()];
                storage.save_chain(&genesis)?;
                genesis
            }
        };

        Ok(Blockchain {
            chain,
            storage: Some(storage),
        })
    }

    /// The blocks of the chain
    pub fn blocks(&self) -> &[Block] {
        &self.chain
    }

    /// Number of blocks, genesis included
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Gets the last block in the chain
    pub fn last_block(&self) -> &Block {
        // The chain is never empty: it starts at genesis and is only ever
        // replaced by a validated, longer chain.
        &self.chain[self.chain.len() - 1]
    }

    /// Mines a block with `data` on top of the chain and appends it
    ///
    /// No validation is applied to `data`; nodes extend their chain through
    /// the miner, which goes through `replace_chain`.
    pub fn add_block(&mut self, data: Vec<Transaction>) -> Result<&Block, BlockchainError> {
        let block = Block::mine_block(self.last_block(), data)?;

        if let Some(storage) = &self.storage {
            storage.append_block(self.chain.len(), &block)?;
        }

        self.chain.push(block);
        Ok(self.last_block())
    }

    /// Replaces the local chain with `chain` if it is longer and valid
    ///
    /// On rejection the current chain is kept as it is.
    pub fn replace_chain(&mut self, chain: Vec<Block>) -> Result<(), BlockchainError> {
        self.check_longer(chain.len())?;
        let chain = Self::validate_chain(chain)?;
        self.adopt_chain(chain)
    }

    /// Validates `chain`, taking ownership of it
    pub fn validate_chain(chain: Vec<Block>) -> Result<ValidChain, ChainValidationError> {
        Self::is_valid_chain(&chain)?;
        Ok(ValidChain(chain))
    }

    /// Replaces the local chain with an already validated one if it is longer
    pub fn adopt_chain(&mut self, chain: ValidChain) -> Result<(), BlockchainError> {
        self.check_longer(chain.len())?;

        if let Some(storage) = &self.storage {
            storage.save_chain(chain.blocks())?;
        }

        info!(
            "Replaced chain of {} blocks with chain of {} blocks",
            self.chain.len(),
            chain.len()
        );
        self.chain = chain.0;

        Ok(())
    }

    fn check_longer(&self, incoming: usize) -> Result<(), BlockchainError> {
        if incoming <= self.chain.len() {
            return Err(BlockchainError::ChainTooShort {
                incoming,
                current: self.chain.len(),
            });
        }
        Ok(())
    }

    /// Validates a whole chain
    ///
    /// The chain must start with the genesis block, every block must follow
    /// from its predecessor and every transaction must be valid against the
    /// chain history before it.
    pub fn is_valid_chain(chain: &[Block]) -> Result<(), ChainValidationError> {
        let genesis = chain.first().ok_or(ChainValidationError::Empty)?;
        if *genesis != Block::genesis() {
            return Err(ChainValidationError::InvalidGenesis);
        }

        for (height, pair) in chain.windows(2).enumerate() {
            Block::is_valid_block(&pair[0], &pair[1]).map_err(|source| {
                ChainValidationError::InvalidBlock {
                    height: height + 1,
                    source,
                }
            })?;
        }

        Self::is_valid_transaction_chain(chain)
    }

    /// Enforces the transaction rules of a chain
    ///
    /// - each transaction appears only once in the chain
    /// - at most one mining reward per block
    /// - at most one spend per sender per block
    /// - input amounts match the sender's balance before the block
    /// - each transaction is valid on its own
    pub fn is_valid_transaction_chain(chain: &[Block]) -> Result<(), ChainValidationError> {
        let mut transaction_ids = HashSet::new();

        for (height, block) in chain.iter().enumerate() {
            let mut has_mining_reward = false;
            let mut senders = HashSet::new();

            for transaction in &block.data {
                if !transaction_ids.insert(transaction.id.as_str()) {
                    return Err(ChainValidationError::DuplicateTransaction(
                        transaction.id.clone(),
                    ));
                }

                if transaction.is_reward() {
                    if has_mining_reward {
                        return Err(ChainValidationError::DuplicateReward(block.hash.clone()));
                    }
                    has_mining_reward = true;
                } else {
                    if !senders.insert(transaction.sender()) {
                        return Err(ChainValidationError::DuplicateSender {
                            sender: transaction.sender().clone(),
                            hash: block.hash.clone(),
                        });
                    }

                    let historic_balance =
                        Wallet::calculate_balance(&chain[..height], transaction.sender());

                    if historic_balance != transaction.input.amount {
                        return Err(ChainValidationError::InvalidInputAmount {
                            id: transaction.id.clone(),
                            expected: historic_balance,
                            actual: transaction.input.amount,
                        });
                    }
                }

                transaction.is_valid().map_err(|source| {
                    ChainValidationError::InvalidTransaction {
                        id: transaction.id.clone(),
                        source,
                    }
                })?;
            }
        }

        Ok(())
    }

    /// Every address that received coins on the chain, sorted
    pub fn known_addresses(&self) -> Vec<Address> {
        let addresses: BTreeSet<&Address> = self
            .chain
            .iter()
            .flat_map(|block| block.data.iter())
            .flat_map(|transaction| transaction.output_map.keys())
            .filter(|address| !address.is_mining_reward())
            .collect();

        addresses.into_iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::constants::{MINING_REWARD, STARTING_BALANCE};

    fn recipient() -> Address {
        Wallet::new().unwrap().address().clone()
    }

    /// A chain of three mined blocks, each with a transfer and a reward
    fn populated_chain() -> Blockchain {
        let mut blockchain = Blockchain::new();

        for _ in 0..3 {
            let wallet = Wallet::new().unwrap();
            let transaction =
                Transaction::new(&wallet, &recipient(), 1, wallet.balance(blockchain.blocks())).unwrap();
            blockchain
                .add_block(vec![transaction, Transaction::reward(wallet.address())])
                .unwrap();
        }

        blockchain
    }

    #[test]
    fn test_new_blockchain() {
        let blockchain = Blockchain::new();

        assert_eq!(blockchain.len(), 1);
        assert_eq!(blockchain.blocks()[0], Block::genesis());
    }

    #[test]
    fn test_add_block() {
        let mut blockchain = Blockchain::new();
        let data = vec![Transaction::reward(&recipient())];

        blockchain.add_block(data.clone()).unwrap();

        assert_eq!(blockchain.len(), 2);
        assert_eq!(blockchain.last_block().data, data);
        assert_eq!(blockchain.last_block().last_hash, blockchain.blocks()[0].hash);
    }

    #[test]
    fn test_is_valid_chain() {
        let blockchain = populated_chain();
        assert!(Blockchain::is_valid_chain(blockchain.blocks()).is_ok());
    }

    #[test]
    fn test_is_valid_chain_bad_genesis() {
        let mut blocks = populated_chain().blocks().to_vec();
        blocks[0].hash = "evil_hash".to_string();

        assert!(matches!(
            Blockchain::is_valid_chain(&blocks),
            Err(ChainValidationError::InvalidGenesis)
        ));
        assert!(matches!(
            Blockchain::is_valid_chain(&[]),
            Err(ChainValidationError::Empty)
        ));
    }

    #[test]
    fn test_is_valid_chain_corrupt_block() {
        let mut blocks = populated_chain().blocks().to_vec();
        let victim = blocks[2].data[0].sender().clone();
        *blocks[2].data[0].output_map.get_mut(&victim).unwrap() -= 1;

        assert!(matches!(
            Blockchain::is_valid_chain(&blocks),
            Err(ChainValidationError::InvalidBlock { height: 2, .. })
        ));
    }

    #[test]
    fn test_replace_chain() {
        let mut blockchain = Blockchain::new();
        let longer = populated_chain();

        blockchain.replace_chain(longer.blocks().to_vec()).unwrap();

        assert_eq!(blockchain.blocks(), longer.blocks());
    }

    #[test]
    fn test_replace_chain_not_longer() {
        let mut blockchain = populated_chain();
        let original = blockchain.blocks().to_vec();

        let result = blockchain.replace_chain(vec![Block::genesis()]);
        assert!(matches!(result, Err(BlockchainError::ChainTooShort { incoming: 1, current: 4 })));

        // Equal length keeps the incumbent
        let result = blockchain.replace_chain(populated_chain().blocks().to_vec());
        assert!(matches!(result, Err(BlockchainError::ChainTooShort { .. })));

        assert_eq!(blockchain.blocks(), original.as_slice());
    }

    #[test]
    fn test_replace_chain_invalid() {
        let mut blockchain = Blockchain::new();
        let mut blocks = populated_chain().blocks().to_vec();
        blocks[1].hash = "some-fake-hash".to_string();

        let result = blockchain.replace_chain(blocks);

        assert!(matches!(result, Err(BlockchainError::InvalidChain(_))));
        assert_eq!(blockchain.blocks(), &[Block::genesis()]);
    }

    #[test]
    fn test_adopt_validated_chain() {
        let mut blockchain = Blockchain::new();
        let longer = populated_chain();

        let validated = Blockchain::validate_chain(longer.blocks().to_vec()).unwrap();

        // A longer chain adopted in the meantime wins over the validated one
        blockchain.replace_chain(populated_chain().blocks().to_vec()).unwrap();
        blockchain.add_block(vec![Transaction::reward(&recipient())]).unwrap();
        let current = blockchain.blocks().to_vec();
        assert!(matches!(
            blockchain.adopt_chain(validated.clone()),
            Err(BlockchainError::ChainTooShort { incoming: 4, current: 5 })
        ));
        assert_eq!(blockchain.blocks(), current.as_slice());

        let mut fresh = Blockchain::new();
        fresh.adopt_chain(validated).unwrap();
        assert_eq!(fresh.blocks(), longer.blocks());

        let mut blocks = longer.blocks().to_vec();
        blocks[1].nonce += 1;
        assert!(Blockchain::validate_chain(blocks).is_err());
    }

    #[test]
    fn test_invalid_transaction_chain() {
        let mut blockchain = Blockchain::new();
        let wallet = Wallet::new().unwrap();
        let mut transaction = Transaction::new(&wallet, &recipient(), 10, STARTING_BALANCE).unwrap();
        transaction.input.signature = None;

        blockchain.add_block(vec![transaction]).unwrap();

        assert!(matches!(
            Blockchain::is_valid_transaction_chain(blockchain.blocks()),
            Err(ChainValidationError::InvalidTransaction { .. })
        ));
    }

    #[test]
    fn test_duplicate_transaction() {
        let mut blockchain = Blockchain::new();
        let wallet = Wallet::new().unwrap();
        let transaction = Transaction::new(&wallet, &recipient(), 10, STARTING_BALANCE).unwrap();

        blockchain.add_block(vec![transaction.clone()]).unwrap();
        blockchain.add_block(vec![transaction]).unwrap();

        assert!(matches!(
            Blockchain::is_valid_transaction_chain(blockchain.blocks()),
            Err(ChainValidationError::DuplicateTransaction(_))
        ));
    }

    #[test]
    fn test_duplicate_rewards() {
        let mut blockchain = Blockchain::new();
        let miner = recipient();

        blockchain
            .add_block(vec![Transaction::reward(&miner), Transaction::reward(&miner)])
            .unwrap();

        assert!(matches!(
            Blockchain::is_valid_transaction_chain(blockchain.blocks()),
            Err(ChainValidationError::DuplicateReward(_))
        ));
    }

    #[test]
    fn test_double_spend_in_block() {
        let mut blockchain = Blockchain::new();
        let wallet = Wallet::new().unwrap();
        let first = Transaction::new(&wallet, &recipient(), 600, STARTING_BALANCE).unwrap();
        let second = Transaction::new(&wallet, &recipient(), 600, STARTING_BALANCE).unwrap();

        blockchain.add_block(vec![first, second]).unwrap();

        assert!(matches!(
            Blockchain::is_valid_transaction_chain(blockchain.blocks()),
            Err(ChainValidationError::DuplicateSender { .. })
        ));
    }

    #[test]
    fn test_invalid_input_amount() {
        let mut blockchain = Blockchain::new();
        let wallet = Wallet::new().unwrap();

        // Claims a balance the sender never had
        let transaction = Transaction::new(&wallet, &recipient(), 100, 9000).unwrap();
        blockchain.add_block(vec![transaction]).unwrap();

        assert!(matches!(
            Blockchain::is_valid_transaction_chain(blockchain.blocks()),
            Err(ChainValidationError::InvalidInputAmount { expected: STARTING_BALANCE, actual: 9000, .. })
        ));
    }

    #[test]
    fn test_competing_nodes_longest_chain_wins() {
        let miner_a = recipient();
        let miner_b = recipient();
        let mut node_a = Blockchain::new();
        let mut node_b = Blockchain::new();

        node_a.add_block(vec![Transaction::reward(&miner_a)]).unwrap();
        node_b.add_block(vec![Transaction::reward(&miner_b)]).unwrap();

        // Same length: each node keeps its own block
        assert!(node_a.replace_chain(node_b.blocks().to_vec()).is_err());
        assert_eq!(node_a.last_block().data[0].output_map[&miner_a], MINING_REWARD);

        node_b.add_block(vec![Transaction::reward(&miner_b)]).unwrap();

        node_a.replace_chain(node_b.blocks().to_vec()).unwrap();
        assert_eq!(node_a.blocks(), node_b.blocks());
        assert!(node_b.replace_chain(node_a.blocks().to_vec()).is_err());
    }

    #[test]
    fn test_known_addresses() {
        let mut blockchain = Blockchain::new();
        let wallet = Wallet::new().unwrap();
        let first = recipient();
        let second = recipient();

        let mut transaction = Transaction::new(&wallet, &first, 10, STARTING_BALANCE).unwrap();
        transaction.update(&wallet, &second, 10).unwrap();
        blockchain
            .add_block(vec![transaction, Transaction::reward(&first)])
            .unwrap();

        let mut expected = vec![wallet.address().clone(), first, second];
        expected.sort();

        assert_eq!(blockchain.known_addresses(), expected);
    }
}
