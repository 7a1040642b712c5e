use log::{info, warn};
use thiserror::Error;

use std::collections::HashSet;
use std::time::Instant;

use crate::blockchain::{
    Address, Block, BlockError, Blockchain, BlockchainError, Transaction, TransactionPool, Wallet,
};
use crate::network::{PeerHandle, PeerMessage};
use crate::node::SharedChain;

/// Mining policy
#[derive(Debug, Clone, Copy, Default)]
pub struct MiningConfig {
    /// Mine reward-only blocks when the pool has nothing to confirm
    pub allow_empty_blocks: bool,
}

/// Errors that abort a mining round
///
/// None of them are fatal; the round can simply be retried.
#[derive(Debug, Error)]
pub enum MinerError {
    #[error("No valid transactions to mine")]
    EmptyMiningSet,

    #[error("Mined block was not accepted: {0}")]
    Rejected(#[from] BlockchainError),

    #[error("Failed to mine block: {0}")]
    Mining(#[from] BlockError),
}

/// Turns pending transactions into blocks
#[derive(Debug, Clone)]
pub struct Miner {
    blockchain: SharedChain,
    pool: TransactionPool,
    wallet: Wallet,
    peers: PeerHandle,
    config: MiningConfig,
}

impl Miner {
    /// Creates a miner paying rewards to `wallet`
    ///
    /// The wallet's pending transaction is rebased whenever the chain moves.
    pub fn new(
        blockchain: SharedChain,
        pool: TransactionPool,
        wallet: Wallet,
        peers: PeerHandle,
        config: MiningConfig,
    ) -> Self {
        Miner {
            blockchain,
            pool,
            wallet,
            peers,
            config,
        }
    }

    /// Address credited with the mining reward
    pub fn address(&self) -> &Address {
        self.wallet.address()
    }

    /// Mines the pool into a new block
    ///
    /// Proof of work runs against a snapshot of the chain without holding
    /// the lock. The result is committed through `adopt_chain`, so when a
    /// longer chain was adopted in the meantime the block is discarded with
    /// `MinerError::Rejected`.
    ///
    /// Blocks the calling thread; run it on a blocking thread pool.
    pub fn mine_transactions(&self) -> Result<Block, MinerError> {
        let started = Instant::now();
        let (candidate, block) = self.mine_candidate()?;
        let (chain, rebased) = self.commit(candidate)?;

        info!(
            "Mined block {} at height {} with {} transactions (difficulty {}, nonce {}) in {:?}",
            block.hash,
            chain.len() - 1,
            block.data.len(),
            block.difficulty,
            block.nonce,
            started.elapsed()
        );

        self.peers.broadcast(PeerMessage::Chain { chain });
        if let Some(transaction) = rebased {
            self.peers.broadcast(PeerMessage::Transaction { transaction });
        }

        Ok(block)
    }

    /// Snapshot of the chain extended with a freshly mined block
    fn mine_candidate(&self) -> Result<(Vec<Block>, Block), MinerError> {
        let (mut candidate, last_block) = {
            let blockchain = self.blockchain.blocking_read();
            (blockchain.blocks().to_vec(), blockchain.last_block().clone())
        };

        let mut data = self.mining_set(&candidate);
        if data.is_empty() && !self.config.allow_empty_blocks {
            return Err(MinerError::EmptyMiningSet);
        }
        data.push(Transaction::reward(self.wallet.address()));

        let block = Block::mine_block(&last_block, data)?;
        candidate.push(block.clone());

        Ok((candidate, block))
    }

    /// Validates the candidate chain, then adopts it under the write lock
    fn commit(&self, candidate: Vec<Block>) -> Result<(Vec<Block>, Option<Transaction>), MinerError> {
        let candidate = Blockchain::validate_chain(candidate).map_err(BlockchainError::from)?;

        let mut blockchain = self.blockchain.blocking_write();
        blockchain.adopt_chain(candidate)?;
        let rebased = self.settle_pool(blockchain.blocks());

        Ok((blockchain.blocks().to_vec(), rebased))
    }

    /// Brings the pool in line with a newly adopted chain
    ///
    /// Confirmed transactions are cleared and the wallet's pending
    /// transaction is rebased if the chain moved under it. Call it while
    /// still holding the chain write lock.
    ///
    /// # Returns
    ///
    /// The rebased transaction, to be broadcast after the chain
    pub fn settle_pool(&self, chain: &[Block]) -> Option<Transaction> {
        self.pool.clear_blockchain_transactions(chain);
        self.wallet.rebase_pending(chain, &self.pool)
    }

    /// Valid pool transactions that still agree with the chain
    ///
    /// Transactions that would make the block invalid are evicted instead:
    /// an input amount that no longer matches the sender's balance, or an id
    /// already on the chain or already taken by an earlier transaction.
    fn mining_set(&self, chain: &[Block]) -> Vec<Transaction> {
        let mut ids: HashSet<String> = chain
            .iter()
            .flat_map(|block| block.data.iter())
            .map(|transaction| transaction.id.clone())
            .collect();

        self.pool
            .valid_transactions()
            .into_iter()
            .filter(|transaction| {
                if !ids.insert(transaction.id.clone()) {
                    warn!(
                        "Evicting transaction {} from {}: id is already taken",
                        transaction.id,
                        transaction.sender()
                    );
                    self.pool.discard(transaction);
                    return false;
                }

                let balance = Wallet::calculate_balance(chain, transaction.sender());
                if balance == transaction.input.amount {
                    return true;
                }

                warn!(
                    "Evicting stale transaction {}: input amount {} but balance is {}",
                    transaction.id, transaction.input.amount, balance
                );
                self.pool.discard(transaction);
                false
            })
            .collect()
    }
}
