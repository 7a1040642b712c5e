use log::{debug, info, warn};
use tokio::sync::RwLock;

use std::sync::Arc;

use crate::blockchain::{
    Address, Block, Blockchain, BlockchainError, Transaction, TransactionError, TransactionPool,
    Wallet,
};
use crate::miner::{Miner, MiningConfig};
use crate::network::{PeerHandle, PeerMessage};

/// The chain shared between the HTTP handlers, the miner and the network
pub type SharedChain = Arc<RwLock<Blockchain>>;

/// State of a running node
///
/// One instance is shared by the HTTP server and the peer network. Lock
/// order is always chain first, then pool.
pub struct Node {
    blockchain: SharedChain,
    pool: TransactionPool,
    wallet: Wallet,
    miner: Miner,
    peers: PeerHandle,
}

impl Node {
    pub fn new(
        blockchain: Blockchain,
        wallet: Wallet,
        peers: PeerHandle,
        mining: MiningConfig,
    ) -> Self {
        let blockchain = Arc::new(RwLock::new(blockchain));
        let pool = TransactionPool::new();
        let miner = Miner::new(
            blockchain.clone(),
            pool.clone(),
            wallet.clone(),
            peers.clone(),
            mining,
        );

        Node {
            blockchain,
            pool,
            wallet,
            miner,
            peers,
        }
    }

    /// Address of the node's wallet
    pub fn address(&self) -> &Address {
        self.wallet.address()
    }

    /// Balance of the node's wallet on the current chain
    pub async fn balance(&self) -> u64 {
        let blockchain = self.blockchain.read().await;
        self.wallet.balance(blockchain.blocks())
    }

    pub async fn known_addresses(&self) -> Vec<Address> {
        self.blockchain.read().await.known_addresses()
    }

    /// Snapshot of the current chain
    pub async fn chain(&self) -> Vec<Block> {
        self.blockchain.read().await.blocks().to_vec()
    }

    pub fn pool(&self) -> &TransactionPool {
        &self.pool
    }

    pub fn miner(&self) -> &Miner {
        &self.miner
    }

    /// Sends `amount` from the node's wallet to `recipient`
    ///
    /// The pending transaction of the wallet is extended when there is one.
    /// The resulting transaction is broadcast to peers.
    pub async fn transact(
        &self,
        recipient: &Address,
        amount: u64,
    ) -> Result<Transaction, TransactionError> {
        let transaction = {
            let blockchain = self.blockchain.read().await;
            self.wallet
                .create_transaction(recipient, amount, blockchain.blocks(), &self.pool)?
        };

        self.peers.broadcast(PeerMessage::Transaction {
            transaction: transaction.clone(),
        });

        Ok(transaction)
    }

    /// Applies a message received from a peer
    ///
    /// Rejected messages are logged and otherwise ignored.
    pub async fn handle_peer_message(&self, message: PeerMessage) {
        match message {
            PeerMessage::Chain { chain } => self.receive_chain(chain).await,
            PeerMessage::Transaction { transaction } => {
                if transaction.is_reward() {
                    warn!("Rejected reward transaction {} from peer", transaction.id);
                    return;
                }

                if let Err(err) = transaction.is_valid() {
                    warn!("Rejected transaction {} from peer: {}", transaction.id, err);
                    return;
                }

                if let Some(reason) = self.conflicting_id(&transaction).await {
                    warn!("Rejected transaction {} from peer: {}", transaction.id, reason);
                    return;
                }

                info!(
                    "Received transaction {} from {}",
                    transaction.id,
                    transaction.sender()
                );
                self.pool.set_transaction(transaction);
            }
        }
    }

    /// Adopts a peer chain when it is longer and valid
    ///
    /// Validation runs on the blocking thread pool without holding the
    /// lock; the length is checked again once the write lock is taken.
    async fn receive_chain(&self, chain: Vec<Block>) {
        let current = self.blockchain.read().await.len();
        if chain.len() <= current {
            debug!(
                "Ignoring peer chain of length {} (current length {})",
                chain.len(),
                current
            );
            return;
        }

        let chain = match tokio::task::spawn_blocking(move || Blockchain::validate_chain(chain)).await {
            Ok(Ok(chain)) => chain,
            Ok(Err(err)) => {
                warn!("Rejected peer chain: {}", err);
                return;
            }
            Err(err) => {
                warn!("Peer chain validation failed: {}", err);
                return;
            }
        };

        let rebased = {
            let mut blockchain = self.blockchain.write().await;
            match blockchain.adopt_chain(chain) {
                Ok(()) => self.miner.settle_pool(blockchain.blocks()),
                Err(err @ BlockchainError::ChainTooShort { .. }) => {
                    debug!("Ignoring peer chain: {}", err);
                    return;
                }
                Err(err) => {
                    warn!("Rejected peer chain: {}", err);
                    return;
                }
            }
        };

        if let Some(transaction) = rebased {
            self.peers.broadcast(PeerMessage::Transaction { transaction });
        }
    }

    /// Why a peer transaction's id clashes with known transactions, if it does
    ///
    /// Ids are unique on the chain, and a pooled id belongs to one sender.
    async fn conflicting_id(&self, transaction: &Transaction) -> Option<&'static str> {
        let confirmed = self
            .blockchain
            .read()
            .await
            .blocks()
            .iter()
            .flat_map(|block| block.data.iter())
            .any(|confirmed| confirmed.id == transaction.id);
        if confirmed {
            return Some("id is already on the chain");
        }

        self.pool
            .transactions()
            .iter()
            .any(|pending| pending.id == transaction.id && pending.sender() != transaction.sender())
            .then_some("id is taken by another sender")
    }
}
