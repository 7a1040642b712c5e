// Blockchain module
//
// This module contains the ledger itself:
// - Blocks and proof of work
// - The chain and its validation rules
// - Transactions and the pool of pending ones
// - Wallets and key handling
// - Persistent chain storage

pub mod block;
pub mod chain;
pub mod constants;
pub mod crypto;
pub mod pool;
pub mod storage;
pub mod transaction;
pub mod wallet;

// Re-export main components for easier access
pub use block::{Block, BlockError};
pub use chain::{Blockchain, BlockchainError};
pub use crypto::{Address, DigitalSignature};
pub use pool::TransactionPool;
pub use transaction::{Transaction, TransactionError, TransactionInput};
pub use wallet::Wallet;
