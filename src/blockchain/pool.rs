use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, warn};

use std::collections::HashMap;
use std::sync::Arc;

use super::block::Block;
use super::crypto::Address;
use super::transaction::Transaction;

/// Pending transactions waiting to be mined, one per sender
///
/// Cloning the pool yields another handle to the same entries.
#[derive(Debug, Clone, Default)]
pub struct TransactionPool {
    transactions: Arc<DashMap<Address, Transaction>>,
}

impl TransactionPool {
    /// Creates an empty pool
    pub fn new() -> Self {
        TransactionPool {
            transactions: Arc::new(DashMap::new()),
        }
    }

    /// Inserts a transaction, replacing any pending one from the same sender
    ///
    /// # Returns
    ///
    /// The transaction that was replaced, if any
    pub fn set_transaction(&self, transaction: Transaction) -> Option<Transaction> {
        self.transactions
            .insert(transaction.sender().clone(), transaction)
    }

    /// Gets the pending transaction of a sender
    pub fn existing_transaction(&self, address: &Address) -> Option<Transaction> {
        self.transactions.get(address).map(|entry| entry.value().clone())
    }

    /// Atomically replaces the pending transaction of a sender
    ///
    /// `build` receives the current entry and returns its replacement. The
    /// entry stays locked for the duration of the call, so concurrent callers
    /// for the same sender are applied one after the other. When `build`
    /// fails the pool is left unchanged.
    pub fn upsert_with<F, E>(&self, address: &Address, build: F) -> Result<Transaction, E>
    where
        F: FnOnce(Option<&Transaction>) -> Result<Transaction, E>,
    {
        match self.transactions.entry(address.clone()) {
            Entry::Occupied(mut entry) => {
                let transaction = build(Some(entry.get()))?;
                entry.insert(transaction.clone());
                Ok(transaction)
            }
            Entry::Vacant(entry) => {
                let transaction = build(None)?;
                entry.insert(transaction.clone());
                Ok(transaction)
            }
        }
    }

    /// All pending transactions, oldest signature first
    pub fn transactions(&self) -> Vec<Transaction> {
        let mut transactions: Vec<Transaction> = self
            .transactions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        transactions.sort_by(|a, b| {
            a.input
                .timestamp
                .cmp(&b.input.timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        transactions
    }

    /// Pending transactions that pass validation
    ///
    /// Invalid entries are evicted from the pool so they are never mined.
    pub fn valid_transactions(&self) -> Vec<Transaction> {
        let (valid, invalid): (Vec<_>, Vec<_>) = self
            .transactions()
            .into_iter()
            .partition(|transaction| transaction.is_valid().is_ok());

        for transaction in &invalid {
            warn!("Dropping invalid transaction {} from the pool", transaction.id);
            self.discard(transaction);
        }

        valid
    }

    /// Removes `transaction` unless its sender has since replaced it
    pub fn discard(&self, transaction: &Transaction) {
        self.transactions
            .remove_if(transaction.sender(), |_, pending| pending.id == transaction.id);
    }

    /// Removes every pending transaction
    pub fn clear(&self) {
        self.transactions.clear();
    }

    /// Removes pending transactions already confirmed in the chain
    ///
    /// An entry is removed only when the chain holds that exact transaction.
    /// A pending transaction extended after an earlier version of it was
    /// mined keeps its id but not its contents, and stays in the pool.
    pub fn clear_blockchain_transactions(&self, chain: &[Block]) {
        let confirmed: HashMap<&str, &Transaction> = chain
            .iter()
            .flat_map(|block| block.data.iter())
            .map(|transaction| (transaction.id.as_str(), transaction))
            .collect();

        let before = self.transactions.len();
        self.transactions.retain(|_, pending| {
            confirmed
                .get(pending.id.as_str())
                .map_or(true, |confirmed| **confirmed != *pending)
        });

        let removed = before.saturating_sub(self.transactions.len());
        if removed > 0 {
            debug!("Cleared {} confirmed transactions from the pool", removed);
        }
    }

    /// Number of pending transactions
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Checks if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
