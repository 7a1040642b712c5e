use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use log::{info, warn};
use rand::rngs::OsRng;

use super::block::Block;
use super::constants::STARTING_BALANCE;
use super::crypto::{Address, CryptoError, DigitalSignature};
use super::pool::TransactionPool;
use super::transaction::{Transaction, TransactionError};

/// Represents a wallet with a keypair
#[derive(Debug, Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    address: Address,
}

impl Wallet {
    /// Creates a new wallet with a random keypair
    pub fn new() -> Result<Self, CryptoError> {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);

        Ok(Self::from_signing_key(signing_key))
    }

    /// Creates a wallet from an existing secret key
    pub fn from_secret_key(secret_key_bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes_array: [u8; 32] = secret_key_bytes.try_into().map_err(|_| {
            CryptoError::InvalidPrivateKey("Invalid private key length".to_string())
        })?;

        Ok(Self::from_signing_key(SigningKey::from_bytes(&bytes_array)))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = VerifyingKey::from(&signing_key);
        let address = Address::from_public_key(&verifying_key);

        Wallet {
            signing_key,
            verifying_key,
            address,
        }
    }

    /// Gets the wallet's address
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Gets the wallet's public key
    pub fn public_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Signs a message with the wallet's private key
    pub fn sign(&self, message: &[u8]) -> Result<DigitalSignature, CryptoError> {
        let signature = self
            .signing_key
            .try_sign(message)
            .map_err(|e| CryptoError::SigningError(e.to_string()))?;
        Ok(DigitalSignature::from_signature(&signature))
    }

    /// Exports the wallet's secret key as bytes
    pub fn export_secret_key(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }

    /// Balance of this wallet on the given chain
    pub fn balance(&self, chain: &[Block]) -> u64 {
        Self::calculate_balance(chain, &self.address)
    }

    /// Calculates the balance of an address from the confirmed transactions
    ///
    /// A transaction sent by the address resets its balance to the change
    /// output, since the input spent the whole previous balance. Outputs
    /// received from others are added on top. Within a block the spend is
    /// applied first: it was signed against the balance before the block, so
    /// coins received in the same block are not part of it.
    pub fn calculate_balance(chain: &[Block], address: &Address) -> u64 {
        let mut balance = STARTING_BALANCE;

        for block in chain {
            if let Some(spend) = block.data.iter().rev().find(|t| t.sender() == address) {
                balance = spend.output_map.get(address).copied().unwrap_or(0);
            }

            let received = block
                .data
                .iter()
                .filter(|transaction| transaction.sender() != address)
                .filter_map(|transaction| transaction.output_map.get(address))
                .fold(0u64, |total, amount| total.saturating_add(*amount));

            balance = balance.saturating_add(received);
        }

        balance
    }

    /// Re-signs the wallet's pending transaction against `chain`
    ///
    /// The pending transaction goes stale when the chain moves under it: a
    /// block confirmed an earlier version of it, or changed the wallet's
    /// balance. Transfers not yet confirmed are carried over into a new
    /// transaction signed against the current balance; when nothing is left,
    /// or the balance no longer covers it, the entry is dropped.
    ///
    /// # Returns
    ///
    /// The replacement transaction, if one was created
    pub fn rebase_pending(&self, chain: &[Block], pool: &TransactionPool) -> Option<Transaction> {
        let pending = pool.existing_transaction(&self.address)?;
        let balance = self.balance(chain);
        let confirmed = chain
            .iter()
            .flat_map(|block| block.data.iter())
            .find(|transaction| transaction.id == pending.id && transaction.sender() == &self.address);

        if confirmed.is_none() && pending.input.amount == balance {
            return None;
        }

        let remaining: Vec<(&Address, u64)> = pending
            .output_map
            .iter()
            .filter(|(recipient, _)| **recipient != self.address)
            .map(|(recipient, amount)| {
                let settled = confirmed
                    .and_then(|transaction| transaction.output_map.get(recipient))
                    .copied()
                    .unwrap_or(0);
                (recipient, amount.saturating_sub(settled))
            })
            .filter(|(_, amount)| *amount > 0)
            .collect();

        let rebased = remaining
            .iter()
            .try_fold(None::<Transaction>, |rebased, (recipient, amount)| match rebased {
                None => Transaction::new(self, recipient, *amount, balance).map(Some),
                Some(mut transaction) => transaction
                    .update(self, recipient, *amount)
                    .map(|()| Some(transaction)),
            });

        match rebased {
            Ok(Some(transaction)) => {
                info!(
                    "Rebased pending transaction {} of {} as {} against balance {}",
                    pending.id, self.address, transaction.id, balance
                );
                pool.set_transaction(transaction.clone());
                Some(transaction)
            }
            Ok(None) => {
                pool.discard(&pending);
                None
            }
            Err(err) => {
                warn!(
                    "Dropping pending transaction {} of {}: {}",
                    pending.id, self.address, err
                );
                pool.discard(&pending);
                None
            }
        }
    }

    /// Creates a transaction and places it in the pool
    ///
    /// If the pool already holds a pending transaction from this wallet, that
    /// transaction is extended with the new recipient instead, so the wallet
    /// never has two conflicting transactions outstanding.
    ///
    /// # Returns
    ///
    /// The pooled transaction, or `InsufficientFunds` with the pool unchanged
    pub fn create_transaction(
        &self,
        recipient: &Address,
        amount: u64,
        chain: &[Block],
        pool: &TransactionPool,
    ) -> Result<Transaction, TransactionError> {
        let transaction = pool.upsert_with(&self.address, |existing| match existing {
            Some(pending) => {
                let mut transaction = pending.clone();
                transaction.update(self, recipient, amount)?;
                Ok(transaction)
            }
            None => Transaction::new(self, recipient, amount, self.balance(chain)),
        })?;

        info!(
            "Wallet {} committed {} coins to {} in transaction {}",
            self.address, amount, recipient, transaction.id
        );

        Ok(transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::chain::Blockchain;

    #[test]
    fn test_wallet_creation() {
        let wallet = Wallet::new().unwrap();
        assert!(!wallet.address().0.is_empty());
    }

    #[test]
    fn test_secret_key_round_trip() {
        let wallet = Wallet::new().unwrap();
        let restored = Wallet::from_secret_key(&wallet.export_secret_key()).unwrap();
        assert_eq!(restored.address(), wallet.address());

        assert!(Wallet::from_secret_key(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_calculate_balance() {
        let mut blockchain = Blockchain::new();
        let wallet = Wallet::new().unwrap();
        let other_wallet = Wallet::new().unwrap();

        // Starting balance
        assert_eq!(wallet.balance(blockchain.blocks()), STARTING_BALANCE);

        // When the wallet sends coins
        let transaction = Transaction::new(&wallet, other_wallet.address(), 100, STARTING_BALANCE).unwrap();
        blockchain.add_block(vec![transaction]).unwrap();
        assert_eq!(wallet.balance(blockchain.blocks()), STARTING_BALANCE - 100);

        // When the wallet receives coins
        let other_balance = other_wallet.balance(blockchain.blocks());
        let transaction_2 = Transaction::new(&other_wallet, wallet.address(), 125, other_balance).unwrap();
        let transaction_3 = Transaction::reward(wallet.address());
        blockchain.add_block(vec![transaction_2, transaction_3]).unwrap();

        assert_eq!(
            wallet.balance(blockchain.blocks()),
            STARTING_BALANCE - 100 + 125 + crate::blockchain::constants::MINING_REWARD
        );
    }

    #[test]
    fn test_transfer_moves_balance() {
        let mut blockchain = Blockchain::new();
        let alice = Wallet::new().unwrap();
        let bob = Wallet::new().unwrap();

        let alice_before = alice.balance(blockchain.blocks());
        let bob_before = bob.balance(blockchain.blocks());

        let transaction = Transaction::new(&alice, bob.address(), 5, alice_before).unwrap();
        blockchain
            .add_block(vec![transaction, Transaction::reward(&Wallet::new().unwrap().address().clone())])
            .unwrap();

        assert_eq!(alice.balance(blockchain.blocks()), alice_before - 5);
        assert_eq!(bob.balance(blockchain.blocks()), bob_before + 5);
    }

    #[test]
    fn test_receive_then_spend_in_one_block() {
        let mut blockchain = Blockchain::new();
        let alice = Wallet::new().unwrap();
        let bob = Wallet::new().unwrap();
        let carol = Wallet::new().unwrap();

        let to_bob = Transaction::new(&alice, bob.address(), 5, STARTING_BALANCE).unwrap();
        let from_bob = Transaction::new(&bob, carol.address(), 10, STARTING_BALANCE).unwrap();
        blockchain.add_block(vec![to_bob, from_bob]).unwrap();
        assert!(Blockchain::is_valid_chain(blockchain.blocks()).is_ok());

        let balances: Vec<u64> = [&alice, &bob, &carol]
            .iter()
            .map(|wallet| wallet.balance(blockchain.blocks()))
            .collect();

        assert_eq!(balances, vec![995, 995, 1010]);
        assert_eq!(balances.iter().sum::<u64>(), 3 * STARTING_BALANCE);

        // The next spend from bob is checked against the same balance
        let next = Transaction::new(&bob, alice.address(), 1, balances[1]).unwrap();
        blockchain.add_block(vec![next]).unwrap();
        assert!(Blockchain::is_valid_chain(blockchain.blocks()).is_ok());
    }

    #[test]
    fn test_rebase_pending_keeps_unconfirmed_transfers() {
        let mut blockchain = Blockchain::new();
        let pool = TransactionPool::new();
        let wallet = Wallet::new().unwrap();
        let bob = Wallet::new().unwrap().address().clone();
        let carol = Wallet::new().unwrap().address().clone();

        let mined = wallet.create_transaction(&bob, 10, blockchain.blocks(), &pool).unwrap();
        blockchain.add_block(vec![mined]).unwrap();

        // Extended after the block was mined from the earlier version
        wallet.create_transaction(&carol, 20, blockchain.blocks(), &pool).unwrap();
        wallet.create_transaction(&bob, 5, blockchain.blocks(), &pool).unwrap();
        pool.clear_blockchain_transactions(blockchain.blocks());
        assert_eq!(pool.len(), 1);

        let rebased = wallet.rebase_pending(blockchain.blocks(), &pool).unwrap();

        assert!(rebased.is_valid().is_ok());
        assert_eq!(rebased.input.amount, STARTING_BALANCE - 10);
        assert_eq!(rebased.output_map[&carol], 20);
        assert_eq!(rebased.output_map[&bob], 5);
        assert_eq!(rebased.output_map[wallet.address()], STARTING_BALANCE - 35);
        assert_eq!(pool.existing_transaction(wallet.address()), Some(rebased.clone()));

        // Up to date entries are left alone
        assert!(wallet.rebase_pending(blockchain.blocks(), &pool).is_none());
        assert_eq!(pool.existing_transaction(wallet.address()), Some(rebased));
    }

    #[test]
    fn test_rebase_pending_drops_fully_confirmed_entry() {
        let mut blockchain = Blockchain::new();
        let pool = TransactionPool::new();
        let wallet = Wallet::new().unwrap();
        let bob = Wallet::new().unwrap().address().clone();

        let mined = wallet.create_transaction(&bob, 10, blockchain.blocks(), &pool).unwrap();
        blockchain.add_block(vec![mined]).unwrap();

        assert!(wallet.rebase_pending(blockchain.blocks(), &pool).is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_create_transaction_enters_pool() {
        let blockchain = Blockchain::new();
        let pool = TransactionPool::new();
        let wallet = Wallet::new().unwrap();
        let recipient = Wallet::new().unwrap().address().clone();

        let transaction = wallet
            .create_transaction(&recipient, 50, blockchain.blocks(), &pool)
            .unwrap();

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.existing_transaction(wallet.address()), Some(transaction));
    }

    #[test]
    fn test_create_transaction_reuses_pending_entry() {
        let blockchain = Blockchain::new();
        let pool = TransactionPool::new();
        let wallet = Wallet::new().unwrap();
        let first = Wallet::new().unwrap().address().clone();
        let second = Wallet::new().unwrap().address().clone();

        let initial = wallet.create_transaction(&first, 400, blockchain.blocks(), &pool).unwrap();
        let updated = wallet.create_transaction(&second, 300, blockchain.blocks(), &pool).unwrap();

        assert_eq!(pool.len(), 1);
        assert_eq!(updated.id, initial.id);
        assert_eq!(updated.output_map[&first], 400);
        assert_eq!(updated.output_map[&second], 300);
        assert_eq!(updated.output_map[wallet.address()], 300);

        // Only the uncommitted change is still spendable
        let result = wallet.create_transaction(&second, 301, blockchain.blocks(), &pool);
        assert!(matches!(
            result,
            Err(TransactionError::InsufficientFunds { required: 301, available: 300 })
        ));
        assert_eq!(pool.existing_transaction(wallet.address()), Some(updated));
    }

    #[test]
    fn test_create_transaction_insufficient_funds() {
        let blockchain = Blockchain::new();
        let pool = TransactionPool::new();
        let wallet = Wallet::new().unwrap();
        let recipient = Wallet::new().unwrap().address().clone();

        let result = wallet.create_transaction(&recipient, STARTING_BALANCE + 1, blockchain.blocks(), &pool);

        assert!(matches!(result, Err(TransactionError::InsufficientFunds { .. })));
        assert!(pool.is_empty());
    }
}
