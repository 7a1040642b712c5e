use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use std::collections::BTreeMap;

use super::constants::MINING_REWARD;
use super::crypto::{verify_signature, Address, CryptoError, DigitalSignature};
use super::wallet::Wallet;

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid transaction output values: outputs sum to {actual}, input amount is {expected}")]
    InvalidOutputMap { expected: u64, actual: u64 },

    #[error("Invalid mining reward")]
    InvalidReward,

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Invalid sender address: {0}")]
    InvalidSenderAddress(String),

    #[error("Invalid recipient address: {0}")]
    InvalidRecipientAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),

    #[error("System error: {0}")]
    SystemError(String),
}

/// The spending side of a transaction
///
/// `amount` is the sender's whole balance at the time of signing; the outputs
/// redistribute it between the recipients and the sender's change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TransactionInput {
    /// Timestamp of the signature, in nanoseconds since the epoch
    pub timestamp: i64,

    /// Balance being spent
    pub amount: u64,

    /// Sender's address
    pub address: Address,

    /// Signature over the output map, absent for mining rewards
    pub signature: Option<DigitalSignature>,
}

/// Represents a transaction in the blockchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Unique identifier for the transaction
    pub id: String,

    /// Sender side of the transaction
    pub input: TransactionInput,

    /// Amount credited to each recipient, including change back to the sender
    #[schema(value_type = Object)]
    pub output_map: BTreeMap<Address, u64>,
}

impl Transaction {
    /// Creates a new signed transaction
    ///
    /// # Arguments
    ///
    /// * `sender` - The wallet spending the coins
    /// * `recipient` - The address receiving the coins
    /// * `amount` - The amount to transfer
    /// * `balance` - The sender's current balance
    ///
    /// # Returns
    ///
    /// A new Transaction instance, or an error if the balance is too low
    pub fn new(
        sender: &Wallet,
        recipient: &Address,
        amount: u64,
        balance: u64,
    ) -> Result<Self, TransactionError> {
        validate_transfer(sender, recipient, amount)?;

        if amount > balance {
            return Err(TransactionError::InsufficientFunds {
                required: amount,
                available: balance,
            });
        }

        let mut output_map = BTreeMap::new();
        output_map.insert(recipient.clone(), amount);
        output_map.insert(sender.address().clone(), balance - amount);

        let input = create_input(sender, balance, &output_map)?;

        Ok(Transaction {
            id: Uuid::new_v4().to_string(),
            input,
            output_map,
        })
    }

    /// Adds a recipient (or tops up an existing one) and re-signs
    ///
    /// The amount is taken from the sender's remaining change, so a pending
    /// transaction can never commit more than the balance it was created with.
    pub fn update(
        &mut self,
        sender: &Wallet,
        recipient: &Address,
        amount: u64,
    ) -> Result<(), TransactionError> {
        validate_transfer(sender, recipient, amount)?;

        if sender.address() != &self.input.address {
            return Err(TransactionError::InvalidSenderAddress(
                "Wallet address does not match transaction input".to_string(),
            ));
        }

        let change = self.output_map.get(sender.address()).copied().unwrap_or(0);
        if amount > change {
            return Err(TransactionError::InsufficientFunds {
                required: amount,
                available: change,
            });
        }

        *self.output_map.entry(recipient.clone()).or_insert(0) += amount;
        self.output_map.insert(sender.address().clone(), change - amount);

        self.input = create_input(sender, self.input.amount, &self.output_map)?;

        Ok(())
    }

    /// Creates a mining reward transaction
    ///
    /// # Arguments
    ///
    /// * `miner` - The address of the miner
    ///
    /// # Returns
    ///
    /// A new Transaction instance
    pub fn reward(miner: &Address) -> Self {
        let mut output_map = BTreeMap::new();
        output_map.insert(miner.clone(), MINING_REWARD);

        Transaction {
            id: Uuid::new_v4().to_string(),
            input: TransactionInput {
                timestamp: Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX),
                amount: MINING_REWARD,
                address: Address::mining_reward(),
                signature: None,
            },
            output_map,
        }
    }

    /// Checks if the transaction is a mining reward
    pub fn is_reward(&self) -> bool {
        self.input.address.is_mining_reward()
    }

    /// Sender's address
    pub fn sender(&self) -> &Address {
        &self.input.address
    }

    /// Validates the transaction on its own, without chain context
    pub fn is_valid(&self) -> Result<(), TransactionError> {
        if self.is_reward() {
            let mut amounts = self.output_map.values();
            return match (amounts.next(), amounts.next()) {
                (Some(&MINING_REWARD), None) => Ok(()),
                _ => Err(TransactionError::InvalidReward),
            };
        }

        let output_total = self
            .output_map
            .values()
            .try_fold(0u64, |total, amount| total.checked_add(*amount))
            .unwrap_or(u64::MAX);

        if output_total != self.input.amount {
            return Err(TransactionError::InvalidOutputMap {
                expected: self.input.amount,
                actual: output_total,
            });
        }

        let signature = self
            .input
            .signature
            .as_ref()
            .ok_or(TransactionError::InvalidSignature)?;

        let message = signing_payload(&self.output_map)?;

        match verify_signature(&message, signature, &self.input.address) {
            Ok(true) => Ok(()),
            _ => Err(TransactionError::InvalidSignature),
        }
    }
}

fn validate_transfer(
    sender: &Wallet,
    recipient: &Address,
    amount: u64,
) -> Result<(), TransactionError> {
    if amount == 0 {
        return Err(TransactionError::InvalidAmount(
            "Amount must be positive".to_string(),
        ));
    }

    if recipient == sender.address() {
        return Err(TransactionError::InvalidRecipientAddress(
            "Cannot send coins to the sending wallet".to_string(),
        ));
    }

    if recipient.is_mining_reward() {
        return Err(TransactionError::InvalidRecipientAddress(
            "Cannot send coins to the mining reward address".to_string(),
        ));
    }

    Ok(())
}

fn create_input(
    sender: &Wallet,
    amount: u64,
    output_map: &BTreeMap<Address, u64>,
) -> Result<TransactionInput, TransactionError> {
    let message = signing_payload(output_map)?;
    let signature = sender.sign(&message)?;

    Ok(TransactionInput {
        timestamp: Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX),
        amount,
        address: sender.address().clone(),
        signature: Some(signature),
    })
}

/// The bytes covered by the sender's signature
fn signing_payload(output_map: &BTreeMap<Address, u64>) -> Result<Vec<u8>, TransactionError> {
    serde_json::to_vec(output_map).map_err(|e| TransactionError::SystemError(e.to_string()))
}
