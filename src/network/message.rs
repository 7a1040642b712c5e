use serde::{Deserialize, Serialize};

use crate::blockchain::{Block, Transaction};

/// Messages exchanged between nodes
///
/// Serialized as JSON tagged by `type`, e.g. `{"type": "CHAIN", "chain": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeerMessage {
    /// A node's full chain, sent after mining or to sync a new peer
    Chain { chain: Vec<Block> },

    /// A transaction that entered a node's pool
    Transaction { transaction: Transaction },
}

impl PeerMessage {
    /// Name of the gossip topic carrying this kind of message
    pub fn topic(&self) -> &'static str {
        match self {
            PeerMessage::Chain { .. } => CHAIN_TOPIC,
            PeerMessage::Transaction { .. } => TRANSACTION_TOPIC,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

pub const CHAIN_TOPIC: &str = "CHAIN";
pub const TRANSACTION_TOPIC: &str = "TRANSACTION";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_is_tagged() {
        let message = PeerMessage::Chain {
            chain: vec![Block::genesis()],
        };

        let json: serde_json::Value = serde_json::from_slice(&message.to_bytes().unwrap()).unwrap();
        assert_eq!(json["type"], "CHAIN");
        assert_eq!(json["chain"][0]["hash"], "genesis_hash");
        assert_eq!(message.topic(), CHAIN_TOPIC);

        assert_eq!(PeerMessage::from_bytes(&message.to_bytes().unwrap()).unwrap(), message);
    }

    #[test]
    fn test_malformed_message_is_rejected() {
        assert!(PeerMessage::from_bytes(br#"{"type": "BLOCK", "block": {}}"#).is_err());
        assert!(PeerMessage::from_bytes(br#"{"type": "TRANSACTION", "transaction": {"id": 1}}"#).is_err());
    }
}
