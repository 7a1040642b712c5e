// Network module
//
// Peer-to-peer synchronization between nodes:
// - wire messages exchanged over gossip topics
// - the libp2p swarm carrying them
// - the handle the rest of the node uses to broadcast

pub mod message;
pub mod swarm;

use log::debug;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub use message::PeerMessage;
pub use swarm::PeerNetwork;

/// Settings of the peer-to-peer layer
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Multiaddr to listen on
    pub listen: String,

    /// Multiaddrs of peers to dial at startup
    pub dial: Vec<String>,

    /// Discover peers on the local network
    pub mdns: bool,
}

/// Queues messages for broadcast to all connected peers
///
/// Broadcasting never blocks and never fails: when the network is not
/// running the message is dropped.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    outbound: UnboundedSender<PeerMessage>,
}

impl PeerHandle {
    /// Creates a handle and the receiving end consumed by the network
    pub fn channel() -> (Self, UnboundedReceiver<PeerMessage>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        (PeerHandle { outbound }, receiver)
    }

    pub fn broadcast(&self, message: PeerMessage) {
        if self.outbound.send(message).is_err() {
            debug!("Peer network is not running, message not broadcast");
        }
    }
}
