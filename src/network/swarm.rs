use futures::StreamExt;
use libp2p::gossipsub::{self, IdentTopic, MessageAuthenticity, PublishError, ValidationMode};
use libp2p::swarm::behaviour::toggle::Toggle;
use libp2p::swarm::{NetworkBehaviour, SwarmEvent};
use libp2p::{mdns, noise, tcp, yamux, Multiaddr, Swarm};
use log::{debug, info, warn};
use tokio::sync::mpsc::UnboundedReceiver;

use std::error::Error;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use super::message::{PeerMessage, CHAIN_TOPIC, TRANSACTION_TOPIC};
use super::NetworkConfig;
use crate::node::Node;

/// Whole chains travel in a single message
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(NetworkBehaviour)]
pub struct LedgerBehaviour {
    gossipsub: gossipsub::Behaviour,
    mdns: Toggle<mdns::tokio::Behaviour>,
}

/// The libp2p side of a node
///
/// Gossips chains and transactions over the `CHAIN` and `TRANSACTION`
/// topics, finds peers through mDNS and explicit dials, and feeds whatever
/// arrives into the node.
pub struct PeerNetwork {
    swarm: Swarm<LedgerBehaviour>,
    node: Arc<Node>,
    outbound: UnboundedReceiver<PeerMessage>,
    chain_topic: IdentTopic,
    transaction_topic: IdentTopic,
}

impl PeerNetwork {
    pub fn new(
        config: &NetworkConfig,
        node: Arc<Node>,
        outbound: UnboundedReceiver<PeerMessage>,
    ) -> Result<Self, Box<dyn Error>> {
        let enable_mdns = config.mdns;

        let mut swarm = libp2p::SwarmBuilder::with_new_identity()
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )?
            .with_behaviour(|key| {
                let gossipsub_config = gossipsub::ConfigBuilder::default()
                    .heartbeat_interval(Duration::from_secs(10))
                    .validation_mode(ValidationMode::Strict)
                    .max_transmit_size(MAX_MESSAGE_SIZE)
                    .build()
                    .map_err(|msg| io::Error::new(io::ErrorKind::Other, msg))?;
                let gossipsub = gossipsub::Behaviour::new(
                    MessageAuthenticity::Signed(key.clone()),
                    gossipsub_config,
                )?;

                let mdns = if enable_mdns {
                    Some(mdns::tokio::Behaviour::new(
                        mdns::Config::default(),
                        key.public().to_peer_id(),
                    )?)
                } else {
                    None
                };

                Ok(LedgerBehaviour {
                    gossipsub,
                    mdns: Toggle::from(mdns),
                })
            })?
            .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(60)))
            .build();

        info!("Local peer ID: {}", swarm.local_peer_id());

        let chain_topic = IdentTopic::new(CHAIN_TOPIC);
        let transaction_topic = IdentTopic::new(TRANSACTION_TOPIC);
        swarm.behaviour_mut().gossipsub.subscribe(&chain_topic)?;
        swarm.behaviour_mut().gossipsub.subscribe(&transaction_topic)?;

        swarm.listen_on(config.listen.parse::<Multiaddr>()?)?;

        for peer in &config.dial {
            let address: Multiaddr = peer.parse()?;
            swarm.dial(address)?;
            info!("Dialed {}", peer);
        }

        Ok(PeerNetwork {
            swarm,
            node,
            outbound,
            chain_topic,
            transaction_topic,
        })
    }

    /// Drives the swarm until the broadcast channel closes
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                message = self.outbound.recv() => match message {
                    Some(message) => self.publish(&message),
                    None => {
                        info!("Broadcast channel closed, stopping peer network");
                        break;
                    }
                },
                event = self.swarm.select_next_some() => match event {
                    SwarmEvent::NewListenAddr { address, .. } => {
                        info!("Peer network listening on {}", address);
                    }
                    SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                        debug!("Connected to {}", peer_id);
                    }
                    SwarmEvent::Behaviour(LedgerBehaviourEvent::Mdns(mdns::Event::Discovered(peers))) => {
                        for (peer_id, _) in peers {
                            info!("Discovered peer {}", peer_id);
                            self.swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                        }
                    }
                    SwarmEvent::Behaviour(LedgerBehaviourEvent::Mdns(mdns::Event::Expired(peers))) => {
                        for (peer_id, _) in peers {
                            debug!("Peer {} expired", peer_id);
                            self.swarm.behaviour_mut().gossipsub.remove_explicit_peer(&peer_id);
                        }
                    }
                    SwarmEvent::Behaviour(LedgerBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                        propagation_source,
                        message,
                        ..
                    })) => match PeerMessage::from_bytes(&message.data) {
                        Ok(message) => self.node.handle_peer_message(message).await,
                        Err(err) => warn!("Malformed message from {}: {}", propagation_source, err),
                    },
                    SwarmEvent::Behaviour(LedgerBehaviourEvent::Gossipsub(gossipsub::Event::Subscribed {
                        peer_id,
                        topic,
                    })) if topic == self.chain_topic.hash() => {
                        // Late joiners sync from whoever sees them subscribe
                        debug!("Peer {} subscribed to {}, sending our chain", peer_id, CHAIN_TOPIC);
                        let chain = self.node.chain().await;
                        self.publish(&PeerMessage::Chain { chain });
                    }
                    _ => {}
                },
            }
        }
    }

    fn publish(&mut self, message: &PeerMessage) {
        let topic = match message {
            PeerMessage::Chain { .. } => self.chain_topic.clone(),
            PeerMessage::Transaction { .. } => self.transaction_topic.clone(),
        };

        let data = match message.to_bytes() {
            Ok(data) => data,
            Err(err) => {
                warn!("Failed to encode {} message: {}", message.topic(), err);
                return;
            }
        };

        match self.swarm.behaviour_mut().gossipsub.publish(topic, data) {
            Ok(_) => debug!("Published {} message", message.topic()),
            Err(PublishError::InsufficientPeers) => {
                debug!("No peers to receive {} message", message.topic())
            }
            Err(err) => warn!("Failed to publish {} message: {}", message.topic(), err),
        }
    }
}
