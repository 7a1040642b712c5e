use clap::Parser;
use rand::Rng;

use std::path::PathBuf;

use crate::miner::MiningConfig;
use crate::network::NetworkConfig;

/// Port of the first node of a network
pub const DEFAULT_PORT: u16 = 5000;

/// Command line and environment configuration of a node
#[derive(Debug, Clone, Parser)]
#[command(name = "ledger-node")]
#[command(about = "Proof-of-work ledger node with a peer-synchronized transaction pool", long_about = None)]
pub struct NodeConfig {
    /// Interface the HTTP API binds to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// HTTP API port
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Run as an additional peer on a random port between 5001 and 6000
    #[arg(long, env = "PEER")]
    pub peer: bool,

    /// Multiaddr the peer network listens on
    #[arg(long, env = "P2P_LISTEN", default_value = "/ip4/0.0.0.0/tcp/0")]
    pub p2p_listen: String,

    /// Multiaddr of a peer to dial at startup; may be repeated
    #[arg(long = "dial", env = "P2P_DIAL", value_delimiter = ',')]
    pub dial: Vec<String>,

    /// Disable peer discovery on the local network
    #[arg(long, env = "NO_MDNS")]
    pub no_mdns: bool,

    /// Directory of the chain database; the chain is kept in memory when unset
    #[arg(long, env = "DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Hex encoded secret key of the node wallet; a fresh wallet is created when unset
    #[arg(long, env = "WALLET_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Mine blocks holding only the reward when the pool is empty
    #[arg(long, env = "MINE_EMPTY_BLOCKS")]
    pub mine_empty_blocks: bool,

    /// Mine automatically every N seconds
    #[arg(long, env = "MINE_INTERVAL_SECS")]
    pub mine_interval_secs: Option<u64>,
}

impl NodeConfig {
    /// Port the HTTP API binds to
    ///
    /// With `--peer` the configured port is ignored in favour of a random one.
    pub fn http_port(&self) -> u16 {
        if self.peer {
            rand::thread_rng().gen_range(DEFAULT_PORT + 1..=DEFAULT_PORT + 1000)
        } else {
            self.port
        }
    }

    pub fn mining_config(&self) -> MiningConfig {
        MiningConfig {
            allow_empty_blocks: self.mine_empty_blocks,
        }
    }

    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            listen: self.p2p_listen.clone(),
            dial: self.dial.clone(),
            mdns: !self.no_mdns,
        }
    }
}
