// Consensus constants
//
// Every node on the network must agree on these values, otherwise blocks and
// reward transactions produced by one node are rejected by the others.

/// One second in nanoseconds, the unit of every timestamp
pub const SECONDS: i64 = 1_000_000_000;

/// Target time between two blocks
pub const MINE_RATE: i64 = 4 * SECONDS;

/// Balance of an address that has no history on the chain
pub const STARTING_BALANCE: u64 = 1000;

/// Coins paid to the miner of a block
pub const MINING_REWARD: u64 = 50;

/// Sentinel input address identifying reward transactions
pub const MINING_REWARD_ADDRESS: &str = "*--official-mining-reward--*";

/// Difficulty never drops below this value
pub const MINIMUM_DIFFICULTY: u32 = 1;

/// Number of nonces tried before the miner refreshes its timestamp
pub const TIMESTAMP_REFRESH_INTERVAL: u64 = 1024;

// Genesis block fields
pub const GENESIS_TIMESTAMP: i64 = 1;
pub const GENESIS_LAST_HASH: &str = "genesis_last_hash";
pub const GENESIS_HASH: &str = "genesis_hash";
pub const GENESIS_DIFFICULTY: u32 = 3;
pub const GENESIS_NONCE: u64 = 0;
