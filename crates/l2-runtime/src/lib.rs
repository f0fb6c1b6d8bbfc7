//! L2 Runtime - in-memory collaborators for the consensus core
//!
//! This crate provides everything a settlement node needs around consensus:
//! - Snapshot-backed state execution with a native staking contract
//! - In-memory chain storage publishing head/fork/reorg events
//! - Pending transaction pool and a local DA layer
//! - Genesis construction and the sequencer block loop

pub mod chain;
pub mod da;
pub mod executor;
pub mod genesis;
pub mod producer;
pub mod staking;
pub mod state;
pub mod txpool;

#[cfg(test)]
mod tests;

pub use chain::MemoryChain;
pub use da::LocalDaSender;
pub use executor::{intrinsic_gas, MemoryTransition, StateExecutor};
pub use genesis::{Genesis, GenesisConfig};
pub use producer::{BlockProducer, BlockProducerConfig, BlockUpdate};
pub use staking::StakingState;
pub use state::{Account, WorldState};
pub use txpool::MemoryTxPool;

/// Default block time in milliseconds
pub const BLOCK_TIME_MS: u64 = 1000;

/// Maximum transactions per block
pub const MAX_TXS_PER_BLOCK: usize = 256;

/// Default block gas limit
pub const DEFAULT_GAS_LIMIT: u64 = 30_000_000;
