//! L2 Consensus - block sealing, validation and dispute resolution
//!
//! Architecture:
//! - Sequencers build and seal blocks with [`BlockBuilder`]
//! - Blocks go through the DA layer to validators and watchtowers
//! - [`Validator`] checks linkage, gas and body roots, then applies
//! - [`WatchTower`] fully verifies and answers malice with a fraud proof
//! - [`DisputeResolution`] moves sequencers into and out of probation
//! - Staking contract state decides who may sign and whose turn it is

pub mod builder;
pub mod chain;
pub mod deferred;
pub mod dispute;
pub mod error;
pub mod events;
pub mod extra;
pub mod seal;
pub mod staking;
pub mod types;
pub mod validator;
pub mod watchtower;

pub use builder::BlockBuilder;
pub use chain::{
    Blockchain, DaAck, DaSender, ExecutionResult, Executor, Transition, TxPool, SOURCE_AVAIL,
    SOURCE_DISPUTE_RESOLUTION, SOURCE_WATCHTOWER,
};
pub use deferred::Deferred;
pub use dispute::DisputeResolution;
pub use error::{ConsensusError, Result};
pub use events::{BrokerConfig, ChainEvent, EventBroker, EventType, Subscription};
pub use types::*;
pub use validator::Validator;
pub use watchtower::WatchTower;
