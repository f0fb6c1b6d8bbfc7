//! Staking contract access: participant sets, sequencer rotation

pub mod contract;
pub mod participants;
pub mod sequencers;

pub use contract::{ContractError, STAKING_CONTRACT_ADDRESS};
pub use participants::{ActiveParticipants, ActiveParticipantsQuerier};
pub use sequencers::{
    head_number_seed, select_sequencer, shuffle_sequencers, ActiveSequencers,
    ActiveSequencersQuerier, CachingActiveSequencers, CachingRandomizedActiveSequencers,
    RandomizedActiveSequencers, SeedFn,
};
