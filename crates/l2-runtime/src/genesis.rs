//! Genesis block and state
//!
//! Every node building from the same [`GenesisConfig`] ends up with the same
//! genesis hash, so their chains can exchange blocks.

use alloy_primitives::{Address, Bytes, U256};
use l2_consensus::types::{calculate_receipts_root, calculate_tx_root, calculate_uncle_root};
use l2_consensus::{Block, Header};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::chain::MemoryChain;
use crate::executor::StateExecutor;
use crate::staking::StakingState;
use crate::state::WorldState;
use crate::DEFAULT_GAS_LIMIT;

/// Genesis parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisConfig {
    pub gas_limit: u64,
    pub timestamp: u64,
    pub sequencers: Vec<Address>,
    pub validators: Vec<Address>,
    pub watchtowers: Vec<Address>,
    /// Initial balances
    pub alloc: Vec<(Address, U256)>,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            gas_limit: DEFAULT_GAS_LIMIT,
            timestamp: 0,
            sequencers: Vec::new(),
            validators: Vec::new(),
            watchtowers: Vec::new(),
            alloc: Vec::new(),
        }
    }
}

/// A freshly initialized node: chain plus the executor backing it
pub struct Genesis {
    pub chain: Arc<MemoryChain>,
    pub executor: Arc<StateExecutor>,
    pub block: Block,
}

impl Genesis {
    /// Build the genesis state and block and open a chain on them
    pub fn build(config: &GenesisConfig) -> anyhow::Result<Self> {
        let mut state = WorldState::new(StakingState {
            sequencers: config.sequencers.clone(),
            validators: config.validators.clone(),
            watchtowers: config.watchtowers.clone(),
            probation: Vec::new(),
        });
        for (address, balance) in &config.alloc {
            state.set_balance(*address, *balance);
        }

        let executor = Arc::new(StateExecutor::new());
        let state_root = executor.insert_state(state)?;

        let mut header = Header {
            state_root,
            sha3_uncles: calculate_uncle_root(&[]),
            tx_root: calculate_tx_root(&[]),
            receipts_root: calculate_receipts_root(&[]),
            gas_limit: config.gas_limit,
            timestamp: config.timestamp,
            extra_data: Bytes::new(),
            ..Default::default()
        };
        header.compute_hash();

        let block = Block {
            header,
            transactions: Vec::new(),
            uncles: Vec::new(),
        };
        let chain = Arc::new(MemoryChain::new(block.clone(), executor.clone()));

        tracing::info!(
            "Genesis {} with {} sequencers, {} watchtowers, gas limit {}",
            block.hash(),
            config.sequencers.len(),
            config.watchtowers.len(),
            config.gas_limit
        );

        Ok(Self {
            chain,
            executor,
            block,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use l2_consensus::chain::Blockchain;

    #[test]
    fn test_same_config_same_genesis() {
        let config = GenesisConfig {
            sequencers: vec![Address::repeat_byte(1)],
            alloc: vec![(Address::repeat_byte(2), U256::from(5u64))],
            ..Default::default()
        };

        let a = Genesis::build(&config).unwrap();
        let b = Genesis::build(&config).unwrap();
        assert_eq!(a.block.hash(), b.block.hash());
        assert_eq!(a.chain.header().hash, a.block.hash());
        assert!(a.block.header.is_genesis());
    }
}
