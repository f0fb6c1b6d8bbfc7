//! Cross-component tests against the in-memory collaborators

mod dispute_test;
mod producer_test;
mod sequencers_test;

use alloy_primitives::{Address, U256};
use k256::ecdsa::SigningKey;
use l2_consensus::seal::address_from_key;
use l2_consensus::Transaction;

use crate::executor::TX_GAS;
use crate::genesis::{Genesis, GenesisConfig};

/// Deterministic test key
pub fn key(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed; 32]).unwrap()
}

/// Keys of a small devnet
pub struct Keys {
    pub sequencers: Vec<SigningKey>,
    pub watchtower: SigningKey,
    pub user: SigningKey,
}

impl Keys {
    pub fn new() -> Self {
        Self {
            sequencers: vec![key(1), key(2)],
            watchtower: key(10),
            user: key(20),
        }
    }

    pub fn sequencer(&self, index: usize) -> Address {
        address_from_key(&self.sequencers[index])
    }

    pub fn watchtower_address(&self) -> Address {
        address_from_key(&self.watchtower)
    }

    pub fn genesis_config(&self) -> GenesisConfig {
        GenesisConfig {
            sequencers: self.sequencers.iter().map(address_from_key).collect(),
            watchtowers: vec![self.watchtower_address()],
            alloc: vec![(address_from_key(&self.user), U256::from(1_000_000u64))],
            ..Default::default()
        }
    }

    /// Fresh node on the devnet genesis
    pub fn node(&self) -> Genesis {
        Genesis::build(&self.genesis_config()).unwrap()
    }
}

/// Signed value transfer from the test user
pub fn transfer(keys: &Keys, nonce: u64, value: u64) -> Transaction {
    Transaction {
        nonce,
        gas: TX_GAS,
        to: Some(Address::repeat_byte(0xee)),
        value: U256::from(value),
        ..Default::default()
    }
    .sign(&keys.user)
    .unwrap()
}
