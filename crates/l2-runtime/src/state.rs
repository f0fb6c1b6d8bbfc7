//! World state: accounts plus the native staking registry
//!
//! A state is an immutable snapshot once committed; its root is the Keccak256
//! of its bincode encoding. Maps are `BTreeMap`s so the encoding, and with it
//! the root, does not depend on insertion order.

use alloy_primitives::{keccak256, Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::staking::StakingState;

/// Externally owned account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub nonce: u64,
    pub balance: U256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldState {
    accounts: BTreeMap<Address, Account>,
    pub staking: StakingState,
}

impl WorldState {
    pub fn new(staking: StakingState) -> Self {
        Self {
            accounts: BTreeMap::new(),
            staking,
        }
    }

    /// Get an account (default if it doesn't exist)
    pub fn account(&self, address: &Address) -> Account {
        self.accounts.get(address).cloned().unwrap_or_default()
    }

    pub fn nonce(&self, address: &Address) -> u64 {
        self.accounts.get(address).map(|a| a.nonce).unwrap_or(0)
    }

    /// Get account balance (returns 0 if account doesn't exist)
    pub fn balance(&self, address: &Address) -> U256 {
        self.accounts
            .get(address)
            .map(|a| a.balance)
            .unwrap_or(U256::ZERO)
    }

    pub fn set_balance(&mut self, address: Address, balance: U256) {
        self.accounts.entry(address).or_default().balance = balance;
    }

    pub fn increment_nonce(&mut self, address: Address) {
        self.accounts.entry(address).or_default().nonce += 1;
    }

    /// Move `value` from `from` to `to`; false if `from` can't cover it
    pub fn transfer(&mut self, from: Address, to: Address, value: U256) -> bool {
        if value.is_zero() {
            return true;
        }
        let balance = self.balance(&from);
        if balance < value {
            return false;
        }
        self.set_balance(from, balance - value);
        let to_balance = self.balance(&to);
        self.set_balance(to, to_balance + value);
        true
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Keccak256 of the bincode encoded state
    pub fn root(&self) -> anyhow::Result<B256> {
        Ok(keccak256(bincode::serialize(self)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer() {
        let alice = Address::repeat_byte(1);
        let bob = Address::repeat_byte(2);
        let mut state = WorldState::default();
        state.set_balance(alice, U256::from(100u64));

        assert!(state.transfer(alice, bob, U256::from(40u64)));
        assert_eq!(state.balance(&alice), U256::from(60u64));
        assert_eq!(state.balance(&bob), U256::from(40u64));

        assert!(!state.transfer(bob, alice, U256::from(41u64)));
        assert_eq!(state.balance(&bob), U256::from(40u64));
    }

    #[test]
    fn test_root_ignores_insertion_order() {
        let mut a = WorldState::default();
        a.set_balance(Address::repeat_byte(1), U256::from(1u64));
        a.set_balance(Address::repeat_byte(2), U256::from(2u64));

        let mut b = WorldState::default();
        b.set_balance(Address::repeat_byte(2), U256::from(2u64));
        b.set_balance(Address::repeat_byte(1), U256::from(1u64));

        assert_eq!(a.root().unwrap(), b.root().unwrap());

        b.increment_nonce(Address::repeat_byte(1));
        assert_ne!(a.root().unwrap(), b.root().unwrap());
    }
}
