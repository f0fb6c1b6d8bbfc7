//! State executor over in-memory snapshots
//!
//! Every committed state is kept as a snapshot keyed by its root, so
//! transitions can start from any block on any branch.

use alloy_primitives::{Address, Bytes, B256};
use anyhow::{anyhow, bail};
use dashmap::DashMap;
use l2_consensus::chain::{ExecutionResult, Executor, Transition};
use l2_consensus::staking::STAKING_CONTRACT_ADDRESS;
use l2_consensus::{Header, Receipt, Transaction};
use std::sync::Arc;

use crate::staking::STAKING_CALL_GAS;
use crate::state::WorldState;

/// Base cost of every transaction
pub const TX_GAS: u64 = 21_000;
/// Per zero byte of calldata
pub const TX_DATA_ZERO_GAS: u64 = 4;
/// Per non-zero byte of calldata
pub const TX_DATA_NON_ZERO_GAS: u64 = 16;

/// Gas charged before execution
pub fn intrinsic_gas(tx: &Transaction) -> u64 {
    let data_gas: u64 = tx
        .input
        .iter()
        .map(|b| if *b == 0 { TX_DATA_ZERO_GAS } else { TX_DATA_NON_ZERO_GAS })
        .sum();
    TX_GAS + data_gas
}

/// Snapshot-backed executor
#[derive(Clone, Default)]
pub struct StateExecutor {
    snapshots: Arc<DashMap<B256, WorldState>>,
}

impl StateExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a state, returning its root
    pub fn insert_state(&self, state: WorldState) -> anyhow::Result<B256> {
        let root = state.root()?;
        self.snapshots.insert(root, state);
        Ok(root)
    }

    pub fn state_at(&self, root: B256) -> Option<WorldState> {
        self.snapshots.get(&root).map(|s| s.value().clone())
    }

    /// Number of stored snapshots
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl Executor for StateExecutor {
    fn begin_txn(
        &self,
        parent_root: B256,
        header: &Header,
        coinbase: Address,
    ) -> anyhow::Result<Box<dyn Transition>> {
        let state = self
            .state_at(parent_root)
            .ok_or_else(|| anyhow!("state root {} not found", parent_root))?;

        Ok(Box::new(MemoryTransition {
            snapshots: self.snapshots.clone(),
            state,
            gas_limit: header.gas_limit,
            coinbase,
            receipts: Vec::new(),
            total_gas: 0,
        }))
    }
}

/// Transition over a private copy of the parent state
pub struct MemoryTransition {
    snapshots: Arc<DashMap<B256, WorldState>>,
    state: WorldState,
    gas_limit: u64,
    coinbase: Address,
    receipts: Vec<Receipt>,
    total_gas: u64,
}

impl MemoryTransition {
    /// Run the call body against `state`; Err is a revert reason
    fn execute(
        state: &mut WorldState,
        tx: &Transaction,
    ) -> (u64, std::result::Result<Bytes, String>) {
        let mut gas = intrinsic_gas(tx);

        match tx.to {
            Some(to) if to == STAKING_CONTRACT_ADDRESS => {
                gas += STAKING_CALL_GAS;
                if gas > tx.gas {
                    return (tx.gas, Err("out of gas".to_string()));
                }
                let mut scratch = state.staking.clone();
                match scratch.call(tx.from, &tx.input) {
                    Ok(output) => {
                        state.staking = scratch;
                        (gas, Ok(output))
                    }
                    Err(e) => (gas, Err(e.to_string())),
                }
            }
            Some(to) => {
                if state.transfer(tx.from, to, tx.value) {
                    (gas, Ok(Bytes::new()))
                } else {
                    (gas, Err("insufficient balance for transfer".to_string()))
                }
            }
            None => (gas, Err("contract creation is not supported".to_string())),
        }
    }
}

impl Transition for MemoryTransition {
    /// Apply `tx` on behalf of `tx.from`
    ///
    /// The sender is trusted as given; signatures are checked at pool admission.
    fn write(&mut self, tx: &Transaction) -> anyhow::Result<()> {
        let expected = self.state.nonce(&tx.from);
        if tx.nonce != expected {
            bail!("invalid nonce for {}: got {}, expected {}", tx.from, tx.nonce, expected);
        }

        let intrinsic = intrinsic_gas(tx);
        if intrinsic > tx.gas {
            bail!("intrinsic gas {} exceeds transaction gas {}", intrinsic, tx.gas);
        }

        let mut state = self.state.clone();
        state.increment_nonce(tx.from);
        let (gas_used, outcome) = Self::execute(&mut state, tx);
        if self.total_gas + gas_used > self.gas_limit {
            bail!(
                "transaction {} needs {} gas, block gas limit {} has {} left",
                tx.hash(),
                gas_used,
                self.gas_limit,
                self.gas_limit - self.total_gas
            );
        }
        if let Err(reason) = &outcome {
            tracing::debug!("Transaction {} reverted: {}", tx.hash(), reason);
        }

        self.state = state;
        self.total_gas += gas_used;
        self.receipts.push(Receipt {
            tx_hash: tx.hash(),
            success: outcome.is_ok(),
            gas_used,
            cumulative_gas_used: self.total_gas,
        });
        Ok(())
    }

    fn get_nonce(&self, address: Address) -> u64 {
        self.state.nonce(&address)
    }

    fn apply(&mut self, tx: &Transaction) -> anyhow::Result<ExecutionResult> {
        let mut scratch = self.state.clone();
        let (gas_used, outcome) = Self::execute(&mut scratch, tx);

        Ok(match outcome {
            Ok(return_value) => ExecutionResult {
                return_value,
                gas_used,
                err: None,
            },
            Err(reason) => ExecutionResult {
                return_value: Bytes::new(),
                gas_used,
                err: Some(reason),
            },
        })
    }

    fn total_gas(&self) -> u64 {
        self.total_gas
    }

    fn commit(self: Box<Self>) -> anyhow::Result<(Vec<Receipt>, B256)> {
        let root = self.state.root()?;
        tracing::trace!(
            "Committed transition for coinbase {}: {} receipts, root {}",
            self.coinbase,
            self.receipts.len(),
            root
        );
        self.snapshots.insert(root, self.state);
        Ok((self.receipts, root))
    }
}
