//! Capability interfaces of the collaborators the consensus core drives
//!
//! Chain storage, state execution, the transaction pool and the DA sender are
//! all external. The core only sees these traits, so it runs against any
//! storage/execution engine, including the in-memory ones used in tests.

use alloy_primitives::{Address, Bytes, B256};

use crate::deferred::Deferred;
use crate::events::Subscription;
use crate::types::{Block, Header, Receipt, Transaction};

/// Provenance tag for blocks received from the DA layer
pub const SOURCE_AVAIL: &str = "Avail";

/// Provenance tag for blocks applied by a watchtower
pub const SOURCE_WATCHTOWER: &str = "WatchTower";

/// Provenance tag for dispute resolution blocks written locally
pub const SOURCE_DISPUTE_RESOLUTION: &str = "DisputeResolution";

/// Chain storage
pub trait Blockchain: Send + Sync {
    /// Current head
    fn header(&self) -> Header;

    fn get_header_by_hash(&self, hash: B256) -> Option<Header>;

    /// Persist a block; `source` is recorded for auditing only
    fn write_block(&self, block: &Block, source: &str) -> anyhow::Result<()>;

    /// Gas limit for a block at `number`, per the chain's adjustment policy
    fn calculate_gas_limit(&self, number: u64) -> anyhow::Result<u64>;

    /// Subscribe to head/fork/reorg events
    fn subscribe_events(&self) -> Subscription;

    /// Full verification of a finalized block
    fn verify_finalized_block(&self, block: &Block) -> anyhow::Result<()>;
}

/// Result of a read-only call
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub return_value: Bytes,
    pub gas_used: u64,
    /// Revert reason, if the call failed
    pub err: Option<String>,
}

impl ExecutionResult {
    pub fn failed(&self) -> bool {
        self.err.is_some()
    }
}

/// Scoped, commit-or-discard execution context over a parent state root
pub trait Transition: Send {
    /// Execute a transaction and keep its effects
    fn write(&mut self, tx: &Transaction) -> anyhow::Result<()>;

    fn get_nonce(&self, address: Address) -> u64;

    /// Execute a call without keeping its effects
    fn apply(&mut self, tx: &Transaction) -> anyhow::Result<ExecutionResult>;

    /// Gas used by the written transactions
    fn total_gas(&self) -> u64;

    /// Finish the transition, returning receipts and the new state root
    fn commit(self: Box<Self>) -> anyhow::Result<(Vec<Receipt>, B256)>;
}

/// State executor
pub trait Executor: Send + Sync {
    /// Open a transition on top of `parent_root` for a block described by `header`
    fn begin_txn(
        &self,
        parent_root: B256,
        header: &Header,
        coinbase: Address,
    ) -> anyhow::Result<Box<dyn Transition>>;
}

/// Pending transaction pool
pub trait TxPool: Send + Sync {
    fn add_tx(&self, tx: Transaction) -> anyhow::Result<()>;

    /// Drop transactions invalidated by the given new headers
    fn reset_with_headers(&self, headers: &[Header]);
}

/// Acknowledgement of a block accepted by the DA layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaAck {
    pub block_hash: B256,
    pub da_height: u64,
}

/// Submits blocks to the data availability layer
pub trait DaSender: Send + Sync {
    fn send(&self, block: &Block) -> Deferred<DaAck>;
}
