//! Consensus errors

use alloy_primitives::{Address, B256};
use thiserror::Error;

use crate::staking::ContractError;

/// Errors returned by sealing, building and checking blocks
#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("Invalid extra data: {0}")]
    InvalidExtra(String),

    #[error("Extra data has an odd number of elements: {0}")]
    OddExtraElements(usize),

    #[error("Validator extra not present in extra data")]
    MissingValidatorExtra,

    #[error("Invalid validator extra: expected 3 elements, got {0}")]
    InvalidValidatorExtra(usize),

    #[error("Invalid seal: {0}")]
    InvalidSeal(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Block signing key is missing")]
    MissingSigningKey,

    #[error("Parent block {0} not found")]
    ParentNotFound(B256),

    #[error("Parent hash is zero")]
    ZeroParentHash,

    #[error("Parent hash mismatch: block claims {claimed}, stored parent is {stored}")]
    ParentHashMismatch { claimed: B256, stored: B256 },

    #[error("Invalid block sequence: parent {parent}, block {block}")]
    InvalidSequence { parent: u64, block: u64 },

    #[error("Block signer {signer} does not match miner {miner}")]
    SignerMismatch { signer: Address, miner: Address },

    #[error("Block signer {0} is not an active participant")]
    UnauthorizedSigner(Address),

    #[error("Gas used {used} exceeds gas limit {limit}")]
    GasUsedExceedsLimit { used: u64, limit: u64 },

    #[error("Invalid gas limit {limit}: parent {parent}, allowed delta {max_delta}")]
    InvalidGasLimit { limit: u64, parent: u64, max_delta: u64 },

    #[error("Invalid uncle root: header {header}, computed {computed}")]
    InvalidUncleRoot { header: B256, computed: B256 },

    #[error("Invalid transaction root: header {header}, computed {computed}")]
    InvalidTxRoot { header: B256, computed: B256 },

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("DA submission failed: {0}")]
    DaSubmission(String),

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
