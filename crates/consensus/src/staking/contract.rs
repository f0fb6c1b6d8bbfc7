//! Typed binding for the staking contract

use alloy_primitives::{address, hex, Address, Bytes};
use alloy_sol_types::{sol, SolCall, SolInterface};
use thiserror::Error;

use crate::chain::{Blockchain, Executor};
use crate::error::Result;
use crate::types::{Header, NodeType, Transaction};

/// Address the staking contract is deployed at
pub const STAKING_CONTRACT_ADDRESS: Address = address!("0110000000000000000000000000000000000001");

/// Gas allowance of read-only staking calls
pub const QUERY_GAS: u64 = 1_000_000;

sol! {
    interface Staking {
        function CurrentSequencers() external view returns (address[] memory);
        function CurrentValidators() external view returns (address[] memory);
        function CurrentWatchtowers() external view returns (address[] memory);
        function CurrentSequencersInProbation() external view returns (address[] memory);
        function BeginDisputeResolution(address sequencerAddr) external;
        function EndDisputeResolution(address sequencerAddr) external;
    }
}

pub use Staking::StakingCalls;

/// Staking contract call failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("Staking contract method not found: {0}")]
    MethodNotFound(String),

    #[error("Staking contract call reverted: {0}")]
    Reverted(String),

    #[error("Failed to decode staking contract data: {0}")]
    Decode(String),
}

/// Calldata of the participant list view for `node_type`
pub fn participants_input(node_type: NodeType) -> Bytes {
    match node_type {
        NodeType::Sequencer => Staking::CurrentSequencersCall {}.abi_encode(),
        NodeType::Validator => Staking::CurrentValidatorsCall {}.abi_encode(),
        NodeType::WatchTower => Staking::CurrentWatchtowersCall {}.abi_encode(),
    }
    .into()
}

/// Calldata of the probation set view
pub fn probation_input() -> Bytes {
    Staking::CurrentSequencersInProbationCall {}.abi_encode().into()
}

pub fn begin_dispute_resolution_input(sequencer: Address) -> Bytes {
    Staking::BeginDisputeResolutionCall {
        sequencerAddr: sequencer,
    }
    .abi_encode()
    .into()
}

pub fn end_dispute_resolution_input(sequencer: Address) -> Bytes {
    Staking::EndDisputeResolutionCall {
        sequencerAddr: sequencer,
    }
    .abi_encode()
    .into()
}

/// Whether `tx` opens a dispute resolution
pub fn is_begin_dispute_resolution(tx: &Transaction) -> bool {
    tx.to == Some(STAKING_CONTRACT_ADDRESS)
        && tx
            .input
            .starts_with(&Staking::BeginDisputeResolutionCall::SELECTOR)
}

/// Decode staking calldata into a typed call
pub fn decode_call(input: &[u8]) -> std::result::Result<StakingCalls, ContractError> {
    if input.len() < 4 {
        return Err(ContractError::MethodNotFound(format!(
            "calldata too short ({} bytes)",
            input.len()
        )));
    }

    let mut selector = [0u8; 4];
    selector.copy_from_slice(&input[..4]);
    if !StakingCalls::valid_selector(selector) {
        return Err(ContractError::MethodNotFound(hex::encode_prefixed(selector)));
    }

    StakingCalls::abi_decode(input, true).map_err(|e| ContractError::Decode(e.to_string()))
}

/// ABI encoding of an `address[]` view result
pub fn encode_address_list(addresses: &[Address]) -> Bytes {
    Staking::CurrentSequencersCall::abi_encode_returns(&(addresses.to_vec(),)).into()
}

/// Decode an `address[]` view result
pub fn decode_address_list(output: &[u8]) -> std::result::Result<Vec<Address>, ContractError> {
    Staking::CurrentSequencersCall::abi_decode_returns(output, true)
        .map(|ret| ret._0)
        .map_err(|e| ContractError::Decode(e.to_string()))
}

/// Read-only staking call against the current chain head
pub fn query(blockchain: &dyn Blockchain, executor: &dyn Executor, input: Bytes) -> Result<Bytes> {
    query_at(&blockchain.header(), executor, input)
}

/// Read-only staking call against the state of `head`
///
/// Opens a throwaway transition for the block after `head` and discards it.
pub fn query_at(head: &Header, executor: &dyn Executor, input: Bytes) -> Result<Bytes> {
    let pending = Header {
        parent_hash: head.hash,
        number: head.number + 1,
        miner: head.miner,
        gas_limit: head.gas_limit,
        timestamp: head.timestamp,
        ..Default::default()
    };

    let mut transition = executor.begin_txn(head.state_root, &pending, head.miner)?;
    let tx = Transaction {
        nonce: transition.get_nonce(Address::ZERO),
        gas: QUERY_GAS,
        to: Some(STAKING_CONTRACT_ADDRESS),
        input,
        ..Default::default()
    };

    let result = transition.apply(&tx)?;
    if let Some(reason) = result.err {
        return Err(ContractError::Reverted(reason).into());
    }
    Ok(result.return_value)
}
