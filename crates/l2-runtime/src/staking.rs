//! Native implementation of the staking contract
//!
//! Calls to `STAKING_CONTRACT_ADDRESS` are dispatched here instead of to a VM.
//! Participants are fixed at genesis; only the probation set changes.

use alloy_primitives::{Address, Bytes};
use l2_consensus::staking::contract::{decode_call, encode_address_list, StakingCalls};
use l2_consensus::staking::ContractError;
use l2_consensus::NodeType;
use serde::{Deserialize, Serialize};

/// Gas charged for a staking call on top of the intrinsic cost
pub const STAKING_CALL_GAS: u64 = 20_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingState {
    pub sequencers: Vec<Address>,
    pub validators: Vec<Address>,
    pub watchtowers: Vec<Address>,
    pub probation: Vec<Address>,
}

impl StakingState {
    pub fn participants(&self, node_type: NodeType) -> &[Address] {
        match node_type {
            NodeType::Sequencer => &self.sequencers,
            NodeType::Validator => &self.validators,
            NodeType::WatchTower => &self.watchtowers,
        }
    }

    /// Execute a staking call, returning ABI encoded output
    pub fn call(&mut self, caller: Address, input: &[u8]) -> Result<Bytes, ContractError> {
        match decode_call(input)? {
            StakingCalls::CurrentSequencers(_) => Ok(encode_address_list(&self.sequencers)),
            StakingCalls::CurrentValidators(_) => Ok(encode_address_list(&self.validators)),
            StakingCalls::CurrentWatchtowers(_) => Ok(encode_address_list(&self.watchtowers)),
            StakingCalls::CurrentSequencersInProbation(_) => {
                Ok(encode_address_list(&self.probation))
            }
            StakingCalls::BeginDisputeResolution(call) => {
                self.begin_dispute_resolution(caller, call.sequencerAddr)?;
                Ok(Bytes::new())
            }
            StakingCalls::EndDisputeResolution(call) => {
                self.end_dispute_resolution(caller, call.sequencerAddr)?;
                Ok(Bytes::new())
            }
        }
    }

    fn begin_dispute_resolution(
        &mut self,
        caller: Address,
        sequencer: Address,
    ) -> Result<(), ContractError> {
        if !self.sequencers.contains(&sequencer) {
            return Err(ContractError::Reverted(format!(
                "{} is not a registered sequencer",
                sequencer
            )));
        }
        if self.probation.contains(&sequencer) {
            return Err(ContractError::Reverted(format!(
                "{} is already in probation",
                sequencer
            )));
        }

        self.probation.push(sequencer);
        tracing::info!("Sequencer {} put in probation by {}", sequencer, caller);
        Ok(())
    }

    fn end_dispute_resolution(
        &mut self,
        caller: Address,
        sequencer: Address,
    ) -> Result<(), ContractError> {
        let Some(index) = self.probation.iter().position(|a| *a == sequencer) else {
            return Err(ContractError::Reverted(format!(
                "{} is not in probation",
                sequencer
            )));
        };

        self.probation.remove(index);
        tracing::info!("Sequencer {} released from probation by {}", sequencer, caller);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use l2_consensus::staking::contract::{
        begin_dispute_resolution_input, decode_address_list, end_dispute_resolution_input,
        probation_input,
    };

    fn state() -> StakingState {
        StakingState {
            sequencers: vec![Address::repeat_byte(1), Address::repeat_byte(2)],
            ..Default::default()
        }
    }

    #[test]
    fn test_dispute_lifecycle() {
        let mut staking = state();
        let caller = Address::repeat_byte(9);
        let sequencer = Address::repeat_byte(2);

        staking
            .call(caller, &begin_dispute_resolution_input(sequencer))
            .unwrap();
        let probation = staking.call(caller, &probation_input()).unwrap();
        assert_eq!(decode_address_list(&probation).unwrap(), vec![sequencer]);

        // second begin reverts
        assert!(matches!(
            staking.call(caller, &begin_dispute_resolution_input(sequencer)),
            Err(ContractError::Reverted(_))
        ));

        staking
            .call(caller, &end_dispute_resolution_input(sequencer))
            .unwrap();
        assert!(staking.probation.is_empty());
    }

    #[test]
    fn test_unregistered_and_unknown_calls() {
        let mut staking = state();
        let caller = Address::repeat_byte(9);

        assert!(matches!(
            staking.call(caller, &begin_dispute_resolution_input(Address::repeat_byte(7))),
            Err(ContractError::Reverted(_))
        ));
        assert!(matches!(
            staking.call(caller, &end_dispute_resolution_input(Address::repeat_byte(1))),
            Err(ContractError::Reverted(_))
        ));
        assert!(matches!(
            staking.call(caller, &[0xaa, 0xbb, 0xcc, 0xdd]),
            Err(ContractError::MethodNotFound(_))
        ));
    }
}
