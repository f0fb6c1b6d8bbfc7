//! Active participant sets read from the staking contract

use alloy_primitives::{Address, Bytes};
use std::sync::Arc;

use crate::chain::{Blockchain, Executor};
use crate::error::Result;
use crate::staking::contract::{self, decode_address_list};
use crate::types::{Header, NodeType};

/// Registered participants per node type
pub trait ActiveParticipantsQuerier: Send + Sync {
    /// Addresses registered as `node_type`
    fn get(&self, node_type: NodeType) -> Result<Vec<Address>>;

    /// Sequencers under an open dispute resolution
    fn sequencers_in_probation(&self) -> Result<Vec<Address>>;

    fn contains(&self, address: Address, node_type: NodeType) -> Result<bool> {
        Ok(self.get(node_type)?.contains(&address))
    }

    /// Registered sequencers not in probation
    fn active_sequencers(&self) -> Result<Vec<Address>> {
        let sequencers = self.get(NodeType::Sequencer)?;
        let probation = self.sequencers_in_probation()?;
        Ok(sequencers
            .into_iter()
            .filter(|address| !probation.contains(address))
            .collect())
    }
}

/// Querier issuing read-only staking calls against the chain head
pub struct ActiveParticipants {
    blockchain: Arc<dyn Blockchain>,
    executor: Arc<dyn Executor>,
}

impl ActiveParticipants {
    pub fn new(blockchain: Arc<dyn Blockchain>, executor: Arc<dyn Executor>) -> Self {
        Self {
            blockchain,
            executor,
        }
    }

    fn query_list(&self, head: &Header, input: Bytes) -> Result<Vec<Address>> {
        let output = contract::query_at(head, self.executor.as_ref(), input)?;
        Ok(decode_address_list(&output)?)
    }
}

impl ActiveParticipantsQuerier for ActiveParticipants {
    fn get(&self, node_type: NodeType) -> Result<Vec<Address>> {
        self.query_list(&self.blockchain.header(), contract::participants_input(node_type))
    }

    fn sequencers_in_probation(&self) -> Result<Vec<Address>> {
        self.query_list(&self.blockchain.header(), contract::probation_input())
    }

    /// Both sets are read at one head
    fn active_sequencers(&self) -> Result<Vec<Address>> {
        let head = self.blockchain.header();
        let sequencers = self.query_list(&head, contract::participants_input(NodeType::Sequencer))?;
        let probation = self.query_list(&head, contract::probation_input())?;
        Ok(sequencers
            .into_iter()
            .filter(|address| !probation.contains(address))
            .collect())
    }
}
