//! Dispute resolution - moves sequencers into and out of probation
//!
//! Both directions are a block on top of the chain head carrying a single
//! staking call. The block is acknowledged by the DA layer before it is
//! written locally, so a block the DA layer refused never lands in storage.

use alloy_primitives::{Address, Bytes};
use k256::ecdsa::SigningKey;
use std::sync::Arc;

use crate::builder::BlockBuilder;
use crate::chain::{Blockchain, DaSender, Executor, SOURCE_DISPUTE_RESOLUTION};
use crate::error::{ConsensusError, Result};
use crate::extra::{BEGIN_DISPUTE_RESOLUTION_OF, END_DISPUTE_RESOLUTION_OF};
use crate::seal::address_from_key;
use crate::staking::contract::{
    begin_dispute_resolution_input, end_dispute_resolution_input, STAKING_CONTRACT_ADDRESS,
};
use crate::staking::{ActiveParticipants, ActiveParticipantsQuerier};
use crate::types::{Block, Header, Transaction};

pub struct DisputeResolution {
    blockchain: Arc<dyn Blockchain>,
    executor: Arc<dyn Executor>,
    da: Arc<dyn DaSender>,
    participants: ActiveParticipants,
}

impl DisputeResolution {
    pub fn new(
        blockchain: Arc<dyn Blockchain>,
        executor: Arc<dyn Executor>,
        da: Arc<dyn DaSender>,
    ) -> Self {
        let participants = ActiveParticipants::new(blockchain.clone(), executor.clone());
        Self {
            blockchain,
            executor,
            da,
            participants,
        }
    }

    /// Sequencers currently in probation
    pub fn get(&self) -> Result<Vec<Address>> {
        self.participants.sequencers_in_probation()
    }

    pub fn contains(&self, address: Address) -> Result<bool> {
        Ok(self.get()?.contains(&address))
    }

    /// Put `sequencer` in probation
    pub fn begin(&self, sequencer: Address, signing_key: &SigningKey) -> Result<Block> {
        tracing::info!("Beginning dispute resolution for sequencer {}", sequencer);
        self.submit(
            begin_dispute_resolution_input(sequencer),
            BEGIN_DISPUTE_RESOLUTION_OF,
            signing_key,
        )
    }

    /// Release `sequencer` from probation
    pub fn end(&self, sequencer: Address, signing_key: &SigningKey) -> Result<Block> {
        tracing::info!("Ending dispute resolution for sequencer {}", sequencer);
        self.submit(
            end_dispute_resolution_input(sequencer),
            END_DISPUTE_RESOLUTION_OF,
            signing_key,
        )
    }

    fn submit(&self, input: Bytes, extra_key: &str, signing_key: &SigningKey) -> Result<Block> {
        let head = self.blockchain.header();
        let signer = address_from_key(signing_key);
        let tx = self.staking_transaction(&head, signer, input, signing_key)?;
        let tx_hash = tx.hash();

        let block = BlockBuilder::from_parent_header(
            self.blockchain.clone(),
            self.executor.clone(),
            head,
        )
        .coinbase(signer)
        .extra(extra_key, Bytes::copy_from_slice(tx_hash.as_slice()))
        .transactions([tx])
        .signing_key(signing_key.clone())
        .build()?;

        let ack = self
            .da
            .send(&block)
            .result()
            .map_err(ConsensusError::DaSubmission)?;
        tracing::debug!(
            "DA acknowledged dispute block {} at height {}",
            ack.block_hash,
            ack.da_height
        );

        self.blockchain
            .write_block(&block, SOURCE_DISPUTE_RESOLUTION)?;
        tracing::info!(
            "Dispute resolution block {} ({}) written, tx {}",
            block.number(),
            block.hash(),
            tx_hash
        );
        Ok(block)
    }

    /// Signed staking call with the signer's nonce at `head`
    fn staking_transaction(
        &self,
        head: &Header,
        signer: Address,
        input: Bytes,
        signing_key: &SigningKey,
    ) -> Result<Transaction> {
        let pending = Header {
            parent_hash: head.hash,
            number: head.number + 1,
            miner: signer,
            gas_limit: head.gas_limit,
            timestamp: head.timestamp,
            ..Default::default()
        };
        let nonce = self
            .executor
            .begin_txn(head.state_root, &pending, signer)?
            .get_nonce(signer);

        Transaction {
            nonce,
            gas: head.gas_limit,
            to: Some(STAKING_CONTRACT_ADDRESS),
            input,
            ..Default::default()
        }
        .sign(signing_key)
    }
}
