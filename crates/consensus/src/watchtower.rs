//! WatchTower role - fully verifies blocks and challenges malicious ones

use alloy_primitives::{Address, Bytes};
use k256::ecdsa::SigningKey;
use std::sync::Arc;

use crate::builder::BlockBuilder;
use crate::chain::{Blockchain, Executor, TxPool, SOURCE_WATCHTOWER};
use crate::error::{ConsensusError, Result};
use crate::extra::{BEGIN_DISPUTE_RESOLUTION_OF, FRAUD_PROOF_OF};
use crate::seal::address_from_key;
use crate::staking::contract::{begin_dispute_resolution_input, STAKING_CONTRACT_ADDRESS};
use crate::types::{Block, Header, Transaction};

/// Watchtower node
pub struct WatchTower {
    blockchain: Arc<dyn Blockchain>,
    executor: Arc<dyn Executor>,
    txpool: Option<Arc<dyn TxPool>>,
    signing_key: SigningKey,
    address: Address,
}

impl WatchTower {
    pub fn new(
        blockchain: Arc<dyn Blockchain>,
        executor: Arc<dyn Executor>,
        signing_key: SigningKey,
    ) -> Self {
        let address = address_from_key(&signing_key);
        Self {
            blockchain,
            executor,
            txpool: None,
            signing_key,
            address,
        }
    }

    /// Submit dispute transactions to `txpool` as well as embedding them
    pub fn with_txpool(mut self, txpool: Arc<dyn TxPool>) -> Self {
        self.txpool = Some(txpool);
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Full verification, delegated to the chain
    pub fn check(&self, block: &Block) -> Result<()> {
        self.blockchain.verify_finalized_block(block)?;
        Ok(())
    }

    /// Write the block and purge pool transactions it invalidates
    pub fn apply(&self, block: &Block) -> Result<()> {
        self.blockchain.write_block(block, SOURCE_WATCHTOWER)?;
        if let Some(txpool) = &self.txpool {
            txpool.reset_with_headers(std::slice::from_ref(&block.header));
        }
        tracing::debug!("WatchTower applied block {} ({})", block.number(), block.hash());
        Ok(())
    }

    /// Build a block forking off before `malicious`, opening a dispute
    /// resolution against its miner
    ///
    /// The block is returned unsubmitted.
    pub fn construct_fraudproof(&self, malicious: &Block) -> Result<Block> {
        let parent = self
            .blockchain
            .get_header_by_hash(malicious.parent_hash())
            .ok_or(ConsensusError::ParentNotFound(malicious.parent_hash()))?;

        let pending = Header {
            parent_hash: parent.hash,
            number: parent.number + 1,
            miner: self.address,
            gas_limit: malicious.header.gas_limit,
            timestamp: parent.timestamp,
            ..Default::default()
        };
        let transition = self
            .executor
            .begin_txn(parent.state_root, &pending, self.address)?;

        let dispute_tx = Transaction {
            nonce: transition.get_nonce(self.address),
            gas: malicious.header.gas_limit,
            to: Some(STAKING_CONTRACT_ADDRESS),
            input: begin_dispute_resolution_input(malicious.header.miner),
            ..Default::default()
        }
        .sign(&self.signing_key)?;
        drop(transition);

        if let Some(txpool) = &self.txpool {
            txpool.add_tx(dispute_tx.clone())?;
        }

        let dispute_hash = dispute_tx.hash();
        let block = BlockBuilder::from_parent_header(
            self.blockchain.clone(),
            self.executor.clone(),
            parent,
        )
        .coinbase(self.address)
        .extra(FRAUD_PROOF_OF, Bytes::copy_from_slice(malicious.hash().as_slice()))
        .extra(BEGIN_DISPUTE_RESOLUTION_OF, Bytes::copy_from_slice(dispute_hash.as_slice()))
        .transactions([dispute_tx])
        .signing_key(self.signing_key.clone())
        .build()?;

        tracing::error!(
            "Constructed fraud proof {} against block {} by {}",
            block.hash(),
            malicious.hash(),
            malicious.header.miner
        );
        Ok(block)
    }
}
