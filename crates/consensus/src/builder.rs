//! Block builder
//!
//! Setters only record values; every failure (missing parent, missing key,
//! rejected transaction) surfaces from [`BlockBuilder::build`], which either
//! returns a complete sealed block or nothing.

use alloy_primitives::{Address, Bytes, B256};
use anyhow::Context;
use k256::ecdsa::SigningKey;
use std::sync::Arc;

use crate::chain::{Blockchain, Executor};
use crate::error::{ConsensusError, Result};
use crate::extra::{assign_extra_validators, encode_extra, ExtraMap};
use crate::seal::write_seal;
use crate::types::{
    calculate_receipts_root, calculate_tx_root, calculate_uncle_root, Block, Header, Transaction,
};

/// Assembles, executes and seals a block on top of a parent header
pub struct BlockBuilder {
    blockchain: Arc<dyn Blockchain>,
    executor: Arc<dyn Executor>,
    parent: Result<Header>,
    number: Option<u64>,
    coinbase: Option<Address>,
    difficulty: Option<u64>,
    extra: ExtraMap,
    gas_limit: Option<u64>,
    parent_state_root: Option<B256>,
    transactions: Vec<Transaction>,
    signing_key: Option<SigningKey>,
}

impl BlockBuilder {
    fn with_parent(
        blockchain: Arc<dyn Blockchain>,
        executor: Arc<dyn Executor>,
        parent: Result<Header>,
    ) -> Self {
        Self {
            blockchain,
            executor,
            parent,
            number: None,
            coinbase: None,
            difficulty: None,
            extra: ExtraMap::new(),
            gas_limit: None,
            parent_state_root: None,
            transactions: Vec::new(),
            signing_key: None,
        }
    }

    /// Build on the stored block with `hash`
    pub fn from_parent_hash(
        blockchain: Arc<dyn Blockchain>,
        executor: Arc<dyn Executor>,
        hash: B256,
    ) -> Self {
        let parent = blockchain
            .get_header_by_hash(hash)
            .ok_or(ConsensusError::ParentNotFound(hash));
        Self::with_parent(blockchain, executor, parent)
    }

    /// Build on the current chain head
    pub fn from_blockchain_head(blockchain: Arc<dyn Blockchain>, executor: Arc<dyn Executor>) -> Self {
        let head = blockchain.header();
        Self::with_parent(blockchain, executor, Ok(head))
    }

    /// Build on `parent`
    pub fn from_parent_header(
        blockchain: Arc<dyn Blockchain>,
        executor: Arc<dyn Executor>,
        parent: Header,
    ) -> Self {
        Self::with_parent(blockchain, executor, Ok(parent))
    }

    /// Defaults to parent number + 1
    pub fn block_number(mut self, number: u64) -> Self {
        self.number = Some(number);
        self
    }

    /// Defaults to the parent's miner
    pub fn coinbase(mut self, coinbase: Address) -> Self {
        self.coinbase = Some(coinbase);
        self
    }

    pub fn difficulty(mut self, difficulty: u64) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    /// Set a sidecar entry
    pub fn extra(mut self, key: &str, value: impl Into<Bytes>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// Zero keeps the automatic gas limit
    pub fn gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    /// Defaults to the parent's state root
    pub fn parent_state_root(mut self, root: B256) -> Self {
        self.parent_state_root = Some(root);
        self
    }

    /// Queue transactions, applied in insertion order
    pub fn transactions(mut self, transactions: impl IntoIterator<Item = Transaction>) -> Self {
        self.transactions.extend(transactions);
        self
    }

    pub fn signing_key(mut self, key: SigningKey) -> Self {
        self.signing_key = Some(key);
        self
    }

    /// Execute the queued transactions and seal the block
    pub fn build(self) -> Result<Block> {
        let key = self.signing_key.ok_or(ConsensusError::MissingSigningKey)?;
        let parent = self.parent?;

        let coinbase = self.coinbase.unwrap_or(parent.miner);
        let number = self.number.unwrap_or(parent.number + 1);
        let parent_state_root = self.parent_state_root.unwrap_or(parent.state_root);

        let mut header = Header {
            parent_hash: parent.hash,
            sha3_uncles: calculate_uncle_root(&[]),
            miner: coinbase,
            difficulty: self.difficulty.unwrap_or(0),
            number,
            gas_limit: self.gas_limit.unwrap_or(0),
            timestamp: chrono::Utc::now().timestamp().max(0) as u64,
            extra_data: encode_extra(&self.extra),
            ..Default::default()
        };

        if header.gas_limit == 0 && parent.is_genesis() {
            header.gas_limit = parent.gas_limit;
        }
        if header.gas_limit == 0 {
            header.gas_limit = self.blockchain.calculate_gas_limit(number)?;
        }

        let mut transition = self
            .executor
            .begin_txn(parent_state_root, &header, coinbase)?;

        let mut transactions = Vec::with_capacity(self.transactions.len());
        for mut tx in self.transactions {
            if tx.nonce == 0 {
                tx.nonce = transition.get_nonce(tx.from);
            }
            transition
                .write(&tx)
                .with_context(|| format!("failed to write transaction {}", tx.hash()))?;
            transactions.push(tx);
        }

        header.gas_used = transition.total_gas();
        let (receipts, state_root) = transition.commit()?;
        header.state_root = state_root;
        header.tx_root = calculate_tx_root(&transactions);
        header.receipts_root = calculate_receipts_root(&receipts);

        // single signer: the coinbase is the only declared validator
        assign_extra_validators(&mut header, &[coinbase])?;
        let mut header = write_seal(&key, &header)?;
        header.compute_hash();

        tracing::debug!(
            "Built block {} ({}) with {} txs, gas {}/{}",
            header.number,
            header.hash,
            transactions.len(),
            header.gas_used,
            header.gas_limit
        );

        Ok(Block {
            header,
            transactions,
            uncles: Vec::new(),
        })
    }

    /// Build and write the block to the chain, tagged with `source`
    pub fn write(self, source: &str) -> Result<Block> {
        let blockchain = self.blockchain.clone();
        let block = self.build()?;
        blockchain.write_block(&block, source)?;

        tracing::info!("Wrote block {} ({}) from {}", block.number(), block.hash(), source);
        Ok(block)
    }
}
