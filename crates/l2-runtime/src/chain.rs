//! In-memory chain storage
//!
//! Blocks of every branch are kept; the canonical chain follows the highest
//! block seen. Writes publish head, fork and reorg events on the chain's
//! event broker.

use alloy_primitives::B256;
use anyhow::{anyhow, bail, Context};
use dashmap::DashMap;
use l2_consensus::chain::{Blockchain, Executor};
use l2_consensus::events::{BrokerConfig, ChainEvent, EventBroker, EventType, Subscription};
use l2_consensus::seal::address_recover_from_header;
use l2_consensus::types::calculate_receipts_root;
use l2_consensus::validator::{verify_body_roots, verify_gas_limit, verify_sequence};
use l2_consensus::{Block, Header};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Thread-safe in-memory block storage
pub struct MemoryChain {
    /// All blocks by hash, any branch
    blocks: DashMap<B256, Block>,
    /// Provenance tag of every written block
    sources: DashMap<B256, String>,
    /// Canonical block hash per number
    canonical: RwLock<BTreeMap<u64, B256>>,
    head: RwLock<Header>,
    broker: EventBroker,
    executor: Arc<dyn Executor>,
    /// Gas limit the chain drifts toward
    gas_target: u64,
}

impl MemoryChain {
    /// New chain holding only `genesis`
    pub fn new(genesis: Block, executor: Arc<dyn Executor>) -> Self {
        Self::with_config(genesis, executor, BrokerConfig::default())
    }

    pub fn with_config(genesis: Block, executor: Arc<dyn Executor>, broker: BrokerConfig) -> Self {
        let head = genesis.header.clone();
        let mut canonical = BTreeMap::new();
        canonical.insert(head.number, head.hash);

        let blocks = DashMap::new();
        blocks.insert(head.hash, genesis);
        let sources = DashMap::new();
        sources.insert(head.hash, "Genesis".to_string());

        Self {
            blocks,
            sources,
            canonical: RwLock::new(canonical),
            gas_target: head.gas_limit,
            head: RwLock::new(head),
            broker: EventBroker::new(broker),
            executor,
        }
    }

    /// Gas limit new blocks move toward
    pub fn with_gas_target(mut self, gas_target: u64) -> Self {
        self.gas_target = gas_target;
        self
    }

    pub fn get_block_by_hash(&self, hash: B256) -> Option<Block> {
        self.blocks.get(&hash).map(|b| b.value().clone())
    }

    /// Canonical block at `number`
    pub fn get_block_by_number(&self, number: u64) -> Option<Block> {
        let hash = *self.canonical.read().get(&number)?;
        self.get_block_by_hash(hash)
    }

    /// Provenance tag the block was written with
    pub fn source_of(&self, hash: B256) -> Option<String> {
        self.sources.get(&hash).map(|s| s.value().clone())
    }

    /// Stored blocks, all branches
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn is_canonical(&self, hash: B256) -> bool {
        let Some(number) = self.blocks.get(&hash).map(|b| b.number()) else {
            return false;
        };
        self.canonical.read().get(&number) == Some(&hash)
    }

    fn header_of(&self, hash: B256) -> anyhow::Result<Header> {
        self.blocks
            .get(&hash)
            .map(|b| b.header.clone())
            .ok_or_else(|| anyhow!("block {} not found", hash))
    }

    /// Make `header` the head; returns the dropped and added canonical headers
    fn set_head(
        &self,
        canonical: &mut BTreeMap<u64, B256>,
        header: &Header,
    ) -> anyhow::Result<(Vec<Header>, Vec<Header>)> {
        // walk the new branch back to the first canonical ancestor
        let mut new_chain = vec![header.clone()];
        let mut cursor = header.parent_hash;
        let fork_point = loop {
            let ancestor = self.header_of(cursor)?;
            if canonical.get(&ancestor.number) == Some(&ancestor.hash) {
                break ancestor.number + 1;
            }
            cursor = ancestor.parent_hash;
            new_chain.push(ancestor);
        };
        new_chain.reverse();

        let dropped: Vec<u64> = canonical.range(fork_point..).map(|(n, _)| *n).collect();
        let mut old_chain = Vec::with_capacity(dropped.len());
        for number in dropped {
            if let Some(hash) = canonical.remove(&number) {
                old_chain.push(self.header_of(hash)?);
            }
        }

        for h in &new_chain {
            canonical.insert(h.number, h.hash);
        }
        *self.head.write() = header.clone();

        Ok((old_chain, new_chain))
    }

    /// Re-execute the block on its parent state and compare the results
    fn verify_execution(&self, block: &Block, parent: &Header) -> anyhow::Result<()> {
        let header = &block.header;
        let mut transition = self
            .executor
            .begin_txn(parent.state_root, header, header.miner)?;
        for tx in &block.transactions {
            transition
                .write(tx)
                .with_context(|| format!("transaction {} failed", tx.hash()))?;
        }

        if transition.total_gas() != header.gas_used {
            bail!(
                "gas used mismatch: header {}, executed {}",
                header.gas_used,
                transition.total_gas()
            );
        }

        let (receipts, state_root) = transition.commit()?;
        if state_root != header.state_root {
            bail!(
                "state root mismatch: header {}, executed {}",
                header.state_root,
                state_root
            );
        }
        let receipts_root = calculate_receipts_root(&receipts);
        if receipts_root != header.receipts_root {
            bail!(
                "receipts root mismatch: header {}, executed {}",
                header.receipts_root,
                receipts_root
            );
        }
        Ok(())
    }
}

impl Blockchain for MemoryChain {
    fn header(&self) -> Header {
        self.head.read().clone()
    }

    fn get_header_by_hash(&self, hash: B256) -> Option<Header> {
        self.blocks.get(&hash).map(|b| b.header.clone())
    }

    fn write_block(&self, block: &Block, source: &str) -> anyhow::Result<()> {
        let header = &block.header;
        if self.blocks.contains_key(&header.hash) {
            tracing::debug!("Block {} already stored, skipping", header.hash);
            return Ok(());
        }
        if !self.blocks.contains_key(&header.parent_hash) {
            bail!("parent {} of block {} not found", header.parent_hash, header.hash);
        }

        self.blocks.insert(header.hash, block.clone());
        self.sources.insert(header.hash, source.to_string());

        // classify and move the head atomically with respect to other writers
        let (kind, old_chain, new_chain) = {
            let mut canonical = self.canonical.write();
            let head = self.header();
            if header.parent_hash == head.hash {
                let (_, new_chain) = self.set_head(&mut canonical, header)?;
                (EventType::Head, Vec::new(), new_chain)
            } else if header.number > head.number {
                let (old_chain, new_chain) = self.set_head(&mut canonical, header)?;
                tracing::warn!(
                    "Reorg to block {} ({}), dropping {} blocks",
                    header.number,
                    header.hash,
                    old_chain.len()
                );
                (EventType::Reorg, old_chain, new_chain)
            } else {
                tracing::debug!("Side block {} ({}) stored", header.number, header.hash);
                (EventType::Fork, Vec::new(), vec![header.clone()])
            }
        };

        self.broker.publish(ChainEvent {
            old_chain,
            new_chain,
            kind,
            source: source.to_string(),
        });
        Ok(())
    }

    fn calculate_gas_limit(&self, number: u64) -> anyhow::Result<u64> {
        let parent_hash = number
            .checked_sub(1)
            .and_then(|n| self.canonical.read().get(&n).copied())
            .unwrap_or_else(|| self.head.read().hash);
        let parent_limit = self.header_of(parent_hash)?.gas_limit;

        let delta = (parent_limit / 1024).saturating_sub(1);
        let limit = if parent_limit < self.gas_target {
            (parent_limit + delta).min(self.gas_target)
        } else {
            parent_limit.saturating_sub(delta).max(self.gas_target)
        };
        Ok(limit)
    }

    fn subscribe_events(&self) -> Subscription {
        self.broker.subscribe()
    }

    fn verify_finalized_block(&self, block: &Block) -> anyhow::Result<()> {
        let header = &block.header;
        let parent = self
            .get_header_by_hash(header.parent_hash)
            .ok_or_else(|| anyhow!("parent {} not found", header.parent_hash))?;

        let signer = address_recover_from_header(header)?;
        if signer != header.miner {
            bail!("block signed by {}, miner is {}", signer, header.miner);
        }

        verify_sequence(block, &parent)?;
        verify_gas_limit(header, &parent)?;
        verify_body_roots(block)?;
        self.verify_execution(block, &parent)
    }
}
