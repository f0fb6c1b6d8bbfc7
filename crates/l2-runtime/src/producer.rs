//! Block Producer - sequencer loop
//!
//! On every tick the producer checks whether this node owns the turn for the
//! next block. If so it picks the pending transactions the head state
//! accepts, builds and seals a block, waits for the DA layer to acknowledge
//! it and writes it locally. Transactions leave the pool once their block is
//! written, or when the head state rejects them.

use alloy_primitives::{Address, B256};
use anyhow::Context;
use k256::ecdsa::SigningKey;
use l2_consensus::chain::{Blockchain, DaSender, Executor, TxPool, SOURCE_AVAIL};
use l2_consensus::seal::address_from_key;
use l2_consensus::staking::{select_sequencer, ActiveSequencers};
use l2_consensus::{Block, BlockBuilder, Header, Transaction};
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::broadcast;

use crate::{chain::MemoryChain, executor::StateExecutor, txpool::MemoryTxPool};
use crate::{BLOCK_TIME_MS, MAX_TXS_PER_BLOCK};

/// Block update event sent to subscribers
#[derive(Clone, Debug)]
pub struct BlockUpdate {
    pub number: u64,
    pub hash: B256,
    pub transaction_count: usize,
    pub gas_used: u64,
    /// Height the DA layer acknowledged the block at
    pub da_height: u64,
    /// Block production time in microseconds
    pub processing_time_us: u64,
}

/// Block producer configuration
#[derive(Clone, Debug)]
pub struct BlockProducerConfig {
    pub block_time_ms: u64,
    pub max_txs_per_block: usize,
}

impl Default for BlockProducerConfig {
    fn default() -> Self {
        Self {
            block_time_ms: BLOCK_TIME_MS,
            max_txs_per_block: MAX_TXS_PER_BLOCK,
        }
    }
}

/// Sequencer block producer
pub struct BlockProducer {
    chain: Arc<MemoryChain>,
    executor: Arc<StateExecutor>,
    txpool: Arc<MemoryTxPool>,
    da: Arc<dyn DaSender>,
    /// Active sequencers in rotation order
    rotation: Arc<dyn ActiveSequencers>,
    signing_key: SigningKey,
    address: Address,
    update_sender: broadcast::Sender<BlockUpdate>,
    config: BlockProducerConfig,
    running: Arc<AtomicBool>,
}

impl BlockProducer {
    pub fn new(
        chain: Arc<MemoryChain>,
        executor: Arc<StateExecutor>,
        txpool: Arc<MemoryTxPool>,
        da: Arc<dyn DaSender>,
        rotation: Arc<dyn ActiveSequencers>,
        signing_key: SigningKey,
        config: BlockProducerConfig,
    ) -> Self {
        let (update_sender, _) = broadcast::channel(64);
        let address = address_from_key(&signing_key);

        Self {
            chain,
            executor,
            txpool,
            da,
            rotation,
            signing_key,
            address,
            update_sender,
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Subscribe to produced blocks
    pub fn subscribe(&self) -> broadcast::Receiver<BlockUpdate> {
        self.update_sender.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether this node owns the turn for block `number`
    pub fn is_my_turn(&self, number: u64) -> anyhow::Result<bool> {
        let order = self.rotation.get()?;
        Ok(select_sequencer(&order, number) == Some(self.address))
    }

    /// Produce the next block if it is our turn
    pub fn produce_block(&self) -> anyhow::Result<Option<Block>> {
        let tick_start = Instant::now();
        let head = self.chain.header();
        let number = head.number + 1;

        if !self.is_my_turn(number)? {
            tracing::trace!("Block {} is not ours to produce", number);
            return Ok(None);
        }

        let gas_limit = if head.is_genesis() {
            head.gas_limit
        } else {
            self.chain.calculate_gas_limit(number)?
        };
        let transactions = self.select_transactions(&head, gas_limit)?;

        let block = BlockBuilder::from_parent_header(
            self.chain.clone(),
            self.executor.clone(),
            head,
        )
        .coinbase(self.address)
        .gas_limit(gas_limit)
        .transactions(transactions)
        .signing_key(self.signing_key.clone())
        .build()?;

        let ack = self
            .da
            .send(&block)
            .result()
            .map_err(|e| anyhow::anyhow!("DA submission of block {} failed: {}", block.hash(), e))?;

        self.chain.write_block(&block, SOURCE_AVAIL)?;
        self.txpool.reset_with_headers(std::slice::from_ref(&block.header));

        let processing_time = tick_start.elapsed();
        let update = BlockUpdate {
            number: block.number(),
            hash: block.hash(),
            transaction_count: block.transactions.len(),
            gas_used: block.header.gas_used,
            da_height: ack.da_height,
            processing_time_us: processing_time.as_micros() as u64,
        };
        // no subscribers is fine
        let _ = self.update_sender.send(update);

        tracing::debug!(
            "Block {} | {} txs | {:.2}ms",
            block.number(),
            block.transactions.len(),
            processing_time.as_secs_f64() * 1000.0
        );
        Ok(Some(block))
    }

    /// Pending transactions that apply on top of `head`, in pool order
    ///
    /// Transactions the head state rejects are evicted from the pool. Those
    /// that only miss the gas limit wait for a later block.
    fn select_transactions(&self, head: &Header, gas_limit: u64) -> anyhow::Result<Vec<Transaction>> {
        let header = Header {
            number: head.number + 1,
            gas_limit,
            ..Default::default()
        };
        let mut transition = self
            .executor
            .begin_txn(head.state_root, &header, self.address)
            .context("failed to open transition at head")?;

        let mut selected = Vec::new();
        let mut rejected = Vec::new();
        let mut deferred = HashSet::new();
        for tx in self.txpool.peek(self.config.max_txs_per_block) {
            if deferred.contains(&tx.from) {
                continue;
            }
            let mut candidate = tx.clone();
            if candidate.nonce == 0 {
                candidate.nonce = transition.get_nonce(candidate.from);
            }

            let gas_before = transition.total_gas();
            match transition.write(&candidate) {
                Ok(()) => selected.push(tx),
                // fits an emptier block
                Err(e) if gas_before > 0 && gas_before + candidate.gas > gas_limit => {
                    tracing::trace!("Transaction {} deferred: {:#}", tx.hash(), e);
                    deferred.insert(tx.from);
                }
                Err(e) => {
                    tracing::warn!("Dropping transaction {}: {:#}", tx.hash(), e);
                    rejected.push(tx.hash());
                }
            }
        }

        if !rejected.is_empty() {
            self.txpool.remove(&rejected);
        }
        Ok(selected)
    }

    /// Run the block producer (blocking)
    ///
    /// This should be spawned on a dedicated thread.
    pub fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        let block_duration = Duration::from_millis(self.config.block_time_ms);

        tracing::info!(
            "Block producer {} started ({}ms blocks)",
            self.address,
            self.config.block_time_ms
        );

        while self.running.load(Ordering::SeqCst) {
            let tick_start = Instant::now();
            self.tick();

            let elapsed = tick_start.elapsed();
            if elapsed > block_duration {
                tracing::warn!(
                    "Block production took {:.2}ms (target: {}ms)",
                    elapsed.as_secs_f64() * 1000.0,
                    self.config.block_time_ms
                );
            }
            if let Some(sleep_time) = block_duration.checked_sub(elapsed) {
                std::thread::sleep(sleep_time);
            }
        }

        tracing::info!("Block producer stopped at block {}", self.chain.header().number);
    }

    /// Run the block producer asynchronously (tokio)
    ///
    /// Production itself blocks on DA acknowledgements, so each tick runs on
    /// the blocking pool.
    pub async fn run_async(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);

        let mut interval = tokio::time::interval(Duration::from_millis(self.config.block_time_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            "Block producer {} started ({}ms blocks)",
            self.address,
            self.config.block_time_ms
        );

        while self.running.load(Ordering::SeqCst) {
            interval.tick().await;
            let producer = self.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || producer.tick()).await {
                tracing::error!("Block production task failed: {}", e);
                break;
            }
        }

        tracing::info!("Block producer stopped");
    }

    fn tick(&self) {
        if let Err(e) = self.produce_block() {
            tracing::error!("Failed to produce block: {:#}", e);
        }
    }
}
