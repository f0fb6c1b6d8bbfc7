//! Settlement L2 Node
//!
//! Runs a devnet in one process: rotating sequencers produce blocks on their
//! chain and submit them to a local DA layer; a follower chain replays them
//! through the validator and watchtower roles.

use alloy_primitives::{Address, U256};
use anyhow::Result;
use clap::Parser;
use l2_consensus::chain::{Blockchain, TxPool};
use l2_consensus::staking::{
    head_number_seed, ActiveParticipants, ActiveParticipantsQuerier, ActiveSequencers,
    ActiveSequencersQuerier, CachingActiveSequencers, CachingRandomizedActiveSequencers,
};
use l2_consensus::{Transaction, Validator, WatchTower};
use l2_runtime::executor::TX_GAS;
use l2_runtime::{BlockProducer, BlockProducerConfig, Genesis, LocalDaSender, MemoryChain, MemoryTxPool};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod follower;

use config::NodeConfig;
use follower::{forge, Follower};

/// Settlement L2 devnet node
#[derive(Parser, Debug)]
#[command(name = "settlement-node")]
#[command(about = "Optimistic rollup settlement devnet", long_about = None)]
struct Args {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Block time in milliseconds (overrides the config file)
    #[arg(long)]
    block_time_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Stop once the follower reaches this block
    #[arg(long)]
    blocks: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(block_time_ms) = args.block_time_ms {
        config.block_time_ms = block_time_ms;
    }

    run_devnet(config, args.blocks).await
}

async fn run_devnet(config: NodeConfig, blocks: Option<u64>) -> Result<()> {
    tracing::info!("Starting settlement devnet");
    tracing::info!("  Block time: {}ms", config.block_time_ms);
    tracing::info!("  Sequencers: {}", config.sequencer_keys.len());
    if let Some(number) = config.forge_block {
        tracing::info!("  Forging block {} for the follower", number);
    }

    let sequencer_keys = config.sequencer_keys()?;
    let watchtower_key = config.watchtower_key()?;
    let user_key = config.user_key()?;
    let genesis = config.genesis()?;

    // Sequencer side
    let node = Genesis::build(&genesis)?;
    let da = Arc::new(LocalDaSender::new());
    let pool = Arc::new(MemoryTxPool::new(node.chain.clone()));

    let participants = Arc::new(ActiveParticipants::new(
        node.chain.clone(),
        node.executor.clone(),
    ));
    let active = CachingActiveSequencers::new(
        node.chain.as_ref(),
        Arc::new(ActiveSequencersQuerier::new(participants)),
    );
    let rotation: Arc<dyn ActiveSequencers> = Arc::new(CachingRandomizedActiveSequencers::new(
        active.clone(),
        head_number_seed(node.chain.clone()),
    ));

    let producer_config = BlockProducerConfig {
        block_time_ms: config.block_time_ms,
        max_txs_per_block: config.max_txs_per_block,
    };
    let producers: Vec<Arc<BlockProducer>> = sequencer_keys
        .iter()
        .map(|key| {
            Arc::new(BlockProducer::new(
                node.chain.clone(),
                node.executor.clone(),
                pool.clone(),
                da.clone(),
                rotation.clone(),
                key.clone(),
                producer_config.clone(),
            ))
        })
        .collect();
    let producer_handles: Vec<_> = producers
        .iter()
        .map(|producer| tokio::spawn(producer.clone().run_async()))
        .collect();

    // Follower side
    let follower_node = Genesis::build(&genesis)?;
    let follower_participants = Arc::new(ActiveParticipants::new(
        follower_node.chain.clone(),
        follower_node.executor.clone(),
    ));
    let follower = Follower::new(
        follower_node.chain.clone(),
        Validator::new(follower_node.chain.clone()).with_participants(follower_participants.clone()),
        WatchTower::new(
            follower_node.chain.clone(),
            follower_node.executor.clone(),
            watchtower_key,
        ),
    );

    let da_blocks = da.subscribe();
    let forge_block = config.forge_block;
    let follower_handle = tokio::task::spawn_blocking(move || {
        for block in da_blocks {
            if let Err(e) = follower.follow(&block) {
                tracing::error!("Follower failed on block {}: {:#}", block.hash(), e);
            }
            if forge_block == Some(block.number()) {
                match forge(&block, &sequencer_keys) {
                    Ok(forged) => {
                        if let Err(e) = follower.follow(&forged) {
                            tracing::error!("Follower failed on forged block: {:#}", e);
                        }
                    }
                    Err(e) => tracing::warn!("Could not forge block {}: {}", block.number(), e),
                }
            }
        }
        tracing::info!("Follower stopped");
    });

    // Demo traffic
    let traffic_pool = pool.clone();
    let block_time = Duration::from_millis(config.block_time_ms);
    let traffic_handle = tokio::spawn(async move {
        let mut nonce = 0u64;
        let mut interval = tokio::time::interval(block_time);
        loop {
            interval.tick().await;
            let tx = Transaction {
                nonce,
                gas: TX_GAS,
                to: Some(Address::repeat_byte(0xee)),
                value: U256::from(1u64),
                ..Default::default()
            };
            match tx.sign(&user_key) {
                Ok(tx) => match traffic_pool.add_tx(tx) {
                    Ok(()) => nonce += 1,
                    Err(e) => tracing::warn!("Demo transfer rejected: {}", e),
                },
                Err(e) => {
                    tracing::error!("Failed to sign demo transfer: {}", e);
                    break;
                }
            }
        }
    });

    tracing::info!("Devnet running. Press Ctrl+C to stop.");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down...");
        }
        _ = wait_for_block(follower_node.chain.clone(), blocks) => {
            tracing::info!("Reached block {}, shutting down...", blocks.unwrap_or_default());
        }
    }

    for producer in &producers {
        producer.stop();
    }
    for handle in producer_handles {
        let _ = handle.await;
    }
    traffic_handle.abort();

    let da_handle = da.clone();
    tokio::task::spawn_blocking(move || da_handle.shutdown()).await?;
    let _ = follower_handle.await;
    active.shutdown();

    let probation = follower_participants.sequencers_in_probation()?;
    tracing::info!(
        "Sequencer head {} ({}), follower head {} ({}), DA height {}",
        node.chain.header().number,
        node.chain.header().hash,
        follower_node.chain.header().number,
        follower_node.chain.header().hash,
        da.height()
    );
    if !probation.is_empty() {
        tracing::info!("Sequencers in probation on the follower: {:?}", probation);
    }

    Ok(())
}

/// Resolve once `chain` reaches `target`; never without one
async fn wait_for_block(chain: Arc<MemoryChain>, target: Option<u64>) {
    let Some(target) = target else {
        return std::future::pending().await;
    };

    let mut interval = tokio::time::interval(Duration::from_millis(50));
    while chain.header().number < target {
        interval.tick().await;
    }
}
