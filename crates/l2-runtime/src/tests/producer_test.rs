//! Block producer turn-taking and follower replication

use std::sync::Arc;

use k256::ecdsa::SigningKey;
use l2_consensus::chain::{Blockchain, TxPool};
use l2_consensus::staking::{
    head_number_seed, ActiveParticipants, ActiveSequencersQuerier, RandomizedActiveSequencers,
};
use l2_consensus::{Validator, WatchTower};

use super::{transfer, Keys};
use crate::da::LocalDaSender;
use crate::genesis::Genesis;
use crate::producer::{BlockProducer, BlockProducerConfig};
use crate::txpool::MemoryTxPool;

fn producer(
    node: &Genesis,
    pool: Arc<MemoryTxPool>,
    da: Arc<LocalDaSender>,
    key: &SigningKey,
) -> BlockProducer {
    let participants = Arc::new(ActiveParticipants::new(
        node.chain.clone(),
        node.executor.clone(),
    ));
    let rotation = Arc::new(RandomizedActiveSequencers::new(
        Arc::new(ActiveSequencersQuerier::new(participants)),
        head_number_seed(node.chain.clone()),
    ));

    BlockProducer::new(
        node.chain.clone(),
        node.executor.clone(),
        pool,
        da,
        rotation,
        key.clone(),
        BlockProducerConfig::default(),
    )
}

#[test]
fn test_one_producer_per_turn() {
    let keys = Keys::new();
    let node = keys.node();
    let pool = Arc::new(MemoryTxPool::new(node.chain.clone()));
    let da = Arc::new(LocalDaSender::new());

    let producers: Vec<BlockProducer> = keys
        .sequencers
        .iter()
        .map(|key| producer(&node, pool.clone(), da.clone(), key))
        .collect();

    for number in 1..=6 {
        let produced: Vec<_> = producers
            .iter()
            .filter_map(|p| p.produce_block().unwrap())
            .collect();
        assert_eq!(produced.len(), 1, "block {} produced by one sequencer", number);
        assert_eq!(produced[0].number(), number);
    }
    assert_eq!(da.height(), 6);
}

#[test]
fn test_follower_replicates_producer() {
    let keys = Keys::new();
    let node = keys.node();
    let follower = keys.node();
    let pool = Arc::new(MemoryTxPool::new(node.chain.clone()));
    let da = Arc::new(LocalDaSender::new());
    let blocks = da.subscribe();

    pool.add_tx(transfer(&keys, 0, 5)).unwrap();
    pool.add_tx(transfer(&keys, 1, 5)).unwrap();

    let producers: Vec<BlockProducer> = keys
        .sequencers
        .iter()
        .map(|key| producer(&node, pool.clone(), da.clone(), key))
        .collect();
    let mut updates = producers[0].subscribe();

    let block = producers
        .iter()
        .find_map(|p| p.produce_block().unwrap())
        .unwrap();
    assert_eq!(block.transactions.len(), 2);
    assert!(pool.is_empty());
    if block.header.miner == producers[0].address() {
        let update = updates.try_recv().unwrap();
        assert_eq!(update.hash, block.hash());
        assert_eq!(update.da_height, 1);
    }

    let received = blocks.try_recv().unwrap();
    assert_eq!(received.hash(), block.hash());

    let validator = Validator::new(follower.chain.clone());
    let watchtower = WatchTower::new(
        follower.chain.clone(),
        follower.executor.clone(),
        keys.watchtower.clone(),
    );
    validator.check(&received).unwrap();
    watchtower.check(&received).unwrap();
    validator.apply(&received).unwrap();

    assert_eq!(follower.chain.header().hash, node.chain.header().hash);
    assert_eq!(follower.chain.header().state_root, block.header.state_root);
}

#[test]
fn test_rejected_transaction_leaves_pool() {
    let keys = Keys::new();
    let node = keys.node();
    let pool = Arc::new(MemoryTxPool::new(node.chain.clone()));
    let da = Arc::new(LocalDaSender::new());

    pool.add_tx(transfer(&keys, 0, 5)).unwrap();
    pool.add_tx(transfer(&keys, 7, 5)).unwrap();

    let producers: Vec<BlockProducer> = keys
        .sequencers
        .iter()
        .map(|key| producer(&node, pool.clone(), da.clone(), key))
        .collect();

    let block = producers
        .iter()
        .find_map(|p| p.produce_block().unwrap())
        .unwrap();
    assert_eq!(block.transactions.len(), 1);
    assert_eq!(block.transactions[0].nonce, 0);
    assert!(pool.is_empty());
    assert_eq!(node.chain.header().hash, block.hash());
}

#[test]
fn test_failed_submission_keeps_pending_transactions() {
    let keys = Keys::new();
    let node = keys.node();
    let pool = Arc::new(MemoryTxPool::new(node.chain.clone()));
    let da = Arc::new(LocalDaSender::new());

    pool.add_tx(transfer(&keys, 0, 5)).unwrap();
    pool.add_tx(transfer(&keys, 1, 5)).unwrap();

    let producers: Vec<BlockProducer> = keys
        .sequencers
        .iter()
        .map(|key| producer(&node, pool.clone(), da.clone(), key))
        .collect();

    da.set_failing(true);
    let failures = producers
        .iter()
        .filter(|p| p.produce_block().is_err())
        .count();
    assert_eq!(failures, 1);
    assert_eq!(pool.len(), 2);
    assert_eq!(node.chain.header().number, 0);

    da.set_failing(false);
    let block = producers
        .iter()
        .find_map(|p| p.produce_block().unwrap())
        .unwrap();
    assert_eq!(block.transactions.len(), 2);
    assert!(pool.is_empty());
}
