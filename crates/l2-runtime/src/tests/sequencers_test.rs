//! Sequencer rotation and the event-driven active sequencer cache

use std::sync::Arc;
use std::time::{Duration, Instant};

use l2_consensus::staking::{
    head_number_seed, ActiveParticipants, ActiveSequencers, ActiveSequencersQuerier,
    CachingActiveSequencers, CachingRandomizedActiveSequencers, RandomizedActiveSequencers,
};
use l2_consensus::chain::{Blockchain, SOURCE_AVAIL};
use l2_consensus::staking::contract::{begin_dispute_resolution_input, STAKING_CONTRACT_ADDRESS};
use l2_consensus::{BlockBuilder, DisputeResolution, Transaction};

use super::Keys;
use crate::da::LocalDaSender;
use crate::genesis::Genesis;

fn active(node: &Genesis) -> Arc<ActiveSequencersQuerier> {
    Arc::new(ActiveSequencersQuerier::new(Arc::new(ActiveParticipants::new(
        node.chain.clone(),
        node.executor.clone(),
    ))))
}

/// Poll `condition` for up to two seconds
fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_cache_refreshes_on_chain_events() {
    let keys = Keys::new();
    let node = keys.node();
    let cache = CachingActiveSequencers::new(node.chain.as_ref(), active(&node));

    // cold cache: contains does not query, get does
    assert!(!cache.contains(keys.sequencer(0)).unwrap());
    assert_eq!(cache.get().unwrap().len(), 2);
    assert!(cache.contains(keys.sequencer(0)).unwrap());

    let dispute = DisputeResolution::new(
        node.chain.clone(),
        node.executor.clone(),
        Arc::new(LocalDaSender::new()),
    );
    dispute.begin(keys.sequencer(0), &keys.watchtower).unwrap();

    assert!(wait_for(|| !cache.contains(keys.sequencer(0)).unwrap()));
    assert_eq!(cache.get().unwrap(), vec![keys.sequencer(1)]);

    cache.shutdown();
}

#[test]
fn test_cache_refreshes_on_reorg() {
    let keys = Keys::new();
    let node = keys.node();
    let genesis = node.chain.header();
    let cache = CachingActiveSequencers::new(node.chain.as_ref(), active(&node));
    assert_eq!(cache.get().unwrap().len(), 2);

    BlockBuilder::from_blockchain_head(node.chain.clone(), node.executor.clone())
        .coinbase(keys.sequencer(0))
        .signing_key(keys.sequencers[0].clone())
        .write(SOURCE_AVAIL)
        .unwrap();

    // competing branch putting sequencer 0 in probation
    let dispute_tx = Transaction {
        gas: genesis.gas_limit,
        to: Some(STAKING_CONTRACT_ADDRESS),
        input: begin_dispute_resolution_input(keys.sequencer(0)),
        ..Default::default()
    }
    .sign(&keys.watchtower)
    .unwrap();
    let side = BlockBuilder::from_parent_header(node.chain.clone(), node.executor.clone(), genesis)
        .coinbase(keys.sequencer(1))
        .transactions([dispute_tx])
        .signing_key(keys.sequencers[1].clone())
        .build()
        .unwrap();
    node.chain.write_block(&side, SOURCE_AVAIL).unwrap();
    assert!(cache.contains(keys.sequencer(0)).unwrap());

    let tip = BlockBuilder::from_parent_header(
        node.chain.clone(),
        node.executor.clone(),
        side.header.clone(),
    )
    .coinbase(keys.sequencer(1))
    .signing_key(keys.sequencers[1].clone())
    .build()
    .unwrap();
    node.chain.write_block(&tip, SOURCE_AVAIL).unwrap();
    assert_eq!(node.chain.header().hash, tip.hash());

    assert!(wait_for(|| !cache.contains(keys.sequencer(0)).unwrap()));
    assert_eq!(cache.get().unwrap(), vec![keys.sequencer(1)]);

    cache.shutdown();
}

#[test]
fn test_rotation_agrees_across_nodes() {
    let keys = Keys::new();
    let a = keys.node();
    let b = keys.node();

    let rotation_a = RandomizedActiveSequencers::new(active(&a), head_number_seed(a.chain.clone()));
    let rotation_b = CachingRandomizedActiveSequencers::new(
        active(&b),
        head_number_seed(b.chain.clone()),
    );

    let order = rotation_a.get().unwrap();
    assert_eq!(order, rotation_b.get().unwrap());
    assert_eq!(order, rotation_a.get().unwrap());
    assert!(rotation_a.contains(keys.sequencer(1)).unwrap());
}
