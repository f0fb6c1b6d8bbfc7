//! Dispute resolution lifecycle against the native staking contract

use alloy_primitives::{Address, B256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use l2_consensus::chain::{Blockchain, SOURCE_DISPUTE_RESOLUTION};
use l2_consensus::extra::{get_extra, BEGIN_DISPUTE_RESOLUTION_OF, END_DISPUTE_RESOLUTION_OF};
use l2_consensus::staking::{
    ActiveParticipants, ActiveParticipantsQuerier, ActiveSequencers, ActiveSequencersQuerier,
};
use l2_consensus::events::Subscription;
use l2_consensus::{Block, ConsensusError, DisputeResolution, Header, NodeType, Validator};

use super::Keys;
use crate::chain::MemoryChain;
use crate::da::LocalDaSender;
use crate::genesis::Genesis;

fn dispute(node: &Genesis, da: Arc<LocalDaSender>) -> DisputeResolution {
    DisputeResolution::new(node.chain.clone(), node.executor.clone(), da)
}

#[test]
fn test_begin_then_end_flips_probation() {
    let keys = Keys::new();
    let node = keys.node();
    let da = Arc::new(LocalDaSender::new());
    let dispute = dispute(&node, da.clone());
    let sequencer = keys.sequencer(1);

    assert!(!dispute.contains(sequencer).unwrap());

    let begin = dispute.begin(sequencer, &keys.watchtower).unwrap();
    assert!(dispute.contains(sequencer).unwrap());
    assert_eq!(dispute.get().unwrap(), vec![sequencer]);
    assert_eq!(node.chain.header().hash, begin.hash());
    assert_eq!(
        node.chain.source_of(begin.hash()).as_deref(),
        Some(SOURCE_DISPUTE_RESOLUTION)
    );
    let extra = get_extra(&begin.header).unwrap();
    assert_eq!(
        extra[BEGIN_DISPUTE_RESOLUTION_OF].as_ref(),
        begin.transactions[0].hash().as_slice()
    );

    let end = dispute.end(sequencer, &keys.watchtower).unwrap();
    assert!(!dispute.contains(sequencer).unwrap());
    assert_eq!(end.number(), begin.number() + 1);
    assert_eq!(end.transactions[0].nonce, 1);
    assert!(get_extra(&end.header)
        .unwrap()
        .contains_key(END_DISPUTE_RESOLUTION_OF));

    assert_eq!(da.height(), 2);
}

#[test]
fn test_probation_excluded_from_active_sequencers() {
    let keys = Keys::new();
    let node = keys.node();
    let dispute = dispute(&node, Arc::new(LocalDaSender::new()));

    let participants = Arc::new(ActiveParticipants::new(
        node.chain.clone(),
        node.executor.clone(),
    ));
    let active = ActiveSequencersQuerier::new(participants.clone());
    assert_eq!(active.get().unwrap().len(), 2);

    dispute.begin(keys.sequencer(0), &keys.watchtower).unwrap();

    // still registered, no longer active
    assert!(participants
        .contains(keys.sequencer(0), NodeType::Sequencer)
        .unwrap());
    assert_eq!(active.get().unwrap(), vec![keys.sequencer(1)]);
    assert!(!active.contains(keys.sequencer(0)).unwrap());
}

#[test]
fn test_dispute_block_passes_validator() {
    let keys = Keys::new();
    let sequencer_node = keys.node();
    let follower = keys.node();
    let da = Arc::new(LocalDaSender::new());
    let blocks = da.subscribe();

    let dispute = dispute(&sequencer_node, da);
    dispute.begin(keys.sequencer(1), &keys.sequencers[0]).unwrap();

    let block = blocks.try_recv().unwrap();
    let validator = Validator::new(follower.chain.clone());
    validator.check(&block).unwrap();
    validator.apply(&block).unwrap();
    assert_eq!(follower.chain.header().hash, block.hash());
}

#[test]
fn test_failed_da_submission_writes_nothing() {
    let keys = Keys::new();
    let node = keys.node();
    let da = Arc::new(LocalDaSender::new());
    da.set_failing(true);
    let dispute = dispute(&node, da);
    let head = node.chain.header();

    assert!(matches!(
        dispute.begin(keys.sequencer(0), &keys.watchtower),
        Err(ConsensusError::DaSubmission(_))
    ));
    assert_eq!(node.chain.header().hash, head.hash);
    assert!(!dispute.contains(keys.sequencer(0)).unwrap());
}

#[test]
fn test_reverted_dispute_changes_nothing() {
    let keys = Keys::new();
    let node = keys.node();
    let dispute = dispute(&node, Arc::new(LocalDaSender::new()));

    // not a registered sequencer: the staking call reverts, the block still lands
    let stranger = Address::repeat_byte(0x77);
    let block = dispute.begin(stranger, &keys.watchtower).unwrap();
    assert_eq!(node.chain.header().hash, block.hash());
    assert!(dispute.get().unwrap().is_empty());

    // ending a dispute that was never opened reverts too
    dispute.end(keys.sequencer(0), &keys.watchtower).unwrap();
    assert!(dispute.get().unwrap().is_empty());
}

/// Chain view counting head reads
struct CountingChain {
    inner: Arc<MemoryChain>,
    head_reads: AtomicUsize,
}

impl Blockchain for CountingChain {
    fn header(&self) -> Header {
        self.head_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.header()
    }

    fn get_header_by_hash(&self, hash: B256) -> Option<Header> {
        self.inner.get_header_by_hash(hash)
    }

    fn write_block(&self, block: &Block, source: &str) -> anyhow::Result<()> {
        self.inner.write_block(block, source)
    }

    fn calculate_gas_limit(&self, number: u64) -> anyhow::Result<u64> {
        self.inner.calculate_gas_limit(number)
    }

    fn subscribe_events(&self) -> Subscription {
        self.inner.subscribe_events()
    }

    fn verify_finalized_block(&self, block: &Block) -> anyhow::Result<()> {
        self.inner.verify_finalized_block(block)
    }
}

#[test]
fn test_active_sequencers_read_at_one_head() {
    let keys = Keys::new();
    let node = keys.node();
    dispute(&node, Arc::new(LocalDaSender::new()))
        .begin(keys.sequencer(1), &keys.watchtower)
        .unwrap();

    let chain = Arc::new(CountingChain {
        inner: node.chain.clone(),
        head_reads: AtomicUsize::new(0),
    });
    let participants = ActiveParticipants::new(chain.clone(), node.executor.clone());

    assert_eq!(participants.active_sequencers().unwrap(), vec![keys.sequencer(0)]);
    assert_eq!(chain.head_reads.load(Ordering::SeqCst), 1);
}
