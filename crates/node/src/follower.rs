//! Follower - replays DA blocks through the validator and watchtower roles

use alloy_primitives::B256;
use anyhow::{anyhow, Result};
use k256::ecdsa::SigningKey;
use l2_consensus::chain::Blockchain;
use l2_consensus::seal::{address_from_key, write_seal};
use l2_consensus::{Block, Validator, WatchTower};
use l2_runtime::MemoryChain;
use std::sync::Arc;

pub struct Follower {
    chain: Arc<MemoryChain>,
    validator: Validator,
    watchtower: WatchTower,
}

impl Follower {
    pub fn new(chain: Arc<MemoryChain>, validator: Validator, watchtower: WatchTower) -> Self {
        Self {
            chain,
            validator,
            watchtower,
        }
    }

    /// Check a block from the DA layer and apply it, or answer it with a fraud proof
    pub fn follow(&self, block: &Block) -> Result<()> {
        if self.chain.get_header_by_hash(block.hash()).is_some() {
            return Ok(());
        }

        if let Err(e) = self.validator.check(block) {
            tracing::error!("Rejected block {} ({}): {}", block.number(), block.hash(), e);
            return Ok(());
        }
        self.validator.process_fraudproof(block)?;

        if let Err(e) = self.watchtower.check(block) {
            tracing::error!(
                "Block {} ({}) by {} failed verification: {:#}",
                block.number(),
                block.hash(),
                block.header.miner,
                e
            );
            let proof = self.watchtower.construct_fraudproof(block)?;
            self.validator.process_fraudproof(&proof)?;
            self.watchtower.apply(&proof)?;
            return Ok(());
        }

        self.validator.apply(block)?;
        tracing::debug!("Follower at block {} ({})", block.number(), block.hash());
        Ok(())
    }
}

/// Copy of `block` with a forged state root, resealed by its own miner
pub fn forge(block: &Block, sequencer_keys: &[SigningKey]) -> Result<Block> {
    let key = sequencer_keys
        .iter()
        .find(|key| address_from_key(key) == block.header.miner)
        .ok_or_else(|| anyhow!("no key for miner {}", block.header.miner))?;

    let mut forged = block.clone();
    forged.header.state_root = B256::repeat_byte(0xff);
    forged.header = write_seal(key, &forged.header)?;
    forged.header.compute_hash();
    Ok(forged)
}
