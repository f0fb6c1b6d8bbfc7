//! Validator role - checks and applies blocks received from the DA layer
//!
//! Checks are structural and cryptographic only. Transactions are not
//! re-executed here; execution correctness is left to watchtowers and fraud
//! proofs.

use alloy_primitives::{Address, B256};
use std::sync::Arc;

use crate::chain::{Blockchain, SOURCE_AVAIL};
use crate::error::{ConsensusError, Result};
use crate::extra::{get_extra, FRAUD_PROOF_OF};
use crate::seal::address_recover_from_header;
use crate::staking::contract::is_begin_dispute_resolution;
use crate::staking::ActiveParticipantsQuerier;
use crate::types::{calculate_tx_root, calculate_uncle_root, Block, Header, NodeType};

/// Gas limit may move by at most `parent / GAS_LIMIT_BOUND_DIVISOR` per block
pub const GAS_LIMIT_BOUND_DIVISOR: u64 = 1024;

/// Validator node
pub struct Validator {
    blockchain: Arc<dyn Blockchain>,
    /// When set, block signers must be active participants
    participants: Option<Arc<dyn ActiveParticipantsQuerier>>,
}

impl Validator {
    pub fn new(blockchain: Arc<dyn Blockchain>) -> Self {
        Self {
            blockchain,
            participants: None,
        }
    }

    /// Require signers to be active sequencers (or active watchtowers for fraud proofs)
    pub fn with_participants(mut self, participants: Arc<dyn ActiveParticipantsQuerier>) -> Self {
        self.participants = Some(participants);
        self
    }

    /// Verify a block against its stored parent
    pub fn check(&self, block: &Block) -> Result<()> {
        let header = &block.header;

        let signer = address_recover_from_header(header)?;
        if signer != header.miner {
            return Err(ConsensusError::SignerMismatch {
                signer,
                miner: header.miner,
            });
        }
        self.check_authorized(header, signer)?;

        if header.parent_hash.is_zero() {
            return Err(ConsensusError::ZeroParentHash);
        }
        let parent = self
            .blockchain
            .get_header_by_hash(header.parent_hash)
            .ok_or(ConsensusError::ParentNotFound(header.parent_hash))?;
        if parent.hash != header.parent_hash {
            return Err(ConsensusError::ParentHashMismatch {
                claimed: header.parent_hash,
                stored: parent.hash,
            });
        }

        verify_sequence(block, &parent)?;
        verify_gas_limit(header, &parent)?;
        verify_body_roots(block)?;

        Ok(())
    }

    /// Write the block tagged as received from the DA layer; performs no checks
    pub fn apply(&self, block: &Block) -> Result<()> {
        self.blockchain.write_block(block, SOURCE_AVAIL)?;
        tracing::debug!("Applied block {} ({})", block.number(), block.hash());
        Ok(())
    }

    /// Inspect a fraud proof block, returning the disputed block hash
    ///
    /// Proven fraud is only logged; no penalty is applied.
    pub fn process_fraudproof(&self, block: &Block) -> Result<Option<B256>> {
        let extra = get_extra(&block.header)?;
        let Some(target) = extra.get(FRAUD_PROOF_OF) else {
            return Ok(None);
        };

        let target = B256::try_from(target.as_ref())
            .map_err(|_| ConsensusError::InvalidExtra(format!("{} is not a hash", FRAUD_PROOF_OF)))?;
        tracing::warn!(
            "Fraud proof {} from {} disputes block {}",
            block.hash(),
            block.header.miner,
            target
        );
        Ok(Some(target))
    }

    fn check_authorized(&self, header: &Header, signer: Address) -> Result<()> {
        let Some(participants) = &self.participants else {
            return Ok(());
        };

        let authorized = if get_extra(header)?.contains_key(FRAUD_PROOF_OF) {
            participants.contains(signer, NodeType::WatchTower)?
        } else {
            participants.active_sequencers()?.contains(&signer)
        };

        if !authorized {
            return Err(ConsensusError::UnauthorizedSigner(signer));
        }
        Ok(())
    }
}

/// Whether the block opens a dispute resolution
pub fn has_begin_dispute_resolution(block: &Block) -> bool {
    block.transactions.iter().any(is_begin_dispute_resolution)
}

/// Child number must follow the parent; dispute resolution blocks may skip ahead
pub fn verify_sequence(block: &Block, parent: &Header) -> Result<()> {
    let number = block.number();
    let sequential = number == parent.number + 1;
    let dispute_skip = number > parent.number && has_begin_dispute_resolution(block);

    if !sequential && !dispute_skip {
        return Err(ConsensusError::InvalidSequence {
            parent: parent.number,
            block: number,
        });
    }
    Ok(())
}

/// Gas used within the limit; limit within the allowed drift from the parent
pub fn verify_gas_limit(header: &Header, parent: &Header) -> Result<()> {
    if header.gas_used > header.gas_limit {
        return Err(ConsensusError::GasUsedExceedsLimit {
            used: header.gas_used,
            limit: header.gas_limit,
        });
    }

    if header.is_genesis() {
        return Ok(());
    }

    let max_delta = parent.gas_limit / GAS_LIMIT_BOUND_DIVISOR;
    if header.gas_limit.abs_diff(parent.gas_limit) > max_delta {
        return Err(ConsensusError::InvalidGasLimit {
            limit: header.gas_limit,
            parent: parent.gas_limit,
            max_delta,
        });
    }
    Ok(())
}

/// Uncle and transaction roots recomputed from the body
pub fn verify_body_roots(block: &Block) -> Result<()> {
    let uncle_root = calculate_uncle_root(&block.uncles);
    if uncle_root != block.header.sha3_uncles {
        return Err(ConsensusError::InvalidUncleRoot {
            header: block.header.sha3_uncles,
            computed: uncle_root,
        });
    }

    let tx_root = calculate_tx_root(&block.transactions);
    if tx_root != block.header.tx_root {
        return Err(ConsensusError::InvalidTxRoot {
            header: block.header.tx_root,
            computed: tx_root,
        });
    }
    Ok(())
}
