//! Pending transaction pool

use alloy_primitives::B256;
use anyhow::{bail, Context};
use l2_consensus::chain::TxPool;
use l2_consensus::{Header, Transaction};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

use crate::chain::MemoryChain;

/// Default pool capacity
pub const DEFAULT_POOL_CAPACITY: usize = 4096;

/// FIFO pool of pending transactions
///
/// Purged by looking up the bodies of newly written blocks on `chain`.
pub struct MemoryTxPool {
    chain: Arc<MemoryChain>,
    pending: Mutex<Vec<Transaction>>,
    capacity: usize,
}

impl MemoryTxPool {
    pub fn new(chain: Arc<MemoryChain>) -> Self {
        Self::with_capacity(chain, DEFAULT_POOL_CAPACITY)
    }

    pub fn with_capacity(chain: Arc<MemoryChain>, capacity: usize) -> Self {
        Self {
            chain,
            pending: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Up to `max` transactions, oldest first, left in the pool
    pub fn peek(&self, max: usize) -> Vec<Transaction> {
        self.pending.lock().iter().take(max).cloned().collect()
    }

    /// Drop the transactions with the given hashes
    pub fn remove(&self, hashes: &[B256]) {
        self.pending.lock().retain(|tx| !hashes.contains(&tx.hash()));
    }

    pub fn pending(&self) -> Vec<Transaction> {
        self.pending.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl TxPool for MemoryTxPool {
    fn add_tx(&self, tx: Transaction) -> anyhow::Result<()> {
        let sender = tx.recover_sender().context("invalid transaction signature")?;
        if sender != tx.from {
            bail!("signature recovers to {}, transaction claims {}", sender, tx.from);
        }

        let mut pending = self.pending.lock();
        if pending.len() >= self.capacity {
            bail!("transaction pool full ({} pending)", pending.len());
        }
        let hash = tx.hash();
        if pending.iter().any(|p| p.hash() == hash) {
            bail!("transaction {} already pending", hash);
        }

        pending.push(tx);
        tracing::debug!("Transaction {} added to pool", hash);
        Ok(())
    }

    fn reset_with_headers(&self, headers: &[Header]) {
        let included: HashSet<B256> = headers
            .iter()
            .filter_map(|h| self.chain.get_block_by_hash(h.hash))
            .flat_map(|b| b.transactions.into_iter().map(|tx| tx.hash()))
            .collect();
        if included.is_empty() {
            return;
        }

        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|tx| !included.contains(&tx.hash()));
        if pending.len() != before {
            tracing::debug!("Purged {} included transactions from pool", before - pending.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::{Genesis, GenesisConfig};
    use alloy_primitives::{Address, U256};
    use k256::ecdsa::SigningKey;

    fn pool(capacity: usize) -> MemoryTxPool {
        let node = Genesis::build(&GenesisConfig::default()).unwrap();
        MemoryTxPool::with_capacity(node.chain, capacity)
    }

    fn transfer(nonce: u64) -> Transaction {
        Transaction {
            nonce,
            gas: 21_000,
            to: Some(Address::repeat_byte(0xbb)),
            value: U256::from(1u64),
            ..Default::default()
        }
        .sign(&SigningKey::from_slice(&[3u8; 32]).unwrap())
        .unwrap()
    }

    #[test]
    fn test_rejects_forged_sender() {
        let pool = pool(8);
        let mut tx = transfer(0);
        tx.from = Address::repeat_byte(0x01);
        assert!(pool.add_tx(tx).is_err());

        let unsigned = Transaction {
            from: Address::repeat_byte(0x01),
            ..Default::default()
        };
        assert!(pool.add_tx(unsigned).is_err());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_capacity_and_duplicates() {
        let pool = pool(2);
        pool.add_tx(transfer(0)).unwrap();
        assert!(pool.add_tx(transfer(0)).is_err());
        pool.add_tx(transfer(1)).unwrap();
        assert!(pool.add_tx(transfer(2)).is_err());
    }

    #[test]
    fn test_peek_leaves_transactions_pending() {
        let pool = pool(8);
        for nonce in 0..3 {
            pool.add_tx(transfer(nonce)).unwrap();
        }

        let first = pool.peek(2);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].nonce, 0);
        assert_eq!(pool.len(), 3);

        pool.remove(&[first[0].hash()]);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.peek(10)[0].nonce, 1);
    }
}
