//! Active sequencer sets and deterministic rotation order
//!
//! Every node must derive the same turn order from the same chain state without
//! talking to the others, so the shuffle only depends on the sorted input set
//! and a seed taken from agreed state (usually the head number).

use alloy_primitives::Address;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use crate::chain::Blockchain;
use crate::error::Result;
use crate::events::Subscription;
use crate::staking::participants::ActiveParticipantsQuerier;

/// Sequencers currently allowed to produce blocks
pub trait ActiveSequencers: Send + Sync {
    fn get(&self) -> Result<Vec<Address>>;

    fn contains(&self, address: Address) -> Result<bool>;
}

/// Seed source for the rotation shuffle
pub type SeedFn = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Seed with the current head number
pub fn head_number_seed(blockchain: Arc<dyn Blockchain>) -> SeedFn {
    Arc::new(move || blockchain.header().number)
}

/// Sequencers minus those in probation, queried on every call
pub struct ActiveSequencersQuerier {
    participants: Arc<dyn ActiveParticipantsQuerier>,
}

impl ActiveSequencersQuerier {
    pub fn new(participants: Arc<dyn ActiveParticipantsQuerier>) -> Self {
        Self { participants }
    }
}

impl ActiveSequencers for ActiveSequencersQuerier {
    fn get(&self) -> Result<Vec<Address>> {
        self.participants.active_sequencers()
    }

    fn contains(&self, address: Address) -> Result<bool> {
        Ok(self.get()?.contains(&address))
    }
}

/// Active sequencer set cached until the next chain event
///
/// A background thread refreshes the cache on every head, fork or reorg
/// event. `get` only queries on a cold cache; `contains` never queries.
pub struct CachingActiveSequencers {
    inner: Arc<dyn ActiveSequencers>,
    cache: RwLock<Vec<Address>>,
    shutdown: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CachingActiveSequencers {
    /// Wrap `inner` and start refreshing on events from `blockchain`
    pub fn new(blockchain: &dyn Blockchain, inner: Arc<dyn ActiveSequencers>) -> Arc<Self> {
        let subscription = blockchain.subscribe_events();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let this = Arc::new(Self {
            inner,
            cache: RwLock::new(Vec::new()),
            shutdown: Mutex::new(Some(shutdown_tx)),
            worker: Mutex::new(None),
        });

        let weak = Arc::downgrade(&this);
        let handle = thread::spawn(move || refresh_loop(weak, subscription, shutdown_rx));
        *this.worker.lock() = Some(handle);

        this
    }

    /// Replace the cached set with a fresh query
    pub fn refresh(&self) -> Result<()> {
        let mut cache = self.cache.write();
        *cache = self.inner.get()?;
        tracing::debug!("Refreshed active sequencer cache: {} sequencers", cache.len());
        Ok(())
    }

    /// Stop the refresher thread and wait for it
    pub fn shutdown(&self) {
        self.shutdown.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl ActiveSequencers for CachingActiveSequencers {
    fn get(&self) -> Result<Vec<Address>> {
        {
            let cache = self.cache.read();
            if !cache.is_empty() {
                return Ok(cache.clone());
            }
        }

        self.refresh()?;
        Ok(self.cache.read().clone())
    }

    fn contains(&self, address: Address) -> Result<bool> {
        Ok(self.cache.read().contains(&address))
    }
}

impl Drop for CachingActiveSequencers {
    fn drop(&mut self) {
        // closing the shutdown channel wakes the refresher
        self.shutdown.get_mut().take();
    }
}

fn refresh_loop(
    cache: Weak<CachingActiveSequencers>,
    subscription: Subscription,
    shutdown: Receiver<()>,
) {
    tracing::debug!("Active sequencer cache refresher started");

    loop {
        select! {
            recv(subscription.receiver()) -> event => {
                let Ok(event) = event else { break };
                let Some(strong) = cache.upgrade() else { break };
                if let Err(e) = strong.refresh() {
                    tracing::warn!("Failed to refresh active sequencers on {:?} event: {}", event.kind, e);
                }
            }
            recv(shutdown) -> _ => break,
        }
    }

    tracing::debug!("Active sequencer cache refresher stopped");
}

/// Sort ascending by address bytes, then Fisher-Yates with a ChaCha20 stream
///
/// Indices are drawn as `u64` so the order does not depend on pointer width.
pub fn shuffle_sequencers(mut addresses: Vec<Address>, seed: u64) -> Vec<Address> {
    addresses.sort();

    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    for i in (1..addresses.len()).rev() {
        let j = rng.gen_range(0..=i as u64) as usize;
        addresses.swap(i, j);
    }
    addresses
}

/// Sequencer whose turn it is at `block_number`
pub fn select_sequencer(order: &[Address], block_number: u64) -> Option<Address> {
    if order.is_empty() {
        return None;
    }
    Some(order[(block_number % order.len() as u64) as usize])
}

/// Active sequencers in seeded rotation order
pub struct RandomizedActiveSequencers {
    inner: Arc<dyn ActiveSequencers>,
    seed_fn: SeedFn,
}

impl RandomizedActiveSequencers {
    pub fn new(inner: Arc<dyn ActiveSequencers>, seed_fn: SeedFn) -> Self {
        Self { inner, seed_fn }
    }
}

impl ActiveSequencers for RandomizedActiveSequencers {
    fn get(&self) -> Result<Vec<Address>> {
        Ok(shuffle_sequencers(self.inner.get()?, (self.seed_fn)()))
    }

    fn contains(&self, address: Address) -> Result<bool> {
        self.inner.contains(address)
    }
}

/// [`RandomizedActiveSequencers`] memoizing the order of the last seed
pub struct CachingRandomizedActiveSequencers {
    inner: Arc<dyn ActiveSequencers>,
    seed_fn: SeedFn,
    last: Mutex<Option<(u64, Vec<Address>)>>,
}

impl CachingRandomizedActiveSequencers {
    pub fn new(inner: Arc<dyn ActiveSequencers>, seed_fn: SeedFn) -> Self {
        Self {
            inner,
            seed_fn,
            last: Mutex::new(None),
        }
    }
}

impl ActiveSequencers for CachingRandomizedActiveSequencers {
    fn get(&self) -> Result<Vec<Address>> {
        let seed = (self.seed_fn)();
        let mut last = self.last.lock();

        if let Some((cached_seed, order)) = last.as_ref() {
            if *cached_seed == seed {
                return Ok(order.clone());
            }
        }

        let order = shuffle_sequencers(self.inner.get()?, seed);
        *last = Some((seed, order.clone()));
        Ok(order)
    }

    fn contains(&self, address: Address) -> Result<bool> {
        self.inner.contains(address)
    }
}
