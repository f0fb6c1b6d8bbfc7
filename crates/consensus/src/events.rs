//! Chain event broker
//!
//! Storage publishes head/fork/reorg events here and every subscriber gets its
//! own bounded channel. Publishing holds the subscriber list lock while fanning
//! out, so a stalled subscriber delays the others by at most `send_timeout` per
//! event. After the timeout the event is dropped for that subscriber only.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::types::Header;

/// Default per-subscriber channel depth
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 5;

/// Default time a publish waits on a full subscriber channel
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// Kind of chain change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Block extends the current head
    Head,
    /// Block lands on a side branch; head unchanged
    Fork,
    /// Head moved to another branch
    Reorg,
}

/// A change of the canonical chain
#[derive(Debug, Clone)]
pub struct ChainEvent {
    pub old_chain: Vec<Header>,
    pub new_chain: Vec<Header>,
    pub kind: EventType,
    /// Provenance tag of the block that caused the event
    pub source: String,
}

impl ChainEvent {
    /// Newest header of the new chain
    pub fn header(&self) -> Option<&Header> {
        self.new_chain.last()
    }
}

/// Broker configuration
#[derive(Debug, Clone, Copy)]
pub struct BrokerConfig {
    pub capacity: usize,
    pub send_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

struct Subscriber {
    id: u64,
    sender: Sender<ChainEvent>,
}

/// Fan-out of chain events to bounded subscriber channels
pub struct EventBroker {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    config: BrokerConfig,
}

impl EventBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = bounded(self.config.capacity);
        self.subscribers.lock().push(Subscriber { id, sender });

        tracing::debug!("Created event subscription {}", id);

        Subscription { id, receiver }
    }

    /// Deliver `event` to every live subscriber
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, event: ChainEvent) -> usize {
        let mut subscribers = self.subscribers.lock();
        let mut delivered = 0;

        subscribers.retain(|subscriber| {
            match subscriber
                .sender
                .send_timeout(event.clone(), self.config.send_timeout)
            {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(SendTimeoutError::Timeout(_)) => {
                    tracing::warn!(
                        "Subscriber {} lagging, dropped {:?} event",
                        subscriber.id,
                        event.kind
                    );
                    true
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    tracing::debug!("Removing closed event subscription {}", subscriber.id);
                    false
                }
            }
        });

        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl Default for EventBroker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

/// Receiving end of a subscription; dropping it unsubscribes
pub struct Subscription {
    id: u64,
    receiver: Receiver<ChainEvent>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block for the next event; `None` once the broker is gone
    pub fn recv(&self) -> Option<ChainEvent> {
        self.receiver.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<ChainEvent, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Option<ChainEvent> {
        self.receiver.try_recv().ok()
    }

    /// Underlying channel, for use with `crossbeam_channel::select!`
    pub fn receiver(&self) -> &Receiver<ChainEvent> {
        &self.receiver
    }
}
