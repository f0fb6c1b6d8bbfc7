//! Local stand-in for the data availability layer
//!
//! Submitted blocks are acknowledged on a worker thread and fanned out to
//! every follower receiver, in submission order.

use crossbeam_channel::{unbounded, Receiver, Sender};
use l2_consensus::chain::{DaAck, DaSender};
use l2_consensus::{Block, Deferred};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type Submission = (Block, Deferred<DaAck>);

#[derive(Default)]
struct Shared {
    followers: Mutex<Vec<Sender<Block>>>,
    height: AtomicU64,
    failing: AtomicBool,
}

/// In-process DA sender
pub struct LocalDaSender {
    shared: Arc<Shared>,
    submissions: Mutex<Option<Sender<Submission>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LocalDaSender {
    pub fn new() -> Self {
        let shared = Arc::new(Shared::default());
        let (tx, rx) = unbounded::<Submission>();

        let worker_shared = shared.clone();
        let handle = thread::spawn(move || {
            for (block, ack) in rx {
                let da_height = worker_shared.height.fetch_add(1, Ordering::SeqCst) + 1;
                worker_shared
                    .followers
                    .lock()
                    .retain(|follower| follower.send(block.clone()).is_ok());

                tracing::debug!("DA accepted block {} at height {}", block.hash(), da_height);
                ack.set_value(DaAck {
                    block_hash: block.hash(),
                    da_height,
                });
            }
            // disconnect followers
            worker_shared.followers.lock().clear();
            tracing::debug!("DA worker stopped");
        });

        Self {
            shared,
            submissions: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Receive every block accepted from now on
    pub fn subscribe(&self) -> Receiver<Block> {
        let (tx, rx) = unbounded();
        self.shared.followers.lock().push(tx);
        rx
    }

    /// Make subsequent submissions fail
    pub fn set_failing(&self, failing: bool) {
        self.shared.failing.store(failing, Ordering::SeqCst);
    }

    /// Blocks accepted so far
    pub fn height(&self) -> u64 {
        self.shared.height.load(Ordering::SeqCst)
    }

    /// Stop the worker after pending submissions are acknowledged
    pub fn shutdown(&self) {
        self.submissions.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Default for LocalDaSender {
    fn default() -> Self {
        Self::new()
    }
}

impl DaSender for LocalDaSender {
    fn send(&self, block: &Block) -> Deferred<DaAck> {
        if self.shared.failing.load(Ordering::SeqCst) {
            return Deferred::failed(format!("DA layer rejected block {}", block.hash()));
        }

        let ack = Deferred::new();
        let submissions = self.submissions.lock();
        let Some(sender) = submissions.as_ref() else {
            return Deferred::failed("DA sender is shut down");
        };
        if sender.send((block.clone(), ack.clone())).is_err() {
            return Deferred::failed("DA worker is gone");
        }
        ack
    }
}

impl Drop for LocalDaSender {
    fn drop(&mut self) {
        self.submissions.get_mut().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_acks_in_order_and_fans_out() {
        let da = LocalDaSender::new();
        let follower = da.subscribe();

        let mut first = Block::default();
        first.header.number = 1;
        first.header.compute_hash();
        let mut second = Block::default();
        second.header.number = 2;
        second.header.compute_hash();

        let ack1 = da.send(&first).result().unwrap();
        let ack2 = da.send(&second).result().unwrap();
        assert_eq!(ack1.da_height, 1);
        assert_eq!(ack2.da_height, 2);
        assert_eq!(ack2.block_hash, second.hash());

        let received = follower.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(received.hash(), first.hash());
        da.shutdown();
    }

    #[test]
    fn test_failing_sender() {
        let da = LocalDaSender::new();
        da.set_failing(true);
        assert!(da.send(&Block::default()).result().is_err());
        assert_eq!(da.height(), 0);
    }
}
