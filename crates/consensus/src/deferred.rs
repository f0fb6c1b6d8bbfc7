//! One-shot value used to await DA acknowledgements
//!
//! A `Deferred` is resolved exactly once, with a value or an error. Resolving it
//! a second time is a programming error and panics. Readers block until it is
//! resolved; reading again afterwards returns the same outcome.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct Slot<T> {
    outcome: Mutex<Option<Result<T, String>>>,
    resolved: Condvar,
}

/// Shared one-shot future; clones observe the same outcome
#[derive(Debug)]
pub struct Deferred<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<T: Clone> Deferred<T> {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Slot {
                outcome: Mutex::new(None),
                resolved: Condvar::new(),
            }),
        }
    }

    /// Already resolved with `value`
    pub fn ready(value: T) -> Self {
        let deferred = Self::new();
        deferred.set_value(value);
        deferred
    }

    /// Already resolved with `err`
    pub fn failed(err: impl ToString) -> Self {
        let deferred = Self::new();
        deferred.set_error(err);
        deferred
    }

    /// Resolve with a value
    ///
    /// # Panics
    /// If already resolved.
    pub fn set_value(&self, value: T) {
        self.resolve(Ok(value));
    }

    /// Resolve with an error
    ///
    /// # Panics
    /// If already resolved.
    pub fn set_error(&self, err: impl ToString) {
        self.resolve(Err(err.to_string()));
    }

    fn resolve(&self, outcome: Result<T, String>) {
        let mut slot = self.slot.outcome.lock();
        if slot.is_some() {
            panic!("deferred value assigned twice");
        }
        *slot = Some(outcome);
        self.slot.resolved.notify_all();
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.outcome.lock().is_some()
    }

    /// Block until resolved
    pub fn result(&self) -> Result<T, String> {
        let mut slot = self.slot.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.slot.resolved.wait(&mut slot);
        }
    }

    /// Like [`Deferred::result`], giving up after `timeout`
    pub fn result_timeout(&self, timeout: Duration) -> Option<Result<T, String>> {
        let mut slot = self.slot.outcome.lock();
        if slot.is_none() {
            self.slot.resolved.wait_for(&mut slot, timeout);
        }
        slot.clone()
    }
}

impl<T: Clone> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_result_blocks_until_resolved() {
        let deferred = Deferred::<u64>::new();
        let writer = deferred.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.set_value(42);
        });

        assert_eq!(deferred.result(), Ok(42));
        assert_eq!(deferred.result(), Ok(42));
        handle.join().unwrap();
    }

    #[test]
    fn test_error_outcome() {
        let deferred = Deferred::<u64>::failed("rejected");
        assert_eq!(deferred.result(), Err("rejected".to_string()));
    }

    #[test]
    #[should_panic(expected = "assigned twice")]
    fn test_double_assignment_panics() {
        let deferred = Deferred::ready(1u64);
        deferred.set_error("late");
    }

    #[test]
    fn test_result_timeout_unresolved() {
        let deferred = Deferred::<u64>::new();
        assert!(deferred.result_timeout(Duration::from_millis(5)).is_none());
        assert!(!deferred.is_resolved());
    }
}
