//! Per-request concurrency control.
//!
//! Each meeting request is processed by at most one in-flight
//! orchestrator invocation at a time.  A second trigger for the same id
//! is rejected with a busy error; embedders that prefer queueing can use
//! the waiting [`RequestLockMap::acquire`] instead.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use stina_domain::error::{Error, Result};

/// Manages per-request run locks.
///
/// Each request id maps to a `Semaphore(1)`.  Holding the permit ensures
/// exclusive access for one invocation; it auto-releases on drop, and is
/// never held across the map's own mutex.
#[derive(Default)]
pub struct RequestLockMap {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl RequestLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn semaphore(&self, id: &str) -> Arc<Semaphore> {
        let mut locks = self.locks.lock();
        locks
            .entry(id.to_owned())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }

    /// Acquire the lock without waiting.  Fails with [`Error::Busy`] when
    /// an invocation for the same id is already in flight.
    pub fn try_acquire(&self, id: &str) -> Result<OwnedSemaphorePermit> {
        self.semaphore(id)
            .try_acquire_owned()
            .map_err(|_| Error::Busy(id.to_owned()))
    }

    /// Acquire the lock, waiting until the in-flight invocation finishes.
    pub async fn acquire(&self, id: &str) -> Result<OwnedSemaphorePermit> {
        self.semaphore(id)
            .acquire_owned()
            .await
            .map_err(|_| Error::Busy(id.to_owned()))
    }

    /// Number of tracked requests (for monitoring).
    pub fn tracked(&self) -> usize {
        self.locks.lock().len()
    }

    /// Remove locks for requests that aren't actively held.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_trigger_for_same_id_is_busy() {
        let map = RequestLockMap::new();
        let _permit = map.try_acquire("req-1").unwrap();
        let err = map.try_acquire("req-1").unwrap_err();
        assert!(matches!(err, Error::Busy(_)));
    }

    #[tokio::test]
    async fn distinct_ids_run_in_parallel() {
        let map = RequestLockMap::new();
        let _p1 = map.try_acquire("req-1").unwrap();
        let _p2 = map.try_acquire("req-2").unwrap();
        assert_eq!(map.tracked(), 2);
    }

    #[tokio::test]
    async fn lock_released_on_drop() {
        let map = RequestLockMap::new();
        let permit = map.try_acquire("req-1").unwrap();
        drop(permit);
        let _again = map.try_acquire("req-1").unwrap();
    }

    #[tokio::test]
    async fn waiting_acquire_proceeds_after_release() {
        let map = Arc::new(RequestLockMap::new());
        let map2 = map.clone();

        let permit = map.try_acquire("req-1").unwrap();
        let handle = tokio::spawn(async move {
            let _p = map2.acquire("req-1").await.unwrap();
            42
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        drop(permit);
        assert_eq!(handle.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn prune_keeps_held_locks() {
        let map = RequestLockMap::new();
        let _held = map.try_acquire("held").unwrap();
        let released = map.try_acquire("released").unwrap();
        drop(released);

        map.prune_idle();
        assert_eq!(map.tracked(), 1);
    }
}
