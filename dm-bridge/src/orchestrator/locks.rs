//! One writer per session.

use crate::world::SessionId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-session mutexes. A turn holds its session's guard from context load
/// to final save, so turns on one session never interleave.
#[derive(Default)]
pub struct SessionLocks {
    locks: DashMap<SessionId, Arc<Mutex<()>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `session_id`.
    pub async fn acquire(&self, session_id: &SessionId) -> OwnedMutexGuard<()> {
        // Clone the Arc so the map shard is not held across the await.
        let lock = self.locks.entry(session_id.clone()).or_default().clone();
        lock.lock_owned().await
    }

    /// Whether a turn is currently running for the session.
    pub fn is_busy(&self, session_id: &SessionId) -> bool {
        self.locks
            .get(session_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Drop locks nobody holds or waits on.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - self.locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_session_serializes() {
        let locks = Arc::new(SessionLocks::new());
        let id = SessionId::from("s1");

        let guard = locks.acquire(&id).await;
        assert!(locks.is_busy(&id));

        let waiter = {
            let locks = Arc::clone(&locks);
            let id = id.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&id).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(!locks.is_busy(&id));
    }

    #[tokio::test]
    async fn test_other_sessions_are_independent() {
        let locks = SessionLocks::new();
        let _a = locks.acquire(&SessionId::from("a")).await;
        let _b = locks.acquire(&SessionId::from("b")).await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_prune_idle() {
        let locks = SessionLocks::new();
        let held = locks.acquire(&SessionId::from("held")).await;
        drop(locks.acquire(&SessionId::from("idle")).await);

        assert_eq!(locks.prune_idle(), 1);
        assert_eq!(locks.len(), 1);
        drop(held);
    }
}
