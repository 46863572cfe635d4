//! Serialization primitives for LLM calls: at most one in-flight call per
//! conversation, and a global cap on concurrent local-model calls. Lock
//! state is scoped to this process; cross-process coordination is out of
//! scope.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::LockConfig;
use crate::error::{Error, Result};

#[derive(Clone)]
struct ConversationEntry {
    semaphore: Arc<Semaphore>,
    waiters: usize,
}

struct ArbiterInner {
    conversations: Mutex<HashMap<i64, ConversationEntry>>,
    local_slots: Arc<Semaphore>,
    conversation_timeout: Duration,
    local_timeout: Duration,
}

impl ArbiterInner {
    /// An entry may only be garbage-collected when nothing holds or awaits
    /// its permit.
    fn collect_if_idle(&self, conversation_id: i64) {
        let mut map = self
            .conversations
            .lock()
            .expect("conversation lock map poisoned");
        if let Some(entry) = map.get(&conversation_id)
            && entry.waiters == 0
            && entry.semaphore.available_permits() == 1
        {
            map.remove(&conversation_id);
        }
    }
}

/// Decrements the waiter count in `Drop` so a caller cancelled mid-acquire
/// cannot leak its registration.
struct WaiterGuard {
    inner: Arc<ArbiterInner>,
    conversation_id: i64,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        {
            let mut map = self
                .inner
                .conversations
                .lock()
                .expect("conversation lock map poisoned");
            if let Some(entry) = map.get_mut(&self.conversation_id) {
                entry.waiters = entry.waiters.saturating_sub(1);
            }
        }
        self.inner.collect_if_idle(self.conversation_id);
    }
}

/// Held for the duration of one LLM call on a conversation. Releasing
/// happens in `Drop`, which cannot be interrupted by task cancellation, so
/// the permit is returned exactly once even when the client disconnects
/// mid-stream.
pub struct ConversationGuard {
    inner: Arc<ArbiterInner>,
    conversation_id: i64,
    permit: Option<OwnedSemaphorePermit>,
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        self.permit.take();
        self.inner.collect_if_idle(self.conversation_id);
    }
}

/// One slot of the global local-model budget.
pub struct LocalSlotGuard {
    _permit: OwnedSemaphorePermit,
}

pub struct ConcurrencyArbiter {
    inner: Arc<ArbiterInner>,
}

impl ConcurrencyArbiter {
    pub fn new(config: &LockConfig, local_max_parallel: usize) -> Self {
        Self {
            inner: Arc::new(ArbiterInner {
                conversations: Mutex::new(HashMap::new()),
                local_slots: Arc::new(Semaphore::new(local_max_parallel)),
                conversation_timeout: Duration::from_secs(config.conversation_timeout_secs),
                local_timeout: Duration::from_secs(config.local_timeout_secs),
            }),
        }
    }

    /// Acquires the per-conversation lock, waiting up to the configured
    /// timeout before failing `Busy`.
    pub async fn lock_conversation(&self, conversation_id: i64) -> Result<ConversationGuard> {
        let semaphore = {
            let mut map = self
                .inner
                .conversations
                .lock()
                .expect("conversation lock map poisoned");
            let entry = map.entry(conversation_id).or_insert_with(|| ConversationEntry {
                semaphore: Arc::new(Semaphore::new(1)),
                waiters: 0,
            });
            entry.waiters += 1;
            entry.semaphore.clone()
        };

        let _waiter = WaiterGuard {
            inner: self.inner.clone(),
            conversation_id,
        };

        let acquired =
            tokio::time::timeout(self.inner.conversation_timeout, semaphore.acquire_owned()).await;

        match acquired {
            Ok(Ok(permit)) => Ok(ConversationGuard {
                inner: self.inner.clone(),
                conversation_id,
                permit: Some(permit),
            }),
            Ok(Err(_)) => Err(Error::Internal(
                "conversation lock semaphore closed".to_string(),
            )),
            Err(_) => Err(Error::Busy(
                "Another request is in progress for this conversation. Please wait for it to finish.".to_string(),
            )),
        }
    }

    /// Acquires one global local-model slot, waiting up to the configured
    /// timeout before failing `Busy`.
    pub async fn acquire_local_slot(&self) -> Result<LocalSlotGuard> {
        let acquired = tokio::time::timeout(
            self.inner.local_timeout,
            self.inner.local_slots.clone().acquire_owned(),
        )
        .await;

        match acquired {
            Ok(Ok(permit)) => Ok(LocalSlotGuard { _permit: permit }),
            Ok(Err(_)) => Err(Error::Internal("local slot semaphore closed".to_string())),
            Err(_) => Err(Error::Busy(
                "All local model slots are busy. Please try again shortly.".to_string(),
            )),
        }
    }

    /// Number of live lock-map entries; used to verify cleanup.
    pub fn tracked_conversations(&self) -> usize {
        self.inner
            .conversations
            .lock()
            .expect("conversation lock map poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn arbiter(conv_secs: u64, local_secs: u64, parallel: usize) -> ConcurrencyArbiter {
        ConcurrencyArbiter::new(
            &LockConfig {
                conversation_timeout_secs: conv_secs,
                local_timeout_secs: local_secs,
            },
            parallel,
        )
    }

    #[tokio::test]
    async fn test_same_conversation_serializes() {
        let arbiter = Arc::new(arbiter(5, 5, 6));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let arbiter = arbiter.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = arbiter.lock_conversation(42).await.unwrap();
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(arbiter.tracked_conversations(), 0);
    }

    #[tokio::test]
    async fn test_distinct_conversations_run_concurrently() {
        let arbiter = arbiter(5, 5, 6);
        let a = arbiter.lock_conversation(1).await.unwrap();
        let b = arbiter.lock_conversation(2).await.unwrap();
        assert_eq!(arbiter.tracked_conversations(), 2);
        drop(a);
        drop(b);
        assert_eq!(arbiter.tracked_conversations(), 0);
    }

    #[tokio::test]
    async fn test_conversation_lock_times_out_busy() {
        let arbiter = arbiter(1, 1, 6);
        let _held = arbiter.lock_conversation(7).await.unwrap();

        let result = arbiter.lock_conversation(7).await;
        match result {
            Err(Error::Busy(message)) => {
                assert!(message.contains("Another request is in progress"))
            }
            other => panic!("expected Busy, got {:?}", other.map(|_| ())),
        }
        // The holder's entry survives the waiter's timeout.
        assert_eq!(arbiter.tracked_conversations(), 1);
    }

    #[tokio::test]
    async fn test_local_slots_cap_and_timeout() {
        let arbiter = arbiter(5, 1, 2);
        let _a = arbiter.acquire_local_slot().await.unwrap();
        let _b = arbiter.acquire_local_slot().await.unwrap();

        match arbiter.acquire_local_slot().await {
            Err(Error::Busy(_)) => {}
            other => panic!("expected Busy, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_cancelled_waiters_leave_lock_free() {
        // Fuzz the cancellation path: tasks acquiring the same conversation
        // are aborted at random points; afterwards the lock must be free
        // and the map entry collected.
        let arbiter = Arc::new(arbiter(5, 5, 6));

        for round in 0..20 {
            let mut handles = Vec::new();
            for i in 0..4 {
                let arbiter = arbiter.clone();
                handles.push(tokio::spawn(async move {
                    let _guard = arbiter.lock_conversation(99).await.unwrap();
                    tokio::time::sleep(Duration::from_millis(2 + i)).await;
                }));
            }
            tokio::time::sleep(Duration::from_millis(round % 7)).await;
            for handle in &handles {
                handle.abort();
            }
            for handle in handles {
                let _ = handle.await;
            }
        }

        // Exactly-once release: the permit must be acquirable immediately.
        let guard = tokio::time::timeout(Duration::from_millis(100), arbiter.lock_conversation(99))
            .await
            .expect("lock should be free after cancelled streams")
            .unwrap();
        drop(guard);
        assert_eq!(arbiter.tracked_conversations(), 0);
    }
}
