use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-topic serialization of handlers and mutating API calls.
///
/// Not reentrant: only entry points lock, internal helpers never do.
#[derive(Clone, Default)]
pub struct TopicLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl TopicLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, topic: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock().await;
            map.entry(topic.to_string()).or_default().clone()
        };
        entry.lock_owned().await
    }

    /// Drop the lock entry of a torn-down topic unless someone still holds it.
    pub async fn forget(&self, topic: &str) {
        let mut map = self.inner.lock().await;
        if map.get(topic).is_some_and(|m| Arc::strong_count(m) == 1) {
            map.remove(topic);
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_topic_is_serialized() {
        let locks = TopicLocks::new();
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let (locks, active, max_seen) = (locks.clone(), active.clone(), max_seen.clone());
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock("topic").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_topics_do_not_block() {
        let locks = TopicLocks::new();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn forget_keeps_held_entries() {
        let locks = TopicLocks::new();
        let guard = locks.lock("a").await;
        locks.forget("a").await;
        assert_eq!(locks.len().await, 1);
        drop(guard);
        locks.forget("a").await;
        assert_eq!(locks.len().await, 0);
    }
}
