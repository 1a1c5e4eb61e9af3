//! Per-volume-name serialization
//!
//! Two concurrent operations on the same volume name must not interleave
//! their array and metadata steps. Each name maps to its own async mutex;
//! operations on different names proceed fully in parallel. Lock entries
//! are retained for the life of the process, bounded by the set of names
//! ever operated on.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Name-keyed async mutex map
#[derive(Default)]
pub struct NameLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the mutex for `name`, waiting behind any in-flight operation
    /// on the same name.
    pub async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_name_serializes() {
        let locks = Arc::new(NameLocks::new());
        let in_section = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let in_section = in_section.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("vol-1").await;
                let now = in_section.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                in_section.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_names_run_in_parallel() {
        let locks = Arc::new(NameLocks::new());
        let guard_a = locks.acquire("vol-a").await;

        // A second name must not block behind vol-a
        let acquired = tokio::time::timeout(Duration::from_millis(50), locks.acquire("vol-b"))
            .await
            .is_ok();
        assert!(acquired);
        drop(guard_a);
    }
}
