//! At-most-one in-flight call per fingerprint, with broadcast delivery to joiners.
//!
//! Grounded on the leader/follower coalescing shape of a `DashMap`-backed
//! single-flight merger, generalized here so a caller's own cancellation
//! cannot cancel the work: the call runs on a detached task, and joiners
//! subscribe to a broadcast channel rather than polling the leader's future
//! directly. This lets the registry honor "the entry is removed before
//! results are delivered to waiters" exactly, and lets all-waiters-withdrew
//! cancel the underlying call.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

type Map<K, T> = Arc<Mutex<HashMap<K, Arc<Entry<T>>>>>;

struct Entry<T> {
    tx: broadcast::Sender<Arc<T>>,
    waiters: AtomicUsize,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Registry of in-flight calls keyed by `K`. `T` is the shared result type
/// (typically a `Result<Response, Error>`); it need not be `Clone` itself
/// since only the `Arc<T>` is shared.
pub struct SingleFlightRegistry<K, T> {
    entries: Map<K, T>,
}

impl<K, T> Default for SingleFlightRegistry<K, T>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self { entries: Arc::new(Mutex::new(HashMap::new())) }
    }
}

/// Dropping the guard withdraws this caller from the in-flight call; when the
/// last waiter withdraws, the underlying task is cancelled and the entry is
/// evicted.
struct WaiterGuard<K, T>
where
    K: Eq + Hash + Clone,
{
    key: K,
    entry: Arc<Entry<T>>,
    entries: Map<K, T>,
}

impl<K, T> Drop for WaiterGuard<K, T>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        if self.entry.waiters.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Ok(mut handle) = self.entry.handle.lock() {
                if let Some(h) = handle.take() {
                    h.abort();
                }
            }
            let mut entries = self.entries.lock().expect("single-flight map poisoned");
            if let Some(current) = entries.get(&self.key) {
                if Arc::ptr_eq(current, &self.entry) {
                    entries.remove(&self.key);
                }
            }
        }
    }
}

impl<K, T> SingleFlightRegistry<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute `f` at most once for overlapping calls sharing `key`.
    ///
    /// Returns the shared result. Use [`SingleFlightRegistry::call_shared`]
    /// when the caller also needs to know whether it was a joiner.
    pub async fn call<F, Fut>(&self, key: K, f: F) -> Arc<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        self.call_shared(key, f).await.0
    }

    /// Like [`Self::call`], but also reports whether this caller joined an
    /// already-in-flight call (`true`) or triggered it (`false`).
    pub async fn call_shared<F, Fut>(&self, key: K, f: F) -> (Arc<T>, bool)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (is_leader, entry) = {
            let mut entries = self.entries.lock().expect("single-flight map poisoned");
            if let Some(existing) = entries.get(&key) {
                existing.waiters.fetch_add(1, Ordering::AcqRel);
                (false, existing.clone())
            } else {
                let (tx, _rx) = broadcast::channel(1);
                let entry =
                    Arc::new(Entry { tx, waiters: AtomicUsize::new(1), handle: Mutex::new(None) });
                entries.insert(key.clone(), entry.clone());
                (true, entry)
            }
        };

        let mut rx = entry.tx.subscribe();
        let _guard = WaiterGuard {
            key: key.clone(),
            entry: entry.clone(),
            entries: self.entries.clone(),
        };

        if is_leader {
            let map = self.entries.clone();
            let spawn_entry = entry.clone();
            let spawn_key = key.clone();
            let handle = tokio::spawn(async move {
                let result = Arc::new(f().await);
                // Remove the entry first: a distinct subsequent request for
                // the same key must begin a fresh call, not join this one.
                {
                    let mut entries = map.lock().expect("single-flight map poisoned");
                    if let Some(current) = entries.get(&spawn_key) {
                        if Arc::ptr_eq(current, &spawn_entry) {
                            entries.remove(&spawn_key);
                        }
                    }
                }
                let _ = spawn_entry.tx.send(result);
            });
            *entry.handle.lock().expect("single-flight handle poisoned") = Some(handle);
        }

        let result = rx.recv().await.expect("single-flight leader dropped without broadcasting");
        (result, !is_leader)
    }
}
