//! Memory-based remote store for chatline.
//!
//! This crate provides an in-process implementation of the `RemoteStore` trait:
//! a single JSON tree with live watches. It is non-persistent and is cleared
//! when the process exits. It backs offline sessions and the test suites.
//!
//! Writes and snapshot delivery are serialized: every watcher whose path
//! overlaps a write sees the post-write value before the next write starts,
//! so snapshots are never delivered out of order. Listeners must not call back
//! into the store.
//!
//! ```rust
//! use chatline_memory_store::MemoryRemoteStore;
//! use serde_json::json;
//!
//! let store = MemoryRemoteStore::with_tree(json!({"users": {"u1": {"firstName": "Ada"}}}));
//! store.set_online(false);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chatline_store_traits::{
    Backend, PushKeyGenerator, RemoteStore, Snapshot, SnapshotListener, StoreError, StorePath,
    WatchId,
};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};

mod tree;

struct Watcher {
    path: StorePath,
    listener: SnapshotListener,
}

struct Inner {
    root: Value,
    watchers: BTreeMap<WatchId, Watcher>,
    next_watch_id: u64,
    push_keys: PushKeyGenerator,
    online: bool,
}

/// In-memory [`RemoteStore`].
pub struct MemoryRemoteStore {
    inner: RwLock<Inner>,
    // Held across mutate + deliver so snapshots reach listeners in write order.
    delivery: Mutex<()>,
}

type Delivery = Vec<(SnapshotListener, Snapshot)>;

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("MemoryRemoteStore")
            .field("watchers", &inner.watchers.len())
            .field("online", &inner.online)
            .finish()
    }
}

impl MemoryRemoteStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::with_tree(Value::Object(Map::new()))
    }

    /// Creates a store seeded with `tree`.
    pub fn with_tree(tree: Value) -> Self {
        let root = tree::normalize(tree).unwrap_or_else(|| Value::Object(Map::new()));
        Self {
            inner: RwLock::new(Inner {
                root,
                watchers: BTreeMap::new(),
                next_watch_id: 1,
                push_keys: PushKeyGenerator::new(),
                online: true,
            }),
            delivery: Mutex::new(()),
        }
    }

    /// Simulate losing or regaining connectivity. While offline every
    /// operation fails with [`StoreError::Connectivity`].
    pub fn set_online(&self, online: bool) {
        self.inner.write().online = online;
    }

    /// Number of live watches.
    pub fn watch_count(&self) -> usize {
        self.inner.read().watchers.len()
    }

    /// Copy of the whole tree.
    pub fn dump(&self) -> Value {
        self.inner.read().root.clone()
    }

    /// Synchronous read, for tests and seeding.
    pub fn read(&self, path: &StorePath) -> Option<Value> {
        tree::get(&self.inner.read().root, path).cloned()
    }

    /// Synchronous write, for tests and seeding. Watchers are notified.
    pub fn write(&self, path: &StorePath, value: Value) {
        let _gate = self.delivery.lock();
        let delivery = {
            let mut inner = self.inner.write();
            Self::mutate(&mut inner, path, |inner| tree::set(&mut inner.root, path, value))
        };
        Self::deliver(delivery);
    }

    fn ensure_online(inner: &Inner) -> Result<(), StoreError> {
        if inner.online {
            Ok(())
        } else {
            Err(StoreError::Connectivity("memory store is offline".to_string()))
        }
    }

    /// Apply `op` and collect snapshots for every overlapping watcher whose
    /// observed value changed.
    fn mutate(inner: &mut Inner, path: &StorePath, op: impl FnOnce(&mut Inner)) -> Delivery {
        let before: Vec<(WatchId, Option<Value>)> = inner
            .watchers
            .iter()
            .filter(|(_, w)| w.path.overlaps(path))
            .map(|(id, w)| (*id, tree::get(&inner.root, &w.path).cloned()))
            .collect();

        op(inner);

        let mut out = Vec::new();
        for (id, old) in before {
            let Some(w) = inner.watchers.get(&id) else {
                continue;
            };
            let new = tree::get(&inner.root, &w.path).cloned();
            if new != old {
                out.push((
                    w.listener.clone(),
                    Snapshot {
                        path: w.path.clone(),
                        value: new,
                    },
                ));
            }
        }
        out
    }

    fn deliver(delivery: Delivery) {
        for (listener, snapshot) in delivery {
            listener(snapshot);
        }
    }

    fn write_with(&self, path: &StorePath, op: impl FnOnce(&mut Inner)) -> Result<(), StoreError> {
        let _gate = self.delivery.lock();
        let delivery = {
            let mut inner = self.inner.write();
            Self::ensure_online(&inner)?;
            Self::mutate(&mut inner, path, op)
        };
        Self::deliver(delivery);
        Ok(())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    fn backend(&self) -> Backend {
        Backend::Memory
    }

    fn watch(&self, path: &StorePath, listener: SnapshotListener) -> Result<WatchId, StoreError> {
        let _gate = self.delivery.lock();
        let (id, initial) = {
            let mut inner = self.inner.write();
            Self::ensure_online(&inner)?;
            let id = WatchId(inner.next_watch_id);
            inner.next_watch_id += 1;
            inner.watchers.insert(
                id,
                Watcher {
                    path: path.clone(),
                    listener: listener.clone(),
                },
            );
            let value = tree::get(&inner.root, path).cloned();
            (
                id,
                Snapshot {
                    path: path.clone(),
                    value,
                },
            )
        };
        tracing::trace!(target: "chatline_memory_store", path = %path, id = id.0, "watch");
        listener(initial);
        Ok(id)
    }

    fn unwatch(&self, id: WatchId) {
        if let Some(w) = self.inner.write().watchers.remove(&id) {
            tracing::trace!(target: "chatline_memory_store", path = %w.path, id = id.0, "unwatch");
        }
    }

    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        let inner = self.inner.read();
        Self::ensure_online(&inner)?;
        Ok(tree::get(&inner.root, path).cloned())
    }

    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        self.write_with(path, |inner| tree::set(&mut inner.root, path, value))
    }

    async fn update(
        &self,
        path: &StorePath,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        self.write_with(path, |inner| {
            for (key, value) in fields {
                tree::set(&mut inner.root, &path.child(key), value);
            }
        })
    }

    async fn push(&self, path: &StorePath, value: Value) -> Result<String, StoreError> {
        let mut key = String::new();
        self.write_with(path, |inner| {
            key = inner.push_keys.next_key(now_millis());
            tree::set(&mut inner.root, &path.child(key.clone()), value);
        })?;
        Ok(key)
    }

    async fn remove(&self, path: &StorePath) -> Result<(), StoreError> {
        self.write_with(path, |inner| tree::remove(&mut inner.root, path))
    }

    async fn query_prefix(
        &self,
        path: &StorePath,
        child_key: &str,
        prefix: &str,
    ) -> Result<Map<String, Value>, StoreError> {
        let inner = self.inner.read();
        Self::ensure_online(&inner)?;
        let Some(Value::Object(children)) = tree::get(&inner.root, path) else {
            return Ok(Map::new());
        };
        Ok(children
            .iter()
            .filter(|(_, child)| {
                child
                    .get(child_key)
                    .and_then(Value::as_str)
                    .is_some_and(|s| s.starts_with(prefix))
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
