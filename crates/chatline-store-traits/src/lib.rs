//! chatline store - the remote hierarchical store abstraction used by the sync engine.
//!
//! The remote side is a JSON tree addressed by [`StorePath`]. Backends provide
//! one-shot reads and writes plus live watches that re-deliver the full value
//! under a path every time something beneath it changes.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

pub mod error;
pub mod path;
pub mod push_key;

pub use error::StoreError;
pub use path::StorePath;
pub use push_key::PushKeyGenerator;

/// Backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// In-process tree
    Memory,
    /// Hosted realtime database
    Remote,
}

impl Backend {
    /// Check if it's a networked backend
    pub fn is_networked(&self) -> bool {
        !matches!(self, Self::Memory)
    }
}

/// Full value observed at a watched path. `None` means nothing exists there.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Watched path
    pub path: StorePath,
    /// Value at the path, if any
    pub value: Option<Value>,
}

/// Identifier of a registered watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchId(pub u64);

/// Callback invoked with every snapshot of a watched path.
///
/// Listeners may be invoked from any thread and must not block.
pub type SnapshotListener = Arc<dyn Fn(Snapshot) + Send + Sync>;

/// Remote store backend.
///
/// A watch behaves like a lazy, infinite, restartable sequence of snapshots:
/// the current value is delivered once after registration, then again after
/// every change beneath the path. Dropping the watch (`unwatch`) ends the
/// sequence; watching again restarts it from the current value.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Returns the backend type.
    fn backend(&self) -> Backend;

    /// Register a live watch on `path`.
    ///
    /// Fails with [`StoreError::Connectivity`] when the store is unreachable.
    fn watch(&self, path: &StorePath, listener: SnapshotListener) -> Result<WatchId, StoreError>;

    /// Remove a watch. Unknown ids are ignored.
    fn unwatch(&self, id: WatchId);

    /// Read the value at `path` once.
    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError>;

    /// Replace the value at `path`. Writing `Value::Null` removes it.
    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError>;

    /// Shallow-merge `fields` into the object at `path`.
    async fn update(&self, path: &StorePath, fields: Map<String, Value>)
    -> Result<(), StoreError>;

    /// Append `value` under a freshly generated push key and return the key.
    async fn push(&self, path: &StorePath, value: Value) -> Result<String, StoreError>;

    /// Remove the value at `path`.
    async fn remove(&self, path: &StorePath) -> Result<(), StoreError>;

    /// Children of `path` whose string field `child_key` starts with `prefix`,
    /// keyed by child key.
    async fn query_prefix(
        &self,
        path: &StorePath,
        child_key: &str,
        prefix: &str,
    ) -> Result<Map<String, Value>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_is_networked() {
        assert!(!Backend::Memory.is_networked());
        assert!(Backend::Remote.is_networked());
    }
}
