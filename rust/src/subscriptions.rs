//! Lifecycle of live watches on remote paths.
//!
//! Every open path gets one [`SubscriptionHandle`]. A handle's liveness flag
//! flips to false on `close`/`close_all` before the backend watch is dropped,
//! so a snapshot that was already queued when the subscription closed can be
//! recognised as stale by whoever consumes it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chatline_store_traits::{RemoteStore, Snapshot, StoreError, StorePath, WatchId};
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Membership,
    ChatDetail,
    Messages,
    Starred,
    UserOneShot,
}

impl SubscriptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Membership => "membership",
            Self::ChatDetail => "chat_detail",
            Self::Messages => "messages",
            Self::Starred => "starred",
            Self::UserOneShot => "user_one_shot",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: u64,
    path: StorePath,
    kind: SubscriptionKind,
    alive: Arc<AtomicBool>,
    session_alive: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }

    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    /// False once this subscription or the whole session was closed.
    pub fn is_live(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.session_alive.load(Ordering::SeqCst)
    }
}

pub type UpdateCallback = Arc<dyn Fn(&SubscriptionHandle, Option<Value>) + Send + Sync>;

struct OpenSubscription {
    handle: SubscriptionHandle,
    watch_id: WatchId,
    callback: Arc<RwLock<UpdateCallback>>,
}

pub struct SubscriptionManager {
    store: Arc<dyn RemoteStore>,
    runtime: tokio::runtime::Handle,
    open: HashMap<StorePath, OpenSubscription>,
    session_alive: Arc<AtomicBool>,
    next_id: u64,
    one_shots_issued: Arc<AtomicU64>,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn RemoteStore>, runtime: tokio::runtime::Handle) -> Self {
        Self {
            store,
            runtime,
            open: HashMap::new(),
            session_alive: Arc::new(AtomicBool::new(true)),
            next_id: 1,
            one_shots_issued: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    pub fn is_session_alive(&self) -> bool {
        self.session_alive.load(Ordering::SeqCst)
    }

    /// Start watching `path`. Opening a path that is already open swaps in
    /// the new callback and returns the existing handle.
    pub fn open(
        &mut self,
        path: StorePath,
        kind: SubscriptionKind,
        on_update: UpdateCallback,
    ) -> Result<SubscriptionHandle, SyncError> {
        if !self.is_session_alive() {
            return Err(SyncError::SessionClosed);
        }
        if let Some(existing) = self.open.get(&path) {
            *existing.callback.write() = on_update;
            tracing::debug!(path = %path, kind = kind.as_str(), "subscription already open, callback replaced");
            return Ok(existing.handle.clone());
        }

        let handle = SubscriptionHandle {
            id: self.next_id,
            path: path.clone(),
            kind,
            alive: Arc::new(AtomicBool::new(true)),
            session_alive: self.session_alive.clone(),
        };
        self.next_id += 1;

        let callback = Arc::new(RwLock::new(on_update));
        let listener_handle = handle.clone();
        let listener_callback = callback.clone();
        let listener = Arc::new(move |snapshot: Snapshot| {
            if !listener_handle.is_live() {
                tracing::trace!(path = %snapshot.path, "snapshot after close dropped");
                return;
            }
            let cb = listener_callback.read().clone();
            cb(&listener_handle, snapshot.value);
        });

        let watch_id = match self.store.watch(&path, listener) {
            Ok(id) => id,
            Err(err) => {
                handle.alive.store(false, Ordering::SeqCst);
                tracing::error!(path = %path, kind = kind.as_str(), %err, "failed to open subscription");
                return Err(SyncError::connectivity(&path, err));
            }
        };

        tracing::debug!(path = %path, kind = kind.as_str(), id = handle.id, "subscription opened");
        self.open.insert(
            path,
            OpenSubscription {
                handle: handle.clone(),
                watch_id,
                callback,
            },
        );
        Ok(handle)
    }

    /// Close one subscription. Returns false if nothing was open there.
    pub fn close(&mut self, path: &StorePath) -> bool {
        let Some(sub) = self.open.remove(path) else {
            return false;
        };
        sub.handle.alive.store(false, Ordering::SeqCst);
        self.store.unwatch(sub.watch_id);
        tracing::debug!(path = %path, kind = sub.handle.kind.as_str(), "subscription closed");
        true
    }

    /// Close everything and refuse further opens and fetch results.
    pub fn close_all(&mut self) {
        let was_alive = self.session_alive.swap(false, Ordering::SeqCst);
        let count = self.open.len();
        for (_, sub) in self.open.drain() {
            sub.handle.alive.store(false, Ordering::SeqCst);
            self.store.unwatch(sub.watch_id);
        }
        if was_alive {
            tracing::info!(closed = count, "all subscriptions closed");
        }
    }

    /// One-shot read of `path`. `on_result` runs on the runtime and is skipped
    /// when the session has been closed by the time the read completes.
    /// Returns false if the session is already closed.
    pub fn fetch_once<F>(&self, path: StorePath, on_result: F) -> bool
    where
        F: FnOnce(Result<Option<Value>, StoreError>) + Send + 'static,
    {
        if !self.is_session_alive() {
            return false;
        }
        self.one_shots_issued.fetch_add(1, Ordering::SeqCst);
        let store = self.store.clone();
        let session_alive = self.session_alive.clone();
        tracing::trace!(path = %path, kind = SubscriptionKind::UserOneShot.as_str(), "one-shot fetch issued");
        self.runtime.spawn(async move {
            let result = store.get(&path).await;
            if !session_alive.load(Ordering::SeqCst) {
                tracing::trace!(path = %path, "one-shot result after close dropped");
                return;
            }
            on_result(result);
        });
        true
    }

    pub fn is_open(&self, path: &StorePath) -> bool {
        self.open.contains_key(path)
    }

    pub fn handle(&self, path: &StorePath) -> Option<&SubscriptionHandle> {
        self.open.get(path).map(|s| &s.handle)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn open_paths(&self, kind: SubscriptionKind) -> Vec<StorePath> {
        let mut paths: Vec<StorePath> = self
            .open
            .values()
            .filter(|s| s.handle.kind == kind)
            .map(|s| s.handle.path.clone())
            .collect();
        paths.sort_by_key(|p| p.to_string());
        paths
    }

    pub fn one_shots_issued(&self) -> u64 {
        self.one_shots_issued.load(Ordering::SeqCst)
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.close_all();
    }
}
