mod actions;
mod core;
pub mod directory;
pub mod error;
mod logging;
pub mod model;
pub mod mutations;
pub mod notifications;
pub mod store;
pub mod subscriptions;
pub mod sync;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};

use chatline_store_traits::RemoteStore;
use flume::{Receiver, Sender};
use parking_lot::Mutex;

pub use actions::ChatAction;
pub use crate::core::{load_app_config, AppConfig};
pub use directory::ProfileUpdate;
pub use error::SyncError;
pub use model::{Chat, ChatId, Message, MessageId, MessageKind, StarredMessage, User, UserId};
pub use mutations::StarToggle;
pub use store::LocalStore;
pub use updates::*;

pub trait SessionListener: Send + Sync + 'static {
    fn on_update(&self, update: SessionUpdate);
}

/// A signed-in user's live view of the remote store.
///
/// Pushes from the store and results of dispatched actions are applied on a
/// dedicated actor thread. Callers read the cache through [`snapshot`], which
/// never blocks on the actor.
///
/// [`snapshot`]: ChatSession::snapshot
pub struct ChatSession {
    user_id: UserId,
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<SessionUpdate>,
    listening: AtomicBool,
    shared_store: Arc<RwLock<LocalStore>>,
    converged: Arc<AtomicBool>,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl ChatSession {
    /// Load config from `data_dir`, open the root subscriptions for
    /// `user_id` and start the actor. Fails if the store is unreachable.
    pub fn start(
        data_dir: impl Into<String>,
        user_id: impl Into<UserId>,
        store: Arc<dyn RemoteStore>,
    ) -> anyhow::Result<Self> {
        let data_dir = data_dir.into();
        let user_id = user_id.into();
        let config = crate::core::load_app_config(&data_dir);
        logging::init_logging(&data_dir, config.log_filter.as_deref());
        if user_id.trim().is_empty() {
            anyhow::bail!("user id must not be empty");
        }
        tracing::info!(data_dir = %data_dir, user_id = %user_id, backend = ?store.backend(), "ChatSession::start()");

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_store = Arc::new(RwLock::new(LocalStore::new(user_id.clone())));
        let converged = Arc::new(AtomicBool::new(false));

        let mut core = crate::core::SessionCore::new(
            user_id.clone(),
            store,
            config,
            update_tx,
            core_tx.clone(),
            shared_store.clone(),
            converged.clone(),
        )?;

        // Actor loop thread (single threaded "session actor").
        let actor = thread::Builder::new()
            .name(format!("chatline-{user_id}"))
            .spawn(move || {
                while let Ok(msg) = core_rx.recv() {
                    if !core.handle_message(msg) {
                        break;
                    }
                }
            })?;

        Ok(Self {
            user_id,
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_store,
            converged,
            actor: Mutex::new(Some(actor)),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Last cache state committed by the actor.
    pub fn snapshot(&self) -> LocalStore {
        match self.shared_store.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn is_converged(&self) -> bool {
        self.converged.load(Ordering::SeqCst)
    }

    pub fn dispatch(&self, action: ChatAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, listener: Box<dyn SessionListener>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split updates.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                listener.on_update(update);
            }
        });
    }

    /// Tear down every subscription and stop the actor. Idempotent.
    pub fn logout(&self) {
        let Some(actor) = self.actor.lock().take() else {
            return;
        };
        let _ = self.core_tx.send(CoreMsg::Shutdown);
        if actor.join().is_err() {
            tracing::error!(user_id = %self.user_id, "session actor panicked");
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.logout();
    }
}
