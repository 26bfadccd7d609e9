mod chat_actions;
mod config;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::Context;
use chatline_store_traits::RemoteStore;
use flume::Sender;

pub use config::{load_app_config, AppConfig};

use crate::error::SyncError;
use crate::model::UserId;
use crate::mutations::ChatMutationService;
use crate::notifications::{DisabledDispatcher, NotificationDispatcher, PushRelayDispatcher};
use crate::store::LocalStore;
use crate::sync::{EventSink, SyncEvent, SyncOrchestrator, SyncSignal};
use crate::updates::{CoreMsg, InternalEvent, SessionUpdate};

/// Single-threaded session actor. Owns the orchestrator and therefore the
/// only mutable copy of the cache; readers see the last committed clone.
pub struct SessionCore {
    rev: u64,
    published_store_rev: u64,
    user_id: UserId,

    update_sender: Sender<SessionUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_store: Arc<RwLock<LocalStore>>,
    converged: Arc<AtomicBool>,

    runtime: tokio::runtime::Runtime,

    sync: SyncOrchestrator,
    mutations: Arc<ChatMutationService>,
    stopped: bool,
}

impl SessionCore {
    /// Build the actor and open the root subscriptions. Snapshots delivered
    /// while opening are queued on `core_sender` and applied once the actor
    /// loop runs.
    pub fn new(
        user_id: UserId,
        remote: Arc<dyn RemoteStore>,
        config: AppConfig,
        update_sender: Sender<SessionUpdate>,
        core_sender: Sender<CoreMsg>,
        shared_store: Arc<RwLock<LocalStore>>,
        converged: Arc<AtomicBool>,
    ) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .context("build tokio runtime")?;

        let sink_sender = core_sender.clone();
        let sink: EventSink = Arc::new(move |event: SyncEvent| {
            // The actor may already be gone during shutdown.
            let _ = sink_sender.send(CoreMsg::Sync(event));
        });
        let mut sync = SyncOrchestrator::new(
            user_id.clone(),
            remote.clone(),
            runtime.handle().clone(),
            sink,
        );

        let notifier: Arc<dyn NotificationDispatcher> = if config.network_enabled() {
            let url = config.notification_url();
            tracing::info!(url = %url, "push relay enabled");
            Arc::new(PushRelayDispatcher::new(
                remote.clone(),
                url,
                config.notification_timeout(),
                runtime.handle().clone(),
            ))
        } else {
            tracing::info!("network disabled, notifications off");
            Arc::new(DisabledDispatcher)
        };
        let mutations = Arc::new(ChatMutationService::new(remote, notifier));

        sync.start()
            .with_context(|| format!("start sync for {user_id}"))?;

        let this = Self {
            rev: 0,
            published_store_rev: 0,
            user_id,
            update_sender,
            core_sender,
            shared_store,
            converged,
            runtime,
            sync,
            mutations,
            stopped: false,
        };
        this.commit_store_snapshot(this.sync.store());
        Ok(this)
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.rev
    }

    fn commit_store_snapshot(&self, store: &LocalStore) {
        match self.shared_store.write() {
            Ok(mut g) => *g = store.clone(),
            Err(poison) => *poison.into_inner() = store.clone(),
        }
    }

    fn emit(&mut self, make: impl FnOnce(u64) -> SessionUpdate) {
        let rev = self.next_rev();
        let _ = self.update_sender.send(make(rev));
    }

    /// Publish the cache if it moved, then forward orchestrator signals.
    fn publish(&mut self) {
        let store_rev = self.sync.store().rev();
        if store_rev != self.published_store_rev {
            self.published_store_rev = store_rev;
            self.commit_store_snapshot(self.sync.store());
            self.emit(|rev| SessionUpdate::StoreChanged { rev });
        }
        self.converged
            .store(self.sync.is_converged(), Ordering::SeqCst);
        for signal in self.sync.take_signals() {
            match signal {
                SyncSignal::Converged { chats } => {
                    self.emit(|rev| SessionUpdate::Converged { rev, chats });
                }
            }
        }
    }

    /// Returns false once the actor loop should stop.
    pub fn handle_message(&mut self, msg: CoreMsg) -> bool {
        match msg {
            CoreMsg::Action(action) => {
                // Never log `?action` directly: it carries message text and tokens.
                tracing::info!(action = action.tag(), "dispatch");
                if self.stopped {
                    let tag = action.tag();
                    self.emit(|rev| SessionUpdate::ActionFailed {
                        rev,
                        action: tag,
                        message: SyncError::SessionClosed.to_string(),
                    });
                } else {
                    self.run_action(action);
                }
            }
            CoreMsg::Sync(event) => {
                if self.stopped {
                    return true;
                }
                if let Err(err) = self.sync.handle_event(event) {
                    if err.is_fatal() {
                        self.fail_session(err);
                        return true;
                    }
                    tracing::warn!(%err, "sync event failed");
                }
                self.publish();
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
            CoreMsg::Shutdown => {
                self.shutdown();
                return false;
            }
        }
        true
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::ActionCompleted { action, result } => {
                self.handle_action_result(action, result);
            }
        }
    }

    fn fail_session(&mut self, err: SyncError) {
        tracing::error!(user_id = %self.user_id, %err, "session failed");
        self.sync.teardown();
        self.stopped = true;
        self.converged.store(false, Ordering::SeqCst);
        let message = err.to_string();
        self.emit(|rev| SessionUpdate::SessionFailed { rev, message });
    }

    fn shutdown(&mut self) {
        tracing::info!(user_id = %self.user_id, "logout");
        self.sync.teardown();
        self.stopped = true;
        self.converged.store(false, Ordering::SeqCst);
        self.commit_store_snapshot(&LocalStore::new(self.user_id.clone()));
        self.emit(|rev| SessionUpdate::StoreChanged { rev });
    }
}
