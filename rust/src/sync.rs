//! Reconciliation loop from the session user's membership list to per-chat
//! subscriptions and the local cache.
//!
//! Backend listeners never touch the cache directly. They hand a [`SyncEvent`]
//! to an [`EventSink`], and the owner of the orchestrator feeds those events
//! back through [`SyncOrchestrator::handle_event`] on a single thread.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chatline_store_traits::{RemoteStore, StoreError, StorePath};
use serde_json::Value;

use crate::error::SyncError;
use crate::model::{string_values, Chat, ChatId, Message, StarredMessage, User, UserId};
use crate::store::LocalStore;
use crate::subscriptions::{SubscriptionHandle, SubscriptionKind, SubscriptionManager, UpdateCallback};

#[derive(Debug)]
pub enum SyncEvent {
    Snapshot {
        handle: SubscriptionHandle,
        value: Option<Value>,
    },
    UserFetched {
        user_id: UserId,
        result: Result<Option<Value>, StoreError>,
    },
}

pub type EventSink = Arc<dyn Fn(SyncEvent) + Send + Sync>;

/// Locally produced data merged ahead of the authoritative push.
#[derive(Debug, Clone)]
pub enum OptimisticWrite {
    Chat(Chat),
    Message(Message),
    /// A profile this session just wrote. Replaces any cached copy.
    User(User),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncSignal {
    /// Every tracked chat has reported its detail at least once.
    Converged { chats: usize },
}

struct TrackedChat {
    detail: SubscriptionHandle,
    messages: SubscriptionHandle,
    reported: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UserFetch {
    Pending,
    Resolved,
    Missing,
    // May be reserved again on the next detail report.
    Failed,
}

pub struct SyncOrchestrator {
    user_id: UserId,
    store: LocalStore,
    subscriptions: SubscriptionManager,
    sink: EventSink,
    tracked: BTreeMap<ChatId, TrackedChat>,
    user_fetches: HashMap<UserId, UserFetch>,
    fetches_issued: HashMap<UserId, usize>,
    membership_seen: bool,
    membership_epoch: u64,
    converged_epoch: Option<u64>,
    signals: Vec<SyncSignal>,
    torn_down: bool,
}

impl SyncOrchestrator {
    pub fn new(
        user_id: impl Into<UserId>,
        remote: Arc<dyn RemoteStore>,
        runtime: tokio::runtime::Handle,
        sink: EventSink,
    ) -> Self {
        let user_id = user_id.into();
        Self {
            store: LocalStore::new(user_id.clone()),
            user_id,
            subscriptions: SubscriptionManager::new(remote, runtime),
            sink,
            tracked: BTreeMap::new(),
            user_fetches: HashMap::new(),
            fetches_issued: HashMap::new(),
            membership_seen: false,
            membership_epoch: 0,
            converged_epoch: None,
            signals: Vec::new(),
            torn_down: false,
        }
    }

    /// Open the membership and starred subscriptions.
    pub fn start(&mut self) -> Result<(), SyncError> {
        tracing::info!(user_id = %self.user_id, "sync starting");
        let callback = self.forward();
        self.subscriptions.open(
            StorePath::user_chats(&self.user_id),
            SubscriptionKind::Membership,
            callback.clone(),
        )?;
        self.subscriptions.open(
            StorePath::user_starred(&self.user_id),
            SubscriptionKind::Starred,
            callback,
        )?;
        Ok(())
    }

    fn forward(&self) -> UpdateCallback {
        let sink = self.sink.clone();
        Arc::new(move |handle: &SubscriptionHandle, value: Option<Value>| {
            sink(SyncEvent::Snapshot {
                handle: handle.clone(),
                value,
            });
        })
    }

    pub fn handle_event(&mut self, event: SyncEvent) -> Result<(), SyncError> {
        match event {
            SyncEvent::Snapshot { handle, value } => {
                if self.torn_down || !handle.is_live() {
                    tracing::trace!(path = %handle.path(), kind = handle.kind().as_str(), "stale snapshot discarded");
                    return Ok(());
                }
                match handle.kind() {
                    SubscriptionKind::Membership => self.reconcile_membership(value)?,
                    SubscriptionKind::ChatDetail => self.on_chat_detail(&handle, value),
                    SubscriptionKind::Messages => self.on_messages(&handle, value),
                    SubscriptionKind::Starred => self.on_starred(value),
                    SubscriptionKind::UserOneShot => {}
                }
            }
            SyncEvent::UserFetched { user_id, result } => {
                if self.torn_down {
                    tracing::trace!(user_id = %user_id, "stale user fetch discarded");
                    return Ok(());
                }
                self.on_user_fetched(user_id, result);
            }
        }
        Ok(())
    }

    fn reconcile_membership(&mut self, value: Option<Value>) -> Result<(), SyncError> {
        let next: BTreeSet<ChatId> = value
            .as_ref()
            .map(string_values)
            .unwrap_or_default()
            .into_iter()
            .collect();
        let removed: Vec<ChatId> = self
            .tracked
            .keys()
            .filter(|id| !next.contains(*id))
            .cloned()
            .collect();
        let added: Vec<ChatId> = next
            .iter()
            .filter(|id| !self.tracked.contains_key(*id))
            .cloned()
            .collect();

        if self.membership_seen && added.is_empty() && removed.is_empty() {
            return Ok(());
        }
        self.membership_seen = true;
        self.membership_epoch += 1;
        tracing::debug!(
            added = added.len(),
            removed = removed.len(),
            tracked = next.len(),
            "membership changed"
        );

        for chat_id in &removed {
            self.untrack(chat_id);
        }
        for chat_id in added {
            self.track(chat_id)?;
        }
        self.check_convergence();
        Ok(())
    }

    fn track(&mut self, chat_id: ChatId) -> Result<(), SyncError> {
        let callback = self.forward();
        let detail = self.subscriptions.open(
            StorePath::chat(&chat_id),
            SubscriptionKind::ChatDetail,
            callback.clone(),
        )?;
        let messages = match self.subscriptions.open(
            StorePath::messages(&chat_id),
            SubscriptionKind::Messages,
            callback,
        ) {
            Ok(handle) => handle,
            Err(err) => {
                self.subscriptions.close(detail.path());
                return Err(err);
            }
        };
        self.tracked.insert(
            chat_id,
            TrackedChat {
                detail,
                messages,
                reported: false,
            },
        );
        Ok(())
    }

    fn untrack(&mut self, chat_id: &str) {
        let Some(tracked) = self.tracked.remove(chat_id) else {
            return;
        };
        self.subscriptions.close(tracked.detail.path());
        self.subscriptions.close(tracked.messages.path());
        self.store.remove_chat(chat_id);
        tracing::debug!(chat_id, "chat untracked");
    }

    fn on_chat_detail(&mut self, handle: &SubscriptionHandle, value: Option<Value>) {
        let Some(chat_id) = handle.path().key().map(str::to_string) else {
            return;
        };
        let Some(tracked) = self.tracked.get_mut(&chat_id) else {
            return;
        };
        tracked.reported = true;

        match value.as_ref().and_then(|v| Chat::from_value(&chat_id, v)) {
            None => {
                tracing::debug!(chat_id = %chat_id, "chat detail absent");
                self.store.remove_chat(&chat_id);
            }
            Some(chat) if !chat.has_member(&self.user_id) => {
                tracing::info!(chat_id = %chat_id, "no longer a member");
                self.untrack(&chat_id);
            }
            Some(chat) => {
                let members = chat.users.clone();
                self.store.upsert_chat(chat);
                self.resolve_users(&members);
            }
        }
        self.check_convergence();
    }

    fn resolve_users(&mut self, members: &[UserId]) {
        for user_id in members {
            if self.store.user(user_id).is_some() {
                continue;
            }
            match self.user_fetches.get(user_id) {
                Some(UserFetch::Pending | UserFetch::Resolved | UserFetch::Missing) => continue,
                Some(UserFetch::Failed) | None => {}
            }
            // Reserve before issuing so a second report cannot race a duplicate.
            self.user_fetches.insert(user_id.clone(), UserFetch::Pending);
            let sink = self.sink.clone();
            let fetched_id = user_id.clone();
            let issued = self
                .subscriptions
                .fetch_once(StorePath::user(user_id), move |result| {
                    sink(SyncEvent::UserFetched {
                        user_id: fetched_id,
                        result,
                    });
                });
            if issued {
                *self.fetches_issued.entry(user_id.clone()).or_default() += 1;
            } else {
                self.user_fetches.remove(user_id);
            }
        }
    }

    fn on_user_fetched(&mut self, user_id: UserId, result: Result<Option<Value>, StoreError>) {
        let state = match result {
            Ok(Some(value)) => match User::from_value(&user_id, &value) {
                Some(user) => {
                    self.store.upsert_users([user], false);
                    UserFetch::Resolved
                }
                None => UserFetch::Missing,
            },
            Ok(None) => {
                tracing::debug!(user_id = %user_id, "user not found");
                UserFetch::Missing
            }
            Err(err) => {
                tracing::warn!(user_id = %user_id, %err, "user fetch failed");
                UserFetch::Failed
            }
        };
        self.user_fetches.insert(user_id, state);
    }

    fn on_messages(&mut self, handle: &SubscriptionHandle, value: Option<Value>) {
        let Some(chat_id) = handle.path().key() else {
            return;
        };
        let messages = Message::list_from_value(chat_id, value.as_ref());
        self.store.replace_messages_for_chat(chat_id, messages);
    }

    fn on_starred(&mut self, value: Option<Value>) {
        let starred = StarredMessage::list_from_value(&self.user_id, value.as_ref());
        self.store.replace_starred(starred);
    }

    fn check_convergence(&mut self) {
        if !self.membership_seen || self.converged_epoch == Some(self.membership_epoch) {
            return;
        }
        if self.tracked.values().all(|t| t.reported) {
            self.converged_epoch = Some(self.membership_epoch);
            tracing::info!(chats = self.tracked.len(), "sync converged");
            self.signals.push(SyncSignal::Converged {
                chats: self.tracked.len(),
            });
        }
    }

    /// Merge a locally produced record. Chats and messages are only accepted
    /// for tracked chats; the next push for the same path replaces them.
    pub fn apply_optimistic(&mut self, write: OptimisticWrite) -> bool {
        if self.torn_down {
            return false;
        }
        match write {
            OptimisticWrite::Chat(chat) => {
                if !self.tracked.contains_key(&chat.id) {
                    return false;
                }
                self.store.upsert_chat(chat)
            }
            OptimisticWrite::Message(message) => {
                if !self.tracked.contains_key(&message.chat_id)
                    || self.store.message(&message.chat_id, &message.id).is_some()
                {
                    return false;
                }
                let chat_id = message.chat_id.clone();
                let mut messages = self.store.messages(&chat_id).to_vec();
                messages.push(message);
                self.store.replace_messages_for_chat(&chat_id, messages);
                true
            }
            OptimisticWrite::User(user) => self.store.upsert_users([user], true) > 0,
        }
    }

    /// Close every subscription. Events delivered afterwards are ignored.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.subscriptions.close_all();
        self.tracked.clear();
        tracing::info!(user_id = %self.user_id, "sync torn down");
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn is_converged(&self) -> bool {
        self.membership_seen && self.converged_epoch == Some(self.membership_epoch)
    }

    pub fn tracked_chat_ids(&self) -> Vec<ChatId> {
        self.tracked.keys().cloned().collect()
    }

    /// How many one-shot fetches were issued for `user_id` this session.
    pub fn fetches_issued(&self, user_id: &str) -> usize {
        self.fetches_issued.get(user_id).copied().unwrap_or(0)
    }

    pub fn pending_fetches(&self) -> usize {
        self.user_fetches
            .values()
            .filter(|s| **s == UserFetch::Pending)
            .count()
    }

    pub fn take_signals(&mut self) -> Vec<SyncSignal> {
        std::mem::take(&mut self.signals)
    }
}
