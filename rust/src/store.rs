//! Denormalized in-memory cache fed by the sync engine.
//!
//! Only the session actor mutates it, so it carries no locking. Readers get a
//! cloned snapshot. Derived views are computed on read.

use std::collections::HashMap;

use crate::model::{Chat, ChatId, Message, MessageId, StarredMessage, User, UserId};

#[derive(Debug, Clone, Default)]
pub struct LocalStore {
    session_user: UserId,
    rev: u64,
    chats: HashMap<ChatId, Chat>,
    users: HashMap<UserId, User>,
    messages: HashMap<ChatId, Vec<Message>>,
    starred: Vec<StarredMessage>,
}

impl LocalStore {
    pub fn new(session_user: impl Into<UserId>) -> Self {
        Self {
            session_user: session_user.into(),
            ..Default::default()
        }
    }

    pub fn session_user(&self) -> &str {
        &self.session_user
    }

    /// Bumped on every mutation that changed something.
    pub fn rev(&self) -> u64 {
        self.rev
    }

    fn touch(&mut self) {
        self.rev += 1;
    }

    /// Insert or replace a chat. Chats that do not list the session user are
    /// refused. Returns whether the cache changed.
    pub fn upsert_chat(&mut self, chat: Chat) -> bool {
        if !chat.has_member(&self.session_user) {
            tracing::debug!(chat_id = %chat.id, "refusing chat without session user");
            return false;
        }
        if self.chats.get(&chat.id) == Some(&chat) {
            return false;
        }
        self.chats.insert(chat.id.clone(), chat);
        self.touch();
        true
    }

    /// Drop a chat together with its messages.
    pub fn remove_chat(&mut self, chat_id: &str) -> bool {
        let had_chat = self.chats.remove(chat_id).is_some();
        let had_messages = self.messages.remove(chat_id).is_some();
        if had_chat || had_messages {
            self.touch();
        }
        had_chat || had_messages
    }

    /// Merge users into the cache. An already-resolved user is only replaced
    /// when `refresh` is set. Returns how many entries changed.
    pub fn upsert_users(&mut self, users: impl IntoIterator<Item = User>, refresh: bool) -> usize {
        let mut changed = 0;
        for user in users {
            match self.users.get(&user.id) {
                Some(existing) if !refresh || existing == &user => continue,
                _ => {
                    self.users.insert(user.id.clone(), user);
                    changed += 1;
                }
            }
        }
        if changed > 0 {
            self.touch();
        }
        changed
    }

    /// Replace the whole message list of a chat, keeping the given order.
    pub fn replace_messages_for_chat(&mut self, chat_id: &str, messages: Vec<Message>) {
        if self.messages.get(chat_id).map(Vec::as_slice) == Some(messages.as_slice()) {
            return;
        }
        if messages.is_empty() && !self.messages.contains_key(chat_id) {
            return;
        }
        self.messages.insert(chat_id.to_string(), messages);
        self.touch();
    }

    pub fn replace_starred(&mut self, starred: Vec<StarredMessage>) {
        if self.starred == starred {
            return;
        }
        self.starred = starred;
        self.touch();
    }

    pub fn chat(&self, chat_id: &str) -> Option<&Chat> {
        self.chats.get(chat_id)
    }

    pub fn chat_count(&self) -> usize {
        self.chats.len()
    }

    /// Chats ordered by `updatedAt`, newest first. Chats without a timestamp
    /// sort last; ties break on id.
    pub fn chats_by_recency(&self) -> Vec<&Chat> {
        let mut list: Vec<&Chat> = self.chats.values().collect();
        list.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        list
    }

    pub fn user(&self, user_id: &str) -> Option<&User> {
        self.users.get(user_id)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Messages in push-key order.
    pub fn messages(&self, chat_id: &str) -> &[Message] {
        self.messages
            .get(chat_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Messages sorted by `sentAt`; undated messages keep their relative
    /// push order at the front.
    pub fn messages_chronological(&self, chat_id: &str) -> Vec<&Message> {
        let mut list: Vec<&Message> = self.messages(chat_id).iter().collect();
        list.sort_by_key(|m| m.sent_at);
        list
    }

    pub fn message(&self, chat_id: &str, message_id: &str) -> Option<&Message> {
        self.messages(chat_id).iter().find(|m| m.id == message_id)
    }

    pub fn starred(&self) -> &[StarredMessage] {
        &self.starred
    }

    pub fn is_starred(&self, chat_id: &str, message_id: &str) -> bool {
        self.starred
            .iter()
            .any(|s| s.chat_id == chat_id && s.message_id == message_id)
    }

    /// Starred messages of one chat that are present in the cache.
    pub fn starred_messages(&self, chat_id: &str) -> Vec<&Message> {
        let ids: Vec<&MessageId> = self
            .starred
            .iter()
            .filter(|s| s.chat_id == chat_id)
            .map(|s| &s.message_id)
            .collect();
        self.messages(chat_id)
            .iter()
            .filter(|m| ids.contains(&&m.id))
            .collect()
    }

    /// Title for a chat row: the group name, else the other member's name,
    /// else the first other member id.
    pub fn chat_title(&self, chat_id: &str) -> Option<String> {
        let chat = self.chat(chat_id)?;
        if let Some(name) = chat.chat_name.as_ref().filter(|n| !n.trim().is_empty()) {
            return Some(name.clone());
        }
        let other = chat.other_members(&self.session_user).next()?;
        Some(
            self.user(other)
                .map(User::display_name)
                .unwrap_or_else(|| other.clone()),
        )
    }
}
