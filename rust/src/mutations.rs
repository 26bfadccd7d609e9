//! Writes against the remote tree.
//!
//! Multi-step operations are not transactional. A failure part way through
//! leaves the earlier writes in place; the live subscriptions pick up
//! whatever landed.

use std::sync::Arc;

use chatline_store_traits::{RemoteStore, StorePath};
use chrono::Utc;
use serde_json::{Map, Value};

use crate::directory::UserDirectory;
use crate::error::SyncError;
use crate::model::{Chat, ChatId, Message, MessageId, MessageKind, StarredMessage, User, UserId};
use crate::notifications::NotificationDispatcher;

pub const IMAGE_MESSAGE_TEXT: &str = "Image";
pub const IMAGE_NOTIFICATION_BODY: &str = "Sent an image";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StarToggle {
    Starred,
    Unstarred,
}

pub struct ChatMutationService {
    store: Arc<dyn RemoteStore>,
    directory: UserDirectory,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl ChatMutationService {
    pub fn new(store: Arc<dyn RemoteStore>, notifier: Arc<dyn NotificationDispatcher>) -> Self {
        Self {
            directory: UserDirectory::new(store.clone()),
            store,
            notifier,
        }
    }

    pub fn directory(&self) -> &UserDirectory {
        &self.directory
    }

    /// Create a one-to-one (or ad hoc) chat. The creator is always a member.
    pub async fn create_chat(&self, creator: &str, members: &[UserId]) -> Result<ChatId, SyncError> {
        self.write_new_chat(creator, members, None).await
    }

    pub async fn create_group_chat(
        &self,
        creator: &str,
        members: &[UserId],
        name: &str,
    ) -> Result<ChatId, SyncError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::InvalidArgument("group chat needs a name".into()));
        }
        self.write_new_chat(creator, members, Some(name.to_string()))
            .await
    }

    async fn write_new_chat(
        &self,
        creator: &str,
        members: &[UserId],
        name: Option<String>,
    ) -> Result<ChatId, SyncError> {
        let mut users: Vec<UserId> = vec![creator.to_string()];
        for member in members {
            if !member.is_empty() && !users.contains(member) {
                users.push(member.clone());
            }
        }
        let now = Utc::now();
        let chat = Chat {
            users,
            is_group: name.is_some(),
            chat_name: name,
            created_by: Some(creator.to_string()),
            updated_by: Some(creator.to_string()),
            created_at: Some(now),
            updated_at: Some(now),
            ..Default::default()
        };

        let chat_id = self
            .store
            .push(&StorePath::chats(), serde_json::to_value(&chat)?)
            .await?;
        for user in &chat.users {
            self.store
                .push(&StorePath::user_chats(user), Value::String(chat_id.clone()))
                .await?;
        }
        tracing::info!(chat_id = %chat_id, members = chat.users.len(), group = chat.is_group, "chat created");
        Ok(chat_id)
    }

    pub async fn send_message(
        &self,
        chat_id: &str,
        sender: &str,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<Message, SyncError> {
        if text.is_empty() {
            return Err(SyncError::InvalidArgument("empty message".into()));
        }
        let chat = self.member_chat(chat_id, sender).await?;
        let message = Message {
            chat_id: chat.id.clone(),
            sent_by: sender.to_string(),
            sent_at: Some(Utc::now()),
            text: text.to_string(),
            reply_to,
            ..Default::default()
        };
        let message = self.post_message(&chat, message).await?;
        self.notify_members(&chat, sender, text).await;
        Ok(message)
    }

    pub async fn send_image(
        &self,
        chat_id: &str,
        sender: &str,
        image_ref: &str,
        reply_to: Option<MessageId>,
    ) -> Result<Message, SyncError> {
        if image_ref.trim().is_empty() {
            return Err(SyncError::InvalidArgument("empty image reference".into()));
        }
        let chat = self.member_chat(chat_id, sender).await?;
        let message = Message {
            chat_id: chat.id.clone(),
            sent_by: sender.to_string(),
            sent_at: Some(Utc::now()),
            text: IMAGE_MESSAGE_TEXT.to_string(),
            image_url: Some(image_ref.to_string()),
            reply_to,
            ..Default::default()
        };
        let message = self.post_message(&chat, message).await?;
        self.notify_members(&chat, sender, IMAGE_NOTIFICATION_BODY)
            .await;
        Ok(message)
    }

    /// Drop `target` from the chat. When `acting == target` this is the user
    /// leaving. Every membership entry of `target` pointing at the chat is
    /// deleted.
    pub async fn remove_user_from_chat(
        &self,
        acting: &str,
        target: &str,
        chat_id: &str,
    ) -> Result<Message, SyncError> {
        let chat = self.member_chat(chat_id, acting).await?;
        if !chat.has_member(target) {
            return Err(SyncError::InvalidArgument(format!(
                "{target} is not a member of {chat_id}"
            )));
        }

        let remaining: Vec<UserId> = chat.users.iter().filter(|u| *u != target).cloned().collect();
        let mut fields = self.touch_fields(acting);
        fields.insert("users".into(), serde_json::to_value(&remaining)?);
        self.store.update(&StorePath::chat(chat_id), fields).await?;

        let entries = self.directory.membership_entries(target).await?;
        let mut removed = 0;
        for (key, id) in entries {
            if id == chat_id {
                self.store
                    .remove(&StorePath::user_chats(target).child(key))
                    .await?;
                removed += 1;
            }
        }
        if removed == 0 {
            tracing::warn!(chat_id, target, "no membership entry to remove");
        }

        let acting_name = self.first_name(acting).await;
        let text = if acting == target {
            format!("{acting_name} left the chat")
        } else {
            let target_name = self.first_name(target).await;
            format!("{acting_name} removed {target_name} from the chat")
        };
        let chat = Chat {
            users: remaining,
            ..chat
        };
        self.post_info(&chat, acting, text).await
    }

    /// Add every candidate that is not yet a member. Returns the info message
    /// written, or `None` when there was nobody to add.
    pub async fn add_users_to_chat(
        &self,
        acting: &str,
        new_users: &[UserId],
        chat_id: &str,
    ) -> Result<Option<Message>, SyncError> {
        let chat = self.member_chat(chat_id, acting).await?;
        let mut added: Vec<UserId> = Vec::new();
        for user in new_users {
            if !user.is_empty() && !chat.has_member(user) && !added.contains(user) {
                added.push(user.clone());
            }
        }
        if added.is_empty() {
            tracing::debug!(chat_id, "no new members to add");
            return Ok(None);
        }

        for user in &added {
            self.store
                .push(&StorePath::user_chats(user), Value::String(chat.id.clone()))
                .await?;
        }
        let mut users = chat.users.clone();
        users.extend(added.iter().cloned());
        let mut fields = self.touch_fields(acting);
        fields.insert("users".into(), serde_json::to_value(&users)?);
        self.store.update(&StorePath::chat(chat_id), fields).await?;

        let acting_name = self.first_name(acting).await;
        let mut names = Vec::with_capacity(added.len());
        for user in &added {
            names.push(self.first_name(user).await);
        }
        let text = format!("{acting_name} added {} to the chat", join_names(&names));
        let chat = Chat { users, ..chat };
        self.post_info(&chat, acting, text).await.map(Some)
    }

    /// Star the message if it is not starred yet, otherwise unstar it.
    /// The read and the write are separate operations.
    pub async fn toggle_star(
        &self,
        message_id: &str,
        chat_id: &str,
        user_id: &str,
    ) -> Result<StarToggle, SyncError> {
        let path = StorePath::starred_entry(user_id, chat_id, message_id);
        if self.store.get(&path).await?.is_some() {
            self.store.remove(&path).await?;
            tracing::debug!(chat_id, message_id, "message unstarred");
            return Ok(StarToggle::Unstarred);
        }
        let record = StarredMessage {
            user_id: user_id.to_string(),
            chat_id: chat_id.to_string(),
            message_id: message_id.to_string(),
            starred_at: Some(Utc::now()),
        };
        self.store
            .set(&path, serde_json::to_value(&record)?)
            .await?;
        tracing::debug!(chat_id, message_id, "message starred");
        Ok(StarToggle::Starred)
    }

    async fn load_chat(&self, chat_id: &str) -> Result<Chat, SyncError> {
        self.store
            .get(&StorePath::chat(chat_id))
            .await?
            .and_then(|v| Chat::from_value(chat_id, &v))
            .ok_or_else(|| SyncError::ChatNotFound(chat_id.to_string()))
    }

    async fn member_chat(&self, chat_id: &str, user_id: &str) -> Result<Chat, SyncError> {
        let chat = self.load_chat(chat_id).await?;
        if !chat.has_member(user_id) {
            return Err(SyncError::InvalidArgument(format!(
                "{user_id} is not a member of {chat_id}"
            )));
        }
        Ok(chat)
    }

    fn touch_fields(&self, user_id: &str) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("updatedBy".into(), Value::String(user_id.to_string()));
        fields.insert("updatedAt".into(), Value::String(Utc::now().to_rfc3339()));
        fields
    }

    /// Push the message, then stamp the chat with it.
    async fn post_message(&self, chat: &Chat, mut message: Message) -> Result<Message, SyncError> {
        let id = self
            .store
            .push(&StorePath::messages(&chat.id), serde_json::to_value(&message)?)
            .await?;
        message.id = id;

        let mut fields = self.touch_fields(&message.sent_by);
        fields.insert(
            "latestMessageText".into(),
            Value::String(message.text.clone()),
        );
        self.store.update(&StorePath::chat(&chat.id), fields).await?;
        tracing::debug!(chat_id = %chat.id, message_id = %message.id, kind = ?message.kind, "message posted");
        Ok(message)
    }

    async fn post_info(&self, chat: &Chat, acting: &str, text: String) -> Result<Message, SyncError> {
        let message = Message {
            chat_id: chat.id.clone(),
            sent_by: acting.to_string(),
            sent_at: Some(Utc::now()),
            text,
            kind: MessageKind::Info,
            ..Default::default()
        };
        self.post_message(chat, message).await
    }

    async fn lookup(&self, user_id: &str) -> Option<User> {
        match self.directory.get_user(user_id).await {
            Ok(user) => user,
            Err(e) => {
                tracing::debug!(user_id, %e, "user lookup failed");
                None
            }
        }
    }

    async fn first_name(&self, user_id: &str) -> String {
        self.lookup(user_id)
            .await
            .map(|u| u.first_name)
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| user_id.to_string())
    }

    /// Best effort. Never fails the calling mutation.
    async fn notify_members(&self, chat: &Chat, sender: &str, body: &str) {
        let recipients: Vec<UserId> = chat.other_members(sender).cloned().collect();
        if recipients.is_empty() {
            return;
        }
        let sender_user = self.lookup(sender).await;
        let (title, body) = match chat.chat_name.as_deref().filter(|_| chat.is_group) {
            Some(name) => {
                let first = sender_user
                    .as_ref()
                    .map(|u| u.first_name.clone())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| sender.to_string());
                (name.to_string(), format!("{first}: {body}"))
            }
            None => {
                let title = sender_user
                    .map(|u| u.display_name())
                    .unwrap_or_else(|| sender.to_string());
                (title, body.to_string())
            }
        };
        self.notifier
            .dispatch(recipients, title, body, chat.id.clone());
    }
}

fn join_names(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use chatline_memory_store::MemoryRemoteStore;
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct RecordingDispatcher {
        sent: Mutex<Vec<(Vec<UserId>, String, String, ChatId)>>,
    }

    impl NotificationDispatcher for RecordingDispatcher {
        fn dispatch(&self, recipients: Vec<UserId>, title: String, body: String, chat_id: ChatId) {
            self.sent.lock().push((recipients, title, body, chat_id));
        }
    }

    fn service(tree: Value) -> (Arc<MemoryRemoteStore>, Arc<RecordingDispatcher>, ChatMutationService) {
        let store = Arc::new(MemoryRemoteStore::with_tree(tree));
        let notifier = Arc::new(RecordingDispatcher::default());
        let svc = ChatMutationService::new(store.clone(), notifier.clone());
        (store, notifier, svc)
    }

    fn people() -> Value {
        json!({"users": {
            "u": {"firstName": "Ursula", "lastName": "Ng"},
            "v": {"firstName": "Vera", "lastName": "Lane"},
            "w": {"firstName": "Will", "lastName": "Oak"},
            "x": {"firstName": "Xena"},
            "y": {"firstName": "Yuri"},
        }})
    }

    fn read(store: &MemoryRemoteStore, path: &str) -> Option<Value> {
        store.read(&StorePath::parse(path).unwrap())
    }

    fn messages(store: &MemoryRemoteStore, chat_id: &str) -> Vec<Message> {
        Message::list_from_value(chat_id, read(store, &format!("messages/{chat_id}")).as_ref())
    }

    async fn seed_chat(store: &MemoryRemoteStore, chat_id: &str, users: &[&str]) {
        store
            .set(&StorePath::chat(chat_id), json!({"users": users}))
            .await
            .unwrap();
        for user in users {
            store
                .push(&StorePath::user_chats(user), json!(chat_id))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn create_then_send_hi() {
        let (store, notifier, svc) = service(people());
        let chat_id = svc.create_chat("u", &["v".into()]).await.unwrap();

        let chat = Chat::from_value(&chat_id, &read(&store, &format!("chats/{chat_id}")).unwrap()).unwrap();
        assert_eq!(chat.users, vec!["u", "v"]);
        assert_eq!(chat.created_by.as_deref(), Some("u"));
        assert!(!chat.is_group);
        for user in ["u", "v"] {
            let ids = crate::model::string_values(&read(&store, &format!("userChats/{user}")).unwrap());
            assert_eq!(ids, vec![chat_id.clone()]);
        }

        let sent = svc.send_message(&chat_id, "u", "hi", None).await.unwrap();
        let stored = messages(&store, &chat_id);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, sent.id);
        assert_eq!(stored[0].text, "hi");
        assert_eq!(stored[0].sent_by, "u");

        let chat = Chat::from_value(&chat_id, &read(&store, &format!("chats/{chat_id}")).unwrap()).unwrap();
        assert_eq!(chat.latest_message_text.as_deref(), Some("hi"));
        assert_eq!(chat.updated_by.as_deref(), Some("u"));

        let sent = notifier.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0],
            (vec!["v".to_string()], "Ursula Ng".to_string(), "hi".to_string(), chat_id.clone())
        );
    }

    #[tokio::test]
    async fn creator_always_member() {
        let (store, _, svc) = service(people());
        let chat_id = svc
            .create_group_chat("u", &["v".into(), "u".into(), "w".into()], " Crew ")
            .await
            .unwrap();
        let chat = Chat::from_value(&chat_id, &read(&store, &format!("chats/{chat_id}")).unwrap()).unwrap();
        assert_eq!(chat.users, vec!["u", "v", "w"]);
        assert!(chat.is_group);
        assert_eq!(chat.chat_name.as_deref(), Some("Crew"));
        assert!(svc.create_group_chat("u", &["v".into()], "  ").await.is_err());
    }

    #[tokio::test]
    async fn group_notification_uses_chat_name() {
        let (store, notifier, svc) = service(people());
        seed_chat(&store, "g", &["u", "v", "w"]).await;
        store
            .update(
                &StorePath::chat("g"),
                [
                    ("isGroupChat".to_string(), json!(true)),
                    ("chatName".to_string(), json!("Crew")),
                ]
                .into_iter()
                .collect(),
            )
            .await
            .unwrap();

        svc.send_image("g", "v", "images/1.jpg", None).await.unwrap();
        let sent = notifier.sent.lock();
        assert_eq!(sent[0].0, vec!["u", "w"]);
        assert_eq!(sent[0].1, "Crew");
        assert_eq!(sent[0].2, "Vera: Sent an image");
        let stored = messages(&store, "g");
        assert_eq!(stored[0].text, IMAGE_MESSAGE_TEXT);
        assert_eq!(stored[0].image_url.as_deref(), Some("images/1.jpg"));
    }

    #[tokio::test]
    async fn sending_requires_membership() {
        let (store, notifier, svc) = service(people());
        seed_chat(&store, "c", &["u", "v"]).await;
        assert!(matches!(
            svc.send_message("c", "w", "hi", None).await,
            Err(SyncError::InvalidArgument(_))
        ));
        assert!(matches!(
            svc.send_message("missing", "u", "hi", None).await,
            Err(SyncError::ChatNotFound(_))
        ));
        assert!(notifier.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn message_text_is_stored_verbatim() {
        let (store, notifier, svc) = service(people());
        seed_chat(&store, "c", &["u", "v"]).await;

        let sent = svc.send_message("c", "u", "  hi there  ", None).await.unwrap();
        assert_eq!(sent.text, "  hi there  ");
        assert_eq!(messages(&store, "c")[0].text, "  hi there  ");
        let chat = Chat::from_value("c", &read(&store, "chats/c").unwrap()).unwrap();
        assert_eq!(chat.latest_message_text.as_deref(), Some("  hi there  "));
        assert_eq!(notifier.sent.lock()[0].2, "  hi there  ");

        // Whitespace is still a message; only an empty string is refused.
        svc.send_message("c", "u", "   ", None).await.unwrap();
        assert_eq!(messages(&store, "c").len(), 2);
        assert!(matches!(
            svc.send_message("c", "u", "", None).await,
            Err(SyncError::InvalidArgument(_))
        ));
        assert_eq!(messages(&store, "c").len(), 2);
    }

    #[tokio::test]
    async fn remove_member_from_three() {
        let (store, _, svc) = service(people());
        seed_chat(&store, "c", &["u", "v", "w"]).await;
        // A stray duplicate membership entry is removed as well.
        store.push(&StorePath::user_chats("v"), json!("c")).await.unwrap();
        store.push(&StorePath::user_chats("v"), json!("other")).await.unwrap();

        let info = svc.remove_user_from_chat("u", "v", "c").await.unwrap();
        assert_eq!(info.kind, MessageKind::Info);
        assert_eq!(info.text, "Ursula removed Vera from the chat");

        let chat = Chat::from_value("c", &read(&store, "chats/c").unwrap()).unwrap();
        assert_eq!(chat.users, vec!["u", "w"]);
        assert_eq!(chat.latest_message_text.as_deref(), Some(info.text.as_str()));
        let v_chats = crate::model::string_values(&read(&store, "userChats/v").unwrap());
        assert_eq!(v_chats, vec!["other"]);

        let stored = messages(&store, "c");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].kind, MessageKind::Info);
    }

    #[tokio::test]
    async fn leaving_a_chat() {
        let (store, _, svc) = service(people());
        seed_chat(&store, "c", &["u", "v"]).await;
        let info = svc.remove_user_from_chat("v", "v", "c").await.unwrap();
        assert_eq!(info.text, "Vera left the chat");
        assert!(read(&store, "userChats/v").is_none());
    }

    #[tokio::test]
    async fn add_two_users() {
        let (store, _, svc) = service(people());
        seed_chat(&store, "c", &["u"]).await;

        let info = svc
            .add_users_to_chat("u", &["x".into(), "y".into(), "u".into()], "c")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.text, "Ursula added Xena and Yuri to the chat");

        let chat = Chat::from_value("c", &read(&store, "chats/c").unwrap()).unwrap();
        assert_eq!(chat.users, vec!["u", "x", "y"]);
        for user in ["x", "y"] {
            let ids = crate::model::string_values(&read(&store, &format!("userChats/{user}")).unwrap());
            assert_eq!(ids, vec!["c"]);
        }
        assert_eq!(messages(&store, "c").len(), 1);
    }

    #[tokio::test]
    async fn adding_existing_members_writes_nothing() {
        let (store, _, svc) = service(people());
        seed_chat(&store, "c", &["u", "v"]).await;
        let before = store.dump();
        assert!(svc
            .add_users_to_chat("u", &["v".into()], "c")
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.dump(), before);
    }

    #[tokio::test]
    async fn toggle_star_is_self_inverse() {
        let (store, _, svc) = service(json!({}));
        let before = store.dump();
        assert_eq!(svc.toggle_star("m1", "c", "u").await.unwrap(), StarToggle::Starred);
        let record = read(&store, "userStarredMessages/u/c/m1").unwrap();
        assert_eq!(record["messageId"], "m1");
        assert_eq!(record["chatId"], "c");
        assert!(record["starredAt"].is_string());
        assert_eq!(svc.toggle_star("m1", "c", "u").await.unwrap(), StarToggle::Unstarred);
        assert_eq!(store.dump(), before);
    }

    #[test]
    fn names_joined_naturally() {
        assert_eq!(join_names(&["A".into()]), "A");
        assert_eq!(join_names(&["A".into(), "B".into()]), "A and B");
        assert_eq!(join_names(&["A".into(), "B".into(), "C".into()]), "A, B and C");
    }
}
