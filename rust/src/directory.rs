//! Reads and writes on `users/*` and `userChats/*` outside of the live sync.

use std::sync::Arc;

use chatline_store_traits::{RemoteStore, StorePath};
use serde_json::{Map, Value};

use crate::error::SyncError;
use crate::model::{search_key, string_values, ChatId, User, UserId};

const SEARCH_FIELD: &str = "firstLast";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub about: Option<String>,
}

#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<dyn RemoteStore>,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>, SyncError> {
        let value = self.store.get(&StorePath::user(user_id)).await?;
        Ok(value.and_then(|v| User::from_value(user_id, &v)))
    }

    /// `(pushKey, chatId)` entries of a user's membership list, in key order.
    pub async fn membership_entries(&self, user_id: &str) -> Result<Vec<(String, ChatId)>, SyncError> {
        let value = self.store.get(&StorePath::user_chats(user_id)).await?;
        let Some(Value::Object(map)) = value else {
            return Ok(vec![]);
        };
        Ok(map
            .into_iter()
            .filter_map(|(key, v)| v.as_str().map(|id| (key, id.to_string())))
            .collect())
    }

    /// Users whose lower-cased "first last" starts with `term`, excluding
    /// `exclude`. Blank terms return nothing.
    pub async fn search_users(&self, term: &str, exclude: &str) -> Result<Vec<User>, SyncError> {
        let prefix = term.trim().to_lowercase();
        if prefix.is_empty() {
            return Ok(vec![]);
        }
        let found = self
            .store
            .query_prefix(&StorePath::users(), SEARCH_FIELD, &prefix)
            .await?;
        let users: Vec<User> = found
            .iter()
            .filter(|(id, _)| id.as_str() != exclude)
            .filter_map(|(id, v)| User::from_value(id, v))
            .collect();
        tracing::debug!(term = %prefix, results = users.len(), "user search");
        Ok(users)
    }

    /// Write the given profile fields and keep the search key in sync with the
    /// resulting name.
    pub async fn update_profile(&self, user_id: &str, update: ProfileUpdate) -> Result<User, SyncError> {
        let current = self.get_user(user_id).await?.unwrap_or_else(|| User {
            id: user_id.to_string(),
            ..Default::default()
        });

        let mut fields = Map::new();
        let first_name = update.first_name.unwrap_or(current.first_name);
        let last_name = update.last_name.unwrap_or(current.last_name);
        let first_last = search_key(&first_name, &last_name);
        fields.insert("firstName".into(), Value::String(first_name));
        fields.insert("lastName".into(), Value::String(last_name));
        fields.insert(SEARCH_FIELD.into(), Value::String(first_last));
        if let Some(about) = update.about {
            fields.insert("about".into(), Value::String(about));
        }

        self.store.update(&StorePath::user(user_id), fields).await?;
        self.get_user(user_id)
            .await?
            .ok_or_else(|| SyncError::InvalidArgument(format!("user {user_id} vanished after update")))
    }

    /// Add a device token unless it is already registered. Returns whether
    /// anything was written.
    pub async fn register_push_token(&self, user_id: &UserId, token: &str) -> Result<bool, SyncError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(SyncError::InvalidArgument("empty push token".into()));
        }
        let path = StorePath::user(user_id).child("pushTokens");
        let existing = self.store.get(&path).await?;
        if existing
            .as_ref()
            .map(string_values)
            .unwrap_or_default()
            .iter()
            .any(|t| t == token)
        {
            return Ok(false);
        }
        self.store.push(&path, Value::String(token.to_string())).await?;
        tracing::info!(user_id = %user_id, "push token registered");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use chatline_memory_store::MemoryRemoteStore;
    use serde_json::json;

    use super::*;

    fn directory(tree: Value) -> (Arc<MemoryRemoteStore>, UserDirectory) {
        let store = Arc::new(MemoryRemoteStore::with_tree(tree));
        (store.clone(), UserDirectory::new(store))
    }

    #[tokio::test]
    async fn search_matches_prefix_and_skips_self() {
        let (_, dir) = directory(json!({"users": {
            "u": {"firstName": "Ann", "lastName": "Lee", "firstLast": "ann lee"},
            "v": {"firstName": "Anna", "lastName": "Park", "firstLast": "anna park"},
            "w": {"firstName": "Bob", "lastName": "Ray", "firstLast": "bob ray"},
        }}));
        let found = dir.search_users("  ANN ", "u").await.unwrap();
        let ids: Vec<&str> = found.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["v"]);
        assert!(dir.search_users("", "u").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn profile_update_recomputes_search_key() {
        let (store, dir) = directory(json!({"users": {
            "u": {"firstName": "Ann", "lastName": "Lee", "firstLast": "ann lee", "email": "a@x"},
        }}));
        let user = dir
            .update_profile(
                "u",
                ProfileUpdate {
                    last_name: Some("Moss".into()),
                    about: Some("hi".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(user.full_name(), "Ann Moss");
        assert_eq!(user.email.as_deref(), Some("a@x"));
        assert_eq!(
            store.read(&StorePath::parse("users/u/firstLast").unwrap()),
            Some(json!("ann moss"))
        );
    }

    #[tokio::test]
    async fn push_token_registered_once() {
        let (_, dir) = directory(json!({}));
        let user: UserId = "u".into();
        assert!(dir.register_push_token(&user, "tok-1").await.unwrap());
        assert!(!dir.register_push_token(&user, "tok-1").await.unwrap());
        assert!(dir.register_push_token(&user, "tok-2").await.unwrap());
        let user = dir.get_user("u").await.unwrap().unwrap();
        assert_eq!(user.push_tokens, vec!["tok-1", "tok-2"]);
        assert!(dir.register_push_token(&"u".to_string(), " ").await.is_err());
    }

    #[tokio::test]
    async fn membership_entries_keep_keys() {
        let (_, dir) = directory(json!({"userChats": {"u": {"k1": "a", "k2": "b", "k3": 4}}}));
        assert_eq!(
            dir.membership_entries("u").await.unwrap(),
            vec![("k1".to_string(), "a".to_string()), ("k2".to_string(), "b".to_string())]
        );
        assert!(dir.membership_entries("nobody").await.unwrap().is_empty());
    }
}
