//! Entities mirrored from the remote tree, plus their wire encoding.
//!
//! Decoding never fails on a well-formed JSON object: a missing or malformed
//! field becomes its default (absent, empty, `Normal`), so bad data propagates
//! as absence instead of an error.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub type UserId = String;
pub type ChatId = String;
pub type MessageId = String;

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(string_values(&value))
}

/// String entries of a JSON array, or of a push-key object in key order.
/// Anything else, including non-string entries, is skipped.
pub fn string_values(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Value::Object(map) => map
            .values()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => vec![],
    }
}

fn dedupe_in_order(ids: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

/// Lower-cased "first last", the key user search runs against.
pub fn search_key(first_name: &str, last_name: &str) -> String {
    format!("{} {}", first_name.trim(), last_name.trim())
        .trim()
        .to_lowercase()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(skip)]
    pub id: UserId,
    #[serde(default, deserialize_with = "lenient")]
    pub first_name: String,
    #[serde(default, deserialize_with = "lenient")]
    pub last_name: String,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub first_last: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
    #[serde(default, deserialize_with = "string_list", skip_serializing_if = "Vec::is_empty")]
    pub push_tokens: Vec<String>,
}

impl User {
    /// Decode `users/{id}`. Returns `None` when the payload is not an object.
    pub fn from_value(id: &str, value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        let mut user: User = serde_json::from_value(value.clone()).ok()?;
        user.id = id.to_string();
        Some(user)
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// Name used in info messages and notification titles.
    pub fn display_name(&self) -> String {
        let full = self.full_name();
        if full.is_empty() {
            self.id.clone()
        } else {
            full
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    #[serde(skip)]
    pub id: ChatId,
    #[serde(default, deserialize_with = "string_list")]
    pub users: Vec<UserId>,
    #[serde(
        default,
        rename = "isGroupChat",
        deserialize_with = "lenient",
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub is_group: bool,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub chat_name: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub created_by: Option<UserId>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<UserId>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub latest_message_text: Option<String>,
}

impl Chat {
    /// Decode `chats/{id}`. Member ids are de-duplicated keeping first
    /// occurrence order.
    pub fn from_value(id: &str, value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        let mut chat: Chat = serde_json::from_value(value.clone()).ok()?;
        chat.id = id.to_string();
        chat.users = dedupe_in_order(chat.users);
        Some(chat)
    }

    pub fn has_member(&self, user_id: &str) -> bool {
        self.users.iter().any(|u| u == user_id)
    }

    pub fn other_members<'a>(&'a self, user_id: &'a str) -> impl Iterator<Item = &'a UserId> + 'a {
        self.users.iter().filter(move |u| u.as_str() != user_id)
    }

    /// This chat with `message` recorded as its latest activity, the same
    /// fields a post writes remotely.
    pub fn stamped_by(&self, message: &Message) -> Chat {
        Chat {
            updated_by: Some(message.sent_by.clone()),
            updated_at: message.sent_at.or(self.updated_at),
            latest_message_text: Some(message.text.clone()),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Normal,
    Info,
}

impl MessageKind {
    pub fn is_normal(&self) -> bool {
        matches!(self, Self::Normal)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(skip)]
    pub id: MessageId,
    #[serde(skip)]
    pub chat_id: ChatId,
    #[serde(default, deserialize_with = "lenient")]
    pub sent_by: UserId,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient")]
    pub text: String,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    #[serde(
        default,
        rename = "type",
        deserialize_with = "lenient",
        skip_serializing_if = "MessageKind::is_normal"
    )]
    pub kind: MessageKind,
}

impl Message {
    /// Decode `messages/{chat_id}/{id}`.
    pub fn from_value(chat_id: &str, id: &str, value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        let mut message: Message = serde_json::from_value(value.clone()).ok()?;
        message.id = id.to_string();
        message.chat_id = chat_id.to_string();
        Some(message)
    }

    /// Every child of `messages/{chat_id}`, in the payload's key order.
    pub fn list_from_value(chat_id: &str, value: Option<&Value>) -> Vec<Self> {
        let Some(Value::Object(map)) = value else {
            return vec![];
        };
        map.iter()
            .filter_map(|(id, v)| Self::from_value(chat_id, id, v))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StarredMessage {
    #[serde(skip)]
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub message_id: MessageId,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub starred_at: Option<DateTime<Utc>>,
}

impl StarredMessage {
    /// Flatten `userStarredMessages/{user_id}` (`chatId -> messageId -> record`).
    /// The path keys are authoritative over the record's own fields.
    pub fn list_from_value(user_id: &str, value: Option<&Value>) -> Vec<Self> {
        let Some(Value::Object(chats)) = value else {
            return vec![];
        };
        let mut out = Vec::new();
        for (chat_id, messages) in chats {
            let Value::Object(messages) = messages else {
                continue;
            };
            for (message_id, record) in messages {
                let starred_at = record
                    .get("starredAt")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok());
                out.push(StarredMessage {
                    user_id: user_id.to_string(),
                    chat_id: chat_id.clone(),
                    message_id: message_id.clone(),
                    starred_at,
                });
            }
        }
        out
    }
}
