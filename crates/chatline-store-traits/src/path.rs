//! Addressing for the remote tree.
//!
//! Every node in the remote store is addressed by a slash separated list of
//! segments. The constructors below are the only paths the sync engine reads or
//! writes; keeping them here keeps the wire layout in one place.

use std::fmt;

use crate::error::StoreError;

/// Root collection holding each user's membership list.
pub const USER_CHATS: &str = "userChats";
/// Root collection holding chat records.
pub const CHATS: &str = "chats";
/// Root collection holding per-chat message lists.
pub const MESSAGES: &str = "messages";
/// Root collection holding user profiles.
pub const USERS: &str = "users";
/// Root collection holding per-user starred message records.
pub const USER_STARRED_MESSAGES: &str = "userStarredMessages";

/// A path into the remote tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    /// The root of the tree.
    pub fn root() -> Self {
        Self { segments: vec![] }
    }

    /// Parse a slash separated path. Leading and trailing slashes are ignored;
    /// empty inner segments are rejected.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let mut segments = Vec::new();
        for seg in trimmed.split('/') {
            if seg.is_empty() {
                return Err(StoreError::InvalidPath(raw.to_string()));
            }
            segments.push(seg.to_string());
        }
        Ok(Self { segments })
    }

    /// Append a single child segment.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// Path segments from the root.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// True for the tree root.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment, if any.
    pub fn key(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Parent path; `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { segments })
    }

    /// True when `self` equals `other` or is one of its ancestors.
    pub fn contains(&self, other: &StorePath) -> bool {
        other.segments.len() >= self.segments.len()
            && self
                .segments
                .iter()
                .zip(other.segments.iter())
                .all(|(a, b)| a == b)
    }

    /// True when a write at one path can change the value observed at the other.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.contains(other) || other.contains(self)
    }

    /// `userChats/{user_id}`
    pub fn user_chats(user_id: &str) -> Self {
        Self::root().child(USER_CHATS).child(user_id)
    }

    /// `chats`
    pub fn chats() -> Self {
        Self::root().child(CHATS)
    }

    /// `chats/{chat_id}`
    pub fn chat(chat_id: &str) -> Self {
        Self::chats().child(chat_id)
    }

    /// `messages/{chat_id}`
    pub fn messages(chat_id: &str) -> Self {
        Self::root().child(MESSAGES).child(chat_id)
    }

    /// `users`
    pub fn users() -> Self {
        Self::root().child(USERS)
    }

    /// `users/{user_id}`
    pub fn user(user_id: &str) -> Self {
        Self::users().child(user_id)
    }

    /// `userStarredMessages/{user_id}`
    pub fn user_starred(user_id: &str) -> Self {
        Self::root().child(USER_STARRED_MESSAGES).child(user_id)
    }

    /// `userStarredMessages/{user_id}/{chat_id}/{message_id}`
    pub fn starred_entry(user_id: &str, chat_id: &str, message_id: &str) -> Self {
        Self::user_starred(user_id).child(chat_id).child(message_id)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_strips_slashes() {
        let p = StorePath::parse("/chats/abc/").unwrap();
        assert_eq!(p, StorePath::chat("abc"));
        assert_eq!(p.to_string(), "chats/abc");
        assert_eq!(p.key(), Some("abc"));
    }

    #[test]
    fn parse_rejects_empty_segment() {
        assert!(StorePath::parse("chats//abc").is_err());
        assert!(StorePath::parse("").unwrap().is_root());
    }

    #[test]
    fn overlap_is_ancestor_or_descendant() {
        let chat = StorePath::chat("a");
        let field = chat.child("users");
        assert!(chat.overlaps(&field));
        assert!(field.overlaps(&chat));
        assert!(StorePath::root().overlaps(&field));
        assert!(!StorePath::chat("b").overlaps(&field));
        // Sibling with a shared prefix string is not an ancestor.
        assert!(!StorePath::chat("ab").overlaps(&chat));
    }

    #[test]
    fn starred_entry_layout() {
        let p = StorePath::starred_entry("u", "c", "m");
        assert_eq!(p.to_string(), "userStarredMessages/u/c/m");
        assert_eq!(p.parent().unwrap().parent().unwrap(), StorePath::user_starred("u"));
    }
}
