use crate::model::{ChatId, User};
use crate::mutations::StarToggle;
use crate::sync::SyncEvent;
use crate::ChatAction;

#[derive(Clone, Debug, PartialEq)]
pub enum SessionUpdate {
    /// The published snapshot moved to `rev`.
    StoreChanged {
        rev: u64,
    },
    /// Every tracked chat has reported at least once since the last
    /// membership change.
    Converged {
        rev: u64,
        chats: usize,
    },
    ChatCreated {
        rev: u64,
        chat_id: ChatId,
    },
    StarToggled {
        rev: u64,
        chat_id: ChatId,
        message_id: String,
        state: StarToggle,
    },
    SearchResults {
        rev: u64,
        term: String,
        users: Vec<User>,
    },
    ActionFailed {
        rev: u64,
        action: &'static str,
        message: String,
    },
    /// The session stopped and will not deliver further updates.
    SessionFailed {
        rev: u64,
        message: String,
    },
}

impl SessionUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            SessionUpdate::StoreChanged { rev } => *rev,
            SessionUpdate::Converged { rev, .. } => *rev,
            SessionUpdate::ChatCreated { rev, .. } => *rev,
            SessionUpdate::StarToggled { rev, .. } => *rev,
            SessionUpdate::SearchResults { rev, .. } => *rev,
            SessionUpdate::ActionFailed { rev, .. } => *rev,
            SessionUpdate::SessionFailed { rev, .. } => *rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(ChatAction),
    Sync(SyncEvent),
    Internal(Box<InternalEvent>),
    Shutdown,
}

#[derive(Debug)]
pub enum InternalEvent {
    // Async action results
    ActionCompleted {
        action: &'static str,
        result: Result<ActionOutput, String>,
    },
}

#[derive(Debug)]
pub enum ActionOutput {
    None,
    ChatCreated(ChatId),
    MessagePosted(crate::model::Message),
    StarToggled {
        chat_id: ChatId,
        message_id: String,
        state: StarToggle,
    },
    SearchResults {
        term: String,
        users: Vec<User>,
    },
    ProfileUpdated(User),
}
