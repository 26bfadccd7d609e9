use crate::directory::ProfileUpdate;
use crate::model::{ChatId, MessageId, UserId};

#[derive(Debug, Clone)]
pub enum ChatAction {
    // Chats
    CreateChat {
        members: Vec<UserId>,
    },
    CreateGroupChat {
        members: Vec<UserId>,
        name: String,
    },
    AddUsersToChat {
        chat_id: ChatId,
        users: Vec<UserId>,
    },
    RemoveUserFromChat {
        chat_id: ChatId,
        user_id: UserId,
    },
    LeaveChat {
        chat_id: ChatId,
    },

    // Messages
    SendMessage {
        chat_id: ChatId,
        text: String,
        reply_to: Option<MessageId>,
    },
    SendImage {
        chat_id: ChatId,
        image_ref: String,
        reply_to: Option<MessageId>,
    },
    ToggleStar {
        chat_id: ChatId,
        message_id: MessageId,
    },

    // Users
    SearchUsers {
        term: String,
    },
    UpdateProfile {
        update: ProfileUpdate,
    },
    RegisterPushToken {
        token: String,
    },
}

impl ChatAction {
    /// Log-safe action tag (never includes message text or tokens).
    pub fn tag(&self) -> &'static str {
        match self {
            // Chats
            ChatAction::CreateChat { .. } => "CreateChat",
            ChatAction::CreateGroupChat { .. } => "CreateGroupChat",
            ChatAction::AddUsersToChat { .. } => "AddUsersToChat",
            ChatAction::RemoveUserFromChat { .. } => "RemoveUserFromChat",
            ChatAction::LeaveChat { .. } => "LeaveChat",

            // Messages
            ChatAction::SendMessage { .. } => "SendMessage",
            ChatAction::SendImage { .. } => "SendImage",
            ChatAction::ToggleStar { .. } => "ToggleStar",

            // Users
            ChatAction::SearchUsers { .. } => "SearchUsers",
            ChatAction::UpdateProfile { .. } => "UpdateProfile",
            ChatAction::RegisterPushToken { .. } => "RegisterPushToken",
        }
    }
}
