// Mutation actions: run on the runtime, results come back as InternalEvent.

use std::sync::Arc;

use super::SessionCore;
use crate::error::SyncError;
use crate::model::UserId;
use crate::mutations::ChatMutationService;
use crate::sync::OptimisticWrite;
use crate::updates::{ActionOutput, CoreMsg, InternalEvent, SessionUpdate};
use crate::ChatAction;

impl SessionCore {
    pub(super) fn run_action(&mut self, action: ChatAction) {
        let tag = action.tag();
        let mutations = self.mutations.clone();
        let user_id = self.user_id.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = execute(&mutations, &user_id, action)
                .await
                .map_err(|e| e.to_string());
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ActionCompleted {
                action: tag,
                result,
            })));
        });
    }

    pub(super) fn handle_action_result(
        &mut self,
        action: &'static str,
        result: Result<ActionOutput, String>,
    ) {
        if self.stopped {
            tracing::debug!(action, "action result after logout dropped");
            return;
        }
        let output = match result {
            Ok(output) => output,
            Err(message) => {
                tracing::warn!(action, %message, "action failed");
                self.emit(|rev| SessionUpdate::ActionFailed {
                    rev,
                    action,
                    message,
                });
                return;
            }
        };

        match output {
            ActionOutput::None => {}
            ActionOutput::ChatCreated(chat_id) => {
                self.emit(|rev| SessionUpdate::ChatCreated { rev, chat_id });
            }
            ActionOutput::MessagePosted(message) => {
                let stamped = self
                    .sync
                    .store()
                    .chat(&message.chat_id)
                    .map(|chat| chat.stamped_by(&message));
                self.sync
                    .apply_optimistic(OptimisticWrite::Message(message));
                if let Some(chat) = stamped {
                    self.sync.apply_optimistic(OptimisticWrite::Chat(chat));
                }
                self.publish();
            }
            ActionOutput::StarToggled {
                chat_id,
                message_id,
                state,
            } => {
                self.emit(|rev| SessionUpdate::StarToggled {
                    rev,
                    chat_id,
                    message_id,
                    state,
                });
            }
            ActionOutput::SearchResults { term, users } => {
                self.emit(|rev| SessionUpdate::SearchResults { rev, term, users });
            }
            ActionOutput::ProfileUpdated(user) => {
                self.sync.apply_optimistic(OptimisticWrite::User(user));
                self.publish();
            }
        }
    }
}

async fn execute(
    mutations: &Arc<ChatMutationService>,
    user_id: &UserId,
    action: ChatAction,
) -> Result<ActionOutput, SyncError> {
    let output = match action {
        ChatAction::CreateChat { members } => {
            ActionOutput::ChatCreated(mutations.create_chat(user_id, &members).await?)
        }
        ChatAction::CreateGroupChat { members, name } => ActionOutput::ChatCreated(
            mutations
                .create_group_chat(user_id, &members, &name)
                .await?,
        ),
        ChatAction::AddUsersToChat { chat_id, users } => {
            match mutations.add_users_to_chat(user_id, &users, &chat_id).await? {
                Some(info) => ActionOutput::MessagePosted(info),
                None => ActionOutput::None,
            }
        }
        ChatAction::RemoveUserFromChat {
            chat_id,
            user_id: target,
        } => ActionOutput::MessagePosted(
            mutations
                .remove_user_from_chat(user_id, &target, &chat_id)
                .await?,
        ),
        ChatAction::LeaveChat { chat_id } => {
            mutations
                .remove_user_from_chat(user_id, user_id, &chat_id)
                .await?;
            ActionOutput::None
        }
        ChatAction::SendMessage {
            chat_id,
            text,
            reply_to,
        } => ActionOutput::MessagePosted(
            mutations
                .send_message(&chat_id, user_id, &text, reply_to)
                .await?,
        ),
        ChatAction::SendImage {
            chat_id,
            image_ref,
            reply_to,
        } => ActionOutput::MessagePosted(
            mutations
                .send_image(&chat_id, user_id, &image_ref, reply_to)
                .await?,
        ),
        ChatAction::ToggleStar {
            chat_id,
            message_id,
        } => {
            let state = mutations
                .toggle_star(&message_id, &chat_id, user_id)
                .await?;
            ActionOutput::StarToggled {
                chat_id,
                message_id,
                state,
            }
        }
        ChatAction::SearchUsers { term } => {
            let users = mutations.directory().search_users(&term, user_id).await?;
            ActionOutput::SearchResults { term, users }
        }
        ChatAction::UpdateProfile { update } => {
            ActionOutput::ProfileUpdated(mutations.directory().update_profile(user_id, update).await?)
        }
        ChatAction::RegisterPushToken { token } => {
            mutations
                .directory()
                .register_push_token(user_id, &token)
                .await?;
            ActionOutput::None
        }
    };
    Ok(output)
}
