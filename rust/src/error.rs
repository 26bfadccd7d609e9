use chatline_store_traits::{StoreError, StorePath};

use crate::model::ChatId;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The remote store could not be reached. Fatal for the session.
    #[error("connectivity lost at {path}: {message}")]
    Connectivity { path: String, message: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("session closed")]
    SessionClosed,

    #[error("chat not found: {0}")]
    ChatNotFound(ChatId),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl SyncError {
    pub fn connectivity(path: &StorePath, err: StoreError) -> Self {
        match err {
            StoreError::Connectivity(message) => Self::Connectivity {
                path: path.to_string(),
                message,
            },
            other => Self::Store(other),
        }
    }

    /// Errors after which the session cannot continue.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Connectivity { .. } | Self::SessionClosed => true,
            Self::Store(err) => err.is_connectivity(),
            Self::ChatNotFound(_) | Self::InvalidArgument(_) => false,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(StoreError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_keeps_path() {
        let err = SyncError::connectivity(
            &StorePath::user_chats("u"),
            StoreError::Connectivity("offline".into()),
        );
        assert_eq!(err.to_string(), "connectivity lost at userChats/u: offline");
        assert!(err.is_fatal());
    }

    #[test]
    fn non_connectivity_store_errors_pass_through() {
        let err = SyncError::connectivity(
            &StorePath::chats(),
            StoreError::InvalidPath("bad".into()),
        );
        assert!(matches!(err, SyncError::Store(StoreError::InvalidPath(_))));
        assert!(!err.is_fatal());
        assert!(!SyncError::ChatNotFound("c".into()).is_fatal());
    }
}
