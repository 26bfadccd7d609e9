// Push notification fan-out through an HTTP push relay.

use std::sync::Arc;
use std::time::Duration;

use chatline_store_traits::{RemoteStore, StorePath};
use serde::Serialize;

use crate::model::{string_values, ChatId, UserId};

pub const DEFAULT_NOTIFICATION_URL: &str = "https://exp.host/--/api/v2/push/send";

/// Fire-and-forget delivery of a notification to a set of users.
pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, recipients: Vec<UserId>, title: String, body: String, chat_id: ChatId);
}

/// Used when the network is disabled.
pub struct DisabledDispatcher;

impl NotificationDispatcher for DisabledDispatcher {
    fn dispatch(&self, recipients: Vec<UserId>, _title: String, _body: String, chat_id: ChatId) {
        tracing::debug!(chat_id = %chat_id, recipients = recipients.len(), "push: disabled, dropping notification");
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushData {
    #[serde(rename = "chatId")]
    pub chat_id: ChatId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushPayload {
    pub to: String,
    pub title: String,
    pub body: String,
    pub data: PushData,
}

pub struct PushRelayDispatcher {
    store: Arc<dyn RemoteStore>,
    client: reqwest::Client,
    endpoint: String,
    runtime: tokio::runtime::Handle,
}

impl PushRelayDispatcher {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        endpoint: String,
        timeout: Duration,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "push: client builder failed, using defaults");
                reqwest::Client::new()
            });
        Self {
            store,
            client,
            endpoint,
            runtime,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl NotificationDispatcher for PushRelayDispatcher {
    fn dispatch(&self, recipients: Vec<UserId>, title: String, body: String, chat_id: ChatId) {
        if recipients.is_empty() {
            return;
        }
        let store = self.store.clone();
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let runtime = self.runtime.clone();

        self.runtime.spawn(async move {
            for user_id in recipients {
                let tokens = match store.get(&StorePath::user(&user_id).child("pushTokens")).await {
                    Ok(value) => value.as_ref().map(string_values).unwrap_or_default(),
                    Err(e) => {
                        tracing::warn!(user_id = %user_id, %e, "push: failed to read tokens");
                        continue;
                    }
                };
                for token in tokens {
                    let payload = PushPayload {
                        to: token,
                        title: title.clone(),
                        body: body.clone(),
                        data: PushData {
                            chat_id: chat_id.clone(),
                        },
                    };
                    let client = client.clone();
                    let url = endpoint.clone();
                    let user_id = user_id.clone();
                    // One task per token; a failed send never affects the others.
                    runtime.spawn(async move {
                        match client.post(&url).json(&payload).send().await {
                            Ok(resp) if resp.status().is_success() => {
                                tracing::debug!(user_id = %user_id, status = %resp.status(), "push: sent");
                            }
                            Ok(resp) => {
                                tracing::warn!(user_id = %user_id, status = %resp.status(), "push: relay returned non-success");
                            }
                            Err(e) => {
                                tracing::warn!(user_id = %user_id, %e, "push: send failed");
                            }
                        }
                    });
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chatline_memory_store::MemoryRemoteStore;
    use chatline_test_utils::{spawn_capture_server, unreachable_url};
    use serde_json::json;

    use super::*;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    fn store() -> Arc<MemoryRemoteStore> {
        Arc::new(MemoryRemoteStore::with_tree(json!({"users": {
            "v": {"firstName": "Vera", "pushTokens": {"-a": "tok-v1", "-b": "tok-v2"}},
            "w": {"firstName": "Will", "pushTokens": ["tok-w"]},
            "x": {"firstName": "Xena"},
        }})))
    }

    #[test]
    fn posts_one_request_per_token() {
        let rt = runtime();
        let (url, rx) = spawn_capture_server("200 OK", r#"{"data":[]}"#, 3);
        let dispatcher = PushRelayDispatcher::new(
            store(),
            format!("{url}/push/send"),
            Duration::from_secs(5),
            rt.handle().clone(),
        );

        dispatcher.dispatch(
            vec!["v".into(), "w".into(), "x".into()],
            "Ann".into(),
            "hi".into(),
            "c1".into(),
        );

        let mut bodies: Vec<serde_json::Value> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .map(|req| {
                assert_eq!(req.method, "POST");
                assert_eq!(req.path, "/push/send");
                req.json()
            })
            .collect();
        bodies.sort_by_key(|b| b["to"].as_str().unwrap_or_default().to_string());

        assert_eq!(
            bodies[0],
            json!({"to": "tok-v1", "title": "Ann", "body": "hi", "data": {"chatId": "c1"}})
        );
        assert_eq!(bodies[1]["to"], "tok-v2");
        assert_eq!(bodies[2]["to"], "tok-w");
    }

    #[test]
    fn relay_errors_do_not_stop_sibling_tokens() {
        let rt = runtime();
        let (url, rx) = spawn_capture_server("500 Internal Server Error", "{}", 2);
        let dispatcher =
            PushRelayDispatcher::new(store(), url, Duration::from_secs(5), rt.handle().clone());
        dispatcher.dispatch(vec!["v".into()], "t".into(), "b".into(), "c1".into());
        for _ in 0..2 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
    }

    #[test]
    fn unreachable_relay_is_swallowed() {
        let rt = runtime();
        let dispatcher = PushRelayDispatcher::new(
            store(),
            unreachable_url(),
            Duration::from_millis(500),
            rt.handle().clone(),
        );
        dispatcher.dispatch(vec!["v".into(), "w".into()], "t".into(), "b".into(), "c1".into());
        DisabledDispatcher.dispatch(vec!["v".into()], "t".into(), "b".into(), "c1".into());
        std::thread::sleep(Duration::from_millis(100));
    }
}
