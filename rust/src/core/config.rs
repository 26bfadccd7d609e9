use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::notifications::DEFAULT_NOTIFICATION_URL;

const CONFIG_FILE: &str = "chatline_config.json";
const DEFAULT_NOTIFICATION_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub disable_network: Option<bool>,
    pub notification_url: Option<String>,
    pub notification_timeout_secs: Option<u64>,
    pub log_filter: Option<String>,
}

/// Missing or unreadable config falls back to defaults.
pub fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE);
    let Ok(bytes) = std::fs::read(&path) else {
        return AppConfig::default();
    };
    match serde_json::from_slice::<AppConfig>(&bytes) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), %e, "invalid config, using defaults");
            AppConfig::default()
        }
    }
}

impl AppConfig {
    pub fn network_enabled(&self) -> bool {
        // Used to keep Rust tests deterministic and offline.
        if let Some(disable) = self.disable_network {
            return !disable;
        }
        std::env::var("CHATLINE_DISABLE_NETWORK").ok().as_deref() != Some("1")
    }

    pub fn notification_url(&self) -> String {
        if let Some(url) = &self.notification_url {
            if !url.is_empty() {
                return url.clone();
            }
        }
        if let Ok(url) = std::env::var("CHATLINE_NOTIFICATION_URL") {
            if !url.is_empty() {
                return url;
            }
        }
        DEFAULT_NOTIFICATION_URL.to_string()
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_secs(
            self.notification_timeout_secs
                .filter(|s| *s > 0)
                .unwrap_or(DEFAULT_NOTIFICATION_TIMEOUT_SECS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_app_config(dir.path().to_str().unwrap());
        assert!(config.disable_network.is_none());
        assert_eq!(config.notification_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"disable_network": true, "notification_url": "http://relay.test/send", "notification_timeout_secs": 3, "unknown": 1}"#,
        )
        .unwrap();
        let config = load_app_config(dir.path().to_str().unwrap());
        assert!(!config.network_enabled());
        assert_eq!(config.notification_url(), "http://relay.test/send");
        assert_eq!(config.notification_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), b"{not json").unwrap();
        let config = load_app_config(dir.path().to_str().unwrap());
        assert!(config.notification_url.is_none());
    }
}
