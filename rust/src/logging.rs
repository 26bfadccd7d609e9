//! Subscriber setup per platform: os_log plus a log file on iOS, logcat on
//! Android, stderr everywhere else. Only the first call installs anything.

const DEFAULT_DIRECTIVES: &str = "chatline_core=debug,chatline_memory_store=info,info";

/// Directives from the `log_filter` config key, or the built-in default when
/// it is unset or blank.
fn resolve_directives(filter: Option<&str>) -> &str {
    filter
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .unwrap_or(DEFAULT_DIRECTIVES)
}

pub fn init_logging(#[allow(unused)] data_dir: &str, filter: Option<&str>) {
    let directives = resolve_directives(filter);

    #[cfg(target_os = "ios")]
    init_ios(data_dir, directives);

    #[cfg(target_os = "android")]
    init_android(directives);

    #[cfg(not(any(target_os = "ios", target_os = "android")))]
    init_stderr(directives, directives != DEFAULT_DIRECTIVES);
}

#[cfg(target_os = "ios")]
fn init_ios(data_dir: &str, directives: &str) {
    use tracing_subscriber::prelude::*;

    // The file copy stays readable from the simulator even when os_log
    // filtering hides entries.
    let _ = std::fs::create_dir_all(data_dir);
    let file_layer = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(std::path::Path::new(data_dir).join("chatline.log"))
        .ok()
        .map(|file| {
            tracing_subscriber::fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .with_target(true)
        });

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(directives))
        .with(tracing_oslog::OsLogger::new("com.chatline.app", "sync"))
        .with(file_layer)
        .try_init();
}

#[cfg(target_os = "android")]
fn init_android(directives: &str) {
    use tracing_subscriber::prelude::*;

    let logcat = paranoid_android::layer("chatline")
        .with_filter(tracing_subscriber::EnvFilter::new(directives));
    let _ = tracing_subscriber::registry().with(logcat).try_init();
}

#[cfg(not(any(target_os = "ios", target_os = "android")))]
fn init_stderr(directives: &str, configured: bool) {
    // RUST_LOG only applies when the config file sets no filter.
    let env_filter = if configured {
        tracing_subscriber::EnvFilter::new(directives)
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directives))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_filter_falls_back_to_default() {
        assert_eq!(resolve_directives(None), DEFAULT_DIRECTIVES);
        assert_eq!(resolve_directives(Some("  ")), DEFAULT_DIRECTIVES);
        assert_eq!(resolve_directives(Some(" chatline_core=trace ")), "chatline_core=trace");
    }

    #[test]
    fn repeated_init_is_harmless() {
        init_logging("/nonexistent", Some("warn"));
        init_logging("/nonexistent", None);
        tracing::warn!("still logging");
    }
}
