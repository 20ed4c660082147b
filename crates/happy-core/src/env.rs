//! Environment variable readers, centralized so every crate parses the
//! same names the same way (§6.2).

use std::time::Duration;

/// Default per-request permission timeout, in milliseconds.
pub const DEFAULT_PERMISSION_TIMEOUT_MS: u64 = 120_000;

/// Default daemon heartbeat interval, in milliseconds.
pub const DEFAULT_DAEMON_HEARTBEAT_INTERVAL_MS: u64 = 60_000;

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

/// `HAPPY_PERMISSION_TIMEOUT_MS`, default 120000.
#[must_use]
pub fn permission_timeout() -> Duration {
    Duration::from_millis(read_u64_env(
        "HAPPY_PERMISSION_TIMEOUT_MS",
        DEFAULT_PERMISSION_TIMEOUT_MS,
    ))
}

/// `HAPPY_DAEMON_HEARTBEAT_INTERVAL`, default 60000.
#[must_use]
pub fn daemon_heartbeat_interval() -> Duration {
    Duration::from_millis(read_u64_env(
        "HAPPY_DAEMON_HEARTBEAT_INTERVAL",
        DEFAULT_DAEMON_HEARTBEAT_INTERVAL_MS,
    ))
}

/// `HAPPY_SERVER_URL`, the backend endpoint. No built-in default: callers
/// that need one supply it explicitly (tests, `doctor`).
#[must_use]
pub fn server_url() -> Option<String> {
    std::env::var("HAPPY_SERVER_URL").ok()
}

/// `HAPPY_CODEX_ACP`: `"1"` enables the alternate agent-message transport.
#[must_use]
pub fn codex_acp_enabled() -> bool {
    std::env::var("HAPPY_CODEX_ACP")
        .map(|v| v == "1")
        .unwrap_or(false)
}

/// `DEBUG`: enables verbose logging and handle introspection. Any
/// non-empty value other than `"0"`/`"false"` counts as enabled.
#[must_use]
pub fn debug_enabled() -> bool {
    match std::env::var("DEBUG") {
        Ok(v) => !(v.is_empty() || v == "0" || v.eq_ignore_ascii_case("false")),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn permission_timeout_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        unsafe { std::env::remove_var("HAPPY_PERMISSION_TIMEOUT_MS") };
        assert_eq!(permission_timeout(), Duration::from_millis(120_000));
    }

    #[test]
    fn permission_timeout_reads_override() {
        let _guard = ENV_MUTEX.lock().unwrap();
        unsafe { std::env::set_var("HAPPY_PERMISSION_TIMEOUT_MS", "5000") };
        assert_eq!(permission_timeout(), Duration::from_millis(5000));
        unsafe { std::env::remove_var("HAPPY_PERMISSION_TIMEOUT_MS") };
    }

    #[test]
    fn heartbeat_interval_ignores_garbage() {
        let _guard = ENV_MUTEX.lock().unwrap();
        unsafe { std::env::set_var("HAPPY_DAEMON_HEARTBEAT_INTERVAL", "not-a-number") };
        assert_eq!(
            daemon_heartbeat_interval(),
            Duration::from_millis(60_000)
        );
        unsafe { std::env::remove_var("HAPPY_DAEMON_HEARTBEAT_INTERVAL") };
    }

    #[test]
    fn debug_enabled_false_values() {
        let _guard = ENV_MUTEX.lock().unwrap();
        for v in ["0", "false", "False", ""] {
            unsafe { std::env::set_var("DEBUG", v) };
            assert!(!debug_enabled(), "expected DEBUG={v:?} to be falsy");
        }
        unsafe { std::env::remove_var("DEBUG") };
        assert!(!debug_enabled());
    }

    #[test]
    fn debug_enabled_true_values() {
        let _guard = ENV_MUTEX.lock().unwrap();
        unsafe { std::env::set_var("DEBUG", "1") };
        assert!(debug_enabled());
        unsafe { std::env::remove_var("DEBUG") };
    }

    #[test]
    fn codex_acp_requires_exact_one() {
        let _guard = ENV_MUTEX.lock().unwrap();
        unsafe { std::env::set_var("HAPPY_CODEX_ACP", "true") };
        assert!(!codex_acp_enabled());
        unsafe { std::env::set_var("HAPPY_CODEX_ACP", "1") };
        assert!(codex_acp_enabled());
        unsafe { std::env::remove_var("HAPPY_CODEX_ACP") };
    }
}
