//! Environment variable parsing utilities.
//!
//! Every tunable in the workspace is read through these helpers so that a
//! missing or malformed variable always falls back to a typed default:
//!
//! ```
//! use exchange_types::env_utils::{env_bool, env_var_or};
//!
//! let interval_ms: u64 = env_var_or("EXCHANGE_POLL_INTERVAL_MS", 2000);
//! let verbose = env_bool("EXCHANGE_DEBUG_RESOLVER");
//! # let _ = (interval_ms, verbose);
//! ```

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Parse an environment variable into any `FromStr` type.
///
/// Returns `None` if the variable is unset, empty, or fails to parse.
pub fn env_var<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .and_then(|v| v.trim().parse().ok())
}

/// Parse an environment variable, falling back to `default`.
pub fn env_var_or<T: FromStr>(key: &str, default: T) -> T {
    env_var(key).unwrap_or(default)
}

/// Whether a variable is set to a truthy value ("1", "true", "yes", "on").
pub fn env_bool(key: &str) -> bool {
    env_bool_or(key, false)
}

/// Truthy check with an explicit default for the unset case.
pub fn env_bool_or(key: &str, default: bool) -> bool {
    match std::env::var(key).ok() {
        Some(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        None => default,
    }
}

/// String variable with a default.
pub fn env_string_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Millisecond duration variable with a default.
pub fn env_millis_or(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_var_or(key, default_ms))
}

/// Second-granularity duration variable with a default.
pub fn env_secs_or(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_var_or(key, default_secs))
}

/// Path variable; `None` if unset or blank.
pub fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Root directory for staged carriers, mappings and transcripts.
///
/// `EXCHANGE_PUBLISH_HOME` wins; otherwise `~/.exchange-publish`.
pub fn publish_home_dir() -> PathBuf {
    env_path("EXCHANGE_PUBLISH_HOME").unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".exchange-publish")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_parses_and_trims() {
        std::env::set_var("EXCHANGE_TEST_U64", " 42 ");
        assert_eq!(env_var::<u64>("EXCHANGE_TEST_U64"), Some(42));
        std::env::remove_var("EXCHANGE_TEST_U64");

        assert_eq!(env_var::<u64>("EXCHANGE_TEST_MISSING_1"), None);
    }

    #[test]
    fn test_env_var_or_falls_back_on_garbage() {
        std::env::set_var("EXCHANGE_TEST_GARBAGE", "not-a-number");
        let value: u64 = env_var_or("EXCHANGE_TEST_GARBAGE", 7);
        assert_eq!(value, 7);
        std::env::remove_var("EXCHANGE_TEST_GARBAGE");
    }

    #[test]
    fn test_env_bool_variants() {
        std::env::set_var("EXCHANGE_TEST_BOOL_ON", "ON");
        std::env::set_var("EXCHANGE_TEST_BOOL_OFF", "0");
        assert!(env_bool("EXCHANGE_TEST_BOOL_ON"));
        assert!(!env_bool("EXCHANGE_TEST_BOOL_OFF"));
        assert!(!env_bool("EXCHANGE_TEST_BOOL_MISSING"));
        assert!(env_bool_or("EXCHANGE_TEST_BOOL_MISSING", true));
        std::env::remove_var("EXCHANGE_TEST_BOOL_ON");
        std::env::remove_var("EXCHANGE_TEST_BOOL_OFF");
    }

    #[test]
    fn test_durations() {
        std::env::set_var("EXCHANGE_TEST_MS", "250");
        assert_eq!(env_millis_or("EXCHANGE_TEST_MS", 10), Duration::from_millis(250));
        assert_eq!(env_secs_or("EXCHANGE_TEST_SECS_MISSING", 3), Duration::from_secs(3));
        std::env::remove_var("EXCHANGE_TEST_MS");
    }

    #[test]
    fn test_blank_string_uses_default() {
        std::env::set_var("EXCHANGE_TEST_BLANK", "   ");
        assert_eq!(env_string_or("EXCHANGE_TEST_BLANK", "fallback"), "fallback");
        assert!(env_path("EXCHANGE_TEST_BLANK").is_none());
        std::env::remove_var("EXCHANGE_TEST_BLANK");
    }
}
