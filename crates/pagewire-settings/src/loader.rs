//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PagewireSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `PAGEWIRE_*` environment overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use pagewire_protocol::MethodRule;
use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::PagewireSettings;

/// Resolve the default settings file path (`~/.pagewire/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pagewire").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PagewireSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<PagewireSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<PagewireSettings> {
    let defaults = serde_json::to_value(PagewireSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored, keeping the file/default value.
pub fn apply_env_overrides(settings: &mut PagewireSettings) {
    // ── Gateway ─────────────────────────────────────────────────────
    let gw = &mut settings.gateway;
    if let Some(v) = read_env_string("PAGEWIRE_HOST") {
        gw.host = v;
    }
    if let Some(v) = read_env_u16("PAGEWIRE_PORT", 0, 65535) {
        gw.port = v;
    }
    if let Some(v) = read_env_string("PAGEWIRE_TOKEN") {
        gw.auth_token = Some(v);
    }
    if let Some(v) = read_env_bool("PAGEWIRE_ALLOW_QUERY_TOKEN") {
        gw.allow_query_token = v;
    }
    if let Some(v) = read_env_string("PAGEWIRE_ALLOWED_ORIGINS") {
        gw.allowed_origins = parse_list(&v);
    }
    if let Some(v) = read_env_string("PAGEWIRE_METHOD_ALLOWLIST") {
        gw.method_allowlist = parse_list(&v).into_iter().map(MethodRule::Exact).collect();
    }
    if let Some(v) = read_env_bool("PAGEWIRE_RETRY_MUTATING_METHODS") {
        gw.retry_mutating_methods = v;
    }
    if let Some(v) = read_env_bool("PAGEWIRE_REQUIRE_EXPLICIT_SESSION") {
        gw.require_explicit_session_when_multiple = v;
    }
    if let Some(v) = read_env_i64("PAGEWIRE_MAX_INVOCATIONS_PER_MINUTE", -1, 1_000_000) {
        gw.max_invocations_per_minute = v;
    }
    if let Some(v) = read_env_u64("PAGEWIRE_DEFAULT_TIMEOUT_MS", 1, 3_600_000) {
        gw.default_timeout_ms = v;
    }

    // ── Runtime ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("PAGEWIRE_GATEWAY_URL") {
        settings.runtime.gateway_url = v;
    }
    if let Some(v) = read_env_string("PAGEWIRE_SESSION_ID") {
        settings.runtime.session_id = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as an `i64` within a range.
pub fn parse_i64_range(val: &str, min: i64, max: i64) -> Option<i64> {
    let n: i64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma-separated list, trimming entries and dropping empties.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_i64(name: &str, min: i64, max: i64) -> Option<i64> {
    let val = std::env::var(name).ok()?;
    let result = parse_i64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid i64 env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_nested_override() {
        let target = json!({"gateway": {"host": "127.0.0.1", "port": 8787}});
        let source = json!({"gateway": {"port": 9000}});
        assert_eq!(
            deep_merge(target, source),
            json!({"gateway": {"host": "127.0.0.1", "port": 9000}})
        );
    }

    #[test]
    fn merge_array_replace() {
        let result = deep_merge(json!({"o": ["a", "b"]}), json!({"o": ["c"]}));
        assert_eq!(result, json!({"o": ["c"]}));
    }

    #[test]
    fn merge_null_preserves_target() {
        let result = deep_merge(json!({"t": 5}), json!({"t": null}));
        assert_eq!(result, json!({"t": 5}));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let result = deep_merge(json!({"a": {"b": 1}}), json!({"a": 2}));
        assert_eq!(result, json!({"a": 2}));
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let s = load_file_layer(Path::new("/nonexistent/pagewire/settings.json")).unwrap();
        assert_eq!(s, PagewireSettings::default());
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"gateway": {"port": 9100, "authToken": "s3cret", "allowedOrigins": ["https://app.example"]},
                "runtime": {"reconnectAttempts": 7}}"#,
        )
        .unwrap();

        let s = load_file_layer(&path).unwrap();
        assert_eq!(s.gateway.port, 9100);
        assert_eq!(s.gateway.auth_token.as_deref(), Some("s3cret"));
        assert_eq!(s.gateway.allowed_origins, vec!["https://app.example"]);
        assert_eq!(s.gateway.default_timeout_ms, 10_000);
        assert_eq!(s.runtime.reconnect_attempts, 7);
        assert_eq!(s.runtime.reconnect_backoff_ms, 500);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(
            load_file_layer(&path),
            Err(crate::SettingsError::Json(_))
        ));
    }

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" on "), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8787", 0, 65535), Some(8787));
        assert_eq!(parse_u16_range("70000", 0, 65535), None);
        assert_eq!(parse_u64_range("0", 1, 10), None);
        assert_eq!(parse_i64_range("-1", -1, 100), Some(-1));
        assert_eq!(parse_i64_range("abc", -1, 100), None);
    }

    #[test]
    fn parse_list_trims_and_drops_empties() {
        assert_eq!(
            parse_list(" https://a.example , ,https://b.example,"),
            vec!["https://a.example", "https://b.example"]
        );
        assert!(parse_list("").is_empty());
    }
}
