//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`DroverSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::DroverSettings;

/// Resolve the path to the settings file (`~/.drover/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".drover").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<DroverSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<DroverSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<DroverSettings> {
    let defaults = serde_json::to_value(DroverSettings::default())?;

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
/// `lookup` resolves a variable name; production passes `std::env::var`.
/// Invalid values are ignored with a warning and the file/default stays.
pub fn apply_env_overrides(settings: &mut DroverSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("DROVER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("DROVER_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("DROVER_PROXY_DIR") {
        settings.server.proxy_dir = v;
    }

    // ── Fleet pacing ────────────────────────────────────────────────
    if let Some(v) = env.u64("DROVER_BATCH_SIZE", 1, 1_000) {
        settings.fleet.batch_size = v as u32;
    }
    if let Some(v) = env.u64("DROVER_BATCH_STAGGER_MS", 0, 600_000) {
        settings.fleet.batch_stagger_ms = v;
    }
    if let Some(v) = env.u64("DROVER_TUNING_INTERVAL_MS", 1_000, 3_600_000) {
        settings.fleet.tuning_interval_ms = v;
    }
    if let Some(v) = env.u64("DROVER_BREAKER_COOLDOWN_MS", 1_000, 86_400_000) {
        settings.fleet.breaker_cooldown_ms = v;
    }

    // ── Advisor ─────────────────────────────────────────────────────
    if let Some(v) = env.string("OPENAI_BASE_URL") {
        settings.advisor.base_url = v;
    }
    if let Some(v) = env.string("DROVER_ADVISOR_MODEL") {
        settings.advisor.model = v;
    }
    if let Some(v) = env.u64("DROVER_ADVISOR_TIMEOUT_MS", 1_000, 300_000) {
        settings.advisor.timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("DROVER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("DROVER_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}
