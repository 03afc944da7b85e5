use crate::domain::models::{CallPolicy, RetryPolicy};
use crate::infrastructure::error::InfraError;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

const APP_JSON: &str = "app.json";
const CALLS_JSON: &str = "calls.json";
const SUPPORTED_SCHEMA: u64 = 1;

pub const GRAPHQL_ENDPOINT_KEYS: &[&str] = &["CRM_GRAPHQL_ENDPOINT", "GRAPHQL_ENDPOINT"];
pub const FIREBASE_API_KEY_KEYS: &[&str] = &["CRM_FIREBASE_API_KEY", "FIREBASE_API_KEY"];

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "Phonebook CRM",
                "graphqlEndpoint": null
            }),
        ),
        (
            CALLS_JSON,
            serde_json::json!({
                "schema": 1,
                "settleDelayMs": 1200,
                "callLogLookbackMs": 20000,
                "minMatchDigits": 5,
                "suffixMatchDigits": 10,
                "returnDeepLink": "crmphonebook://calls",
                "directoryRetry": {
                    "maxAttempts": 3,
                    "baseDelayMs": 200
                }
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

/// Fails when any config file is missing, malformed or on another schema version.
pub fn validate_configs(config_dir: &Path) -> Result<(), InfraError> {
    read_config(&config_dir.join(APP_JSON))?;
    read_config(&config_dir.join(CALLS_JSON))?;
    Ok(())
}

/// Call policy from `calls.json`; absent or malformed fields keep their defaults.
pub fn load_call_policy(config_dir: &Path) -> Result<CallPolicy, InfraError> {
    let calls = read_config(&config_dir.join(CALLS_JSON))?;
    let mut policy = CallPolicy::default();

    if let Some(value) = calls.get("settleDelayMs").and_then(serde_json::Value::as_u64) {
        policy.settle_delay = Duration::from_millis(value);
    }
    if let Some(value) = calls.get("callLogLookbackMs").and_then(serde_json::Value::as_u64) {
        policy.call_log_lookback = Duration::from_millis(value);
    }
    if let Some(value) = calls.get("minMatchDigits").and_then(serde_json::Value::as_u64) {
        policy.matching.min_digits = value.max(1) as usize;
    }
    if let Some(value) = calls.get("suffixMatchDigits").and_then(serde_json::Value::as_u64) {
        policy.matching.suffix_digits = value.max(1) as usize;
    }
    policy.return_deep_link = calls
        .get("returnDeepLink")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);

    if let Some(retry) = calls.get("directoryRetry") {
        let defaults = RetryPolicy::default();
        policy.directory_retry = RetryPolicy {
            max_attempts: retry
                .get("maxAttempts")
                .and_then(serde_json::Value::as_u64)
                .map(|value| value.clamp(1, u8::MAX as u64) as u8)
                .unwrap_or(defaults.max_attempts),
            base_delay_ms: retry
                .get("baseDelayMs")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or(defaults.base_delay_ms),
        };
    }

    Ok(policy)
}

pub fn read_graphql_endpoint<F>(config_dir: &Path, lookup: F) -> Result<Option<String>, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(endpoint) = optional_lookup_value(&lookup, GRAPHQL_ENDPOINT_KEYS) {
        return Ok(Some(endpoint));
    }
    let app = read_config(&config_dir.join(APP_JSON))?;
    Ok(app
        .get("graphqlEndpoint")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned))
}

pub fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}
