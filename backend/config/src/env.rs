//! Environment handling for config values.
//!
//! Two passes run at load time:
//! - `${VAR_NAME}` references inside string values are substituted. Only
//!   uppercase `[A-Z_][A-Z0-9_]*` names match; `$${VAR}` escapes to a
//!   literal `${VAR}`.
//! - `MDFORGE_*` variables override individual settings, expressed as a
//!   JSON merge patch over the loaded config.

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{json, Value};
use std::collections::HashMap;

use mdforge_core::RenderMode;

/// Matches `${VAR}` and the escaped form `$${VAR}`.
static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$?\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern"));

pub const ENV_LOG_LEVEL: &str = "MDFORGE_LOG_LEVEL";
pub const ENV_WORKER_COUNT: &str = "MDFORGE_WORKER_COUNT";
pub const ENV_RENDER_MODE: &str = "MDFORGE_RENDER_MODE";
pub const ENV_DEBOUNCE_MS: &str = "MDFORGE_DEBOUNCE_MS";

/// Error returned for missing env vars.
#[derive(Debug, thiserror::Error)]
#[error("Missing env var \"{var_name}\" referenced at config path: {config_path}")]
pub struct MissingEnvVarError {
    pub var_name: String,
    pub config_path: String,
}

/// Substitute `${VAR}` references in a config JSON value tree.
///
/// Walks the entire value tree recursively; only string leaves are processed.
/// Returns an error if any referenced env var is not set or is empty.
pub fn resolve_env_vars(value: &Value) -> Result<Value> {
    substitute_value(value, &std::env::vars().collect(), "")
}

/// Substitute env vars using a provided map.
pub fn resolve_env_vars_with(value: &Value, env: &HashMap<String, String>) -> Result<Value> {
    substitute_value(value, env, "")
}

fn substitute_value(value: &Value, env: &HashMap<String, String>, path: &str) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(substitute_string(s, env, path)?)),
        Value::Array(arr) => {
            let result: Result<Vec<_>> = arr
                .iter()
                .enumerate()
                .map(|(i, v)| substitute_value(v, env, &format!("{path}[{i}]")))
                .collect();
            Ok(Value::Array(result?))
        }
        Value::Object(map) => {
            let mut result = serde_json::Map::new();
            for (k, v) in map {
                let child_path = if path.is_empty() {
                    k.clone()
                } else {
                    format!("{path}.{k}")
                };
                result.insert(k.clone(), substitute_value(v, env, &child_path)?);
            }
            Ok(Value::Object(result))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_string(s: &str, env: &HashMap<String, String>, path: &str) -> Result<String> {
    if !s.contains('$') {
        return Ok(s.to_string());
    }

    let mut missing: Option<MissingEnvVarError> = None;
    let substituted = ENV_VAR_PATTERN.replace_all(s, |caps: &Captures| {
        let var_name = &caps[1];
        if caps[0].starts_with("$$") {
            return format!("${{{var_name}}}");
        }
        match env.get(var_name) {
            Some(val) if !val.is_empty() => val.clone(),
            _ => {
                missing.get_or_insert_with(|| MissingEnvVarError {
                    var_name: var_name.to_string(),
                    config_path: path.to_string(),
                });
                String::new()
            }
        }
    });

    if let Some(err) = missing {
        bail!(err);
    }
    Ok(substituted.into_owned())
}

/// Build a merge patch from the `MDFORGE_*` override variables in `env`.
/// Returns `None` when no override is set.
pub fn env_overrides(env: &HashMap<String, String>) -> Result<Option<Value>> {
    let mut patch = serde_json::Map::new();
    let get = |name: &str| env.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());

    if let Some(level) = get(ENV_LOG_LEVEL) {
        patch.insert("logging".into(), json!({ "level": level }));
    }
    if let Some(raw) = get(ENV_WORKER_COUNT) {
        let count: usize = raw.parse().with_context(|| {
            format!("{ENV_WORKER_COUNT} must be a positive integer, got '{raw}'")
        })?;
        patch.insert("pool".into(), json!({ "workerCount": count }));
    }

    let mut render = serde_json::Map::new();
    if let Some(raw) = get(ENV_RENDER_MODE) {
        let mode: RenderMode = raw
            .parse()
            .map_err(|e: String| anyhow!(e))
            .with_context(|| format!("Invalid {ENV_RENDER_MODE}"))?;
        render.insert("mode".into(), json!(mode));
    }
    if let Some(raw) = get(ENV_DEBOUNCE_MS) {
        let ms: u64 = raw
            .parse()
            .with_context(|| format!("{ENV_DEBOUNCE_MS} must be milliseconds, got '{raw}'"))?;
        render.insert("debounceMs".into(), json!(ms));
    }
    if !render.is_empty() {
        patch.insert("render".into(), Value::Object(render));
    }

    Ok((!patch.is_empty()).then_some(Value::Object(patch)))
}
