//! `mdforge-config`: mdforge runtime configuration.
//!
//! Provides:
//! - Typed config schema with conversions into render, parser and pool options
//! - YAML loading (missing file means defaults)
//! - `${ENV_VAR}` substitution and `MDFORGE_*` overrides
//! - Default value application
//! - Validation with errors and warnings

pub mod defaults;
pub mod env;
pub mod io;
pub mod schema;
pub mod validation;

pub use defaults::apply_all_defaults;
pub use env::{env_overrides, resolve_env_vars, resolve_env_vars_with, MissingEnvVarError};
pub use io::{apply_merge_patch, config_dir, config_file_path, load_config};
pub use schema::{
    LoggingConfig, MdForgeConfig, ParserConfig, PoolConfig, RenderConfig, StreamdownConfig,
};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Load, apply env substitution and overrides, apply defaults and validate
/// a config file.
///
/// This is the main entry point for loading a config at runtime. Validation
/// problems are logged; the caller decides whether errors are fatal.
pub async fn load_and_prepare(path: &Path) -> Result<(MdForgeConfig, ValidationReport)> {
    let env: HashMap<String, String> = std::env::vars().collect();
    let raw_config = load_config(path).await?;
    prepare(raw_config, &env)
}

/// The processing half of [`load_and_prepare`], against an explicit environment.
pub fn prepare(
    raw_config: MdForgeConfig,
    env: &HashMap<String, String>,
) -> Result<(MdForgeConfig, ValidationReport)> {
    let value: Value = serde_json::to_value(&raw_config)
        .context("Failed to serialize config for processing")?;

    // Substitute ${VAR} env vars.
    let value = resolve_env_vars_with(&value, env).context("Failed to resolve env vars in config")?;
    let mut config: MdForgeConfig =
        serde_json::from_value(value).context("Failed to deserialize config after processing")?;

    if let Some(patch) = env_overrides(env)? {
        config = apply_merge_patch(&config, &patch).context("Failed to apply env overrides")?;
    }

    let config = apply_all_defaults(config);

    let report = validate(&config);
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    for error in &report.errors {
        tracing::error!(path = %error.path, message = %error.message, "Config error");
    }

    Ok((config, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdforge_core::RenderMode;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn overrides_win_over_file_values() {
        let raw: MdForgeConfig =
            serde_yaml::from_str("pool:\n  workerCount: 2\nrender:\n  debounceMs: 100\n").unwrap();
        let (config, report) = prepare(
            raw,
            &env(&[("MDFORGE_WORKER_COUNT", "4"), ("MDFORGE_RENDER_MODE", "streaming")]),
        )
        .unwrap();
        assert!(report.is_valid());
        assert_eq!(config.pool_options().worker_count, Some(4));
        let render = config.render_options();
        assert_eq!(render.mode, RenderMode::Streaming);
        assert_eq!(render.debounce_ms, Some(100));
    }

    #[test]
    fn env_references_are_resolved() {
        let raw: MdForgeConfig = serde_yaml::from_str("logging:\n  level: ${APP_LEVEL}\n").unwrap();
        let (config, _) = prepare(raw, &env(&[("APP_LEVEL", "warn")])).unwrap();
        assert_eq!(config.logging().level.as_deref(), Some("warn"));
    }

    #[test]
    fn validation_errors_are_reported_not_raised() {
        let (_, report) = prepare(MdForgeConfig::default(), &env(&[("MDFORGE_WORKER_COUNT", "0")]))
            .unwrap();
        assert!(!report.is_valid());
    }

    #[tokio::test]
    async fn missing_file_prepares_defaults() {
        let path = std::env::temp_dir().join("mdforge-no-such-dir/config.yaml");
        let (config, _) = load_and_prepare(&path).await.unwrap();
        assert!(config.render.is_some());
        assert!(config.logging().level.is_some());
    }
}
