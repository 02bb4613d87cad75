//! Config file loading and JSON merge patching.

use crate::schema::MdForgeConfig;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Default config file name within the config directory.
const CONFIG_FILE_NAME: &str = "config.yaml";

/// Resolve the mdforge config directory.
/// Priority: `MDFORGE_CONFIG_DIR` env > `~/.mdforge/`
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MDFORGE_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    match dirs::home_dir() {
        Some(home) => home.join(".mdforge"),
        None => PathBuf::from(".mdforge"),
    }
}

/// Resolve the full path to the main config file.
pub fn config_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE_NAME)
}

/// Load and parse the config from disk.
///
/// Returns `Ok(Default::default())` if the file doesn't exist.
pub async fn load_config(path: &Path) -> Result<MdForgeConfig> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        debug!(path = %path.display(), "Config file does not exist; using defaults");
        return Ok(MdForgeConfig::default());
    }

    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    // An empty file is a valid, empty config.
    if raw.trim().is_empty() {
        return Ok(MdForgeConfig::default());
    }

    let config: MdForgeConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to parse config YAML at: {}", path.display()))?;

    info!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Patch config with a JSON Merge Patch (RFC 7396).
///
/// The patch is applied to the serialized JSON of the config,
/// then deserialized back. This allows partial updates.
pub fn apply_merge_patch(
    config: &MdForgeConfig,
    patch: &serde_json::Value,
) -> Result<MdForgeConfig> {
    let mut value = serde_json::to_value(config)
        .context("Failed to serialize config for merge patch")?;
    json_merge_patch(&mut value, patch);
    let updated: MdForgeConfig = serde_json::from_value(value)
        .context("Failed to deserialize config after merge patch")?;
    Ok(updated)
}

/// RFC 7396 JSON Merge Patch algorithm.
fn json_merge_patch(target: &mut serde_json::Value, patch: &serde_json::Value) {
    let serde_json::Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = serde_json::Value::Object(serde_json::Map::new());
    }
    if let serde_json::Value::Object(target_map) = target {
        for (key, patch_val) in patch_map {
            if patch_val.is_null() {
                target_map.remove(key);
            } else {
                let entry = target_map
                    .entry(key.clone())
                    .or_insert(serde_json::Value::Null);
                json_merge_patch(entry, patch_val);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PoolConfig;

    fn scratch_file(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mdforge-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn merge_patch_adds_key() {
        let base = MdForgeConfig::default();
        let patch = serde_json::json!({ "pool": { "workerCount": 3 } });
        let result = apply_merge_patch(&base, &patch).unwrap();
        assert_eq!(result.pool.unwrap().worker_count, Some(3));
    }

    #[test]
    fn merge_patch_removes_key() {
        let mut base = MdForgeConfig::default();
        base.pool = Some(PoolConfig {
            worker_count: Some(2),
            ..Default::default()
        });
        let patch = serde_json::json!({ "pool": null });
        let result = apply_merge_patch(&base, &patch).unwrap();
        assert!(result.pool.is_none());
    }

    #[tokio::test]
    async fn missing_file_yields_default() {
        let path = scratch_file("does-not-exist.yaml");
        let config = load_config(&path).await.unwrap();
        assert_eq!(config, MdForgeConfig::default());
    }

    #[tokio::test]
    async fn loads_yaml_file() {
        let path = scratch_file("load.yaml");
        std::fs::write(&path, "pool:\n  workerCount: 2\nlogging:\n  json: true\n").unwrap();
        let config = load_config(&path).await.unwrap();
        assert_eq!(config.pool.unwrap().worker_count, Some(2));
        assert_eq!(config.logging.unwrap().json, Some(true));
    }

    #[tokio::test]
    async fn malformed_yaml_names_the_file() {
        let path = scratch_file("broken.yaml");
        std::fs::write(&path, "pool: [unterminated\n").unwrap();
        let err = load_config(&path).await.unwrap_err();
        assert!(format!("{err:#}").contains("broken.yaml"));
    }
}
