//! Config validation: deep schema checks with user-friendly error messages.

use crate::schema::MdForgeConfig;
use mdforge_core::RenderOptions;
use mdforge_pool::MAX_WORKERS_CAP;
use thiserror::Error;

/// Levels accepted by `logging.level` when it is a bare level name.
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// A config validation error with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// A collection of validation errors found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate the config and return a report of all errors and warnings.
pub fn validate(config: &MdForgeConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_render(config, &mut report);
    validate_pool(config, &mut report);
    validate_logging(config, &mut report);
    report
}

fn validate_render(config: &MdForgeConfig, report: &mut ValidationReport) {
    let Some(render) = &config.render else { return };
    let options: RenderOptions = render.clone().into();
    if render.debounce_ms == Some(0) && options.is_dynamic() {
        report.warn(
            "render.debounceMs",
            "debounceMs is 0; dynamic renders will run on every update",
        );
    }
}

fn validate_pool(config: &MdForgeConfig, report: &mut ValidationReport) {
    let Some(pool) = &config.pool else { return };
    if pool.worker_count == Some(0) {
        report.error("pool.workerCount", "workerCount must be >= 1");
    }
    if let Some(max) = pool.max_workers {
        if max == 0 {
            report.error("pool.maxWorkers", "maxWorkers must be >= 1");
        } else if max > MAX_WORKERS_CAP {
            report.error(
                "pool.maxWorkers",
                format!("maxWorkers {max} exceeds the limit of {MAX_WORKERS_CAP}"),
            );
        }
    }
    if let (Some(count), Some(max)) = (pool.worker_count, pool.max_workers) {
        if count > max {
            report.warn(
                "pool.workerCount",
                format!("workerCount {count} is above maxWorkers {max} and will be clamped"),
            );
        }
    }
}

fn validate_logging(config: &MdForgeConfig, report: &mut ValidationReport) {
    let Some(logging) = &config.logging else { return };
    let Some(level) = &logging.level else { return };
    // Directive strings such as `mdforge_pool=trace,info` are passed through.
    if level.contains('=') || level.contains(',') {
        return;
    }
    if !LOG_LEVELS.contains(&level.trim().to_ascii_lowercase().as_str()) {
        report.error(
            "logging.level",
            format!("Unknown log level '{level}'. Use one of: {}", LOG_LEVELS.join(", ")),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{LoggingConfig, PoolConfig, RenderConfig};
    use mdforge_core::RenderMode;

    #[test]
    fn empty_config_is_valid() {
        let report = validate(&MdForgeConfig::default());
        assert!(report.is_valid(), "errors: {:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn zero_workers_is_error() {
        let mut cfg = MdForgeConfig::default();
        cfg.pool = Some(PoolConfig {
            worker_count: Some(0),
            ..Default::default()
        });
        let report = validate(&cfg);
        assert!(!report.is_valid());
        assert_eq!(report.errors[0].path, "pool.workerCount");
    }

    #[test]
    fn max_workers_above_cap_is_error() {
        let mut cfg = MdForgeConfig::default();
        cfg.pool = Some(PoolConfig {
            max_workers: Some(MAX_WORKERS_CAP + 1),
            ..Default::default()
        });
        let report = validate(&cfg);
        assert!(report.errors[0].message.contains("exceeds"));
    }

    #[test]
    fn worker_count_above_max_is_warning() {
        let mut cfg = MdForgeConfig::default();
        cfg.pool = Some(PoolConfig {
            worker_count: Some(6),
            max_workers: Some(4),
            ..Default::default()
        });
        let report = validate(&cfg);
        assert!(report.is_valid());
        assert!(report.warnings[0].message.contains("clamped"));
    }

    #[test]
    fn zero_debounce_warns_only_when_dynamic() {
        let mut cfg = MdForgeConfig::default();
        cfg.render = Some(RenderConfig {
            debounce_ms: Some(0),
            ..Default::default()
        });
        assert!(validate(&cfg).warnings.is_empty());

        cfg.render = Some(RenderConfig {
            mode: Some(RenderMode::Streaming),
            debounce_ms: Some(0),
            ..Default::default()
        });
        let report = validate(&cfg);
        assert_eq!(report.warnings[0].path, "render.debounceMs");
    }

    #[test]
    fn unknown_log_level_is_error() {
        let mut cfg = MdForgeConfig::default();
        cfg.logging = Some(LoggingConfig {
            level: Some("loud".into()),
            ..Default::default()
        });
        assert!(!validate(&cfg).is_valid());

        cfg.logging = Some(LoggingConfig {
            level: Some("mdforge_pool=trace,warn".into()),
            ..Default::default()
        });
        assert!(validate(&cfg).is_valid());
    }
}
