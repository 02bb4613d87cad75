//! Config defaults: applies sensible default values to parsed config.

use crate::schema::{LoggingConfig, MdForgeConfig, PoolConfig, RenderConfig, StreamdownConfig};
use mdforge_core::RenderMode;
use mdforge_pool::ParserBackend;

/// Default log level when neither config nor `RUST_LOG` sets one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Apply all defaults to a freshly loaded config.
pub fn apply_all_defaults(config: MdForgeConfig) -> MdForgeConfig {
    let config = apply_render_defaults(config);
    let config = apply_pool_defaults(config);
    apply_logging_defaults(config)
}

/// Static mode with repair enabled.
fn apply_render_defaults(mut config: MdForgeConfig) -> MdForgeConfig {
    let render = config.render.get_or_insert_with(RenderConfig::default);
    if render.mode.is_none() {
        render.mode = Some(RenderMode::Static);
    }
    let streamdown = render.streamdown.get_or_insert_with(StreamdownConfig::default);
    if streamdown.parse_incomplete_markdown.is_none() {
        streamdown.parse_incomplete_markdown = Some(true);
    }
    config
}

/// In-process parsing unless a pool is asked for. Sizes stay unset so the
/// pool falls back to detected concurrency.
fn apply_pool_defaults(mut config: MdForgeConfig) -> MdForgeConfig {
    let pool = config.pool.get_or_insert_with(PoolConfig::default);
    if pool.backend.is_none() {
        pool.backend = Some(ParserBackend::InProcess);
    }
    config
}

fn apply_logging_defaults(mut config: MdForgeConfig) -> MdForgeConfig {
    let logging = config.logging.get_or_insert_with(LoggingConfig::default);
    if logging.level.is_none() {
        logging.level = Some(DEFAULT_LOG_LEVEL.to_string());
    }
    if logging.json.is_none() {
        logging.json = Some(false);
    }
    config
}
