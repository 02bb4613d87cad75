//! mdforge runtime configuration schema.
//!
//! Every section is optional so a partial YAML file deserializes cleanly;
//! [`crate::defaults::apply_all_defaults`] fills the gaps after loading.

use std::path::PathBuf;

use mdforge_core::{
    ExtendedGrammar, ParserOptions, RenderMode, RenderOptions, StreamdownOptions,
};
use mdforge_pool::{ParserBackend, PoolOptions};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for mdforge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MdForgeConfig {
    /// Render scheduling and streaming behaviour
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render: Option<RenderConfig>,

    /// Worker pool sizing and parser backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolConfig>,

    /// Markdown grammar options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parser: Option<ParserConfig>,

    /// Logging configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

impl MdForgeConfig {
    pub fn render_options(&self) -> RenderOptions {
        self.render.clone().unwrap_or_default().into()
    }

    pub fn parser_options(&self) -> ParserOptions {
        self.parser.clone().unwrap_or_default().into()
    }

    pub fn pool_options(&self) -> PoolOptions {
        self.pool
            .clone()
            .unwrap_or_default()
            .into_pool_options(self.parser_options())
    }

    pub fn parser_backend(&self) -> ParserBackend {
        self.pool
            .as_ref()
            .and_then(|pool| pool.backend)
            .unwrap_or(ParserBackend::InProcess)
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Render
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<RenderMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streamdown: Option<StreamdownConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamdownConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_incomplete_markdown: Option<bool>,
}

impl From<RenderConfig> for RenderOptions {
    fn from(config: RenderConfig) -> Self {
        let defaults = StreamdownOptions::default();
        RenderOptions {
            mode: config.mode.unwrap_or_default(),
            dynamic: config.dynamic,
            debounce_ms: config.debounce_ms,
            streamdown: StreamdownOptions {
                parse_incomplete_markdown: config
                    .streamdown
                    .and_then(|s| s.parse_incomplete_markdown)
                    .unwrap_or(defaults.parse_incomplete_markdown),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    /// `in_process` or `pooled`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<ParserBackend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_count: Option<usize>,
    /// Upper bound for the pool size; never above `MAX_WORKERS_CAP`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
}

impl PoolConfig {
    pub fn into_pool_options(self, parser: ParserOptions) -> PoolOptions {
        PoolOptions {
            worker_count: self.worker_count,
            max_workers: self.max_workers,
            parser,
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParserConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_grammar: Option<Vec<ExtendedGrammar>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_latex: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_raw_html: Option<bool>,
}

impl From<ParserConfig> for ParserOptions {
    fn from(config: ParserConfig) -> Self {
        let defaults = ParserOptions::default();
        ParserOptions {
            extended_grammar: config.extended_grammar.unwrap_or(defaults.extended_grammar),
            supports_latex: config.supports_latex.unwrap_or(defaults.supports_latex),
            allow_raw_html: config.allow_raw_html.unwrap_or(defaults.allow_raw_html),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// `trace` | `debug` | `info` | `warn` | `error`, or a full `EnvFilter` directive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Emit console logs as JSON lines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<bool>,
    /// Directory for the daily-rotated NDJSON log file; unset disables file logging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}
