//! Parser backend selection. Chosen once when a session is built.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use mdforge_core::{ForgeError, MarkdownParser, ParserOptionsPatch, Tree};
use mdforge_markdown::InProcessParser;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::pool::{PoolOptions, WorkerPool};
use crate::spawn::ThreadSpawner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserBackend {
    #[default]
    InProcess,
    Pooled,
}

impl fmt::Display for ParserBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParserBackend::InProcess => write!(f, "in_process"),
            ParserBackend::Pooled => write!(f, "pooled"),
        }
    }
}

impl FromStr for ParserBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "in_process" | "inprocess" | "single" => Ok(ParserBackend::InProcess),
            "pooled" | "pool" | "worker_pool" => Ok(ParserBackend::Pooled),
            other => Err(format!("unknown parser backend '{other}'")),
        }
    }
}

/// The parser a session will use for its whole lifetime.
#[derive(Clone)]
pub enum SelectedParser {
    InProcess(InProcessParser),
    Pooled(WorkerPool),
}

impl SelectedParser {
    /// Build the parser for `backend`. Pooled parsers use OS-thread workers.
    pub fn build(backend: ParserBackend, options: PoolOptions) -> Self {
        info!(backend = %backend, "selecting parser backend");
        match backend {
            ParserBackend::InProcess => {
                SelectedParser::InProcess(InProcessParser::new(options.parser))
            }
            ParserBackend::Pooled => {
                SelectedParser::Pooled(WorkerPool::new(options, Arc::new(ThreadSpawner)))
            }
        }
    }

    pub fn pool(&self) -> Option<&WorkerPool> {
        match self {
            SelectedParser::Pooled(pool) => Some(pool),
            SelectedParser::InProcess(_) => None,
        }
    }

    pub fn into_shared(self) -> Arc<dyn MarkdownParser> {
        match self {
            SelectedParser::InProcess(parser) => Arc::new(parser),
            SelectedParser::Pooled(pool) => Arc::new(pool),
        }
    }
}

#[async_trait]
impl MarkdownParser for SelectedParser {
    fn name(&self) -> &str {
        match self {
            SelectedParser::InProcess(parser) => parser.name(),
            SelectedParser::Pooled(pool) => MarkdownParser::name(pool),
        }
    }

    async fn parse_to_hast(&self, markdown: &str) -> Result<Tree, ForgeError> {
        match self {
            SelectedParser::InProcess(parser) => parser.parse_to_hast(markdown).await,
            SelectedParser::Pooled(pool) => pool.parse_to_hast(markdown).await,
        }
    }

    async fn parse_to_html(&self, markdown: &str) -> Result<String, ForgeError> {
        match self {
            SelectedParser::InProcess(parser) => parser.parse_to_html(markdown).await,
            SelectedParser::Pooled(pool) => pool.parse_to_html(markdown).await,
        }
    }

    async fn update_options(&self, patch: &ParserOptionsPatch) -> Result<(), ForgeError> {
        match self {
            SelectedParser::InProcess(parser) => parser.update_options(patch).await,
            SelectedParser::Pooled(pool) => pool.update_options(patch).await,
        }
    }

    async fn batch_parse_to_hast(&self, markdowns: &[String]) -> Result<Vec<Tree>, ForgeError> {
        match self {
            SelectedParser::InProcess(parser) => parser.batch_parse_to_hast(markdowns).await,
            SelectedParser::Pooled(pool) => pool.batch_parse_to_hast(markdowns).await,
        }
    }

    async fn batch_parse_to_html(&self, markdowns: &[String]) -> Result<Vec<String>, ForgeError> {
        match self {
            SelectedParser::InProcess(parser) => parser.batch_parse_to_html(markdowns).await,
            SelectedParser::Pooled(pool) => pool.batch_parse_to_html(markdowns).await,
        }
    }
}
