mod output;
mod pool_info_cmd;
mod render_cmd;
mod stream_cmd;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use mdforge_config::{config_dir, config_file_path, load_and_prepare};
use mdforge_logging::init_logger;
use mdforge_pool::{ParserBackend, SelectedParser};

use render_cmd::OutputFormat;
use stream_cmd::StreamArgs;

#[derive(Parser)]
#[command(name = "mdforge")]
#[command(about = "Incremental Markdown renderer with a parser worker pool")]
#[command(version)]
struct Cli {
    /// Config file (default: $MDFORGE_CONFIG_DIR/config.yaml or ~/.mdforge/config.yaml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a Markdown file once and print the result
    Render {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Html)]
        format: OutputFormat,
        /// Parse on the worker pool instead of in-process
        #[arg(long)]
        pooled: bool,
    },
    /// Replay a Markdown file as a growing stream through a pooled session
    Stream {
        file: PathBuf,
        /// Bytes appended per step
        #[arg(long, default_value_t = 64)]
        chunk_size: usize,
        /// Pause between steps; steps closer than the debounce interval coalesce
        #[arg(long, default_value_t = 0, value_name = "MS")]
        delay_ms: u64,
        /// Skip closing unterminated markers before each step
        #[arg(long)]
        no_repair: bool,
        /// Print a per-step reuse table to stderr
        #[arg(long)]
        stats: bool,
    },
    /// Start the worker pool and print its info and stats as JSON
    PoolInfo,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli
        .config
        .unwrap_or_else(|| config_file_path(&config_dir()));
    let (config, report) = load_and_prepare(&path)
        .await
        .with_context(|| format!("Failed to load config from {}", path.display()))?;

    let _log_guard = init_logger(&config.logging());
    for warning in &report.warnings {
        output::note_warn(&warning.to_string());
    }
    if !report.is_valid() {
        for error in &report.errors {
            output::note_error(&error.to_string());
        }
        bail!("invalid config at {}", path.display());
    }
    info!(config = %path.display(), "mdforge starting");

    match cli.command {
        Commands::Render {
            file,
            format,
            pooled,
        } => {
            let backend = if pooled {
                ParserBackend::Pooled
            } else {
                config.parser_backend()
            };
            let parser = SelectedParser::build(backend, config.pool_options());
            let options = config.render_options();
            let result = render_cmd::run(&parser, &file, format, &options).await;
            shutdown(&parser).await?;
            result
        }
        Commands::Stream {
            file,
            chunk_size,
            delay_ms,
            no_repair,
            stats,
        } => {
            let args = StreamArgs {
                chunk_size,
                delay_ms,
                repair: !no_repair,
                stats,
            };
            let parser = SelectedParser::build(ParserBackend::Pooled, config.pool_options());
            let result = stream_cmd::run(&parser, &file, &args, config.render_options()).await;
            shutdown(&parser).await?;
            result
        }
        Commands::PoolInfo => pool_info_cmd::run(config.pool_options()).await,
    }
}

async fn shutdown(parser: &SelectedParser) -> Result<()> {
    if let Some(pool) = parser.pool() {
        pool.destroy().await.context("Failed to shut down worker pool")?;
    }
    Ok(())
}

pub(crate) async fn read_markdown(file: &Path) -> Result<String> {
    tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))
}
