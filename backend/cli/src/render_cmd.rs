//! `mdforge render`: render a whole file once with the configured options.

use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use mdforge_core::RenderOptions;
use mdforge_markdown::{RenderedDocument, StreamingRenderer};
use mdforge_pool::SelectedParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Html,
    /// The HAST tree as JSON
    Hast,
}

pub async fn run(
    parser: &SelectedParser,
    file: &Path,
    format: OutputFormat,
    options: &RenderOptions,
) -> Result<()> {
    let markdown = crate::read_markdown(file).await?;
    let document = render_once(parser, &markdown, options).await?;

    match format {
        OutputFormat::Html => println!("{}", document.to_html()),
        OutputFormat::Hast => {
            let json = serde_json::to_string_pretty(&document.into_root())
                .context("Failed to serialize HAST")?;
            println!("{json}");
        }
    }
    Ok(())
}

async fn render_once(
    parser: &SelectedParser,
    markdown: &str,
    options: &RenderOptions,
) -> Result<RenderedDocument> {
    let mut session = StreamingRenderer::new(parser.clone());
    Ok(session.render(markdown, options).await?)
}
