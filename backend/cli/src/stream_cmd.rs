//! `mdforge stream`: replay a file as a growing stream.
//!
//! Each step schedules a longer prefix of the file on a [`RenderScheduler`]
//! backed by one streaming session. With `dynamic` on (the streaming
//! default) steps that arrive within `debounceMs` of each other collapse
//! into one render, and blocks that did not change between renders are
//! reused rather than reparsed.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use mdforge_core::{ForgeError, RenderMode, RenderOptions};
use mdforge_markdown::{RenderStats, RenderedDocument, StreamingRenderer};
use mdforge_pool::SelectedParser;
use mdforge_scheduler::{RenderCallback, RenderScheduler};
use tracing::info;

use crate::output;

pub struct StreamArgs {
    pub chunk_size: usize,
    pub delay_ms: u64,
    pub repair: bool,
    pub stats: bool,
}

pub async fn run(
    parser: &SelectedParser,
    file: &Path,
    args: &StreamArgs,
    options: RenderOptions,
) -> Result<()> {
    let markdown = crate::read_markdown(file).await?;
    let (document, steps) = replay(parser, &markdown, args, options).await?;

    println!("{}", document.to_html());
    if args.stats {
        eprint!("{}", output::stats_table(&steps));
    }
    Ok(())
}

/// Session-backed render callback that keeps the stats of every render it runs.
struct StepRecorder {
    session: tokio::sync::Mutex<StreamingRenderer<SelectedParser>>,
    steps: Mutex<Vec<RenderStats>>,
}

impl StepRecorder {
    fn new(parser: SelectedParser) -> Self {
        Self {
            session: tokio::sync::Mutex::new(StreamingRenderer::new(parser)),
            steps: Mutex::new(Vec::new()),
        }
    }

    fn steps(&self) -> Vec<RenderStats> {
        self.steps.lock().map(|steps| steps.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RenderCallback for StepRecorder {
    async fn render(
        &self,
        markdown: String,
        options: RenderOptions,
    ) -> Result<RenderedDocument, ForgeError> {
        let mut session = self.session.lock().await;
        let document = session.render(&markdown, &options).await?;
        if let Some(stats) = session.last_stats() {
            info!(
                bytes = markdown.len(),
                blocks = stats.blocks,
                reused_prefix = stats.reused_prefix,
                reused_suffix = stats.reused_suffix,
                parsed = stats.parsed,
                "stream step"
            );
            if let Ok(mut steps) = self.steps.lock() {
                steps.push(stats);
            }
        }
        Ok(document)
    }
}

/// Schedule every prefix, then wait for the newest render to settle.
async fn replay(
    parser: &SelectedParser,
    markdown: &str,
    args: &StreamArgs,
    mut options: RenderOptions,
) -> Result<(RenderedDocument, Vec<RenderStats>)> {
    options.mode = RenderMode::Streaming;
    options.streamdown.parse_incomplete_markdown &= args.repair;

    let recorder = Arc::new(StepRecorder::new(parser.clone()));
    let scheduler = RenderScheduler::new(recorder.clone());
    let mut state = scheduler.subscribe();

    for prefix in growing_prefixes(markdown, args.chunk_size) {
        scheduler.schedule(prefix, options.clone());
        if args.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;
        }
    }

    let target = scheduler.flush().await;
    if target == 0 {
        return Ok((RenderedDocument::default(), Vec::new()));
    }
    let settled = state
        .wait_for(|s| s.generation >= target)
        .await
        .map_err(|_| anyhow!("render scheduler stopped before the stream finished"))?
        .clone();

    if let Some(err) = settled.error {
        return Err(err.into());
    }
    let document = settled.content.unwrap_or_default();
    Ok((document, recorder.steps()))
}

/// Prefixes of `text` growing by about `chunk_size` bytes, cut on char
/// boundaries. The last prefix is always the whole text.
fn growing_prefixes(text: &str, chunk_size: usize) -> Vec<&str> {
    let chunk_size = chunk_size.max(1);
    let mut prefixes = Vec::new();
    let mut end = 0;
    while end < text.len() {
        end = (end + chunk_size).min(text.len());
        while !text.is_char_boundary(end) {
            end += 1;
        }
        prefixes.push(&text[..end]);
    }
    prefixes
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdforge_pool::{ParserBackend, PoolOptions};

    fn in_process() -> SelectedParser {
        SelectedParser::build(ParserBackend::InProcess, PoolOptions::default())
    }

    fn args(chunk_size: usize, delay_ms: u64) -> StreamArgs {
        StreamArgs {
            chunk_size,
            delay_ms,
            repair: true,
            stats: false,
        }
    }

    #[test]
    fn prefixes_grow_to_full_text() {
        let prefixes = growing_prefixes("abcdefg", 3);
        assert_eq!(prefixes, vec!["abc", "abcdef", "abcdefg"]);
    }

    #[test]
    fn prefixes_respect_char_boundaries() {
        let text = "héllo wörld";
        for prefix in growing_prefixes(text, 2) {
            assert!(text.starts_with(prefix));
        }
        assert_eq!(growing_prefixes(text, 2).last().copied(), Some(text));
    }

    #[test]
    fn empty_text_has_no_steps() {
        assert!(growing_prefixes("", 4).is_empty());
        assert_eq!(growing_prefixes("ab", 0), vec!["a", "ab"]);
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_stream_renders_once() {
        let markdown = "one\n\ntwo **three";
        let (doc, steps) = replay(&in_process(), markdown, &args(4, 0), RenderOptions::default())
            .await
            .unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(doc.to_html(), "<p>one</p><p>two <strong>three</strong></p>");
    }

    #[tokio::test(start_paused = true)]
    async fn steps_slower_than_debounce_each_render() {
        let options = RenderOptions {
            debounce_ms: Some(5),
            ..Default::default()
        };
        // "one\n\n" then "one\n\ntwo"
        let (doc, steps) = replay(&in_process(), "one\n\ntwo", &args(5, 20), options)
            .await
            .unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps.last().map(|s| s.reused_prefix), Some(1));
        assert_eq!(doc.to_html(), "<p>one</p><p>two</p>");
    }

    #[tokio::test(start_paused = true)]
    async fn non_dynamic_stream_keeps_newest_result() {
        let options = RenderOptions {
            dynamic: Some(false),
            ..Default::default()
        };
        let (doc, _) = replay(&in_process(), "alpha\n\nbeta", &args(4, 0), options)
            .await
            .unwrap();
        assert_eq!(doc.to_html(), "<p>alpha</p><p>beta</p>");
    }

    #[tokio::test]
    async fn empty_file_renders_nothing() {
        let (doc, steps) = replay(&in_process(), "", &args(4, 0), RenderOptions::default())
            .await
            .unwrap();
        assert!(doc.is_empty());
        assert!(steps.is_empty());
    }
}
