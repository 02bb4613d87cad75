//! Streaming render session.
//!
//! Holds the block cache for one consumer. `render` takes `&mut self`, so
//! calls on a session are serialized by construction.

use std::sync::Arc;

use mdforge_core::{ForgeError, MarkdownParser, RenderOptions, Root, Tree};
use tracing::debug;

use crate::blocks::split_blocks;
use crate::cache::{diff_blocks, Block, RenderStats};
use crate::repair::repair;

/// The ordered trees produced by one render call.
#[derive(Debug, Clone, Default)]
pub struct RenderedDocument {
    pub blocks: Vec<Tree>,
}

impl RenderedDocument {
    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|tree| tree.is_empty())
    }

    /// Concatenate every block into a single root, in document order.
    pub fn into_root(self) -> Root {
        let children = self
            .blocks
            .into_iter()
            .flat_map(|tree| {
                Arc::try_unwrap(tree)
                    .map_or_else(|shared| shared.children.clone(), |root| root.children)
            })
            .collect();
        Root::new(children)
    }

    pub fn to_html(&self) -> String {
        self.blocks.iter().map(|tree| tree.to_html()).collect()
    }
}

pub struct StreamingRenderer<P> {
    parser: P,
    cache: Vec<Block>,
    last_stats: Option<RenderStats>,
}

impl<P: MarkdownParser> StreamingRenderer<P> {
    pub fn new(parser: P) -> Self {
        Self {
            parser,
            cache: Vec::new(),
            last_stats: None,
        }
    }

    pub fn parser(&self) -> &P {
        &self.parser
    }

    pub fn cached_blocks(&self) -> &[Block] {
        &self.cache
    }

    pub fn last_stats(&self) -> Option<RenderStats> {
        self.last_stats
    }

    pub fn reset(&mut self) {
        self.cache.clear();
        self.last_stats = None;
    }

    /// Render `markdown`. Static renders drop the cache and parse the whole
    /// input as one unit; streaming renders repair, split and diff against
    /// the cache. The cache only changes when the call succeeds.
    pub async fn render(
        &mut self,
        markdown: &str,
        options: &RenderOptions,
    ) -> Result<RenderedDocument, ForgeError> {
        if !options.is_streaming() {
            self.cache.clear();
            let tree = self.parser.parse_to_hast(markdown).await?;
            self.last_stats = Some(RenderStats {
                blocks: 1,
                parsed: 1,
                ..Default::default()
            });
            return Ok(RenderedDocument { blocks: vec![tree] });
        }

        let source = if options.should_repair() {
            repair(markdown)
        } else {
            markdown.to_string()
        };
        let sources = split_blocks(&source);
        let (blocks, stats) = diff_blocks(&self.parser, &self.cache, sources).await?;

        debug!(
            parser = self.parser.name(),
            blocks = stats.blocks,
            reused_prefix = stats.reused_prefix,
            reused_suffix = stats.reused_suffix,
            parsed = stats.parsed,
            "streaming render"
        );

        let trees = blocks.iter().map(|block| block.tree.clone()).collect();
        self.cache = blocks;
        self.last_stats = Some(stats);
        Ok(RenderedDocument { blocks: trees })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use mdforge_core::{ParserOptionsPatch, RenderMode};

    use crate::pipeline::MarkdownPipeline;

    /// Records every input it parses.
    #[derive(Default)]
    struct Recording {
        inputs: Mutex<Vec<String>>,
        pipeline: MarkdownPipeline,
    }

    impl Recording {
        fn inputs(&self) -> Vec<String> {
            self.inputs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MarkdownParser for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn parse_to_hast(&self, markdown: &str) -> Result<Tree, ForgeError> {
            self.inputs.lock().unwrap().push(markdown.to_string());
            if markdown.contains("boom") {
                return Err(ForgeError::Parse("boom".into()));
            }
            Ok(Arc::new(self.pipeline.parse(markdown)))
        }

        async fn parse_to_html(&self, markdown: &str) -> Result<String, ForgeError> {
            Ok(self.parse_to_hast(markdown).await?.to_html())
        }

        async fn update_options(&self, _patch: &ParserOptionsPatch) -> Result<(), ForgeError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn repeated_streaming_renders_reuse_blocks() {
        let mut session = StreamingRenderer::new(Recording::default());
        let streaming = RenderOptions::streaming();

        session.render("alpha\n\nbeta\n\ngamma", &streaming).await.unwrap();
        assert_eq!(session.parser().inputs().len(), 3);

        let doc = session
            .render("alpha\n\nbeta updated\n\ngamma", &streaming)
            .await
            .unwrap();
        let inputs = session.parser().inputs();
        assert_eq!(inputs.len(), 4);
        assert!(inputs[3].contains("beta updated"));
        assert_eq!(
            doc.to_html(),
            "<p>alpha</p><p>beta updated</p><p>gamma</p>"
        );
        assert_eq!(session.last_stats().map(|s| s.parsed), Some(1));
    }

    #[tokio::test]
    async fn repair_runs_before_parsing() {
        let mut session = StreamingRenderer::new(Recording::default());
        session
            .render("This is **bold", &RenderOptions::streaming())
            .await
            .unwrap();
        assert!(session.parser().inputs()[0].contains("**bold**"));
    }

    #[tokio::test]
    async fn repair_can_be_disabled() {
        let mut session = StreamingRenderer::new(Recording::default());
        let mut options = RenderOptions::streaming();
        options.streamdown.parse_incomplete_markdown = false;
        session.render("This is **bold", &options).await.unwrap();
        assert_eq!(session.parser().inputs(), vec!["This is **bold".to_string()]);
    }

    #[tokio::test]
    async fn static_render_parses_whole_input_and_drops_cache() {
        let mut session = StreamingRenderer::new(Recording::default());
        session
            .render("a\n\nb", &RenderOptions::streaming())
            .await
            .unwrap();
        assert_eq!(session.cached_blocks().len(), 2);

        let static_opts = RenderOptions {
            mode: RenderMode::Static,
            ..Default::default()
        };
        let doc = session.render("a\n\nb **open", &static_opts).await.unwrap();
        assert!(session.cached_blocks().is_empty());
        assert_eq!(doc.blocks.len(), 1);
        assert_eq!(session.parser().inputs().last().unwrap(), "a\n\nb **open");

        // Back to streaming: cold cache, every block parsed again.
        let before = session.parser().inputs().len();
        session
            .render("a\n\nb", &RenderOptions::streaming())
            .await
            .unwrap();
        assert_eq!(session.parser().inputs().len() - before, 2);
    }

    #[tokio::test]
    async fn failed_render_keeps_last_good_cache() {
        let mut session = StreamingRenderer::new(Recording::default());
        let streaming = RenderOptions::streaming();
        session.render("one\n\ntwo", &streaming).await.unwrap();
        let cached: Vec<String> = session
            .cached_blocks()
            .iter()
            .map(|b| b.source.clone())
            .collect();

        let err = session.render("one\n\nboom", &streaming).await.unwrap_err();
        assert!(matches!(err, ForgeError::Parse(_)));
        let after: Vec<String> = session
            .cached_blocks()
            .iter()
            .map(|b| b.source.clone())
            .collect();
        assert_eq!(after, cached);
    }

    #[tokio::test]
    async fn reset_clears_cache() {
        let mut session = StreamingRenderer::new(Recording::default());
        session.render("x", &RenderOptions::streaming()).await.unwrap();
        session.reset();
        assert!(session.cached_blocks().is_empty());
        assert!(session.last_stats().is_none());
    }

    #[tokio::test]
    async fn empty_streaming_input_renders_nothing() {
        let mut session = StreamingRenderer::new(Recording::default());
        let doc = session.render("", &RenderOptions::streaming()).await.unwrap();
        assert!(doc.is_empty());
        assert!(session.parser().inputs().is_empty());
        assert!(doc.into_root().is_empty());
    }
}
