//! What a scheduled render actually runs.

use std::sync::Arc;

use async_trait::async_trait;
use mdforge_core::{ForgeError, MarkdownParser, RenderOptions};
use mdforge_markdown::{RenderedDocument, StreamingRenderer};
use tokio::sync::Mutex;

#[async_trait]
pub trait RenderCallback: Send + Sync + 'static {
    async fn render(
        &self,
        markdown: String,
        options: RenderOptions,
    ) -> Result<RenderedDocument, ForgeError>;
}

/// Renders through a shared streaming session. Renders on the session are
/// serialized by its lock.
pub struct SessionCallback<P> {
    session: Arc<Mutex<StreamingRenderer<P>>>,
}

impl<P: MarkdownParser> SessionCallback<P> {
    pub fn new(parser: P) -> Self {
        Self {
            session: Arc::new(Mutex::new(StreamingRenderer::new(parser))),
        }
    }

    pub fn session(&self) -> Arc<Mutex<StreamingRenderer<P>>> {
        Arc::clone(&self.session)
    }
}

#[async_trait]
impl<P: MarkdownParser + 'static> RenderCallback for SessionCallback<P> {
    async fn render(
        &self,
        markdown: String,
        options: RenderOptions,
    ) -> Result<RenderedDocument, ForgeError> {
        let mut session = self.session.lock().await;
        session.render(&markdown, &options).await
    }
}

/// Parses the whole input with a parser on every call, no cache.
pub struct ParserCallback<P> {
    parser: P,
}

impl<P: MarkdownParser> ParserCallback<P> {
    pub fn new(parser: P) -> Self {
        Self { parser }
    }
}

#[async_trait]
impl<P: MarkdownParser + 'static> RenderCallback for ParserCallback<P> {
    async fn render(
        &self,
        markdown: String,
        _options: RenderOptions,
    ) -> Result<RenderedDocument, ForgeError> {
        let tree = self.parser.parse_to_hast(&markdown).await?;
        Ok(RenderedDocument { blocks: vec![tree] })
    }
}
