use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;

use crate::error::ForgeError;
use crate::hast::Tree;
use crate::types::ParserOptionsPatch;

/// The parsing capability consumed by the block cache, the render session and
/// the worker pool.
///
/// Implementations must be deterministic for identical `(markdown, options)`
/// pairs; cached trees are reused on that assumption.
#[async_trait]
pub trait MarkdownParser: Send + Sync {
    /// Human-readable name of this parser backend.
    fn name(&self) -> &str;

    async fn parse_to_hast(&self, markdown: &str) -> Result<Tree, ForgeError>;

    async fn parse_to_html(&self, markdown: &str) -> Result<String, ForgeError>;

    /// Merge `patch` into the active parser options.
    async fn update_options(&self, patch: &ParserOptionsPatch) -> Result<(), ForgeError>;

    /// Parse every input concurrently. Results keep input order; the first
    /// failure rejects the whole batch.
    async fn batch_parse_to_hast(&self, markdowns: &[String]) -> Result<Vec<Tree>, ForgeError> {
        try_join_all(markdowns.iter().map(|md| self.parse_to_hast(md))).await
    }

    async fn batch_parse_to_html(&self, markdowns: &[String]) -> Result<Vec<String>, ForgeError> {
        try_join_all(markdowns.iter().map(|md| self.parse_to_html(md))).await
    }
}

#[async_trait]
impl<P: MarkdownParser + ?Sized> MarkdownParser for Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn parse_to_hast(&self, markdown: &str) -> Result<Tree, ForgeError> {
        (**self).parse_to_hast(markdown).await
    }

    async fn parse_to_html(&self, markdown: &str) -> Result<String, ForgeError> {
        (**self).parse_to_html(markdown).await
    }

    async fn update_options(&self, patch: &ParserOptionsPatch) -> Result<(), ForgeError> {
        (**self).update_options(patch).await
    }

    async fn batch_parse_to_hast(&self, markdowns: &[String]) -> Result<Vec<Tree>, ForgeError> {
        (**self).batch_parse_to_hast(markdowns).await
    }

    async fn batch_parse_to_html(&self, markdowns: &[String]) -> Result<Vec<String>, ForgeError> {
        (**self).batch_parse_to_html(markdowns).await
    }
}
