//! Incremental Markdown rendering
//!
//! Splits a streamed Markdown document into top-level blocks, repairs the
//! unterminated tail, and reparses only the blocks that changed since the
//! previous render.

pub mod blocks;
pub mod cache;
pub mod latex;
pub mod pipeline;
pub mod repair;
pub mod session;

pub use blocks::{split_blocks, tokenize, Token, TokenKind};
pub use cache::{diff_blocks, reusable_edges, Block, Edges, RenderStats};
pub use pipeline::{InProcessParser, MarkdownPipeline};
pub use repair::{repair, repair_with, RepairOptions, INCOMPLETE_LINK_URL};
pub use session::{RenderedDocument, StreamingRenderer};
