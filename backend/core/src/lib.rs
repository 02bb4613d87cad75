//! `mdforge-core`: shared vocabulary for the mdforge workspace.
//!
//! Provides the error type, the HAST tree every parser produces, render and
//! parser options, and the [`MarkdownParser`] capability implemented by both
//! the in-process pipeline and the worker pool.

pub mod error;
pub mod hast;
pub mod traits;
pub mod types;

pub use error::ForgeError;
pub use hast::{Element, Node, PropertyValue, Root, Tree};
pub use traits::MarkdownParser;
pub use types::{
    ExtendedGrammar, ParserOptions, ParserOptionsPatch, RenderMode, RenderOptions,
    StreamdownOptions, DEFAULT_STATIC_DEBOUNCE_MS, DEFAULT_STREAMING_DEBOUNCE_MS,
};
