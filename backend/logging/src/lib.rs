//! Structured logging setup for mdforge.
//!
//! Console output (plain or JSON) plus an optional daily-rotated NDJSON file.

pub mod logger;

pub use logger::{build_filter, init_logger, LoggerGuard, LOG_FILE_PREFIX};
