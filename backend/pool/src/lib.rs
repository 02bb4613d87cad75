//! `mdforge-pool`: a fixed-size pool of Markdown parser workers.
//!
//! The pool manager is the only owner of slot and queue state; callers reach
//! it through [`WorkerPool`], which also implements [`MarkdownParser`] so it
//! can back a streaming session directly.
//!
//! [`MarkdownParser`]: mdforge_core::MarkdownParser

pub mod env;
pub mod pool;
pub mod select;
pub mod spawn;

pub use env::{detect_max_workers, resolve_worker_count, MAX_WORKERS_CAP};
pub use pool::{PoolInfo, PoolOptions, PoolPhase, PoolStats, SlotLease, WorkerPool};
pub use select::{ParserBackend, SelectedParser};
pub use spawn::{RemoteParser, SpawnedWorker, ThreadSpawner, WorkerHandle, WorkerSpawner};

/// The pooled variant of the parser capability.
pub type PooledParser = WorkerPool;
