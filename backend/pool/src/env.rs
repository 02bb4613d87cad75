//! Worker-count resolution.

/// Upper bound on pool size regardless of detected hardware.
pub const MAX_WORKERS_CAP: usize = 8;

/// Used when hardware concurrency cannot be detected.
pub const FALLBACK_MAX_WORKERS: usize = 4;

/// Detected hardware concurrency, capped at [`MAX_WORKERS_CAP`].
pub fn detect_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(MAX_WORKERS_CAP))
        .unwrap_or(FALLBACK_MAX_WORKERS)
}

/// Clamp a requested worker count to `[1, max_workers]`. Unset means "use all".
pub fn resolve_worker_count(requested: Option<usize>, max_workers: usize) -> usize {
    let max_workers = max_workers.max(1);
    requested.unwrap_or(max_workers).clamp(1, max_workers)
}
