//! `mdforge pool-info`

use std::sync::Arc;

use anyhow::{Context, Result};
use mdforge_pool::{PoolInfo, PoolOptions, PoolStats, ThreadSpawner, WorkerPool};
use serde::Serialize;

#[derive(Serialize)]
struct Report {
    info: PoolInfo,
    stats: PoolStats,
}

pub async fn run(options: PoolOptions) -> Result<()> {
    let pool = WorkerPool::new(options, Arc::new(ThreadSpawner));
    pool.ensure_initialized()
        .await
        .context("Failed to start worker pool")?;

    let report = Report {
        info: pool.pool_info(),
        stats: pool.stats().await,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    pool.destroy().await?;
    Ok(())
}
