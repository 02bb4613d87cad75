//! Worker Pool Manager
//!
//! A single manager task owns every slot, the waiter queue and the lifecycle
//! state. [`WorkerPool`] handles talk to it over an unbounded channel; a
//! [`SlotLease`] returns its slot to the manager when dropped.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use mdforge_core::{ForgeError, MarkdownParser, ParserOptions, ParserOptionsPatch, Tree};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::env::{detect_max_workers, resolve_worker_count, MAX_WORKERS_CAP};
use crate::spawn::{RemoteParser, SpawnedWorker, WorkerHandle, WorkerSpawner};

/// Pool construction options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolOptions {
    /// Requested pool size; clamped to `[1, maxWorkers]`. Unset uses `maxWorkers`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_count: Option<usize>,
    /// Upper bound on the pool size, capped at [`MAX_WORKERS_CAP`]. Unset
    /// uses the detected hardware concurrency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
    #[serde(default)]
    pub parser: ParserOptions,
}

impl PoolOptions {
    pub fn resolved_max_workers(&self) -> usize {
        self.max_workers
            .map(|max| max.clamp(1, MAX_WORKERS_CAP))
            .unwrap_or_else(detect_max_workers)
    }
}

/// Lifecycle of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolPhase {
    Uninitialized,
    Initializing,
    Ready,
    /// Initialization failed; every operation reports that failure.
    Failed,
    Destroyed,
}

/// Point-in-time slot and queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub active_workers: usize,
    pub idle_workers: usize,
    pub queued_tasks: usize,
    pub completed_tasks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolInfo {
    pub worker_count: usize,
    pub max_workers: usize,
    pub environment: String,
    pub initialized: bool,
}

type LeaseReply = oneshot::Sender<Result<SlotLease, ForgeError>>;

enum PoolCommand {
    Init {
        reply: oneshot::Sender<Result<(), ForgeError>>,
    },
    InitDone(Result<Vec<SpawnedWorker>, ForgeError>),
    Acquire {
        reply: LeaseReply,
    },
    Release {
        slot: usize,
        completed: bool,
    },
    UpdateOptions {
        patch: ParserOptionsPatch,
        reply: oneshot::Sender<Result<(), ForgeError>>,
    },
    Stats {
        reply: oneshot::Sender<PoolStats>,
    },
    Destroy {
        reply: oneshot::Sender<()>,
    },
}

/// Exclusive use of one worker slot. Dropping it hands the slot back.
pub struct SlotLease {
    slot: usize,
    proxy: RemoteParser,
    completed: bool,
    manager: Option<mpsc::UnboundedSender<PoolCommand>>,
}

impl SlotLease {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn proxy(&self) -> &RemoteParser {
        &self.proxy
    }

    /// Count this lease as a finished task when it is released.
    pub fn complete(&mut self) {
        self.completed = true;
    }

    fn disarm(mut self) {
        self.manager = None;
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.take() {
            let _ = manager.send(PoolCommand::Release {
                slot: self.slot,
                completed: self.completed,
            });
        }
    }
}

impl std::fmt::Debug for SlotLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotLease")
            .field("slot", &self.slot)
            .field("worker", &self.proxy.worker())
            .finish()
    }
}

struct Slot {
    handle: Box<dyn WorkerHandle>,
    proxy: RemoteParser,
    busy: bool,
}

struct Manager {
    spawner: Arc<dyn WorkerSpawner>,
    worker_count: usize,
    options: ParserOptions,
    phase: watch::Sender<PoolPhase>,
    failure: Option<ForgeError>,
    slots: Vec<Slot>,
    waiters: VecDeque<LeaseReply>,
    init_waiters: Vec<oneshot::Sender<Result<(), ForgeError>>>,
    completed: u64,
    tx: mpsc::WeakUnboundedSender<PoolCommand>,
}

impl Manager {
    fn phase(&self) -> PoolPhase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: PoolPhase) {
        self.phase.send_replace(phase);
    }

    /// Error for operations that need a ready pool.
    fn unavailable(&self) -> ForgeError {
        match self.phase() {
            PoolPhase::Destroyed => ForgeError::PoolDestroyed,
            _ => self
                .failure
                .clone()
                .unwrap_or_else(|| ForgeError::PoolInit("pool is not initialized".into())),
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<PoolCommand>) {
        while let Some(command) = rx.recv().await {
            self.handle(command);
        }
        self.terminate_all();
        debug!("pool manager stopped");
    }

    fn handle(&mut self, command: PoolCommand) {
        match command {
            PoolCommand::Init { reply } => self.init(reply),
            PoolCommand::InitDone(result) => self.init_done(result),
            PoolCommand::Acquire { reply } => self.acquire(reply),
            PoolCommand::Release { slot, completed } => self.release(slot, completed),
            PoolCommand::UpdateOptions { patch, reply } => self.update_options(patch, reply),
            PoolCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            PoolCommand::Destroy { reply } => {
                self.destroy();
                let _ = reply.send(());
            }
        }
    }

    fn init(&mut self, reply: oneshot::Sender<Result<(), ForgeError>>) {
        match self.phase() {
            PoolPhase::Ready => {
                let _ = reply.send(Ok(()));
            }
            PoolPhase::Initializing => self.init_waiters.push(reply),
            PoolPhase::Failed | PoolPhase::Destroyed => {
                let _ = reply.send(Err(self.unavailable()));
            }
            PoolPhase::Uninitialized => {
                self.init_waiters.push(reply);
                self.set_phase(PoolPhase::Initializing);
                info!(
                    workers = self.worker_count,
                    environment = self.spawner.environment(),
                    "initializing worker pool"
                );

                let spawner = Arc::clone(&self.spawner);
                let options = self.options.clone();
                let count = self.worker_count;
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let spawns = (0..count).map(|id| spawner.spawn(id, options.clone()));
                    let result = try_join_all(spawns).await;
                    if let Some(tx) = tx.upgrade() {
                        let _ = tx.send(PoolCommand::InitDone(result));
                    }
                });
            }
        }
    }

    fn init_done(&mut self, result: Result<Vec<SpawnedWorker>, ForgeError>) {
        let waiters = std::mem::take(&mut self.init_waiters);
        if self.phase() != PoolPhase::Initializing {
            // Destroyed while spawning.
            if let Ok(workers) = result {
                for mut worker in workers {
                    worker.handle.terminate();
                }
            }
            return;
        }

        let outcome = match result {
            Ok(workers) => {
                self.slots = workers
                    .into_iter()
                    .map(|w| Slot {
                        handle: w.handle,
                        proxy: w.proxy,
                        busy: false,
                    })
                    .collect();
                self.set_phase(PoolPhase::Ready);
                info!(workers = self.slots.len(), "worker pool ready");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "worker pool initialization failed");
                let err = match err {
                    ForgeError::PoolInit(_) => err,
                    other => ForgeError::PoolInit(other.to_string()),
                };
                self.failure = Some(err.clone());
                self.set_phase(PoolPhase::Failed);
                Err(err)
            }
        };
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    fn lease(&self, slot: usize) -> SlotLease {
        SlotLease {
            slot,
            proxy: self.slots[slot].proxy.clone(),
            completed: false,
            manager: self.tx.upgrade(),
        }
    }

    fn acquire(&mut self, reply: LeaseReply) {
        if self.phase() != PoolPhase::Ready {
            let _ = reply.send(Err(self.unavailable()));
            return;
        }
        // Waiters are served strictly in order; a free scan only happens with an empty queue.
        if self.waiters.is_empty() {
            if let Some(slot) = self.slots.iter().position(|s| !s.busy) {
                self.slots[slot].busy = true;
                trace!(slot, "slot acquired");
                if let Err(Ok(lease)) = reply.send(Ok(self.lease(slot))) {
                    lease.disarm();
                    self.release(slot, false);
                }
                return;
            }
        }
        trace!(queued = self.waiters.len() + 1, "all slots busy, queueing");
        self.waiters.push_back(reply);
    }

    fn release(&mut self, slot: usize, completed: bool) {
        if self.phase() != PoolPhase::Ready || slot >= self.slots.len() {
            return;
        }
        if completed {
            self.completed += 1;
        }
        while let Some(waiter) = self.waiters.pop_front() {
            // Hand the slot straight to the oldest waiter; it stays busy.
            match waiter.send(Ok(self.lease(slot))) {
                Ok(()) => {
                    trace!(slot, "slot handed to waiter");
                    return;
                }
                Err(Ok(lease)) => lease.disarm(),
                Err(Err(_)) => {}
            }
        }
        self.slots[slot].busy = false;
        trace!(slot, "slot released");
    }

    fn update_options(
        &mut self,
        patch: ParserOptionsPatch,
        reply: oneshot::Sender<Result<(), ForgeError>>,
    ) {
        if self.phase() != PoolPhase::Ready {
            let _ = reply.send(Err(self.unavailable()));
            return;
        }
        self.options.merge(&patch);
        debug!(options = ?self.options, "broadcasting parser options");
        let proxies: Vec<RemoteParser> = self.slots.iter().map(|s| s.proxy.clone()).collect();
        tokio::spawn(async move {
            let result = try_join_all(proxies.iter().map(|p| p.update_options(&patch)))
                .await
                .map(|_| ());
            let _ = reply.send(result);
        });
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            active_workers: self.slots.len(),
            idle_workers: self.slots.iter().filter(|s| !s.busy).count(),
            queued_tasks: self.waiters.len(),
            completed_tasks: self.completed,
        }
    }

    fn terminate_all(&mut self) {
        for slot in &mut self.slots {
            slot.handle.terminate();
        }
        self.slots.clear();
    }

    fn destroy(&mut self) {
        match self.phase() {
            PoolPhase::Uninitialized | PoolPhase::Failed | PoolPhase::Destroyed => {}
            PoolPhase::Initializing => {
                for waiter in self.init_waiters.drain(..) {
                    let _ = waiter.send(Err(ForgeError::PoolDestroyed));
                }
                self.set_phase(PoolPhase::Destroyed);
                info!("worker pool destroyed during initialization");
            }
            PoolPhase::Ready => {
                let workers = self.slots.len();
                self.terminate_all();
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Err(ForgeError::PoolDestroyed));
                }
                self.completed = 0;
                self.set_phase(PoolPhase::Destroyed);
                info!(workers, "worker pool destroyed");
            }
        }
    }
}

/// A fixed-size pool of parser workers. Cloning yields another handle to the
/// same pool.
#[derive(Clone)]
pub struct WorkerPool {
    tx: mpsc::UnboundedSender<PoolCommand>,
    phase: watch::Receiver<PoolPhase>,
    worker_count: usize,
    max_workers: usize,
    environment: String,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_count", &self.worker_count)
            .field("phase", &*self.phase.borrow())
            .finish()
    }
}

impl WorkerPool {
    /// Create a pool sized from `options.max_workers` or detected hardware
    /// concurrency. Workers are spawned lazily on first use. Must be called
    /// inside a Tokio runtime.
    pub fn new(options: PoolOptions, spawner: Arc<dyn WorkerSpawner>) -> Self {
        let max_workers = options.resolved_max_workers();
        Self::with_max_workers(options, spawner, max_workers)
    }

    pub fn with_max_workers(
        options: PoolOptions,
        spawner: Arc<dyn WorkerSpawner>,
        max_workers: usize,
    ) -> Self {
        let worker_count = resolve_worker_count(options.worker_count, max_workers);
        let environment = spawner.environment().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(PoolPhase::Uninitialized);

        let manager = Manager {
            spawner,
            worker_count,
            options: options.parser,
            phase: phase_tx,
            failure: None,
            slots: Vec::new(),
            waiters: VecDeque::new(),
            init_waiters: Vec::new(),
            completed: 0,
            tx: tx.downgrade(),
        };
        tokio::spawn(manager.run(rx));

        Self {
            tx,
            phase: phase_rx,
            worker_count,
            max_workers: max_workers.max(1),
            environment,
        }
    }

    fn closed() -> ForgeError {
        ForgeError::ChannelClosed("pool manager".into())
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> PoolCommand,
    ) -> Result<T, ForgeError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).map_err(|_| Self::closed())?;
        rx.await.map_err(|_| Self::closed())
    }

    pub fn phase(&self) -> PoolPhase {
        *self.phase.borrow()
    }

    /// Spawn the workers if that has not happened yet. Concurrent callers
    /// share one initialization.
    pub async fn ensure_initialized(&self) -> Result<(), ForgeError> {
        if self.phase() == PoolPhase::Ready {
            return Ok(());
        }
        self.request(|reply| PoolCommand::Init { reply }).await?
    }

    /// Wait for a free slot. Callers queue in FIFO order when all are busy.
    pub async fn acquire(&self) -> Result<SlotLease, ForgeError> {
        self.ensure_initialized().await?;
        match self.request(|reply| PoolCommand::Acquire { reply }).await {
            Ok(result) => result,
            // The queue was dropped by destroy.
            Err(_) if self.phase() == PoolPhase::Destroyed => Err(ForgeError::PoolDestroyed),
            Err(err) => Err(err),
        }
    }

    pub async fn update_options(&self, patch: &ParserOptionsPatch) -> Result<(), ForgeError> {
        self.ensure_initialized().await?;
        let patch = patch.clone();
        self.request(|reply| PoolCommand::UpdateOptions { patch, reply })
            .await?
    }

    /// Terminate every worker and drop queued callers. Idempotent; a pool
    /// that never initialized is left untouched.
    pub async fn destroy(&self) -> Result<(), ForgeError> {
        self.request(|reply| PoolCommand::Destroy { reply }).await
    }

    pub async fn stats(&self) -> PoolStats {
        self.request(|reply| PoolCommand::Stats { reply })
            .await
            .unwrap_or_default()
    }

    pub fn pool_info(&self) -> PoolInfo {
        PoolInfo {
            worker_count: self.worker_count,
            max_workers: self.max_workers,
            environment: self.environment.clone(),
            initialized: self.phase() == PoolPhase::Ready,
        }
    }
}

#[async_trait]
impl MarkdownParser for WorkerPool {
    fn name(&self) -> &str {
        "worker-pool"
    }

    async fn parse_to_hast(&self, markdown: &str) -> Result<Tree, ForgeError> {
        let mut lease = self.acquire().await?;
        let result = lease.proxy().parse_to_hast(markdown).await;
        lease.complete();
        result
    }

    async fn parse_to_html(&self, markdown: &str) -> Result<String, ForgeError> {
        let mut lease = self.acquire().await?;
        let result = lease.proxy().parse_to_html(markdown).await;
        lease.complete();
        result
    }

    async fn update_options(&self, patch: &ParserOptionsPatch) -> Result<(), ForgeError> {
        WorkerPool::update_options(self, patch).await
    }

    async fn batch_parse_to_hast(&self, markdowns: &[String]) -> Result<Vec<Tree>, ForgeError> {
        self.ensure_initialized().await?;
        try_join_all(markdowns.iter().map(|md| self.parse_to_hast(md))).await
    }

    async fn batch_parse_to_html(&self, markdowns: &[String]) -> Result<Vec<String>, ForgeError> {
        self.ensure_initialized().await?;
        try_join_all(markdowns.iter().map(|md| self.parse_to_html(md))).await
    }
}
