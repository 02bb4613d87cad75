//! Worker spawn primitive and the RPC proxy used to talk to a worker.
//!
//! A worker owns one [`MarkdownPipeline`] and serves [`WorkerRequest`]s from
//! an unbounded channel. The pool only ever sees a [`WorkerHandle`] (to
//! terminate it) and a [`RemoteParser`] (to call it).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use async_trait::async_trait;
use mdforge_core::{ForgeError, MarkdownParser, ParserOptions, ParserOptionsPatch, Tree};
use mdforge_markdown::MarkdownPipeline;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

/// One request sent to a worker.
#[derive(Debug)]
pub enum WorkerRequest {
    ParseHast {
        markdown: String,
        reply: oneshot::Sender<Result<Tree, ForgeError>>,
    },
    ParseHtml {
        markdown: String,
        reply: oneshot::Sender<Result<String, ForgeError>>,
    },
    UpdateOptions {
        patch: ParserOptionsPatch,
        reply: oneshot::Sender<Result<(), ForgeError>>,
    },
    Shutdown,
}

/// Handle one request against `pipeline`. Returns `false` on shutdown.
pub fn serve(pipeline: &mut MarkdownPipeline, request: WorkerRequest) -> bool {
    match request {
        WorkerRequest::ParseHast { markdown, reply } => {
            let _ = reply.send(Ok(Arc::new(pipeline.parse(&markdown))));
        }
        WorkerRequest::ParseHtml { markdown, reply } => {
            let _ = reply.send(Ok(pipeline.parse_to_html(&markdown)));
        }
        WorkerRequest::UpdateOptions { patch, reply } => {
            let mut options = pipeline.options().clone();
            options.merge(&patch);
            pipeline.set_options(options);
            let _ = reply.send(Ok(()));
        }
        WorkerRequest::Shutdown => return false,
    }
    true
}

/// Receiving side of a worker's request channel.
pub struct WorkerInbox {
    rx: mpsc::UnboundedReceiver<WorkerRequest>,
}

impl WorkerInbox {
    pub async fn recv(&mut self) -> Option<WorkerRequest> {
        self.rx.recv().await
    }

    /// For workers running on a plain OS thread.
    pub fn blocking_recv(&mut self) -> Option<WorkerRequest> {
        self.rx.blocking_recv()
    }
}

/// Create the proxy/inbox pair for worker `id`.
pub fn worker_channel(id: usize) -> (RemoteParser, WorkerInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let proxy = RemoteParser {
        worker: id,
        tx,
        terminated: Arc::new(AtomicBool::new(false)),
    };
    (proxy, WorkerInbox { rx })
}

/// Client side of a worker. Cheap to clone; every clone talks to the same worker.
#[derive(Debug, Clone)]
pub struct RemoteParser {
    worker: usize,
    tx: mpsc::UnboundedSender<WorkerRequest>,
    terminated: Arc<AtomicBool>,
}

impl RemoteParser {
    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Mark the worker terminated and ask it to stop.
    pub fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(WorkerRequest::Shutdown);
        }
    }

    fn lost(&self) -> ForgeError {
        if self.is_terminated() {
            ForgeError::WorkerTerminated(self.worker)
        } else {
            ForgeError::WorkerCrashed {
                worker: self.worker,
                message: "worker dropped the request".into(),
            }
        }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, ForgeError>>) -> WorkerRequest,
    ) -> Result<T, ForgeError> {
        if self.is_terminated() {
            return Err(ForgeError::WorkerTerminated(self.worker));
        }
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).map_err(|_| self.lost())?;
        rx.await.map_err(|_| self.lost())?
    }
}

#[async_trait]
impl MarkdownParser for RemoteParser {
    fn name(&self) -> &str {
        "remote"
    }

    async fn parse_to_hast(&self, markdown: &str) -> Result<Tree, ForgeError> {
        let markdown = markdown.to_string();
        self.call(|reply| WorkerRequest::ParseHast { markdown, reply }).await
    }

    async fn parse_to_html(&self, markdown: &str) -> Result<String, ForgeError> {
        let markdown = markdown.to_string();
        self.call(|reply| WorkerRequest::ParseHtml { markdown, reply }).await
    }

    async fn update_options(&self, patch: &ParserOptionsPatch) -> Result<(), ForgeError> {
        let patch = patch.clone();
        self.call(|reply| WorkerRequest::UpdateOptions { patch, reply }).await
    }
}

/// Owner-side handle to a running worker.
pub trait WorkerHandle: Send + Sync {
    fn id(&self) -> usize;

    /// Stop the worker. Calls after the first are no-ops.
    fn terminate(&mut self);
}

/// A freshly spawned worker: its handle plus a proxy that is ready to serve.
pub struct SpawnedWorker {
    pub handle: Box<dyn WorkerHandle>,
    pub proxy: RemoteParser,
}

/// Creates workers for the pool.
#[async_trait]
pub trait WorkerSpawner: Send + Sync + 'static {
    /// Name of the execution environment workers run in.
    fn environment(&self) -> &str;

    /// Start worker `id` with `options` and wait until it can serve requests.
    async fn spawn(&self, id: usize, options: ParserOptions) -> Result<SpawnedWorker, ForgeError>;
}

/// Runs each worker on a dedicated OS thread.
#[derive(Debug, Default, Clone)]
pub struct ThreadSpawner;

struct ThreadHandle {
    proxy: RemoteParser,
    thread: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle for ThreadHandle {
    fn id(&self) -> usize {
        self.proxy.worker()
    }

    fn terminate(&mut self) {
        self.proxy.terminate();
        // Detached: the thread exits once it reads the shutdown request.
        self.thread.take();
    }
}

impl Drop for ThreadHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[async_trait]
impl WorkerSpawner for ThreadSpawner {
    fn environment(&self) -> &str {
        "thread"
    }

    async fn spawn(&self, id: usize, options: ParserOptions) -> Result<SpawnedWorker, ForgeError> {
        let (proxy, mut inbox) = worker_channel(id);
        let (ready_tx, ready_rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name(format!("mdforge-worker-{id}"))
            .spawn(move || {
                let mut pipeline = MarkdownPipeline::new(options);
                let _ = ready_tx.send(());
                while let Some(request) = inbox.blocking_recv() {
                    trace!(worker = id, "worker request");
                    if !serve(&mut pipeline, request) {
                        break;
                    }
                }
                debug!(worker = id, "worker thread exiting");
            })
            .map_err(|e| ForgeError::PoolInit(format!("cannot start worker thread {id}: {e}")))?;

        if ready_rx.await.is_err() {
            warn!(worker = id, "worker thread died during startup");
            return Err(ForgeError::PoolInit(format!("worker {id} died during startup")));
        }

        let handle = ThreadHandle {
            proxy: proxy.clone(),
            thread: Some(thread),
        };
        Ok(SpawnedWorker {
            handle: Box::new(handle),
            proxy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdforge_core::ExtendedGrammar;

    #[tokio::test]
    async fn thread_worker_parses_and_updates() {
        let worker = ThreadSpawner.spawn(0, ParserOptions::default()).await.unwrap();
        let html = worker.proxy.parse_to_html("# hi").await.unwrap();
        assert_eq!(html, "<h1>hi</h1>");

        let before = worker.proxy.parse_to_html("~~x~~").await.unwrap();
        assert!(!before.contains("<del>"));
        worker
            .proxy
            .update_options(&ParserOptionsPatch {
                extended_grammar: Some(vec![ExtendedGrammar::Gfm]),
                ..Default::default()
            })
            .await
            .unwrap();
        let after = worker.proxy.parse_to_html("~~x~~").await.unwrap();
        assert!(after.contains("<del>x</del>"));
    }

    #[tokio::test]
    async fn terminated_worker_rejects_calls() {
        let mut worker = ThreadSpawner.spawn(3, ParserOptions::default()).await.unwrap();
        assert_eq!(worker.handle.id(), 3);
        worker.handle.terminate();
        worker.handle.terminate();
        let err = worker.proxy.parse_to_hast("x").await.unwrap_err();
        assert!(matches!(err, ForgeError::WorkerTerminated(3)));
    }

    #[tokio::test]
    async fn dropped_inbox_reads_as_crash() {
        let (proxy, inbox) = worker_channel(1);
        drop(inbox);
        let err = proxy.parse_to_html("x").await.unwrap_err();
        assert!(matches!(err, ForgeError::WorkerCrashed { worker: 1, .. }));
    }
}
