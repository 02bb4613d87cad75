//! Render Scheduler.
//!
//! Debounces render requests in dynamic mode and commits a result to the
//! visible state only if no newer render was dispatched after it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mdforge_core::{ForgeError, RenderOptions};
use mdforge_markdown::RenderedDocument;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info, trace};

use crate::callback::RenderCallback;

/// Visible render state. Only the latest dispatched render may change
/// `content`, `error` or `loading`.
#[derive(Debug, Clone, Default)]
pub struct RenderState {
    pub content: Option<RenderedDocument>,
    pub loading: bool,
    pub error: Option<ForgeError>,
    /// Generation of the render that last settled.
    pub generation: u64,
}

enum SchedulerCommand {
    Schedule {
        markdown: String,
        options: RenderOptions,
    },
    Cancel,
    Flush {
        reply: oneshot::Sender<u64>,
    },
}

struct Pending {
    deadline: Instant,
    markdown: String,
    options: RenderOptions,
}

/// Debounces render requests and commits only the newest result.
///
/// Dropping the scheduler cancels any pending debounce timer; a render that
/// is already running finishes but its result is discarded if superseded.
pub struct RenderScheduler {
    tx: mpsc::UnboundedSender<SchedulerCommand>,
    state: watch::Receiver<RenderState>,
    generation: Arc<AtomicU64>,
}

impl RenderScheduler {
    /// Start the scheduler loop. Must be called inside a Tokio runtime.
    pub fn new(callback: Arc<dyn RenderCallback>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(RenderState::default());
        let generation = Arc::new(AtomicU64::new(0));

        let worker = SchedulerLoop {
            callback,
            state: Arc::new(state_tx),
            generation: Arc::clone(&generation),
        };
        tokio::spawn(worker.run(rx));

        Self {
            tx,
            state: state_rx,
            generation,
        }
    }

    /// Request a render of `markdown`. Dynamic options debounce the request;
    /// otherwise it is dispatched immediately. Either way any pending
    /// debounced request is dropped.
    pub fn schedule(&self, markdown: impl Into<String>, options: RenderOptions) {
        let _ = self.tx.send(SchedulerCommand::Schedule {
            markdown: markdown.into(),
            options,
        });
    }

    /// Drop the pending debounced request, if any.
    pub fn cancel_pending(&self) {
        let _ = self.tx.send(SchedulerCommand::Cancel);
    }

    /// Dispatch the pending debounced request now, if there is one, and
    /// return the generation of the newest dispatched render (0 if none).
    pub async fn flush(&self) -> u64 {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(SchedulerCommand::Flush { reply }).is_err() {
            return self.generation();
        }
        rx.await.unwrap_or_else(|_| self.generation())
    }

    pub fn subscribe(&self) -> watch::Receiver<RenderState> {
        self.state.clone()
    }

    pub fn state(&self) -> RenderState {
        self.state.borrow().clone()
    }

    /// Number of renders dispatched so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

struct SchedulerLoop {
    callback: Arc<dyn RenderCallback>,
    state: Arc<watch::Sender<RenderState>>,
    generation: Arc<AtomicU64>,
}

impl SchedulerLoop {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<SchedulerCommand>) {
        info!("render scheduler started");
        let mut pending: Option<Pending> = None;

        loop {
            let deadline = pending
                .as_ref()
                .map(|p| p.deadline)
                .unwrap_or_else(Instant::now);

            tokio::select! {
                command = rx.recv() => match command {
                    Some(SchedulerCommand::Schedule { markdown, options }) => {
                        pending = None;
                        if options.is_dynamic() {
                            let delay = options.debounce();
                            trace!(delay_ms = delay.as_millis() as u64, "render debounced");
                            pending = Some(Pending {
                                deadline: Instant::now() + delay,
                                markdown,
                                options,
                            });
                        } else {
                            self.dispatch(markdown, options);
                        }
                    }
                    Some(SchedulerCommand::Cancel) => {
                        if pending.take().is_some() {
                            debug!("pending render cancelled");
                        }
                    }
                    Some(SchedulerCommand::Flush { reply }) => {
                        if let Some(Pending { markdown, options, .. }) = pending.take() {
                            trace!("pending render flushed");
                            self.dispatch(markdown, options);
                        }
                        let _ = reply.send(self.generation.load(Ordering::SeqCst));
                    }
                    None => break,
                },
                _ = time::sleep_until(deadline), if pending.is_some() => {
                    if let Some(Pending { markdown, options, .. }) = pending.take() {
                        self.dispatch(markdown, options);
                    }
                }
            }
        }

        info!("render scheduler stopped");
    }

    fn dispatch(&self, markdown: String, options: RenderOptions) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_modify(|state| {
            state.loading = true;
            state.error = None;
        });
        debug!(generation, mode = %options.mode, bytes = markdown.len(), "dispatching render");

        let callback = Arc::clone(&self.callback);
        let state = Arc::clone(&self.state);
        let latest = Arc::clone(&self.generation);
        tokio::spawn(async move {
            let result = callback.render(markdown, options).await;
            let committed = state.send_if_modified(|state| {
                if latest.load(Ordering::SeqCst) != generation {
                    return false;
                }
                match result {
                    Ok(document) => state.content = Some(document),
                    Err(err) => state.error = Some(err),
                }
                state.loading = false;
                state.generation = generation;
                true
            });
            if !committed {
                trace!(generation, "stale render result discarded");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use mdforge_core::{MarkdownParser, Node, ParserOptionsPatch, RenderMode, Root, Tree};
    use mdforge_markdown::InProcessParser;

    use crate::callback::{ParserCallback, SessionCallback};

    /// Echoes its input as a text node; `slow` takes 100ms, `bad` fails.
    #[derive(Default)]
    struct Echo {
        calls: Mutex<Vec<String>>,
    }

    impl Echo {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RenderCallback for Echo {
        async fn render(
            &self,
            markdown: String,
            _options: RenderOptions,
        ) -> Result<RenderedDocument, ForgeError> {
            self.calls.lock().unwrap().push(markdown.clone());
            if markdown.starts_with("slow") {
                time::sleep(Duration::from_millis(100)).await;
            }
            if markdown == "bad" {
                return Err(ForgeError::Parse("bad input".into()));
            }
            Ok(RenderedDocument {
                blocks: vec![Arc::new(Root::new(vec![Node::text(markdown)]))],
            })
        }
    }

    fn text(state: &RenderState) -> Option<String> {
        state
            .content
            .as_ref()
            .map(|doc| doc.blocks.iter().map(|t| t.text_content()).collect())
    }

    #[tokio::test(start_paused = true)]
    async fn streaming_updates_are_coalesced() {
        let echo = Arc::new(Echo::default());
        let scheduler = RenderScheduler::new(echo.clone());
        let mut rx = scheduler.subscribe();

        scheduler.schedule("a", RenderOptions::streaming());
        time::sleep(Duration::from_millis(50)).await;
        scheduler.schedule("ab", RenderOptions::streaming());
        time::sleep(Duration::from_millis(50)).await;
        assert!(echo.calls().is_empty());

        let state = rx.wait_for(|s| s.content.is_some()).await.unwrap().clone();
        assert_eq!(echo.calls(), vec!["ab"]);
        assert_eq!(text(&state).as_deref(), Some("ab"));
        assert!(!state.loading);
        assert_eq!(scheduler.generation(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn static_render_is_immediate() {
        let echo = Arc::new(Echo::default());
        let scheduler = RenderScheduler::new(echo.clone());
        let mut rx = scheduler.subscribe();
        let start = Instant::now();

        scheduler.schedule("now", RenderOptions::default());
        rx.wait_for(|s| s.content.is_some()).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(250));
        assert_eq!(text(&scheduler.state()).as_deref(), Some("now"));
    }

    #[tokio::test(start_paused = true)]
    async fn dynamic_static_mode_uses_longer_debounce() {
        let echo = Arc::new(Echo::default());
        let scheduler = RenderScheduler::new(echo.clone());
        let options = RenderOptions {
            mode: RenderMode::Static,
            dynamic: Some(true),
            ..Default::default()
        };

        scheduler.schedule("x", options);
        time::sleep(Duration::from_millis(200)).await;
        assert!(echo.calls().is_empty());
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(echo.calls(), vec!["x"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_results_are_discarded() {
        let echo = Arc::new(Echo::default());
        let scheduler = RenderScheduler::new(echo.clone());

        scheduler.schedule("slow first", RenderOptions::default());
        time::sleep(Duration::from_millis(10)).await;
        scheduler.schedule("fast second", RenderOptions::default());
        time::sleep(Duration::from_millis(200)).await;

        assert_eq!(echo.calls().len(), 2);
        let state = scheduler.state();
        assert_eq!(text(&state).as_deref(), Some("fast second"));
        assert_eq!(state.generation, 2);
        assert!(!state.loading);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_surface_in_state() {
        let scheduler = RenderScheduler::new(Arc::new(Echo::default()));
        let mut rx = scheduler.subscribe();
        scheduler.schedule("bad", RenderOptions::default());
        let state = rx.wait_for(|s| s.error.is_some()).await.unwrap().clone();
        assert!(matches!(state.error, Some(ForgeError::Parse(_))));
        assert!(!state.loading);
        assert!(state.content.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_and_drop_stop_pending_renders() {
        let echo = Arc::new(Echo::default());
        let scheduler = RenderScheduler::new(echo.clone());
        scheduler.schedule("cancelled", RenderOptions::streaming());
        scheduler.cancel_pending();
        time::sleep(Duration::from_millis(200)).await;
        assert!(echo.calls().is_empty());

        scheduler.schedule("dropped", RenderOptions::streaming());
        drop(scheduler);
        time::sleep(Duration::from_millis(200)).await;
        assert!(echo.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn session_callback_reuses_blocks() {
        let callback = Arc::new(SessionCallback::new(InProcessParser::default()));
        let session = callback.session();
        let scheduler = RenderScheduler::new(callback);
        let mut rx = scheduler.subscribe();

        scheduler.schedule("one\n\ntwo", RenderOptions::streaming());
        rx.wait_for(|s| s.generation == 1).await.unwrap();
        scheduler.schedule("one\n\ntwo three", RenderOptions::streaming());
        let state = rx.wait_for(|s| s.generation == 2).await.unwrap().clone();

        let html = state.content.map(|doc| doc.to_html()).unwrap_or_default();
        assert_eq!(html, "<p>one</p><p>two three</p>");
        let stats = session.lock().await.last_stats().unwrap();
        assert_eq!(stats.reused_prefix, 1);
        assert_eq!(stats.parsed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_dispatches_pending_render() {
        let echo = Arc::new(Echo::default());
        let scheduler = RenderScheduler::new(echo.clone());
        let mut rx = scheduler.subscribe();
        let start = Instant::now();

        scheduler.schedule("a", RenderOptions::streaming());
        scheduler.schedule("ab", RenderOptions::streaming());
        let target = scheduler.flush().await;
        assert_eq!(target, 1);

        let state = rx.wait_for(|s| s.generation >= target).await.unwrap().clone();
        assert!(start.elapsed() < Duration::from_millis(80));
        assert_eq!(text(&state).as_deref(), Some("ab"));
        assert_eq!(echo.calls(), vec!["ab"]);

        // Nothing pending: flush reports the last dispatched generation.
        assert_eq!(scheduler.flush().await, 1);
    }

    /// Counts parses and echoes the input as a text node.
    #[derive(Default)]
    struct CountingParser {
        inputs: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MarkdownParser for CountingParser {
        fn name(&self) -> &str {
            "counting"
        }

        async fn parse_to_hast(&self, markdown: &str) -> Result<Tree, ForgeError> {
            self.inputs.lock().unwrap().push(markdown.to_string());
            Ok(Arc::new(Root::new(vec![Node::text(markdown)])))
        }

        async fn parse_to_html(&self, markdown: &str) -> Result<String, ForgeError> {
            Ok(self.parse_to_hast(markdown).await?.to_html())
        }

        async fn update_options(&self, _patch: &ParserOptionsPatch) -> Result<(), ForgeError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn parser_callback_parses_whole_input_every_time() {
        let parser = Arc::new(CountingParser::default());
        let scheduler = RenderScheduler::new(Arc::new(ParserCallback::new(parser.clone())));
        let mut rx = scheduler.subscribe();

        scheduler.schedule("one\n\ntwo", RenderOptions::default());
        rx.wait_for(|s| s.generation == 1).await.unwrap();
        scheduler.schedule("one\n\ntwo", RenderOptions::default());
        let state = rx.wait_for(|s| s.generation == 2).await.unwrap().clone();

        let inputs = parser.inputs.lock().unwrap().clone();
        assert_eq!(inputs, vec!["one\n\ntwo".to_string(), "one\n\ntwo".to_string()]);
        let blocks = state.content.map(|doc| doc.blocks.len());
        assert_eq!(blocks, Some(1));
    }
}
