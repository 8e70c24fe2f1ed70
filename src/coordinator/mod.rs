//! Conversation coordinator
//!
//! Owns the single worker thread that drives the engine. Callers submit
//! human lines and retrain requests, which the worker handles strictly in
//! submission order, one at a time, and poll generated fragments without
//! ever blocking.
//!
//! ```text
//! caller ── submit_input ──▶ inbound ──▶ worker (engine) ──▶ outbound ──▶ drain_output
//!                                          │
//!                                          └──▶ status (readiness, turn state, errors)
//! ```

pub mod channels;
pub mod status;

pub use crate::engine::Readiness;
pub use channels::{ReplyTicket, TurnOutcome};
pub use status::{CoordinatorStatus, SharedStatus};

use crate::backend::BackendLoader;
use crate::config::SessionConfig;
use crate::engine::ConversationEngine;
use crate::{ParleyError, Result};
use channels::{CoordinatorChannels, CountingSink, WorkItem};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct Coordinator {
    inbound_tx: Sender<WorkItem>,
    outbound_rx: Receiver<String>,
    status: SharedStatus,
    shutting_down: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    user_label: String,
    agent_label: String,
}

impl Coordinator {
    /// Validate `config`, build the engine and start the worker.
    ///
    /// Loading happens on the worker; watch [`Coordinator::status`] or call
    /// [`Coordinator::wait_until_ready`]. Once loaded the agent speaks first.
    pub fn setup(config: SessionConfig, loader: Option<Box<dyn BackendLoader>>) -> Result<Self> {
        config.validate()?;
        let prompt_path = config.prompt_path();
        if !prompt_path.is_file() {
            return Err(ParleyError::ConfigError(format!(
                "prompt file {} not found",
                prompt_path.display()
            )));
        }

        let user_label = config.user_label.clone();
        let agent_label = config.agent_label.clone();
        let engine = ConversationEngine::from_config(config, loader)?;

        let channels = CoordinatorChannels::new();
        let status = SharedStatus::new();
        let shutting_down = Arc::new(AtomicBool::new(false));

        let worker = {
            let inbound_rx = channels.inbound_rx;
            let outbound_tx = channels.outbound_tx;
            let status = status.clone();
            let shutting_down = Arc::clone(&shutting_down);
            std::thread::Builder::new()
                .name("parley-worker".to_string())
                .spawn(move || {
                    run_worker(engine, inbound_rx, outbound_tx, status, shutting_down)
                })?
        };

        info!("Coordinator started for {} / {}", user_label, agent_label);

        Ok(Self {
            inbound_tx: channels.inbound_tx,
            outbound_rx: channels.outbound_rx,
            status,
            shutting_down,
            worker: Some(worker),
            user_label,
            agent_label,
        })
    }

    /// Queue a human line; the agent replies once everything ahead of it
    /// is done.
    pub fn submit_input(&self, text: impl Into<String>) -> ReplyTicket {
        if let Some(e) = self.refusal() {
            return ReplyTicket::failed(e);
        }
        let id = Uuid::new_v4();
        let (ticket, reply) = ReplyTicket::new(id);
        self.enqueue(WorkItem::Input {
            id,
            text: text.into(),
            reply,
        });
        ticket
    }

    /// Queue a switch to another prompt file.
    pub fn retrain(&self, prompt_file: impl Into<String>) -> ReplyTicket {
        if let Some(e) = self.refusal() {
            return ReplyTicket::failed(e);
        }
        let id = Uuid::new_v4();
        let (ticket, reply) = ReplyTicket::new(id);
        self.enqueue(WorkItem::Retrain {
            id,
            prompt_file: prompt_file.into(),
            reply,
        });
        ticket
    }

    /// Why new work cannot be accepted, if it cannot
    fn refusal(&self) -> Option<ParleyError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Some(ParleyError::ChannelError(
                "coordinator is shut down".to_string(),
            ));
        }
        self.init_failure()
    }

    fn enqueue(&self, item: WorkItem) {
        self.status.enqueued();
        if let Err(e) = self.inbound_tx.send(item) {
            self.status.skipped();
            e.into_inner().reject(ParleyError::ChannelError(
                "worker is not running".to_string(),
            ));
        }
    }

    fn init_failure(&self) -> Option<ParleyError> {
        if self.status.readiness() == Readiness::Failed {
            Some(self.status.last_error().unwrap_or_else(|| {
                ParleyError::NotReady("engine failed to initialize".to_string())
            }))
        } else {
            None
        }
    }

    /// Next generated fragment, if one is waiting.
    pub fn drain_output(&self) -> Option<String> {
        self.outbound_rx.try_recv().ok()
    }

    /// Every fragment waiting right now, in production order.
    pub fn drain_all(&self) -> Vec<String> {
        self.outbound_rx.try_iter().collect()
    }

    /// Clone of the outbound stream for consumers on other threads
    pub fn output_receiver(&self) -> Receiver<String> {
        self.outbound_rx.clone()
    }

    pub fn status(&self) -> CoordinatorStatus {
        self.status.snapshot()
    }

    pub fn is_ready(&self) -> bool {
        self.status.readiness().is_ready()
    }

    pub fn user_label(&self) -> &str {
        &self.user_label
    }

    pub fn agent_label(&self) -> &str {
        &self.agent_label
    }

    /// Block until the engine is ready, it fails, or `timeout` passes.
    pub fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.status.readiness() {
                Readiness::Ready => return Ok(()),
                Readiness::Failed => {
                    return Err(self.init_failure().unwrap_or_else(|| {
                        ParleyError::NotReady("engine failed to initialize".to_string())
                    }))
                }
                _ => {}
            }
            if Instant::now() >= deadline {
                return Err(ParleyError::NotReady(format!(
                    "engine not ready after {:?}",
                    timeout
                )));
            }
            std::thread::sleep(READY_POLL_INTERVAL);
        }
    }

    /// Stop the worker. The item in flight completes; queued items are
    /// rejected. The engine is released before this returns.
    pub fn teardown(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        info!("Coordinator shutting down");
        self.shutting_down.store(true, Ordering::SeqCst);
        let _ = self.inbound_tx.send(WorkItem::Shutdown);

        worker
            .join()
            .map_err(|_| ParleyError::ChannelError("worker thread panicked".to_string()))?;
        info!("Coordinator stopped");
        Ok(())
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!("Teardown failed: {}", e);
        }
    }
}

fn run_worker(
    mut engine: ConversationEngine,
    inbound_rx: Receiver<WorkItem>,
    outbound_tx: Sender<String>,
    status: SharedStatus,
    shutting_down: Arc<AtomicBool>,
) {
    info!("Worker starting");
    status.set_readiness(Readiness::Loading);

    if let Err(e) = engine.initialize() {
        error!("Engine initialization failed: {}", e);
        status.fail(e.clone());
        for item in inbound_rx.try_iter() {
            if !matches!(item, WorkItem::Shutdown) {
                status.skipped();
                item.reject(e.clone());
            }
        }
        return;
    }
    status.set_readiness(Readiness::Ready);
    info!("Engine ready");

    // The agent opens the conversation
    let opening = Uuid::new_v4();
    status.began(opening);
    let mut sink = CountingSink::new(&outbound_tx);
    match engine.generate_reply(&mut sink) {
        Ok(end) => {
            debug!("Opening reply ended by {:?}", end);
            status.finished(engine.turn_state(), None);
        }
        Err(e) => {
            warn!("Opening reply failed: {}", e);
            status.finished(engine.turn_state(), Some(e));
        }
    }

    loop {
        match inbound_rx.recv() {
            Ok(WorkItem::Shutdown) => break,
            Ok(item) if shutting_down.load(Ordering::SeqCst) => {
                status.skipped();
                item.reject(ParleyError::ChannelError(
                    "coordinator shut down before the item ran".to_string(),
                ));
            }
            Ok(item) => run_item(&mut engine, item, &outbound_tx, &status),
            Err(e) => {
                debug!("Inbound channel closed: {}", e);
                break;
            }
        }
    }

    for item in inbound_rx.try_iter() {
        if !matches!(item, WorkItem::Shutdown) {
            status.skipped();
            item.reject(ParleyError::ChannelError(
                "coordinator shut down before the item ran".to_string(),
            ));
        }
    }
    drop(engine);
    info!("Worker stopped");
}

fn run_item(
    engine: &mut ConversationEngine,
    item: WorkItem,
    outbound_tx: &Sender<String>,
    status: &SharedStatus,
) {
    let start = Instant::now();
    let mut sink = CountingSink::new(outbound_tx);

    let (id, reply, result) = match item {
        WorkItem::Input { id, text, reply } => {
            debug!("Processing input {}", id);
            status.started(id);
            let result = engine
                .process_input(&text, &mut sink)
                .and_then(|_| engine.generate_reply(&mut sink));
            (id, reply, result)
        }
        WorkItem::Retrain {
            id,
            prompt_file,
            reply,
        } => {
            info!("Retraining on {} ({})", prompt_file, id);
            status.started(id);
            let result = engine.retrain(&prompt_file, &mut sink);
            (id, reply, result)
        }
        WorkItem::Shutdown => return,
    };

    let outcome = result.map(|end| TurnOutcome {
        id,
        end,
        fragments: sink.count(),
        elapsed_ms: start.elapsed().as_millis() as u64,
    });
    match &outcome {
        Ok(outcome) => {
            debug!(
                "Item {} done: {:?}, {} fragments in {}ms",
                id, outcome.end, outcome.fragments, outcome.elapsed_ms
            );
            status.finished(engine.turn_state(), None);
        }
        Err(e) => {
            warn!("Item {} failed: {}", id, e);
            status.finished(engine.turn_state(), Some(e.clone()));
        }
    }
    let _ = reply.send(outcome);
}
