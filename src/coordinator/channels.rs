use crate::engine::FragmentSink;
use crate::session::TurnEnd;
use crate::{ParleyError, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use uuid::Uuid;

/// Result of one completed work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOutcome {
    /// Id of the work item
    pub id: Uuid,
    /// Why the agent's turn ended
    pub end: TurnEnd,
    /// Fragments pushed to the outbound channel while handling the item
    pub fragments: usize,
    /// Wall time spent on the item
    pub elapsed_ms: u64,
}

/// Work handed to the worker thread
pub(crate) enum WorkItem {
    Input {
        id: Uuid,
        text: String,
        reply: oneshot::Sender<Result<TurnOutcome>>,
    },
    Retrain {
        id: Uuid,
        prompt_file: String,
        reply: oneshot::Sender<Result<TurnOutcome>>,
    },
    Shutdown,
}

impl WorkItem {
    /// Resolve the item's ticket without running it.
    pub(crate) fn reject(self, error: ParleyError) {
        match self {
            WorkItem::Input { reply, .. } | WorkItem::Retrain { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            WorkItem::Shutdown => {}
        }
    }
}

/// Completion handle for a submitted work item
///
/// Await it from async code, or call [`ReplyTicket::wait`] from a plain
/// thread. Resolves with `ChannelError` if the coordinator goes away before
/// the item runs.
pub struct ReplyTicket {
    id: Uuid,
    rx: oneshot::Receiver<Result<TurnOutcome>>,
}

impl ReplyTicket {
    pub(crate) fn new(id: Uuid) -> (Self, oneshot::Sender<Result<TurnOutcome>>) {
        let (tx, rx) = oneshot::channel();
        (Self { id, rx }, tx)
    }

    /// A ticket that is already resolved with `error`
    pub(crate) fn failed(error: ParleyError) -> Self {
        let (ticket, tx) = Self::new(Uuid::new_v4());
        let _ = tx.send(Err(error));
        ticket
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Block until the item completes.
    ///
    /// Must not be called from inside an async runtime.
    pub fn wait(self) -> Result<TurnOutcome> {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(dropped()))
    }

    /// Non-blocking check; `None` while the item is still pending.
    pub fn try_result(&mut self) -> Option<Result<TurnOutcome>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(dropped())),
        }
    }
}

impl Future for ReplyTicket {
    type Output = Result<TurnOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(dropped())))
    }
}

fn dropped() -> ParleyError {
    ParleyError::ChannelError("coordinator dropped the work item".to_string())
}

/// Inbound work queue and outbound fragment stream
pub(crate) struct CoordinatorChannels {
    pub inbound_tx: Sender<WorkItem>,
    pub inbound_rx: Receiver<WorkItem>,
    pub outbound_tx: Sender<String>,
    pub outbound_rx: Receiver<String>,
}

impl CoordinatorChannels {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = unbounded();
        let (outbound_tx, outbound_rx) = unbounded();

        Self {
            inbound_tx,
            inbound_rx,
            outbound_tx,
            outbound_rx,
        }
    }
}

/// Sink that forwards to the outbound channel and counts what it sends
pub(crate) struct CountingSink<'a> {
    tx: &'a Sender<String>,
    count: usize,
}

impl<'a> CountingSink<'a> {
    pub fn new(tx: &'a Sender<String>) -> Self {
        Self { tx, count: 0 }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

impl FragmentSink for CountingSink<'_> {
    fn push(&mut self, fragment: String) {
        if self.tx.send(fragment).is_ok() {
            self.count += 1;
        }
    }
}
