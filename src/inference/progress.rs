//! Model load progress
//!
//! A model load runs in the background and reports through a finite stream of
//! [`LoadEvent`]s: any number of progress updates followed by exactly one
//! terminal event.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::inference::engine::{EngineError, LoadedModelInfo};

/// Cumulative download progress, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadProgress {
    pub loaded: u64,
    pub total: u64,
}

impl LoadProgress {
    pub fn new(loaded: u64, total: u64) -> Self {
        Self { loaded, total }
    }

    /// Percentage in `0..=100`, or `None` when the total is unknown
    pub fn percent(&self) -> Option<u8> {
        if self.total == 0 {
            return None;
        }
        let pct = self.loaded as f64 * 100.0 / self.total as f64;
        Some(pct.round().clamp(0.0, 100.0) as u8)
    }
}

/// An event emitted by a running model load
#[derive(Debug, Clone)]
pub enum LoadEvent {
    Progress(LoadProgress),
    Loaded(LoadedModelInfo),
    Failed(EngineError),
}

impl LoadEvent {
    /// True for `Loaded` and `Failed`
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LoadEvent::Progress(_))
    }
}

/// Shared flag asking a running load to stop
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Engine-side handle for reporting progress
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: UnboundedSender<LoadEvent>,
}

impl ProgressSink {
    pub fn new(tx: UnboundedSender<LoadEvent>) -> Self {
        Self { tx }
    }

    /// Reports cumulative progress. Ignored once the receiver is gone.
    pub fn report(&self, loaded: u64, total: u64) {
        let _ = self
            .tx
            .send(LoadEvent::Progress(LoadProgress::new(loaded, total)));
    }

    pub(crate) fn finish(&self, result: Result<LoadedModelInfo, EngineError>) {
        let event = match result {
            Ok(info) => LoadEvent::Loaded(info),
            Err(e) => LoadEvent::Failed(e),
        };
        let _ = self.tx.send(event);
    }
}

/// A model load in flight
///
/// Poll it as a [`Stream`], pull events with [`LoadTask::next_event`], or
/// skip progress entirely with [`LoadTask::wait`]. Dropping the task does not
/// stop the load; call [`LoadTask::cancel`] for that.
pub struct LoadTask {
    events: UnboundedReceiver<LoadEvent>,
    stop: StopSignal,
}

impl LoadTask {
    pub(crate) fn new(events: UnboundedReceiver<LoadEvent>, stop: StopSignal) -> Self {
        Self { events, stop }
    }

    /// Asks the engine to abandon the load at its next checkpoint
    pub fn cancel(&self) {
        self.stop.stop();
    }

    pub fn is_cancelled(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Next event, or `None` after the terminal event has been delivered
    pub async fn next_event(&mut self) -> Option<LoadEvent> {
        self.events.recv().await
    }

    /// Waits for the load to settle, discarding progress
    pub async fn wait(mut self) -> Result<LoadedModelInfo, EngineError> {
        while let Some(event) = self.next_event().await {
            match event {
                LoadEvent::Progress(_) => {}
                LoadEvent::Loaded(info) => return Ok(info),
                LoadEvent::Failed(e) => return Err(e),
            }
        }
        Err(EngineError::WorkerError(
            "load ended without a result".to_string(),
        ))
    }
}

impl Stream for LoadTask {
    type Item = LoadEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<LoadEvent>> {
        self.events.poll_recv(cx)
    }
}
