//! Event delivery
//!
//! Callers receive events through a synchronous callback invoked once per
//! event, in order, on the task driving the run. The callback must return
//! quickly; [`event_channel`] adapts it to an unbounded channel for callers
//! that want to consume events elsewhere.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use assist_core::{PipelineEvent, PipelineEventData};

/// Callback receiving every event of a run
pub type PipelineEventCallback = Arc<dyn Fn(PipelineEvent) + Send + Sync>;

/// Callback that forwards events into an unbounded channel
pub fn event_channel() -> (PipelineEventCallback, mpsc::UnboundedReceiver<PipelineEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: PipelineEventCallback = Arc::new(move |event| {
        // Receiver gone means the caller stopped listening
        let _ = tx.send(event);
    });
    (callback, rx)
}

/// Like [`event_channel`], with the receiver wrapped as a `Stream`
pub fn event_stream() -> (PipelineEventCallback, UnboundedReceiverStream<PipelineEvent>) {
    let (callback, rx) = event_channel();
    (callback, UnboundedReceiverStream::new(rx))
}

/// Per-run emitter that stamps events and enforces a single terminal event
#[derive(Clone)]
pub(crate) struct EventEmitter {
    callback: PipelineEventCallback,
    run_id: Arc<str>,
    finished: Arc<AtomicBool>,
}

impl EventEmitter {
    pub(crate) fn new(callback: PipelineEventCallback, run_id: &str) -> Self {
        Self {
            callback,
            run_id: Arc::from(run_id),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn emit(&self, data: PipelineEventData) {
        let event_type = data.event_type();

        let already_finished = if event_type.is_terminal() {
            self.finished.swap(true, Ordering::SeqCst)
        } else {
            self.finished.load(Ordering::SeqCst)
        };
        if already_finished {
            tracing::warn!(
                run_id = %self.run_id,
                event = %event_type,
                "Dropping event emitted after the run finished"
            );
            return;
        }

        tracing::debug!(run_id = %self.run_id, event = %event_type, "Pipeline event");
        (self.callback)(PipelineEvent::new(data));
    }

    /// Whether `run-end` or `error` has been emitted
    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}
