//! Stage adapters
//!
//! Each adapter wraps one engine, validated before the run starts, and
//! exposes `run()` for its stage-specific input and output. Adapters emit
//! sub-events through the [`StageContext`]; the run emits the stage's
//! start/end events around them.

mod intent;
mod stt;
mod tts;
mod wake_word;

pub use intent::{IntentRequest, IntentStage};
pub use stt::SttStage;
pub use tts::{TtsStage, TTS_PROXY_PATH};
pub use wake_word::WakeWordStage;

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use assist_core::{ErrorCode, PipelineError, PipelineEventData, PipelineStage, StageError};

use crate::events::EventEmitter;

/// A stage prepared by validation, in window order
pub enum PreparedStage {
    WakeWord(WakeWordStage),
    Stt(SttStage),
    Intent(IntentStage),
    Tts(TtsStage),
}

impl PreparedStage {
    pub fn stage(&self) -> PipelineStage {
        match self {
            Self::WakeWord(_) => PipelineStage::WakeWord,
            Self::Stt(_) => PipelineStage::Stt,
            Self::Intent(_) => PipelineStage::Intent,
            Self::Tts(_) => PipelineStage::Tts,
        }
    }
}

impl fmt::Debug for PreparedStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PreparedStage").field(&self.stage()).finish()
    }
}

/// Why a run stopped early
#[derive(Debug, Clone, PartialEq)]
pub enum StageFailure {
    Stage(StageError),
    RunTimeout(Duration),
    Cancelled,
}

impl StageFailure {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Stage(e) => e.code(),
            Self::RunTimeout(_) => ErrorCode::PipelineTimeout,
            Self::Cancelled => ErrorCode::Cancelled,
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stage(e) => write!(f, "{}", e),
            Self::RunTimeout(after) => write!(f, "pipeline timed out after {:?}", after),
            Self::Cancelled => f.write_str("pipeline run cancelled"),
        }
    }
}

impl From<StageError> for StageFailure {
    fn from(err: StageError) -> Self {
        Self::Stage(err)
    }
}

impl From<StageFailure> for PipelineError {
    fn from(failure: StageFailure) -> Self {
        match failure {
            StageFailure::Stage(e) => PipelineError::Stage(e),
            StageFailure::RunTimeout(after) => PipelineError::RunTimeout(after),
            StageFailure::Cancelled => PipelineError::Cancelled,
        }
    }
}

/// Run-scoped handles passed into every stage
#[derive(Clone)]
pub struct StageContext {
    run_id: String,
    events: EventEmitter,
    cancel: CancellationToken,
    started: Instant,
    run_timeout: Duration,
}

impl StageContext {
    pub(crate) fn new(
        run_id: &str,
        events: EventEmitter,
        cancel: CancellationToken,
        run_timeout: Duration,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            events,
            cancel,
            started: Instant::now(),
            run_timeout,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Emit a sub-event between the stage's start and end events
    pub fn emit(&self, data: PipelineEventData) {
        self.events.emit(data);
    }

    pub(crate) fn emitter(&self) -> &EventEmitter {
        &self.events
    }

    /// Time left before the run deadline
    pub fn remaining(&self) -> Duration {
        self.run_timeout.saturating_sub(self.started.elapsed())
    }

    /// Boundary check run before each stage starts
    pub fn check_boundary(&self) -> Result<(), StageFailure> {
        if self.cancel.is_cancelled() {
            return Err(StageFailure::Cancelled);
        }
        if self.remaining().is_zero() {
            return Err(StageFailure::RunTimeout(self.run_timeout));
        }
        Ok(())
    }

    /// Await a stage future under cancellation and a deadline.
    ///
    /// A stage with its own timeout is bounded by that timeout alone; the run
    /// deadline is only checked at stage boundaries. A stage without one is
    /// bounded by what is left of the run deadline.
    pub async fn bounded<T, F>(
        &self,
        stage: PipelineStage,
        stage_timeout: Option<Duration>,
        fut: F,
    ) -> Result<T, StageFailure>
    where
        F: Future<Output = Result<T, StageError>>,
    {
        let (limit, on_timeout) = match stage_timeout {
            Some(limit) => (limit, StageFailure::Stage(StageError::timeout(stage, limit))),
            None => (self.remaining(), StageFailure::RunTimeout(self.run_timeout)),
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StageFailure::Cancelled),
            result = tokio::time::timeout(limit, fut) => match result {
                Ok(output) => output.map_err(StageFailure::Stage),
                Err(_) => {
                    tracing::warn!(
                        run_id = %self.run_id,
                        stage = %stage,
                        timeout = ?limit,
                        "Stage deadline exceeded"
                    );
                    Err(on_timeout)
                },
            },
        }
    }
}
