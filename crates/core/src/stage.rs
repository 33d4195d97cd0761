//! Pipeline stages and stage windows

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// A processing stage of the assist pipeline.
///
/// Variant order is the execution order, so `Ord` gives the total order
/// used by stage windows. The markers before the first stage and after the
/// last are the `None` returned by [`prev`](Self::prev) and [`next`](Self::next).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Wait for a wake word in the audio stream
    WakeWord,
    /// Speech-to-text
    Stt,
    /// Intent recognition / conversation
    Intent,
    /// Text-to-speech
    Tts,
}

impl PipelineStage {
    /// All stages in execution order
    pub const ALL: [PipelineStage; 4] = [
        PipelineStage::WakeWord,
        PipelineStage::Stt,
        PipelineStage::Intent,
        PipelineStage::Tts,
    ];

    pub fn first() -> Self {
        Self::WakeWord
    }

    pub fn last() -> Self {
        Self::Tts
    }

    /// Stage executed after this one, `None` past the last stage
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::WakeWord => Some(Self::Stt),
            Self::Stt => Some(Self::Intent),
            Self::Intent => Some(Self::Tts),
            Self::Tts => None,
        }
    }

    /// Stage executed before this one, `None` before the first stage
    pub fn prev(&self) -> Option<Self> {
        match self {
            Self::WakeWord => None,
            Self::Stt => Some(Self::WakeWord),
            Self::Intent => Some(Self::Stt),
            Self::Tts => Some(Self::Intent),
        }
    }

    /// Whether the stage pulls from the audio stream
    pub fn consumes_audio(&self) -> bool {
        matches!(self, Self::WakeWord | Self::Stt)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WakeWord => "wake_word",
            Self::Stt => "stt",
            Self::Intent => "intent",
            Self::Tts => "tts",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contiguous, validated range of stages requested for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageWindow {
    start: PipelineStage,
    end: PipelineStage,
}

impl StageWindow {
    /// Build a window, rejecting `start > end`
    pub fn new(start: PipelineStage, end: PipelineStage) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvalidStageWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Every stage from wake word to TTS
    pub fn full() -> Self {
        Self {
            start: PipelineStage::first(),
            end: PipelineStage::last(),
        }
    }

    pub fn start(&self) -> PipelineStage {
        self.start
    }

    pub fn end(&self) -> PipelineStage {
        self.end
    }

    pub fn contains(&self, stage: PipelineStage) -> bool {
        self.start <= stage && stage <= self.end
    }

    /// Stages of the window in execution order
    pub fn stages(&self) -> impl Iterator<Item = PipelineStage> + '_ {
        PipelineStage::ALL
            .into_iter()
            .filter(move |stage| self.contains(*stage))
    }
}

impl Default for StageWindow {
    fn default() -> Self {
        Self {
            start: PipelineStage::Stt,
            end: PipelineStage::Tts,
        }
    }
}

/// Lifecycle of a single pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum RunState {
    NotStarted,
    Running(PipelineStage),
    Done,
    Error,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}
