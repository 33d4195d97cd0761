//! Pipeline run configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{audio, timeouts, vad};
use crate::ConfigError;

/// Timeouts, queue sizes and VAD tuning shared by every run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory for per-run debug recordings (disabled when unset)
    #[serde(default)]
    pub debug_recording_dir: Option<PathBuf>,

    #[serde(default = "default_pipeline_timeout")]
    pub pipeline_timeout_secs: f64,

    #[serde(default = "default_wake_word_timeout")]
    pub wake_word_timeout_secs: f64,

    #[serde(default = "default_wake_word_cooldown")]
    pub wake_word_cooldown_secs: f64,

    /// Stage timeouts; `None` leaves the stage bounded by the run timeout only
    #[serde(default = "default_stt_timeout")]
    pub stt_timeout_secs: Option<f64>,

    #[serde(default = "default_intent_timeout")]
    pub intent_timeout_secs: Option<f64>,

    #[serde(default = "default_tts_timeout")]
    pub tts_timeout_secs: Option<f64>,

    #[serde(default = "default_audio_queue_capacity")]
    pub audio_queue_capacity: usize,

    #[serde(default = "default_debug_queue_capacity")]
    pub debug_queue_capacity: usize,

    #[serde(default = "default_vad_energy_threshold")]
    pub vad_energy_threshold_db: f32,

    #[serde(default = "default_vad_silence_ms")]
    pub vad_silence_ms: u32,

    #[serde(default = "default_vad_min_speech_ms")]
    pub vad_min_speech_ms: u32,
}

fn default_pipeline_timeout() -> f64 {
    timeouts::PIPELINE_SECS
}

fn default_wake_word_timeout() -> f64 {
    timeouts::WAKE_WORD_SECS
}

fn default_wake_word_cooldown() -> f64 {
    timeouts::WAKE_WORD_COOLDOWN_SECS
}

fn default_stt_timeout() -> Option<f64> {
    Some(timeouts::STT_SECS)
}

fn default_intent_timeout() -> Option<f64> {
    Some(timeouts::INTENT_SECS)
}

fn default_tts_timeout() -> Option<f64> {
    Some(timeouts::TTS_SECS)
}

fn default_audio_queue_capacity() -> usize {
    audio::PRIMARY_QUEUE_CAPACITY
}

fn default_debug_queue_capacity() -> usize {
    audio::DEBUG_QUEUE_CAPACITY
}

fn default_vad_energy_threshold() -> f32 {
    vad::ENERGY_THRESHOLD_DB
}

fn default_vad_silence_ms() -> u32 {
    vad::SILENCE_MS
}

fn default_vad_min_speech_ms() -> u32 {
    vad::MIN_SPEECH_MS
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            debug_recording_dir: None,
            pipeline_timeout_secs: default_pipeline_timeout(),
            wake_word_timeout_secs: default_wake_word_timeout(),
            wake_word_cooldown_secs: default_wake_word_cooldown(),
            stt_timeout_secs: default_stt_timeout(),
            intent_timeout_secs: default_intent_timeout(),
            tts_timeout_secs: default_tts_timeout(),
            audio_queue_capacity: default_audio_queue_capacity(),
            debug_queue_capacity: default_debug_queue_capacity(),
            vad_energy_threshold_db: default_vad_energy_threshold(),
            vad_silence_ms: default_vad_silence_ms(),
            vad_min_speech_ms: default_vad_min_speech_ms(),
        }
    }
}

impl PipelineConfig {
    pub fn pipeline_timeout(&self) -> Duration {
        secs_to_duration(self.pipeline_timeout_secs)
    }

    pub fn wake_word_timeout(&self) -> Duration {
        secs_to_duration(self.wake_word_timeout_secs)
    }

    pub fn wake_word_cooldown(&self) -> Duration {
        secs_to_duration(self.wake_word_cooldown_secs)
    }

    pub fn stt_timeout(&self) -> Option<Duration> {
        self.stt_timeout_secs.map(secs_to_duration)
    }

    pub fn intent_timeout(&self) -> Option<Duration> {
        self.intent_timeout_secs.map(secs_to_duration)
    }

    pub fn tts_timeout(&self) -> Option<Duration> {
        self.tts_timeout_secs.map(secs_to_duration)
    }

    pub fn with_debug_recording_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_recording_dir = Some(dir.into());
        self
    }

    pub fn with_pipeline_timeout(mut self, secs: f64) -> Self {
        self.pipeline_timeout_secs = secs;
        self
    }

    pub fn with_stt_timeout(mut self, secs: Option<f64>) -> Self {
        self.stt_timeout_secs = secs;
        self
    }

    pub fn with_intent_timeout(mut self, secs: Option<f64>) -> Self {
        self.intent_timeout_secs = secs;
        self
    }

    pub fn with_tts_timeout(mut self, secs: Option<f64>) -> Self {
        self.tts_timeout_secs = secs;
        self
    }

    pub fn with_wake_word_cooldown(mut self, secs: f64) -> Self {
        self.wake_word_cooldown_secs = secs;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("pipeline.pipeline_timeout_secs", self.pipeline_timeout_secs)?;
        positive("pipeline.wake_word_timeout_secs", self.wake_word_timeout_secs)?;

        let cooldown = self.wake_word_cooldown_secs;
        if cooldown < 0.0 || Duration::try_from_secs_f64(cooldown).is_err() {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.wake_word_cooldown_secs".to_string(),
                message: format!("Must be >= 0, got {}", self.wake_word_cooldown_secs),
            });
        }

        for (field, value) in [
            ("pipeline.stt_timeout_secs", self.stt_timeout_secs),
            ("pipeline.intent_timeout_secs", self.intent_timeout_secs),
            ("pipeline.tts_timeout_secs", self.tts_timeout_secs),
        ] {
            if let Some(secs) = value {
                positive(field, secs)?;
            }
        }

        if self.audio_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.audio_queue_capacity".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if self.debug_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.debug_queue_capacity".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if self.vad_energy_threshold_db > 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.vad_energy_threshold_db".to_string(),
                message: format!("Must be <= 0 dBFS, got {}", self.vad_energy_threshold_db),
            });
        }

        Ok(())
    }
}

/// Seconds to a duration, clamped to `0..=Duration::MAX`; `validate()`
/// rejects the values that would need clamping
fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

fn positive(field: &str, secs: f64) -> Result<(), ConfigError> {
    if secs.is_finite() && secs > 0.0 && Duration::try_from_secs_f64(secs).is_ok() {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("Must be a positive number of seconds, got {}", secs),
        })
    }
}
