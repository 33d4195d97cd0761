//! Centralized constants for the assist pipeline
//!
//! Single source of truth for default values used by the settings structs
//! and the pipeline crate.

/// Timeouts (seconds)
pub mod timeouts {
    /// Wall-clock budget for a whole run
    pub const PIPELINE_SECS: f64 = 600.0;

    /// Time to wait for a wake word before failing the stage
    pub const WAKE_WORD_SECS: f64 = 60.0;

    /// Window after a detection during which detection is skipped
    pub const WAKE_WORD_COOLDOWN_SECS: f64 = 2.0;

    /// Speech-to-text stage deadline
    pub const STT_SECS: f64 = 30.0;

    /// Conversation agent deadline
    pub const INTENT_SECS: f64 = 30.0;

    /// Text-to-speech deadline
    pub const TTS_SECS: f64 = 30.0;
}

/// Audio queues and processing
pub mod audio {
    /// Primary (backpressured) chunk queue between producer and stages
    pub const PRIMARY_QUEUE_CAPACITY: usize = 64;

    /// Debug recorder queue; chunks are dropped when it is full
    pub const DEBUG_QUEUE_CAPACITY: usize = 32;

    /// Maximum noise suppression level
    pub const MAX_NOISE_SUPPRESSION_LEVEL: u8 = 4;

    /// Maximum auto gain target (dBFS below full scale)
    pub const MAX_AUTO_GAIN_DBFS: u8 = 31;

    /// RNNoise speech probability below which a frame is muted, per
    /// suppression level 1..=4 (level 1 only denoises)
    pub const NOISE_SUPPRESSION_VAD_FLOOR: [f32; 4] = [0.0, 0.2, 0.4, 0.6];

    /// Sample rate the denoiser runs at
    pub const DENOISE_SAMPLE_RATE: u32 = 48000;

    /// Upper bound for auto gain amplification
    pub const MAX_AUTO_GAIN: f32 = 10.0;

    /// PCM16 scaling constant
    pub const PCM16_SCALE: f32 = 32767.0;
}

/// Voice activity detection for the STT stage
pub mod vad {
    /// Energy above which a chunk counts as speech (dBFS)
    pub const ENERGY_THRESHOLD_DB: f32 = -45.0;

    /// Speech needed before `stt-vad-start` fires
    pub const MIN_SPEECH_MS: u32 = 150;

    /// Trailing silence that ends the voice command
    pub const SILENCE_MS: u32 = 700;
}
