//! Audio stream adapter
//!
//! - `enhance`: volume / auto gain / noise suppression on PCM16 chunks
//! - `denoise`: RNNoise suppressor with 48 kHz resampling
//! - `vad`: energy VAD and the voice command segmenter used by STT
//! - `stream`: producer task with a backpressured primary queue and a lossy debug tap
//! - `recorder`: per-run debug recording to disk

mod denoise;
mod enhance;
mod recorder;
mod stream;
mod vad;

pub use denoise::NoiseSuppressor;
pub use enhance::AudioEnhancer;
pub use recorder::{recording_path, DebugRecorder, RecorderError, Recording};
pub use stream::{audio_source, AudioSource, AudioStream, AudioStreamConfig, StreamSummary};
pub use vad::{EnergyVad, SegmentEvent, SegmentState, SegmenterConfig, VoiceCommandSegmenter};
