//! Energy-based voice activity detection
//!
//! Two pieces:
//! - [`EnergyVad`]: per-chunk speech / non-speech classification used by the
//!   stream adapter to tag and gate chunks
//! - [`VoiceCommandSegmenter`]: a small state machine the STT stage runs over
//!   tagged chunks to find where a voice command starts and ends

use assist_config::PipelineConfig;
use assist_core::pcm16_energy_db;

/// Classifies PCM16 chunks by RMS energy
#[derive(Debug, Clone, Copy)]
pub struct EnergyVad {
    threshold_db: f32,
}

impl EnergyVad {
    pub fn new(threshold_db: f32) -> Self {
        Self { threshold_db }
    }

    pub fn threshold_db(&self) -> f32 {
        self.threshold_db
    }

    pub fn is_speech(&self, pcm16: &[u8]) -> bool {
        pcm16_energy_db(pcm16) >= self.threshold_db
    }
}

/// Segmenter timing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmenterConfig {
    /// Continuous speech needed before the command is considered started
    pub min_speech_ms: f64,
    /// Trailing silence that ends the command
    pub silence_ms: f64,
}

impl SegmenterConfig {
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self {
            min_speech_ms: config.vad_min_speech_ms as f64,
            silence_ms: config.vad_silence_ms as f64,
        }
    }
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        use assist_config::constants::vad::{MIN_SPEECH_MS, SILENCE_MS};

        Self {
            min_speech_ms: MIN_SPEECH_MS as f64,
            silence_ms: SILENCE_MS as f64,
        }
    }
}

/// Segmenter state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentState {
    /// Waiting for speech
    #[default]
    Silence,
    /// Speech heard but not long enough to count
    SpeechStart,
    /// Command in progress
    Speech,
    /// Command finished
    Ended,
}

/// Transition reported by [`VoiceCommandSegmenter::process`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentEvent {
    /// Speech lasted long enough to start the command
    CommandStarted,
    /// Enough trailing silence followed the command
    CommandEnded,
}

/// Finds the start and end of one voice command in a tagged chunk stream
#[derive(Debug, Clone)]
pub struct VoiceCommandSegmenter {
    config: SegmenterConfig,
    state: SegmentState,
    speech_ms: f64,
    silence_ms: f64,
}

impl VoiceCommandSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            state: SegmentState::Silence,
            speech_ms: 0.0,
            silence_ms: 0.0,
        }
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == SegmentState::Ended
    }

    /// Feed one chunk of `duration_ms` audio
    pub fn process(&mut self, duration_ms: f64, is_speech: bool) -> Option<SegmentEvent> {
        match (self.state, is_speech) {
            (SegmentState::Ended, _) => None,
            (SegmentState::Silence, false) => None,
            (SegmentState::Silence, true) | (SegmentState::SpeechStart, true) => {
                self.speech_ms += duration_ms;
                if self.speech_ms >= self.config.min_speech_ms {
                    self.state = SegmentState::Speech;
                    self.silence_ms = 0.0;
                    Some(SegmentEvent::CommandStarted)
                } else {
                    self.state = SegmentState::SpeechStart;
                    None
                }
            },
            (SegmentState::SpeechStart, false) => {
                // Too short to be a command
                self.speech_ms = 0.0;
                self.state = SegmentState::Silence;
                None
            },
            (SegmentState::Speech, true) => {
                self.silence_ms = 0.0;
                None
            },
            (SegmentState::Speech, false) => {
                self.silence_ms += duration_ms;
                if self.silence_ms >= self.config.silence_ms {
                    self.state = SegmentState::Ended;
                    Some(SegmentEvent::CommandEnded)
                } else {
                    None
                }
            },
        }
    }

    pub fn reset(&mut self) {
        self.state = SegmentState::Silence;
        self.speech_ms = 0.0;
        self.silence_ms = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segmenter() -> VoiceCommandSegmenter {
        VoiceCommandSegmenter::new(SegmenterConfig {
            min_speech_ms: 60.0,
            silence_ms: 100.0,
        })
    }

    #[test]
    fn test_energy_vad() {
        let vad = EnergyVad::new(-45.0);
        assert!(!vad.is_speech(&[0u8; 320]));

        let loud: Vec<u8> = std::iter::repeat(8000i16.to_le_bytes())
            .take(160)
            .flatten()
            .collect();
        assert!(vad.is_speech(&loud));
    }

    #[test]
    fn test_command_start_and_end() {
        let mut seg = segmenter();
        assert_eq!(seg.process(20.0, false), None);
        assert_eq!(seg.process(20.0, true), None);
        assert_eq!(seg.process(20.0, true), None);
        assert_eq!(seg.process(20.0, true), Some(SegmentEvent::CommandStarted));
        assert_eq!(seg.state(), SegmentState::Speech);

        // Short pauses inside the command do not end it
        assert_eq!(seg.process(60.0, false), None);
        assert_eq!(seg.process(20.0, true), None);

        assert_eq!(seg.process(60.0, false), None);
        assert_eq!(seg.process(60.0, false), Some(SegmentEvent::CommandEnded));
        assert!(seg.is_finished());
        assert_eq!(seg.process(20.0, true), None);
    }

    #[test]
    fn test_short_blip_is_ignored() {
        let mut seg = segmenter();
        assert_eq!(seg.process(20.0, true), None);
        assert_eq!(seg.process(20.0, false), None);
        assert_eq!(seg.state(), SegmentState::Silence);

        // Counting restarts after the blip
        assert_eq!(seg.process(40.0, true), None);
        assert_eq!(seg.process(20.0, true), Some(SegmentEvent::CommandStarted));
    }

    #[test]
    fn test_reset() {
        let mut seg = segmenter();
        seg.process(100.0, true);
        seg.reset();
        assert_eq!(seg.state(), SegmentState::Silence);
    }
}
