//! Sample-level audio enhancement
//!
//! Applied chunk by chunk to PCM16 little-endian audio in this order:
//! volume multiplier, auto gain toward a dBFS target, noise suppression.
//! Compressed codecs bypass every transform.

use assist_config::constants::audio::{MAX_AUTO_GAIN, PCM16_SCALE};
use assist_core::{pcm16_samples, AudioSettings, SpeechMetadata};

use super::denoise::NoiseSuppressor;
use super::vad::EnergyVad;

/// Auto gain leaves audio quieter than this alone rather than amplify noise
const AUTO_GAIN_INPUT_FLOOR_DB: f32 = -70.0;

/// Per-run enhancer built from [`AudioSettings`]
#[derive(Debug)]
pub struct AudioEnhancer {
    volume_multiplier: f32,
    auto_gain_target_db: Option<f32>,
    suppressor: Option<NoiseSuppressor>,
    vad: Option<EnergyVad>,
    bypass: bool,
}

impl AudioEnhancer {
    pub fn new(settings: &AudioSettings, metadata: &SpeechMetadata, vad_threshold_db: f32) -> Self {
        let bypass = !metadata.is_pcm16();

        let auto_gain_target_db =
            (settings.auto_gain_dbfs > 0).then(|| -(settings.auto_gain_dbfs.min(31) as f32));

        let suppressor = if bypass {
            None
        } else {
            NoiseSuppressor::new(
                settings.noise_suppression_level,
                metadata.sample_rate.as_u32(),
                metadata.channel.count(),
            )
        };

        let vad = (settings.is_vad_enabled && !bypass).then(|| EnergyVad::new(vad_threshold_db));

        Self {
            volume_multiplier: settings.volume_multiplier,
            auto_gain_target_db,
            suppressor,
            vad,
            bypass,
        }
    }

    /// True when the codec cannot be processed
    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    pub fn vad_enabled(&self) -> bool {
        self.vad.is_some()
    }

    fn is_identity(&self) -> bool {
        (self.volume_multiplier - 1.0).abs() <= f32::EPSILON
            && self.auto_gain_target_db.is_none()
            && self.suppressor.is_none()
    }

    /// Apply the configured transforms to one chunk
    pub fn enhance(&mut self, audio: Vec<u8>) -> Vec<u8> {
        if self.bypass || self.is_identity() {
            return audio;
        }

        let mut samples: Vec<f32> = pcm16_samples(&audio).map(|s| s as f32).collect();

        if (self.volume_multiplier - 1.0).abs() > f32::EPSILON {
            for sample in samples.iter_mut() {
                *sample *= self.volume_multiplier;
            }
        }

        if let Some(target_db) = self.auto_gain_target_db {
            let energy = rms_db(&samples);
            if energy > AUTO_GAIN_INPUT_FLOOR_DB {
                let gain = 10f32
                    .powf((target_db - energy) / 20.0)
                    .clamp(1.0 / MAX_AUTO_GAIN, MAX_AUTO_GAIN);
                for sample in samples.iter_mut() {
                    *sample *= gain;
                }
            }
        }

        if let Some(suppressor) = self.suppressor.as_mut() {
            suppressor.process(&mut samples);
        }

        let mut out = Vec::with_capacity(audio.len());
        for sample in samples {
            let clamped = sample.round().clamp(-PCM16_SCALE - 1.0, PCM16_SCALE) as i16;
            out.extend_from_slice(&clamped.to_le_bytes());
        }
        // Keep a dangling odd byte so chunk length is preserved
        if audio.len() % 2 == 1 {
            out.push(audio[audio.len() - 1]);
        }
        out
    }

    /// VAD verdict for an enhanced chunk, `None` when VAD is off
    pub fn classify(&self, audio: &[u8]) -> Option<bool> {
        self.vad.map(|vad| vad.is_speech(audio))
    }
}

fn rms_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return -96.0;
    }
    let sum_squares: f32 = samples
        .iter()
        .map(|s| {
            let n = s / (PCM16_SCALE + 1.0);
            n * n
        })
        .sum();
    let rms = (sum_squares / samples.len() as f32).sqrt();
    if rms > 0.0 {
        20.0 * rms.log10()
    } else {
        -96.0
    }
}
