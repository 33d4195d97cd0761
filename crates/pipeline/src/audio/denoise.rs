//! RNNoise based noise suppression
//!
//! nnnoiseless works on 480-sample frames at 48 kHz, so audio at any other
//! rate goes through a rubato resampler on the way in and out. Each channel
//! keeps its own denoiser state.
//!
//! Output length always matches input length: until the resamplers and the
//! frame buffer have produced enough audio, the shortfall is filled with
//! silence at the head of the chunk.

use nnnoiseless::DenoiseState;
use rubato::{FftFixedInOut, Resampler};
use std::collections::VecDeque;

use assist_config::constants::audio::{DENOISE_SAMPLE_RATE, NOISE_SUPPRESSION_VAD_FLOOR};

/// Per-run noise suppressor for interleaved PCM16 samples
pub struct NoiseSuppressor {
    channels: Vec<ChannelSuppressor>,
    level: u8,
}

impl NoiseSuppressor {
    /// Build a suppressor for `level` 1..=4, `None` for level 0 or when the
    /// resamplers cannot be built for this sample rate
    pub fn new(level: u8, sample_rate: u32, channels: u16) -> Option<Self> {
        if level == 0 {
            return None;
        }
        let index = (level as usize).min(NOISE_SUPPRESSION_VAD_FLOOR.len()) - 1;
        let vad_floor = NOISE_SUPPRESSION_VAD_FLOOR[index];

        let mut suppressors = Vec::with_capacity(channels.max(1) as usize);
        for _ in 0..channels.max(1) {
            match ChannelSuppressor::new(sample_rate, vad_floor) {
                Ok(channel) => suppressors.push(channel),
                Err(e) => {
                    tracing::warn!(
                        sample_rate,
                        error = %e,
                        "Resampler unavailable, noise suppression disabled"
                    );
                    return None;
                },
            }
        }

        tracing::debug!(level, sample_rate, channels, "Noise suppressor initialized");
        Some(Self {
            channels: suppressors,
            level,
        })
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    /// Denoise interleaved samples in place
    pub fn process(&mut self, samples: &mut [f32]) {
        let count = self.channels.len();
        if count == 1 {
            let out = self.channels[0].process(samples);
            samples.copy_from_slice(&out);
            return;
        }

        for (index, channel) in self.channels.iter_mut().enumerate() {
            let plane: Vec<f32> = samples.iter().skip(index).step_by(count).copied().collect();
            let out = channel.process(&plane);
            for (slot, value) in samples.iter_mut().skip(index).step_by(count).zip(out) {
                *slot = value;
            }
        }
    }
}

impl std::fmt::Debug for NoiseSuppressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoiseSuppressor")
            .field("level", &self.level)
            .field("channels", &self.channels.len())
            .finish()
    }
}

struct ChannelSuppressor {
    state: Box<DenoiseState<'static>>,
    upsampler: Option<FftFixedInOut<f32>>,
    downsampler: Option<FftFixedInOut<f32>>,
    /// Frames whose speech probability is below this are muted
    vad_floor: f32,
    pending_in: Vec<f32>,
    pending_48k: Vec<f32>,
    denoised_48k: Vec<f32>,
    ready: VecDeque<f32>,
}

impl ChannelSuppressor {
    fn new(sample_rate: u32, vad_floor: f32) -> Result<Self, rubato::ResamplerConstructionError> {
        let (upsampler, downsampler) = if sample_rate == DENOISE_SAMPLE_RATE {
            (None, None)
        } else {
            // 10ms chunks on both sides
            let up = FftFixedInOut::<f32>::new(
                sample_rate as usize,
                DENOISE_SAMPLE_RATE as usize,
                (sample_rate / 100) as usize,
                1,
            )?;
            let down = FftFixedInOut::<f32>::new(
                DENOISE_SAMPLE_RATE as usize,
                sample_rate as usize,
                DenoiseState::FRAME_SIZE,
                1,
            )?;
            (Some(up), Some(down))
        };

        Ok(Self {
            state: DenoiseState::new(),
            upsampler,
            downsampler,
            vad_floor,
            pending_in: Vec::new(),
            pending_48k: Vec::new(),
            denoised_48k: Vec::new(),
            ready: VecDeque::new(),
        })
    }

    fn process(&mut self, input: &[f32]) -> Vec<f32> {
        self.pending_in.extend_from_slice(input);
        match self.upsampler.as_mut() {
            Some(upsampler) => {
                resample_into(upsampler, &mut self.pending_in, &mut self.pending_48k)
            },
            None => self.pending_48k.append(&mut self.pending_in),
        }

        let frame_size = DenoiseState::FRAME_SIZE;
        let mut output = vec![0.0f32; frame_size];
        let frames = self.pending_48k.len() / frame_size;
        for frame in self.pending_48k.chunks_exact(frame_size) {
            let speech_probability = self.state.process_frame(&mut output, frame);
            if speech_probability < self.vad_floor {
                output.iter_mut().for_each(|s| *s = 0.0);
            }
            self.denoised_48k.extend_from_slice(&output);
        }
        self.pending_48k.drain(..frames * frame_size);

        match self.downsampler.as_mut() {
            Some(downsampler) => {
                let mut out = Vec::new();
                resample_into(downsampler, &mut self.denoised_48k, &mut out);
                self.ready.extend(out);
            },
            None => self.ready.extend(self.denoised_48k.drain(..)),
        }

        let available = self.ready.len().min(input.len());
        let mut out = vec![0.0f32; input.len() - available];
        out.extend(self.ready.drain(..available));
        out
    }
}

/// Feed whole resampler chunks from `input`, leaving the remainder buffered
fn resample_into(resampler: &mut FftFixedInOut<f32>, input: &mut Vec<f32>, output: &mut Vec<f32>) {
    loop {
        let needed = resampler.input_frames_next();
        if needed == 0 || input.len() < needed {
            break;
        }
        let chunk: Vec<f32> = input.drain(..needed).collect();
        match resampler.process(&[chunk], None) {
            Ok(frames) => {
                if let Some(channel) = frames.into_iter().next() {
                    output.extend(channel);
                }
            },
            Err(e) => tracing::warn!(error = %e, "Resampling error"),
        }
    }
}
