//! Debug recording of the post-enhancement audio stream
//!
//! Each run writes one file under `<dir>/<pipeline_id>/`. Writes happen on a
//! blocking task fed by a bounded queue; the stream adapter drops chunks when
//! the queue is full so recording never stalls live audio.

use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use assist_core::{AudioChunk, AudioCodec, BitDepth, SpeechMetadata};

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

/// Summary of a finished recording
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub path: PathBuf,
    pub chunks_written: u64,
}

/// Handle to a per-run recording task
pub struct DebugRecorder {
    tx: Option<mpsc::Sender<AudioChunk>>,
    handle: JoinHandle<Result<Recording, RecorderError>>,
    path: PathBuf,
}

impl DebugRecorder {
    /// Start recording for one run
    pub fn start(
        dir: &Path,
        pipeline_id: &str,
        run_id: &str,
        metadata: &SpeechMetadata,
        queue_capacity: usize,
    ) -> Self {
        let path = recording_path(dir, pipeline_id, run_id, metadata, Utc::now());
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));

        let task_path = path.clone();
        let task_metadata = metadata.clone();
        let handle =
            tokio::task::spawn_blocking(move || write_recording(task_path, &task_metadata, rx));

        tracing::debug!(path = %path.display(), "Debug recording started");

        Self {
            tx: Some(tx),
            handle,
            path,
        }
    }

    /// Queue the stream adapter feeds; chunks sent after `finish` are lost
    pub fn sender(&self) -> Option<mpsc::Sender<AudioChunk>> {
        self.tx.clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the queue and wait for the file to be finalized.
    ///
    /// Returns `None` if the recording failed; the failure is logged.
    pub async fn finish(mut self) -> Option<Recording> {
        self.tx.take();
        match self.handle.await {
            Ok(Ok(recording)) => {
                tracing::debug!(
                    path = %recording.path.display(),
                    chunks = recording.chunks_written,
                    "Debug recording finished"
                );
                Some(recording)
            },
            Ok(Err(e)) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Debug recording failed");
                None
            },
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Debug recording task aborted");
                None
            },
        }
    }
}

/// `<dir>/<pipeline_id>/<UTC timestamp>_<run_id>.<wav|raw>`
pub fn recording_path(
    dir: &Path,
    pipeline_id: &str,
    run_id: &str,
    metadata: &SpeechMetadata,
    now: DateTime<Utc>,
) -> PathBuf {
    let extension = if writes_wav(metadata) { "wav" } else { "raw" };
    let file_name = format!(
        "{}_{}.{}",
        now.format("%Y%m%dT%H%M%S%.3fZ"),
        sanitize(run_id),
        extension
    );
    dir.join(sanitize(pipeline_id)).join(file_name)
}

fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}

fn writes_wav(metadata: &SpeechMetadata) -> bool {
    metadata.codec == AudioCodec::Pcm
}

enum Sink {
    Wav(hound::WavWriter<BufWriter<File>>),
    Raw(BufWriter<File>),
}

fn write_recording(
    path: PathBuf,
    metadata: &SpeechMetadata,
    mut rx: mpsc::Receiver<AudioChunk>,
) -> Result<Recording, RecorderError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut sink = if writes_wav(metadata) {
        let spec = hound::WavSpec {
            channels: metadata.channel.count(),
            sample_rate: metadata.sample_rate.as_u32(),
            bits_per_sample: metadata.bit_rate.bits(),
            sample_format: hound::SampleFormat::Int,
        };
        Sink::Wav(hound::WavWriter::create(&path, spec)?)
    } else {
        Sink::Raw(BufWriter::new(File::create(&path)?))
    };

    let mut chunks_written = 0u64;
    while let Some(chunk) = rx.blocking_recv() {
        match &mut sink {
            Sink::Wav(writer) => write_pcm(writer, metadata.bit_rate, &chunk.audio)?,
            Sink::Raw(writer) => writer.write_all(&chunk.audio)?,
        }
        chunks_written += 1;
    }

    match sink {
        Sink::Wav(writer) => writer.finalize()?,
        Sink::Raw(mut writer) => writer.flush()?,
    }

    Ok(Recording {
        path,
        chunks_written,
    })
}

fn write_pcm<W: std::io::Write + std::io::Seek>(
    writer: &mut hound::WavWriter<W>,
    depth: BitDepth,
    bytes: &[u8],
) -> Result<(), hound::Error> {
    match depth {
        // 8-bit PCM is unsigned on the wire
        BitDepth::Bits8 => {
            for &b in bytes {
                writer.write_sample((b as i16 - 128) as i8)?;
            }
        },
        BitDepth::Bits16 => {
            for pair in bytes.chunks_exact(2) {
                writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
            }
        },
        BitDepth::Bits24 => {
            for triple in bytes.chunks_exact(3) {
                // Sign-extend from 24 bits
                let value = i32::from_le_bytes([0, triple[0], triple[1], triple[2]]) >> 8;
                writer.write_sample(value)?;
            }
        },
        BitDepth::Bits32 => {
            for quad in bytes.chunks_exact(4) {
                writer.write_sample(i32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]))?;
            }
        },
    }
    Ok(())
}
