//! Audio stream adapter
//!
//! One producer task pulls raw chunks from the caller's source, enhances and
//! tags them, then fans out to two queues:
//! - primary: bounded, `send().await` (backpressure on the producer)
//! - debug: bounded, `try_send` (chunk dropped and counted when full)
//!
//! The consumer side is a single-pass [`AudioStream`]; stages borrow it one
//! after another so audio left unread by the wake word engine is still there
//! for speech-to-text.

use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use assist_core::{AudioChunk, AudioSettings, ChunkStream, GatePolicy, SpeechMetadata};

use super::enhance::AudioEnhancer;

/// Raw audio source supplied by the caller
pub type AudioSource = Pin<Box<dyn Stream<Item = Vec<u8>> + Send + 'static>>;

/// Adapter settings for one run
#[derive(Debug, Clone)]
pub struct AudioStreamConfig {
    pub metadata: SpeechMetadata,
    pub settings: AudioSettings,
    pub vad_threshold_db: f32,
    pub primary_capacity: usize,
}

#[derive(Debug, Default)]
struct StreamStats {
    received: AtomicU64,
    forwarded: AtomicU64,
    gated: AtomicU64,
    debug_dropped: AtomicU64,
}

/// Counters reported when a stream is closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamSummary {
    pub received: u64,
    pub forwarded: u64,
    /// Chunks removed by the VAD gate under `GatePolicy::Drop`
    pub gated: u64,
    /// Chunks the debug branch could not keep up with
    pub debug_dropped: u64,
}

/// Consumer end of the adapter
pub struct AudioStream {
    rx: mpsc::Receiver<AudioChunk>,
    cancel: CancellationToken,
    producer: Option<JoinHandle<()>>,
    stats: Arc<StreamStats>,
    metadata: SpeechMetadata,
}

impl AudioStream {
    /// Spawn the producer task.
    ///
    /// `cancel` should be a child of the run's token; dropping or closing
    /// the stream cancels it.
    pub fn spawn(
        source: AudioSource,
        config: AudioStreamConfig,
        debug_sink: Option<mpsc::Sender<AudioChunk>>,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.primary_capacity.max(1));
        let stats = Arc::new(StreamStats::default());
        let enhancer = AudioEnhancer::new(
            &config.settings,
            &config.metadata,
            config.vad_threshold_db,
        );

        let producer = Producer {
            enhancer,
            gate_policy: config.settings.gate_policy,
            bytes_per_ms: config.metadata.bytes_per_ms(),
            tx,
            debug: debug_sink,
            stats: stats.clone(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(producer.run(source));

        Self {
            rx,
            cancel,
            producer: Some(handle),
            stats,
            metadata: config.metadata,
        }
    }

    pub fn metadata(&self) -> &SpeechMetadata {
        &self.metadata
    }

    /// Borrow the remaining chunks as an engine stream.
    ///
    /// Chunks not pulled before the returned stream is dropped stay queued.
    pub fn chunks(&mut self) -> ChunkStream<'_> {
        let rx = &mut self.rx;
        Box::pin(futures::stream::poll_fn(move |cx| rx.poll_recv(cx)))
    }

    pub async fn next_chunk(&mut self) -> Option<AudioChunk> {
        self.rx.recv().await
    }

    /// Stop the producer and wait for it to exit
    pub async fn close(mut self) -> StreamSummary {
        self.cancel.cancel();
        self.rx.close();
        if let Some(handle) = self.producer.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Audio producer task failed");
            }
        }
        self.summary()
    }

    pub fn summary(&self) -> StreamSummary {
        StreamSummary {
            received: self.stats.received.load(Ordering::Relaxed),
            forwarded: self.stats.forwarded.load(Ordering::Relaxed),
            gated: self.stats.gated.load(Ordering::Relaxed),
            debug_dropped: self.stats.debug_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for AudioStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Producer {
    enhancer: AudioEnhancer,
    gate_policy: GatePolicy,
    bytes_per_ms: Option<f64>,
    tx: mpsc::Sender<AudioChunk>,
    debug: Option<mpsc::Sender<AudioChunk>>,
    stats: Arc<StreamStats>,
    cancel: CancellationToken,
}

impl Producer {
    async fn run(mut self, mut source: AudioSource) {
        let started = Instant::now();
        let mut sequence = 0u64;
        let mut offset_bytes = 0u64;

        loop {
            let raw = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = source.next() => match next {
                    Some(raw) => raw,
                    None => break,
                },
            };
            self.stats.received.fetch_add(1, Ordering::Relaxed);

            let timestamp_ms = match self.bytes_per_ms {
                Some(rate) if rate > 0.0 => (offset_bytes as f64 / rate) as u64,
                _ => started.elapsed().as_millis() as u64,
            };
            offset_bytes += raw.len() as u64;

            let mut chunk = AudioChunk::new(self.enhancer.enhance(raw), sequence, timestamp_ms);
            chunk.is_speech = self.enhancer.classify(&chunk.audio);
            sequence += 1;

            self.tee(&chunk);

            let Some(chunk) = self.gate(chunk) else {
                self.stats.gated.fetch_add(1, Ordering::Relaxed);
                continue;
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                sent = self.tx.send(chunk) => {
                    if sent.is_err() {
                        // Consumer is gone
                        break;
                    }
                },
            }
            self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
        }

        tracing::debug!(
            chunks = sequence,
            debug_dropped = self.stats.debug_dropped.load(Ordering::Relaxed),
            "Audio producer finished"
        );
    }

    fn tee(&mut self, chunk: &AudioChunk) {
        let Some(debug) = &self.debug else {
            return;
        };
        match debug.try_send(chunk.clone()) {
            Ok(()) => {},
            Err(TrySendError::Full(_)) => {
                let dropped = self.stats.debug_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 {
                    tracing::warn!("Debug recorder falling behind, dropping audio chunks");
                }
            },
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Debug recorder closed, stopping tee");
                self.debug = None;
            },
        }
    }

    fn gate(&self, mut chunk: AudioChunk) -> Option<AudioChunk> {
        if chunk.is_speech != Some(false) {
            return Some(chunk);
        }
        match self.gate_policy {
            GatePolicy::Drop => None,
            GatePolicy::Silence => {
                chunk.audio = vec![0u8; chunk.audio.len()].into();
                Some(chunk)
            },
        }
    }
}

/// Wrap any chunk stream as an [`AudioSource`]
pub fn audio_source<S>(stream: S) -> AudioSource
where
    S: Stream<Item = Vec<u8>> + Send + 'static,
{
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(value: i16, samples: usize) -> Vec<u8> {
        std::iter::repeat(value.to_le_bytes())
            .take(samples)
            .flatten()
            .collect()
    }

    fn config(settings: AudioSettings) -> AudioStreamConfig {
        AudioStreamConfig {
            metadata: SpeechMetadata::pcm16_mono("en"),
            settings,
            vad_threshold_db: -45.0,
            primary_capacity: 4,
        }
    }

    fn no_vad() -> AudioSettings {
        AudioSettings {
            is_vad_enabled: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_chunks_forwarded_in_order_with_timestamps() {
        let source = audio_source(futures::stream::iter(vec![pcm(100, 160); 3]));
        let mut stream = AudioStream::spawn(source, config(no_vad()), None, CancellationToken::new());

        let chunks: Vec<AudioChunk> = stream.chunks().collect().await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks.iter().map(|c| c.timestamp_ms).collect::<Vec<_>>(),
            vec![0, 10, 20]
        );
        assert!(chunks.iter().all(|c| c.is_speech.is_none()));

        let summary = stream.close().await;
        assert_eq!(summary.forwarded, 3);
    }

    #[tokio::test]
    async fn test_remaining_chunks_survive_partial_read() {
        let source = audio_source(futures::stream::iter((0..5).map(|i| pcm(i, 160))));
        let mut stream = AudioStream::spawn(source, config(no_vad()), None, CancellationToken::new());

        let first: Vec<AudioChunk> = stream.chunks().take(2).collect().await;
        assert_eq!(first.len(), 2);

        let rest: Vec<AudioChunk> = stream.chunks().collect().await;
        assert_eq!(rest.iter().map(|c| c.sequence).collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_silence_policy_zeroes_non_speech() {
        let source = audio_source(futures::stream::iter(vec![pcm(8000, 160), pcm(30, 160)]));
        let mut stream =
            AudioStream::spawn(source, config(AudioSettings::default()), None, CancellationToken::new());

        let chunks: Vec<AudioChunk> = stream.chunks().collect().await;
        assert_eq!(chunks[0].is_speech, Some(true));
        assert_eq!(chunks[1].is_speech, Some(false));
        assert!(chunks[1].audio.iter().all(|b| *b == 0));
        assert_eq!(chunks[1].len(), 320);
    }

    #[tokio::test]
    async fn test_drop_policy_removes_non_speech() {
        let settings = AudioSettings {
            gate_policy: GatePolicy::Drop,
            ..Default::default()
        };
        let source = audio_source(futures::stream::iter(vec![
            pcm(30, 160),
            pcm(8000, 160),
            pcm(30, 160),
        ]));
        let mut stream = AudioStream::spawn(source, config(settings), None, CancellationToken::new());

        let chunks: Vec<AudioChunk> = stream.chunks().collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].sequence, 1);
        assert_eq!(stream.close().await.gated, 2);
    }

    #[tokio::test]
    async fn test_debug_branch_drops_when_full() {
        let (debug_tx, mut debug_rx) = mpsc::channel(1);
        let source = audio_source(futures::stream::iter(vec![pcm(100, 160); 5]));
        let mut stream =
            AudioStream::spawn(source, config(no_vad()), Some(debug_tx), CancellationToken::new());

        // Primary consumer gets everything even though debug is never drained
        let chunks: Vec<AudioChunk> = stream.chunks().collect().await;
        assert_eq!(chunks.len(), 5);

        let summary = stream.close().await;
        assert_eq!(summary.debug_dropped, 4);
        assert_eq!(debug_rx.recv().await.map(|c| c.sequence), Some(0));
    }

    #[tokio::test]
    async fn test_close_stops_pending_source() {
        let source = audio_source(futures::stream::pending());
        let stream = AudioStream::spawn(source, config(no_vad()), None, CancellationToken::new());
        let summary = stream.close().await;
        assert_eq!(summary.received, 0);
    }
}
