//! Assist pipeline replay tool
//!
//! Streams a WAV file through a pipeline backed by scripted engines and
//! prints every pipeline event as one JSON line on stdout.
//!
//! Usage: `assist-replay <file.wav> [--start STAGE] [--end STAGE] [--transcript TEXT]`

mod cli;

use anyhow::{bail, Context};
use clap::Parser;
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use assist_config::{load_settings, Settings};
use assist_core::{Channels, Pipeline, SampleRate, SpeechMetadata};
use assist_pipeline::testing::{chunk_stream, EchoAgent, ScriptedStt, ScriptedTts, ScriptedWakeWord};
use assist_pipeline::{
    event_stream, AssistPipeline, EngineRegistry, InMemoryPipelineStore, PipelineRequest,
};

use cli::Cli;

const CHUNK_MS: u32 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Priority: env vars > config/{env} > config/default > defaults
    let env = std::env::var("ASSIST_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing not yet initialized
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Settings::default()
        },
    };
    init_tracing(&settings);

    let (metadata, chunks) = read_wav(&cli.path, &cli.language)?;
    tracing::info!(
        path = %cli.path.display(),
        metadata = %metadata,
        chunks = chunks.len(),
        "Replaying audio"
    );

    let engines = EngineRegistry::new()
        .with_wake_word("scripted", Arc::new(ScriptedWakeWord::new("ok_nabu")))
        .with_stt("scripted", Arc::new(ScriptedStt::new(cli.transcript)))
        .with_conversation("echo", Arc::new(EchoAgent::new()))
        .with_tts("scripted", Arc::new(ScriptedTts::new()));
    let store = InMemoryPipelineStore::new().with_pipeline(
        Pipeline::new("replay", "Replay", metadata.language.clone(), "echo")
            .with_wake_word("scripted", Some("ok_nabu".to_string()))
            .with_stt("scripted")
            .with_tts("scripted", None),
    );
    let pipeline = AssistPipeline::new(settings.pipeline.clone(), Arc::new(store), engines)
        .context("invalid pipeline config")?;

    let (callback, mut events) = event_stream();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::error!(error = %e, "Failed to serialize event"),
            }
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling run");
            ctrl_c.cancel();
        }
    });

    let request = PipelineRequest::new(callback)
        .with_cancellation(cancel)
        .with_stages(cli.start, cli.end);

    let result = pipeline
        .run_from_audio_stream(metadata, chunk_stream(chunks), request)
        .await;
    printer.await.context("event printer failed")?;

    match result {
        Ok(outputs) => {
            tracing::info!(
                transcript = ?outputs.stt.map(|stt| stt.text),
                tts = ?outputs.tts.map(|tts| tts.url),
                "Replay finished"
            );
            Ok(())
        },
        Err(e) => bail!("replay failed: {}", e),
    }
}

/// Initialize tracing (console only)
fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log_directives(&settings.observability.log_level).into());

    let subscriber = tracing_subscriber::registry().with(env_filter);
    // Events go to stdout; logs stay on stderr
    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };
    subscriber.with(fmt_layer).init();
}

/// A bare level applies to the assist crates; full directives pass through
fn log_directives(level: &str) -> String {
    if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("assist={}", level)
    }
}

/// Read 16-bit PCM samples and split them into fixed-length chunks
fn read_wav(path: &Path, language: &str) -> anyhow::Result<(SpeechMetadata, Vec<Vec<u8>>)> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let spec = reader.spec();

    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        bail!(
            "only 16-bit integer PCM is supported, got {} bit {:?}",
            spec.bits_per_sample,
            spec.sample_format
        );
    }

    let mut metadata = SpeechMetadata::pcm16_mono(language);
    metadata.sample_rate = sample_rate(spec.sample_rate)
        .with_context(|| format!("unsupported sample rate {}", spec.sample_rate))?;
    metadata.channel = match spec.channels {
        1 => Channels::Mono,
        2 => Channels::Stereo,
        n => bail!("unsupported channel count {}", n),
    };

    let bytes = reader
        .samples::<i16>()
        .map(|s| s.map(i16::to_le_bytes))
        .collect::<Result<Vec<_>, _>>()
        .context("failed to read samples")?
        .concat();

    let chunk_bytes = (spec.sample_rate * CHUNK_MS / 1000) as usize * 2 * spec.channels as usize;
    let chunks = bytes
        .chunks(chunk_bytes.max(2))
        .map(<[u8]>::to_vec)
        .collect();
    Ok((metadata, chunks))
}

fn sample_rate(hz: u32) -> Option<SampleRate> {
    let rate = match hz {
        8000 => SampleRate::Hz8000,
        11000 => SampleRate::Hz11000,
        16000 => SampleRate::Hz16000,
        18900 => SampleRate::Hz18900,
        22000 => SampleRate::Hz22000,
        32000 => SampleRate::Hz32000,
        37800 => SampleRate::Hz37800,
        44100 => SampleRate::Hz44100,
        48000 => SampleRate::Hz48000,
        _ => return None,
    };
    Some(rate)
}
