//! Integration tests for pipeline runs (wake word -> STT -> intent -> TTS)
//!
//! Every test drives the public entry operation with scripted engines and
//! checks the event trace the caller observes.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use assist_config::{ConfigError, PipelineConfig};
use assist_core::{
    AudioSettings, ErrorCode, GatePolicy, Pipeline, PipelineError, PipelineEventData,
    PipelineEventType as E, PipelineStage, RunState, SampleRate, SpeechMetadata, StageError,
    StageWindow, ValidationError, WakeWordSettings,
};
use assist_pipeline::testing::{
    chunk_stream, open_chunk_stream, pcm_silence, pcm_tone, EchoAgent, EventLog, ScriptedStt,
    ScriptedTts, ScriptedWakeWord,
};
use assist_pipeline::{AssistPipeline, EngineRegistry, InMemoryPipelineStore, PipelineRequest};

const COMMAND: &str = "turn on the kitchen light";

struct Deployment {
    pipeline: AssistPipeline,
    wake_word: Arc<ScriptedWakeWord>,
    stt: Arc<ScriptedStt>,
    agent: Arc<EchoAgent>,
    tts: Arc<ScriptedTts>,
}

impl Deployment {
    fn new(config: PipelineConfig) -> Self {
        Self::with_engines(
            config,
            ScriptedWakeWord::new("ok_nabu"),
            ScriptedStt::new(COMMAND).with_languages(&["en"]),
            EchoAgent::new(),
            ScriptedTts::new(),
        )
    }

    fn with_engines(
        config: PipelineConfig,
        wake_word: ScriptedWakeWord,
        stt: ScriptedStt,
        agent: EchoAgent,
        tts: ScriptedTts,
    ) -> Self {
        let wake_word = Arc::new(wake_word);
        let stt = Arc::new(stt);
        let agent = Arc::new(agent);
        let tts = Arc::new(tts);

        let engines = EngineRegistry::new()
            .with_wake_word("wake", wake_word.clone())
            .with_stt("stt", stt.clone())
            .with_conversation("echo", agent.clone())
            .with_tts("tts", tts.clone());
        let store = InMemoryPipelineStore::new()
            .with_pipeline(kitchen())
            .with_pipeline(office());

        Self {
            pipeline: AssistPipeline::new(config, Arc::new(store), engines).unwrap(),
            wake_word,
            stt,
            agent,
            tts,
        }
    }
}

fn kitchen() -> Pipeline {
    Pipeline::new("kitchen", "Kitchen", "en", "echo")
        .with_wake_word("wake", Some("ok_nabu".to_string()))
        .with_stt("stt")
        .with_tts("tts", Some("amy".to_string()))
}

fn office() -> Pipeline {
    Pipeline::new("office", "Office", "en", "echo")
        .with_wake_word("wake", Some("ok_nabu".to_string()))
        .with_stt("stt")
}

/// Wake word chunk, 400ms of speech, then 800ms of silence (100ms chunks)
fn command_audio() -> Vec<Vec<u8>> {
    let mut chunks = vec![pcm_silence(100)];
    chunks.extend((0..4).map(|_| pcm_tone(100, 0.5)));
    chunks.extend((0..8).map(|_| pcm_silence(100)));
    chunks
}

fn audio_request(log: &EventLog, start: PipelineStage, end: PipelineStage) -> PipelineRequest {
    PipelineRequest::new(log.callback())
        .with_stages(start, end)
        .with_audio(SpeechMetadata::pcm16_mono("en"), chunk_stream(command_audio()))
}

fn stage_markers(stage: PipelineStage) -> [E; 2] {
    match stage {
        PipelineStage::WakeWord => [E::WakeWordStart, E::WakeWordEnd],
        PipelineStage::Stt => [E::SttStart, E::SttEnd],
        PipelineStage::Intent => [E::IntentStart, E::IntentEnd],
        PipelineStage::Tts => [E::TtsStart, E::TtsEnd],
    }
}

fn without_vad(types: Vec<E>) -> Vec<E> {
    types
        .into_iter()
        .filter(|t| !matches!(t, E::SttVadStart | E::SttVadEnd))
        .collect()
}

/// Full round trip: every stage runs and the outputs come from the engines
#[tokio::test]
async fn test_full_round_trip() {
    let deployment = Deployment::new(PipelineConfig::default());
    let log = EventLog::new();

    let outputs = deployment
        .pipeline
        .run(audio_request(&log, PipelineStage::WakeWord, PipelineStage::Tts))
        .await
        .unwrap();

    assert_eq!(
        log.types(),
        vec![
            E::RunStart,
            E::WakeWordStart,
            E::WakeWordEnd,
            E::SttStart,
            E::SttVadStart,
            E::SttVadEnd,
            E::SttEnd,
            E::IntentStart,
            E::IntentEnd,
            E::TtsStart,
            E::TtsEnd,
            E::RunEnd,
        ]
    );

    let wake_word = outputs.wake_word.clone().unwrap();
    assert!(!wake_word.skipped_by_cooldown);
    assert_eq!(wake_word.detection.unwrap().wake_word_id, "ok_nabu");

    assert_eq!(outputs.stt.as_ref().unwrap().text, COMMAND);
    assert_eq!(outputs.intent.as_ref().unwrap().response.speech, COMMAND);

    let tts = outputs.tts.clone().unwrap();
    assert_eq!(tts.token, "tts-1.wav");
    assert_eq!(tts.url, "/api/tts_proxy/tts-1.wav");
    assert_eq!(tts.media_id, "media-source://tts/tts/tts-1.wav");
    assert_eq!(tts.mime_type, "audio/wav");

    let requests = deployment.tts.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].message, COMMAND);
    assert_eq!(requests[0].voice.as_deref(), Some("amy"));

    // The wake word engine only read its chunk; STT got the rest up to the
    // end of the command
    assert_eq!(deployment.wake_word.detect_calls(), 1);
    assert_eq!(deployment.stt.received_chunks().len(), 11);

    let events = log.events();
    match &events.last().unwrap().data {
        PipelineEventData::RunEnd { outputs: reported } => assert_eq!(reported, &outputs),
        other => panic!("unexpected terminal event: {:?}", other),
    }
    match &events[0].data {
        PipelineEventData::RunStart(start) => {
            assert_eq!(start.pipeline_id, "kitchen");
            assert_eq!(start.start_stage, PipelineStage::WakeWord);
            assert_eq!(start.end_stage, PipelineStage::Tts);
        },
        other => panic!("unexpected first event: {:?}", other),
    }
}

/// With VAD off the trace is exactly run-start, one start/end pair per
/// stage and run-end
#[tokio::test]
async fn test_round_trip_without_vad() {
    let deployment = Deployment::new(PipelineConfig::default());
    let log = EventLog::new();
    let settings = AudioSettings {
        is_vad_enabled: false,
        ..AudioSettings::default()
    };

    let outputs = deployment
        .pipeline
        .run(
            audio_request(&log, PipelineStage::WakeWord, PipelineStage::Tts)
                .with_audio_settings(settings),
        )
        .await
        .unwrap();

    assert_eq!(
        log.types(),
        vec![
            E::RunStart,
            E::WakeWordStart,
            E::WakeWordEnd,
            E::SttStart,
            E::SttEnd,
            E::IntentStart,
            E::IntentEnd,
            E::TtsStart,
            E::TtsEnd,
            E::RunEnd,
        ]
    );

    // Without a segmenter STT reads the stream to its end
    assert_eq!(deployment.stt.received_chunks().len(), 12);
    assert_eq!(outputs.stt.as_ref().unwrap().text, COMMAND);
    assert_eq!(outputs.intent.as_ref().unwrap().response.speech, COMMAND);
    assert_eq!(outputs.tts.as_ref().unwrap().token, "tts-1.wav");

    match &log.events().last().unwrap().data {
        PipelineEventData::RunEnd { outputs: reported } => assert_eq!(reported, &outputs),
        other => panic!("unexpected terminal event: {:?}", other),
    }
}

#[tokio::test]
async fn test_vad_sub_events_carry_stream_offsets() {
    let deployment = Deployment::new(PipelineConfig::default());
    let log = EventLog::new();

    deployment
        .pipeline
        .run(audio_request(&log, PipelineStage::Stt, PipelineStage::Stt))
        .await
        .unwrap();

    let offsets: Vec<(E, u64)> = log
        .events()
        .iter()
        .filter_map(|event| match event.data {
            PipelineEventData::SttVadStart { timestamp_ms } => Some((E::SttVadStart, timestamp_ms)),
            PipelineEventData::SttVadEnd { timestamp_ms } => Some((E::SttVadEnd, timestamp_ms)),
            _ => None,
        })
        .collect();
    assert_eq!(offsets, vec![(E::SttVadStart, 200), (E::SttVadEnd, 1200)]);
}

#[tokio::test]
async fn test_drop_gate_ends_command_with_stream() {
    let deployment = Deployment::new(PipelineConfig::default());
    let log = EventLog::new();
    let settings = AudioSettings {
        gate_policy: GatePolicy::Drop,
        ..AudioSettings::default()
    };

    let outputs = deployment
        .pipeline
        .run(
            audio_request(&log, PipelineStage::Stt, PipelineStage::Stt).with_audio_settings(settings),
        )
        .await
        .unwrap();

    assert_eq!(outputs.stt.unwrap().text, COMMAND);
    let types = log.types();
    assert!(types.contains(&E::SttVadStart));
    assert!(!types.contains(&E::SttVadEnd));
    // Only the four speech chunks get past the gate
    assert_eq!(deployment.stt.received_chunks().len(), 4);
}

/// Every valid window emits exactly its stages, in order
#[tokio::test]
async fn test_stage_window_ordering() {
    for start in PipelineStage::ALL {
        for end in PipelineStage::ALL {
            let Ok(window) = StageWindow::new(start, end) else {
                continue;
            };
            let deployment = Deployment::new(PipelineConfig::default());
            let log = EventLog::new();

            let request = match start {
                PipelineStage::WakeWord | PipelineStage::Stt => audio_request(&log, start, end),
                PipelineStage::Intent => PipelineRequest::new(log.callback())
                    .with_stages(start, end)
                    .with_intent_input(COMMAND),
                PipelineStage::Tts => PipelineRequest::new(log.callback())
                    .with_stages(start, end)
                    .with_tts_input(COMMAND),
            };
            deployment.pipeline.run(request).await.unwrap();

            let mut expected = vec![E::RunStart];
            for stage in window.stages() {
                expected.extend(stage_markers(stage));
            }
            expected.push(E::RunEnd);
            assert_eq!(without_vad(log.types()), expected, "window {}..{}", start, end);
        }
    }
}

#[tokio::test]
async fn test_reversed_window_emits_nothing() {
    let deployment = Deployment::new(PipelineConfig::default());

    for start in PipelineStage::ALL {
        for end in PipelineStage::ALL.into_iter().filter(|end| *end < start) {
            let log = EventLog::new();
            let result = deployment
                .pipeline
                .run(audio_request(&log, start, end))
                .await;
            assert!(matches!(
                result,
                Err(PipelineError::Validation(ValidationError::InvalidStageWindow { .. }))
            ));
            assert!(log.is_empty());
        }
    }
}

#[tokio::test]
async fn test_pipeline_not_found() {
    let deployment = Deployment::new(PipelineConfig::default());
    let log = EventLog::new();

    let result = deployment
        .pipeline
        .run(audio_request(&log, PipelineStage::Stt, PipelineStage::Tts).with_pipeline_id("garage"))
        .await;
    assert_eq!(result, Err(PipelineError::NotFound("garage".to_string())));
    assert!(log.is_empty());

    let empty = AssistPipeline::new(
        PipelineConfig::default(),
        Arc::new(InMemoryPipelineStore::new()),
        EngineRegistry::new(),
    )
    .unwrap();
    let result = empty
        .run(PipelineRequest::new(log.callback()).with_intent_input(COMMAND))
        .await;
    assert!(matches!(result, Err(PipelineError::NotFound(_))));
    assert!(log.is_empty());
}

#[tokio::test]
async fn test_validation_failures_emit_nothing() {
    let deployment = Deployment::new(PipelineConfig::default());

    // STT engine only speaks English
    let log = EventLog::new();
    let result = deployment
        .pipeline
        .run(audio_request(&log, PipelineStage::Stt, PipelineStage::Tts).with_language("fr"))
        .await;
    assert!(matches!(
        result,
        Err(PipelineError::Validation(ValidationError::UnsupportedLanguage {
            stage: PipelineStage::Stt,
            ..
        }))
    ));
    assert!(log.is_empty());

    // Unsupported sample rate names the property
    let log = EventLog::new();
    let mut metadata = SpeechMetadata::pcm16_mono("en");
    metadata.sample_rate = SampleRate::Hz44100;
    let result = deployment
        .pipeline
        .run(
            PipelineRequest::new(log.callback())
                .with_audio(metadata, chunk_stream(command_audio())),
        )
        .await;
    match result {
        Err(PipelineError::Validation(ValidationError::UnsupportedFormat { detail, .. })) => {
            assert_eq!(detail, "sample rate 44100");
        },
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(log.is_empty());

    // Missing text input for an intent-first window
    let log = EventLog::new();
    let result = deployment
        .pipeline
        .run(PipelineRequest::new(log.callback()).with_stages(PipelineStage::Intent, PipelineStage::Tts))
        .await;
    assert!(matches!(
        result,
        Err(PipelineError::Validation(ValidationError::MissingInput {
            stage: PipelineStage::Intent,
            ..
        }))
    ));

    // Missing audio for an STT-first window
    let result = deployment
        .pipeline
        .run(PipelineRequest::new(log.callback()))
        .await;
    assert!(matches!(
        result,
        Err(PipelineError::Validation(ValidationError::MissingInput {
            stage: PipelineStage::Stt,
            ..
        }))
    ));

    // TTS engine cannot produce flac
    let result = deployment
        .pipeline
        .run(
            PipelineRequest::new(log.callback())
                .with_stages(PipelineStage::Tts, PipelineStage::Tts)
                .with_tts_input(COMMAND)
                .with_tts_audio_output("flac"),
        )
        .await;
    assert!(matches!(
        result,
        Err(PipelineError::Validation(ValidationError::UnsupportedFormat {
            stage: PipelineStage::Tts,
            ..
        }))
    ));

    // Office has no TTS engine configured
    let result = deployment
        .pipeline
        .run(
            PipelineRequest::new(log.callback())
                .with_pipeline_id("office")
                .with_stages(PipelineStage::Intent, PipelineStage::Tts)
                .with_intent_input(COMMAND),
        )
        .await;
    assert!(matches!(
        result,
        Err(PipelineError::Validation(ValidationError::EngineMissing {
            stage: PipelineStage::Tts,
            ..
        }))
    ));
    assert!(log.is_empty());
}

#[tokio::test]
async fn test_unsupported_wake_word() {
    let deployment = Deployment::with_engines(
        PipelineConfig::default(),
        ScriptedWakeWord::new("hey_jarvis").with_supported(&["hey_jarvis"]),
        ScriptedStt::new(COMMAND),
        EchoAgent::new(),
        ScriptedTts::new(),
    );
    let log = EventLog::new();

    let result = deployment
        .pipeline
        .run(audio_request(&log, PipelineStage::WakeWord, PipelineStage::Stt))
        .await;
    assert!(matches!(
        result,
        Err(PipelineError::Validation(ValidationError::UnsupportedWakeWord { .. }))
    ));
    assert!(log.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stt_timeout_ends_run() {
    let config = PipelineConfig::default().with_stt_timeout(Some(1.0));
    let deployment = Deployment::new(config);
    let log = EventLog::new();
    let settings = AudioSettings {
        is_vad_enabled: false,
        ..AudioSettings::default()
    };

    // The stream never ends, so the engine never returns
    let request = PipelineRequest::new(log.callback())
        .with_audio_settings(settings)
        .with_audio(
            SpeechMetadata::pcm16_mono("en"),
            open_chunk_stream(vec![pcm_tone(100, 0.5)]),
        );
    let result = deployment.pipeline.run(request).await;

    assert_eq!(
        result,
        Err(PipelineError::Stage(StageError::SttTimeout(Duration::from_secs(1))))
    );
    assert_eq!(log.types(), vec![E::RunStart, E::SttStart, E::Error]);
    assert_eq!(log.error_codes(), vec![ErrorCode::SttTimeout]);
    assert!(deployment.agent.inputs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_run_deadline_bounds_unlimited_stage() {
    let config = PipelineConfig::default()
        .with_pipeline_timeout(5.0)
        .with_intent_timeout(None);
    let deployment = Deployment::with_engines(
        config,
        ScriptedWakeWord::new("ok_nabu"),
        ScriptedStt::new(COMMAND),
        EchoAgent::new().with_delay(Duration::from_secs(60)),
        ScriptedTts::new(),
    );
    let log = EventLog::new();

    let result = deployment
        .pipeline
        .run(
            PipelineRequest::new(log.callback())
                .with_stages(PipelineStage::Intent, PipelineStage::Tts)
                .with_intent_input(COMMAND),
        )
        .await;

    assert_eq!(result, Err(PipelineError::RunTimeout(Duration::from_secs(5))));
    assert_eq!(log.types(), vec![E::RunStart, E::IntentStart, E::Error]);
    assert_eq!(log.error_codes(), vec![ErrorCode::PipelineTimeout]);
    assert!(deployment.tts.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_run_deadline_checked_at_stage_boundary() {
    // Intent has its own 30s timeout, so it finishes past the 5s run budget
    let config = PipelineConfig::default().with_pipeline_timeout(5.0);
    let deployment = Deployment::with_engines(
        config,
        ScriptedWakeWord::new("ok_nabu"),
        ScriptedStt::new(COMMAND),
        EchoAgent::new().with_delay(Duration::from_secs(8)),
        ScriptedTts::new(),
    );
    let log = EventLog::new();

    let result = deployment
        .pipeline
        .run(
            PipelineRequest::new(log.callback())
                .with_stages(PipelineStage::Intent, PipelineStage::Tts)
                .with_intent_input(COMMAND),
        )
        .await;

    assert_eq!(result, Err(PipelineError::RunTimeout(Duration::from_secs(5))));
    assert_eq!(
        log.types(),
        vec![E::RunStart, E::IntentStart, E::IntentEnd, E::Error]
    );
    assert_eq!(log.error_codes(), vec![ErrorCode::PipelineTimeout]);
    assert_eq!(deployment.agent.inputs().len(), 1);
    assert!(deployment.tts.requests().is_empty());
}

#[tokio::test]
async fn test_out_of_range_wake_word_timeout_rejected() {
    let deployment = Deployment::new(PipelineConfig::default());
    let log = EventLog::new();

    let result = deployment
        .pipeline
        .run(
            audio_request(&log, PipelineStage::WakeWord, PipelineStage::Tts)
                .with_wake_word_settings(WakeWordSettings::with_timeout(1e20)),
        )
        .await;

    assert!(matches!(
        result,
        Err(PipelineError::Validation(ValidationError::InvalidSetting {
            stage: PipelineStage::WakeWord,
            ..
        }))
    ));
    assert!(log.is_empty());
    assert_eq!(deployment.wake_word.detect_calls(), 0);
}

#[test]
fn test_invalid_config_rejected() {
    for config in [
        PipelineConfig::default().with_wake_word_cooldown(-1.0),
        PipelineConfig::default().with_pipeline_timeout(f64::NAN),
        PipelineConfig::default().with_stt_timeout(Some(1e20)),
    ] {
        let result = AssistPipeline::new(
            config,
            Arc::new(InMemoryPipelineStore::new().with_pipeline(kitchen())),
            EngineRegistry::new(),
        );
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}

#[tokio::test(start_paused = true)]
async fn test_wake_word_timeout() {
    let deployment = Deployment::with_engines(
        PipelineConfig::default(),
        ScriptedWakeWord::new("ok_nabu").with_after_chunks(1000),
        ScriptedStt::new(COMMAND),
        EchoAgent::new(),
        ScriptedTts::new(),
    );
    let log = EventLog::new();

    let request = PipelineRequest::new(log.callback())
        .with_stages(PipelineStage::WakeWord, PipelineStage::Tts)
        .with_wake_word_settings(WakeWordSettings::with_timeout(3.0))
        .with_audio(
            SpeechMetadata::pcm16_mono("en"),
            open_chunk_stream(vec![pcm_silence(100)]),
        );
    let result = deployment.pipeline.run(request).await;

    assert_eq!(
        result,
        Err(PipelineError::Stage(StageError::WakeWordTimeout(Duration::from_secs(3))))
    );
    assert_eq!(log.types(), vec![E::RunStart, E::WakeWordStart, E::Error]);
    assert_eq!(log.error_codes(), vec![ErrorCode::WakeWordTimeout]);
}

#[tokio::test]
async fn test_stream_ends_before_wake_word() {
    let deployment = Deployment::with_engines(
        PipelineConfig::default(),
        ScriptedWakeWord::new("ok_nabu").with_after_chunks(50),
        ScriptedStt::new(COMMAND),
        EchoAgent::new(),
        ScriptedTts::new(),
    );
    let log = EventLog::new();

    let result = deployment
        .pipeline
        .run(audio_request(&log, PipelineStage::WakeWord, PipelineStage::Tts))
        .await;

    assert!(matches!(
        result,
        Err(PipelineError::Stage(StageError::WakeStreamFailed(_)))
    ));
    assert_eq!(log.error_codes(), vec![ErrorCode::WakeStreamFailed]);
}

#[tokio::test]
async fn test_stt_failures() {
    let empty = Deployment::with_engines(
        PipelineConfig::default(),
        ScriptedWakeWord::new("ok_nabu"),
        ScriptedStt::new("   "),
        EchoAgent::new(),
        ScriptedTts::new(),
    );
    let log = EventLog::new();
    let result = empty
        .pipeline
        .run(audio_request(&log, PipelineStage::Stt, PipelineStage::Tts))
        .await;
    assert_eq!(result, Err(PipelineError::Stage(StageError::SttNoTextRecognized)));
    assert_eq!(log.error_codes(), vec![ErrorCode::SttNoTextRecognized]);

    let failing = Deployment::with_engines(
        PipelineConfig::default(),
        ScriptedWakeWord::new("ok_nabu"),
        ScriptedStt::new(COMMAND).with_failure("socket closed"),
        EchoAgent::new(),
        ScriptedTts::new(),
    );
    let log = EventLog::new();
    let result = failing
        .pipeline
        .run(audio_request(&log, PipelineStage::Stt, PipelineStage::Tts))
        .await;
    assert!(matches!(
        result,
        Err(PipelineError::Stage(StageError::SttStreamError(_)))
    ));
    assert_eq!(log.types().last(), Some(&E::Error));
    assert!(!log.types().contains(&E::SttEnd));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_tts() {
    let deployment = Deployment::with_engines(
        PipelineConfig::default(),
        ScriptedWakeWord::new("ok_nabu"),
        ScriptedStt::new(COMMAND),
        EchoAgent::new(),
        ScriptedTts::new().with_delay(Duration::from_secs(20)),
    );
    let log = EventLog::new();
    let cancel = CancellationToken::new();

    let input = deployment
        .pipeline
        .prepare(
            PipelineRequest::new(log.callback())
                .with_stages(PipelineStage::Intent, PipelineStage::Tts)
                .with_intent_input(COMMAND)
                .with_cancellation(cancel.clone()),
        )
        .unwrap();
    let state = input.run().subscribe_state();
    let validated = input.validate().unwrap();

    let handle = tokio::spawn(validated.execute());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(*state.borrow(), RunState::Running(PipelineStage::Tts));
    cancel.cancel();

    let result = handle.await.unwrap();
    assert_eq!(result, Err(PipelineError::Cancelled));
    assert_eq!(
        log.types(),
        vec![E::RunStart, E::IntentStart, E::IntentEnd, E::TtsStart, E::Error]
    );
    assert_eq!(log.error_codes(), vec![ErrorCode::Cancelled]);
    assert_eq!(*state.borrow(), RunState::Error);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_run_reports_cancelled() {
    let deployment = Deployment::with_engines(
        PipelineConfig::default(),
        ScriptedWakeWord::new("ok_nabu"),
        ScriptedStt::new(COMMAND),
        EchoAgent::new().with_delay(Duration::from_secs(20)),
        ScriptedTts::new(),
    );
    let log = EventLog::new();

    let pipeline = deployment.pipeline.clone();
    let request = PipelineRequest::new(log.callback())
        .with_stages(PipelineStage::Intent, PipelineStage::Intent)
        .with_intent_input(COMMAND);
    let handle = tokio::spawn(async move { pipeline.run(request).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());

    assert_eq!(log.types(), vec![E::RunStart, E::IntentStart, E::Error]);
    assert_eq!(log.error_codes(), vec![ErrorCode::Cancelled]);
}

#[tokio::test]
async fn test_cooldown_skips_duplicate_detection() {
    let deployment = Deployment::new(PipelineConfig::default());

    let first = EventLog::new();
    let outputs = deployment
        .pipeline
        .run(audio_request(&first, PipelineStage::WakeWord, PipelineStage::Stt))
        .await
        .unwrap();
    assert!(!outputs.wake_word.unwrap().skipped_by_cooldown);

    let second = EventLog::new();
    let outputs = deployment
        .pipeline
        .run(audio_request(&second, PipelineStage::WakeWord, PipelineStage::Stt))
        .await
        .unwrap();
    let wake_word = outputs.wake_word.unwrap();
    assert!(wake_word.skipped_by_cooldown);
    assert_eq!(wake_word.detection, None);

    // The engine was not consulted the second time; STT still ran
    assert_eq!(deployment.wake_word.detect_calls(), 1);
    assert_eq!(outputs.stt.unwrap().text, COMMAND);
    assert_eq!(
        without_vad(second.types()),
        vec![E::RunStart, E::WakeWordStart, E::WakeWordEnd, E::SttStart, E::SttEnd, E::RunEnd]
    );
}

#[tokio::test]
async fn test_cooldown_is_per_pipeline() {
    let deployment = Deployment::new(PipelineConfig::default());

    for pipeline_id in ["kitchen", "office"] {
        let log = EventLog::new();
        let outputs = deployment
            .pipeline
            .run(
                audio_request(&log, PipelineStage::WakeWord, PipelineStage::WakeWord)
                    .with_pipeline_id(pipeline_id),
            )
            .await
            .unwrap();
        assert!(!outputs.wake_word.unwrap().skipped_by_cooldown);
    }
    assert_eq!(deployment.wake_word.detect_calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_runs_keep_separate_cooldowns() {
    let deployment = Deployment::new(PipelineConfig::default());

    let handles: Vec<_> = ["kitchen", "office"]
        .into_iter()
        .map(|pipeline_id| {
            let pipeline = deployment.pipeline.clone();
            let log = EventLog::new();
            let request = audio_request(&log, PipelineStage::WakeWord, PipelineStage::WakeWord)
                .with_pipeline_id(pipeline_id);
            tokio::spawn(async move { pipeline.run(request).await })
        })
        .collect();

    for handle in handles {
        let outputs = handle.await.unwrap().unwrap();
        assert!(!outputs.wake_word.unwrap().skipped_by_cooldown);
    }
    // Neither run saw the other's detection
    assert_eq!(deployment.wake_word.detect_calls(), 2);

    let cooldown = deployment.pipeline.cooldown();
    assert!(cooldown.in_cooldown("kitchen"));
    assert!(cooldown.in_cooldown("office"));
    assert!(!cooldown.in_cooldown("garage"));
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_expires() {
    let deployment = Deployment::new(PipelineConfig::default().with_wake_word_cooldown(2.0));

    for _ in 0..2 {
        let log = EventLog::new();
        let outputs = deployment
            .pipeline
            .run(audio_request(&log, PipelineStage::WakeWord, PipelineStage::WakeWord))
            .await
            .unwrap();
        assert!(!outputs.wake_word.unwrap().skipped_by_cooldown);
        tokio::time::sleep(Duration::from_secs(3)).await;
    }
    assert_eq!(deployment.wake_word.detect_calls(), 2);
}

#[tokio::test]
async fn test_language_override_and_conversation_id() {
    let deployment = Deployment::with_engines(
        PipelineConfig::default(),
        ScriptedWakeWord::new("ok_nabu"),
        ScriptedStt::new(COMMAND),
        EchoAgent::new().with_conversation_id("minted"),
        ScriptedTts::new(),
    );

    let log = EventLog::new();
    let outputs = deployment
        .pipeline
        .run(
            PipelineRequest::new(log.callback())
                .with_stages(PipelineStage::Intent, PipelineStage::Tts)
                .with_intent_input("mach das licht an")
                .with_language("de")
                .with_device_id("satellite-1")
                .with_tts_audio_output("mp3"),
        )
        .await
        .unwrap();

    let inputs = deployment.agent.inputs();
    assert_eq!(inputs[0].language, "de");
    assert_eq!(inputs[0].device_id.as_deref(), Some("satellite-1"));
    assert_eq!(
        outputs.intent.unwrap().conversation_id.as_deref(),
        Some("minted")
    );

    let requests = deployment.tts.requests();
    assert_eq!(requests[0].language, "de");
    assert_eq!(requests[0].output_format, "mp3");
    assert_eq!(outputs.tts.unwrap().mime_type, "audio/mpeg");

    // A caller-supplied conversation id is passed through
    let log = EventLog::new();
    let outputs = deployment
        .pipeline
        .run(
            PipelineRequest::new(log.callback())
                .with_stages(PipelineStage::Intent, PipelineStage::Intent)
                .with_intent_input(COMMAND)
                .with_conversation_id("existing"),
        )
        .await
        .unwrap();
    assert_eq!(
        outputs.intent.unwrap().conversation_id.as_deref(),
        Some("existing")
    );
    let intent_start = log
        .events()
        .into_iter()
        .find(|event| event.event_type() == E::IntentStart)
        .unwrap();
    match intent_start.data {
        PipelineEventData::IntentStart { conversation_id, .. } => {
            assert_eq!(conversation_id.as_deref(), Some("existing"));
        },
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_debug_recording_written() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::default().with_debug_recording_dir(dir.path());
    let deployment = Deployment::new(config);
    let log = EventLog::new();

    deployment
        .pipeline
        .run(audio_request(&log, PipelineStage::Stt, PipelineStage::Stt))
        .await
        .unwrap();

    let files: Vec<_> = std::fs::read_dir(dir.path().join("kitchen"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].extension().unwrap(), "wav");

    let reader = hound::WavReader::open(&files[0]).unwrap();
    assert_eq!(reader.spec().sample_rate, 16_000);
    assert_eq!(reader.spec().channels, 1);
    assert!(reader.duration() > 0);
}

#[tokio::test]
async fn test_event_stream_serializes_trace() {
    use futures::StreamExt;

    let deployment = Deployment::new(PipelineConfig::default());
    let (callback, events) = assist_pipeline::event_stream();

    deployment
        .pipeline
        .run(
            PipelineRequest::new(callback)
                .with_stages(PipelineStage::Tts, PipelineStage::Tts)
                .with_tts_input(COMMAND),
        )
        .await
        .unwrap();

    // The run dropped its callback, so the stream is finished
    let lines: Vec<serde_json::Value> = events
        .map(|event| serde_json::to_value(&event).unwrap())
        .collect()
        .await;
    let types: Vec<&str> = lines.iter().map(|line| line["type"].as_str().unwrap()).collect();
    assert_eq!(types, vec!["run-start", "tts-start", "tts-end", "run-end"]);
    assert_eq!(lines[1]["data"]["tts_input"], COMMAND);
    assert_eq!(lines[2]["data"]["tts_output"]["url"], "/api/tts_proxy/tts-1.wav");
    assert!(lines[3]["data"]["outputs"].get("stt").is_none());
}
