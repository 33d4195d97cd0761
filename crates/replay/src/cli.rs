//! Command-line interface for assist-replay

use clap::Parser;
use std::path::PathBuf;

use assist_core::PipelineStage;

pub const DEFAULT_TRANSCRIPT: &str = "turn on the lights";

/// Replay a WAV file through an assist pipeline and print the event trace
#[derive(Parser, Debug)]
#[command(name = "assist-replay", version, about)]
pub struct Cli {
    /// 16-bit PCM WAV file to stream
    #[arg(value_name = "WAV")]
    pub path: PathBuf,

    /// First stage to run (wake_word, stt, intent, tts)
    #[arg(long, value_name = "STAGE", default_value = "stt", value_parser = parse_stage)]
    pub start: PipelineStage,

    /// Last stage to run (wake_word, stt, intent, tts)
    #[arg(long, value_name = "STAGE", default_value = "tts", value_parser = parse_stage)]
    pub end: PipelineStage,

    /// Transcript the scripted speech-to-text engine returns
    #[arg(long, value_name = "TEXT", default_value = DEFAULT_TRANSCRIPT)]
    pub transcript: String,

    /// Language of the audio and the pipeline
    #[arg(long, value_name = "LANG", default_value = "en")]
    pub language: String,
}

/// Parse a stage by its wire name
fn parse_stage(s: &str) -> Result<PipelineStage, String> {
    serde_json::from_value(serde_json::Value::String(s.trim().to_string()))
        .map_err(|_| format!("unknown stage '{}' (wake_word, stt, intent, tts)", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["assist-replay", "command.wav"]).unwrap();
        assert_eq!(cli.path, PathBuf::from("command.wav"));
        assert_eq!(cli.start, PipelineStage::Stt);
        assert_eq!(cli.end, PipelineStage::Tts);
        assert_eq!(cli.transcript, DEFAULT_TRANSCRIPT);
        assert_eq!(cli.language, "en");
    }

    #[test]
    fn test_stage_window_and_transcript() {
        let cli = Cli::try_parse_from([
            "assist-replay",
            "command.wav",
            "--start",
            "wake_word",
            "--end",
            "intent",
            "--transcript",
            "what time is it",
        ])
        .unwrap();
        assert_eq!(cli.start, PipelineStage::WakeWord);
        assert_eq!(cli.end, PipelineStage::Intent);
        assert_eq!(cli.transcript, "what time is it");
    }

    #[test]
    fn test_unknown_stage_rejected() {
        assert!(Cli::try_parse_from(["assist-replay", "a.wav", "--start", "speech"]).is_err());
        assert!(Cli::try_parse_from(["assist-replay"]).is_err());
    }
}
