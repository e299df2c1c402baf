//! Application Configuration Module
//!
//! Centralizes the configuration for the rehearse service. Settings are
//! loaded from environment variables (with `.env` support) into a single
//! struct passed throughout the application.

use std::env;

use secrecy::SecretString;
use tracing::Level;

// --- Application Constants ---

/// The size of each audio chunk read from the microphone input stream.
pub const INPUT_CHUNK_SIZE: usize = 1024;
/// The size of each audio chunk for the playback output stream.
pub const OUTPUT_CHUNK_SIZE: usize = 1024;
/// The latency of the playback ring buffer in milliseconds.
pub const OUTPUT_LATENCY_MS: usize = 1000;
/// Sample rate the transcription endpoint expects.
pub const TRANSCRIPTION_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of the PCM audio the speech endpoint returns.
pub const SPEECH_PCM_SAMPLE_RATE: u32 = 24_000;

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: SecretString,
    pub base_url: String,
    pub tts_model: String,
    pub stt_model: String,
    pub language: String,
    pub questions_file: String,
    pub log_level: Level,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `SPEECH_API_KEY`: Bearer token for the speech endpoints. Required.
    // *   `SPEECH_BASE_URL`: (Optional) Endpoint base. Defaults to "https://api.openai.com".
    // *   `TTS_MODEL`: (Optional) Speech-synthesis model. Defaults to "tts-1".
    // *   `STT_MODEL`: (Optional) Transcription model. Defaults to "whisper-1".
    // *   `SESSION_LANGUAGE`: (Optional) BCP-47 tag used for voice selection. Defaults to "en-US".
    // *   `QUESTIONS_FILE`: (Optional) Path to the question bank. Defaults to "data/questions.json".
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. Useful for local development; ignored if absent.
        dotenvy::dotenv().ok();

        let api_key = env::var("SPEECH_API_KEY")
            .map(SecretString::from)
            .map_err(|_| ConfigError::MissingVar("SPEECH_API_KEY".to_string()))?;

        let base_url =
            env::var("SPEECH_BASE_URL").unwrap_or_else(|_| "https://api.openai.com".to_string());
        let tts_model = env::var("TTS_MODEL").unwrap_or_else(|_| "tts-1".to_string());
        let stt_model = env::var("STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        let language = env::var("SESSION_LANGUAGE").unwrap_or_else(|_| "en-US".to_string());
        let questions_file =
            env::var("QUESTIONS_FILE").unwrap_or_else(|_| "data/questions.json".to_string());

        let log_level_str = env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            api_key,
            base_url,
            tts_model,
            stt_model,
            language,
            questions_file,
            log_level,
        })
    }
}
