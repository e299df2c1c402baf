//! HTTP transcription of captured answers.
//!
//! Clips are resampled to the 16kHz mono the endpoint expects, WAV-encoded
//! in memory, and uploaded as multipart form data.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::info;

use rehearse_core::error::VoiceError;
use rehearse_core::voice::{AudioClip, Transcriber};
use rehearse_native_utils::audio;

use crate::config::{Config, TRANSCRIPTION_SAMPLE_RATE};

/// Clips quieter than this RMS energy are rejected without an upload; there
/// is nothing in them for the endpoint to hear.
const SILENCE_RMS_THRESHOLD: f32 = 0.01;

pub struct HttpTranscriber {
    client: Client,
    api_key: SecretString,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl HttpTranscriber {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            model: config.stt_model.clone(),
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, clip: AudioClip) -> Result<String, VoiceError> {
        let duration = clip.duration_secs();
        if audio::rms(&clip.samples) < SILENCE_RMS_THRESHOLD {
            return Err(VoiceError::TranscriptionFailed(
                "captured audio is silent".to_string(),
            ));
        }
        let samples = audio::resample(&clip.samples, clip.sample_rate, TRANSCRIPTION_SAMPLE_RATE)
            .map_err(|e| VoiceError::TranscriptionFailed(e.to_string()))?;
        let wav = audio::wav_bytes(&samples, TRANSCRIPTION_SAMPLE_RATE)
            .map_err(|e| VoiceError::TranscriptionFailed(e.to_string()))?;

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("answer.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::TranscriptionFailed(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part("file", part);

        let response = self
            .client
            .post(format!("{}/v1/audio/transcriptions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::TranscriptionFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(VoiceError::TranscriptionFailed(format!(
                "transcription endpoint returned {}",
                response.status()
            )));
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::TranscriptionFailed(e.to_string()))?;
        let text = parsed.text.trim().to_string();
        info!("Transcribed {duration:.1}s of audio ({} chars)", text.len());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> Config {
        Config {
            api_key: SecretString::from("test-key".to_string()),
            base_url,
            tts_model: "tts-1".to_string(),
            stt_model: "whisper-1".to_string(),
            language: "en-US".to_string(),
            questions_file: "data/questions.json".to_string(),
            log_level: tracing::Level::INFO,
        }
    }

    fn clip() -> AudioClip {
        AudioClip {
            samples: vec![0.1; 16_000],
            sample_rate: 16_000,
        }
    }

    #[tokio::test]
    async fn transcribe_returns_trimmed_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"text": "  hello world  "})),
            )
            .mount(&server)
            .await;

        let transcriber = HttpTranscriber::new(&test_config(server.uri()));
        let text = transcriber
            .transcribe(clip())
            .await
            .expect("transcription should succeed");
        assert_eq!(text, "hello world");
    }

    #[tokio::test]
    async fn silent_clip_is_rejected_without_an_upload() {
        // No mock server: a silent clip must never reach the network.
        let transcriber = HttpTranscriber::new(&test_config("http://localhost:1".to_string()));
        let silent = AudioClip {
            samples: vec![0.0; 16_000],
            sample_rate: 16_000,
        };
        let result = transcriber.transcribe(silent).await;
        assert!(matches!(result, Err(VoiceError::TranscriptionFailed(_))));
    }

    #[tokio::test]
    async fn endpoint_error_maps_to_transcription_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let transcriber = HttpTranscriber::new(&test_config(server.uri()));
        let result = transcriber.transcribe(clip()).await;
        assert!(matches!(result, Err(VoiceError::TranscriptionFailed(_))));
    }

    #[tokio::test]
    async fn malformed_response_maps_to_transcription_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let transcriber = HttpTranscriber::new(&test_config(server.uri()));
        let result = transcriber.transcribe(clip()).await;
        assert!(matches!(result, Err(VoiceError::TranscriptionFailed(_))));
    }
}
