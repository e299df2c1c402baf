//! HTTP speech synthesis played through the local output stream.
//!
//! The endpoint returns raw PCM16 at 24kHz; samples are resampled to the
//! output device rate and pushed into the ring buffer the output callback
//! drains. Cancellation raises a flush flag the callback honors, so a new
//! utterance starts from a clean buffer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use ringbuf::HeapProd;
use ringbuf::traits::Producer;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use rehearse_core::error::VoiceError;
use rehearse_core::voice::{SpeakRequest, SpeechSynthesizer};
use rehearse_native_utils::audio;

use crate::config::{Config, OUTPUT_CHUNK_SIZE, SPEECH_PCM_SAMPLE_RATE};

const DEFAULT_VOICE: &str = "alloy";
const PLAYBACK_POLL: Duration = Duration::from_millis(10);

/// Voices by language prefix. Only an attempt; an unmatched language falls
/// back to the endpoint default.
const VOICE_TABLE: &[(&str, &str)] = &[
    ("en", "alloy"),
    ("de", "onyx"),
    ("es", "nova"),
    ("fr", "shimmer"),
    ("ru", "echo"),
];

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'a str,
}

pub struct HttpSpeechSynthesizer {
    client: Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    producer: Mutex<HeapProd<f32>>,
    output_sample_rate: u32,
    cancel_flag: AtomicBool,
    flush_flag: Arc<AtomicBool>,
}

impl HttpSpeechSynthesizer {
    pub fn new(
        config: &Config,
        producer: HeapProd<f32>,
        output_sample_rate: u32,
        flush_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            model: config.tts_model.clone(),
            producer: Mutex::new(producer),
            output_sample_rate,
            cancel_flag: AtomicBool::new(false),
            flush_flag,
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    fn voice_for(&self, language: &str) -> Option<String> {
        let prefix = language.split(['-', '_']).next().unwrap_or(language);
        VOICE_TABLE
            .iter()
            .find(|(lang, _)| prefix.eq_ignore_ascii_case(lang))
            .map(|(_, voice)| voice.to_string())
    }

    async fn speak(&self, request: SpeakRequest) -> Result<(), VoiceError> {
        self.cancel_flag.store(false, Ordering::Relaxed);

        // Give the output callback a moment to drain a cancelled utterance
        // before the new one starts filling the buffer.
        for _ in 0..20 {
            if !self.flush_flag.load(Ordering::Relaxed) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let body = SpeechRequest {
            model: &self.model,
            input: &request.text,
            voice: request.voice.as_deref().unwrap_or(DEFAULT_VOICE),
            speed: request.rate,
            response_format: "pcm",
        };

        let response = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::PlaybackUnsupported(e.to_string()))?;
        if !response.status().is_success() {
            return Err(VoiceError::PlaybackUnsupported(format!(
                "speech endpoint returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| VoiceError::PlaybackUnsupported(e.to_string()))?;

        let pcm = audio::pcm16_to_f32(&bytes);
        let samples = audio::resample(&pcm, SPEECH_PCM_SAMPLE_RATE, self.output_sample_rate)
            .map_err(|e| VoiceError::PlaybackUnsupported(e.to_string()))?;
        let duration = Duration::from_secs_f64(samples.len() as f64 / self.output_sample_rate as f64);
        debug!(
            "Playing {} samples ({:.1}s) at {}hz",
            samples.len(),
            duration.as_secs_f64(),
            self.output_sample_rate
        );
        let started = Instant::now();

        {
            let mut producer = self.producer.lock().await;
            for chunk in samples.chunks(OUTPUT_CHUNK_SIZE) {
                for &sample in chunk {
                    while producer.try_push(sample).is_err() {
                        if self.cancelled() {
                            return Ok(());
                        }
                        tokio::time::sleep(PLAYBACK_POLL).await;
                    }
                }
                if self.cancelled() {
                    return Ok(());
                }
            }
        }

        // The buffer has everything; playback finishes when the callback
        // drains it.
        while started.elapsed() < duration {
            if self.cancelled() {
                return Ok(());
            }
            tokio::time::sleep(PLAYBACK_POLL).await;
        }
        Ok(())
    }

    fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
        self.flush_flag.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::traits::{Consumer, Split};
    use secrecy::SecretString;
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

    #[tokio::test]
    async fn speak_pushes_decoded_samples_into_the_buffer() {
        let server = MockServer::start().await;
        // 480 samples of PCM16 at the endpoint rate: 20ms of audio.
        let pcm = audio::f32_to_pcm16(&vec![0.25; 480]);
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(pcm))
            .mount(&server)
            .await;

        let buffer = audio::playback_buffer(48_000);
        let (producer, mut consumer) = buffer.split();
        let flush = Arc::new(AtomicBool::new(false));
        let synth = HttpSpeechSynthesizer::new(
            &test_config(server.uri()),
            producer,
            SPEECH_PCM_SAMPLE_RATE,
            flush,
        );

        synth
            .speak(SpeakRequest {
                text: "hello".to_string(),
                rate: 1.0,
                voice: None,
            })
            .await
            .expect("speak should succeed");

        let mut received = 0;
        while consumer.try_pop().is_some() {
            received += 1;
        }
        assert_eq!(received, 480);
    }

    #[tokio::test]
    async fn endpoint_failure_degrades_to_playback_unsupported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let buffer = audio::playback_buffer(1024);
        let (producer, _consumer) = buffer.split();
        let synth = HttpSpeechSynthesizer::new(
            &test_config(server.uri()),
            producer,
            SPEECH_PCM_SAMPLE_RATE,
            Arc::new(AtomicBool::new(false)),
        );

        let result = synth
            .speak(SpeakRequest {
                text: "hello".to_string(),
                rate: 1.0,
                voice: None,
            })
            .await;
        assert!(matches!(result, Err(VoiceError::PlaybackUnsupported(_))));
    }

    #[test]
    fn voice_table_matches_language_prefix() {
        let buffer = audio::playback_buffer(16);
        let (producer, _consumer) = buffer.split();
        let synth = HttpSpeechSynthesizer::new(
            &test_config("http://localhost".to_string()),
            producer,
            SPEECH_PCM_SAMPLE_RATE,
            Arc::new(AtomicBool::new(false)),
        );

        assert_eq!(synth.voice_for("en-US"), Some("alloy".to_string()));
        assert_eq!(synth.voice_for("ru"), Some("echo".to_string()));
        assert_eq!(synth.voice_for("zh-CN"), None);
    }
}
