use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::VoiceError;

/// A bounded run of captured microphone audio (f32 mono).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One unit of synthesized speech, cancelable as a whole.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakRequest {
    pub text: String,
    pub rate: f32,
    /// Voice matched to the session language, or `None` for the backend
    /// default. The absence of a match is never an error.
    pub voice: Option<String>,
}

// The backend traits below are the seams between the coordinator and the
// actual devices/transports. As with the session's question source, the
// mockall mocks let the coordination rules be tested without audio hardware.

#[async_trait]
#[cfg_attr(test, automock)]
pub trait SpeechSynthesizer: Send + Sync {
    /// Best-match voice for a BCP-47 language tag, if the backend has one.
    fn voice_for(&self, language: &str) -> Option<String>;
    /// Synthesize and play; resolves on playback completion or error.
    async fn speak(&self, request: SpeakRequest) -> Result<(), VoiceError>;
    /// Stop any in-flight playback immediately.
    fn cancel(&self);
}

#[async_trait]
#[cfg_attr(test, automock)]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, clip: AudioClip) -> Result<String, VoiceError>;
}

#[async_trait]
#[cfg_attr(test, automock)]
pub trait CaptureSource: Send + Sync {
    /// Acquire the microphone and begin capturing.
    async fn start(&self) -> Result<(), VoiceError>;
    /// Stop capturing, release the device tracks, and return the clip.
    async fn stop(&self) -> Result<AudioClip, VoiceError>;
    /// Hold the microphone open without buffering (the mic-only toggle).
    async fn open_monitor(&self) -> Result<(), VoiceError>;
    async fn close_monitor(&self);
}

#[async_trait]
#[cfg_attr(test, automock)]
pub trait CameraPort: Send + Sync {
    async fn open(&self) -> Result<(), VoiceError>;
    async fn close(&self);
}

/// Events the coordinator reports back to the runtime.
#[derive(Debug, Clone)]
pub enum VoiceEvent {
    SpeakingStarted,
    SpeakingFinished,
    CaptureStarted,
    CaptureStopped,
    /// A transcription completed with this text.
    Transcript(String),
    CaptureFailed(VoiceError),
    TranscriptionFailed(VoiceError),
    CameraOn,
    CameraOff,
    CameraFailed(VoiceError),
    MonitorOn,
    MonitorOff,
}

/// Owns the audio channel: speaking and listening are serialized so that at
/// most one utterance and at most one capture are active at any time.
/// Capture and speech output are logically independent, so capturing while
/// the coach is speaking is permitted.
pub struct VoiceCoordinator {
    synth: Arc<dyn SpeechSynthesizer>,
    transcriber: Arc<dyn Transcriber>,
    capture: Arc<dyn CaptureSource>,
    camera: Arc<dyn CameraPort>,
    language: String,
    event_tx: mpsc::Sender<VoiceEvent>,
    speaking: Arc<AtomicBool>,
    utterance_seq: Arc<AtomicU64>,
    active_utterance: Option<JoinHandle<()>>,
    recording: bool,
    camera_on: bool,
    monitor_on: bool,
}

impl VoiceCoordinator {
    pub fn new(
        synth: Arc<dyn SpeechSynthesizer>,
        transcriber: Arc<dyn Transcriber>,
        capture: Arc<dyn CaptureSource>,
        camera: Arc<dyn CameraPort>,
        language: impl Into<String>,
        event_tx: mpsc::Sender<VoiceEvent>,
    ) -> Self {
        Self {
            synth,
            transcriber,
            capture,
            camera,
            language: language.into(),
            event_tx,
            speaking: Arc::new(AtomicBool::new(false)),
            utterance_seq: Arc::new(AtomicU64::new(0)),
            active_utterance: None,
            recording: false,
            camera_on: false,
            monitor_on: false,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Relaxed)
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn camera_on(&self) -> bool {
        self.camera_on
    }

    pub fn monitor_on(&self) -> bool {
        self.monitor_on
    }

    /// Speak `text`, cancelling any in-progress utterance first so that
    /// exactly one utterance is ever active.
    pub fn speak(&mut self, text: impl Into<String>, rate: f32) {
        let text = text.into();
        debug!("Speaking: \"{}\"", preview(&text));

        self.synth.cancel();
        if let Some(handle) = self.active_utterance.take() {
            handle.abort();
        }

        let seq = self.utterance_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let request = SpeakRequest {
            text,
            rate,
            voice: self.synth.voice_for(&self.language),
        };

        self.speaking.store(true, Ordering::SeqCst);
        self.emit(VoiceEvent::SpeakingStarted);

        let synth = Arc::clone(&self.synth);
        let speaking = Arc::clone(&self.speaking);
        let utterance_seq = Arc::clone(&self.utterance_seq);
        let event_tx = self.event_tx.clone();
        self.active_utterance = Some(tokio::spawn(async move {
            if let Err(e) = synth.speak(request).await {
                match e {
                    VoiceError::PlaybackUnsupported(_) => {
                        warn!("Speech output unavailable, continuing silently: {e}");
                    }
                    other => warn!("Utterance failed: {other}"),
                }
            }
            // Only the most recent utterance may clear the speaking signal;
            // a superseded one must not stomp on its replacement.
            if utterance_seq.load(Ordering::SeqCst) == seq {
                speaking.store(false, Ordering::SeqCst);
                if event_tx.try_send(VoiceEvent::SpeakingFinished).is_err() {
                    warn!("Failed to send speaking-finished event");
                }
            }
        }));
    }

    pub async fn toggle_capture(&mut self) {
        if self.recording {
            self.stop_capture().await;
        } else {
            self.start_capture().await;
        }
    }

    pub async fn start_capture(&mut self) {
        if self.recording {
            debug!("Capture already in progress; ignoring start");
            return;
        }
        match self.capture.start().await {
            Ok(()) => {
                self.recording = true;
                info!("Capture started");
                self.emit(VoiceEvent::CaptureStarted);
            }
            Err(e) => {
                warn!("Could not start capture: {e}");
                self.emit(VoiceEvent::CaptureFailed(e));
            }
        }
    }

    pub async fn stop_capture(&mut self) {
        if !self.recording {
            debug!("No capture in progress; ignoring stop");
            return;
        }
        self.recording = false;

        let clip = match self.capture.stop().await {
            Ok(clip) => clip,
            Err(e) => {
                warn!("Capture stop failed: {e}");
                self.emit(VoiceEvent::CaptureFailed(e));
                return;
            }
        };
        self.emit(VoiceEvent::CaptureStopped);

        if clip.is_empty() {
            debug!("No audio captured; skipping transcription");
            return;
        }
        info!("Captured {:.1}s of audio, transcribing", clip.duration_secs());

        let transcriber = Arc::clone(&self.transcriber);
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            match transcriber.transcribe(clip).await {
                Ok(text) => {
                    info!("Transcribed: \"{}\"", preview(&text));
                    if event_tx.send(VoiceEvent::Transcript(text)).await.is_err() {
                        warn!("Failed to deliver transcript");
                    }
                }
                Err(e) => {
                    warn!("Transcription failed: {e}");
                    let _ = event_tx.send(VoiceEvent::TranscriptionFailed(e)).await;
                }
            }
        });
    }

    pub async fn toggle_camera_preview(&mut self) {
        if self.camera_on {
            self.camera.close().await;
            self.camera_on = false;
            info!("Camera preview off");
            self.emit(VoiceEvent::CameraOff);
            return;
        }
        match self.camera.open().await {
            Ok(()) => {
                self.camera_on = true;
                info!("Camera preview on");
                self.emit(VoiceEvent::CameraOn);
            }
            Err(e) => {
                warn!("Camera unavailable: {e}");
                self.emit(VoiceEvent::CameraFailed(e));
            }
        }
    }

    pub async fn toggle_microphone_monitor(&mut self) {
        if self.monitor_on {
            self.capture.close_monitor().await;
            self.monitor_on = false;
            info!("Microphone monitor off");
            self.emit(VoiceEvent::MonitorOff);
            return;
        }
        match self.capture.open_monitor().await {
            Ok(()) => {
                self.monitor_on = true;
                info!("Microphone monitor on");
                self.emit(VoiceEvent::MonitorOn);
            }
            Err(e) => {
                warn!("Microphone monitor unavailable: {e}");
                self.emit(VoiceEvent::CaptureFailed(e));
            }
        }
    }

    /// Release every held device. Called on shutdown; each exit path must
    /// leave the device indicators dark.
    pub async fn release_all(&mut self) {
        if self.recording {
            self.recording = false;
            if let Err(e) = self.capture.stop().await {
                warn!("Releasing capture failed: {e}");
            }
        }
        if self.monitor_on {
            self.capture.close_monitor().await;
            self.monitor_on = false;
        }
        if self.camera_on {
            self.camera.close().await;
            self.camera_on = false;
        }
        self.synth.cancel();
        if let Some(handle) = self.active_utterance.take() {
            handle.abort();
        }
    }

    fn emit(&self, event: VoiceEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send voice event: {e}");
        }
    }
}

fn preview(text: &str) -> String {
    const MAX: usize = 50;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let cut: String = text.chars().take(MAX).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Harness {
        synth: MockSpeechSynthesizer,
        transcriber: MockTranscriber,
        capture: MockCaptureSource,
        camera: MockCameraPort,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                synth: MockSpeechSynthesizer::new(),
                transcriber: MockTranscriber::new(),
                capture: MockCaptureSource::new(),
                camera: MockCameraPort::new(),
            }
        }

        fn build(self) -> (VoiceCoordinator, mpsc::Receiver<VoiceEvent>) {
            let (event_tx, event_rx) = mpsc::channel(64);
            let coordinator = VoiceCoordinator::new(
                Arc::new(self.synth),
                Arc::new(self.transcriber),
                Arc::new(self.capture),
                Arc::new(self.camera),
                "en-US",
                event_tx,
            );
            (coordinator, event_rx)
        }
    }

    async fn recv(rx: &mut mpsc::Receiver<VoiceEvent>) -> VoiceEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event should arrive")
            .expect("channel should stay open")
    }

    fn clip(samples: usize) -> AudioClip {
        AudioClip {
            samples: vec![0.1; samples],
            sample_rate: 16_000,
        }
    }

    #[tokio::test]
    async fn second_speak_cancels_the_first_utterance() {
        let mut harness = Harness::new();
        harness.synth.expect_voice_for().returning(|_| None);
        harness.synth.expect_cancel().times(2).return_const(());
        harness
            .synth
            .expect_speak()
            .withf(|request| request.text == "first")
            .returning(|_| {
                Box::pin(async {
                    // Never finishes on its own; only cancellation ends it.
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                })
            });
        harness
            .synth
            .expect_speak()
            .withf(|request| request.text == "second")
            .returning(|_| Box::pin(async { Ok(()) }));

        let (mut coordinator, mut events) = harness.build();
        coordinator.speak("first", 1.0);
        assert!(coordinator.is_speaking());
        coordinator.speak("second", 1.0);

        assert!(matches!(recv(&mut events).await, VoiceEvent::SpeakingStarted));
        assert!(matches!(recv(&mut events).await, VoiceEvent::SpeakingStarted));
        // Exactly one utterance runs to completion: the first was aborted,
        // so the only finish event comes from the second.
        assert!(matches!(
            recv(&mut events).await,
            VoiceEvent::SpeakingFinished
        ));
        assert!(events.try_recv().is_err());
        assert!(!coordinator.is_speaking());
    }

    #[tokio::test]
    async fn voice_selection_falls_back_to_default() {
        let mut harness = Harness::new();
        harness.synth.expect_cancel().return_const(());
        harness
            .synth
            .expect_voice_for()
            .withf(|language| language == "en-US")
            .returning(|_| None);
        harness
            .synth
            .expect_speak()
            .withf(|request| request.voice.is_none())
            .returning(|_| Box::pin(async { Ok(()) }))
            .once();

        let (mut coordinator, _events) = harness.build();
        coordinator.speak("hello", 1.0);
        // Give the utterance task a chance to run against the expectation.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn playback_failure_clears_the_speaking_signal() {
        let mut harness = Harness::new();
        harness.synth.expect_cancel().return_const(());
        harness.synth.expect_voice_for().returning(|_| None);
        harness.synth.expect_speak().returning(|_| {
            Box::pin(async { Err(VoiceError::PlaybackUnsupported("no backend".to_string())) })
        });

        let (mut coordinator, mut events) = harness.build();
        coordinator.speak("hello", 1.0);

        assert!(matches!(recv(&mut events).await, VoiceEvent::SpeakingStarted));
        assert!(matches!(
            recv(&mut events).await,
            VoiceEvent::SpeakingFinished
        ));
        assert!(!coordinator.is_speaking());
    }

    #[tokio::test]
    async fn double_start_acquires_the_device_once() {
        let mut harness = Harness::new();
        harness
            .capture
            .expect_start()
            .returning(|| Box::pin(async { Ok(()) }))
            .once();

        let (mut coordinator, mut events) = harness.build();
        coordinator.start_capture().await;
        coordinator.start_capture().await;

        assert!(coordinator.is_recording());
        assert!(matches!(recv(&mut events).await, VoiceEvent::CaptureStarted));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn stop_without_capture_is_a_no_op() {
        let harness = Harness::new();
        // No expectations: stop must not touch the backend.
        let (mut coordinator, mut events) = harness.build();
        coordinator.stop_capture().await;

        assert!(!coordinator.is_recording());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn capture_unavailable_is_surfaced_not_fatal() {
        let mut harness = Harness::new();
        harness.capture.expect_start().returning(|| {
            Box::pin(async {
                Err(VoiceError::CaptureUnavailable(
                    "permission denied".to_string(),
                ))
            })
        });

        let (mut coordinator, mut events) = harness.build();
        coordinator.start_capture().await;

        assert!(!coordinator.is_recording());
        assert!(matches!(
            recv(&mut events).await,
            VoiceEvent::CaptureFailed(VoiceError::CaptureUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn stop_releases_device_and_delivers_transcript() {
        let mut harness = Harness::new();
        harness
            .capture
            .expect_start()
            .returning(|| Box::pin(async { Ok(()) }))
            .once();
        harness
            .capture
            .expect_stop()
            .returning(|| Box::pin(async { Ok(clip(16_000)) }))
            .once();
        harness
            .transcriber
            .expect_transcribe()
            .returning(|_| Box::pin(async { Ok("hello world".to_string()) }))
            .once();

        let (mut coordinator, mut events) = harness.build();
        coordinator.start_capture().await;
        coordinator.stop_capture().await;
        assert!(!coordinator.is_recording());

        assert!(matches!(recv(&mut events).await, VoiceEvent::CaptureStarted));
        assert!(matches!(recv(&mut events).await, VoiceEvent::CaptureStopped));
        match recv(&mut events).await {
            VoiceEvent::Transcript(text) => assert_eq!(text, "hello world"),
            other => panic!("expected a transcript, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transcription_failure_prompts_a_retry() {
        let mut harness = Harness::new();
        harness
            .capture
            .expect_start()
            .returning(|| Box::pin(async { Ok(()) }));
        harness
            .capture
            .expect_stop()
            .returning(|| Box::pin(async { Ok(clip(16_000)) }));
        harness.transcriber.expect_transcribe().returning(|_| {
            Box::pin(async { Err(VoiceError::TranscriptionFailed("timeout".to_string())) })
        });

        let (mut coordinator, mut events) = harness.build();
        coordinator.start_capture().await;
        coordinator.stop_capture().await;

        assert!(matches!(recv(&mut events).await, VoiceEvent::CaptureStarted));
        assert!(matches!(recv(&mut events).await, VoiceEvent::CaptureStopped));
        assert!(matches!(
            recv(&mut events).await,
            VoiceEvent::TranscriptionFailed(_)
        ));
    }

    #[tokio::test]
    async fn empty_clip_skips_transcription() {
        let mut harness = Harness::new();
        harness
            .capture
            .expect_start()
            .returning(|| Box::pin(async { Ok(()) }));
        harness
            .capture
            .expect_stop()
            .returning(|| Box::pin(async { Ok(clip(0)) }));
        // No transcriber expectation: it must not be called.

        let (mut coordinator, mut events) = harness.build();
        coordinator.start_capture().await;
        coordinator.stop_capture().await;

        assert!(matches!(recv(&mut events).await, VoiceEvent::CaptureStarted));
        assert!(matches!(recv(&mut events).await, VoiceEvent::CaptureStopped));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn capture_is_permitted_while_speaking() {
        let mut harness = Harness::new();
        harness.synth.expect_cancel().return_const(());
        harness.synth.expect_voice_for().returning(|_| None);
        harness.synth.expect_speak().returning(|_| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
        });
        harness
            .capture
            .expect_start()
            .returning(|| Box::pin(async { Ok(()) }))
            .once();
        harness
            .capture
            .expect_stop()
            .returning(|| Box::pin(async { Ok(clip(0)) }));

        let (mut coordinator, _events) = harness.build();
        coordinator.speak("a long question", 1.0);
        coordinator.start_capture().await;

        assert!(coordinator.is_speaking());
        assert!(coordinator.is_recording());
        coordinator.release_all().await;
    }

    #[tokio::test]
    async fn camera_failure_degrades_to_a_status() {
        let mut harness = Harness::new();
        harness.camera.expect_open().returning(|| {
            Box::pin(async { Err(VoiceError::CaptureUnavailable("no camera".to_string())) })
        });

        let (mut coordinator, mut events) = harness.build();
        coordinator.toggle_camera_preview().await;

        assert!(!coordinator.camera_on());
        assert!(matches!(
            recv(&mut events).await,
            VoiceEvent::CameraFailed(_)
        ));
    }

    #[tokio::test]
    async fn release_all_closes_every_held_device() {
        let mut harness = Harness::new();
        harness
            .capture
            .expect_start()
            .returning(|| Box::pin(async { Ok(()) }));
        harness
            .capture
            .expect_stop()
            .returning(|| Box::pin(async { Ok(clip(0)) }))
            .once();
        harness
            .capture
            .expect_open_monitor()
            .returning(|| Box::pin(async { Ok(()) }));
        harness
            .capture
            .expect_close_monitor()
            .returning(|| Box::pin(async {}))
            .once();
        harness
            .camera
            .expect_open()
            .returning(|| Box::pin(async { Ok(()) }));
        harness
            .camera
            .expect_close()
            .returning(|| Box::pin(async {}))
            .once();
        harness.synth.expect_cancel().return_const(());

        let (mut coordinator, _events) = harness.build();
        coordinator.start_capture().await;
        coordinator.toggle_microphone_monitor().await;
        coordinator.toggle_camera_preview().await;

        coordinator.release_all().await;
        assert!(!coordinator.is_recording());
        assert!(!coordinator.monitor_on());
        assert!(!coordinator.camera_on());
    }

    #[tokio::test]
    async fn release_all_discards_the_unfinished_clip() {
        let mut harness = Harness::new();
        harness
            .capture
            .expect_start()
            .returning(|| Box::pin(async { Ok(()) }));
        harness
            .capture
            .expect_stop()
            .returning(|| Box::pin(async { Ok(clip(16_000)) }))
            .once();
        harness.synth.expect_cancel().return_const(());
        // No transcriber expectation: release must not transcribe.

        let (mut coordinator, _events) = harness.build();
        coordinator.start_capture().await;
        coordinator.release_all().await;
        assert!(!coordinator.is_recording());
    }
}
