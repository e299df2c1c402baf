//! Microphone capture on a dedicated control thread.
//!
//! cpal streams are not `Send`, so a plain thread owns them and the async
//! side talks to it over a channel. The capture stream exists only between
//! start and stop; dropping it stops the device, so every exit path releases
//! the microphone.

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, StreamTrait};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use rehearse_core::error::VoiceError;
use rehearse_core::voice::{AudioClip, CaptureSource};
use rehearse_native_utils::{audio, device};

use crate::config::INPUT_CHUNK_SIZE;

enum CaptureRequest {
    Start(oneshot::Sender<Result<(), VoiceError>>),
    Stop(oneshot::Sender<Result<AudioClip, VoiceError>>),
    OpenMonitor(oneshot::Sender<Result<(), VoiceError>>),
    CloseMonitor(oneshot::Sender<()>),
    Shutdown,
}

/// Handle to the capture control thread.
pub struct CpalCapture {
    requests: std_mpsc::Sender<CaptureRequest>,
}

impl CpalCapture {
    /// Spawns the control thread. A `device_name` of `None` selects the
    /// default input device.
    pub fn spawn(device_name: Option<String>) -> Self {
        let (requests, request_rx) = std_mpsc::channel();
        std::thread::spawn(move || control_loop(device_name, request_rx));
        Self { requests }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> CaptureRequest,
    ) -> Option<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.requests.send(make(reply_tx)).is_err() {
            return None;
        }
        reply_rx.await.ok()
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        let _ = self.requests.send(CaptureRequest::Shutdown);
    }
}

#[async_trait]
impl CaptureSource for CpalCapture {
    async fn start(&self) -> Result<(), VoiceError> {
        self.request(CaptureRequest::Start).await.unwrap_or_else(|| {
            Err(VoiceError::CaptureUnavailable(
                "capture thread is gone".to_string(),
            ))
        })
    }

    async fn stop(&self) -> Result<AudioClip, VoiceError> {
        self.request(CaptureRequest::Stop).await.unwrap_or_else(|| {
            Err(VoiceError::CaptureUnavailable(
                "capture thread is gone".to_string(),
            ))
        })
    }

    async fn open_monitor(&self) -> Result<(), VoiceError> {
        self.request(CaptureRequest::OpenMonitor)
            .await
            .unwrap_or_else(|| {
                Err(VoiceError::CaptureUnavailable(
                    "capture thread is gone".to_string(),
                ))
            })
    }

    async fn close_monitor(&self) {
        let _ = self.request(CaptureRequest::CloseMonitor).await;
    }
}

struct ActiveCapture {
    stream: cpal::Stream,
    buffer: Arc<Mutex<Vec<f32>>>,
    sample_rate: u32,
}

fn control_loop(device_name: Option<String>, requests: std_mpsc::Receiver<CaptureRequest>) {
    let mut active: Option<ActiveCapture> = None;
    let mut monitor: Option<cpal::Stream> = None;

    while let Ok(request) = requests.recv() {
        match request {
            CaptureRequest::Start(reply) => {
                let result = if active.is_some() {
                    // Guarded upstream by the coordinator; treat as a no-op.
                    Ok(())
                } else {
                    match open_capture(device_name.as_deref()) {
                        Ok(capture) => {
                            active = Some(capture);
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                };
                let _ = reply.send(result);
            }
            CaptureRequest::Stop(reply) => {
                let result = match active.take() {
                    Some(ActiveCapture {
                        stream,
                        buffer,
                        sample_rate,
                    }) => {
                        // Dropping the stream stops it and releases the device.
                        drop(stream);
                        let samples = std::mem::take(&mut *buffer.lock().unwrap());
                        info!(
                            "Microphone released ({:.1}s captured)",
                            samples.len() as f64 / sample_rate as f64
                        );
                        Ok(AudioClip {
                            samples,
                            sample_rate,
                        })
                    }
                    None => Err(VoiceError::CaptureUnavailable(
                        "no capture in progress".to_string(),
                    )),
                };
                let _ = reply.send(result);
            }
            CaptureRequest::OpenMonitor(reply) => {
                let result = if monitor.is_some() {
                    Ok(())
                } else {
                    match open_monitor(device_name.as_deref()) {
                        Ok(stream) => {
                            monitor = Some(stream);
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                };
                let _ = reply.send(result);
            }
            CaptureRequest::CloseMonitor(reply) => {
                monitor = None;
                let _ = reply.send(());
            }
            CaptureRequest::Shutdown => break,
        }
    }
    // Streams held here are dropped with the thread, darkening the device
    // indicator even if the shutdown message never arrived.
}

fn open_capture(device_name: Option<&str>) -> Result<ActiveCapture, VoiceError> {
    let device = device::input_device(device_name)
        .map_err(|e| VoiceError::CaptureUnavailable(e.to_string()))?;
    let default_config = device
        .default_input_config()
        .map_err(|e| VoiceError::CaptureUnavailable(e.to_string()))?;
    let channels = default_config.channels();
    let sample_rate = default_config.sample_rate().0;
    let config = StreamConfig {
        channels,
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(INPUT_CHUNK_SIZE as cpal::FrameCount),
    };

    let buffer = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buffer);
    let channel_count = channels as usize;
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono = audio::mixdown(data, channel_count);
                sink.lock().unwrap().extend_from_slice(&mono);
            },
            move |err| error!("An error occurred on input stream: {err}"),
            None,
        )
        .map_err(|e| VoiceError::CaptureUnavailable(e.to_string()))?;
    stream
        .play()
        .map_err(|e| VoiceError::CaptureUnavailable(e.to_string()))?;
    info!("Microphone acquired ({channel_count}ch, {sample_rate}hz)");

    Ok(ActiveCapture {
        stream,
        buffer,
        sample_rate,
    })
}

/// The mic-only toggle holds the device open without keeping any audio.
fn open_monitor(device_name: Option<&str>) -> Result<cpal::Stream, VoiceError> {
    let device = device::input_device(device_name)
        .map_err(|e| VoiceError::CaptureUnavailable(e.to_string()))?;
    let config = device
        .default_input_config()
        .map_err(|e| VoiceError::CaptureUnavailable(e.to_string()))?;
    let stream = device
        .build_input_stream(
            &config.into(),
            |_data: &[f32], _: &cpal::InputCallbackInfo| {},
            move |err| warn!("An error occurred on monitor stream: {err}"),
            None,
        )
        .map_err(|e| VoiceError::CaptureUnavailable(e.to_string()))?;
    stream
        .play()
        .map_err(|e| VoiceError::CaptureUnavailable(e.to_string()))?;
    Ok(stream)
}
