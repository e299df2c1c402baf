//! Camera preview port for hosts without a video backend.

use async_trait::async_trait;

use rehearse_core::error::VoiceError;
use rehearse_core::voice::CameraPort;

/// Headless stand-in. Opening reports the camera as unavailable, which the
/// coordinator surfaces as a status line; the session continues with audio
/// and text. UI hosts supply a real `CameraPort`.
pub struct NoCamera;

#[async_trait]
impl CameraPort for NoCamera {
    async fn open(&self) -> Result<(), VoiceError> {
        Err(VoiceError::CaptureUnavailable(
            "no camera backend on this host".to_string(),
        ))
    }

    async fn close(&self) {}
}
