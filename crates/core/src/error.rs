use thiserror::Error;

/// The question data could not be loaded. The session recovers by
/// substituting the built-in fallback question.
#[derive(Debug, Error)]
#[error("question source unavailable: {0}")]
pub struct SourceUnavailable(pub String);

/// Failures of the audio channel. None of these are fatal to the session;
/// each one degrades to a reduced-functionality continuation.
#[derive(Debug, Clone, Error)]
pub enum VoiceError {
    /// No microphone (or camera), or permission was denied. Surfaced as a
    /// user-visible status message; text input remains usable.
    #[error("capture unavailable: {0}")]
    CaptureUnavailable(String),
    /// Speech-to-text failed. Surfaced as a retry prompt; the session keeps
    /// awaiting an answer.
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),
    /// Speech output is absent or failed. Degrades silently; the text
    /// surface still updates.
    #[error("speech output unsupported: {0}")]
    PlaybackUnsupported(String),
}
