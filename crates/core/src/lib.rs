pub mod error;
pub mod question;
pub mod scoring;
pub mod session;
pub mod voice;

use std::time::Duration;

use crate::scoring::AnalysisResult;

/// Represents commands that the core logic (`Session`) issues to the runtime.
///
/// This enum is the primary API for decoupling the session's decision-making
/// from the runtime's execution of side effects (speaking text, rendering,
/// scheduling deferred work).
#[derive(Debug, Clone)]
pub enum Command {
    /// Command the runtime to speak the given text, cancelling any utterance
    /// already in progress.
    Speak { text: String, rate: f32 },
    /// Speak after a pause. Used for the tips read-out that follows the
    /// spoken score.
    SpeakLater {
        text: String,
        rate: f32,
        delay: Duration,
    },
    /// Present a question on whatever surface the runtime renders to.
    ShowQuestion {
        number: usize,
        total: usize,
        text: String,
    },
    /// Render a freshly computed analysis result, replacing any prior one.
    ShowFeedback(AnalysisResult),
    /// Put transcribed text into the answer input.
    FillAnswerInput(String),
    /// Clear the answer input and hide any displayed feedback.
    ResetPrompt,
    /// Fire `SessionAction::AutoSubmitDue(seq)` back into the session after
    /// the delay. Stale sequence numbers are ignored by the session.
    ScheduleAutoSubmit { seq: u64, delay: Duration },
    /// A user-visible status line (capture problems, retry prompts, ...).
    Status(String),
}
