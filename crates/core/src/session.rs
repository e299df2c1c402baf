use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::Command;
use crate::question::{Question, QuestionSource, fallback_question};
use crate::scoring::{AnalysisResult, analyze};

/// Delay between a transcript landing in the answer input and its automatic
/// submission. Editing the input or advancing cancels the pending submission.
pub const AUTO_SUBMIT_DELAY: Duration = Duration::from_secs(2);

const QUESTION_RATE: f32 = 1.0;
const TIPS_RATE: f32 = 0.9;
const HINT_RATE: f32 = 0.8;
const HINT_EXCERPT_CHARS: usize = 150;

const GREETING: &str = "Hi! I'm your interview coach. Answer the questions out loud \
                        and I'll help you prepare.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Presenting,
    AwaitingAnswer,
    Scoring,
    Feedback,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Presenting => write!(f, "PRESENTING"),
            Self::AwaitingAnswer => write!(f, "AWAITING_ANSWER"),
            Self::Scoring => write!(f, "SCORING"),
            Self::Feedback => write!(f, "FEEDBACK"),
        }
    }
}

/// User and device actions, fed to the session through a single dispatcher
/// instead of ad hoc per-widget event handlers.
#[derive(Debug, Clone)]
pub enum SessionAction {
    /// Submit answer text for scoring.
    Submit(String),
    /// Speak an excerpt of the model answer.
    Hint,
    /// Move to the next question, wrapping after the last one.
    Advance,
    /// The user changed the answer input; cancels a pending auto-submit.
    InputEdited,
    /// A transcription finished and produced this text.
    TranscriptReady(String),
    /// The auto-submit timer scheduled for this sequence number fired.
    AutoSubmitDue(u64),
    /// Speech-to-text failed; keep awaiting an answer and prompt a retry.
    TranscriptionFailed(String),
    /// Microphone capture failed; text input remains usable.
    CaptureFailed(String),
    /// Report the observable session status as a status line.
    QueryStatus,
}

/// Snapshot of the observable session surface.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub question_number: usize,
    pub total_questions: usize,
    pub state: SessionState,
    pub last_result: Option<AnalysisResult>,
}

/// A transcript waiting to be auto-submitted. The sequence number ties it to
/// the timer the runtime was asked to schedule; anything else that happens in
/// between (edit, manual submit, advance) drops it, so a stale timer firing
/// is a no-op.
struct PendingAutoSubmit {
    text: String,
    seq: u64,
}

/// Transient record of one submission on its way into scoring. Not retained
/// afterwards.
struct AnswerSubmission {
    text: String,
    question_index: usize,
    submitted_at: Instant,
}

/// The session state machine.
///
/// All side effects go through the command channel; the runtime executes
/// them. Every entry point leaves the session in a stable state; no failure
/// here ends the session.
pub struct Session {
    questions: Vec<Question>,
    current: usize,
    state: SessionState,
    last_result: Option<AnalysisResult>,
    pending_auto_submit: Option<PendingAutoSubmit>,
    auto_submit_seq: u64,
    presented_at: Instant,
    command_tx: mpsc::Sender<Command>,
}

impl Session {
    pub fn new(questions: Vec<Question>, command_tx: mpsc::Sender<Command>) -> Self {
        assert!(!questions.is_empty(), "a session needs at least one question");
        Self {
            questions,
            current: 0,
            state: SessionState::Idle,
            last_result: None,
            pending_auto_submit: None,
            auto_submit_seq: 0,
            presented_at: Instant::now(),
            command_tx,
        }
    }

    /// Load questions from the source. When the source is unavailable the
    /// session substitutes exactly one built-in question and proceeds.
    /// A failed load is never fatal.
    pub async fn from_source(
        source: &dyn QuestionSource,
        command_tx: mpsc::Sender<Command>,
    ) -> Self {
        let questions = match source.load().await {
            Ok(questions) => {
                info!("Loaded {} questions", questions.len());
                questions
            }
            Err(e) => {
                warn!("Question source failed ({e}); substituting the fallback question");
                vec![fallback_question()]
            }
        };
        Self::new(questions, command_tx)
    }

    /// Speak the greeting and present the first question.
    pub async fn start(&mut self) -> Result<()> {
        self.speak(GREETING, QUESTION_RATE).await?;
        self.present_current().await
    }

    pub async fn dispatch(&mut self, action: SessionAction) -> Result<()> {
        match action {
            SessionAction::Submit(text) => self.submit_answer(&text).await,
            SessionAction::Hint => self.request_hint().await,
            SessionAction::Advance => self.advance().await,
            SessionAction::InputEdited => {
                self.input_edited();
                Ok(())
            }
            SessionAction::TranscriptReady(text) => self.transcript_ready(text).await,
            SessionAction::AutoSubmitDue(seq) => self.auto_submit_due(seq).await,
            SessionAction::TranscriptionFailed(reason) => {
                warn!("Transcription failed: {reason}");
                self.notify("Speech recognition failed. Try again, or type your answer.")
                    .await
            }
            SessionAction::CaptureFailed(reason) => {
                warn!("Capture failed: {reason}");
                self.notify("Microphone unavailable. You can still type your answer.")
                    .await
            }
            SessionAction::QueryStatus => {
                let status = self.status();
                self.notify(format!(
                    "Question {}/{}, {}",
                    status.question_number, status.total_questions, status.state
                ))
                .await
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn current_question(&self) -> &Question {
        &self.questions[self.current]
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            question_number: self.current + 1,
            total_questions: self.questions.len(),
            state: self.state,
            last_result: self.last_result.clone(),
        }
    }

    async fn present_current(&mut self) -> Result<()> {
        self.state = SessionState::Presenting;
        self.pending_auto_submit = None;
        self.last_result = None;
        self.presented_at = Instant::now();

        let number = self.current + 1;
        let total = self.questions.len();
        let question = &self.questions[self.current];
        info!("Presenting question {number}/{total}: {}", question.text);

        self.send(Command::ResetPrompt).await?;
        self.send(Command::ShowQuestion {
            number,
            total,
            text: question.text.clone(),
        })
        .await?;
        self.notify("Ready to record. Press record and speak.").await?;

        let announcement = format!("Question {number}. {}", question.text);
        self.speak(announcement, QUESTION_RATE).await?;

        // Input is accepted as soon as the speak request is issued; we do
        // not wait for playback to finish.
        self.state = SessionState::AwaitingAnswer;
        Ok(())
    }

    async fn submit_answer(&mut self, text: &str) -> Result<()> {
        if !matches!(
            self.state,
            SessionState::AwaitingAnswer | SessionState::Feedback
        ) {
            debug!("Ignoring submission in state {}", self.state);
            return Ok(());
        }

        let answer = text.trim();
        if answer.is_empty() {
            self.speak("Please answer the question first.", QUESTION_RATE)
                .await?;
            return Ok(());
        }

        // A manual submission supersedes any transcript still waiting on its
        // auto-submit timer.
        self.pending_auto_submit = None;

        let submission = AnswerSubmission {
            text: answer.to_string(),
            question_index: self.current,
            submitted_at: Instant::now(),
        };

        self.state = SessionState::Scoring;
        let question = &self.questions[submission.question_index];
        let result = analyze(&submission.text, question);
        info!(
            "Scored answer for question {} after {:.0?}: {}/10",
            submission.question_index + 1,
            submission.submitted_at.duration_since(self.presented_at),
            result.score
        );

        self.state = SessionState::Feedback;
        self.last_result = Some(result.clone());
        self.send(Command::ShowFeedback(result.clone())).await?;

        let spoken = format!("Your score: {} out of 10. {}", result.score, result.feedback);
        self.speak(spoken, QUESTION_RATE).await?;

        // The tips follow once the score read-out has had time to finish.
        let delay = Duration::from_millis(result.feedback.len() as u64 * 50 + 1000);
        self.send(Command::SpeakLater {
            text: format!("Tips for improvement: {}", result.tips.join(". ")),
            rate: TIPS_RATE,
            delay,
        })
        .await
    }

    async fn request_hint(&mut self) -> Result<()> {
        if self.state == SessionState::Idle {
            return Ok(());
        }
        let excerpt: String = self
            .current_question()
            .model_answer
            .chars()
            .take(HINT_EXCERPT_CHARS)
            .collect();
        self.speak(format!("Example answer: {excerpt}..."), HINT_RATE)
            .await
    }

    async fn advance(&mut self) -> Result<()> {
        if self.state == SessionState::Idle {
            return Ok(());
        }
        // Any ungraded answer or displayed result is discarded.
        self.current = (self.current + 1) % self.questions.len();
        self.present_current().await
    }

    fn input_edited(&mut self) {
        if self.pending_auto_submit.take().is_some() {
            info!("Answer input edited; cancelling pending auto-submit");
        }
        if self.state == SessionState::Feedback {
            self.state = SessionState::AwaitingAnswer;
        }
    }

    async fn transcript_ready(&mut self, text: String) -> Result<()> {
        if !matches!(
            self.state,
            SessionState::AwaitingAnswer | SessionState::Feedback
        ) {
            debug!("Dropping transcript received in state {}", self.state);
            return Ok(());
        }

        self.send(Command::FillAnswerInput(text.clone())).await?;
        self.notify("Speech transcribed.").await?;

        self.auto_submit_seq += 1;
        let seq = self.auto_submit_seq;
        self.pending_auto_submit = Some(PendingAutoSubmit { text, seq });
        self.send(Command::ScheduleAutoSubmit {
            seq,
            delay: AUTO_SUBMIT_DELAY,
        })
        .await
    }

    async fn auto_submit_due(&mut self, seq: u64) -> Result<()> {
        match self.pending_auto_submit.take() {
            Some(pending) if pending.seq == seq => {
                info!("Auto-submitting transcribed answer");
                self.submit_answer(&pending.text).await
            }
            other => {
                // A stale timer: the transcript was edited, resubmitted, or
                // advanced past in the meantime.
                self.pending_auto_submit = other;
                debug!("Ignoring stale auto-submit timer {seq}");
                Ok(())
            }
        }
    }

    async fn speak(&self, text: impl Into<String>, rate: f32) -> Result<()> {
        self.send(Command::Speak {
            text: text.into(),
            rate,
        })
        .await
    }

    async fn notify(&self, message: impl Into<String>) -> Result<()> {
        self.send(Command::Status(message.into())).await
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .context("Failed to send command to the runtime")
    }
}
