use std::path::PathBuf;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;

use crate::error::SourceUnavailable;

/// One interview question record, as loaded from the question resource.
///
/// Immutable once loaded; the session references questions by index and
/// never mutates them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Question {
    #[serde(rename = "question")]
    pub text: String,
    #[serde(default)]
    pub category: String,
    /// A model answer; hints speak a truncated excerpt of it.
    #[serde(rename = "good_answer", default)]
    pub model_answer: String,
    /// Improvement tips read out with the feedback. May be empty, in which
    /// case scoring substitutes a generic default.
    #[serde(default)]
    pub tips: Vec<String>,
}

// The `QuestionSource` trait is the seam between the session and wherever
// question data actually lives. In unit tests `mockall`'s generated
// `MockQuestionSource` stands in for it, so the fallback path can be
// exercised without touching the filesystem.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait QuestionSource: Send + Sync {
    async fn load(&self) -> Result<Vec<Question>, SourceUnavailable>;
}

/// Loads a JSON array of question records from a file.
pub struct FileQuestionSource {
    path: PathBuf,
}

impl FileQuestionSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl QuestionSource for FileQuestionSource {
    async fn load(&self) -> Result<Vec<Question>, SourceUnavailable> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SourceUnavailable(format!("{}: {e}", self.path.display())))?;
        let questions: Vec<Question> = serde_json::from_str(&raw)
            .map_err(|e| SourceUnavailable(format!("malformed question data: {e}")))?;
        if questions.is_empty() {
            return Err(SourceUnavailable("question file is empty".to_string()));
        }
        Ok(questions)
    }
}

/// The single built-in question substituted when the source is unavailable.
/// The substitution itself is the session's contract, not the source's.
pub fn fallback_question() -> Question {
    Question {
        text: "Tell me about yourself".to_string(),
        category: "soft skills".to_string(),
        model_answer: "I am a developer with three years of experience building and shipping \
                       production systems as part of a small team..."
            .to_string(),
        tips: vec![
            "Be specific".to_string(),
            "Relate your story to the role".to_string(),
            "Mention concrete achievements".to_string(),
        ],
    }
}
