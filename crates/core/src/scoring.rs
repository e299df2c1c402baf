use serde::Serialize;

use crate::question::Question;

/// Keywords that earn partial credit when they appear in an answer.
/// Matched case-insensitively as substrings, so "task" also covers "tasks".
pub const KEYWORDS: [&str; 6] = [
    "experience",
    "project",
    "team",
    "result",
    "task",
    "development",
];

/// Tips used when a question carries none of its own.
pub const DEFAULT_TIPS: [&str; 3] = [
    "Be more specific",
    "Give concrete examples",
    "Relate it to the role",
];

/// The outcome of scoring one answer. Computed fresh on every submission and
/// never cached; a resubmission for the same question replaces it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    /// Clamped to [1, 10].
    pub score: u8,
    pub feedback: String,
    pub tips: Vec<String>,
}

/// Score an answer against a question.
///
/// Pure heuristic: a base of 5, length bands (-2 below 30 chars, +1 above
/// 100, +1 more above 200), and +0.5 per distinct keyword found. The result
/// is rounded and clamped to [1, 10]. Same inputs always produce the same
/// output.
pub fn analyze(answer_text: &str, question: &Question) -> AnalysisResult {
    let length = answer_text.chars().count();
    let mut score = 5.0_f32;

    if length < 30 {
        score -= 2.0;
    }
    if length > 100 {
        score += 1.0;
    }
    if length > 200 {
        score += 1.0;
    }

    let lowered = answer_text.to_lowercase();
    for keyword in KEYWORDS {
        if lowered.contains(keyword) {
            score += 0.5;
        }
    }

    let score = (score.round() as i32).clamp(1, 10) as u8;

    let feedback = match score {
        9..=10 => "Excellent! The answer is structured and complete.",
        7..=8 => "Good, but you could add more detail.",
        5..=6 => "Not bad, but the answer is too general.",
        _ => "This answer needs more work.",
    }
    .to_string();

    let tips = if question.tips.is_empty() {
        DEFAULT_TIPS.iter().map(|tip| tip.to_string()).collect()
    } else {
        question.tips.clone()
    };

    AnalysisResult {
        score,
        feedback,
        tips,
    }
}
