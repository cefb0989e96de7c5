//! Answer generation for submitted questions.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::subjects::Subject;

/// Reply used until real inference is wired in.
pub const DEFAULT_PLACEHOLDER_ANSWER: &str = "That is a great question, here is the answer...";

/// Reply recorded when generation fails or times out.
pub const DEFAULT_FALLBACK_ANSWER: &str =
    "Sorry, I couldn't come up with an answer right now. Please try asking again.";

/// Errors that can occur while generating an answer.
#[derive(Debug, Error)]
pub enum AnswerError {
    /// Generation did not finish in time.
    #[error("answer generation timed out after {0:?}")]
    TimedOut(Duration),

    /// The generator failed.
    #[error("answer generation failed: {0}")]
    Failed(String),
}

/// Produces the assistant reply for a question about a subject.
#[async_trait]
pub trait AnswerGenerator: Send + Sync + std::fmt::Debug {
    async fn answer(&self, subject: &Subject, question: &str) -> Result<String, AnswerError>;
}

/// Answers every question with the same fixed text.
#[derive(Debug, Clone)]
pub struct PlaceholderAnswerer {
    text: String,
}

impl PlaceholderAnswerer {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Default for PlaceholderAnswerer {
    fn default() -> Self {
        Self::new(DEFAULT_PLACEHOLDER_ANSWER)
    }
}

#[async_trait]
impl AnswerGenerator for PlaceholderAnswerer {
    async fn answer(&self, subject: &Subject, question: &str) -> Result<String, AnswerError> {
        tracing::trace!(
            subject = %subject,
            question_length = question.len(),
            "Answering with placeholder"
        );
        Ok(self.text.clone())
    }
}
