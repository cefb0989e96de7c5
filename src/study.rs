//! Subject-scoped study interactions.
//!
//! [`StudyService`] is what the HTTP layer calls. It validates the subject,
//! serializes work per session, drives the answer generator and records the
//! exchange, and hands back plain data for the views to render.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::answer::{AnswerError, AnswerGenerator, DEFAULT_FALLBACK_ANSWER};
use crate::config::StudyConfig;
use crate::conversation::{ConversationError, ConversationStore, Message};
use crate::session::SessionLocks;
use crate::subjects::{Subject, SubjectCatalog};

/// Data for the study session page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudyPage {
    pub subject: Subject,
    pub conversation: Vec<Message>,
}

/// Data for the error page, which redirects after a delay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPage {
    pub error_title: String,
    pub error_message: String,
    pub redirect_target: String,
    pub redirect_delay_seconds: u64,
}

/// Errors surfaced by [`StudyService`].
#[derive(Debug, Error)]
pub enum StudyError {
    /// The requested subject is not in the catalog.
    #[error("{}", .0.error_message)]
    InvalidSubject(ErrorPage),

    #[error(transparent)]
    Conversation(#[from] ConversationError),

    /// The task running the interaction panicked or was aborted.
    #[error("study task did not complete: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Tunables for [`StudyService`].
#[derive(Debug, Clone)]
pub struct StudySettings {
    pub answer_timeout: Duration,
    pub fallback_answer: String,
    pub redirect_target: String,
    pub redirect_delay_seconds: u64,
}

impl Default for StudySettings {
    fn default() -> Self {
        Self {
            answer_timeout: Duration::from_secs(30),
            fallback_answer: DEFAULT_FALLBACK_ANSWER.to_string(),
            redirect_target: "/".to_string(),
            redirect_delay_seconds: 3,
        }
    }
}

impl From<&StudyConfig> for StudySettings {
    fn from(config: &StudyConfig) -> Self {
        Self {
            answer_timeout: config.answer_timeout(),
            fallback_answer: config.fallback_answer.clone(),
            redirect_target: config.redirect_target.clone(),
            redirect_delay_seconds: config.redirect_delay_seconds,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StudyService {
    catalog: Arc<SubjectCatalog>,
    conversations: ConversationStore,
    answerer: Arc<dyn AnswerGenerator>,
    locks: SessionLocks,
    settings: StudySettings,
}

impl StudyService {
    pub fn new(
        catalog: SubjectCatalog,
        conversations: ConversationStore,
        answerer: Arc<dyn AnswerGenerator>,
        settings: StudySettings,
    ) -> Self {
        Self {
            catalog: Arc::new(catalog),
            conversations,
            answerer,
            locks: SessionLocks::new(),
            settings,
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &SubjectCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn locks(&self) -> &SessionLocks {
        &self.locks
    }

    /// Error page shown when an interaction fails for reasons other than the
    /// subject.
    #[must_use]
    pub fn failure_page(&self) -> ErrorPage {
        ErrorPage {
            error_title: "Something went wrong".to_string(),
            error_message: "Your conversation could not be loaded. Please try again.".to_string(),
            redirect_target: self.settings.redirect_target.clone(),
            redirect_delay_seconds: self.settings.redirect_delay_seconds,
        }
    }

    /// Subjects for the dashboard, in presentation order.
    #[must_use]
    pub fn dashboard(&self) -> Vec<String> {
        self.catalog.list().to_vec()
    }

    /// Open a subject page, creating the session's conversation if needed.
    pub async fn view_subject(
        &self,
        subject_param: &str,
        session_id: &str,
    ) -> Result<StudyPage, StudyError> {
        let subject = self.validate(subject_param)?;

        let _guard = self.locks.acquire(session_id).await;
        let result = self.conversations.ensure(session_id);
        self.conversations.release(session_id);

        Ok(StudyPage {
            subject,
            conversation: result?.into_messages(),
        })
    }

    /// Record a question and its answer, then return the updated page.
    ///
    /// A missing question is recorded as an empty one.
    pub async fn submit_question(
        &self,
        subject_param: &str,
        question: Option<String>,
        session_id: &str,
    ) -> Result<StudyPage, StudyError> {
        let subject = self.validate(subject_param)?;
        let question = question.unwrap_or_default();

        let _guard = self.locks.acquire(session_id).await;
        let answer = self.generate_answer(&subject, &question, session_id).await;
        let result = self
            .conversations
            .record_exchange(session_id, question, answer)
            .and_then(|()| self.conversations.view(session_id));
        self.conversations.release(session_id);

        Ok(StudyPage {
            subject,
            conversation: result?,
        })
    }

    /// Messages recorded for the session so far.
    pub async fn messages(&self, session_id: &str) -> Result<Vec<Message>, StudyError> {
        let _guard = self.locks.acquire(session_id).await;
        Ok(self.conversations.view(session_id)?)
    }

    fn validate(&self, subject_param: &str) -> Result<Subject, StudyError> {
        self.catalog.resolve(subject_param).ok_or_else(|| {
            warn!(
                name: "study.invalid_subject",
                subject = %subject_param,
                "Rejected unknown subject"
            );
            StudyError::InvalidSubject(ErrorPage {
                error_title: "Invalid Subject".to_string(),
                error_message: format!(
                    "The subject '{subject_param}' could not be found. Please enter a valid subject."
                ),
                redirect_target: self.settings.redirect_target.clone(),
                redirect_delay_seconds: self.settings.redirect_delay_seconds,
            })
        })
    }

    async fn generate_answer(&self, subject: &Subject, question: &str, session_id: &str) -> String {
        let timeout = self.settings.answer_timeout;
        let outcome = match tokio::time::timeout(timeout, self.answerer.answer(subject, question))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(AnswerError::TimedOut(timeout)),
        };

        match outcome {
            Ok(answer) => {
                info!(
                    name: "study.answered",
                    session_id = %session_id,
                    subject = %subject,
                    question_length = question.len(),
                    answer_length = answer.len(),
                    "Generated answer"
                );
                answer
            }
            Err(e) => {
                warn!(
                    name: "study.answer_failed",
                    session_id = %session_id,
                    subject = %subject,
                    error = %e,
                    "Answer generation failed, recording fallback"
                );
                self.settings.fallback_answer.clone()
            }
        }
    }
}
