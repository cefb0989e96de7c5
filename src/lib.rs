//! StudyBrain
//!
//! A study assistant: pick a subject, ask questions, and keep the exchange
//! for the lifetime of the browser session.
//!
//! # Architecture
//!
//! - **Server**: Axum HTTP server rendering HTML pages, session id in a signed cookie
//! - **Study**: subject validation, per-session serialization and answer generation
//! - **Conversation**: the per-session ordered message log
//!
//! # Modules
//!
//! - [`subjects`]: Subject catalog and title-case normalization
//! - [`conversation`]: Conversation log over a [`session::SessionStore`]
//! - [`session`]: Session storage and per-session locks
//! - [`answer`]: Pluggable answer generation
//! - [`study`]: The request-facing study service
//! - [`views`]: HTML rendering
//! - [`server`]: Router and handlers
//! - [`config`]: Layered configuration

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]

pub mod answer;
pub mod config;
pub mod conversation;
pub mod server;
pub mod session;
pub mod study;
pub mod subjects;
pub mod views;

use crate::answer::{AnswerGenerator, PlaceholderAnswerer};
use crate::config::AppConfig;
use crate::conversation::ConversationStore;
use crate::session::MemorySessionStore;
use crate::study::{StudyService, StudySettings};
use crate::subjects::SubjectCatalog;

use anyhow::anyhow;
use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use std::sync::Arc;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Study service behind every page.
    pub study: StudyService,
    /// Session storage, shared with the study service.
    pub sessions: MemorySessionStore,
    /// Key signing the session cookie.
    pub cookie_key: Key,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Build state with the placeholder answer generator.
    pub fn from_config(config: Arc<AppConfig>) -> anyhow::Result<Self> {
        let answerer = Arc::new(PlaceholderAnswerer::new(
            config.study.placeholder_answer.clone(),
        ));
        Self::new(config, answerer)
    }

    /// Build state around a specific answer generator.
    pub fn new(config: Arc<AppConfig>, answerer: Arc<dyn AnswerGenerator>) -> anyhow::Result<Self> {
        config.validate()?;

        let catalog = SubjectCatalog::new(&config.study.subjects);
        if catalog.list().is_empty() {
            return Err(anyhow!("study.subjects must name at least one subject"));
        }

        let sessions = MemorySessionStore::with_idle_timeout(config.session.idle_timeout());
        let conversations = ConversationStore::new(Arc::new(sessions.clone()));
        let study = StudyService::new(
            catalog,
            conversations,
            answerer,
            StudySettings::from(&config.study),
        );

        Ok(Self {
            study,
            sessions,
            cookie_key: cookie_key(config.session.secret_key.as_deref())?,
            config,
        })
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

fn cookie_key(secret: Option<&str>) -> anyhow::Result<Key> {
    match secret {
        Some(secret) => Key::try_from(secret.as_bytes())
            .map_err(|e| anyhow!("session.secret_key must be at least 64 bytes: {e}")),
        None => {
            tracing::warn!(
                name: "session.key.generated",
                "No session secret configured, sessions will not survive a restart"
            );
            Ok(Key::generate())
        }
    }
}
