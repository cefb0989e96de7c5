use axum::{
    Form, Json, Router,
    extract::{Path, Request, State, rejection::FormRejection},
    http::StatusCode,
    middleware::Next,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::AppState;
use crate::config::AppConfig;
use crate::session::{MemorySessionStore, SessionLocks};
use crate::study::{StudyError, StudyService};
use crate::views;

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let state = AppState::from_config(Arc::clone(&config))?;

    info!(
        name: "study.catalog.loaded",
        subjects = ?state.study.catalog().list(),
        "Subject catalog loaded"
    );

    spawn_session_sweeper(
        state.sessions.clone(),
        state.study.locks().clone(),
        config.session.cleanup_interval(),
    );

    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(name: "server.stopped", "Server stopped");
    Ok(())
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let timeout_duration = state.config.server.request_timeout();

    Router::new()
        .route("/", get(dashboard_handler))
        .route("/study/{subject}", get(study_view).post(study_submit))
        .route("/api/conversation", get(api_conversation))
        .route("/health", get(health_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(
                    move |req: Request, next: Next| async move {
                        match tokio::time::timeout(timeout_duration, next.run(req)).await {
                            Ok(res) => res,
                            Err(_) => {
                                (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response()
                            }
                        }
                    },
                )),
        )
        .with_state(state)
}

/// Periodically drop idle sessions and the locks nobody holds.
fn spawn_session_sweeper(
    sessions: MemorySessionStore,
    locks: SessionLocks,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = sessions.cleanup_expired();
            let pruned_locks = locks.prune();
            if removed > 0 {
                info!(
                    name: "session.swept",
                    removed = removed,
                    pruned_locks = pruned_locks,
                    remaining = sessions.len(),
                    "Expired sessions removed"
                );
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(name: "server.shutdown", "Shutdown signal received");
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

/// Read the session id from the signed cookie, starting a new session when it
/// is missing or was tampered with.
fn resolve_session(jar: SignedCookieJar, cookie_name: &str) -> (SignedCookieJar, String) {
    if let Some(cookie) = jar.get(cookie_name)
        && Uuid::parse_str(cookie.value()).is_ok()
    {
        let id = cookie.value().to_owned();
        return (jar, id);
    }

    let id = Uuid::new_v4().to_string();
    tracing::debug!(name: "session.started", session_id = %id, "Started new session");

    let cookie = Cookie::build((cookie_name.to_owned(), id.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax);
    (jar.add(cookie), id)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Form posted from the study page.
#[derive(Debug, Deserialize)]
struct QuestionForm {
    /// Question text; absent is the same as empty.
    #[serde(default)]
    question: Option<String>,
}

/// GET / - Subject dashboard.
async fn dashboard_handler(State(state): State<AppState>) -> Html<String> {
    Html(views::dashboard(&state.study.dashboard()))
}

/// GET /study/{subject} - Study page for a subject.
async fn study_view(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Path(subject): Path<String>,
) -> impl IntoResponse {
    let (jar, session_id) = resolve_session(jar, &state.config.session.cookie_name);

    let result = state
        .study
        .view_subject(&subject, &session_id)
        .await
        .map(|page| Html(views::study_session(&page)))
        .map_err(|e| error_response(&state.study, e));

    (jar, result)
}

/// POST /study/{subject} - Ask a question.
async fn study_submit(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Path(subject): Path<String>,
    form: Result<Form<QuestionForm>, FormRejection>,
) -> impl IntoResponse {
    let (jar, session_id) = resolve_session(jar, &state.config.session.cookie_name);

    let question = match form {
        Ok(Form(form)) => form.question,
        Err(rejection) => {
            tracing::debug!(
                session_id = %session_id,
                error = %rejection,
                "Unreadable question form, treating as empty"
            );
            None
        }
    };

    // The exchange runs on its own task so the request timeout cannot cancel
    // it while it waits for the session lock or before it is recorded.
    let study = state.study.clone();
    let handle = tokio::spawn(async move {
        study
            .submit_question(&subject, question, &session_id)
            .await
    });

    let result = handle
        .await
        .map_err(StudyError::from)
        .and_then(|outcome| outcome)
        .map(|page| Html(views::study_session(&page)))
        .map_err(|e| error_response(&state.study, e));

    (jar, result)
}

/// GET /api/conversation - Messages recorded in the caller's session.
async fn api_conversation(State(state): State<AppState>, jar: SignedCookieJar) -> impl IntoResponse {
    let (jar, session_id) = resolve_session(jar, &state.config.session.cookie_name);
    let result = state
        .study
        .messages(&session_id)
        .await
        .map(Json)
        .map_err(|e| error_response(&state.study, e));
    (jar, result)
}

/// GET /health - Liveness probe.
async fn health_handler() -> &'static str {
    "ok"
}

/// Render a failed interaction as an error page.
fn error_response(study: &StudyService, err: StudyError) -> Response {
    match err {
        StudyError::InvalidSubject(page) => {
            (StatusCode::NOT_FOUND, Html(views::error(&page))).into_response()
        }
        StudyError::Conversation(_) | StudyError::Task(_) => {
            tracing::error!(
                name: "study.interaction_failed",
                error = %err,
                "Study interaction failed"
            );
            let page = study.failure_page();
            (StatusCode::INTERNAL_SERVER_ERROR, Html(views::error(&page))).into_response()
        }
    }
}
