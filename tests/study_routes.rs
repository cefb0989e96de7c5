use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use studybrain::AppState;
use studybrain::answer::{AnswerError, AnswerGenerator};
use studybrain::config::AppConfig;
use studybrain::server::build_router;
use studybrain::subjects::Subject;
use tower::ServiceExt;

const FORM: &str = "application/x-www-form-urlencoded";

struct Reply {
    status: StatusCode,
    cookie: Option<String>,
    body: String,
}

fn app() -> Router {
    let config = AppConfig::load_from_args(["studybrain"]).expect("default config");
    let state = AppState::from_config(Arc::new(config)).expect("app state");
    build_router(state)
}

/// Answers after a fixed delay, well inside the answer timeout.
#[derive(Debug)]
struct SlowAnswerer(Duration);

#[async_trait]
impl AnswerGenerator for SlowAnswerer {
    async fn answer(&self, _subject: &Subject, question: &str) -> Result<String, AnswerError> {
        tokio::time::sleep(self.0).await;
        Ok(format!("answer to {question}"))
    }
}

async fn send(app: &Router, request: Request<Body>) -> Reply {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::to_owned);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    Reply {
        status,
        cookie,
        body: String::from_utf8(bytes.to_vec()).unwrap(),
    }
}

fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

fn post_form(uri: &str, body: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::post(uri).header(header::CONTENT_TYPE, FORM);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_owned())).unwrap()
}

async fn conversation(app: &Router, cookie: &str) -> Value {
    let reply = send(app, get("/api/conversation", Some(cookie))).await;
    assert_eq!(reply.status, StatusCode::OK);
    serde_json::from_str(&reply.body).unwrap()
}

#[tokio::test]
async fn test_dashboard_lists_subjects_in_order() {
    let app = app();

    let reply = send(&app, get("/", None)).await;
    assert_eq!(reply.status, StatusCode::OK);

    let positions: Vec<usize> = [
        "Mathematics",
        "Physics",
        "Software Engineering",
        "Music",
        "English",
    ]
    .iter()
    .map(|name| reply.body.find(&format!(">{name}</a>")).unwrap())
    .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_invalid_subject_renders_error_page() {
    let app = app();

    let reply = send(&app, get("/study/maths", None)).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert!(reply.body.contains("Invalid Subject"));
    assert!(
        reply
            .body
            .contains("The subject 'maths' could not be found. Please enter a valid subject.")
    );
    assert!(reply.body.contains(r#"content="3;url=/""#));
}

#[tokio::test]
async fn test_valid_subject_is_normalized() {
    let app = app();

    let reply = send(&app, get("/study/mathematics", None)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body.contains("<h1>Mathematics</h1>"));
    assert!(reply.body.contains("No questions yet"));
    assert!(reply.cookie.is_some());

    let reply = send(&app, get("/study/software%20ENGINEERING", None)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body.contains("<h1>Software Engineering</h1>"));
}

#[tokio::test]
async fn test_exchange_persists_across_requests() {
    let app = app();

    let first = send(&app, get("/study/physics", None)).await;
    let cookie = first.cookie.expect("session cookie");

    let reply = send(
        &app,
        post_form("/study/physics", "question=What+is+momentum%3F", Some(&cookie)),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.cookie.is_none());
    assert!(reply.body.contains("What is momentum?"));

    assert_eq!(
        conversation(&app, &cookie).await,
        json!([
            {"kind": "user", "text": "What is momentum?"},
            {"kind": "assistant", "text": "That is a great question, here is the answer..."}
        ])
    );

    let reply = send(&app, get("/study/PHYSICS", Some(&cookie))).await;
    assert!(reply.body.contains("What is momentum?"));
    assert!(reply.body.contains("here is the answer..."));
}

#[tokio::test]
async fn test_sessions_do_not_share_conversations() {
    let app = app();

    let alice = send(&app, get("/study/music", None)).await.cookie.unwrap();
    let bob = send(&app, get("/study/music", None)).await.cookie.unwrap();
    assert_ne!(alice, bob);

    send(&app, post_form("/study/music", "question=scales", Some(&alice))).await;
    send(&app, post_form("/study/music", "question=chords", Some(&alice))).await;

    let alice_log = conversation(&app, &alice).await;
    assert_eq!(alice_log.as_array().unwrap().len(), 4);
    assert_eq!(alice_log[0]["text"], "scales");
    assert_eq!(alice_log[2]["text"], "chords");
    assert_eq!(conversation(&app, &bob).await, json!([]));
}

#[tokio::test]
async fn test_missing_question_is_recorded_as_empty() {
    let app = app();
    let cookie = send(&app, get("/study/english", None)).await.cookie.unwrap();

    let reply = send(&app, post_form("/study/english", "", Some(&cookie))).await;
    assert_eq!(reply.status, StatusCode::OK);

    let no_content_type = Request::post("/study/english")
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let reply = send(&app, no_content_type).await;
    assert_eq!(reply.status, StatusCode::OK);

    let log = conversation(&app, &cookie).await;
    assert_eq!(log.as_array().unwrap().len(), 4);
    assert_eq!(log[0], json!({"kind": "user", "text": ""}));
    assert_eq!(log[2], json!({"kind": "user", "text": ""}));
}

#[tokio::test]
async fn test_invalid_subject_post_records_nothing() {
    let app = app();
    let cookie = send(&app, get("/study/physics", None)).await.cookie.unwrap();

    let reply = send(
        &app,
        post_form("/study/Underwater%20Basket%20Weaving", "question=hi", Some(&cookie)),
    )
    .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(conversation(&app, &cookie).await, json!([]));
}

#[tokio::test]
async fn test_tampered_cookie_starts_new_session() {
    let app = app();

    let reply = send(
        &app,
        get("/study/physics", Some("studybrain_session=not-a-signed-value")),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.cookie.is_some());
}

#[tokio::test]
async fn test_user_text_is_escaped() {
    let app = app();
    let cookie = send(&app, get("/study/physics", None)).await.cookie.unwrap();

    let reply = send(
        &app,
        post_form(
            "/study/physics",
            "question=%3Cscript%3Ealert(1)%3C%2Fscript%3E",
            Some(&cookie),
        ),
    )
    .await;
    assert!(!reply.body.contains("<script>alert(1)</script>"));
    assert!(reply.body.contains("&lt;script&gt;"));
}

#[tokio::test]
async fn test_health() {
    let app = app();

    let reply = send(&app, get("/health", None)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, "ok");
}

#[tokio::test(start_paused = true)]
async fn test_queued_question_survives_request_timeout() {
    let mut config = AppConfig::load_from_args(["studybrain"]).expect("default config");
    config.study.answer_timeout_secs = 30;
    config.server.request_timeout_secs = 45;
    let answerer = Arc::new(SlowAnswerer(Duration::from_secs(25)));
    let state = AppState::new(Arc::new(config), answerer).expect("app state");
    let app = build_router(state);

    let cookie = send(&app, get("/study/music", None)).await.cookie.unwrap();

    // The second question waits 25s for the lock and then 25s for its
    // answer, so its request times out before the exchange is recorded.
    let (first, second) = tokio::join!(
        send(&app, post_form("/study/music", "question=first", Some(&cookie))),
        send(&app, post_form("/study/music", "question=second", Some(&cookie))),
    );
    let mut statuses = vec![first.status, second.status];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::REQUEST_TIMEOUT]);

    let log = conversation(&app, &cookie).await;
    let log = log.as_array().unwrap();
    assert_eq!(log.len(), 4);
    for pair in log.chunks(2) {
        assert_eq!(pair[0]["kind"], "user");
        assert_eq!(pair[1]["kind"], "assistant");
        assert_eq!(
            pair[1]["text"],
            format!("answer to {}", pair[0]["text"].as_str().unwrap())
        );
    }
    let mut questions: Vec<&str> = log
        .iter()
        .step_by(2)
        .map(|m| m["text"].as_str().unwrap())
        .collect();
    questions.sort_unstable();
    assert_eq!(questions, ["first", "second"]);
}
