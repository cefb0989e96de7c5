//! Server-rendered HTML pages.
//!
//! Every piece of user-controlled text goes through `html_escape` before it
//! is interpolated.

use std::fmt::Write;

use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::conversation::{Message, MessageKind};
use crate::study::{ErrorPage, StudyPage};

/// Generate the HTML shell for a page.
fn html_shell(title: &str, head_extra: &str, content: &str) -> String {
    let title = encode_text(title);
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta name="description" content="StudyBrain study assistant">
    <title>{title} - StudyBrain</title>{head_extra}
    <style>
        body {{ font-family: system-ui, sans-serif; max-width: 48rem; margin: 0 auto; padding: 1rem; }}
        .message-user {{ text-align: right; }}
        .message-assistant {{ color: #1d4ed8; }}
    </style>
</head>
<body>
    <header class="site-header">
        <a href="/" class="brand">StudyBrain</a>
    </header>
    <main id="app">
{content}
    </main>
</body>
</html>"#
    )
}

/// URL path for a subject's study page.
#[must_use]
pub fn study_path(subject: &str) -> String {
    format!("/study/{}", urlencoding::encode(subject))
}

/// Dashboard listing every subject.
#[must_use]
pub fn dashboard(subjects: &[String]) -> String {
    let mut items = String::new();
    for subject in subjects {
        let _ = writeln!(
            items,
            r#"            <li><a class="subject-link" href="{href}">{name}</a></li>"#,
            href = encode_double_quoted_attribute(&study_path(subject)),
            name = encode_text(subject),
        );
    }

    let content = format!(
        r#"        <section class="dashboard">
            <h1>Choose a subject</h1>
            <ul class="subject-list">
{items}            </ul>
        </section>"#
    );
    html_shell("Dashboard", "", &content)
}

fn message_html(message: &Message) -> String {
    let label = match message.kind {
        MessageKind::User => "You",
        MessageKind::Assistant => "StudyBrain",
    };
    format!(
        r#"            <li class="message message-{kind}"><span class="author">{label}</span><p>{text}</p></li>"#,
        kind = message.kind,
        text = encode_text(&message.text),
    )
}

/// Study session page with the conversation and the question form.
#[must_use]
pub fn study_session(page: &StudyPage) -> String {
    let subject = page.subject.as_str();

    let conversation = if page.conversation.is_empty() {
        r#"            <li class="message message-empty">No questions yet. Ask away!</li>"#.to_string()
    } else {
        page.conversation
            .iter()
            .map(message_html)
            .collect::<Vec<_>>()
            .join("\n")
    };

    let content = format!(
        r#"        <section class="study-session">
            <h1>{title}</h1>
            <ol class="conversation">
{conversation}
            </ol>
            <form method="post" action="{action}" class="question-form">
                <textarea name="question" placeholder="Ask a question about {title}..." rows="3" required></textarea>
                <button type="submit">Ask</button>
            </form>
        </section>"#,
        title = encode_text(subject),
        action = encode_double_quoted_attribute(&study_path(subject)),
    );
    html_shell(subject, "", &content)
}

/// Error page that sends the browser back after a delay.
#[must_use]
pub fn error(page: &ErrorPage) -> String {
    let target = encode_double_quoted_attribute(&page.redirect_target);
    let refresh = format!(
        r#"
    <meta http-equiv="refresh" content="{delay};url={target}">"#,
        delay = page.redirect_delay_seconds,
    );

    let content = format!(
        r#"        <section class="error">
            <h1>{title}</h1>
            <p>{message}</p>
            <p class="redirect-note">Redirecting in {delay} seconds. <a href="{target}">Go now</a></p>
        </section>"#,
        title = encode_text(&page.error_title),
        message = encode_text(&page.error_message),
        delay = page.redirect_delay_seconds,
    );
    html_shell(&page.error_title, &refresh, &content)
}
