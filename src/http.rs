//! HTTP server exposing messages, knowledge, saved replies and drafting.

use crate::drafting::ReplyDrafter;
use crate::email::{KnowledgeEntry, MailMessage, ReplyRecord};
use crate::error::Error;
use crate::store::Storage;
use crate::sync::MailboxSync;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::error;

/// How many stored messages `GET /emails` returns.
pub const EMAIL_LIST_LIMIT: usize = 50;

/// Bodies longer than this many characters are cut for display.
pub const DISPLAY_BODY_LIMIT: usize = 5000;

const TRUNCATION_NOTICE: &str = "\n\n--- Email truncated for display ---";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Storage>,
    pub drafter: Arc<ReplyDrafter>,
    pub sync: Option<Arc<MailboxSync>>,
}

/// A stored message shaped for the inbox view.
#[derive(Debug, Serialize)]
struct EmailView {
    id: String,
    from: String,
    subject: String,
    body: String,
    date: DateTime<Utc>,
}

impl From<MailMessage> for EmailView {
    fn from(m: MailMessage) -> Self {
        Self {
            body: clean_body(&m.body),
            id: m.id,
            from: m.from,
            subject: m.subject,
            date: m.date,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateReplyRequest {
    #[serde(default)]
    email_text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewKnowledge {
    title: Option<String>,
    content: Option<String>,
    file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewReply {
    from: Option<String>,
    subject: Option<String>,
    email_body: Option<String>,
    ai_reply: Option<String>,
}

impl NewKnowledge {
    fn validate(self) -> Result<KnowledgeEntry, Error> {
        let title = self.title.filter(|t| !t.trim().is_empty());
        let (Some(title), Some(content)) = (title, self.content) else {
            return Err(Error::Validation("Title and content are required".into()));
        };
        if content.trim().is_empty() {
            return Err(Error::Validation("Knowledge content is empty".into()));
        }
        Ok(KnowledgeEntry::new(title, content, self.file_path))
    }
}

impl NewReply {
    fn validate(self) -> Result<ReplyRecord, Error> {
        let Some(ai_reply) = self.ai_reply.filter(|r| !r.trim().is_empty()) else {
            return Err(Error::Validation("AI reply is required".into()));
        };
        Ok(ReplyRecord::new(self.from, self.subject, self.email_body, ai_reply))
    }
}

/// Normalise line endings, collapse runs of blank lines, trim, and cut
/// overly long bodies.
#[must_use]
pub fn clean_body(body: &str) -> String {
    let unix = body.replace("\r\n", "\n");

    let mut collapsed = String::with_capacity(unix.len());
    let mut newlines = 0;
    for c in unix.chars() {
        if c == '\n' {
            newlines += 1;
            if newlines <= 2 {
                collapsed.push(c);
            }
        } else {
            newlines = 0;
            collapsed.push(c);
        }
    }

    let trimmed = collapsed.trim();
    if trimmed.chars().count() > DISPLAY_BODY_LIMIT {
        let mut cut: String = trimmed.chars().take(DISPLAY_BODY_LIMIT).collect();
        cut.push_str(TRUNCATION_NOTICE);
        cut
    } else {
        trimmed.to_string()
    }
}

fn fail(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "success": false, "message": message.into() })),
    )
        .into_response()
}

fn storage_failure(context: &'static str, e: &Error) -> Response {
    error!("{context}: {e}");
    fail(StatusCode::INTERNAL_SERVER_ERROR, context)
}

fn deleted(result: Result<bool, Error>, what: &'static str, context: &'static str) -> Response {
    match result {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => fail(StatusCode::NOT_FOUND, format!("{what} not found")),
        Err(e) => storage_failure(context, &e),
    }
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/emails", get(get_emails))
        .route("/emails/sync", post(sync_now))
        .route("/emails/{id}", delete(delete_email))
        .route("/ai/generate-reply", post(generate_reply))
        .route("/knowledge", get(get_knowledge).post(create_knowledge))
        .route("/knowledge/{id}", delete(delete_knowledge))
        .route("/replies", get(get_replies).post(create_reply))
        .route("/replies/{id}", delete(delete_reply))
        .fallback(not_found)
        .with_state(state)
}

/// Run the HTTP server.
pub async fn run_http_server(
    listener: TcpListener,
    state: AppState,
    mut shutdown: broadcast::Receiver<()>,
) {
    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
    {
        error!("HTTP server error: {e}");
    }
}

async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "message": "AI Support Backend is running"
    }))
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "mock_ai": state.drafter.is_mock(),
        "sync_enabled": state.sync.is_some(),
        "sync_running": state.sync.as_ref().is_some_and(|s| s.is_running()),
    }))
}

async fn get_emails(State(state): State<AppState>) -> Response {
    match state.store.recent_messages(EMAIL_LIST_LIMIT) {
        Ok(messages) => {
            let emails: Vec<EmailView> = messages.into_iter().map(EmailView::from).collect();
            Json(json!({ "success": true, "emails": emails })).into_response()
        }
        Err(e) => storage_failure("Failed to fetch emails", &e),
    }
}

async fn delete_email(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    deleted(state.store.delete_message(&id), "Email", "Failed to delete email")
}

async fn sync_now(State(state): State<AppState>) -> Response {
    let Some(sync) = state.sync else {
        return fail(StatusCode::SERVICE_UNAVAILABLE, "Mailbox sync is not configured");
    };
    match sync.run_if_idle().await {
        Some(Ok(messages)) => Json(json!({
            "success": true,
            "fetched": messages.len(),
            "emails": messages,
        }))
        .into_response(),
        Some(Err(e)) => {
            error!("manual mailbox sync failed: {e}");
            fail(StatusCode::BAD_GATEWAY, "Mailbox sync failed")
        }
        None => fail(StatusCode::CONFLICT, "Mailbox sync already running"),
    }
}

async fn generate_reply(
    State(state): State<AppState>,
    Json(request): Json<GenerateReplyRequest>,
) -> Json<serde_json::Value> {
    let email_text = request.email_text.unwrap_or_default();
    let reply = state.drafter.generate_reply(&email_text).await;
    Json(json!({ "success": true, "reply": reply }))
}

async fn create_knowledge(
    State(state): State<AppState>,
    Json(request): Json<NewKnowledge>,
) -> Response {
    let entry = match request.validate() {
        Ok(entry) => entry,
        Err(e) => return fail(StatusCode::BAD_REQUEST, e.to_string()),
    };
    match state.store.insert_knowledge(entry) {
        Ok(knowledge) => Json(json!({ "success": true, "knowledge": knowledge })).into_response(),
        Err(e) => storage_failure("Failed to save knowledge", &e),
    }
}

async fn get_knowledge(State(state): State<AppState>) -> Response {
    match state.store.all_knowledge() {
        Ok(mut knowledge) => {
            knowledge.reverse();
            Json(json!({ "success": true, "knowledge": knowledge })).into_response()
        }
        Err(e) => storage_failure("Failed to fetch knowledge", &e),
    }
}

async fn delete_knowledge(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    deleted(
        state.store.delete_knowledge(&id),
        "Knowledge entry",
        "Failed to delete knowledge",
    )
}

async fn create_reply(State(state): State<AppState>, Json(request): Json<NewReply>) -> Response {
    let reply = match request.validate() {
        Ok(reply) => reply,
        Err(e) => return fail(StatusCode::BAD_REQUEST, e.to_string()),
    };
    match state.store.insert_reply(reply) {
        Ok(reply) => Json(json!({ "success": true, "reply": reply })).into_response(),
        Err(e) => storage_failure("Failed to save reply", &e),
    }
}

async fn get_replies(State(state): State<AppState>) -> Response {
    match state.store.all_replies() {
        Ok(mut replies) => {
            replies.reverse();
            Json(json!({ "success": true, "replies": replies })).into_response()
        }
        Err(e) => storage_failure("Failed to fetch replies", &e),
    }
}

async fn delete_reply(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    deleted(state.store.delete_reply(&id), "Reply", "Failed to delete reply")
}

async fn not_found() -> Response {
    fail(StatusCode::NOT_FOUND, "API route not found")
}
