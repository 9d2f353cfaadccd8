//! `/api/mail/*`: mailbox operations for the signed-in user.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use courier_core::mail::{validate_message_id, ListQuery, MessageDetail, MessagePage, MessageSummary};
use courier_core::MailError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;

use crate::auth::MailSession;
use crate::error::ApiError;
use crate::server::AppState;

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct StarRequest {
    #[serde(default = "default_true")]
    pub starred: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReadRequest {
    #[serde(default = "default_true")]
    pub read: bool,
}

/// Parse an optional JSON body; an empty body means all defaults.
fn optional_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}".as_slice()
    } else {
        body
    };
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

/// Path ids arrive percent-decoded; anything outside the provider's id
/// alphabet is refused before it reaches an upstream URL.
fn message_id(id: &str) -> Result<&str, ApiError> {
    validate_message_id(id)?;
    Ok(id)
}

fn upstream(operation: &'static str, e: MailError) -> ApiError {
    warn!(operation, kind = e.error_kind(), error = %e, "mail provider call failed");
    ApiError::from(e)
}

/// GET /api/mail/messages
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(session): Extension<MailSession>,
    Query(query): Query<ListQuery>,
) -> Result<Json<MessagePage>, ApiError> {
    state
        .mail
        .list_messages(&session.access_token, &query)
        .await
        .map(Json)
        .map_err(|e| upstream("list", e))
}

/// GET /api/mail/messages/{id}
pub async fn get_message(
    State(state): State<AppState>,
    Extension(session): Extension<MailSession>,
    Path(id): Path<String>,
) -> Result<Json<MessageDetail>, ApiError> {
    let id = message_id(&id)?;
    state
        .mail
        .get_message(&session.access_token, id)
        .await
        .map(Json)
        .map_err(|e| upstream("get", e))
}

/// POST /api/mail/messages/{id}/star
pub async fn star_message(
    State(state): State<AppState>,
    Extension(session): Extension<MailSession>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<MessageSummary>, ApiError> {
    let id = message_id(&id)?;
    let req: StarRequest = optional_body(&body)?;
    state
        .mail
        .set_starred(&session.access_token, id, req.starred)
        .await
        .map(Json)
        .map_err(|e| upstream("star", e))
}

/// POST /api/mail/messages/{id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(session): Extension<MailSession>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<MessageSummary>, ApiError> {
    let id = message_id(&id)?;
    let req: ReadRequest = optional_body(&body)?;
    state
        .mail
        .set_read(&session.access_token, id, req.read)
        .await
        .map(Json)
        .map_err(|e| upstream("read", e))
}
