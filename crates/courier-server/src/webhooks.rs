//! Inbound provider webhooks feeding the dispatcher.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use courier_core::envelope::NEW_EMAIL;
use courier_core::EventEnvelope;
use courier_mail::push::decode_push;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::ApiError;
use crate::server::AppState;
use crate::signature::{verify_request, Verification};

fn check_signature(
    provider: &'static str,
    secret: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Verification, ApiError> {
    let verification = verify_request(secret, headers, body);
    if verification.is_accepted() {
        Ok(verification)
    } else {
        warn!(provider, ?verification, "webhook signature rejected");
        Err(ApiError::Unauthorized("invalid signature".into()))
    }
}

/// GET /wati/webhook: reachability probe used when registering the hook.
pub async fn wati_probe() -> &'static str {
    "OK"
}

/// POST /wati/webhook: forward the provider payload as-is.
pub async fn wati_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let _ = check_signature("wati", state.config.wati.secret.as_deref(), &headers, &body)?;

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))?;
    let event_type = payload
        .get("eventType")
        .and_then(Value::as_str)
        .unwrap_or("no eventType")
        .to_owned();

    let report = state.dispatcher.broadcast(&EventEnvelope::passthrough(payload));
    info!(
        provider = "wati",
        event_type = %event_type,
        recipients = report.delivered,
        "webhook accepted"
    );
    Ok(Json(json!({ "ok": true })))
}

/// POST /gmail/webhook: mailbox change push notification.
pub async fn gmail_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let _ = check_signature(
        "gmail",
        state.config.gmail_push.secret.as_deref(),
        &headers,
        &body,
    )?;

    let notification = decode_push(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let data = serde_json::to_value(&notification).map_err(|e| ApiError::Internal(e.to_string()))?;

    let report = state
        .dispatcher
        .broadcast(&EventEnvelope::typed(NEW_EMAIL, data));
    info!(
        provider = "gmail",
        history_id = notification.history_id,
        recipients = report.delivered,
        "mail notification accepted"
    );
    Ok(Json(json!({ "ok": true })))
}
