//! HTTP boundary: meeting-platform webhooks, peer sync and health.
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hmac::{Hmac, Mac};
use meetwatch_common::{
    MeetingObject, MeetingPayload, RawEventKind, RawUpdate, UrlValidation, WebhookEnvelope, ENDPOINT_VALIDATION,
};
use sha2::Sha256;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::peer::{HEALTH_PATH, SYNC_PATH};
use crate::AppState;

/// Path of the webhook receiver, relative to the base URL
pub const WEBHOOK_PATH: &str = "/webhooks";

/// Create the HTTP router
pub fn create_router(state: AppState) -> Router {
    let settings = state.settings.clone();
    Router::new()
        .route(&settings.route(WEBHOOK_PATH), post(webhook_handler))
        .route(&settings.route(SYNC_PATH), post(sync_handler))
        .route(&settings.route(HEALTH_PATH), get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `hex(HMAC-SHA256(secret, token))`
pub fn sign_token(secret: &str, token: &str) -> Result<String, AppError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("invalid webhook secret: {e}")))?;
    mac.update(token.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Turn a webhook meeting object into a raw update of `kind`
pub fn to_update(kind: RawEventKind, object: MeetingObject) -> RawUpdate {
    let (participant_id, participant_name) = match object.participant {
        Some(p) if !p.user_id.is_empty() => (Some(p.user_id), Some(p.user_name)),
        Some(p) => (None, Some(p.user_name)),
        None => (None, None),
    };
    RawUpdate {
        kind,
        meeting_id: object.id,
        meeting_name: object.topic,
        participant_id,
        participant_name,
        start_time: object.start_time,
        end_time: object.end_time,
        silent: false,
    }
}

async fn webhook_handler(
    State(state): State<AppState>,
    Json(envelope): Json<WebhookEnvelope>,
) -> Result<Response, AppError> {
    if envelope.event == ENDPOINT_VALIDATION {
        if state.settings.webhook_secret.is_empty() {
            return Err(AppError::Unauthorized("no webhook secret configured".to_string()));
        }
        let challenge: UrlValidation = serde_json::from_value(envelope.payload)?;
        let encrypted = sign_token(&state.settings.webhook_secret, &challenge.plain_token)?;
        debug!("endpoint validation answered");
        return Ok(Json(UrlValidation {
            plain_token: challenge.plain_token,
            encrypted_token: Some(encrypted),
        })
        .into_response());
    }

    let Some(kind) = RawEventKind::from_event_name(&envelope.event) else {
        warn!(event = %envelope.event, "unrecognized webhook event ignored");
        return Ok(StatusCode::OK.into_response());
    };

    let payload: MeetingPayload = serde_json::from_value(envelope.payload)?;
    let update = to_update(kind, payload.object);
    if update.meeting_id.is_empty() {
        return Err(AppError::InvalidInput("webhook payload has no meeting id".to_string()));
    }

    if !state.orchestrator.is_watched_meeting(&update.meeting_id) {
        debug!(meeting = %update.meeting_id, event = %kind, "update for unwatched meeting dropped");
        return Ok(StatusCode::OK.into_response());
    }

    state.orchestrator.apply_update(&update);

    let peer = state.orchestrator.peer();
    tokio::spawn(async move {
        if let Err(e) = peer.forward(&update).await {
            warn!(meeting = %update.meeting_id, error = %e, "could not forward update to peer");
        }
    });

    Ok(StatusCode::OK.into_response())
}

async fn sync_handler(State(state): State<AppState>, Json(update): Json<RawUpdate>) -> StatusCode {
    let update = update.silenced();
    if !state.orchestrator.is_watched_meeting(&update.meeting_id) {
        debug!(meeting = %update.meeting_id, event = %update.kind, "sync update for unwatched meeting dropped");
        return StatusCode::OK;
    }
    debug!(meeting = %update.meeting_id, event = %update.kind, "sync update received");
    state.orchestrator.apply_update(&update);
    StatusCode::OK
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.orchestrator.is_shutting_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down")
    } else {
        (StatusCode::OK, "OK")
    }
}
