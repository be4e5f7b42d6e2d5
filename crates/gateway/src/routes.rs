//! Route handlers: channel read/create and the event webhook.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use {
    serde::Deserialize,
    serde_json::{Value, json},
    tracing::{error, info},
};

use slackproxy_service::{ChannelEvent, ReplySource, ServiceError};

use crate::{AppState, auth, signature};

/// JSON error response: `{"detail": ...}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            detail: detail.into(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    pub fn bad_gateway(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unauthorized { detail } => Self::unauthorized(detail),
            ServiceError::Upstream { detail } => {
                Self::bad_gateway(format!("Slack upstream request failed: {detail}"))
            },
            ServiceError::Store(e) => {
                error!(error = %e, "store failure while serving request");
                Self::bad_gateway(e.to_string())
            },
        }
    }
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn get_channel(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = auth::bearer_token(&headers)?;
    let reply = state.service.read_channel(&token, &name).await?;

    let status = if reply.exists {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    Ok((status, Json(reply)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
}

pub async fn create_channel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateChannelRequest>,
) -> Result<Response, ApiError> {
    if request.name.trim().is_empty() || request.name.chars().count() > 80 {
        return Err(ApiError::bad_request(
            "name must be between 1 and 80 characters",
        ));
    }

    let token = auth::bearer_token(&headers)?;
    let reply = state.service.create_channel(&token, &request.name).await?;

    // The conflict branches answer not-found until the cache catches up.
    let status = match reply.source {
        ReplySource::Slack | ReplySource::Db => StatusCode::OK,
        ReplySource::SyncQueued | ReplySource::SyncInProgress => StatusCode::NOT_FOUND,
    };
    Ok((status, Json(reply)).into_response())
}

pub async fn slack_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let timestamp = headers
        .get("X-Slack-Request-Timestamp")
        .and_then(|v| v.to_str().ok());
    let sig = headers.get("X-Slack-Signature").and_then(|v| v.to_str().ok());
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    if !signature::verify(
        &state.signing_secret,
        timestamp,
        sig,
        &body,
        state.signature_tolerance.as_secs(),
        now,
    ) {
        return Err(ApiError::unauthorized("Invalid Slack request signature"));
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|_| ApiError::bad_request("Invalid JSON payload"))?;

    match payload.get("type").and_then(Value::as_str) {
        Some("url_verification") => {
            info!("url verification handshake");
            let challenge = payload.get("challenge").and_then(Value::as_str).unwrap_or("");
            Ok(Json(json!({ "challenge": challenge })))
        },
        Some("event_callback") => {
            let Some(workspace_id) = payload.get("team_id").and_then(Value::as_str) else {
                return Err(ApiError::bad_request("Missing team_id"));
            };
            let event: ChannelEvent =
                serde_json::from_value(payload.get("event").cloned().unwrap_or(Value::Null))
                    .map_err(|_| ApiError::bad_request("Invalid event payload"))?;

            state
                .ingestor
                .apply(workspace_id, event)
                .await
                .map_err(|e| {
                    error!(workspace_id, error = %e, "failed to apply lifecycle event");
                    ApiError::bad_gateway(e.to_string())
                })?;
            Ok(Json(json!({ "ok": true })))
        },
        other => {
            info!(kind = ?other, "ignoring non-event webhook");
            Ok(Json(json!({ "ok": true })))
        },
    }
}
