//! HTTP boundary for the channel cache.
//!
//! Thin by design: routing, bearer-token extraction, webhook signature
//! verification and error→status mapping. All channel logic lives in
//! `slackproxy-service`.

pub mod auth;
pub mod routes;
pub mod signature;

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    routing::{get, post},
};

use slackproxy_service::{ChannelService, EventIngestor};

/// Shared app state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ChannelService>,
    pub ingestor: EventIngestor,
    pub signing_secret: String,
    pub signature_tolerance: Duration,
}

/// Build the router (shared between production startup and tests).
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/channels/{name}", get(routes::get_channel))
        .route("/channels", post(routes::create_channel))
        .route("/slack/events", post(routes::slack_events))
        .with_state(state)
}
