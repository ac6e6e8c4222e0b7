//! Controller REST API
//!
//! | Method | Path           | Params         | Success body       |
//! |--------|----------------|----------------|--------------------|
//! | GET    | /v1/controller |                | array device path  |
//! | POST   | /v1/controller | peers, device  | "create complete"  |
//! | DELETE | /v1/controller | peers          | "delete complete"  |
//!
//! `peers` is a comma-separated list of replica addresses.

use super::metrics;
use super::rest::{error_response, health_check, json_message};
use crate::controller::MirrorOrchestrator;
use crate::error::Error;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Query parameters of the controller endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControllerParams {
    pub peers: Option<String>,
    pub device: Option<String>,
}

impl ControllerParams {
    /// Peer addresses, trimmed, empty entries dropped
    pub fn peer_list(&self) -> Vec<String> {
        self.peers
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect()
    }
}

/// Controller REST router builder
pub struct ControllerRouter {
    orchestrator: Arc<MirrorOrchestrator>,
}

impl ControllerRouter {
    /// Create a new controller router
    pub fn new(orchestrator: Arc<MirrorOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        Router::new()
            .route(
                "/v1/controller",
                get(query_mirror).post(setup_mirror).delete(teardown_mirror),
            )
            .route("/health", get(health_check))
            .layer(TraceLayer::new_for_http())
            .with_state(self.orchestrator)
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn query_mirror(State(orchestrator): State<Arc<MirrorOrchestrator>>) -> Response {
    json_message(StatusCode::OK, orchestrator.query())
}

async fn setup_mirror(
    State(orchestrator): State<Arc<MirrorOrchestrator>>,
    Query(params): Query<ControllerParams>,
) -> Response {
    let started = Instant::now();
    let peers = params.peer_list();
    info!("Setup requested: peers={:?} device={:?}", peers, params.device);

    let result = match params.device.as_deref() {
        Some(device) => orchestrator.setup(&peers, device).await,
        None => Err(Error::Validation("missing required parameter device".into())),
    };
    metrics::observe("setup", started, &result);
    metrics::set_mirrored(!orchestrator.query().is_empty());

    match result {
        Ok(_) => json_message(StatusCode::OK, "create complete"),
        Err(e) => error_response(&e),
    }
}

async fn teardown_mirror(
    State(orchestrator): State<Arc<MirrorOrchestrator>>,
    Query(params): Query<ControllerParams>,
) -> Response {
    let started = Instant::now();
    let peers = params.peer_list();
    info!("Teardown requested: peers={:?}", peers);

    let result = orchestrator.teardown(&peers).await;
    metrics::observe("teardown", started, &result);
    metrics::set_mirrored(!orchestrator.query().is_empty());

    match result {
        Ok(()) => json_message(StatusCode::OK, "delete complete"),
        Err(e) => error_response(&e),
    }
}
