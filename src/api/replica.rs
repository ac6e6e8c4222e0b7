//! Replica REST API
//!
//! Control endpoints of a replica node. Parameters come from the query
//! string:
//!
//! | Method | Path           | Params                               |
//! |--------|----------------|--------------------------------------|
//! | POST   | /v1/target     | target, file, dir, size, initiator?  |
//! | DELETE | /v1/target     | target, file                         |
//! | POST   | /v1/target/acl | target, initiator                    |
//! | DELETE | /v1/target/acl | initiator                            |
//! | GET    | /v1/target/acl | initiator                            |

use super::metrics;
use super::rest::{error_response, health_check, json_message};
use crate::error::{Error, Result};
use crate::replica::{parse_size, CreateTargetRequest, ReplicaService};
use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Query parameters accepted by the target endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetParams {
    pub target: Option<String>,
    pub file: Option<String>,
    pub dir: Option<String>,
    pub size: Option<String>,
    pub initiator: Option<String>,
}

impl TargetParams {
    fn create_request(&self) -> Result<CreateTargetRequest> {
        let size = match self.size.as_deref() {
            Some(raw) => Some(parse_size(raw)?),
            None => None,
        };

        Ok(CreateTargetRequest {
            target: self.target.clone(),
            file: self.file.clone(),
            dir: self.dir.as_ref().map(PathBuf::from),
            size,
            initiator: self.initiator.clone().filter(|i| !i.is_empty()),
        })
    }
}

/// Replica REST router builder
pub struct ReplicaRouter {
    service: Arc<ReplicaService>,
}

impl ReplicaRouter {
    /// Create a new replica router
    pub fn new(service: Arc<ReplicaService>) -> Self {
        Self { service }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        Router::new()
            .route("/v1/target", post(create_target).delete(delete_target))
            .route(
                "/v1/target/acl",
                post(add_acl).delete(remove_acl).get(find_acl),
            )
            .route("/health", get(health_check))
            .layer(TraceLayer::new_for_http())
            .with_state(self.service)
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn create_target(
    State(service): State<Arc<ReplicaService>>,
    Query(params): Query<TargetParams>,
) -> Response {
    let started = Instant::now();
    let result = params
        .create_request()
        .and_then(|request| service.create_target(&request));
    metrics::observe("create_target", started, &result);

    match result {
        Ok(wwn) => json_message(StatusCode::OK, wwn),
        Err(e) => error_response(&e),
    }
}

async fn delete_target(
    State(service): State<Arc<ReplicaService>>,
    Query(params): Query<TargetParams>,
) -> Response {
    let started = Instant::now();
    let result = service.delete_target(params.target.as_deref(), params.file.as_deref());
    metrics::observe("delete_target", started, &result);

    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e),
    }
}

async fn add_acl(
    State(service): State<Arc<ReplicaService>>,
    Query(params): Query<TargetParams>,
) -> Response {
    let started = Instant::now();
    let result = service.add_acl(params.target.as_deref(), params.initiator.as_deref());
    metrics::observe("add_acl", started, &result);

    match result {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) => error_response(&e),
    }
}

async fn remove_acl(
    State(service): State<Arc<ReplicaService>>,
    Query(params): Query<TargetParams>,
) -> Response {
    let started = Instant::now();
    let result = service.remove_acl(params.initiator.as_deref());
    metrics::observe("remove_acl", started, &result);

    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e),
    }
}

/// Report where an initiator holds an ACL; 404 when it holds none
async fn find_acl(
    State(service): State<Arc<ReplicaService>>,
    Query(params): Query<TargetParams>,
) -> Response {
    match service.find_acl(params.initiator.as_deref()) {
        Ok(Some(acl)) => (StatusCode::OK, Json(acl)).into_response(),
        Ok(None) => {
            let e = Error::AclNotFound {
                initiator: params.initiator.unwrap_or_default(),
            };
            info!("{}", e);
            let mut response = error_response(&e);
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        }
        Err(e) => error_response(&e),
    }
}
