//! HTTP API
//!
//! JSON over HTTP with a response envelope on every operation. Non-internal
//! domain errors ride inside the envelope with status 200; internal errors
//! surface as transport failures so clients retry.

pub mod instances;

use crate::state::AppState;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use roster_core::error::{Error, CODE_SUCCESS};
use roster_core::model::DomainProject;
use roster_core::RequestContext;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Response revision header consumed by find clients
pub const RESOURCE_REVISION_HEADER: &str = "x-resource-revision";

/// Envelope carried by every response body
#[derive(Debug, Clone, Serialize)]
pub struct ResponseStatus {
    pub code: u32,
    pub message: String,
}

impl ResponseStatus {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            code: CODE_SUCCESS,
            message: message.into(),
        }
    }

    pub fn error(err: &Error) -> Self {
        Self {
            code: err.code(),
            message: err.message().to_string(),
        }
    }
}

/// Finish a failed operation: domain errors complete the call normally with
/// the envelope, internal errors become transport failures
pub(crate) fn respond_error<T, F>(err: &Error, build: F) -> Response
where
    T: Serialize,
    F: FnOnce(ResponseStatus) -> T,
{
    let status = if err.is_internal() {
        match err {
            Error::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    } else {
        StatusCode::OK
    };
    (status, Json(build(ResponseStatus::error(err)))).into_response()
}

/// Parse the per-request tenant and discovery metadata from headers
pub fn request_context(headers: &HeaderMap) -> RequestContext {
    let domain = header_or(headers, "x-domain-name", "default");
    let project = header_or(headers, "x-project-name", "default");
    let mut ctx = RequestContext::new(DomainProject::new(domain.clone(), project.clone()));

    if let Some(target_domain) = header(headers, "x-target-domain") {
        let target_project = header_or(headers, "x-target-project", &project);
        ctx.target = Some(DomainProject::new(target_domain, target_project));
    }
    ctx.remote_ip = header_or(headers, "x-real-ip", "");
    ctx
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn header_or(headers: &HeaderMap, name: &str, default: &str) -> String {
    header(headers, name).unwrap_or_else(|| default.to_string())
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route(
            "/v4/registry/microservices/:service_id/instances",
            post(instances::register).get(instances::get_instances),
        )
        .route(
            "/v4/registry/microservices/:service_id/instances/:instance_id",
            axum::routing::delete(instances::unregister).get(instances::get_one_instance),
        )
        .route(
            "/v4/registry/microservices/:service_id/instances/:instance_id/heartbeat",
            put(instances::heartbeat),
        )
        .route(
            "/v4/registry/microservices/:service_id/instances/:instance_id/status",
            put(instances::update_status),
        )
        .route(
            "/v4/registry/microservices/:service_id/instances/:instance_id/properties",
            put(instances::update_properties),
        )
        .route("/v4/registry/heartbeats", put(instances::heartbeat_set))
        .route("/v4/registry/instances", get(instances::find))
        .route("/v4/registry/instances/batch", post(instances::batch_find))
        .route("/v4/registry/health", get(instances::cluster_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Liveness probe
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
