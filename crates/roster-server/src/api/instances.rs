//! Instance API endpoints

use crate::api::{request_context, respond_error, ResponseStatus, RESOURCE_REVISION_HEADER};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use roster_core::error::Error;
use roster_core::model::{Instance, InstanceStatus};
use roster_registry::{BatchFindKey, FindRequest};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn consumer_id(headers: &HeaderMap) -> String {
    headers
        .get("x-consumer-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn split_tags(raw: Option<&str>) -> Vec<String> {
    raw.map(|tags| {
        tags.split(',')
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

// =============================================================================
// Register / Unregister
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterInstanceRequest {
    pub instance: Instance,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInstanceResponse {
    pub response: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

/// POST /v4/registry/microservices/{service_id}/instances
pub async fn register(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RegisterInstanceRequest>,
) -> Response {
    let ctx = request_context(&headers);
    let mut instance = body.instance;
    instance.service_id = service_id;

    match state.store.register(&ctx, instance).await {
        Ok(instance_id) => Json(RegisterInstanceResponse {
            response: ResponseStatus::success("register service instance successfully"),
            instance_id: Some(instance_id),
        })
        .into_response(),
        Err(e) => respond_error(&e, |response| RegisterInstanceResponse {
            response,
            instance_id: None,
        }),
    }
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub response: ResponseStatus,
}

/// DELETE /v4/registry/microservices/{service_id}/instances/{instance_id}
pub async fn unregister(
    State(state): State<AppState>,
    Path((service_id, instance_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let ctx = request_context(&headers);
    match state.store.unregister(&ctx, &service_id, &instance_id).await {
        Ok(()) => Json(AckResponse {
            response: ResponseStatus::success("unregister service instance successfully"),
        })
        .into_response(),
        Err(e) => respond_error(&e, |response| AckResponse { response }),
    }
}

// =============================================================================
// Heartbeats
// =============================================================================

/// PUT /v4/registry/microservices/{service_id}/instances/{instance_id}/heartbeat
pub async fn heartbeat(
    State(state): State<AppState>,
    Path((service_id, instance_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let ctx = request_context(&headers);
    match state
        .heartbeat
        .heartbeat(&ctx.domain_project, &service_id, &instance_id)
        .await
    {
        Ok(_ttl) => Json(AckResponse {
            response: ResponseStatus::success("update service instance heartbeat successfully"),
        })
        .into_response(),
        Err(e) => respond_error(&e, |response| AckResponse { response }),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatSetElement {
    pub service_id: String,
    pub instance_id: String,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatSetRequest {
    #[serde(default)]
    pub instances: Vec<HeartbeatSetElement>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceHeartbeatResult {
    pub service_id: String,
    pub instance_id: String,
    pub err_message: String,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatSetResponse {
    pub response: ResponseStatus,
    pub instances: Vec<InstanceHeartbeatResult>,
}

/// PUT /v4/registry/heartbeats
pub async fn heartbeat_set(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<HeartbeatSetRequest>,
) -> Response {
    let ctx = request_context(&headers);
    let elements: Vec<(String, String)> = body
        .instances
        .into_iter()
        .map(|e| (e.service_id, e.instance_id))
        .collect();

    match state
        .heartbeat
        .heartbeat_set(&ctx.domain_project, &elements)
        .await
    {
        Ok(outcome) => {
            let instances: Vec<InstanceHeartbeatResult> = outcome
                .results
                .into_iter()
                .map(|r| InstanceHeartbeatResult {
                    service_id: r.service_id,
                    instance_id: r.instance_id,
                    err_message: r.err_message,
                })
                .collect();
            let response = if outcome.failed {
                ResponseStatus::error(&Error::instance_not_exists("heartbeat set failed"))
            } else {
                ResponseStatus::success("heartbeat set successfully")
            };
            Json(HeartbeatSetResponse {
                response,
                instances,
            })
            .into_response()
        }
        Err(e) => respond_error(&e, |response| HeartbeatSetResponse {
            response,
            instances: Vec::new(),
        }),
    }
}

// =============================================================================
// Reads
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct TagsQuery {
    pub tags: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GetInstancesResponse {
    pub response: ResponseStatus,
    pub instances: Vec<Instance>,
}

#[derive(Debug, Serialize)]
pub struct GetOneInstanceResponse {
    pub response: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<Instance>,
}

/// GET /v4/registry/microservices/{service_id}/instances/{instance_id}
pub async fn get_one_instance(
    State(state): State<AppState>,
    Path((service_id, instance_id)): Path<(String, String)>,
    Query(query): Query<TagsQuery>,
    headers: HeaderMap,
) -> Response {
    let ctx = request_context(&headers);
    let tags = split_tags(query.tags.as_deref());
    match state
        .discovery
        .get_one_instance(&ctx, &consumer_id(&headers), &service_id, &instance_id, &tags)
        .await
    {
        Ok(instance) => Json(GetOneInstanceResponse {
            response: ResponseStatus::success("get instance successfully"),
            instance: Some(instance),
        })
        .into_response(),
        Err(e) => respond_error(&e, |response| GetOneInstanceResponse {
            response,
            instance: None,
        }),
    }
}

/// GET /v4/registry/microservices/{service_id}/instances
pub async fn get_instances(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    Query(query): Query<TagsQuery>,
    headers: HeaderMap,
) -> Response {
    let ctx = request_context(&headers);
    let tags = split_tags(query.tags.as_deref());
    match state
        .discovery
        .get_instances(&ctx, &consumer_id(&headers), &service_id, &tags)
        .await
    {
        Ok(instances) => Json(GetInstancesResponse {
            response: ResponseStatus::success("query service instances successfully"),
            instances,
        })
        .into_response(),
        Err(e) => respond_error(&e, |response| GetInstancesResponse {
            response,
            instances: Vec::new(),
        }),
    }
}

// =============================================================================
// Find / BatchFind
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindQuery {
    pub app_id: String,
    pub service_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub env: String,
    #[serde(default)]
    pub rev: String,
    pub tags: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FindInstancesResponse {
    pub response: ResponseStatus,
    pub instances: Vec<Instance>,
}

/// GET /v4/registry/instances
///
/// When the caller's `rev` matches the current cache revision, the instance
/// list is omitted; the current revision always rides the
/// `x-resource-revision` response header.
pub async fn find(
    State(state): State<AppState>,
    Query(query): Query<FindQuery>,
    headers: HeaderMap,
) -> Response {
    let mut ctx = request_context(&headers);
    if !query.rev.is_empty() {
        ctx.request_rev = Some(query.rev.clone());
    }
    let request = FindRequest {
        consumer_service_id: consumer_id(&headers),
        environment: query.env.clone(),
        app_id: query.app_id.clone(),
        service_name: query.service_name.clone(),
        version_rule: query.version.clone(),
        tags: split_tags(query.tags.as_deref()),
    };

    match state.discovery.find(&ctx, request).await {
        Ok(found) => {
            let mut response = Json(FindInstancesResponse {
                response: ResponseStatus::success("query service instances successfully"),
                instances: found.instances,
            })
            .into_response();
            if let Ok(value) = found.rev.parse() {
                response
                    .headers_mut()
                    .insert(RESOURCE_REVISION_HEADER, value);
            }
            response
        }
        Err(e) => respond_error(&e, |response| FindInstancesResponse {
            response,
            instances: Vec::new(),
        }),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFindServiceKey {
    #[serde(default)]
    pub environment: String,
    pub app_id: String,
    pub service_name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFindElement {
    pub service: BatchFindServiceKey,
    #[serde(default)]
    pub rev: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchFindRequest {
    #[serde(default)]
    pub services: Vec<BatchFindElement>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFindUpdated {
    pub index: i64,
    pub rev: String,
    pub instances: Vec<Instance>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFindFailed {
    pub error: ResponseStatus,
    pub indexes: Vec<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFindResponse {
    pub response: ResponseStatus,
    pub updated: Vec<BatchFindUpdated>,
    pub not_modified: Vec<i64>,
    pub failed: Vec<BatchFindFailed>,
}

/// POST /v4/registry/instances/batch
pub async fn batch_find(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<BatchFindRequest>,
) -> Response {
    let ctx = request_context(&headers);
    let elements: Vec<BatchFindKey> = body
        .services
        .iter()
        .map(|element| BatchFindKey {
            environment: element.service.environment.clone(),
            app_id: element.service.app_id.clone(),
            service_name: element.service.service_name.clone(),
            version_rule: element.service.version.clone(),
            rev: element.rev.clone(),
        })
        .collect();

    match state
        .discovery
        .batch_find(&ctx, &consumer_id(&headers), &elements)
        .await
    {
        Ok(result) => Json(BatchFindResponse {
            response: ResponseStatus::success("batch query service instances successfully"),
            updated: result
                .updated
                .into_iter()
                .map(|u| BatchFindUpdated {
                    index: u.index,
                    rev: u.rev,
                    instances: u.instances,
                })
                .collect(),
            not_modified: result.not_modified,
            failed: result
                .failed
                .into_iter()
                .map(|f| BatchFindFailed {
                    error: ResponseStatus {
                        code: f.code,
                        message: f.message,
                    },
                    indexes: f.indexes,
                })
                .collect(),
        })
        .into_response(),
        Err(e) => respond_error(&e, |response| BatchFindResponse {
            response,
            updated: Vec::new(),
            not_modified: Vec::new(),
            failed: Vec::new(),
        }),
    }
}

// =============================================================================
// Updates
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct UpdateStatusQuery {
    pub value: String,
}

/// PUT /v4/registry/microservices/{service_id}/instances/{instance_id}/status
pub async fn update_status(
    State(state): State<AppState>,
    Path((service_id, instance_id)): Path<(String, String)>,
    Query(query): Query<UpdateStatusQuery>,
    headers: HeaderMap,
) -> Response {
    let ctx = request_context(&headers);
    let status: InstanceStatus = match query.value.parse() {
        Ok(status) => status,
        Err(e) => return respond_error(&e, |response| AckResponse { response }),
    };

    match state
        .store
        .update_status(&ctx, &service_id, &instance_id, status)
        .await
    {
        Ok(()) => Json(AckResponse {
            response: ResponseStatus::success("update service instance status successfully"),
        })
        .into_response(),
        Err(e) => respond_error(&e, |response| AckResponse { response }),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdatePropertiesRequest {
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// PUT /v4/registry/microservices/{service_id}/instances/{instance_id}/properties
pub async fn update_properties(
    State(state): State<AppState>,
    Path((service_id, instance_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<UpdatePropertiesRequest>,
) -> Response {
    let ctx = request_context(&headers);
    match state
        .store
        .update_properties(&ctx, &service_id, &instance_id, body.properties)
        .await
    {
        Ok(()) => Json(AckResponse {
            response: ResponseStatus::success("update service instance properties successfully"),
        })
        .into_response(),
        Err(e) => respond_error(&e, |response| AckResponse { response }),
    }
}

// =============================================================================
// Cluster health
// =============================================================================

/// GET /v4/registry/health
pub async fn cluster_health(State(state): State<AppState>) -> Response {
    match state.discovery.cluster_health().await {
        Ok(instances) => Json(GetInstancesResponse {
            response: ResponseStatus::success("health check successfully"),
            instances,
        })
        .into_response(),
        Err(e) => respond_error(&e, |response| GetInstancesResponse {
            response,
            instances: Vec::new(),
        }),
    }
}
