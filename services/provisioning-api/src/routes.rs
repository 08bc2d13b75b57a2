//! HTTP routes
//!
//! - `GET /healthz`
//! - `POST /v1/assignments` - allocate for one site
//! - `GET|PATCH|DELETE /v1/assignments/{id}` - fetch, edit vendor, release
//! - `POST /v1/assignments/bulk` - allocate for every listed site lacking an assignment
//! - `GET /v1/regions/{id}/utilization`

use crate::error::ApiError;
use allocation_store::{Assignment, AssignmentId, RegionId};
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use site_allocator::{AllocationOutcome, AllocationRequest, Allocator, BulkOutcome, UtilizationReport};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

type AppState = Arc<Allocator>;

// Rejections surface as `ValidationError` through `ApiError`
type JsonBody<T> = Result<Json<T>, JsonRejection>;
type IdPath = Result<Path<i64>, PathRejection>;

/// Body of `PATCH /v1/assignments/{id}`
#[derive(Debug, Deserialize)]
pub struct VendorUpdate {
    #[serde(default)]
    pub vendor: Option<String>,
}

/// Body of `POST /v1/assignments/bulk`
#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub sites: Vec<AllocationRequest>,
}

/// Response of `POST /v1/assignments/bulk`
#[derive(Debug, Serialize)]
pub struct BulkResponse {
    pub results: Vec<BulkOutcome>,
}

/// Build the service router
pub fn create_router(allocator: Arc<Allocator>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/assignments", post(create_assignment))
        .route("/v1/assignments/bulk", post(bulk_allocate))
        .route(
            "/v1/assignments/{id}",
            get(get_assignment).patch(update_assignment).delete(release_assignment),
        )
        .route("/v1/regions/{id}/utilization", get(region_utilization))
        .layer(TraceLayer::new_for_http())
        .with_state(allocator)
}

async fn healthz() -> &'static str {
    "ok"
}

/// 201 for a new assignment, 200 when the site already held one
async fn create_assignment(
    State(allocator): State<AppState>,
    body: JsonBody<AllocationRequest>,
) -> Result<(StatusCode, Json<Assignment>), ApiError> {
    let Json(request) = body?;
    let outcome = allocator.allocate(&request).await?;
    let status = match outcome {
        AllocationOutcome::Created(_) => StatusCode::CREATED,
        AllocationOutcome::Existing(_) => StatusCode::OK,
    };
    Ok((status, Json(outcome.into_assignment())))
}

async fn get_assignment(
    State(allocator): State<AppState>,
    id: IdPath,
) -> Result<Json<Assignment>, ApiError> {
    let Path(id) = id?;
    Ok(Json(allocator.get(AssignmentId(id)).await?))
}

async fn update_assignment(
    State(allocator): State<AppState>,
    id: IdPath,
    body: JsonBody<VendorUpdate>,
) -> Result<Json<Assignment>, ApiError> {
    let Path(id) = id?;
    let Json(update) = body?;
    let updated = allocator
        .update_vendor(AssignmentId(id), update.vendor.as_deref())
        .await?;
    Ok(Json(updated))
}

async fn release_assignment(
    State(allocator): State<AppState>,
    id: IdPath,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    allocator.release(AssignmentId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn bulk_allocate(
    State(allocator): State<AppState>,
    body: JsonBody<BulkRequest>,
) -> Result<Json<BulkResponse>, ApiError> {
    let Json(request) = body?;
    let results = allocator.allocate_missing(&request.sites).await;
    Ok(Json(BulkResponse { results }))
}

async fn region_utilization(
    State(allocator): State<AppState>,
    id: IdPath,
) -> Result<Json<UtilizationReport>, ApiError> {
    let Path(id) = id?;
    Ok(Json(allocator.utilization(RegionId(id)).await?))
}
