use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    entities::batch,
    errors::ServiceError,
    services::batches::VendorDashboard,
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize, Default)]
pub struct DispatchRequest {
    pub runner_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/shops/:shop_id/dashboard", get(vendor_dashboard))
        .route("/shops/:shop_id/batches/:batch_id/lock", post(lock_batch))
        .route("/batches/:batch_id/dispatch", post(start_delivery))
        .route("/batches/:batch_id/complete", post(complete_batch))
        .route("/batches/:batch_id/cancel", post(cancel_batch))
}

async fn vendor_dashboard(
    State(state): State<AppState>,
    Path(shop_id): Path<Uuid>,
) -> Result<Json<ApiResponse<VendorDashboard>>, ServiceError> {
    let dashboard = state.services.batches.vendor_dashboard(shop_id).await?;
    Ok(Json(ApiResponse::success(dashboard)))
}

async fn lock_batch(
    State(state): State<AppState>,
    Path((shop_id, batch_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiResponse<batch::Model>>, ServiceError> {
    let locked = state.services.batches.lock_batch(batch_id, shop_id).await?;
    Ok(Json(ApiResponse::success(locked)))
}

async fn start_delivery(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    body: Option<Json<DispatchRequest>>,
) -> Result<Json<ApiResponse<batch::Model>>, ServiceError> {
    let runner_id = body.map(|Json(b)| b.runner_id).unwrap_or(None);
    let dispatched = state
        .services
        .batches
        .start_delivery(batch_id, runner_id)
        .await?;
    Ok(Json(ApiResponse::success(dispatched)))
}

async fn complete_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<ApiResponse<batch::Model>>, ServiceError> {
    let completed = state.services.batches.complete_batch(batch_id).await?;
    Ok(Json(ApiResponse::success(completed)))
}

async fn cancel_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<ApiResponse<batch::Model>>, ServiceError> {
    let reason = body.map(|Json(b)| b.reason).unwrap_or(None);
    let cancelled = state
        .services
        .batches
        .cancel_batch(batch_id, reason)
        .await?;
    Ok(Json(ApiResponse::success(cancelled)))
}
