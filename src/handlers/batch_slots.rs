use axum::{
    extract::{Path, State},
    response::Json,
    routing::{delete, get, patch, post, put},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    entities::batch_slot,
    errors::ServiceError,
    services::batch_slots::{CreateBatchSlotRequest, UpdateBatchSlotRequest},
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub slot_ids: Vec<Uuid>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/shops/:shop_id/slots", get(list_slots))
        .route("/shops/:shop_id/slots", post(create_slot))
        .route("/shops/:shop_id/slots/reorder", put(reorder_slots))
        .route("/shops/:shop_id/slots/:slot_id", patch(update_slot))
        .route("/shops/:shop_id/slots/:slot_id", delete(delete_slot))
}

async fn list_slots(
    State(state): State<AppState>,
    Path(shop_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<batch_slot::Model>>>, ServiceError> {
    let slots = state.services.batch_slots.list_slots(shop_id).await?;
    Ok(Json(ApiResponse::success(slots)))
}

async fn create_slot(
    State(state): State<AppState>,
    Path(shop_id): Path<Uuid>,
    Json(request): Json<CreateBatchSlotRequest>,
) -> Result<Json<ApiResponse<batch_slot::Model>>, ServiceError> {
    let slot = state
        .services
        .batch_slots
        .create_slot(shop_id, request)
        .await?;
    Ok(Json(ApiResponse::success(slot)))
}

async fn update_slot(
    State(state): State<AppState>,
    Path((shop_id, slot_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateBatchSlotRequest>,
) -> Result<Json<ApiResponse<batch_slot::Model>>, ServiceError> {
    let slot = state
        .services
        .batch_slots
        .update_slot(slot_id, shop_id, request)
        .await?;
    Ok(Json(ApiResponse::success(slot)))
}

async fn delete_slot(
    State(state): State<AppState>,
    Path((shop_id, slot_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiResponse<()>>, ServiceError> {
    state
        .services
        .batch_slots
        .delete_slot(slot_id, shop_id)
        .await?;
    Ok(Json(ApiResponse::success(())))
}

async fn reorder_slots(
    State(state): State<AppState>,
    Path(shop_id): Path<Uuid>,
    Json(request): Json<ReorderRequest>,
) -> Result<Json<ApiResponse<Vec<batch_slot::Model>>>, ServiceError> {
    let slots = state
        .services
        .batch_slots
        .reorder_slots(shop_id, request.slot_ids)
        .await?;
    Ok(Json(ApiResponse::success(slots)))
}
