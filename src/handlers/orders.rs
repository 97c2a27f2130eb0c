use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    services::{
        delivery::VerificationOutcome,
        orders::{CreateOrderFromCartRequest, OrderListResponse, OrderResponse},
    },
    ApiResponse, AppState, ListQuery,
};

#[derive(Debug, Deserialize)]
pub struct VerifyOtpRequest {
    pub otp: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:order_id", get(get_order))
        .route("/users/:user_id/orders", get(list_user_orders))
        .route("/shops/:shop_id/orders", get(list_shop_orders))
        .route(
            "/shops/:shop_id/orders/:order_id/verify-otp",
            post(verify_otp),
        )
}

async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderFromCartRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.orders.create_order_from_cart(request).await?;
    Ok(Json(ApiResponse::success_with_message(
        order,
        "Order placed",
    )))
}

async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.orders.get_order(order_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

async fn list_user_orders(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<OrderListResponse>>, ServiceError> {
    let orders = state
        .services
        .orders
        .list_orders_for_user(user_id, query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

async fn list_shop_orders(
    State(state): State<AppState>,
    Path(shop_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<OrderListResponse>>, ServiceError> {
    let orders = state
        .services
        .orders
        .list_orders_for_shop(shop_id, query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

async fn verify_otp(
    State(state): State<AppState>,
    Path((shop_id, order_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<VerifyOtpRequest>,
) -> Result<Json<ApiResponse<VerificationOutcome>>, ServiceError> {
    let outcome = state
        .services
        .delivery
        .verify_order_otp(order_id, &request.otp, shop_id)
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}
