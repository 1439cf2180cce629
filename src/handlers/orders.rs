use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{
    auth::{consts as perm, AuthRouterExt, AuthUser},
    entities::order::{self, OrderSource, OrderStatus},
    errors::ServiceError,
    services::orders::{CancelOrderRequest, OrderWithItems, PlaceOrderRequest},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderListQuery {
    /// Defaults to `Pending`, the guest orders awaiting confirmation
    pub status: Option<OrderStatus>,
}

pub fn order_routes() -> Router<AppState> {
    let read = Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/sessions/:id/orders", get(list_session_orders))
        .with_permission(perm::ORDERS_READ);
    let create = Router::new()
        .route("/sessions/:id/orders", post(place_order))
        .with_permission(perm::ORDERS_CREATE);
    let manage = Router::new()
        .route("/orders/:id/confirm", post(confirm_order))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/order-items/:id/cancel", post(cancel_item))
        .with_permission(perm::ORDERS_MANAGE);

    Router::new().merge(read).merge(create).merge(manage)
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders by status",
    params(OrderListQuery),
    responses(
        (status = 200, description = "Orders, oldest first", body = ApiResponse<Vec<order::Model>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> ApiResult<Vec<order::Model>> {
    let orders = state
        .services
        .orders
        .list_orders(
            auth_user.tenant()?,
            query.status.unwrap_or(OrderStatus::Pending),
        )
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order with items and tickets", body = ApiResponse<OrderWithItems>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderWithItems> {
    let order = state.services.orders.get_order(auth_user.tenant()?, id).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    get,
    path = "/api/v1/sessions/{id}/orders",
    summary = "Orders of a session",
    params(("id" = Uuid, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Orders placed at the table", body = ApiResponse<Vec<OrderWithItems>>),
        (status = 404, description = "Session not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn list_session_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<OrderWithItems>> {
    let orders = state
        .services
        .orders
        .list_session_orders(auth_user.tenant()?, id)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    post,
    path = "/api/v1/sessions/{id}/orders",
    summary = "Take an order",
    description = "Staff orders are confirmed at once and go straight to the stations",
    params(("id" = Uuid, Path, description = "Session ID")),
    request_body = PlaceOrderRequest,
    responses(
        (status = 201, description = "Order placed", body = ApiResponse<OrderWithItems>),
        (status = 400, description = "Invalid items or inactive session", body = crate::errors::ErrorResponse),
        (status = 404, description = "Session or menu item not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn place_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderWithItems>>), ServiceError> {
    let order = state
        .services
        .orders
        .place_order(
            auth_user.tenant()?,
            id,
            OrderSource::Staff,
            Some(auth_user.user_id),
            payload,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/confirm",
    summary = "Confirm guest order",
    description = "Prints KOT/BOT tickets and deducts recipe stock",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order confirmed", body = ApiResponse<OrderWithItems>),
        (status = 400, description = "Order is not pending", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn confirm_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderWithItems> {
    let order = state
        .services
        .orders
        .confirm_order(auth_user.tenant()?, id, auth_user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    summary = "Cancel order",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = CancelOrderRequest,
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<OrderWithItems>),
        (status = 400, description = "Kitchen already started", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelOrderRequest>,
) -> ApiResult<OrderWithItems> {
    let order = state
        .services
        .orders
        .cancel_order(auth_user.tenant()?, id, auth_user.user_id, payload)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/v1/order-items/{id}/cancel",
    summary = "Cancel one item",
    params(("id" = Uuid, Path, description = "Order item ID")),
    responses(
        (status = 200, description = "Item cancelled", body = ApiResponse<OrderWithItems>),
        (status = 400, description = "Item is already being prepared", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn cancel_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderWithItems> {
    let order = state
        .services
        .orders
        .cancel_item(auth_user.tenant()?, id, auth_user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}
