//! Endpoints behind a table's QR code. No login: the token printed on the
//! table identifies the restaurant and table, and every call is confined to
//! the session currently open there.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        dining_table,
        order::OrderSource,
        restaurant,
        table_session::{self, SessionOrigin},
    },
    errors::ServiceError,
    services::{
        billing::BillWithLines,
        menu::MenuSection,
        orders::{OrderWithItems, PlaceOrderRequest},
        payments::KhaltiCheckout,
        tables::OpenSessionRequest,
    },
    ApiResponse, ApiResult, AppState,
};

/// What a guest sees after scanning the code.
#[derive(Debug, Serialize, ToSchema)]
pub struct GuestTable {
    pub restaurant_name: String,
    pub table_id: Uuid,
    pub table_name: String,
    pub session: Option<table_session::Model>,
}

pub fn guest_routes() -> Router<AppState> {
    Router::new()
        .route("/guest/:token", get(scan))
        .route("/guest/:token/menu", get(menu))
        .route("/guest/:token/session", post(join_session))
        .route("/guest/:token/orders", get(list_orders).post(place_order))
        .route("/guest/:token/request-bill", post(request_bill))
        .route("/guest/:token/bill", get(view_bill))
        .route("/guest/:token/khalti", post(pay_with_khalti))
}

async fn resolve(
    state: &AppState,
    token: &str,
) -> Result<(restaurant::Model, dining_table::Model), ServiceError> {
    state.services.tables.resolve_qr(token).await
}

/// The session open at the scanned table.
async fn open_session(
    state: &AppState,
    token: &str,
) -> Result<(restaurant::Model, table_session::Model), ServiceError> {
    let (restaurant, table) = resolve(state, token).await?;
    let session = state
        .services
        .tables
        .current_session(table.id)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("No open session at table {}", table.name))
        })?;
    Ok((restaurant, session))
}

#[utoipa::path(
    get,
    path = "/api/v1/guest/{token}",
    summary = "Scan table QR",
    params(("token" = String, Path, description = "Token printed on the table")),
    responses(
        (status = 200, description = "Restaurant, table and open session", body = ApiResponse<GuestTable>),
        (status = 404, description = "Unknown or retired QR code", body = crate::errors::ErrorResponse),
    ),
    tag = "guest"
)]
pub async fn scan(State(state): State<AppState>, Path(token): Path<String>) -> ApiResult<GuestTable> {
    let (restaurant, table) = resolve(&state, &token).await?;
    let session = state.services.tables.current_session(table.id).await?;
    Ok(Json(ApiResponse::success(GuestTable {
        restaurant_name: restaurant.name,
        table_id: table.id,
        table_name: table.name,
        session,
    })))
}

#[utoipa::path(
    get,
    path = "/api/v1/guest/{token}/menu",
    summary = "Guest menu",
    description = "Available items grouped by category",
    params(("token" = String, Path, description = "Token printed on the table")),
    responses(
        (status = 200, description = "Menu", body = ApiResponse<Vec<MenuSection>>),
        (status = 404, description = "Unknown or retired QR code", body = crate::errors::ErrorResponse),
    ),
    tag = "guest"
)]
pub async fn menu(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Vec<MenuSection>> {
    let (restaurant, _) = resolve(&state, &token).await?;
    let sections = state.services.menu.guest_menu(restaurant.id).await?;
    Ok(Json(ApiResponse::success(sections)))
}

#[utoipa::path(
    post,
    path = "/api/v1/guest/{token}/session",
    summary = "Start or join the table session",
    params(("token" = String, Path, description = "Token printed on the table")),
    request_body = OpenSessionRequest,
    responses(
        (status = 200, description = "Session the guest is part of", body = ApiResponse<table_session::Model>),
        (status = 409, description = "Table is being cleaned", body = crate::errors::ErrorResponse),
    ),
    tag = "guest"
)]
pub async fn join_session(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<OpenSessionRequest>,
) -> ApiResult<table_session::Model> {
    payload.validate()?;
    let (restaurant, table) = resolve(&state, &token).await?;
    let session = state
        .services
        .tables
        .open_session(
            restaurant.id,
            table.id,
            SessionOrigin::Qr,
            payload.guest_count,
            None,
        )
        .await?;
    Ok(Json(ApiResponse::success(session)))
}

#[utoipa::path(
    get,
    path = "/api/v1/guest/{token}/orders",
    summary = "Orders at this table",
    params(("token" = String, Path, description = "Token printed on the table")),
    responses(
        (status = 200, description = "Orders of the open session", body = ApiResponse<Vec<OrderWithItems>>),
        (status = 404, description = "No open session", body = crate::errors::ErrorResponse),
    ),
    tag = "guest"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Vec<OrderWithItems>> {
    let (restaurant, session) = open_session(&state, &token).await?;
    let orders = state
        .services
        .orders
        .list_session_orders(restaurant.id, session.id)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    post,
    path = "/api/v1/guest/{token}/orders",
    summary = "Place guest order",
    description = "Waits for staff confirmation before reaching the kitchen",
    params(("token" = String, Path, description = "Token printed on the table")),
    request_body = PlaceOrderRequest,
    responses(
        (status = 201, description = "Order placed", body = ApiResponse<OrderWithItems>),
        (status = 400, description = "Invalid items or bill already requested", body = crate::errors::ErrorResponse),
        (status = 404, description = "No open session", body = crate::errors::ErrorResponse),
    ),
    tag = "guest"
)]
pub async fn place_order(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderWithItems>>), ServiceError> {
    let (restaurant, session) = open_session(&state, &token).await?;
    let order = state
        .services
        .orders
        .place_order(restaurant.id, session.id, OrderSource::Guest, None, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

#[utoipa::path(
    post,
    path = "/api/v1/guest/{token}/request-bill",
    summary = "Ask for the bill",
    params(("token" = String, Path, description = "Token printed on the table")),
    responses(
        (status = 200, description = "Bill requested", body = ApiResponse<table_session::Model>),
        (status = 404, description = "No open session", body = crate::errors::ErrorResponse),
    ),
    tag = "guest"
)]
pub async fn request_bill(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<table_session::Model> {
    let (restaurant, session) = open_session(&state, &token).await?;
    let session = state
        .services
        .tables
        .request_bill(restaurant.id, session.id)
        .await?;
    Ok(Json(ApiResponse::success(session)))
}

#[utoipa::path(
    get,
    path = "/api/v1/guest/{token}/bill",
    summary = "View the bill",
    params(("token" = String, Path, description = "Token printed on the table")),
    responses(
        (status = 200, description = "Bill of the open session", body = ApiResponse<BillWithLines>),
        (status = 404, description = "No bill yet", body = crate::errors::ErrorResponse),
    ),
    tag = "guest"
)]
pub async fn view_bill(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<BillWithLines> {
    let (restaurant, session) = open_session(&state, &token).await?;
    let bill = state
        .services
        .billing
        .session_bill(restaurant.id, session.id)
        .await?;
    Ok(Json(ApiResponse::success(bill)))
}

#[utoipa::path(
    post,
    path = "/api/v1/guest/{token}/khalti",
    summary = "Pay the bill with Khalti",
    params(("token" = String, Path, description = "Token printed on the table")),
    responses(
        (status = 201, description = "Checkout created", body = ApiResponse<KhaltiCheckout>),
        (status = 400, description = "Bill not payable", body = crate::errors::ErrorResponse),
        (status = 404, description = "No bill yet", body = crate::errors::ErrorResponse),
    ),
    tag = "guest"
)]
pub async fn pay_with_khalti(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<(StatusCode, Json<ApiResponse<KhaltiCheckout>>), ServiceError> {
    let (restaurant, session) = open_session(&state, &token).await?;
    let bill = state
        .services
        .billing
        .session_bill(restaurant.id, session.id)
        .await?;
    let checkout = state
        .services
        .payments
        .initiate_khalti(restaurant.id, bill.bill.id, None)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(checkout))))
}
