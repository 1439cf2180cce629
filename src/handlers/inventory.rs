use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    auth::{consts as perm, AuthRouterExt, AuthUser},
    common::DateRangeParams,
    entities::{purchase, stock_item, stock_movement, vendor},
    errors::ServiceError,
    services::{
        compliance::business_date,
        inventory::{
            AdjustStockRequest, CreateStockItemRequest, CreateVendorRequest, PurchaseWithLines,
            RecordPurchaseRequest, WastageRequest,
        },
    },
    ApiResponse, ApiResult, AppState,
};

pub fn inventory_routes() -> Router<AppState> {
    let read = Router::new()
        .route("/stock-items", get(list_stock_items))
        .route("/stock-items/:id", get(get_stock_item))
        .route("/stock-items/:id/movements", get(list_movements))
        .route("/stock-alerts", get(low_stock))
        .with_permission(perm::INVENTORY_READ);
    let manage = Router::new()
        .route("/stock-items", post(create_stock_item))
        .route("/stock-items/:id/adjust", post(adjust_stock))
        .route("/stock-items/:id/wastage", post(record_wastage))
        .with_permission(perm::INVENTORY_MANAGE);
    let vendors_read = Router::new()
        .route("/vendors", get(list_vendors))
        .with_permission(perm::VENDORS_READ);
    let vendors_manage = Router::new()
        .route("/vendors", post(create_vendor))
        .with_permission(perm::VENDORS_MANAGE);
    let purchases_read = Router::new()
        .route("/purchases", get(list_purchases))
        .route("/purchases/:id", get(get_purchase))
        .with_permission(perm::PURCHASES_READ);
    let purchases_create = Router::new()
        .route("/purchases", post(record_purchase))
        .with_permission(perm::PURCHASES_CREATE);

    Router::new()
        .merge(read)
        .merge(manage)
        .merge(vendors_read)
        .merge(vendors_manage)
        .merge(purchases_read)
        .merge(purchases_create)
}

#[utoipa::path(
    get,
    path = "/api/v1/stock-items",
    summary = "List stock items",
    responses(
        (status = 200, description = "Raw materials by name", body = ApiResponse<Vec<stock_item::Model>>),
    ),
    security(("Bearer" = [])),
    tag = "inventory"
)]
pub async fn list_stock_items(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Vec<stock_item::Model>> {
    let items = state
        .services
        .inventory
        .list_stock_items(auth_user.tenant()?)
        .await?;
    Ok(Json(ApiResponse::success(items)))
}

#[utoipa::path(
    post,
    path = "/api/v1/stock-items",
    summary = "Create stock item",
    request_body = CreateStockItemRequest,
    responses(
        (status = 201, description = "Stock item created", body = ApiResponse<stock_item::Model>),
        (status = 409, description = "Name already used", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "inventory"
)]
pub async fn create_stock_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<CreateStockItemRequest>,
) -> Result<(StatusCode, Json<ApiResponse<stock_item::Model>>), ServiceError> {
    let item = state
        .services
        .inventory
        .create_stock_item(auth_user.tenant()?, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(item))))
}

#[utoipa::path(
    get,
    path = "/api/v1/stock-items/{id}",
    summary = "Get stock item",
    params(("id" = Uuid, Path, description = "Stock item ID")),
    responses(
        (status = 200, description = "Stock item", body = ApiResponse<stock_item::Model>),
        (status = 404, description = "Stock item not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "inventory"
)]
pub async fn get_stock_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<stock_item::Model> {
    let item = state
        .services
        .inventory
        .get_stock_item(auth_user.tenant()?, id)
        .await?;
    Ok(Json(ApiResponse::success(item)))
}

#[utoipa::path(
    get,
    path = "/api/v1/stock-alerts",
    summary = "Low stock",
    description = "Active items at or below their reorder level",
    responses(
        (status = 200, description = "Items to reorder", body = ApiResponse<Vec<stock_item::Model>>),
    ),
    security(("Bearer" = [])),
    tag = "inventory"
)]
pub async fn low_stock(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Vec<stock_item::Model>> {
    let items = state.services.inventory.low_stock(auth_user.tenant()?).await?;
    Ok(Json(ApiResponse::success(items)))
}

#[utoipa::path(
    get,
    path = "/api/v1/stock-items/{id}/movements",
    summary = "Stock movements",
    params(("id" = Uuid, Path, description = "Stock item ID")),
    responses(
        (status = 200, description = "Movements, newest first", body = ApiResponse<Vec<stock_movement::Model>>),
        (status = 404, description = "Stock item not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "inventory"
)]
pub async fn list_movements(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<stock_movement::Model>> {
    let movements = state
        .services
        .inventory
        .movements(auth_user.tenant()?, id)
        .await?;
    Ok(Json(ApiResponse::success(movements)))
}

#[utoipa::path(
    post,
    path = "/api/v1/stock-items/{id}/adjust",
    summary = "Adjust stock",
    description = "Stock count correction; a reason is required",
    params(("id" = Uuid, Path, description = "Stock item ID")),
    request_body = AdjustStockRequest,
    responses(
        (status = 200, description = "Stock adjusted", body = ApiResponse<stock_item::Model>),
        (status = 400, description = "Zero change or missing reason", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "inventory"
)]
pub async fn adjust_stock(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdjustStockRequest>,
) -> ApiResult<stock_item::Model> {
    let item = state
        .services
        .inventory
        .adjust_stock(auth_user.tenant()?, id, auth_user.user_id, payload)
        .await?;
    Ok(Json(ApiResponse::success(item)))
}

#[utoipa::path(
    post,
    path = "/api/v1/stock-items/{id}/wastage",
    summary = "Record wastage",
    description = "Reduces stock and books the loss at average cost",
    params(("id" = Uuid, Path, description = "Stock item ID")),
    request_body = WastageRequest,
    responses(
        (status = 200, description = "Wastage recorded", body = ApiResponse<stock_item::Model>),
        (status = 400, description = "Non-positive quantity", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "inventory"
)]
pub async fn record_wastage(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<WastageRequest>,
) -> ApiResult<stock_item::Model> {
    let item = state
        .services
        .inventory
        .record_wastage(auth_user.tenant()?, id, auth_user.user_id, payload)
        .await?;
    Ok(Json(ApiResponse::success(item)))
}

#[utoipa::path(
    get,
    path = "/api/v1/vendors",
    summary = "List vendors",
    responses(
        (status = 200, description = "Vendors", body = ApiResponse<Vec<vendor::Model>>),
    ),
    security(("Bearer" = [])),
    tag = "inventory"
)]
pub async fn list_vendors(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Vec<vendor::Model>> {
    let vendors = state
        .services
        .inventory
        .list_vendors(auth_user.tenant()?)
        .await?;
    Ok(Json(ApiResponse::success(vendors)))
}

#[utoipa::path(
    post,
    path = "/api/v1/vendors",
    summary = "Create vendor",
    request_body = CreateVendorRequest,
    responses(
        (status = 201, description = "Vendor created", body = ApiResponse<vendor::Model>),
        (status = 400, description = "Invalid PAN", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "inventory"
)]
pub async fn create_vendor(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<CreateVendorRequest>,
) -> Result<(StatusCode, Json<ApiResponse<vendor::Model>>), ServiceError> {
    let vendor = state
        .services
        .inventory
        .create_vendor(auth_user.tenant()?, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(vendor))))
}

#[utoipa::path(
    get,
    path = "/api/v1/purchases",
    summary = "List purchases",
    params(DateRangeParams),
    responses(
        (status = 200, description = "Purchases in the period", body = ApiResponse<Vec<purchase::Model>>),
        (status = 400, description = "Invalid date range", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "inventory"
)]
pub async fn list_purchases(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(range): Query<DateRangeParams>,
) -> ApiResult<Vec<purchase::Model>> {
    let (from, to) = range.resolve(business_date(Utc::now()))?;
    let purchases = state
        .services
        .inventory
        .list_purchases(auth_user.tenant()?, from, to)
        .await?;
    Ok(Json(ApiResponse::success(purchases)))
}

#[utoipa::path(
    post,
    path = "/api/v1/purchases",
    summary = "Record purchase",
    description = "Receives stock at cost and posts the purchase voucher",
    request_body = RecordPurchaseRequest,
    responses(
        (status = 201, description = "Purchase recorded", body = ApiResponse<PurchaseWithLines>),
        (status = 400, description = "Invalid lines", body = crate::errors::ErrorResponse),
        (status = 409, description = "Vendor bill already recorded", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "inventory"
)]
pub async fn record_purchase(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<RecordPurchaseRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PurchaseWithLines>>), ServiceError> {
    let purchase = state
        .services
        .inventory
        .record_purchase(auth_user.tenant()?, auth_user.user_id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(purchase))))
}

#[utoipa::path(
    get,
    path = "/api/v1/purchases/{id}",
    summary = "Get purchase",
    params(("id" = Uuid, Path, description = "Purchase ID")),
    responses(
        (status = 200, description = "Purchase with lines", body = ApiResponse<PurchaseWithLines>),
        (status = 404, description = "Purchase not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "inventory"
)]
pub async fn get_purchase(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<PurchaseWithLines> {
    let purchase = state
        .services
        .inventory
        .get_purchase(auth_user.tenant()?, id)
        .await?;
    Ok(Json(ApiResponse::success(purchase)))
}
