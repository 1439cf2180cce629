//! IRD reporting: manual CBMS retries and the sales register.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    auth::{consts as perm, AuthRouterExt, AuthUser},
    common::DateRangeParams,
    entities::bill,
    services::compliance::{business_date, SalesRegisterEntry, SyncSummary},
    ApiResponse, ApiResult, AppState,
};

pub fn compliance_routes() -> Router<AppState> {
    let sync = Router::new()
        .route("/compliance/bills/:id/sync", post(sync_bill))
        .route("/compliance/sync-pending", post(sync_pending))
        .with_permission(perm::COMPLIANCE_SYNC);
    let read = Router::new()
        .route("/compliance/sales-register", get(sales_register))
        .with_permission(perm::COMPLIANCE_READ);
    Router::new().merge(sync).merge(read)
}

#[utoipa::path(
    post,
    path = "/api/v1/compliance/bills/{id}/sync",
    summary = "Report a bill to CBMS",
    description = "Sends the invoice, or its credit note if void; reported bills are left alone",
    params(("id" = Uuid, Path, description = "Bill ID")),
    responses(
        (status = 200, description = "Bill with its CBMS status", body = ApiResponse<bill::Model>),
        (status = 400, description = "CBMS not configured", body = crate::errors::ErrorResponse),
        (status = 404, description = "Bill not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "compliance"
)]
pub async fn sync_bill(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<bill::Model> {
    let bill = state
        .services
        .compliance
        .sync_bill(auth_user.tenant()?, id, false)
        .await?;
    Ok(Json(ApiResponse::success(bill)))
}

#[utoipa::path(
    post,
    path = "/api/v1/compliance/sync-pending",
    summary = "Retry unreported bills",
    responses(
        (status = 200, description = "Attempted, synced and failed counts", body = ApiResponse<SyncSummary>),
        (status = 400, description = "CBMS not configured", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "compliance"
)]
pub async fn sync_pending(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<SyncSummary> {
    let summary = state
        .services
        .compliance
        .sync_pending(auth_user.tenant()?)
        .await?;
    Ok(Json(ApiResponse::success(summary)))
}

#[utoipa::path(
    get,
    path = "/api/v1/compliance/sales-register",
    summary = "Sales register",
    description = "Every invoice in the period, void ones included, in invoice order",
    params(DateRangeParams),
    responses(
        (status = 200, description = "Sales book rows", body = ApiResponse<Vec<SalesRegisterEntry>>),
        (status = 400, description = "Invalid date range", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "compliance"
)]
pub async fn sales_register(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(range): Query<DateRangeParams>,
) -> ApiResult<Vec<SalesRegisterEntry>> {
    let (from, to) = range.resolve(business_date(Utc::now()))?;
    let rows = state
        .services
        .compliance
        .sales_register(auth_user.tenant()?, from, to)
        .await?;
    Ok(Json(ApiResponse::success(rows)))
}
