use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;

use crate::{
    auth::{consts as perm, AuthRouterExt, AuthUser},
    common::DateRangeParams,
    services::{
        compliance::business_date,
        reports::{Dashboard, ItemSales, SalesSummary},
    },
    ApiResponse, ApiResult, AppState,
};

pub fn report_routes() -> Router<AppState> {
    let reports = Router::new()
        .route("/reports/sales-summary", get(sales_summary))
        .route("/reports/item-sales", get(item_sales))
        .with_permission(perm::REPORTS_READ);
    let dashboard = Router::new()
        .route("/dashboard", get(dashboard))
        .with_permission(perm::DASHBOARD_READ);
    Router::new().merge(reports).merge(dashboard)
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/sales-summary",
    summary = "Sales summary",
    description = "Paid bills only, split by payment method",
    params(DateRangeParams),
    responses(
        (status = 200, description = "Totals for the period", body = ApiResponse<SalesSummary>),
        (status = 400, description = "Invalid date range", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "reports"
)]
pub async fn sales_summary(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(range): Query<DateRangeParams>,
) -> ApiResult<SalesSummary> {
    let (from, to) = range.resolve(business_date(Utc::now()))?;
    let summary = state
        .services
        .reports
        .sales_summary(auth_user.tenant()?, from, to)
        .await?;
    Ok(Json(ApiResponse::success(summary)))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/item-sales",
    summary = "Item sales",
    params(DateRangeParams),
    responses(
        (status = 200, description = "Menu items by revenue", body = ApiResponse<Vec<ItemSales>>),
        (status = 400, description = "Invalid date range", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "reports"
)]
pub async fn item_sales(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(range): Query<DateRangeParams>,
) -> ApiResult<Vec<ItemSales>> {
    let (from, to) = range.resolve(business_date(Utc::now()))?;
    let rows = state
        .services
        .reports
        .item_sales(auth_user.tenant()?, from, to)
        .await?;
    Ok(Json(ApiResponse::success(rows)))
}

#[utoipa::path(
    get,
    path = "/api/v1/dashboard",
    summary = "Dashboard",
    description = "Live counters; money figures only for roles that handle money",
    responses(
        (status = 200, description = "Counters", body = ApiResponse<Dashboard>),
    ),
    security(("Bearer" = [])),
    tag = "reports"
)]
pub async fn dashboard(State(state): State<AppState>, auth_user: AuthUser) -> ApiResult<Dashboard> {
    let dashboard = state
        .services
        .reports
        .dashboard(auth_user.tenant()?, auth_user.role.clone())
        .await?;
    Ok(Json(ApiResponse::success(dashboard)))
}
