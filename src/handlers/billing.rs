use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::{
    auth::{consts as perm, AuthRouterExt, AuthUser},
    common::PaginationParams,
    entities::bill,
    errors::ServiceError,
    services::billing::{
        BillListParams, BillWithLines, GenerateBillRequest, PrintedBill, VoidBillRequest,
    },
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};

pub fn billing_routes() -> Router<AppState> {
    let read = Router::new()
        .route("/bills", get(list_bills))
        .route("/bills/:id", get(get_bill))
        .route("/sessions/:id/bill", get(session_bill))
        .with_permission(perm::BILLS_READ);
    let create = Router::new()
        .route("/sessions/:id/bill", post(generate_bill))
        .with_permission(perm::BILLS_CREATE);
    let print = Router::new()
        .route("/bills/:id/print", post(print_bill))
        .with_permission(perm::BILLS_PRINT);
    let void = Router::new()
        .route("/bills/:id/void", post(void_bill))
        .with_permission(perm::BILLS_VOID);

    Router::new()
        .merge(read)
        .merge(create)
        .merge(print)
        .merge(void)
}

#[utoipa::path(
    post,
    path = "/api/v1/sessions/{id}/bill",
    summary = "Generate the bill",
    description = "Issues the tax invoice for everything served at the table",
    params(("id" = Uuid, Path, description = "Session ID")),
    request_body = GenerateBillRequest,
    responses(
        (status = 201, description = "Invoice issued", body = ApiResponse<BillWithLines>),
        (status = 400, description = "Orders still open or invalid discount", body = crate::errors::ErrorResponse),
        (status = 409, description = "Session already has a bill", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "billing"
)]
pub async fn generate_bill(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<GenerateBillRequest>,
) -> Result<(StatusCode, Json<ApiResponse<BillWithLines>>), ServiceError> {
    let bill = state
        .services
        .billing
        .generate_bill(auth_user.tenant()?, id, auth_user.user_id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(bill))))
}

#[utoipa::path(
    get,
    path = "/api/v1/sessions/{id}/bill",
    summary = "Bill of a session",
    params(("id" = Uuid, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Current bill", body = ApiResponse<BillWithLines>),
        (status = 404, description = "No bill yet", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "billing"
)]
pub async fn session_bill(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<BillWithLines> {
    let bill = state
        .services
        .billing
        .session_bill(auth_user.tenant()?, id)
        .await?;
    Ok(Json(ApiResponse::success(bill)))
}

#[utoipa::path(
    get,
    path = "/api/v1/bills",
    summary = "List bills",
    params(BillListParams, PaginationParams),
    responses(
        (status = 200, description = "Bills, newest first", body = ApiResponse<PaginatedResponse<bill::Model>>),
        (status = 400, description = "Invalid date range", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "billing"
)]
pub async fn list_bills(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(params): Query<BillListParams>,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<PaginatedResponse<bill::Model>> {
    let (bills, total) = state
        .services
        .billing
        .list_bills(auth_user.tenant()?, params, pagination.clone())
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        bills,
        total,
        &pagination,
    ))))
}

#[utoipa::path(
    get,
    path = "/api/v1/bills/{id}",
    summary = "Get bill",
    params(("id" = Uuid, Path, description = "Bill ID")),
    responses(
        (status = 200, description = "Bill with lines and payments", body = ApiResponse<BillWithLines>),
        (status = 404, description = "Bill not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "billing"
)]
pub async fn get_bill(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<BillWithLines> {
    let bill = state.services.billing.get_bill(auth_user.tenant()?, id).await?;
    Ok(Json(ApiResponse::success(bill)))
}

#[utoipa::path(
    post,
    path = "/api/v1/bills/{id}/print",
    summary = "Print bill",
    description = "The first print is the original; later prints are marked as copies",
    params(("id" = Uuid, Path, description = "Bill ID")),
    responses(
        (status = 200, description = "Printable bill", body = ApiResponse<PrintedBill>),
        (status = 400, description = "Bill is void", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "billing"
)]
pub async fn print_bill(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<PrintedBill> {
    let printed = state
        .services
        .billing
        .print_bill(auth_user.tenant()?, id)
        .await?;
    Ok(Json(ApiResponse::success(printed)))
}

#[utoipa::path(
    post,
    path = "/api/v1/bills/{id}/void",
    summary = "Void bill",
    description = "Only unpaid bills; the invoice number stays used and a return is reported to CBMS",
    params(("id" = Uuid, Path, description = "Bill ID")),
    request_body = VoidBillRequest,
    responses(
        (status = 200, description = "Bill voided", body = ApiResponse<bill::Model>),
        (status = 400, description = "Bill has payments", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "billing"
)]
pub async fn void_bill(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<VoidBillRequest>,
) -> ApiResult<bill::Model> {
    let bill = state
        .services
        .billing
        .void_bill(auth_user.tenant()?, id, auth_user.user_id, payload)
        .await?;
    Ok(Json(ApiResponse::success(bill)))
}
