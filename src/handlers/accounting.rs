use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    auth::{consts as perm, AuthRouterExt, AuthUser},
    common::{DateRangeParams, PaginationParams},
    entities::{account, voucher},
    errors::ServiceError,
    services::{
        accounting::{
            AccountLedger, CreateAccountRequest, CreateVoucherRequest, ProfitAndLoss,
            TrialBalance, UpdateDraftRequest, VoucherListParams, VoucherWithLines,
        },
        compliance::business_date,
    },
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelVoucherRequest {
    pub reason: String,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AsOfQuery {
    /// Defaults to today
    pub as_of: Option<NaiveDate>,
}

pub fn accounting_routes() -> Router<AppState> {
    let read_accounts = Router::new()
        .route("/accounts", get(list_accounts))
        .route("/accounts/:id/ledger", get(account_ledger))
        .route("/reports/trial-balance", get(trial_balance))
        .route("/reports/profit-and-loss", get(profit_and_loss))
        .with_permission(perm::ACCOUNTS_READ);
    let create_accounts = Router::new()
        .route("/accounts", post(create_account))
        .route("/chart-of-accounts/seed", post(seed_chart))
        .with_permission(perm::ACCOUNTS_CREATE);
    let read_vouchers = Router::new()
        .route("/vouchers", get(list_vouchers))
        .route("/vouchers/:id", get(get_voucher))
        .with_permission(perm::VOUCHERS_READ);
    let create_vouchers = Router::new()
        .route("/vouchers", post(create_voucher))
        .route("/vouchers/:id", put(update_draft).delete(delete_draft))
        .with_permission(perm::VOUCHERS_CREATE);
    let post_vouchers = Router::new()
        .route("/vouchers/:id/post", post(post_voucher))
        .with_permission(perm::VOUCHERS_POST);
    let cancel_vouchers = Router::new()
        .route("/vouchers/:id/cancel", post(cancel_voucher))
        .with_permission(perm::VOUCHERS_CANCEL);

    Router::new()
        .merge(read_accounts)
        .merge(create_accounts)
        .merge(read_vouchers)
        .merge(create_vouchers)
        .merge(post_vouchers)
        .merge(cancel_vouchers)
}

#[utoipa::path(
    get,
    path = "/api/v1/accounts",
    summary = "Chart of accounts",
    responses(
        (status = 200, description = "Accounts ordered by code", body = ApiResponse<Vec<account::Model>>),
    ),
    security(("Bearer" = [])),
    tag = "accounting"
)]
pub async fn list_accounts(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Vec<account::Model>> {
    let accounts = state
        .services
        .accounting
        .list_accounts(auth_user.tenant()?)
        .await?;
    Ok(Json(ApiResponse::success(accounts)))
}

#[utoipa::path(
    post,
    path = "/api/v1/accounts",
    summary = "Create account",
    request_body = CreateAccountRequest,
    responses(
        (status = 201, description = "Account created", body = ApiResponse<account::Model>),
        (status = 400, description = "Invalid parent or type", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already used", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "accounting"
)]
pub async fn create_account(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<ApiResponse<account::Model>>), ServiceError> {
    let account = state
        .services
        .accounting
        .create_account(auth_user.tenant()?, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(account))))
}

#[utoipa::path(
    post,
    path = "/api/v1/chart-of-accounts/seed",
    summary = "Seed default chart",
    description = "Creates any missing default accounts; existing ones are left alone",
    responses(
        (status = 200, description = "Chart after seeding", body = ApiResponse<Vec<account::Model>>),
    ),
    security(("Bearer" = [])),
    tag = "accounting"
)]
pub async fn seed_chart(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Vec<account::Model>> {
    let accounts = state
        .services
        .accounting
        .seed_default_chart(auth_user.tenant()?)
        .await?;
    Ok(Json(ApiResponse::success(accounts)))
}

#[utoipa::path(
    get,
    path = "/api/v1/accounts/{id}/ledger",
    summary = "Account ledger",
    params(("id" = Uuid, Path, description = "Account ID"), DateRangeParams),
    responses(
        (status = 200, description = "Posted entries with running balance", body = ApiResponse<AccountLedger>),
        (status = 404, description = "Account not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "accounting"
)]
pub async fn account_ledger(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Query(range): Query<DateRangeParams>,
) -> ApiResult<AccountLedger> {
    let (from, to) = range.resolve(business_date(Utc::now()))?;
    let ledger = state
        .services
        .accounting
        .account_ledger(auth_user.tenant()?, id, from, to)
        .await?;
    Ok(Json(ApiResponse::success(ledger)))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/trial-balance",
    summary = "Trial balance",
    params(AsOfQuery),
    responses(
        (status = 200, description = "Posted balances per account", body = ApiResponse<TrialBalance>),
    ),
    security(("Bearer" = [])),
    tag = "accounting"
)]
pub async fn trial_balance(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<AsOfQuery>,
) -> ApiResult<TrialBalance> {
    let as_of = query.as_of.unwrap_or_else(|| business_date(Utc::now()));
    let balance = state
        .services
        .accounting
        .trial_balance(auth_user.tenant()?, as_of)
        .await?;
    Ok(Json(ApiResponse::success(balance)))
}

#[utoipa::path(
    get,
    path = "/api/v1/reports/profit-and-loss",
    summary = "Profit and loss",
    params(DateRangeParams),
    responses(
        (status = 200, description = "Income and expenses for the period", body = ApiResponse<ProfitAndLoss>),
        (status = 400, description = "Invalid date range", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "accounting"
)]
pub async fn profit_and_loss(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(range): Query<DateRangeParams>,
) -> ApiResult<ProfitAndLoss> {
    let (from, to) = range.resolve(business_date(Utc::now()))?;
    let report = state
        .services
        .accounting
        .profit_and_loss(auth_user.tenant()?, from, to)
        .await?;
    Ok(Json(ApiResponse::success(report)))
}

#[utoipa::path(
    get,
    path = "/api/v1/vouchers",
    summary = "List vouchers",
    params(VoucherListParams, PaginationParams),
    responses(
        (status = 200, description = "Vouchers, newest first", body = ApiResponse<PaginatedResponse<voucher::Model>>),
    ),
    security(("Bearer" = [])),
    tag = "accounting"
)]
pub async fn list_vouchers(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(params): Query<VoucherListParams>,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<PaginatedResponse<voucher::Model>> {
    let (vouchers, total) = state
        .services
        .accounting
        .list_vouchers(auth_user.tenant()?, params, pagination.clone())
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        vouchers,
        total,
        &pagination,
    ))))
}

#[utoipa::path(
    post,
    path = "/api/v1/vouchers",
    summary = "Create voucher",
    description = "Saved as a draft unless post_now is set; debits must equal credits",
    request_body = CreateVoucherRequest,
    responses(
        (status = 201, description = "Voucher created", body = ApiResponse<VoucherWithLines>),
        (status = 400, description = "Invalid lines", body = crate::errors::ErrorResponse),
        (status = 422, description = "Debits and credits differ", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "accounting"
)]
pub async fn create_voucher(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<CreateVoucherRequest>,
) -> Result<(StatusCode, Json<ApiResponse<VoucherWithLines>>), ServiceError> {
    let voucher = state
        .services
        .accounting
        .create_voucher(auth_user.tenant()?, auth_user.user_id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(voucher))))
}

#[utoipa::path(
    get,
    path = "/api/v1/vouchers/{id}",
    summary = "Get voucher",
    params(("id" = Uuid, Path, description = "Voucher ID")),
    responses(
        (status = 200, description = "Voucher with lines", body = ApiResponse<VoucherWithLines>),
        (status = 404, description = "Voucher not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "accounting"
)]
pub async fn get_voucher(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<VoucherWithLines> {
    let voucher = state
        .services
        .accounting
        .get_voucher(auth_user.tenant()?, id)
        .await?;
    Ok(Json(ApiResponse::success(voucher)))
}

#[utoipa::path(
    put,
    path = "/api/v1/vouchers/{id}",
    summary = "Edit draft voucher",
    params(("id" = Uuid, Path, description = "Voucher ID")),
    request_body = UpdateDraftRequest,
    responses(
        (status = 200, description = "Draft updated", body = ApiResponse<VoucherWithLines>),
        (status = 400, description = "Voucher is not a draft", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "accounting"
)]
pub async fn update_draft(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateDraftRequest>,
) -> ApiResult<VoucherWithLines> {
    let voucher = state
        .services
        .accounting
        .update_draft(auth_user.tenant()?, id, payload)
        .await?;
    Ok(Json(ApiResponse::success(voucher)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/vouchers/{id}",
    summary = "Delete draft voucher",
    params(("id" = Uuid, Path, description = "Voucher ID")),
    responses(
        (status = 204, description = "Draft deleted"),
        (status = 400, description = "Voucher is not a draft", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "accounting"
)]
pub async fn delete_draft(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    state
        .services
        .accounting
        .delete_draft(auth_user.tenant()?, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/v1/vouchers/{id}/post",
    summary = "Post voucher",
    description = "Writes the ledger entries; posted vouchers are immutable",
    params(("id" = Uuid, Path, description = "Voucher ID")),
    responses(
        (status = 200, description = "Voucher posted", body = ApiResponse<VoucherWithLines>),
        (status = 400, description = "Voucher is not a draft", body = crate::errors::ErrorResponse),
        (status = 422, description = "Debits and credits differ", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "accounting"
)]
pub async fn post_voucher(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<VoucherWithLines> {
    let voucher = state
        .services
        .accounting
        .post_voucher(auth_user.tenant()?, id)
        .await?;
    Ok(Json(ApiResponse::success(voucher)))
}

#[utoipa::path(
    post,
    path = "/api/v1/vouchers/{id}/cancel",
    summary = "Cancel voucher",
    description = "Marks the voucher and its ledger entries cancelled; nothing is deleted",
    params(("id" = Uuid, Path, description = "Voucher ID")),
    request_body = CancelVoucherRequest,
    responses(
        (status = 200, description = "Voucher cancelled", body = ApiResponse<voucher::Model>),
        (status = 400, description = "Already cancelled or missing reason", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "accounting"
)]
pub async fn cancel_voucher(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelVoucherRequest>,
) -> ApiResult<voucher::Model> {
    let voucher = state
        .services
        .accounting
        .cancel_voucher(auth_user.tenant()?, id, payload.reason)
        .await?;
    Ok(Json(ApiResponse::success(voucher)))
}
