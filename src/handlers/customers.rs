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
    common::PaginationParams,
    entities::{customer, loyalty_transaction},
    errors::ServiceError,
    services::loyalty::{AdjustPointsRequest, CreateCustomerRequest},
    ApiResponse, ApiResult, AppState, PaginatedResponse,
};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PhoneQuery {
    /// Mobile number, with or without the 977 prefix
    pub phone: String,
}

pub fn customer_routes() -> Router<AppState> {
    let read = Router::new()
        .route("/customers", get(list_customers))
        .route("/customers/:id", get(get_customer))
        .route("/customer-lookup", get(find_by_phone))
        .with_permission(perm::CUSTOMERS_READ);
    let manage = Router::new()
        .route("/customers", post(create_customer))
        .with_permission(perm::CUSTOMERS_MANAGE);
    let history = Router::new()
        .route("/customers/:id/loyalty", get(loyalty_history))
        .with_permission(perm::LOYALTY_READ);
    let adjust = Router::new()
        .route("/customers/:id/points", post(adjust_points))
        .with_permission(perm::LOYALTY_ADJUST);

    Router::new()
        .merge(read)
        .merge(manage)
        .merge(history)
        .merge(adjust)
}

#[utoipa::path(
    get,
    path = "/api/v1/customers",
    summary = "List loyalty customers",
    params(PaginationParams),
    responses(
        (status = 200, description = "Customers", body = ApiResponse<PaginatedResponse<customer::Model>>),
    ),
    security(("Bearer" = [])),
    tag = "loyalty"
)]
pub async fn list_customers(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<PaginatedResponse<customer::Model>> {
    let (customers, total) = state
        .services
        .loyalty
        .list_customers(auth_user.tenant()?, pagination.clone())
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        customers,
        total,
        &pagination,
    ))))
}

#[utoipa::path(
    post,
    path = "/api/v1/customers",
    summary = "Register customer",
    request_body = CreateCustomerRequest,
    responses(
        (status = 201, description = "Customer registered", body = ApiResponse<customer::Model>),
        (status = 400, description = "Invalid phone number", body = crate::errors::ErrorResponse),
        (status = 409, description = "Phone already registered", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "loyalty"
)]
pub async fn create_customer(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<CreateCustomerRequest>,
) -> Result<(StatusCode, Json<ApiResponse<customer::Model>>), ServiceError> {
    let customer = state
        .services
        .loyalty
        .create_customer(auth_user.tenant()?, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(customer))))
}

#[utoipa::path(
    get,
    path = "/api/v1/customer-lookup",
    summary = "Find customer by phone",
    params(PhoneQuery),
    responses(
        (status = 200, description = "Customer", body = ApiResponse<customer::Model>),
        (status = 404, description = "No customer with this phone", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "loyalty"
)]
pub async fn find_by_phone(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<PhoneQuery>,
) -> ApiResult<customer::Model> {
    let customer = state
        .services
        .loyalty
        .find_by_phone(auth_user.tenant()?, &query.phone)
        .await?;
    Ok(Json(ApiResponse::success(customer)))
}

#[utoipa::path(
    get,
    path = "/api/v1/customers/{id}",
    summary = "Get customer",
    params(("id" = Uuid, Path, description = "Customer ID")),
    responses(
        (status = 200, description = "Customer", body = ApiResponse<customer::Model>),
        (status = 404, description = "Customer not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "loyalty"
)]
pub async fn get_customer(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<customer::Model> {
    let customer = state
        .services
        .loyalty
        .get_customer(auth_user.tenant()?, id)
        .await?;
    Ok(Json(ApiResponse::success(customer)))
}

#[utoipa::path(
    get,
    path = "/api/v1/customers/{id}/loyalty",
    summary = "Points history",
    params(("id" = Uuid, Path, description = "Customer ID")),
    responses(
        (status = 200, description = "Loyalty transactions, newest first", body = ApiResponse<Vec<loyalty_transaction::Model>>),
        (status = 404, description = "Customer not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "loyalty"
)]
pub async fn loyalty_history(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<loyalty_transaction::Model>> {
    let history = state.services.loyalty.history(auth_user.tenant()?, id).await?;
    Ok(Json(ApiResponse::success(history)))
}

#[utoipa::path(
    post,
    path = "/api/v1/customers/{id}/points",
    summary = "Adjust points",
    description = "Manual correction; the balance may not go negative",
    params(("id" = Uuid, Path, description = "Customer ID")),
    request_body = AdjustPointsRequest,
    responses(
        (status = 200, description = "Balance updated", body = ApiResponse<customer::Model>),
        (status = 400, description = "Balance would go negative", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "loyalty"
)]
pub async fn adjust_points(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdjustPointsRequest>,
) -> ApiResult<customer::Model> {
    let customer = state
        .services
        .loyalty
        .adjust_points(auth_user.tenant()?, id, auth_user.user_id, payload)
        .await?;
    Ok(Json(ApiResponse::success(customer)))
}
