use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::{AuthRouterExt, AuthUser},
    entities::user::StaffRole,
    services::staff::{LoginRequest, LoginResponse},
    ApiResponse, ApiResult, AppState,
};

/// Identity carried by the caller's token
#[derive(Debug, Serialize, ToSchema)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub role: StaffRole,
    pub restaurant_id: Option<Uuid>,
    pub permissions: Vec<String>,
}

pub fn auth_routes() -> Router<AppState> {
    let me = Router::new().route("/me", get(me)).with_auth();
    Router::new().route("/login", post(login)).merge(me)
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    summary = "Staff login",
    description = "Exchange email and password for a bearer token",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = ApiResponse<LoginResponse>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid credentials or inactive account", body = crate::errors::ErrorResponse),
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<LoginResponse> {
    let response = state.services.staff.login(payload).await?;
    Ok(Json(ApiResponse::success(response)))
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    summary = "Current user",
    responses(
        (status = 200, description = "Identity of the token holder", body = ApiResponse<CurrentUser>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "auth"
)]
pub async fn me(auth_user: AuthUser) -> ApiResult<CurrentUser> {
    Ok(Json(ApiResponse::success(CurrentUser {
        user_id: auth_user.user_id,
        name: auth_user.name,
        email: auth_user.email,
        role: auth_user.role,
        restaurant_id: auth_user.restaurant_id,
        permissions: auth_user.permissions,
    })))
}
