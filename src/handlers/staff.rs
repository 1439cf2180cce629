use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::{
    auth::{consts as perm, AuthRouterExt, AuthUser},
    errors::ServiceError,
    services::staff::{CreateStaffRequest, StaffView},
    ApiResponse, ApiResult, AppState,
};

pub fn staff_routes() -> Router<AppState> {
    let read = Router::new()
        .route("/staff", get(list_staff))
        .with_permission(perm::STAFF_READ);
    let manage = Router::new()
        .route("/staff", post(create_staff))
        .route("/staff/:id/deactivate", post(deactivate_staff))
        .with_permission(perm::STAFF_MANAGE);
    Router::new().merge(read).merge(manage)
}

#[utoipa::path(
    get,
    path = "/api/v1/staff",
    summary = "List staff",
    responses(
        (status = 200, description = "Staff of the restaurant", body = ApiResponse<Vec<StaffView>>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "staff"
)]
pub async fn list_staff(State(state): State<AppState>, auth_user: AuthUser) -> ApiResult<Vec<StaffView>> {
    let staff = state.services.staff.list_staff(auth_user.tenant()?).await?;
    Ok(Json(ApiResponse::success(staff)))
}

#[utoipa::path(
    post,
    path = "/api/v1/staff",
    summary = "Create staff account",
    description = "Roles above the caller's own cannot be granted",
    request_body = CreateStaffRequest,
    responses(
        (status = 201, description = "Staff created", body = ApiResponse<StaffView>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 403, description = "Role not allowed", body = crate::errors::ErrorResponse),
        (status = 409, description = "Email already in use", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "staff"
)]
pub async fn create_staff(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<CreateStaffRequest>,
) -> Result<(StatusCode, Json<ApiResponse<StaffView>>), ServiceError> {
    let staff = state.services.staff.create_staff(&auth_user, payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(staff))))
}

#[utoipa::path(
    post,
    path = "/api/v1/staff/{id}/deactivate",
    summary = "Deactivate staff account",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Account deactivated", body = ApiResponse<StaffView>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "User not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "staff"
)]
pub async fn deactivate_staff(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StaffView> {
    let staff = state.services.staff.deactivate_staff(&auth_user, id).await?;
    Ok(Json(ApiResponse::success(staff)))
}
