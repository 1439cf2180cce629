//! Floor plan and table sessions as seen by staff.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{consts as perm, AuthRouterExt, AuthUser},
    entities::{
        dining_table,
        table_session::{self, SessionOrigin},
    },
    errors::ServiceError,
    services::tables::{
        AttachCustomerRequest, CreateTableRequest, MoveSessionRequest, OpenSessionRequest, QrCode,
        TableWithSession,
    },
    ApiResponse, ApiResult, AppState,
};

pub fn table_routes() -> Router<AppState> {
    let read = Router::new()
        .route("/tables", get(list_tables))
        .with_permission(perm::TABLES_READ);
    let manage = Router::new()
        .route("/tables", post(create_table))
        .route("/tables/:id/qr", get(get_qr).post(regenerate_qr))
        .with_permission(perm::TABLES_MANAGE);
    let sessions = Router::new()
        .route("/tables/:id/sessions", post(open_session))
        .route("/tables/:id/clean", post(mark_cleaned))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/request-bill", post(request_bill))
        .route("/sessions/:id/customer", post(attach_customer))
        .route("/sessions/:id/cancel", post(cancel_session))
        .route("/sessions/:id/move", post(move_session))
        .with_permission(perm::SESSIONS_MANAGE);

    Router::new().merge(read).merge(manage).merge(sessions)
}

#[utoipa::path(
    get,
    path = "/api/v1/tables",
    summary = "List tables",
    description = "Every table with the session currently holding it",
    responses(
        (status = 200, description = "Floor plan", body = ApiResponse<Vec<TableWithSession>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "tables"
)]
pub async fn list_tables(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Vec<TableWithSession>> {
    let tables = state.services.tables.list_tables(auth_user.tenant()?).await?;
    Ok(Json(ApiResponse::success(tables)))
}

#[utoipa::path(
    post,
    path = "/api/v1/tables",
    summary = "Create table",
    request_body = CreateTableRequest,
    responses(
        (status = 201, description = "Table created", body = ApiResponse<dining_table::Model>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 409, description = "Table name already used", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "tables"
)]
pub async fn create_table(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<CreateTableRequest>,
) -> Result<(StatusCode, Json<ApiResponse<dining_table::Model>>), ServiceError> {
    let table = state
        .services
        .tables
        .create_table(auth_user.tenant()?, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(table))))
}

#[utoipa::path(
    get,
    path = "/api/v1/tables/{id}/qr",
    summary = "Table QR code",
    params(("id" = Uuid, Path, description = "Table ID")),
    responses(
        (status = 200, description = "Current QR token and link", body = ApiResponse<QrCode>),
        (status = 404, description = "Table not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "tables"
)]
pub async fn get_qr(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<QrCode> {
    let qr = state.services.tables.get_qr(auth_user.tenant()?, id).await?;
    Ok(Json(ApiResponse::success(qr)))
}

#[utoipa::path(
    post,
    path = "/api/v1/tables/{id}/qr",
    summary = "Regenerate table QR code",
    description = "Issues a new token; previously printed codes stop working",
    params(("id" = Uuid, Path, description = "Table ID")),
    responses(
        (status = 200, description = "New QR token and link", body = ApiResponse<QrCode>),
        (status = 404, description = "Table not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "tables"
)]
pub async fn regenerate_qr(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<QrCode> {
    let qr = state
        .services
        .tables
        .regenerate_qr(auth_user.tenant()?, id)
        .await?;
    Ok(Json(ApiResponse::success(qr)))
}

#[utoipa::path(
    post,
    path = "/api/v1/tables/{id}/sessions",
    summary = "Seat guests",
    params(("id" = Uuid, Path, description = "Table ID")),
    request_body = OpenSessionRequest,
    responses(
        (status = 201, description = "Session opened", body = ApiResponse<table_session::Model>),
        (status = 409, description = "Table is not available", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "sessions"
)]
pub async fn open_session(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<OpenSessionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<table_session::Model>>), ServiceError> {
    payload.validate()?;
    let session = state
        .services
        .tables
        .open_session(
            auth_user.tenant()?,
            id,
            SessionOrigin::Staff,
            payload.guest_count,
            Some(auth_user.user_id),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(session))))
}

#[utoipa::path(
    post,
    path = "/api/v1/tables/{id}/clean",
    summary = "Mark table cleaned",
    description = "Closes the paid session and frees the table",
    params(("id" = Uuid, Path, description = "Table ID")),
    responses(
        (status = 200, description = "Table available", body = ApiResponse<dining_table::Model>),
        (status = 400, description = "Table is not being cleaned", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "tables"
)]
pub async fn mark_cleaned(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<dining_table::Model> {
    let table = state
        .services
        .tables
        .mark_cleaned(auth_user.tenant()?, id)
        .await?;
    Ok(Json(ApiResponse::success(table)))
}

#[utoipa::path(
    get,
    path = "/api/v1/sessions/{id}",
    summary = "Get session",
    params(("id" = Uuid, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Session", body = ApiResponse<table_session::Model>),
        (status = 404, description = "Session not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "sessions"
)]
pub async fn get_session(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<table_session::Model> {
    let session = state
        .services
        .tables
        .get_session(auth_user.tenant()?, id)
        .await?;
    Ok(Json(ApiResponse::success(session)))
}

#[utoipa::path(
    post,
    path = "/api/v1/sessions/{id}/request-bill",
    summary = "Request the bill",
    params(("id" = Uuid, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Bill requested", body = ApiResponse<table_session::Model>),
        (status = 400, description = "Session is not active", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "sessions"
)]
pub async fn request_bill(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<table_session::Model> {
    let session = state
        .services
        .tables
        .request_bill(auth_user.tenant()?, id)
        .await?;
    Ok(Json(ApiResponse::success(session)))
}

#[utoipa::path(
    post,
    path = "/api/v1/sessions/{id}/customer",
    summary = "Attach loyalty customer",
    description = "Finds the customer by phone, registering them when new",
    params(("id" = Uuid, Path, description = "Session ID")),
    request_body = AttachCustomerRequest,
    responses(
        (status = 200, description = "Customer attached", body = ApiResponse<table_session::Model>),
        (status = 400, description = "Invalid phone number", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "sessions"
)]
pub async fn attach_customer(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AttachCustomerRequest>,
) -> ApiResult<table_session::Model> {
    let session = state
        .services
        .tables
        .attach_customer(auth_user.tenant()?, id, payload)
        .await?;
    Ok(Json(ApiResponse::success(session)))
}

#[utoipa::path(
    post,
    path = "/api/v1/sessions/{id}/cancel",
    summary = "Cancel session",
    description = "Only an active session without live orders can be cancelled",
    params(("id" = Uuid, Path, description = "Session ID")),
    responses(
        (status = 200, description = "Session cancelled", body = ApiResponse<table_session::Model>),
        (status = 400, description = "Session has orders", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "sessions"
)]
pub async fn cancel_session(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<table_session::Model> {
    let session = state
        .services
        .tables
        .cancel_session(auth_user.tenant()?, id)
        .await?;
    Ok(Json(ApiResponse::success(session)))
}

#[utoipa::path(
    post,
    path = "/api/v1/sessions/{id}/move",
    summary = "Move session to another table",
    params(("id" = Uuid, Path, description = "Session ID")),
    request_body = MoveSessionRequest,
    responses(
        (status = 200, description = "Session moved", body = ApiResponse<table_session::Model>),
        (status = 409, description = "Target table is not available", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "sessions"
)]
pub async fn move_session(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<MoveSessionRequest>,
) -> ApiResult<table_session::Model> {
    let session = state
        .services
        .tables
        .move_session(auth_user.tenant()?, id, payload.target_table_id)
        .await?;
    Ok(Json(ApiResponse::success(session)))
}
