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
    errors::ServiceError,
    services::payments::{KhaltiCallbackResult, KhaltiCheckout, PaymentReceipt, RecordPaymentRequest},
    ApiResponse, ApiResult, AppState,
};

/// Query string Khalti appends when redirecting back; only `pidx` is trusted,
/// everything else is confirmed through the lookup API.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct KhaltiCallbackQuery {
    pub pidx: String,
}

pub fn payment_routes() -> Router<AppState> {
    let collect = Router::new()
        .route("/bills/:id/payments", post(record_payment))
        .route("/bills/:id/khalti", post(initiate_khalti))
        .with_permission(perm::PAYMENTS_CREATE);
    // Khalti redirects the guest's browser here; no staff token involved
    let callback = Router::new().route("/payments/khalti/callback", get(khalti_callback));

    Router::new().merge(collect).merge(callback)
}

#[utoipa::path(
    post,
    path = "/api/v1/bills/{id}/payments",
    summary = "Record payment",
    description = "Settling the outstanding amount closes the bill, frees the table for cleaning, credits loyalty points and posts the sales voucher",
    params(("id" = Uuid, Path, description = "Bill ID")),
    request_body = RecordPaymentRequest,
    responses(
        (status = 201, description = "Payment recorded", body = ApiResponse<PaymentReceipt>),
        (status = 400, description = "Amount exceeds outstanding or bill not payable", body = crate::errors::ErrorResponse),
        (status = 404, description = "Bill not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn record_payment(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<RecordPaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentReceipt>>), ServiceError> {
    let receipt = state
        .services
        .payments
        .record_payment(auth_user.tenant()?, id, auth_user.user_id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(receipt))))
}

#[utoipa::path(
    post,
    path = "/api/v1/bills/{id}/khalti",
    summary = "Start Khalti checkout",
    params(("id" = Uuid, Path, description = "Bill ID")),
    responses(
        (status = 201, description = "Checkout created", body = ApiResponse<KhaltiCheckout>),
        (status = 400, description = "Khalti not configured or bill not payable", body = crate::errors::ErrorResponse),
        (status = 502, description = "Khalti unavailable", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn initiate_khalti(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<ApiResponse<KhaltiCheckout>>), ServiceError> {
    let checkout = state
        .services
        .payments
        .initiate_khalti(auth_user.tenant()?, id, Some(auth_user.user_id))
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(checkout))))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/khalti/callback",
    summary = "Khalti return URL",
    description = "Verifies the payment with Khalti; repeated callbacks are harmless",
    params(KhaltiCallbackQuery),
    responses(
        (status = 200, description = "Payment state after verification", body = ApiResponse<KhaltiCallbackResult>),
        (status = 404, description = "Unknown pidx", body = crate::errors::ErrorResponse),
        (status = 502, description = "Khalti unavailable", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn khalti_callback(
    State(state): State<AppState>,
    Query(query): Query<KhaltiCallbackQuery>,
) -> ApiResult<KhaltiCallbackResult> {
    let result = state.services.payments.khalti_callback(&query.pidx).await?;
    Ok(Json(ApiResponse::success(result)))
}
