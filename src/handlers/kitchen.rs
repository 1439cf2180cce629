//! Station screens. Kitchen and bar staff only ever see their own station.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{
    auth::{consts as perm, AuthRouterExt, AuthUser},
    entities::{menu_category::Station, order_item},
    errors::ServiceError,
    services::kitchen::{station_for_role, ServedOrder, TicketWithItems, UpdateItemStatusRequest},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct QueueQuery {
    /// `Kitchen` or `Bar`; station staff default to their own
    pub station: Option<Station>,
}

pub fn kitchen_routes() -> Router<AppState> {
    let read = Router::new()
        .route("/kitchen/queue", get(station_queue))
        .with_permission(perm::KITCHEN_READ);
    let update = Router::new()
        .route("/order-items/:id/status", put(update_item_status))
        .with_permission(perm::KITCHEN_UPDATE);
    let serve = Router::new()
        .route("/orders/:id/serve", post(serve_order))
        .with_permission(perm::KITCHEN_SERVE);
    Router::new().merge(read).merge(update).merge(serve)
}

/// Station the caller may look at.
fn resolve_station(auth_user: &AuthUser, requested: Option<Station>) -> Result<Station, ServiceError> {
    match (station_for_role(&auth_user.role), requested) {
        (Some(own), Some(other)) if own != other => Err(ServiceError::Forbidden(format!(
            "{} staff cannot view the {:?} queue",
            auth_user.role.as_str(),
            other
        ))),
        (Some(own), _) => Ok(own),
        (None, Some(station)) => Ok(station),
        (None, None) => Ok(Station::Kitchen),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/kitchen/queue",
    summary = "Station queue",
    description = "Open KOT/BOT tickets with their items, oldest first",
    params(QueueQuery),
    responses(
        (status = 200, description = "Open tickets", body = ApiResponse<Vec<TicketWithItems>>),
        (status = 403, description = "Other station's queue", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "kitchen"
)]
pub async fn station_queue(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<QueueQuery>,
) -> ApiResult<Vec<TicketWithItems>> {
    let station = resolve_station(&auth_user, query.station)?;
    let tickets = state
        .services
        .kitchen
        .station_queue(auth_user.tenant()?, station)
        .await?;
    Ok(Json(ApiResponse::success(tickets)))
}

#[utoipa::path(
    put,
    path = "/api/v1/order-items/{id}/status",
    summary = "Advance an item",
    description = "Pending, Preparing, Ready, Served; items never move backwards",
    params(("id" = Uuid, Path, description = "Order item ID")),
    request_body = UpdateItemStatusRequest,
    responses(
        (status = 200, description = "Item updated", body = ApiResponse<order_item::Model>),
        (status = 400, description = "Transition not allowed", body = crate::errors::ErrorResponse),
        (status = 403, description = "Item belongs to another station", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "kitchen"
)]
pub async fn update_item_status(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateItemStatusRequest>,
) -> ApiResult<order_item::Model> {
    let item = state
        .services
        .kitchen
        .update_item_status(
            auth_user.tenant()?,
            id,
            payload.status,
            station_for_role(&auth_user.role),
        )
        .await?;
    Ok(Json(ApiResponse::success(item)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/serve",
    summary = "Serve ready items",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Ready items served", body = ApiResponse<ServedOrder>),
        (status = 400, description = "Nothing is ready", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "kitchen"
)]
pub async fn serve_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<ServedOrder> {
    let served = state
        .services
        .kitchen
        .serve_order(auth_user.tenant()?, id)
        .await?;
    Ok(Json(ApiResponse::success(served)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::user::StaffRole;

    fn user(role: StaffRole) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            name: "Test".into(),
            email: "test@example.com".into(),
            role,
            permissions: vec![],
            restaurant_id: Some(Uuid::new_v4()),
            token_id: "t".into(),
        }
    }

    #[test]
    fn station_staff_are_pinned_to_their_queue() {
        let bar = user(StaffRole::Bar);
        assert_eq!(resolve_station(&bar, None).unwrap(), Station::Bar);
        assert!(resolve_station(&bar, Some(Station::Kitchen)).is_err());

        let manager = user(StaffRole::Manager);
        assert_eq!(resolve_station(&manager, None).unwrap(), Station::Kitchen);
        assert_eq!(resolve_station(&manager, Some(Station::Bar)).unwrap(), Station::Bar);
    }
}
