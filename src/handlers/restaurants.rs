use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};

use crate::{
    auth::{consts as perm, AuthRouterExt, AuthUser},
    entities::restaurant,
    errors::ServiceError,
    services::restaurants::{CreateRestaurantRequest, CreatedRestaurant, UpdateSettingsRequest},
    ApiResponse, ApiResult, AppState,
};

pub fn restaurant_routes() -> Router<AppState> {
    let onboard = Router::new()
        .route("/restaurants", post(create_restaurant))
        .with_permission(perm::RESTAURANTS_CREATE);
    let list = Router::new()
        .route("/restaurants", get(list_restaurants))
        .with_permission(perm::RESTAURANTS_LIST);
    let read = Router::new()
        .route("/restaurant", get(current_restaurant))
        .with_permission(perm::RESTAURANTS_READ);
    let update = Router::new()
        .route("/restaurant/settings", put(update_settings))
        .with_permission(perm::RESTAURANTS_UPDATE);

    Router::new()
        .merge(onboard)
        .merge(list)
        .merge(read)
        .merge(update)
}

/// Onboard a restaurant with its owner account and chart of accounts
#[utoipa::path(
    post,
    path = "/api/v1/restaurants",
    summary = "Create restaurant",
    request_body = CreateRestaurantRequest,
    responses(
        (status = 201, description = "Restaurant created", body = ApiResponse<CreatedRestaurant>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 409, description = "Owner email already in use", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "restaurants"
)]
pub async fn create_restaurant(
    State(state): State<AppState>,
    Json(payload): Json<CreateRestaurantRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CreatedRestaurant>>), ServiceError> {
    let created = state.services.restaurants.create_restaurant(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

#[utoipa::path(
    get,
    path = "/api/v1/restaurants",
    summary = "List restaurants",
    responses(
        (status = 200, description = "All tenants", body = ApiResponse<Vec<restaurant::Model>>),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "restaurants"
)]
pub async fn list_restaurants(State(state): State<AppState>) -> ApiResult<Vec<restaurant::Model>> {
    let restaurants = state.services.restaurants.list_restaurants().await?;
    Ok(Json(ApiResponse::success(restaurants)))
}

#[utoipa::path(
    get,
    path = "/api/v1/restaurant",
    summary = "Current restaurant",
    responses(
        (status = 200, description = "The caller's restaurant", body = ApiResponse<restaurant::Model>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "restaurants"
)]
pub async fn current_restaurant(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<restaurant::Model> {
    let restaurant = state
        .services
        .restaurants
        .get_restaurant(auth_user.tenant()?)
        .await?;
    Ok(Json(ApiResponse::success(restaurant)))
}

#[utoipa::path(
    put,
    path = "/api/v1/restaurant/settings",
    summary = "Update restaurant settings",
    description = "Tax and service charge rates, loyalty program and CBMS switch",
    request_body = UpdateSettingsRequest,
    responses(
        (status = 200, description = "Settings saved", body = ApiResponse<restaurant::Model>),
        (status = 400, description = "Invalid settings", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "restaurants"
)]
pub async fn update_settings(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<UpdateSettingsRequest>,
) -> ApiResult<restaurant::Model> {
    let restaurant = state
        .services
        .restaurants
        .update_settings(auth_user.tenant()?, payload)
        .await?;
    Ok(Json(ApiResponse::success(restaurant)))
}
