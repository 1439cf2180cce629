use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{
    auth::{consts as perm, AuthRouterExt, AuthUser},
    entities::{menu_category, menu_item, recipe_line},
    errors::ServiceError,
    services::menu::{
        AvailabilityRequest, CreateCategoryRequest, CreateMenuItemRequest, SetRecipeRequest,
    },
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MenuItemQuery {
    /// Only items of this category
    pub category_id: Option<Uuid>,
}

pub fn menu_routes() -> Router<AppState> {
    let read = Router::new()
        .route("/menu/categories", get(list_categories))
        .route("/menu/items", get(list_items))
        .route("/menu/items/:id/recipe", get(get_recipe))
        .with_permission(perm::MENU_READ);
    let manage = Router::new()
        .route("/menu/categories", post(create_category))
        .route("/menu/items", post(create_item))
        .route("/menu/items/:id/availability", put(set_availability))
        .route("/menu/items/:id/recipe", put(set_recipe))
        .with_permission(perm::MENU_MANAGE);
    Router::new().merge(read).merge(manage)
}

#[utoipa::path(
    get,
    path = "/api/v1/menu/categories",
    summary = "List menu categories",
    responses(
        (status = 200, description = "Categories in display order", body = ApiResponse<Vec<menu_category::Model>>),
    ),
    security(("Bearer" = [])),
    tag = "menu"
)]
pub async fn list_categories(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Vec<menu_category::Model>> {
    let categories = state.services.menu.list_categories(auth_user.tenant()?).await?;
    Ok(Json(ApiResponse::success(categories)))
}

#[utoipa::path(
    post,
    path = "/api/v1/menu/categories",
    summary = "Create menu category",
    request_body = CreateCategoryRequest,
    responses(
        (status = 201, description = "Category created", body = ApiResponse<menu_category::Model>),
        (status = 409, description = "Category name already used", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "menu"
)]
pub async fn create_category(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<ApiResponse<menu_category::Model>>), ServiceError> {
    let category = state
        .services
        .menu
        .create_category(auth_user.tenant()?, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(category))))
}

#[utoipa::path(
    get,
    path = "/api/v1/menu/items",
    summary = "List menu items",
    params(MenuItemQuery),
    responses(
        (status = 200, description = "Menu items", body = ApiResponse<Vec<menu_item::Model>>),
    ),
    security(("Bearer" = [])),
    tag = "menu"
)]
pub async fn list_items(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<MenuItemQuery>,
) -> ApiResult<Vec<menu_item::Model>> {
    let items = state
        .services
        .menu
        .list_items(auth_user.tenant()?, query.category_id)
        .await?;
    Ok(Json(ApiResponse::success(items)))
}

#[utoipa::path(
    post,
    path = "/api/v1/menu/items",
    summary = "Create menu item",
    request_body = CreateMenuItemRequest,
    responses(
        (status = 201, description = "Menu item created", body = ApiResponse<menu_item::Model>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 404, description = "Category not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "menu"
)]
pub async fn create_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<CreateMenuItemRequest>,
) -> Result<(StatusCode, Json<ApiResponse<menu_item::Model>>), ServiceError> {
    let item = state
        .services
        .menu
        .create_item(auth_user.tenant()?, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(item))))
}

#[utoipa::path(
    put,
    path = "/api/v1/menu/items/{id}/availability",
    summary = "Toggle availability",
    description = "Unavailable items disappear from the guest menu and cannot be ordered",
    params(("id" = Uuid, Path, description = "Menu item ID")),
    request_body = AvailabilityRequest,
    responses(
        (status = 200, description = "Availability saved", body = ApiResponse<menu_item::Model>),
        (status = 404, description = "Menu item not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "menu"
)]
pub async fn set_availability(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AvailabilityRequest>,
) -> ApiResult<menu_item::Model> {
    let item = state
        .services
        .menu
        .set_availability(auth_user.tenant()?, id, payload.is_available)
        .await?;
    Ok(Json(ApiResponse::success(item)))
}

#[utoipa::path(
    get,
    path = "/api/v1/menu/items/{id}/recipe",
    summary = "Get recipe",
    params(("id" = Uuid, Path, description = "Menu item ID")),
    responses(
        (status = 200, description = "Stock consumed per portion", body = ApiResponse<Vec<recipe_line::Model>>),
        (status = 404, description = "Menu item not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "menu"
)]
pub async fn get_recipe(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Vec<recipe_line::Model>> {
    let lines = state.services.menu.recipe(auth_user.tenant()?, id).await?;
    Ok(Json(ApiResponse::success(lines)))
}

#[utoipa::path(
    put,
    path = "/api/v1/menu/items/{id}/recipe",
    summary = "Replace recipe",
    params(("id" = Uuid, Path, description = "Menu item ID")),
    request_body = SetRecipeRequest,
    responses(
        (status = 200, description = "Recipe saved", body = ApiResponse<Vec<recipe_line::Model>>),
        (status = 400, description = "Invalid recipe", body = crate::errors::ErrorResponse),
        (status = 404, description = "Menu or stock item not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "menu"
)]
pub async fn set_recipe(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetRecipeRequest>,
) -> ApiResult<Vec<recipe_line::Model>> {
    let lines = state
        .services
        .menu
        .set_recipe(auth_user.tenant()?, id, payload)
        .await?;
    Ok(Json(ApiResponse::success(lines)))
}
