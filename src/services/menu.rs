use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::round_money,
    entities::{
        menu_category::{self, Entity as CategoryEntity, Station},
        menu_item::{self, Entity as MenuItemEntity},
        recipe_line::{self, Entity as RecipeEntity},
        stock_item,
    },
    errors::ServiceError,
};

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateCategoryRequest {
    #[validate(length(min = 1, max = 80, message = "Category name is required"))]
    pub name: String,
    pub station: Station,
    #[serde(default)]
    pub sort_order: i32,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateMenuItemRequest {
    pub category_id: Uuid,
    #[validate(length(min = 1, max = 120, message = "Item name is required"))]
    pub name: String,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub price: Decimal,
    /// Defaults to the category's station
    pub station: Option<Station>,
    #[serde(default)]
    pub is_vegetarian: bool,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AvailabilityRequest {
    pub is_available: bool,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RecipeLineInput {
    pub stock_item_id: Uuid,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SetRecipeRequest {
    pub lines: Vec<RecipeLineInput>,
}

/// One category of the menu shown to guests.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MenuSection {
    #[serde(flatten)]
    pub category: menu_category::Model,
    pub items: Vec<menu_item::Model>,
}

pub async fn find_menu_item_in<C: ConnectionTrait>(
    conn: &C,
    restaurant_id: Uuid,
    menu_item_id: Uuid,
) -> Result<menu_item::Model, ServiceError> {
    MenuItemEntity::find_by_id(menu_item_id)
        .filter(menu_item::Column::RestaurantId.eq(restaurant_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Menu item", menu_item_id))
}

fn check_recipe(lines: &[RecipeLineInput]) -> Result<(), ServiceError> {
    let mut seen = HashSet::new();
    for line in lines {
        if line.quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "recipe quantities must be positive".to_string(),
            ));
        }
        if !seen.insert(line.stock_item_id) {
            return Err(ServiceError::ValidationError(format!(
                "stock item {} appears twice in the recipe",
                line.stock_item_id
            )));
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct MenuService {
    db: Arc<DatabaseConnection>,
}

impl MenuService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_category(
        &self,
        restaurant_id: Uuid,
        request: CreateCategoryRequest,
    ) -> Result<menu_category::Model, ServiceError> {
        request.validate()?;
        let name = request.name.trim().to_string();
        let duplicate = CategoryEntity::find()
            .filter(menu_category::Column::RestaurantId.eq(restaurant_id))
            .filter(menu_category::Column::Name.eq(name.clone()))
            .one(&*self.db)
            .await?;
        if duplicate.is_some() {
            return Err(ServiceError::Conflict(format!(
                "category {} already exists",
                name
            )));
        }

        Ok(menu_category::ActiveModel {
            id: Set(Uuid::new_v4()),
            restaurant_id: Set(restaurant_id),
            name: Set(name),
            station: Set(request.station),
            sort_order: Set(request.sort_order),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?)
    }

    #[instrument(skip(self))]
    pub async fn list_categories(
        &self,
        restaurant_id: Uuid,
    ) -> Result<Vec<menu_category::Model>, ServiceError> {
        Ok(CategoryEntity::find()
            .filter(menu_category::Column::RestaurantId.eq(restaurant_id))
            .order_by_asc(menu_category::Column::SortOrder)
            .order_by_asc(menu_category::Column::Name)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_item(
        &self,
        restaurant_id: Uuid,
        request: CreateMenuItemRequest,
    ) -> Result<menu_item::Model, ServiceError> {
        request.validate()?;
        if request.price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "price cannot be negative".to_string(),
            ));
        }
        let category = CategoryEntity::find_by_id(request.category_id)
            .filter(menu_category::Column::RestaurantId.eq(restaurant_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Category", request.category_id))?;

        let now = Utc::now();
        let item = menu_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            restaurant_id: Set(restaurant_id),
            category_id: Set(category.id),
            name: Set(request.name.trim().to_string()),
            description: Set(request.description),
            price: Set(round_money(request.price)),
            station: Set(request.station.unwrap_or(category.station)),
            is_available: Set(true),
            is_vegetarian: Set(request.is_vegetarian),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(menu_item_id = %item.id, "menu item created");
        Ok(item)
    }

    #[instrument(skip(self))]
    pub async fn list_items(
        &self,
        restaurant_id: Uuid,
        category_id: Option<Uuid>,
    ) -> Result<Vec<menu_item::Model>, ServiceError> {
        let mut query =
            MenuItemEntity::find().filter(menu_item::Column::RestaurantId.eq(restaurant_id));
        if let Some(category_id) = category_id {
            query = query.filter(menu_item::Column::CategoryId.eq(category_id));
        }
        Ok(query
            .order_by_asc(menu_item::Column::Name)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn set_availability(
        &self,
        restaurant_id: Uuid,
        menu_item_id: Uuid,
        is_available: bool,
    ) -> Result<menu_item::Model, ServiceError> {
        let item = find_menu_item_in(&*self.db, restaurant_id, menu_item_id).await?;
        let mut active: menu_item::ActiveModel = item.into();
        active.is_available = Set(is_available);
        active.updated_at = Set(Utc::now());
        let item = active.update(&*self.db).await?;
        info!(%menu_item_id, is_available, "menu item availability changed");
        Ok(item)
    }

    #[instrument(skip(self))]
    pub async fn recipe(
        &self,
        restaurant_id: Uuid,
        menu_item_id: Uuid,
    ) -> Result<Vec<recipe_line::Model>, ServiceError> {
        find_menu_item_in(&*self.db, restaurant_id, menu_item_id).await?;
        Ok(RecipeEntity::find()
            .filter(recipe_line::Column::MenuItemId.eq(menu_item_id))
            .all(&*self.db)
            .await?)
    }

    /// Replaces the ingredients consumed by one portion.
    #[instrument(skip(self, request))]
    pub async fn set_recipe(
        &self,
        restaurant_id: Uuid,
        menu_item_id: Uuid,
        request: SetRecipeRequest,
    ) -> Result<Vec<recipe_line::Model>, ServiceError> {
        check_recipe(&request.lines)?;

        let txn = self.db.begin().await?;
        find_menu_item_in(&txn, restaurant_id, menu_item_id).await?;

        let ids: Vec<Uuid> = request.lines.iter().map(|l| l.stock_item_id).collect();
        let found = stock_item::Entity::find()
            .filter(stock_item::Column::RestaurantId.eq(restaurant_id))
            .filter(stock_item::Column::Id.is_in(ids.clone()))
            .all(&txn)
            .await?;
        if let Some(missing) = ids.iter().find(|id| !found.iter().any(|s| s.id == **id)) {
            return Err(ServiceError::not_found("Stock item", *missing));
        }

        RecipeEntity::delete_many()
            .filter(recipe_line::Column::MenuItemId.eq(menu_item_id))
            .exec(&txn)
            .await?;

        let mut lines = Vec::with_capacity(request.lines.len());
        for line in request.lines {
            lines.push(
                recipe_line::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    restaurant_id: Set(restaurant_id),
                    menu_item_id: Set(menu_item_id),
                    stock_item_id: Set(line.stock_item_id),
                    quantity: Set(line.quantity),
                }
                .insert(&txn)
                .await?,
            );
        }
        txn.commit().await?;

        info!(%menu_item_id, lines = lines.len(), "recipe replaced");
        Ok(lines)
    }

    /// Categories with their available items; empty categories are left out.
    #[instrument(skip(self))]
    pub async fn guest_menu(&self, restaurant_id: Uuid) -> Result<Vec<MenuSection>, ServiceError> {
        let categories = self.list_categories(restaurant_id).await?;
        let mut items = MenuItemEntity::find()
            .filter(menu_item::Column::RestaurantId.eq(restaurant_id))
            .filter(menu_item::Column::IsAvailable.eq(true))
            .order_by_asc(menu_item::Column::Name)
            .all(&*self.db)
            .await?;

        Ok(categories
            .into_iter()
            .filter_map(|category| {
                let (section, rest): (Vec<_>, Vec<_>) =
                    items.drain(..).partition(|i| i.category_id == category.id);
                items = rest;
                (!section.is_empty()).then_some(MenuSection {
                    category,
                    items: section,
                })
            })
            .collect())
    }
}
