use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum MovementKind {
    #[sea_orm(string_value = "Purchase")]
    Purchase,
    #[sea_orm(string_value = "Consumption")]
    Consumption,
    #[sea_orm(string_value = "ConsumptionReversal")]
    ConsumptionReversal,
    #[sea_orm(string_value = "Adjustment")]
    Adjustment,
    #[sea_orm(string_value = "Wastage")]
    Wastage,
}

/// Stock ledger row; `quantity` is signed (stock out is negative).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "stock_movements")]
#[schema(as = StockMovement)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub restaurant_id: Uuid,
    pub stock_item_id: Uuid,
    pub kind: MovementKind,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub note: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
