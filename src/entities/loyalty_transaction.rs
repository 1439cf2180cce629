use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum LoyaltyKind {
    #[sea_orm(string_value = "Earn")]
    Earn,
    #[sea_orm(string_value = "Redeem")]
    Redeem,
    #[sea_orm(string_value = "Refund")]
    Refund,
    #[sea_orm(string_value = "Adjust")]
    Adjust,
}

/// Points movement; `points` is signed, redemptions are negative.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "loyalty_transactions")]
#[schema(as = LoyaltyTransaction)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub restaurant_id: Uuid,
    pub customer_id: Uuid,
    pub bill_id: Option<Uuid>,
    pub kind: LoyaltyKind,
    pub points: i64,
    pub balance_after: i64,
    pub note: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
