use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A tenant. Every other row belongs to exactly one restaurant.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "restaurants")]
#[schema(as = Restaurant)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    /// Nepal PAN/VAT number, nine digits
    pub pan_number: Option<String>,
    pub vat_registered: bool,
    pub vat_rate: Decimal,
    pub service_charge_rate: Decimal,
    /// Points earned per rupee of bill total
    pub loyalty_earn_rate: Decimal,
    /// Rupee value of one point when redeemed
    pub loyalty_point_value: Decimal,
    pub loyalty_min_redeem_points: i64,
    pub cbms_enabled: bool,
    pub currency: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// VAT actually charged on bills
    pub fn effective_vat_rate(&self) -> Decimal {
        if self.vat_registered {
            self.vat_rate
        } else {
            Decimal::ZERO
        }
    }

    pub fn loyalty_enabled(&self) -> bool {
        self.loyalty_earn_rate > Decimal::ZERO && self.loyalty_point_value > Decimal::ZERO
    }
}
