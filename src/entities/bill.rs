use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum BillStatus {
    #[sea_orm(string_value = "Unpaid")]
    Unpaid,
    #[sea_orm(string_value = "PartiallyPaid")]
    PartiallyPaid,
    #[sea_orm(string_value = "Paid")]
    Paid,
    #[sea_orm(string_value = "Void")]
    Void,
}

impl BillStatus {
    pub fn accepts_payment(&self) -> bool {
        matches!(self, Self::Unpaid | Self::PartiallyPaid)
    }
}

/// Where the bill stands with the IRD billing monitor.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum CbmsStatus {
    #[sea_orm(string_value = "NotApplicable")]
    NotApplicable,
    #[sea_orm(string_value = "Pending")]
    Pending,
    #[sea_orm(string_value = "Synced")]
    Synced,
    #[sea_orm(string_value = "Failed")]
    Failed,
}

/// Tax invoice. Issued invoice numbers are never reused or deleted.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "bills")]
#[schema(as = Bill)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub restaurant_id: Uuid,
    pub session_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub fiscal_year: String,
    pub invoice_number: String,
    pub bill_date: NaiveDate,
    pub buyer_name: Option<String>,
    pub buyer_pan: Option<String>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub loyalty_points_redeemed: i64,
    pub loyalty_discount: Decimal,
    pub service_charge: Decimal,
    pub taxable_amount: Decimal,
    pub vat_amount: Decimal,
    pub total: Decimal,
    pub paid_amount: Decimal,
    pub status: BillStatus,
    pub print_count: i32,
    pub last_printed_at: Option<DateTime<Utc>>,
    pub void_reason: Option<String>,
    pub voided_at: Option<DateTime<Utc>>,
    pub voided_by: Option<Uuid>,
    pub cbms_status: CbmsStatus,
    pub cbms_response: Option<String>,
    pub cbms_synced_at: Option<DateTime<Utc>>,
    /// Reported to CBMS at the time of sale rather than by a retry
    pub cbms_realtime: bool,
    pub created_by: Option<Uuid>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::bill_line::Entity")]
    BillLines,
}

impl Related<super::bill_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BillLines.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn outstanding(&self) -> Decimal {
        (self.total - self.paid_amount).max(Decimal::ZERO)
    }

    pub fn total_discount(&self) -> Decimal {
        self.discount + self.loyalty_discount
    }
}
