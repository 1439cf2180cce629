use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum VoucherType {
    #[sea_orm(string_value = "Journal")]
    Journal,
    #[sea_orm(string_value = "Payment")]
    Payment,
    #[sea_orm(string_value = "Receipt")]
    Receipt,
    #[sea_orm(string_value = "Sales")]
    Sales,
    #[sea_orm(string_value = "Purchase")]
    Purchase,
    #[sea_orm(string_value = "Contra")]
    Contra,
}

impl VoucherType {
    /// Prefix of the voucher number.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Journal => "JV",
            Self::Payment => "PV",
            Self::Receipt => "RV",
            Self::Sales => "SV",
            Self::Purchase => "PU",
            Self::Contra => "CV",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum VoucherStatus {
    #[sea_orm(string_value = "Draft")]
    Draft,
    #[sea_orm(string_value = "Posted")]
    Posted,
    #[sea_orm(string_value = "Cancelled")]
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "vouchers")]
#[schema(as = Voucher)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub restaurant_id: Uuid,
    pub voucher_number: String,
    pub voucher_type: VoucherType,
    pub voucher_date: NaiveDate,
    pub fiscal_year: String,
    pub narration: String,
    pub status: VoucherStatus,
    pub total_amount: Decimal,
    /// Source document, e.g. "bill", "purchase", "wastage"
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub posted_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::voucher_line::Entity")]
    VoucherLines,
}

impl Related<super::voucher_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::VoucherLines.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
