use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Ledger entry types for accounting
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum LedgerEntryType {
    #[sea_orm(string_value = "Debit")]
    Debit,
    #[sea_orm(string_value = "Credit")]
    Credit,
}

/// Ledger entry status; reversed entries stop counting in balances
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum LedgerEntryStatus {
    #[sea_orm(string_value = "Posted")]
    Posted,
    #[sea_orm(string_value = "Reversed")]
    Reversed,
}

/// Posted side of a voucher line
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "ledger_entries")]
#[schema(as = LedgerEntry)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub restaurant_id: Uuid,

    /// Voucher that produced this entry
    pub voucher_id: Uuid,

    pub account_id: Uuid,

    /// Entry type (Debit or Credit)
    pub entry_type: LedgerEntryType,

    pub amount: Decimal,

    pub description: Option<String>,

    pub status: LedgerEntryStatus,

    /// Voucher date the entry counts on
    pub posting_date: NaiveDate,

    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Check if this is a debit entry
    pub fn is_debit(&self) -> bool {
        self.entry_type == LedgerEntryType::Debit
    }

    /// Check if this is a credit entry
    pub fn is_credit(&self) -> bool {
        self.entry_type == LedgerEntryType::Credit
    }

    /// Get signed amount (positive for debit, negative for credit)
    pub fn signed_amount(&self) -> Decimal {
        match self.entry_type {
            LedgerEntryType::Debit => self.amount,
            LedgerEntryType::Credit => -self.amount,
        }
    }
}
