use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::dining_table::TableStatus;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum SessionStatus {
    #[sea_orm(string_value = "Active")]
    Active,
    #[sea_orm(string_value = "BillRequested")]
    BillRequested,
    #[sea_orm(string_value = "Paid")]
    Paid,
    #[sea_orm(string_value = "Closed")]
    Closed,
    #[sea_orm(string_value = "Cancelled")]
    Cancelled,
}

impl SessionStatus {
    /// Open sessions hold their table.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Active | Self::BillRequested | Self::Paid)
    }

    /// Guests can still order or be billed.
    pub fn is_billable(&self) -> bool {
        matches!(self, Self::Active | Self::BillRequested)
    }

    /// The table status implied by a session in this status.
    pub fn table_status(&self) -> TableStatus {
        match self {
            Self::Active => TableStatus::Occupied,
            Self::BillRequested => TableStatus::BillRequested,
            Self::Paid => TableStatus::Cleaning,
            Self::Closed | Self::Cancelled => TableStatus::Available,
        }
    }

    pub fn open_statuses() -> [SessionStatus; 3] {
        [Self::Active, Self::BillRequested, Self::Paid]
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum SessionOrigin {
    #[sea_orm(string_value = "Qr")]
    Qr,
    #[sea_orm(string_value = "Staff")]
    Staff,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "table_sessions")]
#[schema(as = TableSession)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub restaurant_id: Uuid,
    pub table_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub guest_count: i32,
    pub status: SessionStatus,
    pub opened_via: SessionOrigin,
    pub opened_by: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub bill_requested_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(SessionStatus::Active, TableStatus::Occupied)]
    #[case(SessionStatus::BillRequested, TableStatus::BillRequested)]
    #[case(SessionStatus::Paid, TableStatus::Cleaning)]
    #[case(SessionStatus::Closed, TableStatus::Available)]
    #[case(SessionStatus::Cancelled, TableStatus::Available)]
    fn table_status_follows_session(#[case] session: SessionStatus, #[case] table: TableStatus) {
        assert_eq!(session.table_status(), table);
        assert_eq!(session.is_open(), table != TableStatus::Available);
    }
}
