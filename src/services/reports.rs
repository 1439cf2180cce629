use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{
        bill::{self, BillStatus, Entity as BillEntity},
        bill_line,
        dining_table::{self, TableStatus},
        kitchen_ticket::{self, TicketStatus},
        menu_category::Station,
        order::{self, OrderStatus},
        payment::{self, PaymentMethod, PaymentStatus},
        user::StaffRole,
    },
    errors::ServiceError,
    services::{compliance::business_date, kitchen::station_for_role},
};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MethodTotal {
    pub method: PaymentMethod,
    pub payments: u64,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SalesSummary {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub bill_count: u64,
    pub gross_sales: Decimal,
    pub discounts: Decimal,
    pub service_charge: Decimal,
    pub vat: Decimal,
    pub net_total: Decimal,
    pub by_method: Vec<MethodTotal>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ItemSales {
    pub menu_item_id: Uuid,
    pub name: String,
    pub station: Station,
    pub quantity: i64,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct StationCounts {
    pub kitchen: u64,
    pub bar: u64,
}

/// Counters for the landing screen. Figures a role has no business seeing
/// are left out.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct Dashboard {
    pub open_tables: u64,
    pub tables_awaiting_bill: u64,
    pub tables_to_clean: u64,
    pub pending_orders: u64,
    pub open_tickets: StationCounts,
    pub unpaid_bills: Option<u64>,
    pub today_sales: Option<Decimal>,
}

/// Sums bills into a summary. Only paid bills count.
pub fn summarize(
    from: NaiveDate,
    to: NaiveDate,
    bills: &[bill::Model],
    payments: &[payment::Model],
) -> SalesSummary {
    let paid: Vec<&bill::Model> = bills.iter().filter(|b| b.status == BillStatus::Paid).collect();

    let mut by_method: BTreeMap<PaymentMethod, (u64, Decimal)> = BTreeMap::new();
    for p in payments.iter().filter(|p| p.status == PaymentStatus::Completed) {
        if paid.iter().any(|b| b.id == p.bill_id) {
            let entry = by_method.entry(p.method).or_default();
            entry.0 += 1;
            entry.1 += p.amount;
        }
    }

    SalesSummary {
        from,
        to,
        bill_count: paid.len() as u64,
        gross_sales: paid.iter().map(|b| b.subtotal).sum(),
        discounts: paid.iter().map(|b| b.total_discount()).sum(),
        service_charge: paid.iter().map(|b| b.service_charge).sum(),
        vat: paid.iter().map(|b| b.vat_amount).sum(),
        net_total: paid.iter().map(|b| b.total).sum(),
        by_method: by_method
            .into_iter()
            .map(|(method, (payments, amount))| MethodTotal {
                method,
                payments,
                amount,
            })
            .collect(),
    }
}

#[derive(Clone)]
pub struct ReportService {
    db: Arc<DatabaseConnection>,
}

impl ReportService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn paid_bills(
        &self,
        restaurant_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<bill::Model>, ServiceError> {
        Ok(BillEntity::find()
            .filter(bill::Column::RestaurantId.eq(restaurant_id))
            .filter(bill::Column::Status.eq(BillStatus::Paid))
            .filter(bill::Column::BillDate.gte(from))
            .filter(bill::Column::BillDate.lte(to))
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn sales_summary(
        &self,
        restaurant_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<SalesSummary, ServiceError> {
        let bills = self.paid_bills(restaurant_id, from, to).await?;
        let payments = if bills.is_empty() {
            Vec::new()
        } else {
            payment::Entity::find()
                .filter(payment::Column::BillId.is_in(bills.iter().map(|b| b.id)))
                .filter(payment::Column::Status.eq(PaymentStatus::Completed))
                .all(&*self.db)
                .await?
        };
        Ok(summarize(from, to, &bills, &payments))
    }

    /// Best sellers first.
    #[instrument(skip(self))]
    pub async fn item_sales(
        &self,
        restaurant_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ItemSales>, ServiceError> {
        let bills = self.paid_bills(restaurant_id, from, to).await?;
        if bills.is_empty() {
            return Ok(Vec::new());
        }
        let lines = bill_line::Entity::find()
            .filter(bill_line::Column::BillId.is_in(bills.iter().map(|b| b.id)))
            .all(&*self.db)
            .await?;

        let mut totals: HashMap<Uuid, ItemSales> = HashMap::new();
        for line in lines {
            let entry = totals.entry(line.menu_item_id).or_insert_with(|| ItemSales {
                menu_item_id: line.menu_item_id,
                name: line.name.clone(),
                station: line.station,
                quantity: 0,
                amount: Decimal::ZERO,
            });
            entry.quantity += i64::from(line.quantity);
            entry.amount += line.amount;
        }

        let mut rows: Vec<ItemSales> = totals.into_values().collect();
        rows.sort_by(|a, b| b.amount.cmp(&a.amount).then_with(|| a.name.cmp(&b.name)));
        Ok(rows)
    }

    #[instrument(skip(self))]
    pub async fn dashboard(
        &self,
        restaurant_id: Uuid,
        role: StaffRole,
    ) -> Result<Dashboard, ServiceError> {
        let db = &*self.db;
        let tables_in = |status: TableStatus| {
            dining_table::Entity::find()
                .filter(dining_table::Column::RestaurantId.eq(restaurant_id))
                .filter(dining_table::Column::Status.eq(status))
                .count(db)
        };
        let tickets_at = |station: Station| {
            kitchen_ticket::Entity::find()
                .filter(kitchen_ticket::Column::RestaurantId.eq(restaurant_id))
                .filter(kitchen_ticket::Column::Station.eq(station))
                .filter(kitchen_ticket::Column::Status.eq(TicketStatus::Open))
                .count(db)
        };

        let confined = station_for_role(&role);
        let mut dashboard = Dashboard::default();
        if confined.is_none() {
            dashboard.open_tables = tables_in(TableStatus::Occupied).await?;
            dashboard.tables_awaiting_bill = tables_in(TableStatus::BillRequested).await?;
            dashboard.tables_to_clean = tables_in(TableStatus::Cleaning).await?;
            dashboard.pending_orders = order::Entity::find()
                .filter(order::Column::RestaurantId.eq(restaurant_id))
                .filter(order::Column::Status.eq(OrderStatus::Pending))
                .count(db)
                .await?;
        }
        if confined != Some(Station::Bar) {
            dashboard.open_tickets.kitchen = tickets_at(Station::Kitchen).await?;
        }
        if confined != Some(Station::Kitchen) {
            dashboard.open_tickets.bar = tickets_at(Station::Bar).await?;
        }

        if matches!(
            role,
            StaffRole::Owner
                | StaffRole::Manager
                | StaffRole::Cashier
                | StaffRole::Accountant
                | StaffRole::PlatformAdmin
        ) {
            dashboard.unpaid_bills = Some(
                BillEntity::find()
                    .filter(bill::Column::RestaurantId.eq(restaurant_id))
                    .filter(
                        bill::Column::Status
                            .is_in([BillStatus::Unpaid, BillStatus::PartiallyPaid]),
                    )
                    .count(db)
                    .await?,
            );
            let today = business_date(Utc::now());
            dashboard.today_sales = Some(
                self.paid_bills(restaurant_id, today, today)
                    .await?
                    .iter()
                    .map(|b| b.total)
                    .sum(),
            );
        }
        Ok(dashboard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bill(status: BillStatus, subtotal: Decimal, total: Decimal) -> bill::Model {
        let now = Utc::now();
        bill::Model {
            id: Uuid::new_v4(),
            restaurant_id: Uuid::nil(),
            session_id: Uuid::new_v4(),
            customer_id: None,
            fiscal_year: "2081/82".into(),
            invoice_number: "2081/82-000001".into(),
            bill_date: now.date_naive(),
            buyer_name: None,
            buyer_pan: None,
            subtotal,
            discount: Decimal::ZERO,
            loyalty_points_redeemed: 0,
            loyalty_discount: Decimal::ZERO,
            service_charge: Decimal::ZERO,
            taxable_amount: subtotal,
            vat_amount: total - subtotal,
            total,
            paid_amount: total,
            status,
            print_count: 0,
            last_printed_at: None,
            void_reason: None,
            voided_at: None,
            voided_by: None,
            cbms_status: bill::CbmsStatus::NotApplicable,
            cbms_response: None,
            cbms_synced_at: None,
            cbms_realtime: false,
            created_by: None,
            paid_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    fn payment(bill_id: Uuid, method: PaymentMethod, amount: Decimal) -> payment::Model {
        payment::Model {
            id: Uuid::new_v4(),
            restaurant_id: Uuid::nil(),
            bill_id,
            method,
            amount,
            tendered: None,
            change_due: None,
            status: PaymentStatus::Completed,
            gateway_ref: None,
            gateway_txn_id: None,
            failure_reason: None,
            received_by: None,
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
        }
    }

    #[test]
    fn summary_counts_paid_bills_only() {
        let paid = bill(BillStatus::Paid, dec!(1000), dec!(1130));
        let void = bill(BillStatus::Void, dec!(500), dec!(565));
        let payments = vec![
            payment(paid.id, PaymentMethod::Cash, dec!(130)),
            payment(paid.id, PaymentMethod::Khalti, dec!(1000)),
            payment(void.id, PaymentMethod::Cash, dec!(565)),
        ];
        let today = Utc::now().date_naive();
        let summary = summarize(today, today, &[paid, void], &payments);

        assert_eq!(summary.bill_count, 1);
        assert_eq!(summary.net_total, dec!(1130));
        assert_eq!(summary.vat, dec!(130));
        assert_eq!(summary.by_method.len(), 2);
        assert_eq!(summary.by_method[0].method, PaymentMethod::Cash);
        assert_eq!(summary.by_method[0].amount, dec!(130));
    }
}
