//! Nepal fiscal calendar and IRD reporting.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};
use metrics::counter;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    entities::{
        bill::{self, BillStatus, CbmsStatus, Entity as BillEntity},
        payment::{self, PaymentStatus},
        restaurant, user,
    },
    errors::ServiceError,
    events::{Event, EventHandler},
    services::cbms::{CbmsBill, CbmsBillReturn, CbmsClient, CbmsOutcome},
};

/// Nepal Standard Time, UTC+05:45.
const NPT_OFFSET_SECS: i32 = 5 * 3600 + 45 * 60;

/// Years between the AD year a fiscal year starts in and its BS label.
const BS_YEAR_OFFSET: i32 = 57;

/// Start of the fiscal year (Shrawan 1) expressed as an AD month and day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiscalCalendar {
    pub start_month: u32,
    pub start_day: u32,
}

impl Default for FiscalCalendar {
    fn default() -> Self {
        Self {
            start_month: 7,
            start_day: 16,
        }
    }
}

impl FiscalCalendar {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            start_month: config.fiscal_year_start_month,
            start_day: config.fiscal_year_start_day,
        }
    }

    pub fn label_for(&self, date: NaiveDate) -> String {
        fiscal_year_label(date, self.start_month, self.start_day)
    }

    /// Label of the fiscal year the current business day falls in.
    pub fn current_label(&self) -> String {
        self.label_for(business_date(Utc::now()))
    }
}

/// BS fiscal year label such as `2081/82` for an AD calendar date.
pub fn fiscal_year_label(date: NaiveDate, start_month: u32, start_day: u32) -> String {
    let y = date.year();
    let start_year = if (date.month(), date.day()) >= (start_month, start_day) {
        y + BS_YEAR_OFFSET
    } else {
        y + BS_YEAR_OFFSET - 1
    };
    format!("{}/{:02}", start_year, (start_year + 1).rem_euclid(100))
}

/// Calendar date in Nepal for a UTC instant.
pub fn business_date(now: DateTime<Utc>) -> NaiveDate {
    FixedOffset::east_opt(NPT_OFFSET_SECS)
        .map(|tz| now.with_timezone(&tz).date_naive())
        .unwrap_or_else(|| now.date_naive())
}

/// CBMS spells `2081/82` as `2081.082`.
pub fn ird_fiscal_year(label: &str) -> String {
    match label.split('/').next().and_then(|s| s.parse::<i32>().ok()) {
        Some(start) => format!("{}.{:03}", start, (start + 1).rem_euclid(1000)),
        None => label.replace('/', "."),
    }
}

fn money(amount: Decimal) -> f64 {
    amount.round_dp(2).to_f64().unwrap_or_default()
}

/// Result of a bulk retry of unreported bills.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct SyncSummary {
    pub attempted: u32,
    pub synced: u32,
    pub failed: u32,
}

/// One row of the IRD sales register (sales book).
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SalesRegisterEntry {
    pub fiscal_year: String,
    pub bill_no: String,
    pub bill_date: NaiveDate,
    pub customer_name: Option<String>,
    pub customer_pan: Option<String>,
    pub amount: Decimal,
    pub discount: Decimal,
    pub service_charge: Decimal,
    pub taxable_amount: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub sync_with_ird: bool,
    pub is_bill_printed: bool,
    pub is_bill_active: bool,
    pub printed_time: Option<DateTime<Utc>>,
    pub entered_by: Option<String>,
    pub is_realtime: bool,
    pub payment_method: String,
}

/// Reports invoices to CBMS and keeps the sales register.
#[derive(Clone)]
pub struct ComplianceService {
    db: Arc<DatabaseConnection>,
    client: Option<CbmsClient>,
}

impl ComplianceService {
    pub fn new(db: Arc<DatabaseConnection>, client: Option<CbmsClient>) -> Self {
        Self { db, client }
    }

    fn client(&self) -> Result<&CbmsClient, ServiceError> {
        self.client.as_ref().ok_or_else(|| {
            ServiceError::InvalidOperation("CBMS integration is not configured".to_string())
        })
    }

    async fn load(
        &self,
        restaurant_id: Uuid,
        bill_id: Uuid,
    ) -> Result<(restaurant::Model, bill::Model), ServiceError> {
        let restaurant = restaurant::Entity::find_by_id(restaurant_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Restaurant", restaurant_id))?;
        let bill = BillEntity::find_by_id(bill_id)
            .filter(bill::Column::RestaurantId.eq(restaurant_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Bill", bill_id))?;
        Ok((restaurant, bill))
    }

    /// Reports an issued invoice, or the credit note of a voided one.
    #[instrument(skip(self))]
    pub async fn sync_bill(
        &self,
        restaurant_id: Uuid,
        bill_id: Uuid,
        realtime: bool,
    ) -> Result<bill::Model, ServiceError> {
        let client = self.client()?;
        let (restaurant, bill) = self.load(restaurant_id, bill_id).await?;

        if !restaurant.cbms_enabled {
            return Err(ServiceError::InvalidOperation(
                "CBMS reporting is disabled for this restaurant".to_string(),
            ));
        }
        let seller_pan = restaurant.pan_number.clone().ok_or_else(|| {
            ServiceError::InvalidOperation("restaurant has no PAN number".to_string())
        })?;

        match bill.status {
            BillStatus::Void => {
                if matches!(bill.cbms_status, CbmsStatus::NotApplicable | CbmsStatus::Synced) {
                    return Ok(bill);
                }
                // The invoice itself must be on record before its credit note.
                let bill = if bill.cbms_synced_at.is_none() {
                    let payload = self.bill_payload(client, &seller_pan, &bill, realtime);
                    let result = client.post_bill(&payload).await;
                    match result {
                        Ok(outcome) if outcome.is_success() => bill,
                        other => return self.record(bill, other, realtime).await,
                    }
                } else {
                    bill
                };
                let payload = self.bill_return_payload(client, &seller_pan, &bill, realtime);
                let result = client.post_bill_return(&payload).await;
                self.record(bill, result, realtime).await
            }
            _ => {
                if matches!(bill.cbms_status, CbmsStatus::NotApplicable | CbmsStatus::Synced) {
                    return Ok(bill);
                }
                let payload = self.bill_payload(client, &seller_pan, &bill, realtime);
                let result = client.post_bill(&payload).await;
                self.record(bill, result, realtime).await
            }
        }
    }

    /// Retries every bill still waiting on CBMS.
    #[instrument(skip(self))]
    pub async fn sync_pending(&self, restaurant_id: Uuid) -> Result<SyncSummary, ServiceError> {
        self.client()?;

        let pending = BillEntity::find()
            .filter(bill::Column::RestaurantId.eq(restaurant_id))
            .filter(bill::Column::CbmsStatus.is_in([CbmsStatus::Pending, CbmsStatus::Failed]))
            .order_by_asc(bill::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        let mut summary = SyncSummary::default();
        for bill in pending {
            summary.attempted += 1;
            match self.sync_bill(restaurant_id, bill.id, false).await {
                Ok(updated) if updated.cbms_status == CbmsStatus::Synced => summary.synced += 1,
                Ok(_) => summary.failed += 1,
                Err(e) => {
                    warn!(bill_id = %bill.id, error = %e, "CBMS retry failed");
                    summary.failed += 1;
                }
            }
        }

        info!(
            %restaurant_id,
            attempted = summary.attempted,
            synced = summary.synced,
            "CBMS pending sync finished"
        );
        Ok(summary)
    }

    /// Invoices dated within the range, in invoice order.
    #[instrument(skip(self))]
    pub async fn sales_register(
        &self,
        restaurant_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<SalesRegisterEntry>, ServiceError> {
        let bills = BillEntity::find()
            .filter(bill::Column::RestaurantId.eq(restaurant_id))
            .filter(bill::Column::BillDate.gte(from))
            .filter(bill::Column::BillDate.lte(to))
            .order_by_asc(bill::Column::BillDate)
            .order_by_asc(bill::Column::InvoiceNumber)
            .all(&*self.db)
            .await?;
        if bills.is_empty() {
            return Ok(Vec::new());
        }

        let bill_ids: Vec<Uuid> = bills.iter().map(|b| b.id).collect();
        let payments = payment::Entity::find()
            .filter(payment::Column::BillId.is_in(bill_ids))
            .filter(payment::Column::Status.eq(PaymentStatus::Completed))
            .all(&*self.db)
            .await?;
        let mut methods: HashMap<Uuid, Vec<payment::PaymentMethod>> = HashMap::new();
        for p in payments {
            let entry = methods.entry(p.bill_id).or_default();
            if !entry.contains(&p.method) {
                entry.push(p.method);
            }
        }

        let user_ids: Vec<Uuid> = bills.iter().filter_map(|b| b.created_by).collect();
        let names: HashMap<Uuid, String> = user::Entity::find()
            .filter(user::Column::Id.is_in(user_ids))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|u| (u.id, u.name))
            .collect();

        Ok(bills
            .into_iter()
            .map(|b| {
                let mut bill_methods = methods.remove(&b.id).unwrap_or_default();
                bill_methods.sort();
                SalesRegisterEntry {
                    fiscal_year: b.fiscal_year.clone(),
                    bill_no: b.invoice_number.clone(),
                    bill_date: b.bill_date,
                    customer_name: b.buyer_name.clone(),
                    customer_pan: b.buyer_pan.clone(),
                    amount: b.subtotal,
                    discount: b.total_discount(),
                    service_charge: b.service_charge,
                    taxable_amount: b.taxable_amount,
                    tax_amount: b.vat_amount,
                    total_amount: b.total,
                    sync_with_ird: b.cbms_status == CbmsStatus::Synced,
                    is_bill_printed: b.print_count > 0,
                    is_bill_active: b.status != BillStatus::Void,
                    printed_time: b.last_printed_at,
                    entered_by: b.created_by.and_then(|id| names.get(&id).cloned()),
                    is_realtime: b.cbms_realtime,
                    payment_method: bill_methods
                        .iter()
                        .map(|m| m.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                }
            })
            .collect())
    }

    fn bill_payload(
        &self,
        client: &CbmsClient,
        seller_pan: &str,
        bill: &bill::Model,
        realtime: bool,
    ) -> CbmsBill {
        let vat_charged = bill.vat_amount > Decimal::ZERO;
        CbmsBill {
            username: client.username().to_string(),
            password: client.password().to_string(),
            seller_pan: seller_pan.to_string(),
            buyer_pan: bill.buyer_pan.clone().unwrap_or_default(),
            buyer_name: bill.buyer_name.clone().unwrap_or_default(),
            fiscal_year: ird_fiscal_year(&bill.fiscal_year),
            invoice_number: bill.invoice_number.clone(),
            invoice_date: bill.bill_date.format("%Y.%m.%d").to_string(),
            total_sales: money(bill.total),
            taxable_sales_vat: if vat_charged { money(bill.taxable_amount) } else { 0.0 },
            vat: money(bill.vat_amount),
            excisable_amount: 0.0,
            excise: 0.0,
            taxable_sales_hst: 0.0,
            hst: 0.0,
            amount_for_esf: 0.0,
            esf: 0.0,
            export_sales: 0.0,
            tax_exempted_sales: if vat_charged { 0.0 } else { money(bill.taxable_amount) },
            isrealtime: realtime,
            datetime_client: Utc::now().to_rfc3339(),
        }
    }

    fn bill_return_payload(
        &self,
        client: &CbmsClient,
        seller_pan: &str,
        bill: &bill::Model,
        realtime: bool,
    ) -> CbmsBillReturn {
        let vat_charged = bill.vat_amount > Decimal::ZERO;
        let returned_on = bill.voided_at.map(business_date).unwrap_or(bill.bill_date);
        CbmsBillReturn {
            username: client.username().to_string(),
            password: client.password().to_string(),
            seller_pan: seller_pan.to_string(),
            buyer_pan: bill.buyer_pan.clone().unwrap_or_default(),
            buyer_name: bill.buyer_name.clone().unwrap_or_default(),
            fiscal_year: ird_fiscal_year(&bill.fiscal_year),
            ref_invoice_number: bill.invoice_number.clone(),
            credit_note_number: format!("CN-{}", bill.invoice_number),
            credit_note_date: returned_on.format("%Y.%m.%d").to_string(),
            reason_for_return: bill.void_reason.clone().unwrap_or_default(),
            total_sales: money(bill.total),
            taxable_sales_vat: if vat_charged { money(bill.taxable_amount) } else { 0.0 },
            vat: money(bill.vat_amount),
            excisable_amount: 0.0,
            excise: 0.0,
            taxable_sales_hst: 0.0,
            hst: 0.0,
            amount_for_esf: 0.0,
            esf: 0.0,
            export_sales: 0.0,
            tax_exempted_sales: if vat_charged { 0.0 } else { money(bill.taxable_amount) },
            isrealtime: realtime,
            datetime_client: Utc::now().to_rfc3339(),
        }
    }

    /// Stores the CBMS outcome on the bill. Transport failures are recorded
    /// and then returned to the caller.
    async fn record(
        &self,
        bill: bill::Model,
        result: Result<CbmsOutcome, ServiceError>,
        realtime: bool,
    ) -> Result<bill::Model, ServiceError> {
        let now = Utc::now();
        let bill_id = bill.id;
        let mut active: bill::ActiveModel = bill.into();
        active.updated_at = Set(now);

        match result {
            Ok(outcome) if outcome.is_success() => {
                active.cbms_status = Set(CbmsStatus::Synced);
                active.cbms_response = Set(Some(outcome.body));
                active.cbms_synced_at = Set(Some(now));
                active.cbms_realtime = Set(realtime);
                let updated = active.update(&*self.db).await?;
                counter!("restro.cbms.synced", 1);
                info!(%bill_id, "bill reported to CBMS");
                Ok(updated)
            }
            Ok(outcome) => {
                warn!(%bill_id, code = ?outcome.code, "CBMS rejected bill");
                active.cbms_status = Set(CbmsStatus::Failed);
                active.cbms_response = Set(Some(outcome.body));
                let updated = active.update(&*self.db).await?;
                counter!("restro.cbms.failed", 1);
                Ok(updated)
            }
            Err(e) => {
                warn!(%bill_id, error = %e, "CBMS unreachable");
                active.cbms_status = Set(CbmsStatus::Failed);
                active.cbms_response = Set(Some(e.to_string()));
                active.update(&*self.db).await?;
                counter!("restro.cbms.failed", 1);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl EventHandler for ComplianceService {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        let (restaurant_id, bill_id) = match event {
            Event::BillGenerated {
                restaurant_id,
                bill_id,
            }
            | Event::BillPaid {
                restaurant_id,
                bill_id,
            }
            | Event::BillVoided {
                restaurant_id,
                bill_id,
            } => (*restaurant_id, *bill_id),
            _ => return Ok(()),
        };
        if self.client.is_none() {
            return Ok(());
        }

        let bill = BillEntity::find_by_id(bill_id)
            .one(&*self.db)
            .await
            .map_err(|e| e.to_string())?;
        match bill {
            Some(b) if matches!(b.cbms_status, CbmsStatus::Pending | CbmsStatus::Failed) => self
                .sync_bill(restaurant_id, bill_id, true)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
            _ => Ok(()),
        }
    }
}
