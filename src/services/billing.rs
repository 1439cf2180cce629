use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::{round_money, validate_pan, PaginationParams},
    entities::{
        bill::{self, BillStatus, CbmsStatus, Entity as BillEntity},
        bill_line::{self, Entity as BillLineEntity},
        loyalty_transaction::LoyaltyKind,
        order::{self, OrderStatus},
        order_item::{self, ItemStatus},
        payment::{self, PaymentStatus},
        restaurant,
        table_session::SessionStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        compliance::{business_date, FiscalCalendar},
        loyalty::{apply_points_in, find_customer_in, redemption_value},
        payments::settle_in,
        sequences::{self, format_invoice_number, next_value},
        tables::{find_session_in, transition_session_in},
    },
};

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct GenerateBillRequest {
    #[serde(default)]
    pub discount: Decimal,
    /// Loyalty points of the session's customer to spend on this bill
    #[serde(default)]
    pub redeem_points: i64,
    #[validate(length(max = 120))]
    pub buyer_name: Option<String>,
    pub buyer_pan: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct VoidBillRequest {
    #[validate(length(min = 3, max = 255, message = "A void reason is required"))]
    pub reason: String,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct BillListParams {
    pub from: Option<chrono::NaiveDate>,
    pub to: Option<chrono::NaiveDate>,
    pub status: Option<BillStatus>,
}

/// Amounts of a bill derived from its lines and the restaurant's rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct BillTotals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub loyalty_discount: Decimal,
    pub service_charge: Decimal,
    pub taxable_amount: Decimal,
    pub vat_amount: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BillWithLines {
    #[serde(flatten)]
    pub bill: bill::Model,
    pub lines: Vec<bill_line::Model>,
    pub payments: Vec<payment::Model>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PrintedBill {
    #[serde(flatten)]
    pub bill: BillWithLines,
    pub restaurant_name: String,
    pub restaurant_pan: Option<String>,
    /// Absent on the original; reprints read `COPY OF ORIGINAL - n`
    pub copy_label: Option<String>,
}

/// Service charge applies after discounts; VAT applies on top of both.
pub fn compute_totals(
    subtotal: Decimal,
    discount: Decimal,
    loyalty_discount: Decimal,
    service_charge_rate: Decimal,
    vat_rate: Decimal,
) -> Result<BillTotals, ServiceError> {
    if discount < Decimal::ZERO || loyalty_discount < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "discounts cannot be negative".to_string(),
        ));
    }
    let subtotal = round_money(subtotal);
    let discount = round_money(discount);
    let loyalty_discount = round_money(loyalty_discount);
    if discount + loyalty_discount > subtotal {
        return Err(ServiceError::ValidationError(format!(
            "discounts of {} exceed the subtotal of {}",
            discount + loyalty_discount,
            subtotal
        )));
    }

    let net = subtotal - discount - loyalty_discount;
    let service_charge = round_money(net * service_charge_rate);
    let taxable_amount = net + service_charge;
    let vat_amount = round_money(taxable_amount * vat_rate);
    Ok(BillTotals {
        subtotal,
        discount,
        loyalty_discount,
        service_charge,
        taxable_amount,
        vat_amount,
        total: taxable_amount + vat_amount,
    })
}

/// Label printed on the n-th print of a bill (1-based).
pub fn copy_label(print_number: i32) -> Option<String> {
    (print_number > 1).then(|| format!("COPY OF ORIGINAL - {}", print_number - 1))
}

pub async fn find_bill_in<C: ConnectionTrait>(
    conn: &C,
    restaurant_id: Uuid,
    bill_id: Uuid,
) -> Result<bill::Model, ServiceError> {
    BillEntity::find_by_id(bill_id)
        .filter(bill::Column::RestaurantId.eq(restaurant_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Bill", bill_id))
}

/// Reads a bill with a row lock (`SELECT ... FOR UPDATE`) held until the
/// surrounding transaction ends. Payment and void paths use it so their
/// read-modify-write on `paid_amount` and `status` is serialised.
pub async fn lock_bill_in<C: ConnectionTrait>(
    conn: &C,
    restaurant_id: Uuid,
    bill_id: Uuid,
) -> Result<bill::Model, ServiceError> {
    BillEntity::find_by_id(bill_id)
        .filter(bill::Column::RestaurantId.eq(restaurant_id))
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Bill", bill_id))
}

pub async fn bill_lines_in<C: ConnectionTrait>(
    conn: &C,
    bill_id: Uuid,
) -> Result<Vec<bill_line::Model>, ServiceError> {
    Ok(BillLineEntity::find()
        .filter(bill_line::Column::BillId.eq(bill_id))
        .order_by_asc(bill_line::Column::Name)
        .all(conn)
        .await?)
}

#[derive(Clone)]
pub struct BillingService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
    calendar: FiscalCalendar,
    /// Platform-wide CBMS switch; a restaurant's own flag only counts when set.
    cbms_enabled: bool,
}

impl BillingService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Option<Arc<EventSender>>,
        calendar: FiscalCalendar,
        cbms_enabled: bool,
    ) -> Self {
        Self {
            db,
            event_sender,
            calendar,
            cbms_enabled,
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }

    /// Issues the tax invoice for a session whose orders are all served.
    #[instrument(skip(self, request))]
    pub async fn generate_bill(
        &self,
        restaurant_id: Uuid,
        session_id: Uuid,
        created_by: Uuid,
        request: GenerateBillRequest,
    ) -> Result<BillWithLines, ServiceError> {
        request.validate()?;
        let buyer_pan = request
            .buyer_pan
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        if let Some(pan) = &buyer_pan {
            validate_pan(pan)?;
        }
        if request.redeem_points < 0 {
            return Err(ServiceError::ValidationError(
                "redeem_points cannot be negative".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let session = find_session_in(&txn, restaurant_id, session_id).await?;
        if !session.status.is_billable() {
            return Err(ServiceError::InvalidOperation(format!(
                "a session in status {:?} cannot be billed",
                session.status
            )));
        }
        let existing = BillEntity::find()
            .filter(bill::Column::SessionId.eq(session_id))
            .filter(bill::Column::Status.ne(BillStatus::Void))
            .one(&txn)
            .await?;
        if let Some(existing) = existing {
            return Err(ServiceError::Conflict(format!(
                "session already has bill {}",
                existing.invoice_number
            )));
        }

        let orders = order::Entity::find()
            .filter(order::Column::SessionId.eq(session_id))
            .filter(order::Column::Status.ne(OrderStatus::Cancelled))
            .all(&txn)
            .await?;
        if let Some(open) = orders.iter().find(|o| o.status != OrderStatus::Served) {
            return Err(ServiceError::InvalidOperation(format!(
                "order {} is still {:?}",
                open.order_number, open.status
            )));
        }
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.is_in(orders.iter().map(|o| o.id)))
            .filter(order_item::Column::Status.eq(ItemStatus::Served))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&txn)
            .await?;
        if items.is_empty() {
            return Err(ServiceError::InvalidOperation(
                "there is nothing to bill for this session".to_string(),
            ));
        }

        let restaurant = restaurant::Entity::find_by_id(restaurant_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Restaurant", restaurant_id))?;

        let bill_id = Uuid::new_v4();
        let mut loyalty_discount = Decimal::ZERO;
        if request.redeem_points > 0 {
            let customer_id = session.customer_id.ok_or_else(|| {
                ServiceError::InvalidOperation(
                    "attach a customer to the session before redeeming points".to_string(),
                )
            })?;
            let customer = find_customer_in(&txn, restaurant_id, customer_id).await?;
            loyalty_discount =
                redemption_value(&restaurant, customer.points_balance, request.redeem_points)?;
            apply_points_in(
                &txn,
                customer,
                -request.redeem_points,
                LoyaltyKind::Redeem,
                Some(bill_id),
                None,
                Some(created_by),
            )
            .await?;
        }

        let subtotal: Decimal = items.iter().map(|i| i.line_total).sum();
        if subtotal <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "bill subtotal must be greater than zero".to_string(),
            ));
        }
        let totals = compute_totals(
            subtotal,
            request.discount,
            loyalty_discount,
            restaurant.service_charge_rate,
            restaurant.effective_vat_rate(),
        )?;
        let now = Utc::now();
        let bill_date = business_date(now);
        let fiscal_year = self.calendar.label_for(bill_date);
        let n = next_value(&txn, restaurant_id, sequences::INVOICE, &fiscal_year).await?;
        let cbms_status = if self.cbms_enabled
            && restaurant.cbms_enabled
            && restaurant.pan_number.is_some()
        {
            CbmsStatus::Pending
        } else {
            CbmsStatus::NotApplicable
        };

        let bill = bill::ActiveModel {
            id: Set(bill_id),
            restaurant_id: Set(restaurant_id),
            session_id: Set(session_id),
            customer_id: Set(session.customer_id),
            fiscal_year: Set(fiscal_year.clone()),
            invoice_number: Set(format_invoice_number(&fiscal_year, n)),
            bill_date: Set(bill_date),
            buyer_name: Set(request
                .buyer_name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())),
            buyer_pan: Set(buyer_pan),
            subtotal: Set(totals.subtotal),
            discount: Set(totals.discount),
            loyalty_points_redeemed: Set(request.redeem_points),
            loyalty_discount: Set(totals.loyalty_discount),
            service_charge: Set(totals.service_charge),
            taxable_amount: Set(totals.taxable_amount),
            vat_amount: Set(totals.vat_amount),
            total: Set(totals.total),
            paid_amount: Set(Decimal::ZERO),
            status: Set(BillStatus::Unpaid),
            print_count: Set(0),
            last_printed_at: Set(None),
            void_reason: Set(None),
            voided_at: Set(None),
            voided_by: Set(None),
            cbms_status: Set(cbms_status),
            cbms_response: Set(None),
            cbms_synced_at: Set(None),
            cbms_realtime: Set(false),
            created_by: Set(Some(created_by)),
            paid_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut lines = Vec::with_capacity(items.len());
        for item in &items {
            lines.push(
                bill_line::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    bill_id: Set(bill.id),
                    order_item_id: Set(item.id),
                    menu_item_id: Set(item.menu_item_id),
                    name: Set(item.name.clone()),
                    station: Set(item.station),
                    quantity: Set(item.quantity),
                    unit_price: Set(item.unit_price),
                    amount: Set(item.line_total),
                }
                .insert(&txn)
                .await?,
            );
        }

        if session.status == SessionStatus::Active {
            transition_session_in(&txn, session, SessionStatus::BillRequested).await?;
        }

        // Fully discounted bills have nothing to collect and settle at once
        let settlement = if bill.total.is_zero() {
            Some(settle_in(&txn, bill.clone(), Decimal::ZERO, Some(created_by)).await?)
        } else {
            None
        };
        txn.commit().await?;

        counter!("restro.bills.generated", 1);
        info!(%bill_id, invoice = %bill.invoice_number, total = %bill.total, "bill generated");
        self.emit(Event::BillGenerated {
            restaurant_id,
            bill_id,
        })
        .await;

        let bill = match settlement {
            Some(settlement) => {
                counter!("restro.bills.paid", 1);
                info!(%bill_id, "zero-total bill settled on issue");
                self.emit(Event::BillPaid {
                    restaurant_id,
                    bill_id,
                })
                .await;
                if let Some(voucher_id) = settlement.voucher_id {
                    self.emit(Event::VoucherPosted(voucher_id)).await;
                }
                settlement.bill
            }
            None => bill,
        };
        Ok(BillWithLines {
            bill,
            lines,
            payments: Vec::new(),
        })
    }

    #[instrument(skip(self))]
    pub async fn get_bill(
        &self,
        restaurant_id: Uuid,
        bill_id: Uuid,
    ) -> Result<BillWithLines, ServiceError> {
        let db = &*self.db;
        let bill = find_bill_in(db, restaurant_id, bill_id).await?;
        let lines = bill_lines_in(db, bill_id).await?;
        let payments = payment::Entity::find()
            .filter(payment::Column::BillId.eq(bill_id))
            .order_by_asc(payment::Column::CreatedAt)
            .all(db)
            .await?;
        Ok(BillWithLines {
            bill,
            lines,
            payments,
        })
    }

    /// The live bill of a session, if one was issued.
    #[instrument(skip(self))]
    pub async fn session_bill(
        &self,
        restaurant_id: Uuid,
        session_id: Uuid,
    ) -> Result<BillWithLines, ServiceError> {
        let bill = BillEntity::find()
            .filter(bill::Column::RestaurantId.eq(restaurant_id))
            .filter(bill::Column::SessionId.eq(session_id))
            .filter(bill::Column::Status.ne(BillStatus::Void))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("no bill for this session".to_string()))?;
        self.get_bill(restaurant_id, bill.id).await
    }

    #[instrument(skip(self))]
    pub async fn list_bills(
        &self,
        restaurant_id: Uuid,
        params: BillListParams,
        pagination: PaginationParams,
    ) -> Result<(Vec<bill::Model>, u64), ServiceError> {
        let mut query = BillEntity::find().filter(bill::Column::RestaurantId.eq(restaurant_id));
        if let Some(from) = params.from {
            query = query.filter(bill::Column::BillDate.gte(from));
        }
        if let Some(to) = params.to {
            query = query.filter(bill::Column::BillDate.lte(to));
        }
        if let Some(status) = params.status {
            query = query.filter(bill::Column::Status.eq(status));
        }

        let paginator = query
            .order_by_desc(bill::Column::CreatedAt)
            .paginate(&*self.db, pagination.limit());
        let total = paginator.num_items().await?;
        let bills = paginator.fetch_page(pagination.page_index()).await?;
        Ok((bills, total))
    }

    /// Counts the print and labels reprints as copies.
    #[instrument(skip(self))]
    pub async fn print_bill(
        &self,
        restaurant_id: Uuid,
        bill_id: Uuid,
    ) -> Result<PrintedBill, ServiceError> {
        let db = &*self.db;
        let bill = find_bill_in(db, restaurant_id, bill_id).await?;
        if bill.status == BillStatus::Void {
            return Err(ServiceError::InvalidOperation(
                "a void bill cannot be printed".to_string(),
            ));
        }
        let restaurant = restaurant::Entity::find_by_id(restaurant_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Restaurant", restaurant_id))?;

        let print_count = bill.print_count + 1;
        let mut active: bill::ActiveModel = bill.into();
        active.print_count = Set(print_count);
        active.last_printed_at = Set(Some(Utc::now()));
        active.updated_at = Set(Utc::now());
        active.update(db).await?;

        info!(%bill_id, print_count, "bill printed");
        Ok(PrintedBill {
            bill: self.get_bill(restaurant_id, bill_id).await?,
            restaurant_name: restaurant.name,
            restaurant_pan: restaurant.pan_number,
            copy_label: copy_label(print_count),
        })
    }

    /// Voids an unpaid bill. The invoice number stays used; redeemed points
    /// go back to the customer and the session can be billed again.
    #[instrument(skip(self, request))]
    pub async fn void_bill(
        &self,
        restaurant_id: Uuid,
        bill_id: Uuid,
        voided_by: Uuid,
        request: VoidBillRequest,
    ) -> Result<bill::Model, ServiceError> {
        request.validate()?;
        let txn = self.db.begin().await?;
        let bill = lock_bill_in(&txn, restaurant_id, bill_id).await?;
        if bill.status != BillStatus::Unpaid || bill.paid_amount > Decimal::ZERO {
            return Err(ServiceError::InvalidOperation(format!(
                "only unpaid bills can be voided (bill is {:?})",
                bill.status
            )));
        }
        let in_flight = payment::Entity::find()
            .filter(payment::Column::BillId.eq(bill_id))
            .filter(payment::Column::Status.ne(PaymentStatus::Failed))
            .count(&txn)
            .await?;
        if in_flight > 0 {
            return Err(ServiceError::InvalidOperation(
                "bill has payments in progress".to_string(),
            ));
        }

        if bill.loyalty_points_redeemed > 0 {
            if let Some(customer_id) = bill.customer_id {
                let customer = find_customer_in(&txn, restaurant_id, customer_id).await?;
                apply_points_in(
                    &txn,
                    customer,
                    bill.loyalty_points_redeemed,
                    LoyaltyKind::Refund,
                    Some(bill_id),
                    Some(format!("bill {} voided", bill.invoice_number)),
                    Some(voided_by),
                )
                .await?;
            }
        }

        let session = find_session_in(&txn, restaurant_id, bill.session_id).await?;
        if session.status == SessionStatus::Active {
            transition_session_in(&txn, session, SessionStatus::BillRequested).await?;
        }

        let cbms_status = match bill.cbms_status {
            CbmsStatus::Synced => CbmsStatus::Pending,
            other => other,
        };
        let now = Utc::now();
        let mut active: bill::ActiveModel = bill.into();
        active.status = Set(BillStatus::Void);
        active.void_reason = Set(Some(request.reason.trim().to_string()));
        active.voided_at = Set(Some(now));
        active.voided_by = Set(Some(voided_by));
        active.cbms_status = Set(cbms_status);
        active.updated_at = Set(now);
        let bill = active.update(&txn).await?;
        txn.commit().await?;

        counter!("restro.bills.voided", 1);
        warn!(%bill_id, invoice = %bill.invoice_number, reason = %request.reason, "bill voided");
        self.emit(Event::BillVoided {
            restaurant_id,
            bill_id,
        })
        .await;
        Ok(bill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn totals_apply_service_charge_then_vat() {
        let totals = compute_totals(dec!(1000), dec!(100), dec!(0), dec!(0.10), dec!(0.13)).unwrap();
        assert_eq!(totals.service_charge, dec!(90.00));
        assert_eq!(totals.taxable_amount, dec!(990.00));
        assert_eq!(totals.vat_amount, dec!(128.70));
        assert_eq!(totals.total, dec!(1118.70));
    }

    #[test]
    fn unregistered_restaurants_charge_no_vat() {
        let totals = compute_totals(dec!(450), dec!(0), dec!(50), dec!(0), dec!(0)).unwrap();
        assert_eq!(totals.vat_amount, Decimal::ZERO);
        assert_eq!(totals.total, dec!(400));
    }

    #[test]
    fn vat_rounds_half_away_from_zero() {
        // 0.13 * 100.50 = 13.065
        let totals = compute_totals(dec!(100.50), dec!(0), dec!(0), dec!(0), dec!(0.13)).unwrap();
        assert_eq!(totals.vat_amount, dec!(13.07));
    }

    #[test]
    fn discounts_cannot_exceed_subtotal() {
        assert!(compute_totals(dec!(100), dec!(60), dec!(50), dec!(0.1), dec!(0.13)).is_err());
        assert!(compute_totals(dec!(100), dec!(-1), dec!(0), dec!(0.1), dec!(0.13)).is_err());
    }

    #[test]
    fn reprints_are_labelled_copies() {
        assert_eq!(copy_label(1), None);
        assert_eq!(copy_label(2).as_deref(), Some("COPY OF ORIGINAL - 1"));
        assert_eq!(copy_label(4).as_deref(), Some("COPY OF ORIGINAL - 3"));
    }
}
