use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    common::round_money,
    config::KhaltiConfig,
    entities::{
        bill::{self, BillStatus},
        payment::{self, Entity as PaymentEntity, PaymentMethod, PaymentStatus},
        restaurant,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        accounting::post_sales_voucher,
        billing::{bill_lines_in, find_bill_in, lock_bill_in},
        khalti::{from_paisa, to_paisa, InitiatePayment, LookupStatus, PaymentGateway},
        loyalty::{find_customer_in, record_visit_in},
        tables::{find_session_in, mark_paid_in},
    },
};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RecordPaymentRequest {
    pub method: PaymentMethod,
    pub amount: Decimal,
    /// Cash handed over; change is returned when it exceeds the amount
    pub tendered: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentReceipt {
    pub payment: payment::Model,
    pub bill: bill::Model,
    pub change_due: Option<Decimal>,
    pub points_earned: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct KhaltiCheckout {
    pub payment_id: Uuid,
    pub pidx: String,
    pub payment_url: String,
    pub amount: Decimal,
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct KhaltiCallbackResult {
    pub payment: payment::Model,
    pub bill_status: BillStatus,
}

/// Cash change for a tendered amount.
pub fn change_for(
    method: PaymentMethod,
    amount: Decimal,
    tendered: Option<Decimal>,
) -> Result<Option<Decimal>, ServiceError> {
    match (method, tendered) {
        (_, None) => Ok(None),
        (PaymentMethod::Cash, Some(t)) if t >= amount => Ok(Some(round_money(t - amount))),
        (PaymentMethod::Cash, Some(t)) => Err(ServiceError::ValidationError(format!(
            "tendered {} is less than the amount {}",
            t, amount
        ))),
        (other, Some(_)) => Err(ServiceError::ValidationError(format!(
            "tendered amounts only apply to cash, not {}",
            other.as_str()
        ))),
    }
}

/// What applying a payment to a bill changed.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub bill: bill::Model,
    pub points_earned: i64,
    pub customer_id: Option<Uuid>,
    pub voucher_id: Option<Uuid>,
}

impl Settlement {
    pub fn fully_paid(&self) -> bool {
        self.bill.status == BillStatus::Paid
    }
}

/// Applies a completed payment to its bill. When the bill is covered the
/// session is settled, loyalty points are earned and the sales voucher is
/// posted, all on `conn`. `bill` must have been read with [`lock_bill_in`]
/// on the same transaction.
pub async fn settle_in<C: ConnectionTrait>(
    conn: &C,
    bill: bill::Model,
    amount: Decimal,
    actor: Option<Uuid>,
) -> Result<Settlement, ServiceError> {
    let now = Utc::now();
    let paid_amount = round_money(bill.paid_amount + amount);
    let fully_paid = paid_amount >= bill.total;

    let mut active: bill::ActiveModel = bill.into();
    active.paid_amount = Set(paid_amount);
    active.status = Set(if fully_paid {
        BillStatus::Paid
    } else {
        BillStatus::PartiallyPaid
    });
    if fully_paid {
        active.paid_at = Set(Some(now));
    }
    active.updated_at = Set(now);
    let bill = active.update(conn).await?;

    if !fully_paid {
        return Ok(Settlement {
            bill,
            points_earned: 0,
            customer_id: None,
            voucher_id: None,
        });
    }

    let session = find_session_in(conn, bill.restaurant_id, bill.session_id).await?;
    let customer_id = bill.customer_id.or(session.customer_id);
    mark_paid_in(conn, session).await?;

    let mut points_earned = 0;
    if let Some(customer_id) = customer_id {
        let restaurant = restaurant::Entity::find_by_id(bill.restaurant_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Restaurant", bill.restaurant_id))?;
        let customer = find_customer_in(conn, bill.restaurant_id, customer_id).await?;
        points_earned = record_visit_in(conn, &restaurant, customer, bill.id, bill.total).await?;
    }

    let lines = bill_lines_in(conn, bill.id).await?;
    let payments = PaymentEntity::find()
        .filter(payment::Column::BillId.eq(bill.id))
        .filter(payment::Column::Status.eq(PaymentStatus::Completed))
        .all(conn)
        .await?;
    let voucher = post_sales_voucher(conn, &bill, &lines, &payments, actor).await?;

    Ok(Settlement {
        bill,
        points_earned,
        customer_id,
        voucher_id: voucher.map(|v| v.id),
    })
}

fn check_amount(bill: &bill::Model, amount: Decimal) -> Result<(), ServiceError> {
    if !bill.status.accepts_payment() {
        return Err(ServiceError::InvalidOperation(format!(
            "bill {} is {:?}",
            bill.invoice_number, bill.status
        )));
    }
    if amount <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "payment amount must be positive".to_string(),
        ));
    }
    if amount > bill.outstanding() {
        return Err(ServiceError::ValidationError(format!(
            "amount {} exceeds the outstanding {}",
            amount,
            bill.outstanding()
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
    gateway: Option<Arc<dyn PaymentGateway>>,
    khalti: KhaltiConfig,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Option<Arc<EventSender>>,
        gateway: Option<Arc<dyn PaymentGateway>>,
        khalti: KhaltiConfig,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            khalti,
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }

    async fn announce(&self, payment_id: Uuid, settlement: &Settlement) {
        let bill = &settlement.bill;
        self.emit(Event::PaymentCompleted {
            payment_id,
            bill_id: bill.id,
        })
        .await;
        if !settlement.fully_paid() {
            return;
        }

        counter!("restro.bills.paid", 1);
        info!(bill_id = %bill.id, invoice = %bill.invoice_number, "bill settled");
        self.emit(Event::BillPaid {
            restaurant_id: bill.restaurant_id,
            bill_id: bill.id,
        })
        .await;
        if let (Some(customer_id), true) = (settlement.customer_id, settlement.points_earned > 0) {
            counter!("restro.loyalty.points_earned", settlement.points_earned as u64);
            self.emit(Event::LoyaltyPointsEarned {
                customer_id,
                points: settlement.points_earned,
            })
            .await;
        }
        if let Some(voucher_id) = settlement.voucher_id {
            self.emit(Event::VoucherPosted(voucher_id)).await;
        }
    }

    /// Takes a counter payment. Everything that follows a full payment
    /// happens in the same transaction.
    #[instrument(skip(self, request), fields(method = ?request.method, amount = %request.amount))]
    pub async fn record_payment(
        &self,
        restaurant_id: Uuid,
        bill_id: Uuid,
        received_by: Uuid,
        request: RecordPaymentRequest,
    ) -> Result<PaymentReceipt, ServiceError> {
        let amount = round_money(request.amount);
        let change_due = change_for(request.method, amount, request.tendered.map(round_money))?;

        let txn = self.db.begin().await?;
        let bill = lock_bill_in(&txn, restaurant_id, bill_id).await?;
        check_amount(&bill, amount)?;

        let now = Utc::now();
        let payment = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            restaurant_id: Set(restaurant_id),
            bill_id: Set(bill_id),
            method: Set(request.method),
            amount: Set(amount),
            tendered: Set(request.tendered.map(round_money)),
            change_due: Set(change_due),
            status: Set(PaymentStatus::Completed),
            gateway_ref: Set(None),
            gateway_txn_id: Set(None),
            failure_reason: Set(None),
            received_by: Set(Some(received_by)),
            created_at: Set(now),
            completed_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;

        let settlement = settle_in(&txn, bill, amount, Some(received_by)).await?;
        txn.commit().await?;

        counter!("restro.payments.completed", 1);
        info!(payment_id = %payment.id, %bill_id, "payment recorded");
        self.announce(payment.id, &settlement).await;
        Ok(PaymentReceipt {
            payment,
            points_earned: settlement.points_earned,
            bill: settlement.bill,
            change_due,
        })
    }

    fn gateway(&self) -> Result<&Arc<dyn PaymentGateway>, ServiceError> {
        self.gateway.as_ref().ok_or_else(|| {
            ServiceError::InvalidOperation("Khalti payments are not configured".to_string())
        })
    }

    /// Starts a Khalti checkout for what is left on the bill.
    #[instrument(skip(self))]
    pub async fn initiate_khalti(
        &self,
        restaurant_id: Uuid,
        bill_id: Uuid,
        initiated_by: Option<Uuid>,
    ) -> Result<KhaltiCheckout, ServiceError> {
        let gateway = self.gateway()?;
        let bill = find_bill_in(&*self.db, restaurant_id, bill_id).await?;
        let amount = bill.outstanding();
        check_amount(&bill, amount)?;
        let return_url = self.khalti.return_url.clone().ok_or_else(|| {
            ServiceError::InvalidOperation("Khalti return_url is not configured".to_string())
        })?;
        let website_url = self
            .khalti
            .website_url
            .clone()
            .unwrap_or_else(|| return_url.clone());

        let initiated = gateway
            .initiate(&InitiatePayment {
                return_url,
                website_url,
                amount: to_paisa(amount)?,
                purchase_order_id: bill.id.to_string(),
                purchase_order_name: format!("Invoice {}", bill.invoice_number),
            })
            .await?;

        let payment = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            restaurant_id: Set(restaurant_id),
            bill_id: Set(bill_id),
            method: Set(PaymentMethod::Khalti),
            amount: Set(amount),
            tendered: Set(None),
            change_due: Set(None),
            status: Set(PaymentStatus::Initiated),
            gateway_ref: Set(Some(initiated.pidx.clone())),
            gateway_txn_id: Set(None),
            failure_reason: Set(None),
            received_by: Set(initiated_by),
            created_at: Set(Utc::now()),
            completed_at: Set(None),
        }
        .insert(&*self.db)
        .await?;

        counter!("restro.payments.khalti_initiated", 1);
        info!(payment_id = %payment.id, pidx = %initiated.pidx, "Khalti checkout started");
        Ok(KhaltiCheckout {
            payment_id: payment.id,
            pidx: initiated.pidx,
            payment_url: initiated.payment_url,
            amount,
            expires_at: initiated.expires_at,
        })
    }

    /// Confirms a Khalti checkout with a server-side lookup. Safe to call
    /// any number of times for the same `pidx`.
    #[instrument(skip(self))]
    pub async fn khalti_callback(&self, pidx: &str) -> Result<KhaltiCallbackResult, ServiceError> {
        let gateway = self.gateway()?;
        let payment = PaymentEntity::find()
            .filter(payment::Column::GatewayRef.eq(pidx))
            .filter(payment::Column::Method.eq(PaymentMethod::Khalti))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("no payment for pidx {}", pidx)))?;

        if payment.status != PaymentStatus::Initiated {
            let bill = find_bill_in(&*self.db, payment.restaurant_id, payment.bill_id).await?;
            return Ok(KhaltiCallbackResult {
                payment,
                bill_status: bill.status,
            });
        }

        let lookup = gateway.lookup(pidx).await?;
        match lookup.status {
            LookupStatus::Completed => {
                let expected = to_paisa(payment.amount)?;
                if lookup.total_amount != expected {
                    error!(
                        payment_id = %payment.id,
                        expected,
                        received = lookup.total_amount,
                        "Khalti amount mismatch"
                    );
                    let reason = format!(
                        "paid {} but {} was due",
                        from_paisa(lookup.total_amount),
                        payment.amount
                    );
                    return self.fail(payment, &reason).await;
                }
                self.complete(payment, lookup.transaction_id).await
            }
            LookupStatus::Expired | LookupStatus::UserCanceled => {
                let reason = format!("{:?}", lookup.status);
                self.fail(payment, &reason).await
            }
            other => {
                info!(payment_id = %payment.id, status = ?other, "Khalti payment not final yet");
                let bill = find_bill_in(&*self.db, payment.restaurant_id, payment.bill_id).await?;
                Ok(KhaltiCallbackResult {
                    payment,
                    bill_status: bill.status,
                })
            }
        }
    }

    async fn complete(
        &self,
        payment: payment::Model,
        transaction_id: Option<String>,
    ) -> Result<KhaltiCallbackResult, ServiceError> {
        let txn = self.db.begin().await?;
        let bill = lock_bill_in(&txn, payment.restaurant_id, payment.bill_id).await?;
        if check_amount(&bill, payment.amount).is_err() {
            drop(txn);
            warn!(payment_id = %payment.id, "Khalti payment arrived for a settled bill");
            return self
                .fail(payment, "bill was already settled; refund required")
                .await;
        }

        let now = Utc::now();
        let claimed = PaymentEntity::update_many()
            .col_expr(payment::Column::Status, Expr::value(PaymentStatus::Completed))
            .col_expr(payment::Column::GatewayTxnId, Expr::value(transaction_id))
            .col_expr(payment::Column::CompletedAt, Expr::value(Some(now)))
            .filter(payment::Column::Id.eq(payment.id))
            .filter(payment::Column::Status.eq(PaymentStatus::Initiated))
            .exec(&txn)
            .await?;
        if claimed.rows_affected == 0 {
            drop(txn);
            let payment = PaymentEntity::find_by_id(payment.id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| ServiceError::not_found("Payment", payment.id))?;
            let bill = find_bill_in(&*self.db, payment.restaurant_id, payment.bill_id).await?;
            return Ok(KhaltiCallbackResult {
                payment,
                bill_status: bill.status,
            });
        }

        let settlement = settle_in(&txn, bill, payment.amount, None).await?;
        let payment = PaymentEntity::find_by_id(payment.id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Payment", payment.id))?;
        txn.commit().await?;

        counter!("restro.payments.completed", 1);
        info!(payment_id = %payment.id, "Khalti payment completed");
        self.announce(payment.id, &settlement).await;
        Ok(KhaltiCallbackResult {
            payment,
            bill_status: settlement.bill.status,
        })
    }

    async fn fail(
        &self,
        payment: payment::Model,
        reason: &str,
    ) -> Result<KhaltiCallbackResult, ServiceError> {
        PaymentEntity::update_many()
            .col_expr(payment::Column::Status, Expr::value(PaymentStatus::Failed))
            .col_expr(payment::Column::FailureReason, Expr::value(reason.to_string()))
            .filter(payment::Column::Id.eq(payment.id))
            .filter(payment::Column::Status.eq(PaymentStatus::Initiated))
            .exec(&*self.db)
            .await?;
        let payment_id = payment.id;
        let payment = PaymentEntity::find_by_id(payment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Payment", payment_id))?;
        let bill = find_bill_in(&*self.db, payment.restaurant_id, payment.bill_id).await?;

        counter!("restro.payments.failed", 1);
        self.emit(Event::PaymentFailed(payment_id)).await;
        Ok(KhaltiCallbackResult {
            payment,
            bill_status: bill.status,
        })
    }
}
