use chrono::{NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::{round_money, validate_pan},
    entities::{
        order_item::{self, ItemStatus},
        purchase::{self, Entity as PurchaseEntity, PurchasePaymentMode},
        purchase_line,
        recipe_line::{self, Entity as RecipeEntity},
        restaurant,
        stock_item::{self, Entity as StockItemEntity},
        stock_movement::{self, Entity as MovementEntity, MovementKind},
        vendor::{self, Entity as VendorEntity},
        voucher::VoucherType,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        accounting::{keys, post_system_voucher, NewVoucher, SystemLine},
        compliance::{business_date, FiscalCalendar},
    },
};

const ORDER_ITEM_REF: &str = "order_item";

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateStockItemRequest {
    #[validate(length(min = 1, max = 120, message = "Name is required"))]
    pub name: String,
    #[validate(length(min = 1, max = 16, message = "Unit is required"))]
    pub unit: String,
    #[serde(default)]
    pub reorder_level: Decimal,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AdjustStockRequest {
    /// Signed change in quantity
    pub delta: Decimal,
    #[validate(length(min = 1, max = 255, message = "A reason is required"))]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct WastageRequest {
    pub quantity: Decimal,
    #[validate(length(min = 1, max = 255, message = "A reason is required"))]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateVendorRequest {
    #[validate(length(min = 1, max = 120, message = "Name is required"))]
    pub name: String,
    pub pan_number: Option<String>,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    #[validate(length(max = 255))]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct PurchaseLineInput {
    pub stock_item_id: Uuid,
    pub quantity: Decimal,
    /// Cost per unit before VAT
    pub rate: Decimal,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RecordPurchaseRequest {
    pub vendor_id: Uuid,
    #[validate(length(min = 1, max = 64, message = "Vendor bill number is required"))]
    pub bill_number: String,
    pub purchase_date: Option<NaiveDate>,
    pub payment_mode: PurchasePaymentMode,
    #[serde(default)]
    pub vat_applicable: bool,
    pub lines: Vec<PurchaseLineInput>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PurchaseWithLines {
    #[serde(flatten)]
    pub purchase: purchase::Model,
    pub lines: Vec<purchase_line::Model>,
}

/// Average cost after receiving `qty` units at `rate`. Stock at or below
/// zero carries no cost history.
pub fn weighted_average_cost(
    on_hand: Decimal,
    average_cost: Decimal,
    qty: Decimal,
    rate: Decimal,
) -> Decimal {
    if on_hand <= Decimal::ZERO {
        return rate;
    }
    let total_qty = on_hand + qty;
    if total_qty.is_zero() {
        return rate;
    }
    ((on_hand * average_cost + qty * rate) / total_qty).round_dp(4)
}

/// Stock reference carried by a movement.
#[derive(Debug, Clone, Copy)]
pub struct MovementRef<'a> {
    pub kind: &'a str,
    pub id: Uuid,
}

/// Applies a signed quantity change and records the movement.
#[allow(clippy::too_many_arguments)]
pub async fn move_stock_in<C: ConnectionTrait>(
    conn: &C,
    item: stock_item::Model,
    delta: Decimal,
    kind: MovementKind,
    unit_cost: Decimal,
    reference: Option<MovementRef<'_>>,
    note: Option<String>,
    created_by: Option<Uuid>,
) -> Result<stock_item::Model, ServiceError> {
    let now = Utc::now();
    let quantity = item.quantity + delta;
    if quantity < Decimal::ZERO {
        warn!(stock_item_id = %item.id, name = %item.name, %quantity, "stock went negative");
    }

    movement_in(conn, &item, delta, kind, unit_cost, reference, note, created_by).await?;

    let mut active: stock_item::ActiveModel = item.into();
    active.quantity = Set(quantity);
    active.updated_at = Set(now);
    Ok(active.update(conn).await?)
}

#[allow(clippy::too_many_arguments)]
async fn movement_in<C: ConnectionTrait>(
    conn: &C,
    item: &stock_item::Model,
    quantity: Decimal,
    kind: MovementKind,
    unit_cost: Decimal,
    reference: Option<MovementRef<'_>>,
    note: Option<String>,
    created_by: Option<Uuid>,
) -> Result<stock_movement::Model, ServiceError> {
    Ok(stock_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        restaurant_id: Set(item.restaurant_id),
        stock_item_id: Set(item.id),
        kind: Set(kind),
        quantity: Set(quantity),
        unit_cost: Set(unit_cost),
        reference_type: Set(reference.map(|r| r.kind.to_string())),
        reference_id: Set(reference.map(|r| r.id)),
        note: Set(note),
        created_by: Set(created_by),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?)
}

/// Loads and row-locks stock items in id order so concurrent movements
/// queue behind each other without deadlocking.
async fn stock_items_by_id<C: ConnectionTrait>(
    conn: &C,
    restaurant_id: Uuid,
    ids: Vec<Uuid>,
) -> Result<HashMap<Uuid, stock_item::Model>, ServiceError> {
    Ok(StockItemEntity::find()
        .filter(stock_item::Column::RestaurantId.eq(restaurant_id))
        .filter(stock_item::Column::Id.is_in(ids))
        .order_by_asc(stock_item::Column::Id)
        .lock_exclusive()
        .all(conn)
        .await?
        .into_iter()
        .map(|s| (s.id, s))
        .collect())
}

/// Deducts recipe ingredients for confirmed order items. Returns the stock
/// items left at or below their reorder level.
pub async fn consume_for_items_in<C: ConnectionTrait>(
    conn: &C,
    restaurant_id: Uuid,
    items: &[order_item::Model],
    created_by: Option<Uuid>,
) -> Result<Vec<stock_item::Model>, ServiceError> {
    let live: Vec<&order_item::Model> = items
        .iter()
        .filter(|i| i.status != ItemStatus::Cancelled)
        .collect();
    if live.is_empty() {
        return Ok(Vec::new());
    }

    let menu_ids: Vec<Uuid> = live.iter().map(|i| i.menu_item_id).collect();
    let recipes = RecipeEntity::find()
        .filter(recipe_line::Column::RestaurantId.eq(restaurant_id))
        .filter(recipe_line::Column::MenuItemId.is_in(menu_ids))
        .all(conn)
        .await?;
    if recipes.is_empty() {
        return Ok(Vec::new());
    }

    let mut stock = stock_items_by_id(
        conn,
        restaurant_id,
        recipes.iter().map(|r| r.stock_item_id).collect(),
    )
    .await?;

    for item in live {
        for recipe in recipes.iter().filter(|r| r.menu_item_id == item.menu_item_id) {
            let Some(current) = stock.remove(&recipe.stock_item_id) else {
                continue;
            };
            let used = recipe.quantity * Decimal::from(item.quantity);
            let unit_cost = current.average_cost;
            let updated = move_stock_in(
                conn,
                current,
                -used,
                MovementKind::Consumption,
                unit_cost,
                Some(MovementRef {
                    kind: ORDER_ITEM_REF,
                    id: item.id,
                }),
                None,
                created_by,
            )
            .await?;
            stock.insert(updated.id, updated);
        }
    }

    let touched: HashSet<Uuid> = recipes.iter().map(|r| r.stock_item_id).collect();
    Ok(stock
        .into_values()
        .filter(|s| touched.contains(&s.id) && s.is_low())
        .collect())
}

/// Puts back what was consumed for the given order items. Items with no
/// consumption, or already reversed, are skipped.
pub async fn reverse_consumption_in<C: ConnectionTrait>(
    conn: &C,
    restaurant_id: Uuid,
    item_ids: &[Uuid],
    created_by: Option<Uuid>,
) -> Result<(), ServiceError> {
    if item_ids.is_empty() {
        return Ok(());
    }
    let movements = MovementEntity::find()
        .filter(stock_movement::Column::RestaurantId.eq(restaurant_id))
        .filter(stock_movement::Column::ReferenceType.eq(ORDER_ITEM_REF))
        .filter(stock_movement::Column::ReferenceId.is_in(item_ids.to_vec()))
        .all(conn)
        .await?;

    let reversed: HashSet<(Uuid, Uuid)> = movements
        .iter()
        .filter(|m| m.kind == MovementKind::ConsumptionReversal)
        .filter_map(|m| m.reference_id.map(|r| (r, m.stock_item_id)))
        .collect();
    let to_reverse: Vec<&stock_movement::Model> = movements
        .iter()
        .filter(|m| m.kind == MovementKind::Consumption)
        .filter(|m| {
            m.reference_id
                .map(|r| !reversed.contains(&(r, m.stock_item_id)))
                .unwrap_or(false)
        })
        .collect();
    if to_reverse.is_empty() {
        return Ok(());
    }

    let mut stock = stock_items_by_id(
        conn,
        restaurant_id,
        to_reverse.iter().map(|m| m.stock_item_id).collect(),
    )
    .await?;
    for movement in to_reverse {
        let Some(current) = stock.remove(&movement.stock_item_id) else {
            continue;
        };
        let updated = move_stock_in(
            conn,
            current,
            -movement.quantity,
            MovementKind::ConsumptionReversal,
            movement.unit_cost,
            movement.reference_id.map(|id| MovementRef {
                kind: ORDER_ITEM_REF,
                id,
            }),
            None,
            created_by,
        )
        .await?;
        stock.insert(updated.id, updated);
    }
    Ok(())
}

#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
    calendar: FiscalCalendar,
}

impl InventoryService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Option<Arc<EventSender>>,
        calendar: FiscalCalendar,
    ) -> Self {
        Self {
            db,
            event_sender,
            calendar,
        }
    }

    /// Publishes `StockLow` for each item.
    pub async fn notify_low_stock(&self, items: &[stock_item::Model]) {
        for item in items {
            counter!("restro.inventory.low_stock", 1);
            if let Some(sender) = &self.event_sender {
                sender
                    .send_or_log(Event::StockLow {
                        restaurant_id: item.restaurant_id,
                        stock_item_id: item.id,
                        quantity: item.quantity,
                    })
                    .await;
            }
        }
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_stock_item(
        &self,
        restaurant_id: Uuid,
        request: CreateStockItemRequest,
    ) -> Result<stock_item::Model, ServiceError> {
        request.validate()?;
        if request.reorder_level < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "reorder level cannot be negative".to_string(),
            ));
        }
        let name = request.name.trim().to_string();
        let db = &*self.db;

        let duplicate = StockItemEntity::find()
            .filter(stock_item::Column::RestaurantId.eq(restaurant_id))
            .filter(stock_item::Column::Name.eq(name.clone()))
            .one(db)
            .await?;
        if duplicate.is_some() {
            return Err(ServiceError::Conflict(format!(
                "stock item '{}' already exists",
                name
            )));
        }

        let now = Utc::now();
        let item = stock_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            restaurant_id: Set(restaurant_id),
            name: Set(name),
            unit: Set(request.unit.trim().to_string()),
            quantity: Set(Decimal::ZERO),
            reorder_level: Set(request.reorder_level),
            average_cost: Set(Decimal::ZERO),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await?;
        Ok(item)
    }

    #[instrument(skip(self))]
    pub async fn list_stock_items(
        &self,
        restaurant_id: Uuid,
    ) -> Result<Vec<stock_item::Model>, ServiceError> {
        Ok(StockItemEntity::find()
            .filter(stock_item::Column::RestaurantId.eq(restaurant_id))
            .order_by_asc(stock_item::Column::Name)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn get_stock_item(
        &self,
        restaurant_id: Uuid,
        stock_item_id: Uuid,
    ) -> Result<stock_item::Model, ServiceError> {
        find_stock_item_in(&*self.db, restaurant_id, stock_item_id).await
    }

    /// Active items at or below their reorder level.
    #[instrument(skip(self))]
    pub async fn low_stock(
        &self,
        restaurant_id: Uuid,
    ) -> Result<Vec<stock_item::Model>, ServiceError> {
        Ok(self
            .list_stock_items(restaurant_id)
            .await?
            .into_iter()
            .filter(|s| s.is_active && s.is_low())
            .collect())
    }

    #[instrument(skip(self, request))]
    pub async fn adjust_stock(
        &self,
        restaurant_id: Uuid,
        stock_item_id: Uuid,
        user_id: Uuid,
        request: AdjustStockRequest,
    ) -> Result<stock_item::Model, ServiceError> {
        request.validate()?;
        if request.delta.is_zero() {
            return Err(ServiceError::ValidationError(
                "adjustment must be non-zero".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let item = lock_stock_item_in(&txn, restaurant_id, stock_item_id).await?;
        let unit_cost = item.average_cost;
        let updated = move_stock_in(
            &txn,
            item,
            request.delta,
            MovementKind::Adjustment,
            unit_cost,
            None,
            Some(request.reason.trim().to_string()),
            Some(user_id),
        )
        .await?;
        txn.commit().await?;

        info!(%stock_item_id, delta = %request.delta, "stock adjusted");
        if request.delta < Decimal::ZERO && updated.is_low() {
            self.notify_low_stock(std::slice::from_ref(&updated)).await;
        }
        Ok(updated)
    }

    /// Writes stock off at average cost and books the loss.
    #[instrument(skip(self, request))]
    pub async fn record_wastage(
        &self,
        restaurant_id: Uuid,
        stock_item_id: Uuid,
        user_id: Uuid,
        request: WastageRequest,
    ) -> Result<stock_item::Model, ServiceError> {
        request.validate()?;
        if request.quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "wastage quantity must be positive".to_string(),
            ));
        }

        let today = business_date(Utc::now());
        let txn = self.db.begin().await?;
        let item = lock_stock_item_in(&txn, restaurant_id, stock_item_id).await?;
        let unit_cost = item.average_cost;
        let value = round_money(request.quantity * unit_cost);
        let name = item.name.clone();
        let reason = request.reason.trim().to_string();

        let updated = move_stock_in(
            &txn,
            item,
            -request.quantity,
            MovementKind::Wastage,
            unit_cost,
            None,
            Some(reason.clone()),
            Some(user_id),
        )
        .await?;

        post_system_voucher(
            &txn,
            NewVoucher {
                restaurant_id,
                voucher_type: VoucherType::Journal,
                voucher_date: today,
                fiscal_year: self.calendar.label_for(today),
                narration: format!("Wastage of {} {}: {}", request.quantity, name, reason),
                reference_type: Some("wastage".to_string()),
                reference_id: Some(stock_item_id),
                created_by: Some(user_id),
            },
            vec![
                SystemLine::debit(keys::WASTAGE, value),
                SystemLine::credit(keys::INVENTORY, value),
            ],
        )
        .await?;
        txn.commit().await?;

        counter!("restro.inventory.wastage", 1);
        if updated.is_low() {
            self.notify_low_stock(std::slice::from_ref(&updated)).await;
        }
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn movements(
        &self,
        restaurant_id: Uuid,
        stock_item_id: Uuid,
    ) -> Result<Vec<stock_movement::Model>, ServiceError> {
        find_stock_item_in(&*self.db, restaurant_id, stock_item_id).await?;
        Ok(MovementEntity::find()
            .filter(stock_movement::Column::StockItemId.eq(stock_item_id))
            .order_by_desc(stock_movement::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_vendor(
        &self,
        restaurant_id: Uuid,
        request: CreateVendorRequest,
    ) -> Result<vendor::Model, ServiceError> {
        request.validate()?;
        let pan_number = request
            .pan_number
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        if let Some(pan) = &pan_number {
            validate_pan(pan)?;
        }

        Ok(vendor::ActiveModel {
            id: Set(Uuid::new_v4()),
            restaurant_id: Set(restaurant_id),
            name: Set(request.name.trim().to_string()),
            pan_number: Set(pan_number),
            phone: Set(request.phone),
            address: Set(request.address),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?)
    }

    #[instrument(skip(self))]
    pub async fn list_vendors(&self, restaurant_id: Uuid) -> Result<Vec<vendor::Model>, ServiceError> {
        Ok(VendorEntity::find()
            .filter(vendor::Column::RestaurantId.eq(restaurant_id))
            .order_by_asc(vendor::Column::Name)
            .all(&*self.db)
            .await?)
    }

    /// Receives goods: stock in at a new average cost plus the purchase voucher.
    #[instrument(skip(self, request), fields(vendor_id = %request.vendor_id, bill = %request.bill_number))]
    pub async fn record_purchase(
        &self,
        restaurant_id: Uuid,
        user_id: Uuid,
        request: RecordPurchaseRequest,
    ) -> Result<PurchaseWithLines, ServiceError> {
        request.validate()?;
        if request.lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "a purchase needs at least one line".to_string(),
            ));
        }
        for (i, line) in request.lines.iter().enumerate() {
            if line.quantity <= Decimal::ZERO || line.rate < Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "line {}: quantity must be positive and rate non-negative",
                    i + 1
                )));
            }
        }

        let bill_number = request.bill_number.trim().to_string();
        let purchase_date = request
            .purchase_date
            .unwrap_or_else(|| business_date(Utc::now()));

        let txn = self.db.begin().await?;

        let restaurant = restaurant::Entity::find_by_id(restaurant_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Restaurant", restaurant_id))?;
        let vendor = VendorEntity::find_by_id(request.vendor_id)
            .filter(vendor::Column::RestaurantId.eq(restaurant_id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Vendor", request.vendor_id))?;

        let duplicate = PurchaseEntity::find()
            .filter(purchase::Column::RestaurantId.eq(restaurant_id))
            .filter(purchase::Column::VendorId.eq(vendor.id))
            .filter(purchase::Column::BillNumber.eq(bill_number.clone()))
            .one(&txn)
            .await?;
        if duplicate.is_some() {
            return Err(ServiceError::Conflict(format!(
                "bill {} from {} is already recorded",
                bill_number, vendor.name
            )));
        }

        let mut stock = stock_items_by_id(
            &txn,
            restaurant_id,
            request.lines.iter().map(|l| l.stock_item_id).collect(),
        )
        .await?;
        if let Some(missing) = request.lines.iter().find(|l| !stock.contains_key(&l.stock_item_id)) {
            return Err(ServiceError::not_found("Stock item", missing.stock_item_id));
        }

        let subtotal: Decimal = request
            .lines
            .iter()
            .map(|l| round_money(l.quantity * l.rate))
            .sum();
        let vat_amount = if request.vat_applicable {
            round_money(subtotal * restaurant.effective_vat_rate())
        } else {
            Decimal::ZERO
        };
        let total = subtotal + vat_amount;

        let purchase_id = Uuid::new_v4();
        let now = Utc::now();
        let mut lines = Vec::with_capacity(request.lines.len());
        for input in &request.lines {
            let line = purchase_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                purchase_id: Set(purchase_id),
                stock_item_id: Set(input.stock_item_id),
                quantity: Set(input.quantity),
                rate: Set(input.rate),
                amount: Set(round_money(input.quantity * input.rate)),
            };
            lines.push(line);
        }

        let voucher = post_system_voucher(
            &txn,
            NewVoucher {
                restaurant_id,
                voucher_type: VoucherType::Purchase,
                voucher_date: purchase_date,
                fiscal_year: self.calendar.label_for(purchase_date),
                narration: format!("Purchase from {} against bill {}", vendor.name, bill_number),
                reference_type: Some("purchase".to_string()),
                reference_id: Some(purchase_id),
                created_by: Some(user_id),
            },
            vec![
                SystemLine::debit(keys::INVENTORY, subtotal),
                SystemLine::debit(keys::VAT_INPUT, vat_amount),
                SystemLine::credit(
                    match request.payment_mode {
                        PurchasePaymentMode::Cash => keys::CASH,
                        PurchasePaymentMode::Credit => keys::ACCOUNTS_PAYABLE,
                    },
                    total,
                ),
            ],
        )
        .await?;

        let purchase = purchase::ActiveModel {
            id: Set(purchase_id),
            restaurant_id: Set(restaurant_id),
            vendor_id: Set(vendor.id),
            bill_number: Set(bill_number),
            purchase_date: Set(purchase_date),
            payment_mode: Set(request.payment_mode),
            subtotal: Set(subtotal),
            vat_amount: Set(vat_amount),
            total: Set(total),
            voucher_id: Set(voucher.map(|v| v.id)),
            created_by: Set(Some(user_id)),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut stored = Vec::with_capacity(lines.len());
        for line in lines {
            stored.push(line.insert(&txn).await?);
        }

        for input in &request.lines {
            let Some(current) = stock.remove(&input.stock_item_id) else {
                continue;
            };
            let average_cost = weighted_average_cost(
                current.quantity,
                current.average_cost,
                input.quantity,
                input.rate,
            );
            let mut updated = move_stock_in(
                &txn,
                current,
                input.quantity,
                MovementKind::Purchase,
                input.rate,
                Some(MovementRef {
                    kind: "purchase",
                    id: purchase_id,
                }),
                None,
                Some(user_id),
            )
            .await?;
            let mut active: stock_item::ActiveModel = updated.into();
            active.average_cost = Set(average_cost);
            updated = active.update(&txn).await?;
            stock.insert(updated.id, updated);
        }

        txn.commit().await?;

        counter!("restro.inventory.purchases", 1);
        info!(purchase_id = %purchase.id, %total, "purchase recorded");
        Ok(PurchaseWithLines {
            purchase,
            lines: stored,
        })
    }

    #[instrument(skip(self))]
    pub async fn list_purchases(
        &self,
        restaurant_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<purchase::Model>, ServiceError> {
        Ok(PurchaseEntity::find()
            .filter(purchase::Column::RestaurantId.eq(restaurant_id))
            .filter(purchase::Column::PurchaseDate.gte(from))
            .filter(purchase::Column::PurchaseDate.lte(to))
            .order_by_desc(purchase::Column::PurchaseDate)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn get_purchase(
        &self,
        restaurant_id: Uuid,
        purchase_id: Uuid,
    ) -> Result<PurchaseWithLines, ServiceError> {
        let purchase = PurchaseEntity::find_by_id(purchase_id)
            .filter(purchase::Column::RestaurantId.eq(restaurant_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Purchase", purchase_id))?;
        let lines = purchase_line::Entity::find()
            .filter(purchase_line::Column::PurchaseId.eq(purchase_id))
            .all(&*self.db)
            .await?;
        Ok(PurchaseWithLines { purchase, lines })
    }
}

pub async fn find_stock_item_in<C: ConnectionTrait>(
    conn: &C,
    restaurant_id: Uuid,
    stock_item_id: Uuid,
) -> Result<stock_item::Model, ServiceError> {
    StockItemEntity::find_by_id(stock_item_id)
        .filter(stock_item::Column::RestaurantId.eq(restaurant_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Stock item", stock_item_id))
}

/// Same as [`find_stock_item_in`] but holds the row until the transaction ends.
pub async fn lock_stock_item_in<C: ConnectionTrait>(
    conn: &C,
    restaurant_id: Uuid,
    stock_item_id: Uuid,
) -> Result<stock_item::Model, ServiceError> {
    StockItemEntity::find_by_id(stock_item_id)
        .filter(stock_item::Column::RestaurantId.eq(restaurant_id))
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Stock item", stock_item_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn average_cost_blends_old_and_new_stock() {
        assert_eq!(
            weighted_average_cost(dec!(10), dec!(100), dec!(10), dec!(120)),
            dec!(110)
        );
    }

    #[test]
    fn empty_or_negative_stock_takes_the_purchase_rate() {
        assert_eq!(weighted_average_cost(dec!(0), dec!(90), dec!(5), dec!(120)), dec!(120));
        assert_eq!(weighted_average_cost(dec!(-3), dec!(90), dec!(5), dec!(120)), dec!(120));
    }
}
