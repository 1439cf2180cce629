use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::round_money,
    entities::{
        dining_table,
        kitchen_ticket::{self, TicketStatus},
        menu_item::{self, Entity as MenuItemEntity},
        order::{self, Entity as OrderEntity, OrderSource, OrderStatus},
        order_item::{self, Entity as OrderItemEntity, ItemStatus},
        stock_item,
        table_session::SessionStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        compliance::FiscalCalendar,
        inventory::{consume_for_items_in, reverse_consumption_in},
        kitchen::complete_ticket_if_done_in,
        sequences::{self, format_ticket_number, next_value},
        tables::find_session_in,
    },
};

const MAX_LINE_QUANTITY: i32 = 99;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderLineInput {
    pub menu_item_id: Uuid,
    #[validate(range(min = 1, max = 99))]
    pub quantity: i32,
    #[validate(length(max = 255))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct PlaceOrderRequest {
    #[validate(length(min = 1, message = "An order needs at least one item"))]
    pub items: Vec<OrderLineInput>,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CancelOrderRequest {
    #[validate(length(min = 1, max = 255, message = "A reason is required"))]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub tickets: Vec<kitchen_ticket::Model>,
}

/// Order status implied by its items.
///
/// Cancelled items are ignored; an order whose items are all cancelled is
/// itself cancelled. Before the kitchen starts, the order keeps `Pending` or
/// `Confirmed`.
pub fn derive_order_status(current: OrderStatus, items: &[ItemStatus]) -> OrderStatus {
    let live: Vec<ItemStatus> = items
        .iter()
        .copied()
        .filter(|s| *s != ItemStatus::Cancelled)
        .collect();

    if live.is_empty() {
        return OrderStatus::Cancelled;
    }
    if live.iter().all(|s| *s == ItemStatus::Served) {
        return OrderStatus::Served;
    }
    if live
        .iter()
        .all(|s| matches!(s, ItemStatus::Ready | ItemStatus::Served))
    {
        return OrderStatus::Ready;
    }
    if live.iter().any(|s| *s != ItemStatus::Pending) {
        return OrderStatus::Preparing;
    }
    match current {
        OrderStatus::Pending => OrderStatus::Pending,
        _ => OrderStatus::Confirmed,
    }
}

pub async fn find_order_in<C: ConnectionTrait>(
    conn: &C,
    restaurant_id: Uuid,
    order_id: Uuid,
) -> Result<order::Model, ServiceError> {
    OrderEntity::find_by_id(order_id)
        .filter(order::Column::RestaurantId.eq(restaurant_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Order", order_id))
}

pub async fn order_items_in<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Vec<order_item::Model>, ServiceError> {
    Ok(OrderItemEntity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::CreatedAt)
        .order_by_asc(order_item::Column::Name)
        .all(conn)
        .await?)
}

/// Re-derives and stores the order status from its items.
pub async fn refresh_order_status_in<C: ConnectionTrait>(
    conn: &C,
    order: order::Model,
) -> Result<order::Model, ServiceError> {
    let statuses: Vec<ItemStatus> = order_items_in(conn, order.id)
        .await?
        .into_iter()
        .map(|i| i.status)
        .collect();
    let status = derive_order_status(order.status, &statuses);
    if status == order.status {
        return Ok(order);
    }

    let mut active: order::ActiveModel = order.into();
    active.status = Set(status);
    active.updated_at = Set(Utc::now());
    Ok(active.update(conn).await?)
}

/// Prints one ticket per station present among the live items and links the
/// items to their ticket.
pub async fn issue_tickets_in<C: ConnectionTrait>(
    conn: &C,
    order: &order::Model,
    items: &[order_item::Model],
    table_name: &str,
    fiscal_year: &str,
) -> Result<Vec<kitchen_ticket::Model>, ServiceError> {
    let stations: BTreeSet<_> = items
        .iter()
        .filter(|i| i.status != ItemStatus::Cancelled && i.ticket_id.is_none())
        .map(|i| i.station)
        .collect();

    let mut tickets = Vec::with_capacity(stations.len());
    for station in stations {
        let prefix = station.ticket_prefix();
        let n = next_value(conn, order.restaurant_id, prefix, fiscal_year).await?;
        let ticket = kitchen_ticket::ActiveModel {
            id: Set(Uuid::new_v4()),
            restaurant_id: Set(order.restaurant_id),
            order_id: Set(order.id),
            table_name: Set(table_name.to_string()),
            station: Set(station),
            ticket_number: Set(format_ticket_number(prefix, n)),
            status: Set(TicketStatus::Open),
            created_at: Set(Utc::now()),
            completed_at: Set(None),
        }
        .insert(conn)
        .await?;

        order_item::Entity::update_many()
            .col_expr(order_item::Column::TicketId, Expr::value(ticket.id))
            .filter(order_item::Column::OrderId.eq(order.id))
            .filter(order_item::Column::Station.eq(station))
            .filter(order_item::Column::Status.ne(ItemStatus::Cancelled))
            .filter(order_item::Column::TicketId.is_null())
            .exec(conn)
            .await?;
        tickets.push(ticket);
    }
    Ok(tickets)
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
    calendar: FiscalCalendar,
}

/// What confirming an order produced, for events after commit.
struct Confirmation {
    order: order::Model,
    tickets: Vec<kitchen_ticket::Model>,
    low_stock: Vec<stock_item::Model>,
}

impl OrderService {
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

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }

    async fn announce(&self, confirmation: &Confirmation) {
        self.emit(Event::OrderConfirmed(confirmation.order.id)).await;
        for ticket in &confirmation.tickets {
            self.emit(Event::TicketIssued {
                ticket_id: ticket.id,
                station: ticket.station,
                ticket_number: ticket.ticket_number.clone(),
            })
            .await;
        }
        for item in &confirmation.low_stock {
            self.emit(Event::StockLow {
                restaurant_id: item.restaurant_id,
                stock_item_id: item.id,
                quantity: item.quantity,
            })
            .await;
        }
    }

    async fn confirm_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: order::Model,
        confirmed_by: Option<Uuid>,
    ) -> Result<Confirmation, ServiceError> {
        let table_name = dining_table::Entity::find_by_id(order.table_id)
            .one(conn)
            .await?
            .map(|t| t.name)
            .unwrap_or_default();
        let items = order_items_in(conn, order.id).await?;
        let tickets = issue_tickets_in(
            conn,
            &order,
            &items,
            &table_name,
            &self.calendar.current_label(),
        )
        .await?;
        let low_stock = consume_for_items_in(conn, order.restaurant_id, &items, confirmed_by).await?;

        let now = Utc::now();
        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Confirmed);
        active.confirmed_at = Set(Some(now));
        active.updated_at = Set(now);
        let order = active.update(conn).await?;

        Ok(Confirmation {
            order,
            tickets,
            low_stock,
        })
    }

    /// Guest orders wait for staff confirmation; staff orders go straight to
    /// the kitchen.
    #[instrument(skip(self, request), fields(items = request.items.len()))]
    pub async fn place_order(
        &self,
        restaurant_id: Uuid,
        session_id: Uuid,
        source: OrderSource,
        placed_by: Option<Uuid>,
        request: PlaceOrderRequest,
    ) -> Result<OrderWithItems, ServiceError> {
        request.validate()?;
        if request
            .items
            .iter()
            .any(|l| l.quantity < 1 || l.quantity > MAX_LINE_QUANTITY)
        {
            return Err(ServiceError::ValidationError(
                "quantity must be between 1 and 99".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let session = find_session_in(&txn, restaurant_id, session_id).await?;
        if session.status != SessionStatus::Active {
            return Err(ServiceError::InvalidOperation(
                "orders can only be placed while the session is active".to_string(),
            ));
        }

        let ids: Vec<Uuid> = request.items.iter().map(|l| l.menu_item_id).collect();
        let menu: HashMap<Uuid, menu_item::Model> = MenuItemEntity::find()
            .filter(menu_item::Column::RestaurantId.eq(restaurant_id))
            .filter(menu_item::Column::Id.is_in(ids))
            .all(&txn)
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        let fiscal_year = self.calendar.current_label();
        let order_number = next_value(&txn, restaurant_id, sequences::ORDER, &fiscal_year).await?;
        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            restaurant_id: Set(restaurant_id),
            session_id: Set(session.id),
            table_id: Set(session.table_id),
            order_number: Set(order_number),
            source: Set(source),
            status: Set(OrderStatus::Pending),
            notes: Set(request.notes.filter(|n| !n.trim().is_empty())),
            placed_by: Set(placed_by),
            cancel_reason: Set(None),
            created_at: Set(now),
            confirmed_at: Set(None),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        for line in &request.items {
            let item = menu
                .get(&line.menu_item_id)
                .ok_or_else(|| ServiceError::not_found("Menu item", line.menu_item_id))?;
            if !item.is_available {
                return Err(ServiceError::InvalidOperation(format!(
                    "{} is not available right now",
                    item.name
                )));
            }
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                restaurant_id: Set(restaurant_id),
                order_id: Set(order.id),
                menu_item_id: Set(item.id),
                name: Set(item.name.clone()),
                station: Set(item.station),
                quantity: Set(line.quantity),
                unit_price: Set(item.price),
                line_total: Set(round_money(item.price * Decimal::from(line.quantity))),
                notes: Set(line.notes.clone().filter(|n| !n.trim().is_empty())),
                status: Set(ItemStatus::Pending),
                ticket_id: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        let confirmation = match source {
            OrderSource::Staff => Some(self.confirm_in(&txn, order.clone(), placed_by).await?),
            OrderSource::Guest => None,
        };
        let order_id = order.id;
        let result = self.load(&txn, restaurant_id, order_id).await?;
        txn.commit().await?;

        counter!("restro.orders.placed", 1);
        info!(%order_id, order_number, source = ?source, "order placed");
        self.emit(Event::OrderPlaced {
            order_id,
            restaurant_id,
        })
        .await;
        if let Some(confirmation) = confirmation {
            self.announce(&confirmation).await;
        }
        Ok(result)
    }

    #[instrument(skip(self))]
    pub async fn confirm_order(
        &self,
        restaurant_id: Uuid,
        order_id: Uuid,
        confirmed_by: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let txn = self.db.begin().await?;
        let order = find_order_in(&txn, restaurant_id, order_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(ServiceError::InvalidOperation(format!(
                "only pending orders can be confirmed (order is {:?})",
                order.status
            )));
        }
        let session = find_session_in(&txn, restaurant_id, order.session_id).await?;
        if !session.status.is_billable() {
            return Err(ServiceError::InvalidOperation(
                "the order's session is no longer open".to_string(),
            ));
        }

        let confirmation = self.confirm_in(&txn, order, Some(confirmed_by)).await?;
        let result = self.load(&txn, restaurant_id, order_id).await?;
        txn.commit().await?;

        counter!("restro.orders.confirmed", 1);
        info!(%order_id, tickets = confirmation.tickets.len(), "order confirmed");
        self.announce(&confirmation).await;
        Ok(result)
    }

    /// Cancels an order the kitchen has not started on.
    #[instrument(skip(self, request))]
    pub async fn cancel_order(
        &self,
        restaurant_id: Uuid,
        order_id: Uuid,
        cancelled_by: Uuid,
        request: CancelOrderRequest,
    ) -> Result<OrderWithItems, ServiceError> {
        request.validate()?;
        let txn = self.db.begin().await?;
        let order = find_order_in(&txn, restaurant_id, order_id).await?;
        if !matches!(order.status, OrderStatus::Pending | OrderStatus::Confirmed) {
            return Err(ServiceError::InvalidOperation(format!(
                "an order in status {:?} cannot be cancelled",
                order.status
            )));
        }
        let items = order_items_in(&txn, order_id).await?;
        if items
            .iter()
            .any(|i| !matches!(i.status, ItemStatus::Pending | ItemStatus::Cancelled))
        {
            return Err(ServiceError::InvalidOperation(
                "the kitchen has already started on this order".to_string(),
            ));
        }

        let was_confirmed = order.status == OrderStatus::Confirmed;
        let now = Utc::now();
        order_item::Entity::update_many()
            .col_expr(order_item::Column::Status, Expr::value(ItemStatus::Cancelled))
            .col_expr(order_item::Column::UpdatedAt, Expr::value(now))
            .filter(order_item::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;

        if was_confirmed {
            let item_ids: Vec<Uuid> = items.iter().map(|i| i.id).collect();
            reverse_consumption_in(&txn, restaurant_id, &item_ids, Some(cancelled_by)).await?;
            kitchen_ticket::Entity::update_many()
                .col_expr(kitchen_ticket::Column::Status, Expr::value(TicketStatus::Completed))
                .col_expr(kitchen_ticket::Column::CompletedAt, Expr::value(Some(now)))
                .filter(kitchen_ticket::Column::OrderId.eq(order_id))
                .filter(kitchen_ticket::Column::Status.eq(TicketStatus::Open))
                .exec(&txn)
                .await?;
        }

        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Cancelled);
        active.cancel_reason = Set(Some(request.reason.trim().to_string()));
        active.updated_at = Set(now);
        active.update(&txn).await?;

        let result = self.load(&txn, restaurant_id, order_id).await?;
        txn.commit().await?;

        counter!("restro.orders.cancelled", 1);
        warn!(%order_id, reason = %request.reason, "order cancelled");
        self.emit(Event::OrderCancelled(order_id)).await;
        Ok(result)
    }

    /// Drops one pending line; the order follows its remaining items.
    #[instrument(skip(self))]
    pub async fn cancel_item(
        &self,
        restaurant_id: Uuid,
        item_id: Uuid,
        cancelled_by: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let txn = self.db.begin().await?;
        let item = OrderItemEntity::find_by_id(item_id)
            .filter(order_item::Column::RestaurantId.eq(restaurant_id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order item", item_id))?;
        if item.status != ItemStatus::Pending {
            return Err(ServiceError::InvalidOperation(format!(
                "an item in status {:?} cannot be cancelled",
                item.status
            )));
        }
        let order = find_order_in(&txn, restaurant_id, item.order_id).await?;
        let session = find_session_in(&txn, restaurant_id, order.session_id).await?;
        if !session.status.is_billable() {
            return Err(ServiceError::InvalidOperation(
                "the order's session is no longer open".to_string(),
            ));
        }

        let ticket_id = item.ticket_id;
        let mut active: order_item::ActiveModel = item.into();
        active.status = Set(ItemStatus::Cancelled);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        reverse_consumption_in(&txn, restaurant_id, &[item_id], Some(cancelled_by)).await?;
        if let Some(ticket_id) = ticket_id {
            complete_ticket_if_done_in(&txn, ticket_id).await?;
        }
        let order = refresh_order_status_in(&txn, order).await?;
        let order_id = order.id;
        let cancelled = order.status == OrderStatus::Cancelled;

        let result = self.load(&txn, restaurant_id, order_id).await?;
        txn.commit().await?;

        info!(%item_id, %order_id, "order item cancelled");
        if cancelled {
            self.emit(Event::OrderCancelled(order_id)).await;
        }
        Ok(result)
    }

    async fn load<C: ConnectionTrait>(
        &self,
        conn: &C,
        restaurant_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let order = find_order_in(conn, restaurant_id, order_id).await?;
        let items = order_items_in(conn, order_id).await?;
        let tickets = kitchen_ticket::Entity::find()
            .filter(kitchen_ticket::Column::OrderId.eq(order_id))
            .order_by_asc(kitchen_ticket::Column::CreatedAt)
            .all(conn)
            .await?;
        Ok(OrderWithItems {
            order,
            items,
            tickets,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        restaurant_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        self.load(&*self.db, restaurant_id, order_id).await
    }

    #[instrument(skip(self))]
    pub async fn list_session_orders(
        &self,
        restaurant_id: Uuid,
        session_id: Uuid,
    ) -> Result<Vec<OrderWithItems>, ServiceError> {
        let db = &*self.db;
        find_session_in(db, restaurant_id, session_id).await?;
        let orders = OrderEntity::find()
            .filter(order::Column::SessionId.eq(session_id))
            .order_by_asc(order::Column::CreatedAt)
            .all(db)
            .await?;

        let mut result = Vec::with_capacity(orders.len());
        for order in orders {
            result.push(self.load(db, restaurant_id, order.id).await?);
        }
        Ok(result)
    }

    /// Orders in the given status, oldest first (e.g. guest orders awaiting
    /// confirmation).
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        restaurant_id: Uuid,
        status: OrderStatus,
    ) -> Result<Vec<order::Model>, ServiceError> {
        Ok(OrderEntity::find()
            .filter(order::Column::RestaurantId.eq(restaurant_id))
            .filter(order::Column::Status.eq(status))
            .order_by_asc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use ItemStatus::*;

    #[rstest]
    #[case(&[Pending, Pending], OrderStatus::Confirmed, OrderStatus::Confirmed)]
    #[case(&[Pending], OrderStatus::Pending, OrderStatus::Pending)]
    #[case(&[Preparing, Pending], OrderStatus::Confirmed, OrderStatus::Preparing)]
    #[case(&[Ready, Pending], OrderStatus::Preparing, OrderStatus::Preparing)]
    #[case(&[Ready, Served], OrderStatus::Preparing, OrderStatus::Ready)]
    #[case(&[Served, Served, Cancelled], OrderStatus::Ready, OrderStatus::Served)]
    #[case(&[Cancelled, Cancelled], OrderStatus::Confirmed, OrderStatus::Cancelled)]
    #[case(&[Ready, Cancelled], OrderStatus::Preparing, OrderStatus::Ready)]
    fn order_status_follows_items(
        #[case] items: &[ItemStatus],
        #[case] current: OrderStatus,
        #[case] expected: OrderStatus,
    ) {
        assert_eq!(derive_order_status(current, items), expected);
    }

    #[test]
    fn cancelled_items_do_not_hold_an_order_back() {
        assert_eq!(
            derive_order_status(OrderStatus::Preparing, &[Served, Cancelled]),
            OrderStatus::Served
        );
    }
}
