//! KOT/BOT queues. Tickets are printed by the order service when an order
//! is confirmed; stations then move items forward until they are served.

use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::{
        kitchen_ticket::{self, Entity as TicketEntity, TicketStatus},
        menu_category::Station,
        order::{self, OrderStatus},
        order_item::{self, Entity as OrderItemEntity, ItemStatus},
        user::StaffRole,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::orders::{find_order_in, order_items_in, refresh_order_status_in},
};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateItemStatusRequest {
    pub status: ItemStatus,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TicketWithItems {
    #[serde(flatten)]
    pub ticket: kitchen_ticket::Model,
    pub order_number: i64,
    pub order_notes: Option<String>,
    pub items: Vec<order_item::Model>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ServedOrder {
    pub order: order::Model,
    pub served_items: usize,
}

/// Station a role is confined to; other roles see every station.
pub fn station_for_role(role: &StaffRole) -> Option<Station> {
    match role {
        StaffRole::Kitchen => Some(Station::Kitchen),
        StaffRole::Bar => Some(Station::Bar),
        _ => None,
    }
}

/// Items only move forward through the kitchen flow.
pub fn check_item_transition(from: ItemStatus, to: ItemStatus) -> Result<(), ServiceError> {
    match (from.step(), to.step()) {
        (Some(current), Some(next)) if next > current => Ok(()),
        _ => Err(ServiceError::InvalidOperation(format!(
            "item cannot move from {:?} to {:?}",
            from, to
        ))),
    }
}

/// Closes the ticket once none of its items needs station work. Returns
/// whether it was closed by this call.
pub async fn complete_ticket_if_done_in<C: ConnectionTrait>(
    conn: &C,
    ticket_id: Uuid,
) -> Result<bool, ServiceError> {
    let Some(ticket) = TicketEntity::find_by_id(ticket_id).one(conn).await? else {
        return Ok(false);
    };
    if ticket.status == TicketStatus::Completed {
        return Ok(false);
    }

    let items = OrderItemEntity::find()
        .filter(order_item::Column::TicketId.eq(ticket_id))
        .all(conn)
        .await?;
    if !items.iter().all(|i| i.status.is_done_at_station()) {
        return Ok(false);
    }

    let mut active: kitchen_ticket::ActiveModel = ticket.into();
    active.status = Set(TicketStatus::Completed);
    active.completed_at = Set(Some(Utc::now()));
    active.update(conn).await?;
    Ok(true)
}

#[derive(Clone)]
pub struct KitchenService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
}

impl KitchenService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    /// Open tickets of a station with their items, oldest first.
    #[instrument(skip(self))]
    pub async fn station_queue(
        &self,
        restaurant_id: Uuid,
        station: Station,
    ) -> Result<Vec<TicketWithItems>, ServiceError> {
        let db = &*self.db;
        let tickets = TicketEntity::find()
            .filter(kitchen_ticket::Column::RestaurantId.eq(restaurant_id))
            .filter(kitchen_ticket::Column::Station.eq(station))
            .filter(kitchen_ticket::Column::Status.eq(TicketStatus::Open))
            .order_by_asc(kitchen_ticket::Column::CreatedAt)
            .all(db)
            .await?;
        if tickets.is_empty() {
            return Ok(Vec::new());
        }

        let ticket_ids: Vec<Uuid> = tickets.iter().map(|t| t.id).collect();
        let order_ids: Vec<Uuid> = tickets.iter().map(|t| t.order_id).collect();
        let mut items: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
        for item in OrderItemEntity::find()
            .filter(order_item::Column::TicketId.is_in(ticket_ids))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(db)
            .await?
        {
            if let Some(ticket_id) = item.ticket_id {
                items.entry(ticket_id).or_default().push(item);
            }
        }
        let orders: HashMap<Uuid, order::Model> = order::Entity::find()
            .filter(order::Column::Id.is_in(order_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|o| (o.id, o))
            .collect();

        Ok(tickets
            .into_iter()
            .map(|ticket| {
                let order = orders.get(&ticket.order_id);
                TicketWithItems {
                    order_number: order.map(|o| o.order_number).unwrap_or_default(),
                    order_notes: order.and_then(|o| o.notes.clone()),
                    items: items.remove(&ticket.id).unwrap_or_default(),
                    ticket,
                }
            })
            .collect())
    }

    /// Moves one item forward; `station` confines kitchen and bar staff to
    /// their own tickets.
    #[instrument(skip(self))]
    pub async fn update_item_status(
        &self,
        restaurant_id: Uuid,
        item_id: Uuid,
        status: ItemStatus,
        station: Option<Station>,
    ) -> Result<order_item::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let item = OrderItemEntity::find_by_id(item_id)
            .filter(order_item::Column::RestaurantId.eq(restaurant_id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order item", item_id))?;
        if matches!(station, Some(s) if s != item.station) {
            return Err(ServiceError::Forbidden(format!(
                "item belongs to the {:?} station",
                item.station
            )));
        }
        check_item_transition(item.status, status)?;

        let order = find_order_in(&txn, restaurant_id, item.order_id).await?;
        if matches!(order.status, OrderStatus::Pending | OrderStatus::Cancelled) {
            return Err(ServiceError::InvalidOperation(format!(
                "order {} is {:?}",
                order.order_number, order.status
            )));
        }

        let ticket_id = item.ticket_id;
        let mut active: order_item::ActiveModel = item.into();
        active.status = Set(status);
        active.updated_at = Set(Utc::now());
        let item = active.update(&txn).await?;

        let completed = match ticket_id {
            Some(ticket_id) => complete_ticket_if_done_in(&txn, ticket_id).await?,
            None => false,
        };
        refresh_order_status_in(&txn, order).await?;
        txn.commit().await?;

        counter!("restro.kitchen.item_updates", 1);
        info!(%item_id, status = ?status, "order item status updated");
        if let (true, Some(ticket_id), Some(sender)) = (completed, ticket_id, &self.event_sender) {
            sender.send_or_log(Event::TicketCompleted(ticket_id)).await;
        }
        Ok(item)
    }

    /// Waiter pickup: every ready item of the order is served.
    #[instrument(skip(self))]
    pub async fn serve_order(
        &self,
        restaurant_id: Uuid,
        order_id: Uuid,
    ) -> Result<ServedOrder, ServiceError> {
        let txn = self.db.begin().await?;
        let order = find_order_in(&txn, restaurant_id, order_id).await?;
        let ready: Vec<order_item::Model> = order_items_in(&txn, order_id)
            .await?
            .into_iter()
            .filter(|i| i.status == ItemStatus::Ready)
            .collect();
        if ready.is_empty() {
            return Err(ServiceError::InvalidOperation(
                "no items are ready to serve".to_string(),
            ));
        }

        let ready_ids: Vec<Uuid> = ready.iter().map(|i| i.id).collect();
        OrderItemEntity::update_many()
            .col_expr(order_item::Column::Status, Expr::value(ItemStatus::Served))
            .col_expr(order_item::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order_item::Column::Id.is_in(ready_ids))
            .exec(&txn)
            .await?;

        let mut tickets: Vec<Uuid> = ready.iter().filter_map(|i| i.ticket_id).collect();
        tickets.sort();
        tickets.dedup();
        let mut completed = Vec::new();
        for ticket_id in tickets {
            if complete_ticket_if_done_in(&txn, ticket_id).await? {
                completed.push(ticket_id);
            }
        }
        let order = refresh_order_status_in(&txn, order).await?;
        txn.commit().await?;

        info!(%order_id, served = ready.len(), "order served");
        if let Some(sender) = &self.event_sender {
            for ticket_id in completed {
                sender.send_or_log(Event::TicketCompleted(ticket_id)).await;
            }
        }
        Ok(ServedOrder {
            order,
            served_items: ready.len(),
        })
    }
}
