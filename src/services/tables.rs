//! Dining tables, their QR codes and the guest sessions seated at them.

use chrono::Utc;
use hmac::{Hmac, Mac};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        dining_table::{self, Entity as TableEntity, TableStatus},
        kitchen_ticket::{self, TicketStatus},
        order::{self, OrderStatus},
        restaurant,
        table_session::{self, Entity as SessionEntity, SessionOrigin, SessionStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::loyalty::find_or_create_in,
};

type HmacSha256 = Hmac<Sha256>;

/// Hex characters kept from the HMAC.
const QR_TOKEN_LEN: usize = 24;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateTableRequest {
    #[validate(length(min = 1, max = 32, message = "Table name is required"))]
    pub name: String,
    #[validate(length(max = 64))]
    pub area: Option<String>,
    #[validate(range(min = 1, max = 100))]
    pub capacity: i32,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct OpenSessionRequest {
    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_guests")]
    pub guest_count: i32,
}

fn default_guests() -> i32 {
    1
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AttachCustomerRequest {
    pub phone: String,
    #[validate(length(max = 120))]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MoveSessionRequest {
    pub target_table_id: Uuid,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TableWithSession {
    #[serde(flatten)]
    pub table: dining_table::Model,
    pub session: Option<table_session::Model>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QrCode {
    pub table_id: Uuid,
    pub token: String,
    pub version: i32,
    /// Link encoded in the printed QR code
    pub url: String,
}

/// Token printed on a table. A new version invalidates older prints.
pub fn qr_token(secret: &str, table_id: Uuid, version: i32) -> Result<String, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("QR signing key: {}", e)))?;
    mac.update(format!("{}:{}", table_id, version).as_bytes());
    let digest = hex::encode(mac.finalize().into_bytes());
    Ok(digest[..QR_TOKEN_LEN].to_string())
}

pub async fn find_table_in<C: ConnectionTrait>(
    conn: &C,
    restaurant_id: Uuid,
    table_id: Uuid,
) -> Result<dining_table::Model, ServiceError> {
    TableEntity::find_by_id(table_id)
        .filter(dining_table::Column::RestaurantId.eq(restaurant_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Table", table_id))
}

/// Row-locks the table so seating decisions for it run one at a time.
pub async fn lock_table_in<C: ConnectionTrait>(
    conn: &C,
    restaurant_id: Uuid,
    table_id: Uuid,
) -> Result<dining_table::Model, ServiceError> {
    TableEntity::find_by_id(table_id)
        .filter(dining_table::Column::RestaurantId.eq(restaurant_id))
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Table", table_id))
}

pub async fn find_session_in<C: ConnectionTrait>(
    conn: &C,
    restaurant_id: Uuid,
    session_id: Uuid,
) -> Result<table_session::Model, ServiceError> {
    SessionEntity::find_by_id(session_id)
        .filter(table_session::Column::RestaurantId.eq(restaurant_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Session", session_id))
}

/// The session currently holding the table, if any.
pub async fn open_session_for_table<C: ConnectionTrait>(
    conn: &C,
    table_id: Uuid,
) -> Result<Option<table_session::Model>, ServiceError> {
    Ok(SessionEntity::find()
        .filter(table_session::Column::TableId.eq(table_id))
        .filter(table_session::Column::Status.is_in(SessionStatus::open_statuses()))
        .order_by_desc(table_session::Column::StartedAt)
        .one(conn)
        .await?)
}

pub async fn set_table_status_in<C: ConnectionTrait>(
    conn: &C,
    table: dining_table::Model,
    status: TableStatus,
) -> Result<dining_table::Model, ServiceError> {
    if table.status == status {
        return Ok(table);
    }
    let mut active: dining_table::ActiveModel = table.into();
    active.status = Set(status);
    active.updated_at = Set(Utc::now());
    Ok(active.update(conn).await?)
}

/// Moves a session into `status` and the table along with it.
pub async fn transition_session_in<C: ConnectionTrait>(
    conn: &C,
    session: table_session::Model,
    status: SessionStatus,
) -> Result<table_session::Model, ServiceError> {
    let now = Utc::now();
    let table = find_table_in(conn, session.restaurant_id, session.table_id).await?;

    let mut active: table_session::ActiveModel = session.into();
    active.status = Set(status);
    active.updated_at = Set(now);
    match status {
        SessionStatus::BillRequested => active.bill_requested_at = Set(Some(now)),
        SessionStatus::Paid => active.paid_at = Set(Some(now)),
        SessionStatus::Closed | SessionStatus::Cancelled => active.closed_at = Set(Some(now)),
        SessionStatus::Active => {}
    }
    let session = active.update(conn).await?;

    set_table_status_in(conn, table, status.table_status()).await?;
    Ok(session)
}

/// Settles a session once its bill is paid; the table goes to cleaning.
pub async fn mark_paid_in<C: ConnectionTrait>(
    conn: &C,
    session: table_session::Model,
) -> Result<table_session::Model, ServiceError> {
    if !session.status.is_billable() {
        return Err(ServiceError::InvalidOperation(format!(
            "session in status {:?} cannot be marked paid",
            session.status
        )));
    }
    transition_session_in(conn, session, SessionStatus::Paid).await
}

#[derive(Clone)]
pub struct TableService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
    qr_secret: String,
    public_base_url: String,
}

impl TableService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Option<Arc<EventSender>>,
        qr_secret: String,
        public_base_url: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            qr_secret,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }

    fn qr_code(&self, table: &dining_table::Model) -> QrCode {
        QrCode {
            table_id: table.id,
            token: table.qr_token.clone(),
            version: table.qr_version,
            url: format!("{}/t/{}", self.public_base_url, table.qr_token),
        }
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_table(
        &self,
        restaurant_id: Uuid,
        request: CreateTableRequest,
    ) -> Result<dining_table::Model, ServiceError> {
        request.validate()?;
        let name = request.name.trim().to_string();
        let db = &*self.db;

        let duplicate = TableEntity::find()
            .filter(dining_table::Column::RestaurantId.eq(restaurant_id))
            .filter(dining_table::Column::Name.eq(name.clone()))
            .one(db)
            .await?;
        if duplicate.is_some() {
            return Err(ServiceError::Conflict(format!("table {} already exists", name)));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let table = dining_table::ActiveModel {
            id: Set(id),
            restaurant_id: Set(restaurant_id),
            name: Set(name),
            area: Set(request.area.map(|a| a.trim().to_string()).filter(|a| !a.is_empty())),
            capacity: Set(request.capacity),
            status: Set(TableStatus::Available),
            qr_token: Set(qr_token(&self.qr_secret, id, 1)?),
            qr_version: Set(1),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await?;

        info!(table_id = %table.id, "table created");
        Ok(table)
    }

    /// Floor view: every table with the session holding it.
    #[instrument(skip(self))]
    pub async fn list_tables(
        &self,
        restaurant_id: Uuid,
    ) -> Result<Vec<TableWithSession>, ServiceError> {
        let db = &*self.db;
        let tables = TableEntity::find()
            .filter(dining_table::Column::RestaurantId.eq(restaurant_id))
            .order_by_asc(dining_table::Column::Name)
            .all(db)
            .await?;
        let mut sessions: HashMap<Uuid, table_session::Model> = SessionEntity::find()
            .filter(table_session::Column::RestaurantId.eq(restaurant_id))
            .filter(table_session::Column::Status.is_in(SessionStatus::open_statuses()))
            .all(db)
            .await?
            .into_iter()
            .map(|s| (s.table_id, s))
            .collect();

        Ok(tables
            .into_iter()
            .map(|table| TableWithSession {
                session: sessions.remove(&table.id),
                table,
            })
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn get_qr(&self, restaurant_id: Uuid, table_id: Uuid) -> Result<QrCode, ServiceError> {
        let table = find_table_in(&*self.db, restaurant_id, table_id).await?;
        Ok(self.qr_code(&table))
    }

    /// Issues a new token; previously printed codes stop resolving.
    #[instrument(skip(self))]
    pub async fn regenerate_qr(
        &self,
        restaurant_id: Uuid,
        table_id: Uuid,
    ) -> Result<QrCode, ServiceError> {
        let table = find_table_in(&*self.db, restaurant_id, table_id).await?;
        let version = table.qr_version + 1;

        let mut active: dining_table::ActiveModel = table.into();
        active.qr_token = Set(qr_token(&self.qr_secret, table_id, version)?);
        active.qr_version = Set(version);
        active.updated_at = Set(Utc::now());
        let table = active.update(&*self.db).await?;

        info!(%table_id, version, "table QR regenerated");
        Ok(self.qr_code(&table))
    }

    /// Entry point of the guest flow.
    #[instrument(skip(self, token))]
    pub async fn resolve_qr(
        &self,
        token: &str,
    ) -> Result<(restaurant::Model, dining_table::Model), ServiceError> {
        let db = &*self.db;
        let table = TableEntity::find()
            .filter(dining_table::Column::QrToken.eq(token))
            .filter(dining_table::Column::IsActive.eq(true))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("unknown or expired table code".to_string()))?;
        let restaurant = restaurant::Entity::find_by_id(table.restaurant_id)
            .one(db)
            .await?
            .filter(|r| r.is_active)
            .ok_or_else(|| ServiceError::NotFound("restaurant is not available".to_string()))?;
        Ok((restaurant, table))
    }

    #[instrument(skip(self))]
    pub async fn get_session(
        &self,
        restaurant_id: Uuid,
        session_id: Uuid,
    ) -> Result<table_session::Model, ServiceError> {
        find_session_in(&*self.db, restaurant_id, session_id).await
    }

    #[instrument(skip(self))]
    pub async fn current_session(
        &self,
        table_id: Uuid,
    ) -> Result<Option<table_session::Model>, ServiceError> {
        open_session_for_table(&*self.db, table_id).await
    }

    /// Seats guests. A QR scan at an occupied table joins the running session.
    #[instrument(skip(self))]
    pub async fn open_session(
        &self,
        restaurant_id: Uuid,
        table_id: Uuid,
        via: SessionOrigin,
        guest_count: i32,
        opened_by: Option<Uuid>,
    ) -> Result<table_session::Model, ServiceError> {
        if !(1..=100).contains(&guest_count) {
            return Err(ServiceError::ValidationError(
                "guest count must be between 1 and 100".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let table = lock_table_in(&txn, restaurant_id, table_id).await?;
        if !table.is_active {
            return Err(ServiceError::InvalidOperation(format!(
                "table {} is not in service",
                table.name
            )));
        }

        if let Some(existing) = open_session_for_table(&txn, table_id).await? {
            if via == SessionOrigin::Qr && existing.status.is_billable() {
                txn.commit().await?;
                return Ok(existing);
            }
            return Err(ServiceError::Conflict(format!(
                "table {} already has an open session",
                table.name
            )));
        }
        if table.status != TableStatus::Available {
            return Err(ServiceError::Conflict(format!(
                "table {} is {:?}",
                table.name, table.status
            )));
        }

        let now = Utc::now();
        let session = table_session::ActiveModel {
            id: Set(Uuid::new_v4()),
            restaurant_id: Set(restaurant_id),
            table_id: Set(table_id),
            customer_id: Set(None),
            guest_count: Set(guest_count),
            status: Set(SessionStatus::Active),
            opened_via: Set(via),
            opened_by: Set(opened_by),
            started_at: Set(now),
            bill_requested_at: Set(None),
            paid_at: Set(None),
            closed_at: Set(None),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        set_table_status_in(&txn, table, TableStatus::Occupied).await?;
        txn.commit().await?;

        counter!("restro.sessions.opened", 1);
        info!(session_id = %session.id, %table_id, via = ?via, "session opened");
        self.emit(Event::SessionOpened {
            session_id: session.id,
            table_id,
        })
        .await;
        Ok(session)
    }

    /// Idempotent: asking twice leaves the session as it is.
    #[instrument(skip(self))]
    pub async fn request_bill(
        &self,
        restaurant_id: Uuid,
        session_id: Uuid,
    ) -> Result<table_session::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let session = find_session_in(&txn, restaurant_id, session_id).await?;
        let session = match session.status {
            SessionStatus::BillRequested => session,
            SessionStatus::Active => {
                transition_session_in(&txn, session, SessionStatus::BillRequested).await?
            }
            other => {
                return Err(ServiceError::InvalidOperation(format!(
                    "cannot request the bill for a session in status {:?}",
                    other
                )))
            }
        };
        txn.commit().await?;
        Ok(session)
    }

    #[instrument(skip(self, request))]
    pub async fn attach_customer(
        &self,
        restaurant_id: Uuid,
        session_id: Uuid,
        request: AttachCustomerRequest,
    ) -> Result<table_session::Model, ServiceError> {
        request.validate()?;
        let txn = self.db.begin().await?;
        let session = find_session_in(&txn, restaurant_id, session_id).await?;
        if !session.status.is_billable() {
            return Err(ServiceError::InvalidOperation(
                "customers can only be attached to an active session".to_string(),
            ));
        }

        let customer = find_or_create_in(&txn, restaurant_id, &request.phone, request.name).await?;
        let mut active: table_session::ActiveModel = session.into();
        active.customer_id = Set(Some(customer.id));
        active.updated_at = Set(Utc::now());
        let session = active.update(&txn).await?;
        txn.commit().await?;
        Ok(session)
    }

    /// Frees a table after cleaning and closes the settled session.
    #[instrument(skip(self))]
    pub async fn mark_cleaned(
        &self,
        restaurant_id: Uuid,
        table_id: Uuid,
    ) -> Result<dining_table::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let table = find_table_in(&txn, restaurant_id, table_id).await?;
        if table.status != TableStatus::Cleaning {
            return Err(ServiceError::InvalidOperation(format!(
                "table {} is not waiting for cleaning",
                table.name
            )));
        }

        let mut closed = None;
        if let Some(session) = open_session_for_table(&txn, table_id).await? {
            if session.status != SessionStatus::Paid {
                return Err(ServiceError::InvalidOperation(
                    "the table's session is not settled".to_string(),
                ));
            }
            closed = Some(transition_session_in(&txn, session, SessionStatus::Closed).await?.id);
        }
        let table = find_table_in(&txn, restaurant_id, table_id).await?;
        let table = set_table_status_in(&txn, table, TableStatus::Available).await?;
        txn.commit().await?;

        if let Some(session_id) = closed {
            counter!("restro.sessions.closed", 1);
            self.emit(Event::SessionClosed(session_id)).await;
        }
        Ok(table)
    }

    /// Abandons an active session that never ordered.
    #[instrument(skip(self))]
    pub async fn cancel_session(
        &self,
        restaurant_id: Uuid,
        session_id: Uuid,
    ) -> Result<table_session::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let session = find_session_in(&txn, restaurant_id, session_id).await?;
        if session.status != SessionStatus::Active {
            return Err(ServiceError::InvalidOperation(
                "only active sessions can be cancelled".to_string(),
            ));
        }

        let live_orders = order::Entity::find()
            .filter(order::Column::SessionId.eq(session_id))
            .filter(order::Column::Status.ne(OrderStatus::Cancelled))
            .one(&txn)
            .await?;
        if live_orders.is_some() {
            return Err(ServiceError::InvalidOperation(
                "session has orders; cancel them first".to_string(),
            ));
        }

        let session = transition_session_in(&txn, session, SessionStatus::Cancelled).await?;
        txn.commit().await?;

        self.emit(Event::SessionClosed(session_id)).await;
        Ok(session)
    }

    /// Moves guests to another free table, taking their orders along.
    #[instrument(skip(self))]
    pub async fn move_session(
        &self,
        restaurant_id: Uuid,
        session_id: Uuid,
        target_table_id: Uuid,
    ) -> Result<table_session::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let session = find_session_in(&txn, restaurant_id, session_id).await?;
        if !session.status.is_billable() {
            return Err(ServiceError::InvalidOperation(
                "only running sessions can be moved".to_string(),
            ));
        }
        if session.table_id == target_table_id {
            return Err(ServiceError::ValidationError(
                "session is already at that table".to_string(),
            ));
        }

        let target = lock_table_in(&txn, restaurant_id, target_table_id).await?;
        if !target.is_active || target.status != TableStatus::Available {
            return Err(ServiceError::Conflict(format!(
                "table {} is not available",
                target.name
            )));
        }
        let source = find_table_in(&txn, restaurant_id, session.table_id).await?;

        set_table_status_in(&txn, source, TableStatus::Available).await?;
        let target_name = target.name.clone();
        set_table_status_in(&txn, target, session.status.table_status()).await?;

        order::Entity::update_many()
            .col_expr(order::Column::TableId, Expr::value(target_table_id))
            .filter(order::Column::SessionId.eq(session_id))
            .exec(&txn)
            .await?;

        let order_ids: Vec<Uuid> = order::Entity::find()
            .filter(order::Column::SessionId.eq(session_id))
            .all(&txn)
            .await?
            .into_iter()
            .map(|o| o.id)
            .collect();
        kitchen_ticket::Entity::update_many()
            .col_expr(kitchen_ticket::Column::TableName, Expr::value(target_name))
            .filter(kitchen_ticket::Column::OrderId.is_in(order_ids))
            .filter(kitchen_ticket::Column::Status.eq(TicketStatus::Open))
            .exec(&txn)
            .await?;

        let mut active: table_session::ActiveModel = session.into();
        active.table_id = Set(target_table_id);
        active.updated_at = Set(Utc::now());
        let session = active.update(&txn).await?;
        txn.commit().await?;

        info!(%session_id, %target_table_id, "session moved");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qr_tokens_change_with_version() {
        let id = Uuid::new_v4();
        let v1 = qr_token("a-very-long-signing-secret-for-tests", id, 1).unwrap();
        let v2 = qr_token("a-very-long-signing-secret-for-tests", id, 2).unwrap();
        assert_eq!(v1.len(), QR_TOKEN_LEN);
        assert_ne!(v1, v2);
        assert_eq!(v1, qr_token("a-very-long-signing-secret-for-tests", id, 1).unwrap());
    }

    #[test]
    fn qr_tokens_depend_on_the_secret() {
        let id = Uuid::new_v4();
        assert_ne!(
            qr_token("first-signing-secret-0123456789ab", id, 1).unwrap(),
            qr_token("second-signing-secret-0123456789a", id, 1).unwrap()
        );
    }
}
