use chrono::Utc;
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::{round_money, PaginationParams},
    entities::{
        customer::{self, Entity as CustomerEntity},
        loyalty_transaction::{self, Entity as LoyaltyEntity, LoyaltyKind},
        restaurant,
    },
    errors::ServiceError,
};

static MOBILE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^9[78]\d{8}$").unwrap());

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateCustomerRequest {
    #[validate(length(min = 1, max = 120, message = "Name is required"))]
    pub name: String,
    pub phone: String,
    #[validate(email)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AdjustPointsRequest {
    /// Signed number of points to add or remove
    pub points: i64,
    #[validate(length(min = 1, max = 255, message = "A note is required"))]
    pub note: String,
}

/// Normalises a Nepali mobile number and checks its format.
pub fn normalize_phone(raw: &str) -> Result<String, ServiceError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let local = match digits.strip_prefix("977") {
        Some(rest) if rest.len() == 10 => rest.to_string(),
        _ => digits,
    };
    if MOBILE_PATTERN.is_match(&local) {
        Ok(local)
    } else {
        Err(ServiceError::ValidationError(format!(
            "'{}' is not a valid Nepali mobile number",
            raw
        )))
    }
}

/// Points earned on a bill total, rounded down.
pub fn points_for(total: Decimal, earn_rate: Decimal) -> i64 {
    (total * earn_rate).floor().to_i64().unwrap_or(0).max(0)
}

/// Rupee value of redeeming `points`, after checking the restaurant's rules.
pub fn redemption_value(
    restaurant: &restaurant::Model,
    balance: i64,
    points: i64,
) -> Result<Decimal, ServiceError> {
    if !restaurant.loyalty_enabled() {
        return Err(ServiceError::InvalidOperation(
            "loyalty is not enabled for this restaurant".to_string(),
        ));
    }
    if points < restaurant.loyalty_min_redeem_points {
        return Err(ServiceError::ValidationError(format!(
            "at least {} points must be redeemed",
            restaurant.loyalty_min_redeem_points
        )));
    }
    if points > balance {
        return Err(ServiceError::ValidationError(format!(
            "customer has only {} points",
            balance
        )));
    }
    Ok(round_money(Decimal::from(points) * restaurant.loyalty_point_value))
}

/// Moves a customer's balance and records the transaction. The balance is
/// re-read under a row lock, so the caller's copy may be stale.
pub async fn apply_points_in<C: ConnectionTrait>(
    conn: &C,
    customer: customer::Model,
    points: i64,
    kind: LoyaltyKind,
    bill_id: Option<Uuid>,
    note: Option<String>,
    created_by: Option<Uuid>,
) -> Result<(customer::Model, loyalty_transaction::Model), ServiceError> {
    let customer = lock_customer_in(conn, customer.restaurant_id, customer.id).await?;
    let balance_after = customer.points_balance + points;
    if balance_after < 0 {
        return Err(ServiceError::ValidationError(format!(
            "balance of {} points cannot go below zero",
            customer.points_balance
        )));
    }

    let now = Utc::now();
    let restaurant_id = customer.restaurant_id;
    let customer_id = customer.id;
    let mut active: customer::ActiveModel = customer.into();
    active.points_balance = Set(balance_after);
    active.updated_at = Set(now);
    let customer = active.update(conn).await?;

    let txn = loyalty_transaction::ActiveModel {
        id: Set(Uuid::new_v4()),
        restaurant_id: Set(restaurant_id),
        customer_id: Set(customer_id),
        bill_id: Set(bill_id),
        kind: Set(kind),
        points: Set(points),
        balance_after: Set(balance_after),
        note: Set(note),
        created_by: Set(created_by),
        created_at: Set(now),
    }
    .insert(conn)
    .await?;

    Ok((customer, txn))
}

/// Credits points for a paid bill and updates the visit totals. Returns the
/// points earned.
pub async fn record_visit_in<C: ConnectionTrait>(
    conn: &C,
    restaurant: &restaurant::Model,
    customer: customer::Model,
    bill_id: Uuid,
    bill_total: Decimal,
) -> Result<i64, ServiceError> {
    let points = if restaurant.loyalty_enabled() {
        points_for(bill_total, restaurant.loyalty_earn_rate)
    } else {
        0
    };

    let customer = if points > 0 {
        apply_points_in(conn, customer, points, LoyaltyKind::Earn, Some(bill_id), None, None)
            .await?
            .0
    } else {
        lock_customer_in(conn, customer.restaurant_id, customer.id).await?
    };

    let now = Utc::now();
    let total_spent = customer.total_spent + bill_total;
    let visit_count = customer.visit_count + 1;
    let mut active: customer::ActiveModel = customer.into();
    active.total_spent = Set(total_spent);
    active.visit_count = Set(visit_count);
    active.last_visit_at = Set(Some(now));
    active.updated_at = Set(now);
    active.update(conn).await?;

    Ok(points)
}

pub async fn find_customer_in<C: ConnectionTrait>(
    conn: &C,
    restaurant_id: Uuid,
    customer_id: Uuid,
) -> Result<customer::Model, ServiceError> {
    CustomerEntity::find_by_id(customer_id)
        .filter(customer::Column::RestaurantId.eq(restaurant_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Customer", customer_id))
}

/// Reads a customer with a row lock held until the transaction ends.
pub async fn lock_customer_in<C: ConnectionTrait>(
    conn: &C,
    restaurant_id: Uuid,
    customer_id: Uuid,
) -> Result<customer::Model, ServiceError> {
    CustomerEntity::find_by_id(customer_id)
        .filter(customer::Column::RestaurantId.eq(restaurant_id))
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Customer", customer_id))
}

/// Looks a customer up by phone, creating one when unknown.
pub async fn find_or_create_in<C: ConnectionTrait>(
    conn: &C,
    restaurant_id: Uuid,
    phone: &str,
    name: Option<String>,
) -> Result<customer::Model, ServiceError> {
    let phone = normalize_phone(phone)?;
    if let Some(existing) = CustomerEntity::find()
        .filter(customer::Column::RestaurantId.eq(restaurant_id))
        .filter(customer::Column::Phone.eq(phone.clone()))
        .one(conn)
        .await?
    {
        return Ok(existing);
    }

    let now = Utc::now();
    let name = name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "Guest".to_string());
    Ok(customer::ActiveModel {
        id: Set(Uuid::new_v4()),
        restaurant_id: Set(restaurant_id),
        name: Set(name),
        phone: Set(phone),
        email: Set(None),
        points_balance: Set(0),
        total_spent: Set(Decimal::ZERO),
        visit_count: Set(0),
        last_visit_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?)
}

#[derive(Clone)]
pub struct LoyaltyService {
    db: Arc<DatabaseConnection>,
}

impl LoyaltyService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request))]
    pub async fn create_customer(
        &self,
        restaurant_id: Uuid,
        request: CreateCustomerRequest,
    ) -> Result<customer::Model, ServiceError> {
        request.validate()?;
        let phone = normalize_phone(&request.phone)?;
        let db = &*self.db;

        let existing = CustomerEntity::find()
            .filter(customer::Column::RestaurantId.eq(restaurant_id))
            .filter(customer::Column::Phone.eq(phone.clone()))
            .one(db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "a customer with phone {} already exists",
                phone
            )));
        }

        let now = Utc::now();
        let customer = customer::ActiveModel {
            id: Set(Uuid::new_v4()),
            restaurant_id: Set(restaurant_id),
            name: Set(request.name.trim().to_string()),
            phone: Set(phone),
            email: Set(request.email),
            points_balance: Set(0),
            total_spent: Set(Decimal::ZERO),
            visit_count: Set(0),
            last_visit_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await?;

        info!(customer_id = %customer.id, "customer created");
        Ok(customer)
    }

    #[instrument(skip(self))]
    pub async fn find_by_phone(
        &self,
        restaurant_id: Uuid,
        phone: &str,
    ) -> Result<customer::Model, ServiceError> {
        let phone = normalize_phone(phone)?;
        CustomerEntity::find()
            .filter(customer::Column::RestaurantId.eq(restaurant_id))
            .filter(customer::Column::Phone.eq(phone.clone()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Customer with phone", phone))
    }

    #[instrument(skip(self))]
    pub async fn get_customer(
        &self,
        restaurant_id: Uuid,
        customer_id: Uuid,
    ) -> Result<customer::Model, ServiceError> {
        find_customer_in(&*self.db, restaurant_id, customer_id).await
    }

    #[instrument(skip(self))]
    pub async fn list_customers(
        &self,
        restaurant_id: Uuid,
        pagination: PaginationParams,
    ) -> Result<(Vec<customer::Model>, u64), ServiceError> {
        let paginator = CustomerEntity::find()
            .filter(customer::Column::RestaurantId.eq(restaurant_id))
            .order_by_asc(customer::Column::Name)
            .paginate(&*self.db, pagination.limit());
        let total = paginator.num_items().await?;
        let customers = paginator.fetch_page(pagination.page_index()).await?;
        Ok((customers, total))
    }

    #[instrument(skip(self))]
    pub async fn history(
        &self,
        restaurant_id: Uuid,
        customer_id: Uuid,
    ) -> Result<Vec<loyalty_transaction::Model>, ServiceError> {
        find_customer_in(&*self.db, restaurant_id, customer_id).await?;
        Ok(LoyaltyEntity::find()
            .filter(loyalty_transaction::Column::CustomerId.eq(customer_id))
            .order_by_desc(loyalty_transaction::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self, request))]
    pub async fn adjust_points(
        &self,
        restaurant_id: Uuid,
        customer_id: Uuid,
        user_id: Uuid,
        request: AdjustPointsRequest,
    ) -> Result<customer::Model, ServiceError> {
        request.validate()?;
        if request.points == 0 {
            return Err(ServiceError::ValidationError(
                "adjustment must be non-zero".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let customer = find_customer_in(&txn, restaurant_id, customer_id).await?;
        let (customer, _) = apply_points_in(
            &txn,
            customer,
            request.points,
            LoyaltyKind::Adjust,
            None,
            Some(request.note.trim().to_string()),
            Some(user_id),
        )
        .await?;
        txn.commit().await?;

        counter!("restro.loyalty.adjustments", 1);
        info!(%customer_id, points = request.points, "loyalty points adjusted");
        Ok(customer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn restaurant() -> restaurant::Model {
        restaurant::Model {
            id: Uuid::new_v4(),
            name: "Thakali Kitchen".into(),
            address: None,
            phone: None,
            pan_number: Some("123456789".into()),
            vat_registered: true,
            vat_rate: dec!(0.13),
            service_charge_rate: dec!(0.10),
            loyalty_earn_rate: dec!(0.01),
            loyalty_point_value: dec!(1),
            loyalty_min_redeem_points: 100,
            cbms_enabled: false,
            currency: "NPR".into(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[rstest]
    #[case("9841234567", "9841234567")]
    #[case("+977-9801234567", "9801234567")]
    #[case("984 123 4567", "9841234567")]
    fn accepts_nepali_mobiles(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_phone(raw).unwrap(), expected);
    }

    #[rstest]
    #[case("9612345678")]
    #[case("014412345")]
    #[case("98412345")]
    fn rejects_other_numbers(#[case] raw: &str) {
        assert!(normalize_phone(raw).is_err());
    }

    #[test]
    fn earned_points_round_down() {
        assert_eq!(points_for(dec!(1243), dec!(0.01)), 12);
        assert_eq!(points_for(dec!(99.99), dec!(0.01)), 0);
    }

    #[test]
    fn redemption_respects_minimum_and_balance() {
        let r = restaurant();
        assert_eq!(redemption_value(&r, 500, 150).unwrap(), dec!(150));
        assert!(redemption_value(&r, 500, 50).is_err());
        assert!(redemption_value(&r, 120, 150).is_err());
    }
}
