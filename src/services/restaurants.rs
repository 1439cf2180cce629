use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, EntityTrait, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::validate_pan,
    entities::{
        restaurant::{self, Entity as RestaurantEntity},
        user::StaffRole,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        accounting::seed_chart_in,
        staff::{insert_user_in, StaffView},
    },
};

const DEFAULT_CURRENCY: &str = "NPR";
const DEFAULT_LOYALTY_EARN_RATE: Decimal = dec!(0.01);
const DEFAULT_LOYALTY_POINT_VALUE: Decimal = dec!(1);
const DEFAULT_MIN_REDEEM_POINTS: i64 = 100;

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateRestaurantRequest {
    #[validate(length(min = 1, max = 120, message = "Restaurant name is required"))]
    pub name: String,
    #[validate(length(max = 255))]
    pub address: Option<String>,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    pub pan_number: Option<String>,
    #[serde(default = "default_true")]
    pub vat_registered: bool,
    #[validate(length(min = 1, max = 120))]
    pub owner_name: String,
    #[validate(email)]
    pub owner_email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub owner_password: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateSettingsRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    #[validate(length(max = 255))]
    pub address: Option<String>,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    pub pan_number: Option<String>,
    pub vat_registered: Option<bool>,
    pub vat_rate: Option<Decimal>,
    pub service_charge_rate: Option<Decimal>,
    pub loyalty_earn_rate: Option<Decimal>,
    pub loyalty_point_value: Option<Decimal>,
    pub loyalty_min_redeem_points: Option<i64>,
    pub cbms_enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreatedRestaurant {
    pub restaurant: restaurant::Model,
    pub owner: StaffView,
}

fn check_rate(field: &str, rate: Decimal) -> Result<(), ServiceError> {
    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(ServiceError::ValidationError(format!(
            "{} must be between 0 and 1",
            field
        )));
    }
    Ok(())
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[derive(Clone)]
pub struct RestaurantService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
    default_vat_rate: Decimal,
    default_service_charge_rate: Decimal,
}

impl RestaurantService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Option<Arc<EventSender>>,
        default_vat_rate: Decimal,
        default_service_charge_rate: Decimal,
    ) -> Self {
        Self {
            db,
            event_sender,
            default_vat_rate,
            default_service_charge_rate,
        }
    }

    /// Creates the tenant, its owner and its chart of accounts together.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_restaurant(
        &self,
        request: CreateRestaurantRequest,
    ) -> Result<CreatedRestaurant, ServiceError> {
        request.validate()?;
        let pan_number = clean(request.pan_number);
        if let Some(pan) = &pan_number {
            validate_pan(pan)?;
        }

        let now = Utc::now();
        let txn = self.db.begin().await?;

        let restaurant = restaurant::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name.trim().to_string()),
            address: Set(clean(request.address)),
            phone: Set(clean(request.phone)),
            pan_number: Set(pan_number),
            vat_registered: Set(request.vat_registered),
            vat_rate: Set(self.default_vat_rate),
            service_charge_rate: Set(self.default_service_charge_rate),
            loyalty_earn_rate: Set(DEFAULT_LOYALTY_EARN_RATE),
            loyalty_point_value: Set(DEFAULT_LOYALTY_POINT_VALUE),
            loyalty_min_redeem_points: Set(DEFAULT_MIN_REDEEM_POINTS),
            cbms_enabled: Set(false),
            currency: Set(DEFAULT_CURRENCY.to_string()),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let owner = insert_user_in(
            &txn,
            Some(restaurant.id),
            &request.owner_name,
            &request.owner_email,
            &request.owner_password,
            StaffRole::Owner,
        )
        .await?;

        seed_chart_in(&txn, restaurant.id).await?;
        txn.commit().await?;

        counter!("restro.restaurants.created", 1);
        info!(restaurant_id = %restaurant.id, "restaurant created");
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::RestaurantCreated(restaurant.id))
                .await;
        }

        Ok(CreatedRestaurant {
            restaurant,
            owner: owner.into(),
        })
    }

    #[instrument(skip(self))]
    pub async fn get_restaurant(&self, restaurant_id: Uuid) -> Result<restaurant::Model, ServiceError> {
        RestaurantEntity::find_by_id(restaurant_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Restaurant", restaurant_id))
    }

    #[instrument(skip(self))]
    pub async fn list_restaurants(&self) -> Result<Vec<restaurant::Model>, ServiceError> {
        Ok(RestaurantEntity::find()
            .order_by_asc(restaurant::Column::Name)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self, request))]
    pub async fn update_settings(
        &self,
        restaurant_id: Uuid,
        request: UpdateSettingsRequest,
    ) -> Result<restaurant::Model, ServiceError> {
        request.validate()?;
        let current = self.get_restaurant(restaurant_id).await?;

        for (field, rate) in [
            ("vat_rate", request.vat_rate),
            ("service_charge_rate", request.service_charge_rate),
            ("loyalty_earn_rate", request.loyalty_earn_rate),
        ] {
            if let Some(rate) = rate {
                check_rate(field, rate)?;
            }
        }
        if matches!(request.loyalty_point_value, Some(v) if v < Decimal::ZERO) {
            return Err(ServiceError::ValidationError(
                "loyalty_point_value cannot be negative".to_string(),
            ));
        }
        if matches!(request.loyalty_min_redeem_points, Some(p) if p < 0) {
            return Err(ServiceError::ValidationError(
                "loyalty_min_redeem_points cannot be negative".to_string(),
            ));
        }

        let pan_number = match request.pan_number {
            Some(raw) => {
                let pan = clean(Some(raw));
                if let Some(p) = &pan {
                    validate_pan(p)?;
                }
                pan
            }
            None => current.pan_number.clone(),
        };
        let cbms_enabled = request.cbms_enabled.unwrap_or(current.cbms_enabled);
        if cbms_enabled && pan_number.is_none() {
            return Err(ServiceError::ValidationError(
                "a PAN number is required to enable CBMS reporting".to_string(),
            ));
        }

        let mut active: restaurant::ActiveModel = current.into();
        if let Some(name) = clean(request.name) {
            active.name = Set(name);
        }
        if request.address.is_some() {
            active.address = Set(clean(request.address));
        }
        if request.phone.is_some() {
            active.phone = Set(clean(request.phone));
        }
        active.pan_number = Set(pan_number);
        active.cbms_enabled = Set(cbms_enabled);
        if let Some(v) = request.vat_registered {
            active.vat_registered = Set(v);
        }
        if let Some(v) = request.vat_rate {
            active.vat_rate = Set(v);
        }
        if let Some(v) = request.service_charge_rate {
            active.service_charge_rate = Set(v);
        }
        if let Some(v) = request.loyalty_earn_rate {
            active.loyalty_earn_rate = Set(v);
        }
        if let Some(v) = request.loyalty_point_value {
            active.loyalty_point_value = Set(v);
        }
        if let Some(v) = request.loyalty_min_redeem_points {
            active.loyalty_min_redeem_points = Set(v);
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(&*self.db).await?;
        info!(%restaurant_id, "restaurant settings updated");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_are_fractions() {
        assert!(check_rate("vat_rate", dec!(0.13)).is_ok());
        assert!(check_rate("vat_rate", dec!(13)).is_err());
        assert!(check_rate("vat_rate", dec!(-0.1)).is_err());
    }

    #[test]
    fn blank_strings_become_none() {
        assert_eq!(clean(Some("   ".into())), None);
        assert_eq!(clean(Some(" Lazimpat ".into())), Some("Lazimpat".into()));
    }
}
