use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{can_manage_role, hash_password, verify_password, AuthService, AuthUser, TokenResponse},
    entities::{
        restaurant,
        user::{self, Entity as UserEntity, StaffRole},
    },
    errors::ServiceError,
};

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub token: TokenResponse,
    pub user: StaffView,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateStaffRequest {
    #[validate(length(min = 1, max = 120, message = "Name is required"))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    pub role: StaffRole,
}

/// A user without credentials.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StaffView {
    pub id: Uuid,
    pub restaurant_id: Option<Uuid>,
    pub name: String,
    pub email: String,
    pub role: StaffRole,
    pub is_active: bool,
    pub last_login_at: Option<chrono::DateTime<Utc>>,
    pub created_at: chrono::DateTime<Utc>,
}

impl From<user::Model> for StaffView {
    fn from(u: user::Model) -> Self {
        Self {
            id: u.id,
            restaurant_id: u.restaurant_id,
            name: u.name,
            email: u.email,
            role: u.role,
            is_active: u.is_active,
            last_login_at: u.last_login_at,
            created_at: u.created_at,
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Inserts a user after checking the email is free.
pub async fn insert_user_in<C: ConnectionTrait>(
    conn: &C,
    restaurant_id: Option<Uuid>,
    name: &str,
    email: &str,
    password: &str,
    role: StaffRole,
) -> Result<user::Model, ServiceError> {
    let email = normalize_email(email);
    let taken = UserEntity::find()
        .filter(user::Column::Email.eq(email.clone()))
        .one(conn)
        .await?;
    if taken.is_some() {
        return Err(ServiceError::Conflict(format!(
            "a user with email {} already exists",
            email
        )));
    }

    let now = Utc::now();
    Ok(user::ActiveModel {
        id: Set(Uuid::new_v4()),
        restaurant_id: Set(restaurant_id),
        name: Set(name.trim().to_string()),
        email: Set(email),
        password_hash: Set(hash_password(password)?),
        role: Set(role),
        is_active: Set(true),
        last_login_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?)
}

#[derive(Clone)]
pub struct StaffService {
    db: Arc<DatabaseConnection>,
    auth: Arc<AuthService>,
}

impl StaffService {
    pub fn new(db: Arc<DatabaseConnection>, auth: Arc<AuthService>) -> Self {
        Self { db, auth }
    }

    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn login(&self, request: LoginRequest) -> Result<LoginResponse, ServiceError> {
        request.validate()?;
        let db = &*self.db;
        let invalid = || ServiceError::Unauthorized("invalid email or password".to_string());

        let user = UserEntity::find()
            .filter(user::Column::Email.eq(normalize_email(&request.email)))
            .one(db)
            .await?
            .ok_or_else(invalid)?;

        if !verify_password(&request.password, &user.password_hash) {
            counter!("restro.auth.login_failed", 1);
            return Err(invalid());
        }
        if !user.is_active {
            warn!(user_id = %user.id, "inactive user attempted login");
            return Err(ServiceError::Unauthorized("account is deactivated".to_string()));
        }
        if let Some(restaurant_id) = user.restaurant_id {
            let active = restaurant::Entity::find_by_id(restaurant_id)
                .one(db)
                .await?
                .map(|r| r.is_active)
                .unwrap_or(false);
            if !active {
                return Err(ServiceError::Unauthorized(
                    "restaurant is deactivated".to_string(),
                ));
            }
        }

        let token = self
            .auth
            .generate_token(&user)
            .map_err(|e| ServiceError::JwtError(e.to_string()))?;

        let mut active: user::ActiveModel = user.into();
        active.last_login_at = Set(Some(Utc::now()));
        let user = active.update(db).await?;

        counter!("restro.auth.logins", 1);
        info!(user_id = %user.id, role = user.role.as_str(), "user logged in");
        Ok(LoginResponse {
            token,
            user: user.into(),
        })
    }

    #[instrument(skip(self, actor, request), fields(actor = %actor.user_id, role = ?request.role))]
    pub async fn create_staff(
        &self,
        actor: &AuthUser,
        request: CreateStaffRequest,
    ) -> Result<StaffView, ServiceError> {
        request.validate()?;
        let restaurant_id = actor.tenant()?;
        if !can_manage_role(&actor.role, &request.role) {
            return Err(ServiceError::Forbidden(format!(
                "{} cannot create {} accounts",
                actor.role.as_str(),
                request.role.as_str()
            )));
        }

        let user = insert_user_in(
            &*self.db,
            Some(restaurant_id),
            &request.name,
            &request.email,
            &request.password,
            request.role,
        )
        .await?;

        info!(user_id = %user.id, "staff member created");
        Ok(user.into())
    }

    #[instrument(skip(self))]
    pub async fn list_staff(&self, restaurant_id: Uuid) -> Result<Vec<StaffView>, ServiceError> {
        Ok(UserEntity::find()
            .filter(user::Column::RestaurantId.eq(restaurant_id))
            .order_by_asc(user::Column::Name)
            .all(&*self.db)
            .await?
            .into_iter()
            .map(StaffView::from)
            .collect())
    }

    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub async fn deactivate_staff(
        &self,
        actor: &AuthUser,
        user_id: Uuid,
    ) -> Result<StaffView, ServiceError> {
        let restaurant_id = actor.tenant()?;
        if actor.user_id == user_id {
            return Err(ServiceError::InvalidOperation(
                "you cannot deactivate your own account".to_string(),
            ));
        }

        let target = UserEntity::find_by_id(user_id)
            .filter(user::Column::RestaurantId.eq(restaurant_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("User", user_id))?;
        if !can_manage_role(&actor.role, &target.role) {
            return Err(ServiceError::Forbidden(format!(
                "{} cannot deactivate {} accounts",
                actor.role.as_str(),
                target.role.as_str()
            )));
        }

        let mut active: user::ActiveModel = target.into();
        active.is_active = Set(false);
        active.updated_at = Set(Utc::now());
        let user = active.update(&*self.db).await?;

        info!(%user_id, "staff member deactivated");
        Ok(user.into())
    }

    /// Creates the first platform administrator when none exists.
    #[instrument(skip(self, password))]
    pub async fn ensure_platform_admin(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<StaffView>, ServiceError> {
        let existing = UserEntity::find()
            .filter(user::Column::Role.eq(StaffRole::PlatformAdmin))
            .one(&*self.db)
            .await?;
        if existing.is_some() {
            return Ok(None);
        }

        let admin = insert_user_in(
            &*self.db,
            None,
            "Platform Admin",
            email,
            password,
            StaffRole::PlatformAdmin,
        )
        .await?;
        info!(user_id = %admin.id, "platform admin created");
        Ok(Some(admin.into()))
    }
}
