#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use restro_api::{
    app_router,
    auth::AuthService,
    config::AppConfig,
    db::{self, DbConfig},
    events::{self, EventHandler, EventSender},
    handlers::AppServices,
    AppState,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use tower_http::cors::CorsLayer;

pub const ADMIN_EMAIL: &str = "admin@restro.test";
pub const ADMIN_PASSWORD: &str = "admin-password-123";
pub const OWNER_PASSWORD: &str = "owner-password-123";
const JWT_SECRET: &str =
    "test_secret_key_for_integration_tests_only_0123456789abcdefghijklmnopqrstuvwxyz";

/// Application wired against a fresh in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

/// A restaurant with a menu and one table, logged in as its owner.
pub struct Fixture {
    pub restaurant_id: String,
    pub owner_token: String,
    pub kitchen_category_id: String,
    pub bar_category_id: String,
    /// Momo, Rs 400, Kitchen
    pub momo_id: String,
    /// Lemonade, Rs 200, Bar
    pub lemonade_id: String,
    pub table_id: String,
    pub qr_token: String,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Lets a test point gateways at a mock server before services are built.
    pub async fn with_config(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            3600,
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        );
        tweak(&mut cfg);

        let pool = db::establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .expect("in-memory database");
        db::run_migrations(&pool).await.expect("migrations");
        let db = Arc::new(pool);

        let (tx, rx) = mpsc::channel(64);
        let event_sender = Arc::new(EventSender::new(tx));
        let auth = Arc::new(AuthService::new((&cfg).into()));
        let services = AppServices::new(db.clone(), &cfg, event_sender.clone(), auth.clone())
            .expect("services");

        services
            .staff
            .ensure_platform_admin(ADMIN_EMAIL, ADMIN_PASSWORD)
            .await
            .expect("bootstrap admin");

        let handlers: Vec<Arc<dyn EventHandler>> =
            vec![Arc::new(services.compliance.as_ref().clone())];
        let event_task = tokio::spawn(events::process_events(rx, handlers));

        let state = AppState {
            db,
            config: cfg,
            event_sender,
            services,
            auth,
        };
        let router = app_router(state.clone(), CorsLayer::permissive());

        Self {
            router,
            state,
            _event_task: event_task,
        }
    }

    /// Sends one request through the full middleware stack.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None, token).await
    }

    pub async fn post(&self, uri: &str, body: Value, token: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body), token).await
    }

    pub async fn put(&self, uri: &str, body: Value, token: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::PUT, uri, Some(body), token).await
    }

    pub async fn login(&self, email: &str, password: &str) -> String {
        let (status, body) = self
            .post(
                "/api/v1/auth/login",
                json!({ "email": email, "password": password }),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        body["data"]["access_token"]
            .as_str()
            .expect("access token")
            .to_string()
    }

    pub async fn admin_token(&self) -> String {
        self.login(ADMIN_EMAIL, ADMIN_PASSWORD).await
    }

    /// Onboards a restaurant and returns `(restaurant_id, owner_token)`.
    pub async fn create_restaurant(&self, name: &str, owner_email: &str) -> (String, String) {
        let admin = self.admin_token().await;
        let (status, body) = self
            .post(
                "/api/v1/restaurants",
                json!({
                    "name": name,
                    "pan_number": "301234567",
                    "owner_name": "Owner",
                    "owner_email": owner_email,
                    "owner_password": OWNER_PASSWORD,
                }),
                Some(&admin),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create restaurant: {body}");
        let restaurant_id = body["data"]["restaurant"]["id"]
            .as_str()
            .expect("restaurant id")
            .to_string();
        let token = self.login(owner_email, OWNER_PASSWORD).await;
        (restaurant_id, token)
    }

    pub async fn create_staff(&self, owner_token: &str, email: &str, role: &str) -> String {
        let password = "staff-password-1";
        let (status, body) = self
            .post(
                "/api/v1/staff",
                json!({ "name": role, "email": email, "password": password, "role": role }),
                Some(owner_token),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create staff: {body}");
        self.login(email, password).await
    }

    pub async fn create_menu_item(
        &self,
        token: &str,
        category_id: &str,
        name: &str,
        price: &str,
    ) -> String {
        let (status, body) = self
            .post(
                "/api/v1/menu/items",
                json!({ "category_id": category_id, "name": name, "price": price }),
                Some(token),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create item: {body}");
        id_of(&body)
    }

    pub async fn create_table(&self, token: &str, name: &str) -> (String, String) {
        let (status, body) = self
            .post(
                "/api/v1/tables",
                json!({ "name": name, "capacity": 4 }),
                Some(token),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create table: {body}");
        let table_id = id_of(&body);

        let (status, body) = self
            .get(&format!("/api/v1/tables/{table_id}/qr"), Some(token))
            .await;
        assert_eq!(status, StatusCode::OK, "qr: {body}");
        let qr_token = body["data"]["token"].as_str().expect("qr token").to_string();
        (table_id, qr_token)
    }

    pub async fn fixture(&self, name: &str, owner_email: &str) -> Fixture {
        let (restaurant_id, owner_token) = self.create_restaurant(name, owner_email).await;

        let (status, body) = self
            .post(
                "/api/v1/menu/categories",
                json!({ "name": "Momo", "station": "Kitchen" }),
                Some(&owner_token),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "category: {body}");
        let kitchen_category_id = id_of(&body);

        let (status, body) = self
            .post(
                "/api/v1/menu/categories",
                json!({ "name": "Drinks", "station": "Bar" }),
                Some(&owner_token),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "category: {body}");
        let bar_category_id = id_of(&body);

        let momo_id = self
            .create_menu_item(&owner_token, &kitchen_category_id, "Buff Momo", "400")
            .await;
        let lemonade_id = self
            .create_menu_item(&owner_token, &bar_category_id, "Lemonade", "200")
            .await;
        let (table_id, qr_token) = self.create_table(&owner_token, "T1").await;

        Fixture {
            restaurant_id,
            owner_token,
            kitchen_category_id,
            bar_category_id,
            momo_id,
            lemonade_id,
            table_id,
            qr_token,
        }
    }

    /// Opens a staff session on the table and returns its id.
    pub async fn open_session(&self, token: &str, table_id: &str) -> String {
        let (status, body) = self
            .post(
                &format!("/api/v1/tables/{table_id}/sessions"),
                json!({ "guest_count": 2 }),
                Some(token),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "open session: {body}");
        id_of(&body)
    }

    /// Moves every item of an order through the stations and serves it.
    pub async fn cook_and_serve(&self, token: &str, order: &Value) {
        let order_id = order["id"].as_str().expect("order id");
        for item in order["items"].as_array().expect("items") {
            let item_id = item["id"].as_str().expect("item id");
            for status in ["Preparing", "Ready"] {
                let (code, body) = self
                    .put(
                        &format!("/api/v1/order-items/{item_id}/status"),
                        json!({ "status": status }),
                        Some(token),
                    )
                    .await;
                assert_eq!(code, StatusCode::OK, "item -> {status}: {body}");
            }
        }
        let (code, body) = self
            .post(&format!("/api/v1/orders/{order_id}/serve"), json!({}), Some(token))
            .await;
        assert_eq!(code, StatusCode::OK, "serve: {body}");
    }

    pub async fn trial_balance(&self, token: &str) -> Value {
        let (status, body) = self.get("/api/v1/reports/trial-balance", Some(token)).await;
        assert_eq!(status, StatusCode::OK, "trial balance: {body}");
        body["data"].clone()
    }

    /// Account id for a chart code such as "1110".
    pub async fn account_id(&self, token: &str, code: &str) -> String {
        let (status, body) = self.get("/api/v1/accounts", Some(token)).await;
        assert_eq!(status, StatusCode::OK, "accounts: {body}");
        body["data"]
            .as_array()
            .expect("accounts")
            .iter()
            .find(|a| a["code"] == code)
            .and_then(|a| a["id"].as_str())
            .unwrap_or_else(|| panic!("no account {code}"))
            .to_string()
    }
}

pub fn id_of(body: &Value) -> String {
    body["data"]["id"].as_str().expect("data.id").to_string()
}

/// Decimal fields serialize as strings; compares numerically.
pub fn money(value: &Value) -> rust_decimal::Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("not a money value: {other}"),
    }
}
