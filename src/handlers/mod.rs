pub mod accounting;
pub mod auth;
pub mod billing;
pub mod compliance;
pub mod customers;
pub mod guest;
pub mod inventory;
pub mod kitchen;
pub mod menu;
pub mod orders;
pub mod payments;
pub mod reports;
pub mod restaurants;
pub mod staff;
pub mod tables;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::{
    auth::AuthService,
    config::AppConfig,
    errors::ServiceError,
    events::EventSender,
    services::{
        accounting::AccountingService,
        billing::BillingService,
        cbms::CbmsClient,
        compliance::{ComplianceService, FiscalCalendar},
        inventory::InventoryService,
        khalti::{KhaltiGateway, PaymentGateway},
        kitchen::KitchenService,
        loyalty::LoyaltyService,
        menu::MenuService,
        orders::OrderService,
        payments::PaymentService,
        reports::ReportService,
        restaurants::RestaurantService,
        staff::StaffService,
        tables::TableService,
    },
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub restaurants: Arc<RestaurantService>,
    pub staff: Arc<StaffService>,
    pub tables: Arc<TableService>,
    pub menu: Arc<MenuService>,
    pub orders: Arc<OrderService>,
    pub kitchen: Arc<KitchenService>,
    pub billing: Arc<BillingService>,
    pub payments: Arc<PaymentService>,
    pub loyalty: Arc<LoyaltyService>,
    pub accounting: Arc<AccountingService>,
    pub inventory: Arc<InventoryService>,
    pub compliance: Arc<ComplianceService>,
    pub reports: Arc<ReportService>,
}

impl AppServices {
    /// Wires every service against one pool. Khalti and CBMS clients are only
    /// built when their credentials are configured.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        event_sender: Arc<EventSender>,
        auth_service: Arc<AuthService>,
    ) -> Result<Self, ServiceError> {
        let events = Some(event_sender);
        let calendar = FiscalCalendar::from_config(config);

        let gateway = KhaltiGateway::from_config(&config.khalti)?
            .map(|g| Arc::new(g) as Arc<dyn PaymentGateway>);
        let cbms = CbmsClient::from_config(&config.cbms)?;

        Ok(Self {
            restaurants: Arc::new(RestaurantService::new(
                db.clone(),
                events.clone(),
                config.default_vat_rate,
                config.default_service_charge_rate,
            )),
            staff: Arc::new(StaffService::new(db.clone(), auth_service)),
            tables: Arc::new(TableService::new(
                db.clone(),
                events.clone(),
                config.qr_signing_secret.clone(),
                config.public_base_url.clone(),
            )),
            menu: Arc::new(MenuService::new(db.clone())),
            orders: Arc::new(OrderService::new(db.clone(), events.clone(), calendar)),
            kitchen: Arc::new(KitchenService::new(db.clone(), events.clone())),
            billing: Arc::new(BillingService::new(
                db.clone(),
                events.clone(),
                calendar,
                config.cbms.enabled,
            )),
            payments: Arc::new(PaymentService::new(
                db.clone(),
                events.clone(),
                gateway,
                config.khalti.clone(),
            )),
            loyalty: Arc::new(LoyaltyService::new(db.clone())),
            accounting: Arc::new(AccountingService::new(db.clone(), events.clone(), calendar)),
            inventory: Arc::new(InventoryService::new(db.clone(), events, calendar)),
            compliance: Arc::new(ComplianceService::new(db.clone(), cbms)),
            reports: Arc::new(ReportService::new(db)),
        })
    }
}
