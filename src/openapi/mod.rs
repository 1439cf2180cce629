use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "Bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Restro API",
        version = "0.1.0",
        description = r#"
# Restaurant POS and back office

Tables and QR ordering, kitchen and bar tickets, VAT invoices, Khalti and
cash payments, loyalty points, double-entry accounting, stock and IRD CBMS
reporting. Every restaurant's data is isolated from every other's.

## Authentication

Staff endpoints take a JWT from `POST /api/v1/auth/login`:

```
Authorization: Bearer <token>
```

Endpoints under `/api/v1/guest/{token}` are public. The token printed in the
table's QR code is the only credential.

## Money

Amounts are decimal strings in NPR, rounded to paisa.
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers((url = "http://localhost:8080", description = "Local development")),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Staff login"),
        (name = "restaurants", description = "Tenants and their settings"),
        (name = "staff", description = "Staff accounts and roles"),
        (name = "tables", description = "Floor plan and QR codes"),
        (name = "sessions", description = "Seated parties and table moves"),
        (name = "menu", description = "Categories, items and recipes"),
        (name = "orders", description = "Orders placed at a table"),
        (name = "kitchen", description = "KOT and BOT station queues"),
        (name = "billing", description = "VAT invoices"),
        (name = "payments", description = "Cash, card, QR and Khalti payments"),
        (name = "loyalty", description = "Customers and points"),
        (name = "accounting", description = "Chart of accounts, vouchers and ledgers"),
        (name = "inventory", description = "Stock, vendors and purchases"),
        (name = "compliance", description = "IRD CBMS reporting and sales register"),
        (name = "reports", description = "Sales reports and dashboard"),
        (name = "guest", description = "Public QR ordering")
    ),
    paths(
        crate::handlers::auth::login,
        crate::handlers::auth::me,

        crate::handlers::restaurants::create_restaurant,
        crate::handlers::restaurants::list_restaurants,
        crate::handlers::restaurants::current_restaurant,
        crate::handlers::restaurants::update_settings,

        crate::handlers::staff::list_staff,
        crate::handlers::staff::create_staff,
        crate::handlers::staff::deactivate_staff,

        crate::handlers::tables::list_tables,
        crate::handlers::tables::create_table,
        crate::handlers::tables::get_qr,
        crate::handlers::tables::regenerate_qr,
        crate::handlers::tables::open_session,
        crate::handlers::tables::mark_cleaned,
        crate::handlers::tables::get_session,
        crate::handlers::tables::request_bill,
        crate::handlers::tables::attach_customer,
        crate::handlers::tables::cancel_session,
        crate::handlers::tables::move_session,

        crate::handlers::menu::list_categories,
        crate::handlers::menu::create_category,
        crate::handlers::menu::list_items,
        crate::handlers::menu::create_item,
        crate::handlers::menu::set_availability,
        crate::handlers::menu::get_recipe,
        crate::handlers::menu::set_recipe,

        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::list_session_orders,
        crate::handlers::orders::place_order,
        crate::handlers::orders::confirm_order,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::cancel_item,

        crate::handlers::kitchen::station_queue,
        crate::handlers::kitchen::update_item_status,
        crate::handlers::kitchen::serve_order,

        crate::handlers::billing::generate_bill,
        crate::handlers::billing::session_bill,
        crate::handlers::billing::list_bills,
        crate::handlers::billing::get_bill,
        crate::handlers::billing::print_bill,
        crate::handlers::billing::void_bill,

        crate::handlers::payments::record_payment,
        crate::handlers::payments::initiate_khalti,
        crate::handlers::payments::khalti_callback,

        crate::handlers::customers::list_customers,
        crate::handlers::customers::create_customer,
        crate::handlers::customers::find_by_phone,
        crate::handlers::customers::get_customer,
        crate::handlers::customers::loyalty_history,
        crate::handlers::customers::adjust_points,

        crate::handlers::accounting::list_accounts,
        crate::handlers::accounting::create_account,
        crate::handlers::accounting::seed_chart,
        crate::handlers::accounting::account_ledger,
        crate::handlers::accounting::trial_balance,
        crate::handlers::accounting::profit_and_loss,
        crate::handlers::accounting::list_vouchers,
        crate::handlers::accounting::create_voucher,
        crate::handlers::accounting::get_voucher,
        crate::handlers::accounting::update_draft,
        crate::handlers::accounting::delete_draft,
        crate::handlers::accounting::post_voucher,
        crate::handlers::accounting::cancel_voucher,

        crate::handlers::inventory::list_stock_items,
        crate::handlers::inventory::create_stock_item,
        crate::handlers::inventory::get_stock_item,
        crate::handlers::inventory::low_stock,
        crate::handlers::inventory::list_movements,
        crate::handlers::inventory::adjust_stock,
        crate::handlers::inventory::record_wastage,
        crate::handlers::inventory::list_vendors,
        crate::handlers::inventory::create_vendor,
        crate::handlers::inventory::list_purchases,
        crate::handlers::inventory::record_purchase,
        crate::handlers::inventory::get_purchase,

        crate::handlers::compliance::sync_bill,
        crate::handlers::compliance::sync_pending,
        crate::handlers::compliance::sales_register,

        crate::handlers::reports::sales_summary,
        crate::handlers::reports::item_sales,
        crate::handlers::reports::dashboard,

        crate::handlers::guest::scan,
        crate::handlers::guest::menu,
        crate::handlers::guest::join_session,
        crate::handlers::guest::list_orders,
        crate::handlers::guest::place_order,
        crate::handlers::guest::request_bill,
        crate::handlers::guest::view_bill,
        crate::handlers::guest::pay_with_khalti,
    ),
    components(
        schemas(
            crate::errors::ErrorResponse,
            crate::common::DateRangeParams,
            crate::common::PaginationParams,
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
