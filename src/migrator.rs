use sea_orm::{EntityTrait, Schema};
use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240716_000001_create_tenancy_tables::Migration),
            Box::new(m20240716_000002_create_floor_and_menu_tables::Migration),
            Box::new(m20240716_000003_create_order_tables::Migration),
            Box::new(m20240716_000004_create_billing_tables::Migration),
            Box::new(m20240716_000005_create_accounting_tables::Migration),
            Box::new(m20240716_000006_create_inventory_tables::Migration),
        ]
    }
}

/// Creates the table for `entity` exactly as its model declares it.
async fn create_entity_table<E>(manager: &SchemaManager<'_>, entity: E) -> Result<(), DbErr>
where
    E: EntityTrait,
{
    let schema = Schema::new(manager.get_database_backend());
    manager
        .create_table(schema.create_table_from_entity(entity).if_not_exists().to_owned())
        .await
}

async fn drop_entity_table<E>(manager: &SchemaManager<'_>, entity: E) -> Result<(), DbErr>
where
    E: EntityTrait,
{
    manager
        .drop_table(Table::drop().table(entity).if_exists().to_owned())
        .await
}

async fn create_index<E, C>(
    manager: &SchemaManager<'_>,
    name: &str,
    entity: E,
    columns: Vec<C>,
    unique: bool,
) -> Result<(), DbErr>
where
    E: EntityTrait,
    C: IntoIden,
{
    let mut index = Index::create();
    index.if_not_exists().name(name).table(entity);
    for column in columns {
        index.col(column);
    }
    if unique {
        index.unique();
    }
    manager.create_index(index.to_owned()).await
}

mod m20240716_000001_create_tenancy_tables {
    use super::*;
    use crate::entities::{restaurant, user};

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240716_000001_create_tenancy_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            create_entity_table(manager, restaurant::Entity).await?;
            create_entity_table(manager, user::Entity).await?;

            create_index(
                manager,
                "idx_users_restaurant_id",
                user::Entity,
                vec![user::Column::RestaurantId],
                false,
            )
            .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            drop_entity_table(manager, user::Entity).await?;
            drop_entity_table(manager, restaurant::Entity).await
        }
    }
}

mod m20240716_000002_create_floor_and_menu_tables {
    use super::*;
    use crate::entities::{dining_table, menu_category, menu_item, recipe_line, table_session};

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240716_000002_create_floor_and_menu_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            create_entity_table(manager, dining_table::Entity).await?;
            create_entity_table(manager, table_session::Entity).await?;
            create_entity_table(manager, menu_category::Entity).await?;
            create_entity_table(manager, menu_item::Entity).await?;
            create_entity_table(manager, recipe_line::Entity).await?;

            create_index(
                manager,
                "uq_dining_tables_restaurant_name",
                dining_table::Entity,
                vec![dining_table::Column::RestaurantId, dining_table::Column::Name],
                true,
            )
            .await?;
            create_index(
                manager,
                "idx_table_sessions_table_status",
                table_session::Entity,
                vec![table_session::Column::TableId, table_session::Column::Status],
                false,
            )
            .await?;
            create_index(
                manager,
                "idx_menu_items_restaurant_category",
                menu_item::Entity,
                vec![menu_item::Column::RestaurantId, menu_item::Column::CategoryId],
                false,
            )
            .await?;
            create_index(
                manager,
                "idx_recipe_lines_menu_item",
                recipe_line::Entity,
                vec![recipe_line::Column::MenuItemId],
                false,
            )
            .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            drop_entity_table(manager, recipe_line::Entity).await?;
            drop_entity_table(manager, menu_item::Entity).await?;
            drop_entity_table(manager, menu_category::Entity).await?;
            drop_entity_table(manager, table_session::Entity).await?;
            drop_entity_table(manager, dining_table::Entity).await
        }
    }
}

mod m20240716_000003_create_order_tables {
    use super::*;
    use crate::entities::{kitchen_ticket, order, order_item};

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240716_000003_create_order_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            create_entity_table(manager, order::Entity).await?;
            create_entity_table(manager, order_item::Entity).await?;
            create_entity_table(manager, kitchen_ticket::Entity).await?;

            create_index(
                manager,
                "idx_orders_session_id",
                order::Entity,
                vec![order::Column::SessionId],
                false,
            )
            .await?;
            create_index(
                manager,
                "idx_orders_restaurant_status",
                order::Entity,
                vec![order::Column::RestaurantId, order::Column::Status],
                false,
            )
            .await?;
            create_index(
                manager,
                "idx_order_items_order_id",
                order_item::Entity,
                vec![order_item::Column::OrderId],
                false,
            )
            .await?;
            create_index(
                manager,
                "idx_kitchen_tickets_station_status",
                kitchen_ticket::Entity,
                vec![
                    kitchen_ticket::Column::RestaurantId,
                    kitchen_ticket::Column::Station,
                    kitchen_ticket::Column::Status,
                ],
                false,
            )
            .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            drop_entity_table(manager, kitchen_ticket::Entity).await?;
            drop_entity_table(manager, order_item::Entity).await?;
            drop_entity_table(manager, order::Entity).await
        }
    }
}

mod m20240716_000004_create_billing_tables {
    use super::*;
    use crate::entities::{bill, bill_line, customer, loyalty_transaction, payment};

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240716_000004_create_billing_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            create_entity_table(manager, customer::Entity).await?;
            create_entity_table(manager, loyalty_transaction::Entity).await?;
            create_entity_table(manager, bill::Entity).await?;
            create_entity_table(manager, bill_line::Entity).await?;
            create_entity_table(manager, payment::Entity).await?;

            create_index(
                manager,
                "uq_customers_restaurant_phone",
                customer::Entity,
                vec![customer::Column::RestaurantId, customer::Column::Phone],
                true,
            )
            .await?;
            create_index(
                manager,
                "idx_loyalty_transactions_customer",
                loyalty_transaction::Entity,
                vec![loyalty_transaction::Column::CustomerId],
                false,
            )
            .await?;
            create_index(
                manager,
                "uq_bills_restaurant_invoice_number",
                bill::Entity,
                vec![bill::Column::RestaurantId, bill::Column::InvoiceNumber],
                true,
            )
            .await?;
            create_index(
                manager,
                "idx_bills_restaurant_date",
                bill::Entity,
                vec![bill::Column::RestaurantId, bill::Column::BillDate],
                false,
            )
            .await?;
            create_index(
                manager,
                "idx_bill_lines_bill_id",
                bill_line::Entity,
                vec![bill_line::Column::BillId],
                false,
            )
            .await?;
            create_index(
                manager,
                "idx_payments_bill_id",
                payment::Entity,
                vec![payment::Column::BillId],
                false,
            )
            .await?;
            create_index(
                manager,
                "idx_payments_gateway_ref",
                payment::Entity,
                vec![payment::Column::GatewayRef],
                false,
            )
            .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            drop_entity_table(manager, payment::Entity).await?;
            drop_entity_table(manager, bill_line::Entity).await?;
            drop_entity_table(manager, bill::Entity).await?;
            drop_entity_table(manager, loyalty_transaction::Entity).await?;
            drop_entity_table(manager, customer::Entity).await
        }
    }
}

mod m20240716_000005_create_accounting_tables {
    use super::*;
    use crate::entities::{account, document_sequence, ledger_entry, voucher, voucher_line};

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240716_000005_create_accounting_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            create_entity_table(manager, account::Entity).await?;
            create_entity_table(manager, voucher::Entity).await?;
            create_entity_table(manager, voucher_line::Entity).await?;
            create_entity_table(manager, ledger_entry::Entity).await?;
            create_entity_table(manager, document_sequence::Entity).await?;

            create_index(
                manager,
                "uq_accounts_restaurant_code",
                account::Entity,
                vec![account::Column::RestaurantId, account::Column::Code],
                true,
            )
            .await?;
            create_index(
                manager,
                "uq_vouchers_restaurant_number",
                voucher::Entity,
                vec![voucher::Column::RestaurantId, voucher::Column::VoucherNumber],
                true,
            )
            .await?;
            create_index(
                manager,
                "idx_voucher_lines_voucher_id",
                voucher_line::Entity,
                vec![voucher_line::Column::VoucherId],
                false,
            )
            .await?;
            create_index(
                manager,
                "idx_ledger_entries_account_date",
                ledger_entry::Entity,
                vec![
                    ledger_entry::Column::AccountId,
                    ledger_entry::Column::PostingDate,
                ],
                false,
            )
            .await?;
            create_index(
                manager,
                "uq_document_sequences_scope",
                document_sequence::Entity,
                vec![
                    document_sequence::Column::RestaurantId,
                    document_sequence::Column::Kind,
                    document_sequence::Column::FiscalYear,
                ],
                true,
            )
            .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            drop_entity_table(manager, document_sequence::Entity).await?;
            drop_entity_table(manager, ledger_entry::Entity).await?;
            drop_entity_table(manager, voucher_line::Entity).await?;
            drop_entity_table(manager, voucher::Entity).await?;
            drop_entity_table(manager, account::Entity).await
        }
    }
}

mod m20240716_000006_create_inventory_tables {
    use super::*;
    use crate::entities::{purchase, purchase_line, stock_item, stock_movement, vendor};

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240716_000006_create_inventory_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            create_entity_table(manager, stock_item::Entity).await?;
            create_entity_table(manager, stock_movement::Entity).await?;
            create_entity_table(manager, vendor::Entity).await?;
            create_entity_table(manager, purchase::Entity).await?;
            create_entity_table(manager, purchase_line::Entity).await?;

            create_index(
                manager,
                "uq_stock_items_restaurant_name",
                stock_item::Entity,
                vec![stock_item::Column::RestaurantId, stock_item::Column::Name],
                true,
            )
            .await?;
            create_index(
                manager,
                "idx_stock_movements_item",
                stock_movement::Entity,
                vec![stock_movement::Column::StockItemId],
                false,
            )
            .await?;
            create_index(
                manager,
                "idx_stock_movements_reference",
                stock_movement::Entity,
                vec![stock_movement::Column::ReferenceId],
                false,
            )
            .await?;
            create_index(
                manager,
                "uq_purchases_vendor_bill",
                purchase::Entity,
                vec![
                    purchase::Column::RestaurantId,
                    purchase::Column::VendorId,
                    purchase::Column::BillNumber,
                ],
                true,
            )
            .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            drop_entity_table(manager, purchase_line::Entity).await?;
            drop_entity_table(manager, purchase::Entity).await?;
            drop_entity_table(manager, vendor::Entity).await?;
            drop_entity_table(manager, stock_movement::Entity).await?;
            drop_entity_table(manager, stock_item::Entity).await
        }
    }
}
