//! Database entities.

// Tenancy and staff
pub mod restaurant;
pub mod user;

// Floor
pub mod dining_table;
pub mod table_session;

// Menu and orders
pub mod kitchen_ticket;
pub mod menu_category;
pub mod menu_item;
pub mod order;
pub mod order_item;
pub mod recipe_line;

// Billing and loyalty
pub mod bill;
pub mod bill_line;
pub mod customer;
pub mod loyalty_transaction;
pub mod payment;

// Accounting
pub mod account;
pub mod document_sequence;
pub mod ledger_entry;
pub mod voucher;
pub mod voucher_line;

// Inventory
pub mod purchase;
pub mod purchase_line;
pub mod stock_item;
pub mod stock_movement;
pub mod vendor;
