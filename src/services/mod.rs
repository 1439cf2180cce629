// Tenancy and staff
pub mod restaurants;
pub mod staff;

// Front of house
pub mod kitchen;
pub mod menu;
pub mod orders;
pub mod tables;

// Billing and payments
pub mod billing;
pub mod khalti;
pub mod loyalty;
pub mod payments;

// Back office
pub mod accounting;
pub mod inventory;
pub mod reports;
pub mod sequences;

// Tax compliance
pub mod cbms;
pub mod compliance;
