/*!
 * # Permissions Module
 *
 * Permission strings checked by route groups. Each is `resource:action`;
 * role grants live in the RBAC module.
 */

/// Common permission string constants for compile-time safety
pub mod consts {
    // Tenancy
    pub const RESTAURANTS_CREATE: &str = "restaurants:create";
    pub const RESTAURANTS_LIST: &str = "restaurants:list";
    pub const RESTAURANTS_READ: &str = "restaurants:read";
    pub const RESTAURANTS_UPDATE: &str = "restaurants:update";

    // Staff
    pub const STAFF_READ: &str = "staff:read";
    pub const STAFF_MANAGE: &str = "staff:manage";

    // Floor
    pub const TABLES_READ: &str = "tables:read";
    pub const TABLES_MANAGE: &str = "tables:manage";
    pub const SESSIONS_MANAGE: &str = "sessions:manage";

    // Menu
    pub const MENU_READ: &str = "menu:read";
    pub const MENU_MANAGE: &str = "menu:manage";

    // Orders and stations
    pub const ORDERS_READ: &str = "orders:read";
    pub const ORDERS_CREATE: &str = "orders:create";
    pub const ORDERS_MANAGE: &str = "orders:manage";
    pub const KITCHEN_READ: &str = "kitchen:read";
    pub const KITCHEN_UPDATE: &str = "kitchen:update";
    pub const KITCHEN_SERVE: &str = "kitchen:serve";

    // Billing
    pub const BILLS_READ: &str = "bills:read";
    pub const BILLS_CREATE: &str = "bills:create";
    pub const BILLS_PRINT: &str = "bills:print";
    pub const BILLS_VOID: &str = "bills:void";
    pub const PAYMENTS_CREATE: &str = "payments:create";

    // Customers and loyalty
    pub const CUSTOMERS_READ: &str = "customers:read";
    pub const CUSTOMERS_MANAGE: &str = "customers:manage";
    pub const LOYALTY_READ: &str = "loyalty:read";
    pub const LOYALTY_ADJUST: &str = "loyalty:adjust";

    // Books
    pub const ACCOUNTS_READ: &str = "accounts:read";
    pub const ACCOUNTS_CREATE: &str = "accounts:create";
    pub const VOUCHERS_READ: &str = "vouchers:read";
    pub const VOUCHERS_CREATE: &str = "vouchers:create";
    pub const VOUCHERS_POST: &str = "vouchers:post";
    pub const VOUCHERS_CANCEL: &str = "vouchers:cancel";

    // Stock and purchasing
    pub const INVENTORY_READ: &str = "inventory:read";
    pub const INVENTORY_MANAGE: &str = "inventory:manage";
    pub const VENDORS_READ: &str = "vendors:read";
    pub const VENDORS_MANAGE: &str = "vendors:manage";
    pub const PURCHASES_READ: &str = "purchases:read";
    pub const PURCHASES_CREATE: &str = "purchases:create";

    // Compliance and reporting
    pub const COMPLIANCE_READ: &str = "compliance:read";
    pub const COMPLIANCE_SYNC: &str = "compliance:sync";
    pub const REPORTS_READ: &str = "reports:read";
    pub const DASHBOARD_READ: &str = "dashboard:read";
}

#[cfg(test)]
mod tests {
    use super::consts::*;
    use crate::auth::{get_role_permissions, has_permission};
    use crate::entities::user::StaffRole;

    #[test]
    fn owner_holds_every_tenant_permission() {
        let owner = get_role_permissions(&StaffRole::Owner);
        for perm in [
            RESTAURANTS_UPDATE,
            STAFF_MANAGE,
            TABLES_MANAGE,
            MENU_MANAGE,
            ORDERS_MANAGE,
            KITCHEN_UPDATE,
            BILLS_VOID,
            PAYMENTS_CREATE,
            LOYALTY_ADJUST,
            ACCOUNTS_CREATE,
            VOUCHERS_CANCEL,
            INVENTORY_MANAGE,
            PURCHASES_CREATE,
            COMPLIANCE_SYNC,
            REPORTS_READ,
        ] {
            assert!(has_permission(&owner, perm), "{}", perm);
        }
        assert!(!has_permission(&owner, RESTAURANTS_CREATE));
    }

    #[test]
    fn waiter_serves_but_does_not_settle() {
        let waiter = get_role_permissions(&StaffRole::Waiter);
        assert!(has_permission(&waiter, KITCHEN_SERVE));
        assert!(has_permission(&waiter, BILLS_READ));
        assert!(!has_permission(&waiter, BILLS_CREATE));
        assert!(!has_permission(&waiter, PAYMENTS_CREATE));
    }
}
