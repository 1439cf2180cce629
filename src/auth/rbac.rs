/*!
 * # Role-Based Access Control (RBAC) Module
 *
 * Maps each staff role to its `resource:action` permissions. A permission of
 * `resource:*` grants every action on that resource and `*` grants everything.
 */

use lazy_static::lazy_static;
use std::collections::HashMap;

use crate::entities::user::StaffRole;

/// Role definition with associated permissions
#[derive(Debug, Clone)]
pub struct Role {
    pub name: &'static str,
    pub description: &'static str,
    pub permissions: Vec<&'static str>,
}

const FRONT_OF_HOUSE: &[&str] = &[
    "tables:read",
    "sessions:manage",
    "menu:read",
    "orders:read",
    "orders:create",
    "customers:read",
    "customers:manage",
    "kitchen:read",
    "dashboard:read",
];

const BACK_OFFICE: &[&str] = &[
    "accounts:*",
    "vouchers:*",
    "inventory:*",
    "purchases:*",
    "vendors:*",
    "compliance:*",
    "reports:read",
];

lazy_static! {
    pub static ref ROLES: HashMap<StaffRole, Role> = {
        let mut roles = HashMap::new();

        roles.insert(
            StaffRole::PlatformAdmin,
            Role {
                name: "platform_admin",
                description: "Operates the platform and onboards restaurants",
                permissions: vec!["*"],
            },
        );

        let owner_permissions = vec![
            "restaurants:read",
            "restaurants:update",
            "staff:*",
            "tables:*",
            "sessions:*",
            "menu:*",
            "orders:*",
            "kitchen:*",
            "bills:*",
            "payments:*",
            "customers:*",
            "loyalty:*",
            "accounts:*",
            "vouchers:*",
            "inventory:*",
            "purchases:*",
            "vendors:*",
            "compliance:*",
            "reports:*",
            "dashboard:*",
        ];
        roles.insert(
            StaffRole::Owner,
            Role {
                name: "owner",
                description: "Restaurant owner with full access to the tenant",
                permissions: owner_permissions.clone(),
            },
        );

        let mut manager_permissions: Vec<&'static str> = owner_permissions
            .into_iter()
            .filter(|p| *p != "accounts:*" && *p != "vouchers:*")
            .collect();
        manager_permissions.extend([
            "accounts:read",
            "vouchers:read",
            "vouchers:create",
            "vouchers:post",
        ]);
        roles.insert(
            StaffRole::Manager,
            Role {
                name: "manager",
                description: "Runs daily operations; cannot restructure the chart or cancel vouchers",
                permissions: manager_permissions,
            },
        );

        let mut cashier = FRONT_OF_HOUSE.to_vec();
        cashier.extend(["bills:*", "payments:*", "loyalty:read"]);
        roles.insert(
            StaffRole::Cashier,
            Role {
                name: "cashier",
                description: "Generates bills and collects payments",
                permissions: cashier,
            },
        );

        let mut waiter = FRONT_OF_HOUSE.to_vec();
        waiter.extend(["orders:manage", "kitchen:serve", "bills:read"]);
        roles.insert(
            StaffRole::Waiter,
            Role {
                name: "waiter",
                description: "Seats guests, takes and serves orders",
                permissions: waiter,
            },
        );

        for (role, name) in [(StaffRole::Kitchen, "kitchen"), (StaffRole::Bar, "bar")] {
            roles.insert(
                role,
                Role {
                    name,
                    description: "Works the station ticket queue",
                    permissions: vec![
                        "kitchen:read",
                        "kitchen:update",
                        "menu:read",
                        "inventory:read",
                        "dashboard:read",
                    ],
                },
            );
        }

        let mut accountant = BACK_OFFICE.to_vec();
        accountant.extend(["bills:read", "payments:read", "dashboard:read"]);
        roles.insert(
            StaffRole::Accountant,
            Role {
                name: "accountant",
                description: "Keeps the books, purchases and tax filings",
                permissions: accountant,
            },
        );

        roles
    };
}

/// Get the permissions for a role
pub fn get_role_permissions(role: &StaffRole) -> Vec<String> {
    ROLES
        .get(role)
        .map(|r| r.permissions.iter().map(|p| p.to_string()).collect())
        .unwrap_or_default()
}

/// Whether a granted permission covers the required one, honouring wildcards.
pub fn permission_matches(granted: &str, required: &str) -> bool {
    if granted == "*" || granted == required {
        return true;
    }
    match (granted.split_once(':'), required.split_once(':')) {
        (Some((g_res, "*")), Some((r_res, _))) => g_res == r_res,
        _ => false,
    }
}

pub fn has_permission(granted: &[String], required: &str) -> bool {
    granted.iter().any(|g| permission_matches(g, required))
}

/// Seniority used when staff manage other staff.
pub fn role_rank(role: &StaffRole) -> u8 {
    match role {
        StaffRole::PlatformAdmin => 100,
        StaffRole::Owner => 90,
        StaffRole::Manager => 70,
        StaffRole::Accountant => 50,
        StaffRole::Cashier => 40,
        StaffRole::Waiter | StaffRole::Kitchen | StaffRole::Bar => 30,
    }
}

/// A user may manage roles at or below their own rank, never a platform admin.
pub fn can_manage_role(actor: &StaffRole, target: &StaffRole) -> bool {
    *target != StaffRole::PlatformAdmin && role_rank(target) <= role_rank(actor)
}
