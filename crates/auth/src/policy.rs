//! Tenant-scoped role → permission policy.
//!
//! A policy has a `default` role map and optional per-tenant overrides. When a
//! tenant defines a role, its entry replaces the default for that role only.
//!
//! ```json
//! {
//!   "default": { "admin": ["*"], "viewer": ["ledger.read"] },
//!   "tenants": {
//!     "0190a0c4-...": { "cashier": ["sales.create", "debts.pay"] }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use shopledger_core::TenantId;

use crate::{Permission, Role, TenantMembership};

pub type RoleMap = BTreeMap<Role, Vec<Permission>>;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid role policy: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePolicy {
    #[serde(default)]
    pub default: RoleMap,
    #[serde(default)]
    pub tenants: BTreeMap<TenantId, RoleMap>,
}

impl RolePolicy {
    /// Built-in policy used when no policy file is configured.
    pub fn builtin() -> Self {
        let mut default = RoleMap::new();
        default.insert(Role::ADMIN, vec![Permission::WILDCARD]);
        default.insert(
            Role::new("cashier"),
            vec![
                Permission::SALES_CREATE,
                Permission::DEBTS_PAY,
                Permission::PARTIES_WRITE,
                Permission::LEDGER_READ,
            ],
        );
        default.insert(
            Role::new("stock_clerk"),
            vec![
                Permission::STOCK_ADJUST,
                Permission::PURCHASES_CREATE,
                Permission::CATALOG_WRITE,
                Permission::LEDGER_READ,
            ],
        );
        default.insert(Role::new("viewer"), vec![Permission::LEDGER_READ]);

        Self {
            default,
            tenants: BTreeMap::new(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, PolicyError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Effective permissions for `roles` within `tenant`, deduplicated.
    ///
    /// Unknown roles grant nothing.
    pub fn permissions_for(&self, tenant: TenantId, roles: &[Role]) -> Vec<Permission> {
        let overrides = self.tenants.get(&tenant);
        let mut out = BTreeSet::new();

        for role in roles {
            let granted = overrides
                .and_then(|m| m.get(role))
                .or_else(|| self.default.get(role));
            match granted {
                Some(perms) => out.extend(perms.iter().cloned()),
                None => tracing::debug!(%tenant, role = %role, "role not present in policy"),
            }
        }

        out.into_iter().collect()
    }

    pub fn membership(&self, tenant: TenantId, roles: &[Role]) -> TenantMembership {
        TenantMembership {
            tenant_id: tenant,
            roles: roles.to_vec(),
            permissions: self.permissions_for(tenant, roles),
        }
    }
}

impl Default for RolePolicy {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_admin_holds_the_wildcard() {
        let policy = RolePolicy::builtin();
        let perms = policy.permissions_for(TenantId::new(), &[Role::ADMIN]);
        assert_eq!(perms, vec![Permission::WILDCARD]);
    }

    #[test]
    fn roles_are_unioned_and_deduplicated() {
        let policy = RolePolicy::builtin();
        let perms = policy.permissions_for(
            TenantId::new(),
            &[Role::new("cashier"), Role::new("viewer")],
        );

        assert!(perms.contains(&Permission::SALES_CREATE));
        assert_eq!(
            perms.iter().filter(|p| **p == Permission::LEDGER_READ).count(),
            1
        );
        assert!(!perms.contains(&Permission::SALES_VOID));
    }

    #[test]
    fn unknown_role_grants_nothing() {
        let policy = RolePolicy::builtin();
        assert!(policy
            .permissions_for(TenantId::new(), &[Role::new("intern")])
            .is_empty());
    }

    #[test]
    fn tenant_override_replaces_default_for_that_tenant_only() {
        let special = TenantId::new();
        let raw = format!(
            r#"{{
                "default": {{ "cashier": ["sales.create"] }},
                "tenants": {{ "{special}": {{ "cashier": ["sales.create", "sales.void"] }} }}
            }}"#
        );
        let policy = RolePolicy::from_json(&raw).unwrap();
        let cashier = [Role::new("cashier")];

        assert!(policy
            .permissions_for(special, &cashier)
            .contains(&Permission::SALES_VOID));
        assert!(!policy
            .permissions_for(TenantId::new(), &cashier)
            .contains(&Permission::SALES_VOID));
    }

    #[test]
    fn malformed_policy_is_an_error() {
        assert!(RolePolicy::from_json("{\"default\": [1, 2]}").is_err());
    }

    #[test]
    fn membership_carries_tenant_and_resolved_permissions() {
        let tenant = TenantId::new();
        let m = RolePolicy::builtin().membership(tenant, &[Role::new("viewer")]);

        assert_eq!(m.tenant_id, tenant);
        assert!(m.grants(&Permission::LEDGER_READ));
        assert!(!m.grants(&Permission::STOCK_ADJUST));
    }
}
