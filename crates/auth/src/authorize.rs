use thiserror::Error;

use shopledger_core::TenantId;

use crate::{Permission, PrincipalId, TenantMembership};

/// A fully resolved principal for authorization decisions.
///
/// Built by the API from validated claims plus the `RolePolicy`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub active_tenant_id: TenantId,
    pub membership: TenantMembership,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Authorize a principal within its active tenant. Pure: no IO, no panics.
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.active_tenant_id != principal.membership.tenant_id {
        return Err(AuthzError::TenantMismatch);
    }

    if principal.membership.grants(required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Role;

    fn principal(tenant: TenantId, perms: Vec<Permission>) -> Principal {
        Principal {
            principal_id: PrincipalId::new(),
            active_tenant_id: tenant,
            membership: TenantMembership {
                tenant_id: tenant,
                roles: vec![Role::new("cashier")],
                permissions: perms,
            },
        }
    }

    #[test]
    fn explicit_permission_is_granted() {
        let p = principal(TenantId::new(), vec![Permission::SALES_CREATE]);
        assert_eq!(authorize(&p, &Permission::SALES_CREATE), Ok(()));
    }

    #[test]
    fn wildcard_grants_everything() {
        let p = principal(TenantId::new(), vec![Permission::WILDCARD]);
        assert!(authorize(&p, &Permission::PURCHASES_DELETE).is_ok());
    }

    #[test]
    fn missing_permission_is_forbidden() {
        let p = principal(TenantId::new(), vec![Permission::LEDGER_READ]);
        assert_eq!(
            authorize(&p, &Permission::SALES_VOID),
            Err(AuthzError::Forbidden("sales.void".to_string()))
        );
    }

    #[test]
    fn membership_for_another_tenant_is_rejected() {
        let mut p = principal(TenantId::new(), vec![Permission::WILDCARD]);
        p.active_tenant_id = TenantId::new();
        assert_eq!(
            authorize(&p, &Permission::LEDGER_READ),
            Err(AuthzError::TenantMismatch)
        );
    }
}
