//! Permission guard, checked before any ledger read.

use shopledger_auth::{Permission, Principal, RolePolicy, authorize};

use crate::app::errors::ApiError;
use crate::context::{PrincipalContext, TenantContext};

pub fn require(
    policy: &RolePolicy,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    permission: &Permission,
) -> Result<(), ApiError> {
    let resolved = Principal {
        principal_id: principal.principal_id(),
        active_tenant_id: tenant.tenant_id(),
        membership: policy.membership(tenant.tenant_id(), principal.roles()),
    };

    authorize(&resolved, permission).map_err(|e| {
        tracing::info!(
            tenant_id = %tenant.tenant_id(),
            principal_id = %principal.principal_id(),
            permission = %permission,
            "permission denied"
        );
        ApiError::from(e)
    })
}

#[cfg(test)]
mod tests {
    use shopledger_auth::{PrincipalId, Role};
    use shopledger_core::TenantId;

    use super::*;

    #[test]
    fn cashier_may_sell_but_not_void() {
        let policy = RolePolicy::builtin();
        let tenant = TenantContext::new(TenantId::new());
        let cashier = PrincipalContext::new(PrincipalId::new(), vec![Role::new("cashier")]);

        assert!(require(&policy, &tenant, &cashier, &Permission::SALES_CREATE).is_ok());
        assert!(matches!(
            require(&policy, &tenant, &cashier, &Permission::SALES_VOID),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn no_roles_means_no_access() {
        let policy = RolePolicy::builtin();
        let tenant = TenantContext::new(TenantId::new());
        let nobody = PrincipalContext::new(PrincipalId::new(), vec![]);

        assert!(require(&policy, &tenant, &nobody, &Permission::LEDGER_READ).is_err());
    }
}
