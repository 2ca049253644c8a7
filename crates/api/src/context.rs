use shopledger_auth::{PrincipalId, Role};
use shopledger_core::{TenantId, UserId};
use shopledger_infra::LedgerContext;

/// Tenant context for a request, taken from the validated token only.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Principal context for a request (authenticated identity + roles).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal_id: PrincipalId,
    roles: Vec<Role>,
}

impl PrincipalContext {
    pub fn new(principal_id: PrincipalId, roles: Vec<Role>) -> Self {
        Self { principal_id, roles }
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.principal_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    /// Ledger context for one operation, stamped now.
    pub fn ledger_context(&self, tenant: &TenantContext) -> LedgerContext {
        LedgerContext::new(tenant.tenant_id(), UserId::from_uuid(*self.principal_id.as_uuid()))
    }
}
