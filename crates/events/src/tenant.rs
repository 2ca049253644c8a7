use shopledger_core::TenantId;

use crate::LedgerNotification;

/// Messages that belong to exactly one tenant.
///
/// Subscribers (e.g. a per-store notification dispatcher) filter on this so a
/// shared bus never leaks one tenant's activity to another.
pub trait TenantScoped {
    fn tenant_id(&self) -> TenantId;

    fn belongs_to(&self, tenant_id: TenantId) -> bool {
        self.tenant_id() == tenant_id
    }
}

impl TenantScoped for LedgerNotification {
    fn tenant_id(&self) -> TenantId {
        LedgerNotification::tenant_id(self)
    }
}
