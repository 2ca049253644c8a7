use chrono::{DateTime, Utc};

use shopledger_core::{TenantId, UserId};

/// Who is doing what, where, and when, for one ledger operation.
///
/// Built once at the API boundary from the resolved identity; every document a
/// unit writes is keyed under `tenant_id` and stamped with `actor`/`occurred_at`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LedgerContext {
    pub tenant_id: TenantId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

impl LedgerContext {
    pub fn new(tenant_id: TenantId, actor: UserId) -> Self {
        Self {
            tenant_id,
            actor,
            occurred_at: Utc::now(),
        }
    }
}
