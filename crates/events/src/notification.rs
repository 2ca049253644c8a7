use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use shopledger_core::TenantId;

/// Notice that a ledger unit committed.
///
/// Built only from committed results; consumers (chat/SMS dispatchers, report
/// refreshers) may receive it more than once and must tolerate duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerNotification {
    notification_id: Uuid,
    tenant_id: TenantId,

    /// Dotted kind, e.g. `sale.recorded`, `debt.payment_recorded`.
    kind: String,
    entity_id: String,
    occurred_at: DateTime<Utc>,

    #[serde(default)]
    payload: JsonValue,
}

impl LedgerNotification {
    pub fn new(
        tenant_id: TenantId,
        kind: impl Into<String>,
        entity_id: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            notification_id: Uuid::now_v7(),
            tenant_id,
            kind: kind.into(),
            entity_id: entity_id.into(),
            occurred_at,
            payload: JsonValue::Null,
        }
    }

    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload = payload;
        self
    }

    pub fn notification_id(&self) -> Uuid {
        self.notification_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }
}
