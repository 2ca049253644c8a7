//! Activity log rows written inside the same unit as the mutation they describe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use shopledger_core::{EntryId, TenantId, UserId};

use crate::context::LedgerContext;
use crate::document_store::Document;
use crate::executor::{LedgerResult, WriteSet};

/// Immutable audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLog {
    pub id: EntryId,
    pub tenant_id: TenantId,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub actor: UserId,
    pub details: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl Document for ActivityLog {
    const COLLECTION: &'static str = "activity_logs";

    fn doc_id(&self) -> String {
        self.id.to_string()
    }
}

impl ActivityLog {
    /// Append an audit row to `writes`; it commits or rolls back with them.
    pub fn record(
        writes: &mut WriteSet,
        ctx: &LedgerContext,
        action: &str,
        entity_type: &str,
        entity_id: impl ToString,
        details: JsonValue,
    ) -> LedgerResult<()> {
        writes.create(&ActivityLog {
            id: EntryId::new(),
            tenant_id: ctx.tenant_id,
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            actor: ctx.actor,
            details,
            created_at: ctx.occurred_at,
        })
    }
}
