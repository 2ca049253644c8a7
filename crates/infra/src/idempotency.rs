//! Idempotency keys for replay-prone operations (payments).
//!
//! The key document is read in the read phase (so a concurrent twin conflicts)
//! and created in the write phase of the same unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shopledger_core::{DomainError, DomainResult};

use crate::context::LedgerContext;
use crate::document_store::Document;
use crate::executor::{LedgerResult, ReadPhase, WriteSet};

const MAX_KEY_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub operation: String,
    pub key: String,
    pub entity_id: String,
    pub created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    fn doc_id_for(operation: &str, key: &str) -> String {
        format!("{operation}:{key}")
    }
}

impl Document for IdempotencyRecord {
    const COLLECTION: &'static str = "idempotency_keys";

    fn doc_id(&self) -> String {
        Self::doc_id_for(&self.operation, &self.key)
    }
}

/// Input-level validation, run before any read.
pub fn validate_key(key: Option<&str>) -> DomainResult<()> {
    match key {
        Some(k) if k.trim().is_empty() => Err(DomainError::validation("idempotency key must not be blank")),
        Some(k) if k.len() > MAX_KEY_LEN => Err(DomainError::validation(format!(
            "idempotency key longer than {MAX_KEY_LEN} characters"
        ))),
        _ => Ok(()),
    }
}

/// Read phase: fail with `Duplicate` if `key` was already used for `operation`.
pub async fn ensure_unused(reads: &mut ReadPhase<'_>, operation: &str, key: Option<&str>) -> LedgerResult<()> {
    let Some(key) = key else {
        return Ok(());
    };

    if let Some(existing) = reads
        .get::<IdempotencyRecord>(IdempotencyRecord::doc_id_for(operation, key))
        .await?
    {
        return Err(DomainError::duplicate(format!(
            "{operation} with key '{key}' already applied to {}",
            existing.entity_id
        ))
        .into());
    }
    Ok(())
}

/// Write phase: remember `key` for `operation`.
pub fn remember(
    writes: &mut WriteSet,
    ctx: &LedgerContext,
    operation: &str,
    key: Option<&str>,
    entity_id: impl ToString,
) -> LedgerResult<()> {
    let Some(key) = key else {
        return Ok(());
    };

    writes.create(&IdempotencyRecord {
        operation: operation.to_string(),
        key: key.to_string(),
        entity_id: entity_id.to_string(),
        created_at: ctx.occurred_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_and_oversized_keys_are_rejected() {
        assert!(validate_key(None).is_ok());
        assert!(validate_key(Some("pay-1")).is_ok());
        assert!(matches!(validate_key(Some("  ")), Err(DomainError::Validation(_))));
        let long = "k".repeat(MAX_KEY_LEN + 1);
        assert!(matches!(validate_key(Some(&long)), Err(DomainError::Validation(_))));
    }
}
