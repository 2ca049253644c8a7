use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

use shopledger_core::TenantId;

/// Fully qualified document key: `(tenant, collection, id)`.
///
/// The tenant is part of the key, so a document can never be addressed outside
/// its tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocKey {
    pub tenant_id: TenantId,
    pub collection: String,
    pub id: String,
}

impl DocKey {
    pub fn new(tenant_id: TenantId, collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            tenant_id,
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl core::fmt::Display for DocKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}/{}", self.tenant_id, self.collection, self.id)
    }
}

/// A stored document with its current version.
///
/// Versions are assigned by the store from a single monotonically increasing
/// counter, so a deleted-then-recreated document never reuses a version.
/// Version `0` is reserved for "absent".
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedDocument {
    pub key: DocKey,
    pub version: u64,
    pub body: JsonValue,
}

/// Version observed for a key during a read phase (`0` = document absent).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadVersion {
    pub key: DocKey,
    pub version: u64,
}

/// A single write inside an atomic commit.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert a new document; the commit fails with a conflict if it exists.
    Create { key: DocKey, body: JsonValue },
    /// Insert or replace the whole document.
    Set { key: DocKey, body: JsonValue },
    /// Atomically add `delta` to the integer at `path` (missing leaf = 0).
    ///
    /// Intermediate objects are created as needed. The document itself must
    /// exist.
    Increment {
        key: DocKey,
        path: Vec<String>,
        delta: i64,
    },
    /// Remove the document (no-op if absent).
    Delete { key: DocKey },
}

impl WriteOp {
    pub fn key(&self) -> &DocKey {
        match self {
            WriteOp::Create { key, .. }
            | WriteOp::Set { key, .. }
            | WriteOp::Increment { key, .. }
            | WriteOp::Delete { key } => key,
        }
    }
}

/// Document store error.
///
/// These are infrastructure errors; business failures are `DomainError`s raised
/// before anything reaches the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A read version went stale or a create collided. Safe to retry.
    #[error("write conflict: {0}")]
    Conflict(String),

    /// An increment targeted a document that does not exist.
    #[error("document missing: {0}")]
    MissingDocument(String),

    /// A key outside the committing tenant was touched.
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// The write cannot be applied to the stored document (e.g. non-numeric increment target).
    #[error("invalid write: {0}")]
    InvalidWrite(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("store backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Tenant-partitioned, versioned JSON document store with atomic multi-document commits.
///
/// ## Commit semantics
///
/// `commit()` must, as one atomic step:
/// - reject any key whose tenant differs from `tenant_id`
/// - verify every `ReadVersion` still matches the stored version (absent = 0)
/// - apply every `WriteOp`, or none of them
///
/// A stale read or a create collision is reported as `StoreError::Conflict`;
/// callers (the ledger executor) retry the whole unit on that error only.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, key: &DocKey) -> Result<Option<VersionedDocument>, StoreError>;

    /// List every document of a collection within one tenant.
    async fn list(&self, tenant_id: TenantId, collection: &str) -> Result<Vec<VersionedDocument>, StoreError>;

    async fn commit(
        &self,
        tenant_id: TenantId,
        reads: &[ReadVersion],
        writes: Vec<WriteOp>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> DocumentStore for Arc<S>
where
    S: DocumentStore + ?Sized,
{
    async fn get(&self, key: &DocKey) -> Result<Option<VersionedDocument>, StoreError> {
        (**self).get(key).await
    }

    async fn list(&self, tenant_id: TenantId, collection: &str) -> Result<Vec<VersionedDocument>, StoreError> {
        (**self).list(tenant_id, collection).await
    }

    async fn commit(
        &self,
        tenant_id: TenantId,
        reads: &[ReadVersion],
        writes: Vec<WriteOp>,
    ) -> Result<(), StoreError> {
        (**self).commit(tenant_id, reads, writes).await
    }
}

/// Reject keys outside the committing tenant.
pub(crate) fn check_tenant(
    tenant_id: TenantId,
    reads: &[ReadVersion],
    writes: &[WriteOp],
) -> Result<(), StoreError> {
    let foreign = reads
        .iter()
        .map(|r| &r.key)
        .chain(writes.iter().map(WriteOp::key))
        .find(|k| k.tenant_id != tenant_id);

    match foreign {
        Some(key) => Err(StoreError::TenantIsolation(format!(
            "commit for tenant {tenant_id} touches {key}"
        ))),
        None => Ok(()),
    }
}

/// Apply an increment to a JSON body in place.
///
/// Shared by every backend so increment semantics cannot drift between them.
pub fn apply_increment(body: &mut JsonValue, path: &[String], delta: i64) -> Result<(), StoreError> {
    let Some((leaf, parents)) = path.split_last() else {
        return Err(StoreError::InvalidWrite("empty increment path".to_string()));
    };

    let mut cursor = body;
    for segment in parents {
        let obj = cursor
            .as_object_mut()
            .ok_or_else(|| StoreError::InvalidWrite(format!("'{segment}' parent is not an object")))?;
        cursor = obj
            .entry(segment.clone())
            .or_insert_with(|| JsonValue::Object(Default::default()));
        if cursor.is_null() {
            *cursor = JsonValue::Object(Default::default());
        }
    }

    let obj = cursor
        .as_object_mut()
        .ok_or_else(|| StoreError::InvalidWrite(format!("'{leaf}' parent is not an object")))?;

    let current = match obj.get(leaf) {
        None | Some(JsonValue::Null) => 0,
        Some(v) => v
            .as_i64()
            .ok_or_else(|| StoreError::InvalidWrite(format!("'{leaf}' is not an integer")))?,
    };

    let next = current
        .checked_add(delta)
        .ok_or_else(|| StoreError::InvalidWrite(format!("'{leaf}' increment overflow")))?;
    obj.insert(leaf.clone(), JsonValue::from(next));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(p: &str) -> Vec<String> {
        p.split('.').map(str::to_string).collect()
    }

    #[test]
    fn increment_treats_missing_key_as_zero() {
        let mut body = json!({ "total_owed": {} });
        apply_increment(&mut body, &path("total_owed.USD"), 250).unwrap();
        assert_eq!(body["total_owed"]["USD"], 250);
    }

    #[test]
    fn increment_creates_intermediate_maps() {
        let mut body = json!({ "name": "x" });
        apply_increment(&mut body, &path("total_spent.SOS"), -5).unwrap();
        assert_eq!(body["total_spent"]["SOS"], -5);
    }

    #[test]
    fn increment_leaves_other_currencies_untouched() {
        let mut body = json!({ "total_owed": { "USD": 100, "EUR": 7 } });
        apply_increment(&mut body, &path("total_owed.USD"), -40).unwrap();
        assert_eq!(body, json!({ "total_owed": { "USD": 60, "EUR": 7 } }));
    }

    #[test]
    fn increment_rejects_non_numeric_leaf() {
        let mut body = json!({ "name": "widget" });
        let err = apply_increment(&mut body, &path("name"), 1).unwrap_err();
        assert!(matches!(err, StoreError::InvalidWrite(_)));
    }

    #[test]
    fn foreign_tenant_keys_are_rejected() {
        let mine = TenantId::new();
        let other = TenantId::new();
        let writes = vec![WriteOp::Delete {
            key: DocKey::new(other, "sales", "x"),
        }];
        let err = check_tenant(mine, &[], &writes).unwrap_err();
        assert!(matches!(err, StoreError::TenantIsolation(_)));
    }
}
