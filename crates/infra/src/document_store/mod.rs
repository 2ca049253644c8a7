//! Tenant-scoped document store boundary.
//!
//! Ledger documents are versioned JSON bodies addressed by
//! `(tenant, collection, id)`. The store exposes single reads, per-tenant
//! collection listings, and one atomic multi-document `commit`.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

use serde::Serialize;
use serde::de::DeserializeOwned;

use shopledger_core::TenantId;

pub use in_memory::InMemoryDocumentStore;
pub use postgres::PostgresDocumentStore;
pub use r#trait::{
    DocKey, DocumentStore, ReadVersion, StoreError, VersionedDocument, WriteOp, apply_increment,
};

/// A typed ledger document stored in a named collection.
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: &'static str;

    fn doc_id(&self) -> String;

    fn key(&self, tenant_id: TenantId) -> DocKey {
        DocKey::new(tenant_id, Self::COLLECTION, self.doc_id())
    }
}

/// Key for a document of type `D` with the given id.
pub fn key_of<D: Document>(tenant_id: TenantId, id: impl ToString) -> DocKey {
    DocKey::new(tenant_id, D::COLLECTION, id.to_string())
}

pub fn encode<D: Document>(doc: &D) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(doc).map_err(|e| StoreError::Serialization(format!("{}: {e}", D::COLLECTION)))
}

pub fn decode<D: Document>(body: &serde_json::Value) -> Result<D, StoreError> {
    serde_json::from_value(body.clone()).map_err(|e| StoreError::Serialization(format!("{}: {e}", D::COLLECTION)))
}

/// List and decode every document of type `D` for a tenant.
pub async fn list_typed<D: Document, S: DocumentStore + ?Sized>(
    store: &S,
    tenant_id: TenantId,
) -> Result<Vec<D>, StoreError> {
    store
        .list(tenant_id, D::COLLECTION)
        .await?
        .iter()
        .map(|d| decode(&d.body))
        .collect()
}

/// Fetch and decode one document of type `D` outside any unit of work.
pub async fn get_typed<D: Document, S: DocumentStore + ?Sized>(
    store: &S,
    tenant_id: TenantId,
    id: impl ToString,
) -> Result<Option<D>, StoreError> {
    match store.get(&key_of::<D>(tenant_id, id)).await? {
        Some(doc) => decode(&doc.body).map(Some),
        None => Ok(None),
    }
}
