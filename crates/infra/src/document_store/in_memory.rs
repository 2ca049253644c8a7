use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use shopledger_core::TenantId;

use super::r#trait::{
    DocKey, DocumentStore, ReadVersion, StoreError, VersionedDocument, WriteOp, apply_increment,
    check_tenant,
};

#[derive(Debug, Clone)]
struct StoredDoc {
    version: u64,
    body: JsonValue,
}

#[derive(Debug, Default)]
struct Inner {
    docs: HashMap<DocKey, StoredDoc>,
    last_version: u64,
}

/// In-memory document store.
///
/// Intended for tests/dev. A single lock around validation and apply gives the
/// same all-or-nothing commit the Postgres backend gets from a transaction.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    inner: RwLock<Inner>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, key: &DocKey) -> Result<Option<VersionedDocument>, StoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.docs.get(key).map(|d| VersionedDocument {
            key: key.clone(),
            version: d.version,
            body: d.body.clone(),
        }))
    }

    async fn list(&self, tenant_id: TenantId, collection: &str) -> Result<Vec<VersionedDocument>, StoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;

        // BTreeMap for a stable order (by id) regardless of hash seed.
        let rows: BTreeMap<&str, VersionedDocument> = inner
            .docs
            .iter()
            .filter(|(k, _)| k.tenant_id == tenant_id && k.collection == collection)
            .map(|(k, d)| {
                (
                    k.id.as_str(),
                    VersionedDocument {
                        key: k.clone(),
                        version: d.version,
                        body: d.body.clone(),
                    },
                )
            })
            .collect();

        Ok(rows.into_values().collect())
    }

    async fn commit(
        &self,
        tenant_id: TenantId,
        reads: &[ReadVersion],
        writes: Vec<WriteOp>,
    ) -> Result<(), StoreError> {
        check_tenant(tenant_id, reads, &writes)?;

        let mut inner = self.inner.write().map_err(|_| poisoned())?;

        for read in reads {
            let current = inner.docs.get(&read.key).map(|d| d.version).unwrap_or(0);
            if current != read.version {
                return Err(StoreError::Conflict(format!(
                    "{} read at version {}, now {}",
                    read.key, read.version, current
                )));
            }
        }

        // Stage every change against a private overlay first; nothing touches
        // `inner.docs` until all writes are known to apply.
        let mut staged: HashMap<DocKey, Option<JsonValue>> = HashMap::new();
        for op in writes {
            let current = |staged: &HashMap<DocKey, Option<JsonValue>>, key: &DocKey| -> Option<JsonValue> {
                match staged.get(key) {
                    Some(v) => v.clone(),
                    None => inner.docs.get(key).map(|d| d.body.clone()),
                }
            };

            match op {
                WriteOp::Create { key, body } => {
                    if current(&staged, &key).is_some() {
                        return Err(StoreError::Conflict(format!("{key} already exists")));
                    }
                    staged.insert(key, Some(body));
                }
                WriteOp::Set { key, body } => {
                    staged.insert(key, Some(body));
                }
                WriteOp::Increment { key, path, delta } => {
                    let mut body = current(&staged, &key)
                        .ok_or_else(|| StoreError::MissingDocument(key.to_string()))?;
                    apply_increment(&mut body, &path, delta)?;
                    staged.insert(key, Some(body));
                }
                WriteOp::Delete { key } => {
                    staged.insert(key, None);
                }
            }
        }

        let version = inner.last_version + 1;
        inner.last_version = version;
        for (key, body) in staged {
            match body {
                Some(body) => {
                    inner.docs.insert(key, StoredDoc { version, body });
                }
                None => {
                    inner.docs.remove(&key);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(tenant: TenantId, id: &str) -> DocKey {
        DocKey::new(tenant, "stock_levels", id)
    }

    #[tokio::test]
    async fn commit_is_all_or_nothing() {
        let store = InMemoryDocumentStore::new();
        let tenant = TenantId::new();

        let writes = vec![
            WriteOp::Set {
                key: key(tenant, "a"),
                body: json!({ "quantity": 1 }),
            },
            // Fails: document "b" does not exist.
            WriteOp::Increment {
                key: key(tenant, "b"),
                path: vec!["quantity".to_string()],
                delta: 1,
            },
        ];

        let err = store.commit(tenant, &[], writes).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingDocument(_)));
        assert!(store.get(&key(tenant, "a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_read_version_is_a_conflict() {
        let store = InMemoryDocumentStore::new();
        let tenant = TenantId::new();
        let k = key(tenant, "a");

        store
            .commit(tenant, &[], vec![WriteOp::Set { key: k.clone(), body: json!({ "quantity": 1 }) }])
            .await
            .unwrap();
        let seen = store.get(&k).await.unwrap().unwrap();

        store
            .commit(
                tenant,
                &[],
                vec![WriteOp::Increment { key: k.clone(), path: vec!["quantity".into()], delta: 1 }],
            )
            .await
            .unwrap();

        let reads = vec![ReadVersion { key: k.clone(), version: seen.version }];
        let err = store
            .commit(tenant, &reads, vec![WriteOp::Set { key: k.clone(), body: json!({ "quantity": 9 }) }])
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.get(&k).await.unwrap().unwrap().body["quantity"], 2);
    }

    #[tokio::test]
    async fn absent_read_conflicts_once_created() {
        let store = InMemoryDocumentStore::new();
        let tenant = TenantId::new();
        let k = key(tenant, "a");

        store
            .commit(tenant, &[], vec![WriteOp::Create { key: k.clone(), body: json!({}) }])
            .await
            .unwrap();

        let reads = vec![ReadVersion { key: k.clone(), version: 0 }];
        let err = store.commit(tenant, &reads, vec![]).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn recreated_document_gets_fresh_version() {
        let store = InMemoryDocumentStore::new();
        let tenant = TenantId::new();
        let k = key(tenant, "a");

        store
            .commit(tenant, &[], vec![WriteOp::Create { key: k.clone(), body: json!({}) }])
            .await
            .unwrap();
        let first = store.get(&k).await.unwrap().unwrap().version;
        store.commit(tenant, &[], vec![WriteOp::Delete { key: k.clone() }]).await.unwrap();
        store
            .commit(tenant, &[], vec![WriteOp::Create { key: k.clone(), body: json!({}) }])
            .await
            .unwrap();
        let second = store.get(&k).await.unwrap().unwrap().version;

        assert!(second > first);
    }

    #[tokio::test]
    async fn list_is_tenant_scoped() {
        let store = InMemoryDocumentStore::new();
        let t1 = TenantId::new();
        let t2 = TenantId::new();

        store
            .commit(t1, &[], vec![WriteOp::Create { key: key(t1, "a"), body: json!({}) }])
            .await
            .unwrap();
        store
            .commit(t2, &[], vec![WriteOp::Create { key: key(t2, "b"), body: json!({}) }])
            .await
            .unwrap();

        let rows = store.list(t1, "stock_levels").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key.id, "a");
    }
}
