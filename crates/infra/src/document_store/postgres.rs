//! Postgres-backed document store.
//!
//! Documents live in one JSONB table keyed by `(tenant_id, collection, doc_id)`.
//! A commit runs in a single transaction:
//!
//! 1. every recorded read is re-checked with `SELECT ... FOR SHARE`
//! 2. writes to documents that were read are compare-and-swap on `version`
//! 3. everything else is applied under row locks
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Concurrent create of the same key |
//! | Database (serialization failure) | `40001` | `Conflict` | Isolation-level abort |
//! | Database (deadlock detected) | `40P01` | `Conflict` | Two units locked rows in opposite order |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | PoolClosed / network / other | N/A | `Backend` | Connection failures, etc. |
//!
//! Dropping an uncommitted transaction (e.g. a request timeout cancelling the
//! future) rolls it back.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use shopledger_core::TenantId;

use super::r#trait::{
    DocKey, DocumentStore, ReadVersion, StoreError, VersionedDocument, WriteOp, apply_increment,
    check_tenant,
};

const SCHEMA: &[&str] = &[
    "CREATE SEQUENCE IF NOT EXISTS ledger_document_version_seq",
    r#"
    CREATE TABLE IF NOT EXISTS ledger_documents (
        tenant_id   UUID        NOT NULL,
        collection  TEXT        NOT NULL,
        doc_id      TEXT        NOT NULL,
        version     BIGINT      NOT NULL,
        body        JSONB       NOT NULL,
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (tenant_id, collection, doc_id)
    )
    "#,
];

/// Postgres-backed document store.
#[derive(Debug, Clone)]
pub struct PostgresDocumentStore {
    pool: Arc<PgPool>,
}

impl PostgresDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Create the documents table and version sequence if missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for stmt in SCHEMA {
            sqlx::query(stmt)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    #[instrument(skip(self), fields(tenant_id = %key.tenant_id, collection = %key.collection), err)]
    async fn get(&self, key: &DocKey) -> Result<Option<VersionedDocument>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT version, body
            FROM ledger_documents
            WHERE tenant_id = $1 AND collection = $2 AND doc_id = $3
            "#,
        )
        .bind(key.tenant_id.as_uuid())
        .bind(&key.collection)
        .bind(&key.id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.map(|row| {
            Ok(VersionedDocument {
                key: key.clone(),
                version: read_version(&row)?,
                body: row
                    .try_get::<JsonValue, _>("body")
                    .map_err(|e| StoreError::Serialization(e.to_string()))?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn list(&self, tenant_id: TenantId, collection: &str) -> Result<Vec<VersionedDocument>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT doc_id, version, body
            FROM ledger_documents
            WHERE tenant_id = $1 AND collection = $2
            ORDER BY doc_id ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(collection)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e))?;

        rows.iter()
            .map(|row| {
                let id: String = row
                    .try_get("doc_id")
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(VersionedDocument {
                    key: DocKey::new(tenant_id, collection, id),
                    version: read_version(row)?,
                    body: row
                        .try_get::<JsonValue, _>("body")
                        .map_err(|e| StoreError::Serialization(e.to_string()))?,
                })
            })
            .collect()
    }

    #[instrument(
        skip(self, reads, writes),
        fields(tenant_id = %tenant_id, reads = reads.len(), writes = writes.len()),
        err
    )]
    async fn commit(
        &self,
        tenant_id: TenantId,
        reads: &[ReadVersion],
        writes: Vec<WriteOp>,
    ) -> Result<(), StoreError> {
        check_tenant(tenant_id, reads, &writes)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Expected version per key; writes to these keys are compare-and-swap.
        let mut expected: HashMap<&DocKey, u64> = HashMap::new();
        for read in reads {
            let current = locked_version(&mut tx, &read.key).await?;
            if current != read.version {
                return Err(StoreError::Conflict(format!(
                    "{} read at version {}, now {}",
                    read.key, read.version, current
                )));
            }
            expected.insert(&read.key, read.version);
        }

        for op in &writes {
            let guard = expected.remove(op.key());
            apply_write(&mut tx, op, guard).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }
}

async fn apply_write(
    tx: &mut Transaction<'_, Postgres>,
    op: &WriteOp,
    expected_version: Option<u64>,
) -> Result<(), StoreError> {
    match op {
        WriteOp::Create { key, body } => insert_new(tx, key, body).await,
        WriteOp::Set { key, body } => match expected_version {
            Some(0) => insert_new(tx, key, body).await,
            Some(v) => replace_if_version(tx, key, body, v).await,
            None => upsert(tx, key, body).await,
        },
        WriteOp::Increment { key, path, delta } => {
            let row = sqlx::query(
                r#"
                SELECT version, body
                FROM ledger_documents
                WHERE tenant_id = $1 AND collection = $2 AND doc_id = $3
                FOR UPDATE
                "#,
            )
            .bind(key.tenant_id.as_uuid())
            .bind(&key.collection)
            .bind(&key.id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("lock_for_increment", e))?
            .ok_or_else(|| StoreError::MissingDocument(key.to_string()))?;

            let mut body: JsonValue = row
                .try_get("body")
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            // The row lock is held until commit, so no concurrent writer can
            // interleave between this read and the update below.
            apply_increment(&mut body, path, *delta)?;
            upsert(tx, key, &body).await
        }
        WriteOp::Delete { key } => {
            let result = sqlx::query(
                r#"
                DELETE FROM ledger_documents
                WHERE tenant_id = $1 AND collection = $2 AND doc_id = $3
                  AND ($4::BIGINT IS NULL OR version = $4)
                "#,
            )
            .bind(key.tenant_id.as_uuid())
            .bind(&key.collection)
            .bind(&key.id)
            .bind(expected_version.map(|v| v as i64))
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;

            if matches!(expected_version, Some(v) if v > 0) && result.rows_affected() == 0 {
                return Err(StoreError::Conflict(format!("{key} changed before delete")));
            }
            Ok(())
        }
    }
}

async fn insert_new(
    tx: &mut Transaction<'_, Postgres>,
    key: &DocKey,
    body: &JsonValue,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO ledger_documents (tenant_id, collection, doc_id, version, body)
        VALUES ($1, $2, $3, nextval('ledger_document_version_seq'), $4)
        ON CONFLICT (tenant_id, collection, doc_id) DO NOTHING
        "#,
    )
    .bind(key.tenant_id.as_uuid())
    .bind(&key.collection)
    .bind(&key.id)
    .bind(body)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert", e))?;

    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict(format!("{key} already exists")));
    }
    Ok(())
}

async fn replace_if_version(
    tx: &mut Transaction<'_, Postgres>,
    key: &DocKey,
    body: &JsonValue,
    version: u64,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE ledger_documents
        SET body = $4, version = nextval('ledger_document_version_seq'), updated_at = now()
        WHERE tenant_id = $1 AND collection = $2 AND doc_id = $3 AND version = $5
        "#,
    )
    .bind(key.tenant_id.as_uuid())
    .bind(&key.collection)
    .bind(&key.id)
    .bind(body)
    .bind(version as i64)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("replace", e))?;

    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict(format!("{key} changed since version {version}")));
    }
    Ok(())
}

async fn upsert(tx: &mut Transaction<'_, Postgres>, key: &DocKey, body: &JsonValue) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO ledger_documents (tenant_id, collection, doc_id, version, body)
        VALUES ($1, $2, $3, nextval('ledger_document_version_seq'), $4)
        ON CONFLICT (tenant_id, collection, doc_id)
        DO UPDATE SET body = EXCLUDED.body, version = EXCLUDED.version, updated_at = now()
        "#,
    )
    .bind(key.tenant_id.as_uuid())
    .bind(&key.collection)
    .bind(&key.id)
    .bind(body)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("upsert", e))?;
    Ok(())
}

/// Current version of `key` (0 if absent), share-locked until commit.
async fn locked_version(tx: &mut Transaction<'_, Postgres>, key: &DocKey) -> Result<u64, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT version
        FROM ledger_documents
        WHERE tenant_id = $1 AND collection = $2 AND doc_id = $3
        FOR SHARE
        "#,
    )
    .bind(key.tenant_id.as_uuid())
    .bind(&key.collection)
    .bind(&key.id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_read_version", e))?;

    match row {
        Some(row) => read_version(&row),
        None => Ok(0),
    }
}

fn read_version(row: &sqlx::postgres::PgRow) -> Result<u64, StoreError> {
    let v: i64 = row
        .try_get("version")
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    u64::try_from(v).map_err(|_| StoreError::Serialization(format!("negative version {v}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Backend(format!("connection pool closed in {operation}")),
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}
