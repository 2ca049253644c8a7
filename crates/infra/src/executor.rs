//! Ledger transaction executor.
//!
//! A unit of work runs in two phases:
//!
//! 1. `collect_reads` gets a [`ReadPhase`] handle (store reads, versions recorded)
//! 2. `compute_writes` gets only the collected state and a [`WriteSet`]
//!
//! `compute_writes` has no way to reach the store, so "every read happens
//! before any write" holds by construction. The executor then commits the
//! writes atomically, validated against the recorded read versions. On a
//! conflict the whole read/compute/commit cycle is retried under the
//! [`RetryPolicy`]; exhausting it yields [`LedgerError::Conflict`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use shopledger_core::{DomainError, TenantId};
use shopledger_events::LedgerNotification;

use crate::context::LedgerContext;
use crate::document_store::{
    DocKey, Document, DocumentStore, ReadVersion, StoreError, WriteOp, decode, encode, key_of,
};
use crate::notify::{NoopNotifier, Notifier};
use crate::retry::RetryPolicy;

/// Error surfaced by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(StoreError),

    /// Every attempt lost a write conflict. Safe for the caller to re-present.
    #[error("conflict: gave up after {attempts} attempts")]
    Conflict { attempts: u32 },
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            // An increment against a deleted counterparty is a lookup failure
            // from the caller's perspective.
            StoreError::MissingDocument(what) => LedgerError::Domain(DomainError::not_found(what)),
            other => LedgerError::Store(other),
        }
    }
}

impl LedgerError {
    fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Store(e) if e.is_conflict())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Read-phase handle: store reads only, every read version recorded.
pub struct ReadPhase<'a> {
    tenant_id: TenantId,
    store: &'a dyn DocumentStore,
    observed: HashMap<DocKey, u64>,
}

impl<'a> ReadPhase<'a> {
    fn new(tenant_id: TenantId, store: &'a dyn DocumentStore) -> Self {
        Self {
            tenant_id,
            store,
            observed: HashMap::new(),
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Read a document; the commit fails with a conflict if it changes (or
    /// appears, when absent) before the unit commits.
    pub async fn get<D: Document>(&mut self, id: impl ToString) -> LedgerResult<Option<D>> {
        let key = key_of::<D>(self.tenant_id, id);
        let doc = self.store.get(&key).await?;
        let version = doc.as_ref().map(|d| d.version).unwrap_or(0);

        if let Some(previous) = self.observed.insert(key.clone(), version) {
            if previous != version {
                return Err(StoreError::Conflict(format!("{key} changed during read phase")).into());
            }
        }

        doc.map(|d| decode::<D>(&d.body)).transpose().map_err(Into::into)
    }

    /// Like [`ReadPhase::get`], but a missing document is a `NotFound` error.
    pub async fn require<D: Document>(&mut self, id: impl ToString) -> LedgerResult<D> {
        let id = id.to_string();
        self.get::<D>(&id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("{} {}", D::COLLECTION, id)).into())
    }

    /// Untracked existence probe.
    ///
    /// Use only for documents whose content does not feed `compute_writes`
    /// (e.g. a counterparty that only receives increments).
    pub async fn exists<D: Document>(&self, id: impl ToString) -> LedgerResult<bool> {
        let key = key_of::<D>(self.tenant_id, id);
        Ok(self.store.get(&key).await?.is_some())
    }

    fn finish(self) -> Vec<ReadVersion> {
        self.observed
            .into_iter()
            .map(|(key, version)| ReadVersion { key, version })
            .collect()
    }
}

/// Write-phase buffer. Nothing here touches the store until commit.
#[derive(Debug)]
pub struct WriteSet {
    tenant_id: TenantId,
    ops: Vec<WriteOp>,
}

impl WriteSet {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            ops: Vec::new(),
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Insert a new document (conflict if it already exists at commit).
    pub fn create<D: Document>(&mut self, doc: &D) -> LedgerResult<()> {
        self.ops.push(WriteOp::Create {
            key: doc.key(self.tenant_id),
            body: encode(doc)?,
        });
        Ok(())
    }

    /// Replace a document wholesale.
    pub fn set<D: Document>(&mut self, doc: &D) -> LedgerResult<()> {
        self.ops.push(WriteOp::Set {
            key: doc.key(self.tenant_id),
            body: encode(doc)?,
        });
        Ok(())
    }

    /// Atomic integer increment at a field path of document `D`.
    pub fn increment<D: Document>(&mut self, id: impl ToString, path: &[&str], delta: i64) {
        self.ops.push(WriteOp::Increment {
            key: key_of::<D>(self.tenant_id, id),
            path: path.iter().map(|s| s.to_string()).collect(),
            delta,
        });
    }

    pub fn delete<D: Document>(&mut self, id: impl ToString) {
        self.ops.push(WriteOp::Delete {
            key: key_of::<D>(self.tenant_id, id),
        });
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// One atomic ledger operation.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// State handed from the read phase to the write phase.
    type Reads: Send;
    type Output: Send;

    /// Short name used in logs and spans.
    fn name(&self) -> &'static str;

    async fn collect_reads(&self, reads: &mut ReadPhase<'_>) -> LedgerResult<Self::Reads>;

    /// Pure: derive every write from the collected state.
    fn compute_writes(&self, reads: Self::Reads, writes: &mut WriteSet) -> LedgerResult<Self::Output>;

    /// Notification to dispatch once the unit has committed.
    fn notification(&self, _ctx: &LedgerContext, _output: &Self::Output) -> Option<LedgerNotification> {
        None
    }
}

/// Runs units of work against a document store with bounded conflict retry.
pub struct LedgerExecutor<S> {
    store: S,
    policy: RetryPolicy,
    notifier: Arc<dyn Notifier>,
}

impl<S> LedgerExecutor<S>
where
    S: DocumentStore,
{
    pub fn new(store: S, policy: RetryPolicy) -> Self {
        Self {
            store,
            policy,
            notifier: Arc::new(NoopNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `unit` atomically for `ctx.tenant_id`, then notify.
    ///
    /// Domain errors from either phase abort immediately with no writes; only
    /// store conflicts are retried.
    #[instrument(skip(self, ctx, unit), fields(unit = unit.name(), tenant_id = %ctx.tenant_id))]
    pub async fn execute<U: UnitOfWork>(&self, ctx: &LedgerContext, unit: &U) -> LedgerResult<U::Output> {
        let mut attempt = 0;
        let output = loop {
            attempt += 1;
            debug!(attempt, "ledger unit attempt");

            match self.attempt(ctx.tenant_id, unit).await {
                Ok(output) => break output,
                Err(err) if err.is_retryable() => {
                    if !self.policy.should_retry(attempt) {
                        warn!(attempt, error = %err, "ledger unit conflicted; retries exhausted");
                        return Err(LedgerError::Conflict { attempts: attempt });
                    }
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "ledger unit conflicted; retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        };

        if let Some(notification) = unit.notification(ctx, &output) {
            self.notifier.notify(notification);
        }

        Ok(output)
    }

    async fn attempt<U: UnitOfWork>(&self, tenant_id: TenantId, unit: &U) -> LedgerResult<U::Output> {
        let mut reads = ReadPhase::new(tenant_id, &self.store);
        let state = unit.collect_reads(&mut reads).await?;
        let read_set = reads.finish();

        let mut writes = WriteSet::new(tenant_id);
        let output = unit.compute_writes(state, &mut writes)?;

        self.store.commit(tenant_id, &read_set, writes.into_ops()).await?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use serde::{Deserialize, Serialize};
    use shopledger_core::UserId;

    use crate::document_store::{InMemoryDocumentStore, VersionedDocument, get_typed};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Counter {
        id: String,
        value: i64,
    }

    impl Document for Counter {
        const COLLECTION: &'static str = "counters";

        fn doc_id(&self) -> String {
            self.id.clone()
        }
    }

    /// Read-modify-write of a counter. Yields between phases so concurrent
    /// units genuinely interleave.
    struct Bump {
        limit: i64,
    }

    #[async_trait]
    impl UnitOfWork for Bump {
        type Reads = Counter;
        type Output = i64;

        fn name(&self) -> &'static str {
            "bump"
        }

        async fn collect_reads(&self, reads: &mut ReadPhase<'_>) -> LedgerResult<Counter> {
            let counter = reads.get::<Counter>("c").await?.unwrap_or(Counter {
                id: "c".to_string(),
                value: 0,
            });
            tokio::task::yield_now().await;
            Ok(counter)
        }

        fn compute_writes(&self, mut counter: Counter, writes: &mut WriteSet) -> LedgerResult<i64> {
            if counter.value >= self.limit {
                return Err(DomainError::invariant("limit reached").into());
            }
            counter.value += 1;
            writes.set(&counter)?;
            Ok(counter.value)
        }
    }

    /// Store wrapper that reports a conflict for the first `failures` commits.
    struct FlakyStore {
        inner: InMemoryDocumentStore,
        failures: AtomicU32,
        commits: AtomicU32,
    }

    impl FlakyStore {
        fn failing(n: u32) -> Self {
            Self {
                inner: InMemoryDocumentStore::new(),
                failures: AtomicU32::new(n),
                commits: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl DocumentStore for FlakyStore {
        async fn get(&self, key: &DocKey) -> Result<Option<VersionedDocument>, StoreError> {
            self.inner.get(key).await
        }

        async fn list(&self, tenant_id: TenantId, collection: &str) -> Result<Vec<VersionedDocument>, StoreError> {
            self.inner.list(tenant_id, collection).await
        }

        async fn commit(
            &self,
            tenant_id: TenantId,
            reads: &[ReadVersion],
            writes: Vec<WriteOp>,
        ) -> Result<(), StoreError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Conflict("injected".to_string()));
            }
            self.inner.commit(tenant_id, reads, writes).await
        }
    }

    fn ctx() -> LedgerContext {
        LedgerContext::new(TenantId::new(), UserId::new())
    }

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn retries_conflicts_then_commits() {
        let executor = LedgerExecutor::new(FlakyStore::failing(2), fast_policy(5));
        let ctx = ctx();

        let value = executor.execute(&ctx, &Bump { limit: 10 }).await.unwrap();

        assert_eq!(value, 1);
        assert_eq!(executor.store().commits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_conflict() {
        // Default jittered policy; the paused clock auto-advances through the sleeps.
        let executor = LedgerExecutor::new(FlakyStore::failing(100), RetryPolicy::default());
        let ctx = ctx();

        let err = executor.execute(&ctx, &Bump { limit: 10 }).await.unwrap_err();

        assert!(matches!(err, LedgerError::Conflict { attempts: 5 }));
        assert_eq!(executor.store().commits.load(Ordering::SeqCst), 5);
        let stored = get_typed::<Counter, _>(&executor.store().inner, ctx.tenant_id, "c").await.unwrap();
        assert!(stored.is_none());
    }

    #[tokio::test]
    async fn domain_errors_are_not_retried_and_write_nothing() {
        let executor = LedgerExecutor::new(FlakyStore::failing(0), fast_policy(5));
        let ctx = ctx();

        let err = executor.execute(&ctx, &Bump { limit: 0 }).await.unwrap_err();

        assert!(matches!(err, LedgerError::Domain(DomainError::InvariantViolation(_))));
        assert_eq!(executor.store().commits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_units_on_one_document_all_land() {
        let executor = Arc::new(LedgerExecutor::new(InMemoryDocumentStore::new(), fast_policy(20)));
        let ctx = ctx();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let executor = executor.clone();
            tasks.spawn(async move { executor.execute(&ctx, &Bump { limit: 100 }).await });
        }
        while let Some(res) = tasks.join_next().await {
            res.unwrap().unwrap();
        }

        let counter = get_typed::<Counter, _>(executor.store(), ctx.tenant_id, "c")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(counter.value, 8);
    }

    #[tokio::test]
    async fn notification_fires_only_after_commit() {
        #[derive(Default)]
        struct Recording(std::sync::Mutex<Vec<LedgerNotification>>);

        impl Notifier for Recording {
            fn notify(&self, notification: LedgerNotification) {
                self.0.lock().unwrap().push(notification);
            }
        }

        struct Noisy(Bump);

        #[async_trait]
        impl UnitOfWork for Noisy {
            type Reads = Counter;
            type Output = i64;

            fn name(&self) -> &'static str {
                "noisy"
            }

            async fn collect_reads(&self, reads: &mut ReadPhase<'_>) -> LedgerResult<Counter> {
                self.0.collect_reads(reads).await
            }

            fn compute_writes(&self, reads: Counter, writes: &mut WriteSet) -> LedgerResult<i64> {
                self.0.compute_writes(reads, writes)
            }

            fn notification(&self, ctx: &LedgerContext, output: &i64) -> Option<LedgerNotification> {
                Some(LedgerNotification::new(ctx.tenant_id, "counter.bumped", output.to_string(), ctx.occurred_at))
            }
        }

        let recording = Arc::new(Recording::default());
        let executor = LedgerExecutor::new(InMemoryDocumentStore::new(), fast_policy(1))
            .with_notifier(recording.clone());
        let ctx = ctx();

        executor.execute(&ctx, &Noisy(Bump { limit: 1 })).await.unwrap();
        executor.execute(&ctx, &Noisy(Bump { limit: 1 })).await.unwrap_err();

        let seen = recording.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].entity_id(), "1");
    }
}
