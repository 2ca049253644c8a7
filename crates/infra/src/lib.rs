//! Infrastructure layer: document store, ledger executor, audit, notifications.

pub mod audit;
pub mod context;
pub mod document_store;
pub mod executor;
pub mod idempotency;
pub mod notify;
pub mod retry;

pub use audit::ActivityLog;
pub use context::LedgerContext;
pub use document_store::{
    DocKey, Document, DocumentStore, InMemoryDocumentStore, PostgresDocumentStore, StoreError,
    WriteOp,
};
pub use executor::{LedgerError, LedgerExecutor, LedgerResult, ReadPhase, UnitOfWork, WriteSet};
pub use notify::{BusNotifier, NoopNotifier, Notifier};
pub use retry::RetryPolicy;
