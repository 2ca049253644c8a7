//! Store, executor and policy wiring shared by every handler.

use std::{sync::Arc, time::Duration};

use sqlx::postgres::PgPoolOptions;

use shopledger_auth::RolePolicy;
use shopledger_core::TenantId;
use shopledger_events::{EventBus, InMemoryEventBus, LedgerNotification};
use shopledger_infra::{
    BusNotifier, Document, DocumentStore, InMemoryDocumentStore, LedgerContext, LedgerExecutor,
    PostgresDocumentStore, RetryPolicy, UnitOfWork,
    document_store::{get_typed, list_typed},
};

use crate::app::errors::ApiError;
use crate::config::ApiConfig;

pub type SharedStore = Arc<dyn DocumentStore>;

pub struct AppServices {
    pub executor: LedgerExecutor<SharedStore>,
    pub policy: RolePolicy,
    pub request_timeout: Duration,
    /// Post-commit notifications. `spawn_notification_log` attaches the
    /// in-process consumer; external dispatchers may subscribe as well.
    pub notifications: Arc<InMemoryEventBus<LedgerNotification>>,
}

impl AppServices {
    pub fn new(store: SharedStore, retry: RetryPolicy, policy: RolePolicy, request_timeout: Duration) -> Self {
        let notifications = Arc::new(InMemoryEventBus::new());
        let executor = LedgerExecutor::new(store, retry)
            .with_notifier(Arc::new(BusNotifier::new(notifications.clone())));

        Self {
            executor,
            policy,
            request_timeout,
            notifications,
        }
    }

    pub fn in_memory(config: &ApiConfig, policy: RolePolicy) -> Self {
        Self::new(
            Arc::new(InMemoryDocumentStore::new()),
            config.retry_policy(),
            policy,
            config.request_timeout,
        )
    }

    /// Select the store from `DATABASE_URL`: Postgres when set, in-memory otherwise.
    pub async fn from_config(config: &ApiConfig, policy: RolePolicy) -> anyhow::Result<Self> {
        let Some(url) = config.database_url.as_deref() else {
            tracing::warn!("DATABASE_URL not set; using the in-memory document store");
            return Ok(Self::in_memory(config, policy));
        };

        let pool = PgPoolOptions::new().max_connections(16).connect(url).await?;
        let store = PostgresDocumentStore::new(pool);
        store.ensure_schema().await?;
        tracing::info!("connected to postgres document store");

        Ok(Self::new(Arc::new(store), config.retry_policy(), policy, config.request_timeout))
    }

    /// Background subscriber: bus -> structured log. The task ends once the
    /// bus is dropped with these services.
    pub fn spawn_notification_log(&self) -> tokio::task::JoinHandle<()> {
        let sub = self.notifications.subscribe();
        tokio::task::spawn_blocking(move || {
            while let Ok(n) = sub.recv() {
                tracing::info!(
                    tenant_id = %n.tenant_id(),
                    kind = n.kind(),
                    entity_id = n.entity_id(),
                    notification_id = %n.notification_id(),
                    "ledger notification"
                );
            }
            tracing::debug!("notification bus closed");
        })
    }

    /// Execute a unit under the request timeout. Dropping the future on
    /// timeout rolls back anything uncommitted.
    pub async fn run<U: UnitOfWork>(&self, ctx: &LedgerContext, unit: U) -> Result<U::Output, ApiError> {
        match tokio::time::timeout(self.request_timeout, self.executor.execute(ctx, &unit)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ApiError::Timeout),
        }
    }

    /// Read one document outside any unit of work.
    pub async fn fetch<D: Document>(&self, tenant_id: TenantId, id: impl ToString) -> Result<D, ApiError> {
        let id = id.to_string();
        let read = get_typed::<D, _>(self.executor.store(), tenant_id, &id);
        match tokio::time::timeout(self.request_timeout, read).await {
            Ok(Ok(Some(doc))) => Ok(doc),
            Ok(Ok(None)) => Err(shopledger_core::DomainError::not_found(format!("{} {id}", D::COLLECTION)).into()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ApiError::Timeout),
        }
    }

    pub async fn list<D: Document>(&self, tenant_id: TenantId) -> Result<Vec<D>, ApiError> {
        let read = list_typed::<D, _>(self.executor.store(), tenant_id);
        match tokio::time::timeout(self.request_timeout, read).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ApiError::Timeout),
        }
    }
}
