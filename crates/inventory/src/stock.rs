//! Stock levels and the adjustment primitive shared by every unit that moves
//! stock (sales, purchase receipts, voids, manual corrections).
//!
//! A [`StockBook`] is loaded in the read phase and replayed in the write phase.
//! It tracks running quantities, so several adjustments to one
//! (product, warehouse) pair within a single unit chain correctly.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use shopledger_core::{DomainError, DomainResult, EntryId, ProductId, TenantId, UserId, WarehouseId};
use shopledger_events::LedgerNotification;
use shopledger_infra::{
    ActivityLog, Document, LedgerContext, LedgerResult, ReadPhase, UnitOfWork, WriteSet,
};

use crate::product::Product;

/// On-hand quantity of one product in one warehouse. Never negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
    pub updated_at: DateTime<Utc>,
}

impl StockLevel {
    pub fn id_for(product_id: ProductId, warehouse_id: WarehouseId) -> String {
        format!("{product_id}:{warehouse_id}")
    }

    fn empty(tenant_id: TenantId, product_id: ProductId, warehouse_id: WarehouseId) -> Self {
        Self {
            tenant_id,
            product_id,
            warehouse_id,
            quantity: 0,
            updated_at: DateTime::<Utc>::default(),
        }
    }
}

impl Document for StockLevel {
    const COLLECTION: &'static str = "stock_levels";

    fn doc_id(&self) -> String {
        Self::id_for(self.product_id, self.warehouse_id)
    }
}

/// Immutable before/after record of one stock movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub id: EntryId,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub change: i64,
    pub old_quantity: i64,
    pub new_quantity: i64,
    pub reason: String,
    pub actor: UserId,
    pub created_at: DateTime<Utc>,
}

impl Document for StockAdjustment {
    const COLLECTION: &'static str = "stock_adjustments";

    fn doc_id(&self) -> String {
        self.id.to_string()
    }
}

/// A requested movement: positive adds stock, negative removes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChange {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub delta: i64,
    pub reason: String,
}

#[derive(Debug)]
struct Slot {
    level: StockLevel,
    dirty: bool,
}

/// Per-unit view of the stock levels a unit touches.
#[derive(Debug, Default)]
pub struct StockBook {
    slots: BTreeMap<(ProductId, WarehouseId), Slot>,
    adjustments: Vec<StockAdjustment>,
}

impl StockBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read phase: load the level for `(product_id, warehouse_id)`.
    ///
    /// The level read is tracked, so a concurrent movement on the same pair
    /// forces a retry. The product is only probed; its total moves by
    /// increment. Loading a pair twice is a no-op.
    pub async fn load(
        &mut self,
        reads: &mut ReadPhase<'_>,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> LedgerResult<()> {
        if self.slots.contains_key(&(product_id, warehouse_id)) {
            return Ok(());
        }

        if !reads.exists::<Product>(product_id).await? {
            return Err(DomainError::not_found(format!("{} {product_id}", Product::COLLECTION)).into());
        }

        let level = reads
            .get::<StockLevel>(StockLevel::id_for(product_id, warehouse_id))
            .await?
            .unwrap_or_else(|| StockLevel::empty(reads.tenant_id(), product_id, warehouse_id));

        self.slots
            .insert((product_id, warehouse_id), Slot { level, dirty: false });
        Ok(())
    }

    /// Current quantity within this unit (committed value plus earlier changes).
    pub fn quantity(&self, product_id: ProductId, warehouse_id: WarehouseId) -> Option<i64> {
        self.slots
            .get(&(product_id, warehouse_id))
            .map(|s| s.level.quantity)
    }

    /// Write phase: apply one movement against the running quantity.
    pub fn adjust(&mut self, ctx: &LedgerContext, change: &StockChange) -> DomainResult<StockAdjustment> {
        if change.delta == 0 {
            return Err(DomainError::validation("stock change cannot be zero"));
        }

        let slot = self
            .slots
            .get_mut(&(change.product_id, change.warehouse_id))
            .ok_or_else(|| {
                DomainError::invariant(format!(
                    "stock level {} was not loaded in the read phase",
                    StockLevel::id_for(change.product_id, change.warehouse_id)
                ))
            })?;

        let old_quantity = slot.level.quantity;
        let new_quantity = old_quantity
            .checked_add(change.delta)
            .ok_or_else(|| DomainError::validation("stock change overflows"))?;
        if new_quantity < 0 {
            return Err(DomainError::invariant(format!(
                "insufficient stock for product {} in warehouse {}: {old_quantity} on hand, change {}",
                change.product_id, change.warehouse_id, change.delta
            )));
        }

        slot.level.quantity = new_quantity;
        slot.level.updated_at = ctx.occurred_at;
        slot.dirty = true;

        let adjustment = StockAdjustment {
            id: EntryId::new(),
            tenant_id: ctx.tenant_id,
            product_id: change.product_id,
            warehouse_id: change.warehouse_id,
            change: change.delta,
            old_quantity,
            new_quantity,
            reason: change.reason.clone(),
            actor: ctx.actor,
            created_at: ctx.occurred_at,
        };
        self.adjustments.push(adjustment.clone());
        Ok(adjustment)
    }

    /// Flush into `writes`: each touched level once, one net increment per
    /// product, and every adjustment row in order.
    pub fn write_into(self, writes: &mut WriteSet) -> LedgerResult<Vec<StockAdjustment>> {
        let mut product_deltas: BTreeMap<ProductId, i64> = BTreeMap::new();
        for adj in &self.adjustments {
            *product_deltas.entry(adj.product_id).or_default() += adj.change;
        }

        for slot in self.slots.values().filter(|s| s.dirty) {
            writes.set(&slot.level)?;
        }
        for (product_id, delta) in product_deltas {
            if delta != 0 {
                writes.increment::<Product>(product_id, &[Product::TOTAL_QUANTITY], delta);
            }
        }
        for adj in &self.adjustments {
            writes.create(adj)?;
        }

        debug!(adjustments = self.adjustments.len(), "stock book flushed");
        Ok(self.adjustments)
    }
}

/// Unit: manual stock correction. A reason is mandatory.
pub struct AdjustStock {
    ctx: LedgerContext,
    change: StockChange,
}

impl AdjustStock {
    pub fn new(ctx: LedgerContext, change: StockChange) -> DomainResult<Self> {
        if change.delta == 0 {
            return Err(DomainError::validation("stock change cannot be zero"));
        }
        let reason = change.reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("a reason is required for manual stock adjustments"));
        }
        let change = StockChange {
            reason: reason.to_string(),
            ..change
        };
        Ok(Self { ctx, change })
    }
}

#[async_trait]
impl UnitOfWork for AdjustStock {
    type Reads = StockBook;
    type Output = StockAdjustment;

    fn name(&self) -> &'static str {
        "stock.adjust"
    }

    async fn collect_reads(&self, reads: &mut ReadPhase<'_>) -> LedgerResult<StockBook> {
        let mut book = StockBook::new();
        book.load(reads, self.change.product_id, self.change.warehouse_id)
            .await?;
        Ok(book)
    }

    fn compute_writes(&self, mut book: StockBook, writes: &mut WriteSet) -> LedgerResult<StockAdjustment> {
        let adjustment = book.adjust(&self.ctx, &self.change)?;
        book.write_into(writes)?;

        ActivityLog::record(
            writes,
            &self.ctx,
            "stock.adjusted",
            StockLevel::COLLECTION,
            StockLevel::id_for(adjustment.product_id, adjustment.warehouse_id),
            json!({
                "change": adjustment.change,
                "old_quantity": adjustment.old_quantity,
                "new_quantity": adjustment.new_quantity,
                "reason": adjustment.reason,
            }),
        )?;
        Ok(adjustment)
    }

    fn notification(&self, ctx: &LedgerContext, output: &StockAdjustment) -> Option<LedgerNotification> {
        Some(
            LedgerNotification::new(ctx.tenant_id, "stock.adjusted", output.id.to_string(), ctx.occurred_at)
                .with_payload(json!({
                    "product_id": output.product_id,
                    "warehouse_id": output.warehouse_id,
                    "new_quantity": output.new_quantity,
                })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use proptest::prelude::*;
    use shopledger_infra::document_store::{get_typed, list_typed};
    use shopledger_infra::{InMemoryDocumentStore, LedgerError, LedgerExecutor, RetryPolicy};

    use crate::product::{NewProduct, RegisterProduct};

    type Executor = LedgerExecutor<InMemoryDocumentStore>;

    fn executor() -> Executor {
        LedgerExecutor::new(InMemoryDocumentStore::new(), RetryPolicy::fixed(20, Duration::from_millis(1)))
    }

    fn ctx(tenant_id: TenantId) -> LedgerContext {
        LedgerContext::new(tenant_id, UserId::new())
    }

    async fn product(executor: &Executor, ctx: &LedgerContext) -> ProductId {
        let unit = RegisterProduct::new(
            *ctx,
            &NewProduct {
                name: "Rice 25kg".to_string(),
                sku: None,
            },
        )
        .unwrap();
        executor.execute(ctx, &unit).await.unwrap().id
    }

    fn change(product_id: ProductId, warehouse_id: WarehouseId, delta: i64) -> StockChange {
        StockChange {
            product_id,
            warehouse_id,
            delta,
            reason: "recount".to_string(),
        }
    }

    async fn adjust(executor: &Executor, ctx: &LedgerContext, c: StockChange) -> LedgerResult<StockAdjustment> {
        executor.execute(ctx, &AdjustStock::new(*ctx, c)?).await
    }

    /// Two movements on one pair inside a single unit.
    struct DoubleMove {
        ctx: LedgerContext,
        first: StockChange,
        second: StockChange,
    }

    #[async_trait]
    impl UnitOfWork for DoubleMove {
        type Reads = StockBook;
        type Output = Vec<StockAdjustment>;

        fn name(&self) -> &'static str {
            "test.double_move"
        }

        async fn collect_reads(&self, reads: &mut ReadPhase<'_>) -> LedgerResult<StockBook> {
            let mut book = StockBook::new();
            book.load(reads, self.first.product_id, self.first.warehouse_id).await?;
            book.load(reads, self.second.product_id, self.second.warehouse_id).await?;
            Ok(book)
        }

        fn compute_writes(&self, mut book: StockBook, writes: &mut WriteSet) -> LedgerResult<Vec<StockAdjustment>> {
            book.adjust(&self.ctx, &self.first)?;
            book.adjust(&self.ctx, &self.second)?;
            book.write_into(writes)
        }
    }

    #[tokio::test]
    async fn adjustment_moves_level_product_total_and_writes_trail() {
        let executor = executor();
        let ctx = ctx(TenantId::new());
        let product_id = product(&executor, &ctx).await;
        let warehouse = WarehouseId::new();

        let adj = adjust(&executor, &ctx, change(product_id, warehouse, 12)).await.unwrap();
        assert_eq!((adj.old_quantity, adj.new_quantity), (0, 12));

        let adj = adjust(&executor, &ctx, change(product_id, warehouse, -5)).await.unwrap();
        assert_eq!((adj.old_quantity, adj.new_quantity), (12, 7));

        let level = get_typed::<StockLevel, _>(executor.store(), ctx.tenant_id, StockLevel::id_for(product_id, warehouse))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(level.quantity, 7);

        let stored = get_typed::<Product, _>(executor.store(), ctx.tenant_id, product_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.total_quantity, 7);

        let trail = list_typed::<StockAdjustment, _>(executor.store(), ctx.tenant_id).await.unwrap();
        assert_eq!(trail.len(), 2);
    }

    #[tokio::test]
    async fn insufficient_stock_is_rejected_with_no_writes() {
        let executor = executor();
        let ctx = ctx(TenantId::new());
        let product_id = product(&executor, &ctx).await;
        let warehouse = WarehouseId::new();
        adjust(&executor, &ctx, change(product_id, warehouse, 3)).await.unwrap();

        let err = adjust(&executor, &ctx, change(product_id, warehouse, -4)).await.unwrap_err();
        match err {
            LedgerError::Domain(DomainError::InvariantViolation(msg)) => assert!(msg.starts_with("insufficient stock")),
            other => panic!("unexpected error {other:?}"),
        }

        let trail = list_typed::<StockAdjustment, _>(executor.store(), ctx.tenant_id).await.unwrap();
        assert_eq!(trail.len(), 1);
        let audit = list_typed::<ActivityLog, _>(executor.store(), ctx.tenant_id).await.unwrap();
        // product registration + one adjustment
        assert_eq!(audit.len(), 2);
    }

    #[tokio::test]
    async fn unknown_product_is_not_found() {
        let executor = executor();
        let ctx = ctx(TenantId::new());

        let err = adjust(&executor, &ctx, change(ProductId::new(), WarehouseId::new(), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::NotFound(_))));
    }

    #[test]
    fn manual_adjustment_requires_reason_and_nonzero_change() {
        let ctx = ctx(TenantId::new());
        let mut c = change(ProductId::new(), WarehouseId::new(), 2);
        c.reason = "  ".to_string();
        assert!(matches!(AdjustStock::new(ctx, c), Err(DomainError::Validation(_))));

        let c = change(ProductId::new(), WarehouseId::new(), 0);
        assert!(matches!(AdjustStock::new(ctx, c), Err(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn adjustments_in_one_unit_chain_on_running_quantity() {
        let executor = executor();
        let ctx = ctx(TenantId::new());
        let product_id = product(&executor, &ctx).await;
        let warehouse = WarehouseId::new();
        adjust(&executor, &ctx, change(product_id, warehouse, 10)).await.unwrap();

        let unit = DoubleMove {
            ctx,
            first: change(product_id, warehouse, -4),
            second: change(product_id, warehouse, -6),
        };
        let adjustments = executor.execute(&ctx, &unit).await.unwrap();

        assert_eq!((adjustments[0].old_quantity, adjustments[0].new_quantity), (10, 6));
        assert_eq!((adjustments[1].old_quantity, adjustments[1].new_quantity), (6, 0));

        // 0 + 1 - 2 goes negative even though each step is checked in turn.
        let overdraw = DoubleMove {
            ctx,
            first: change(product_id, warehouse, 1),
            second: change(product_id, warehouse, -2),
        };
        let err = executor.execute(&ctx, &overdraw).await.unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn product_total_sums_warehouses() {
        let executor = executor();
        let ctx = ctx(TenantId::new());
        let product_id = product(&executor, &ctx).await;
        let (a, b) = (WarehouseId::new(), WarehouseId::new());

        adjust(&executor, &ctx, change(product_id, a, 4)).await.unwrap();
        adjust(&executor, &ctx, change(product_id, b, 9)).await.unwrap();
        adjust(&executor, &ctx, change(product_id, a, -1)).await.unwrap();

        let stored = get_typed::<Product, _>(executor.store(), ctx.tenant_id, product_id)
            .await
            .unwrap()
            .unwrap();
        let levels = list_typed::<StockLevel, _>(executor.store(), ctx.tenant_id).await.unwrap();
        assert_eq!(stored.total_quantity, levels.iter().map(|l| l.quantity).sum::<i64>());
        assert_eq!(stored.total_quantity, 12);
    }

    #[tokio::test]
    async fn concurrent_decrements_never_oversell() {
        let executor = Arc::new(executor());
        let ctx = ctx(TenantId::new());
        let product_id = product(&executor, &ctx).await;
        let warehouse = WarehouseId::new();
        adjust(&executor, &ctx, change(product_id, warehouse, 5)).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let executor = executor.clone();
            tasks.spawn(async move { adjust(&executor, &ctx, change(product_id, warehouse, -1)).await });
        }

        let mut accepted = 0;
        let mut rejected = 0;
        while let Some(res) = tasks.join_next().await {
            match res.unwrap() {
                Ok(_) => accepted += 1,
                Err(LedgerError::Domain(DomainError::InvariantViolation(_))) => rejected += 1,
                Err(other) => panic!("unexpected error {other:?}"),
            }
        }
        assert_eq!((accepted, rejected), (5, 3));

        let level = get_typed::<StockLevel, _>(executor.store(), ctx.tenant_id, StockLevel::id_for(product_id, warehouse))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(level.quantity, 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Replaying any sequence of movements leaves the level equal to the
        /// sum of accepted changes and never negative.
        #[test]
        fn replayed_movements_keep_level_and_trail_consistent(
            deltas in prop::collection::vec(prop_oneof![-20i64..=-1, 1i64..=20], 1..24)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
            rt.block_on(async {
                let executor = executor();
                let ctx = ctx(TenantId::new());
                let product_id = product(&executor, &ctx).await;
                let warehouse = WarehouseId::new();

                let mut expected = 0i64;
                for delta in deltas {
                    let result = adjust(&executor, &ctx, change(product_id, warehouse, delta)).await;
                    if expected + delta >= 0 {
                        prop_assert!(result.is_ok());
                        expected += delta;
                    } else {
                        prop_assert!(result.is_err());
                    }
                }

                let level = get_typed::<StockLevel, _>(executor.store(), ctx.tenant_id, StockLevel::id_for(product_id, warehouse))
                    .await
                    .unwrap()
                    .map(|l| l.quantity)
                    .unwrap_or(0);
                prop_assert_eq!(level, expected);

                let trail = list_typed::<StockAdjustment, _>(executor.store(), ctx.tenant_id).await.unwrap();
                for adj in &trail {
                    prop_assert_eq!(adj.new_quantity, adj.old_quantity + adj.change);
                    prop_assert!(adj.new_quantity >= 0);
                }
                prop_assert_eq!(trail.iter().map(|a| a.change).sum::<i64>(), expected);
                Ok(())
            })?;
        }
    }
}
