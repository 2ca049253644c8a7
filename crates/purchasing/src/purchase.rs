use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{instrument, warn};

use shopledger_accounting::{
    CATEGORY_PURCHASE_PAYMENT, CATEGORY_PURCHASE_REFUND, CashEntry, CurrencyLedger, PaymentMethod,
    TOTAL_OWED, TOTAL_SPENT, record_expense, record_income,
};
use shopledger_core::{
    CurrencyCode, DomainError, DomainResult, Money, ProductId, PurchaseId, SupplierId, TenantId,
    UserId, WarehouseId,
};
use shopledger_events::LedgerNotification;
use shopledger_infra::idempotency;
use shopledger_infra::{
    ActivityLog, Document, LedgerContext, LedgerResult, ReadPhase, UnitOfWork, WriteSet,
};
use shopledger_inventory::{StockBook, StockChange};
use shopledger_parties::Supplier;

const PAY_OPERATION: &str = "purchase.pay";

/// Purchase lifecycle. Stock is received exactly once, when a purchase
/// first leaves `Pending`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    Pending,
    PartiallyPaid,
    Paid,
}

impl PurchaseStatus {
    pub fn derive(total: Money, paid: Money) -> Self {
        if total.saturating_remaining(paid).is_zero() {
            Self::Paid
        } else if paid.is_positive() {
            Self::PartiallyPaid
        } else {
            Self::Pending
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseItem {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
    pub unit_cost: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchasePayment {
    pub amount: Money,
    pub method: PaymentMethod,
    pub paid_at: DateTime<Utc>,
    pub recorded_by: UserId,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Payable. `amount_paid + remaining_amount == total_amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: PurchaseId,
    pub tenant_id: TenantId,
    pub supplier_id: SupplierId,
    pub currency: CurrencyCode,
    pub items: Vec<PurchaseItem>,
    pub total_amount: Money,
    pub amount_paid: Money,
    pub remaining_amount: Money,
    pub status: PurchaseStatus,
    pub received: bool,
    #[serde(default)]
    pub payment_history: Vec<PurchasePayment>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl Document for Purchase {
    const COLLECTION: &'static str = "purchases";

    fn doc_id(&self) -> String {
        self.id.to_string()
    }
}

impl Purchase {
    pub fn apply_payment(&mut self, payment: PurchasePayment) -> DomainResult<()> {
        if !payment.amount.is_positive() {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        if self.remaining_amount.is_zero() {
            return Err(DomainError::invariant(format!("purchase {} is already paid", self.id)));
        }
        if payment.amount > self.remaining_amount {
            return Err(DomainError::invariant(format!(
                "payment exceeds remaining amount: {} > {}",
                payment.amount, self.remaining_amount
            )));
        }

        self.amount_paid = self.amount_paid.checked_add(payment.amount)?;
        self.remaining_amount = self.remaining_amount.checked_sub(payment.amount)?;
        self.status = PurchaseStatus::derive(self.total_amount, self.amount_paid);
        self.payment_history.push(payment);
        Ok(())
    }

    fn stock_changes(&self, sign: i64, reason: &str) -> Vec<StockChange> {
        self.items
            .iter()
            .map(|item| StockChange {
                product_id: item.product_id,
                warehouse_id: item.warehouse_id,
                delta: sign * item.quantity,
                reason: format!("{reason} {}", self.id),
            })
            .collect()
    }
}

/// Purchase request. An initial payment receives the goods immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchase {
    pub supplier_id: SupplierId,
    pub currency: CurrencyCode,
    pub items: Vec<PurchaseItem>,
    #[serde(default)]
    pub amount_paid: Option<Money>,
    #[serde(default)]
    pub method: Option<PaymentMethod>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseReceipt {
    pub purchase_id: PurchaseId,
    pub status: PurchaseStatus,
    pub remaining_amount: Money,
    pub received: bool,
}

#[derive(Debug)]
pub struct RecordReads {
    book: StockBook,
}

/// Unit: record a purchase.
pub struct RecordPurchase {
    ctx: LedgerContext,
    supplier_id: SupplierId,
    currency: CurrencyCode,
    items: Vec<PurchaseItem>,
    total_amount: Money,
    initial: Option<(Money, PaymentMethod)>,
}

impl RecordPurchase {
    pub fn new(ctx: LedgerContext, input: NewPurchase) -> DomainResult<Self> {
        if input.items.is_empty() {
            return Err(DomainError::validation("a purchase needs at least one item"));
        }
        let mut line_totals = Vec::with_capacity(input.items.len());
        for item in &input.items {
            if item.quantity <= 0 {
                return Err(DomainError::validation(format!(
                    "quantity for product {} must be positive",
                    item.product_id
                )));
            }
            if item.unit_cost.is_negative() {
                return Err(DomainError::validation(format!(
                    "unit cost for product {} cannot be negative",
                    item.product_id
                )));
            }
            line_totals.push(item.unit_cost.checked_mul(item.quantity)?);
        }
        let total_amount = Money::sum(line_totals)?;
        // Receipt is triggered by the first payment; a zero total could never take one.
        if !total_amount.is_positive() {
            return Err(DomainError::validation("a purchase total must be positive"));
        }

        let initial = match (input.amount_paid, input.method) {
            (Some(amount), _) if amount.is_negative() => {
                return Err(DomainError::validation("amount paid cannot be negative"));
            }
            (Some(amount), _) if amount > total_amount => {
                return Err(DomainError::validation(format!(
                    "overpayment: paid {amount} against a total of {total_amount}"
                )));
            }
            (Some(amount), Some(method)) if amount.is_positive() => Some((amount, method)),
            (Some(amount), None) if amount.is_positive() => {
                return Err(DomainError::validation("a payment method is required with an initial payment"));
            }
            _ => None,
        };

        Ok(Self {
            ctx,
            supplier_id: input.supplier_id,
            currency: input.currency,
            items: input.items,
            total_amount,
            initial,
        })
    }
}

#[async_trait]
impl UnitOfWork for RecordPurchase {
    type Reads = RecordReads;
    type Output = PurchaseReceipt;

    fn name(&self) -> &'static str {
        "purchase.record"
    }

    #[instrument(skip_all, fields(supplier_id = %self.supplier_id))]
    async fn collect_reads(&self, reads: &mut ReadPhase<'_>) -> LedgerResult<RecordReads> {
        if !reads.exists::<Supplier>(self.supplier_id).await? {
            return Err(DomainError::not_found(format!("{} {}", Supplier::COLLECTION, self.supplier_id)).into());
        }
        let mut book = StockBook::new();
        for item in &self.items {
            book.load(reads, item.product_id, item.warehouse_id).await?;
        }
        Ok(RecordReads { book })
    }

    fn compute_writes(&self, reads: RecordReads, writes: &mut WriteSet) -> LedgerResult<PurchaseReceipt> {
        let RecordReads { mut book } = reads;
        let ctx = &self.ctx;

        let mut purchase = Purchase {
            id: PurchaseId::new(),
            tenant_id: ctx.tenant_id,
            supplier_id: self.supplier_id,
            currency: self.currency.clone(),
            items: self.items.clone(),
            total_amount: self.total_amount,
            amount_paid: Money::ZERO,
            remaining_amount: self.total_amount,
            status: PurchaseStatus::derive(self.total_amount, Money::ZERO),
            received: false,
            payment_history: Vec::new(),
            created_by: ctx.actor,
            created_at: ctx.occurred_at,
        };

        if let Some((amount, method)) = &self.initial {
            purchase.apply_payment(PurchasePayment {
                amount: *amount,
                method: method.clone(),
                paid_at: ctx.occurred_at,
                recorded_by: ctx.actor,
                idempotency_key: None,
            })?;
            record_expense(
                writes,
                ctx,
                CashEntry {
                    amount: *amount,
                    currency: &purchase.currency,
                    category: CATEGORY_PURCHASE_PAYMENT,
                    method,
                    related_entity_id: Some(purchase.id.to_string()),
                },
                None,
            )?;
        }

        if purchase.status != PurchaseStatus::Pending {
            for change in purchase.stock_changes(1, "purchase") {
                book.adjust(ctx, &change)?;
            }
            book.write_into(writes)?;
            purchase.received = true;
        }

        writes.create(&purchase)?;

        CurrencyLedger::<Supplier>::new(writes, self.supplier_id, TOTAL_OWED)
            .credit(&purchase.currency, purchase.remaining_amount);
        CurrencyLedger::<Supplier>::new(writes, self.supplier_id, TOTAL_SPENT)
            .credit(&purchase.currency, purchase.amount_paid);

        ActivityLog::record(
            writes,
            ctx,
            "purchase.recorded",
            Purchase::COLLECTION,
            purchase.id,
            json!({
                "supplier_id": purchase.supplier_id,
                "currency": purchase.currency,
                "total_amount": purchase.total_amount,
                "amount_paid": purchase.amount_paid,
                "status": purchase.status,
                "received": purchase.received,
            }),
        )?;

        Ok(PurchaseReceipt {
            purchase_id: purchase.id,
            status: purchase.status,
            remaining_amount: purchase.remaining_amount,
            received: purchase.received,
        })
    }

    fn notification(&self, ctx: &LedgerContext, output: &PurchaseReceipt) -> Option<LedgerNotification> {
        Some(LedgerNotification::new(
            ctx.tenant_id,
            "purchase.recorded",
            output.purchase_id.to_string(),
            ctx.occurred_at,
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchasePaymentOutcome {
    pub purchase_id: PurchaseId,
    pub status: PurchaseStatus,
    pub remaining_amount: Money,
    /// Whether this payment triggered the stock receipt.
    pub received_now: bool,
}

#[derive(Debug)]
pub struct PayReads {
    purchase: Purchase,
    supplier_exists: bool,
    book: StockBook,
}

/// Unit: pay (part of) a purchase.
pub struct PayPurchase {
    ctx: LedgerContext,
    purchase_id: PurchaseId,
    amount: Money,
    currency: CurrencyCode,
    method: PaymentMethod,
    idempotency_key: Option<String>,
}

impl PayPurchase {
    pub fn new(
        ctx: LedgerContext,
        purchase_id: PurchaseId,
        amount: Money,
        currency: CurrencyCode,
        method: PaymentMethod,
        idempotency_key: Option<String>,
    ) -> DomainResult<Self> {
        if !amount.is_positive() {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        idempotency::validate_key(idempotency_key.as_deref())?;
        Ok(Self {
            ctx,
            purchase_id,
            amount,
            currency,
            method,
            idempotency_key,
        })
    }
}

#[async_trait]
impl UnitOfWork for PayPurchase {
    type Reads = PayReads;
    type Output = PurchasePaymentOutcome;

    fn name(&self) -> &'static str {
        "purchase.pay"
    }

    #[instrument(skip_all, fields(purchase_id = %self.purchase_id))]
    async fn collect_reads(&self, reads: &mut ReadPhase<'_>) -> LedgerResult<PayReads> {
        idempotency::ensure_unused(reads, PAY_OPERATION, self.idempotency_key.as_deref()).await?;

        let purchase = reads.require::<Purchase>(self.purchase_id).await?;
        let supplier_exists = reads.exists::<Supplier>(purchase.supplier_id).await?;

        let mut book = StockBook::new();
        if !purchase.received {
            for item in &purchase.items {
                book.load(reads, item.product_id, item.warehouse_id).await?;
            }
        }

        Ok(PayReads {
            purchase,
            supplier_exists,
            book,
        })
    }

    fn compute_writes(&self, reads: PayReads, writes: &mut WriteSet) -> LedgerResult<PurchasePaymentOutcome> {
        let PayReads {
            mut purchase,
            supplier_exists,
            mut book,
        } = reads;
        let ctx = &self.ctx;

        if self.currency != purchase.currency {
            return Err(DomainError::validation(format!(
                "payment currency {} does not match purchase currency {}",
                self.currency, purchase.currency
            ))
            .into());
        }

        let was_pending = purchase.status == PurchaseStatus::Pending;
        purchase.apply_payment(PurchasePayment {
            amount: self.amount,
            method: self.method.clone(),
            paid_at: ctx.occurred_at,
            recorded_by: ctx.actor,
            idempotency_key: self.idempotency_key.clone(),
        })?;

        let received_now = was_pending && !purchase.received;
        if received_now {
            for change in purchase.stock_changes(1, "purchase") {
                book.adjust(ctx, &change)?;
            }
            book.write_into(writes)?;
            purchase.received = true;
        }
        writes.set(&purchase)?;

        record_expense(
            writes,
            ctx,
            CashEntry {
                amount: self.amount,
                currency: &purchase.currency,
                category: CATEGORY_PURCHASE_PAYMENT,
                method: &self.method,
                related_entity_id: Some(purchase.id.to_string()),
            },
            None,
        )?;

        if supplier_exists {
            CurrencyLedger::<Supplier>::new(writes, purchase.supplier_id, TOTAL_OWED)
                .debit(&purchase.currency, self.amount);
            CurrencyLedger::<Supplier>::new(writes, purchase.supplier_id, TOTAL_SPENT)
                .credit(&purchase.currency, self.amount);
        } else {
            warn!(purchase_id = %purchase.id, supplier_id = %purchase.supplier_id, "supplier missing; totals not updated");
        }

        idempotency::remember(writes, ctx, PAY_OPERATION, self.idempotency_key.as_deref(), purchase.id)?;

        ActivityLog::record(
            writes,
            ctx,
            "purchase.payment_recorded",
            Purchase::COLLECTION,
            purchase.id,
            json!({
                "amount": self.amount,
                "currency": purchase.currency,
                "method": self.method,
                "remaining_amount": purchase.remaining_amount,
                "status": purchase.status,
                "received_now": received_now,
            }),
        )?;

        Ok(PurchasePaymentOutcome {
            purchase_id: purchase.id,
            status: purchase.status,
            remaining_amount: purchase.remaining_amount,
            received_now,
        })
    }

    fn notification(&self, ctx: &LedgerContext, output: &PurchasePaymentOutcome) -> Option<LedgerNotification> {
        Some(
            LedgerNotification::new(
                ctx.tenant_id,
                "purchase.payment_recorded",
                output.purchase_id.to_string(),
                ctx.occurred_at,
            )
            .with_payload(json!({
                "amount": self.amount,
                "remaining_amount": output.remaining_amount,
                "status": output.status,
            })),
        )
    }
}

#[derive(Debug)]
pub struct DeleteReads {
    purchase: Purchase,
    supplier: Option<Supplier>,
    book: StockBook,
}

/// Unit: delete a purchase, reversing its stock receipt and supplier totals.
///
/// Every recorded payment is returned as a "Purchase Refund" income row.
/// Fails if the received stock has since been sold or otherwise drawn down.
pub struct DeletePurchase {
    ctx: LedgerContext,
    purchase_id: PurchaseId,
}

impl DeletePurchase {
    pub fn new(ctx: LedgerContext, purchase_id: PurchaseId) -> Self {
        Self { ctx, purchase_id }
    }
}

#[async_trait]
impl UnitOfWork for DeletePurchase {
    type Reads = DeleteReads;
    type Output = PurchaseId;

    fn name(&self) -> &'static str {
        "purchase.delete"
    }

    #[instrument(skip_all, fields(purchase_id = %self.purchase_id))]
    async fn collect_reads(&self, reads: &mut ReadPhase<'_>) -> LedgerResult<DeleteReads> {
        let purchase = reads.require::<Purchase>(self.purchase_id).await?;
        let supplier = reads.get::<Supplier>(purchase.supplier_id).await?;

        let mut book = StockBook::new();
        if purchase.received {
            for item in &purchase.items {
                book.load(reads, item.product_id, item.warehouse_id).await?;
            }
        }
        Ok(DeleteReads {
            purchase,
            supplier,
            book,
        })
    }

    fn compute_writes(&self, reads: DeleteReads, writes: &mut WriteSet) -> LedgerResult<PurchaseId> {
        let DeleteReads {
            purchase,
            supplier,
            mut book,
        } = reads;
        let ctx = &self.ctx;

        if purchase.received {
            for change in purchase.stock_changes(-1, "delete purchase") {
                book.adjust(ctx, &change)?;
            }
            book.write_into(writes)?;
        }

        match &supplier {
            Some(supplier) => {
                CurrencyLedger::<Supplier>::new(writes, supplier.id, TOTAL_OWED).debit_clamped(
                    &purchase.currency,
                    purchase.remaining_amount,
                    &supplier.total_owed,
                );
                CurrencyLedger::<Supplier>::new(writes, supplier.id, TOTAL_SPENT).debit_clamped(
                    &purchase.currency,
                    purchase.amount_paid,
                    &supplier.total_spent,
                );
            }
            None => {
                warn!(purchase_id = %purchase.id, supplier_id = %purchase.supplier_id, "supplier missing; totals not reversed");
            }
        }

        let related = Some(purchase.id.to_string());
        for payment in &purchase.payment_history {
            record_income(
                writes,
                ctx,
                CashEntry {
                    amount: payment.amount,
                    currency: &purchase.currency,
                    category: CATEGORY_PURCHASE_REFUND,
                    method: &payment.method,
                    related_entity_id: related.clone(),
                },
            )?;
        }

        writes.delete::<Purchase>(purchase.id);

        ActivityLog::record(
            writes,
            ctx,
            "purchase.deleted",
            Purchase::COLLECTION,
            purchase.id,
            json!({
                "supplier_id": purchase.supplier_id,
                "total_amount": purchase.total_amount,
                "amount_paid": purchase.amount_paid,
                "refund_rows": purchase.payment_history.len(),
                "stock_reversed": purchase.received,
            }),
        )?;
        Ok(purchase.id)
    }

    fn notification(&self, ctx: &LedgerContext, output: &PurchaseId) -> Option<LedgerNotification> {
        Some(LedgerNotification::new(ctx.tenant_id, "purchase.deleted", output.to_string(), ctx.occurred_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use proptest::prelude::*;
    use shopledger_accounting::{Expense, Income, cash_positions};
    use shopledger_infra::document_store::{get_typed, list_typed};
    use shopledger_infra::{InMemoryDocumentStore, LedgerError, LedgerExecutor, RetryPolicy};
    use shopledger_inventory::{AdjustStock, NewProduct, RegisterProduct, StockLevel};
    use shopledger_parties::{PartyDetails, RegisterParty};

    type Executor = LedgerExecutor<InMemoryDocumentStore>;

    struct Fixture {
        executor: Executor,
        ctx: LedgerContext,
        supplier: SupplierId,
        product: ProductId,
        warehouse: WarehouseId,
    }

    fn usd() -> CurrencyCode {
        CurrencyCode::new("USD").unwrap()
    }

    fn cash() -> PaymentMethod {
        PaymentMethod::new("cash").unwrap()
    }

    async fn fixture() -> Fixture {
        let executor = LedgerExecutor::new(InMemoryDocumentStore::new(), RetryPolicy::fixed(5, Duration::from_millis(1)));
        let ctx = LedgerContext::new(TenantId::new(), UserId::new());
        let supplier = executor
            .execute(
                &ctx,
                &RegisterParty::<Supplier>::new(
                    ctx,
                    &PartyDetails {
                        name: "Berbera Wholesale".into(),
                        phone: None,
                    },
                )
                .unwrap(),
            )
            .await
            .unwrap()
            .id;
        let product = executor
            .execute(
                &ctx,
                &RegisterProduct::new(
                    ctx,
                    &NewProduct {
                        name: "Cooking oil 20L".into(),
                        sku: None,
                    },
                )
                .unwrap(),
            )
            .await
            .unwrap()
            .id;

        Fixture {
            executor,
            ctx,
            supplier,
            product,
            warehouse: WarehouseId::new(),
        }
    }

    impl Fixture {
        fn input(&self, quantity: i64, unit_cost: i64, paid: Option<i64>) -> NewPurchase {
            NewPurchase {
                supplier_id: self.supplier,
                currency: usd(),
                items: vec![PurchaseItem {
                    product_id: self.product,
                    warehouse_id: self.warehouse,
                    quantity,
                    unit_cost: Money::from_minor(unit_cost),
                }],
                amount_paid: paid.map(Money::from_minor),
                method: paid.map(|_| cash()),
            }
        }

        async fn record(&self, input: NewPurchase) -> LedgerResult<PurchaseReceipt> {
            let unit = RecordPurchase::new(self.ctx, input)?;
            self.executor.execute(&self.ctx, &unit).await
        }

        async fn pay(&self, id: PurchaseId, amount: i64, key: Option<&str>) -> LedgerResult<PurchasePaymentOutcome> {
            let unit = PayPurchase::new(self.ctx, id, Money::from_minor(amount), usd(), cash(), key.map(str::to_string))?;
            self.executor.execute(&self.ctx, &unit).await
        }

        async fn quantity(&self) -> i64 {
            get_typed::<StockLevel, _>(
                self.executor.store(),
                self.ctx.tenant_id,
                StockLevel::id_for(self.product, self.warehouse),
            )
            .await
            .unwrap()
            .map(|l| l.quantity)
            .unwrap_or(0)
        }

        async fn supplier_doc(&self) -> Supplier {
            get_typed::<Supplier, _>(self.executor.store(), self.ctx.tenant_id, self.supplier)
                .await
                .unwrap()
                .unwrap()
        }
    }

    #[tokio::test]
    async fn unpaid_purchase_stays_pending_without_stock() {
        let f = fixture().await;

        let receipt = f.record(f.input(10, 300, None)).await.unwrap();

        assert_eq!(receipt.status, PurchaseStatus::Pending);
        assert!(!receipt.received);
        assert_eq!(f.quantity().await, 0);
        assert_eq!(f.supplier_doc().await.total_owed.get(&usd()), Money::from_minor(3_000));
    }

    #[tokio::test]
    async fn first_payment_receives_stock_exactly_once() {
        let f = fixture().await;
        let receipt = f.record(f.input(10, 300, None)).await.unwrap();

        let first = f.pay(receipt.purchase_id, 1_000, None).await.unwrap();
        assert_eq!(first.status, PurchaseStatus::PartiallyPaid);
        assert!(first.received_now);
        assert_eq!(f.quantity().await, 10);

        let second = f.pay(receipt.purchase_id, 2_000, None).await.unwrap();
        assert_eq!(second.status, PurchaseStatus::Paid);
        assert!(!second.received_now);
        assert_eq!(f.quantity().await, 10);

        let supplier = f.supplier_doc().await;
        assert_eq!(supplier.total_owed.get(&usd()), Money::ZERO);
        assert_eq!(supplier.total_spent.get(&usd()), Money::from_minor(3_000));

        let expenses = list_typed::<Expense, _>(f.executor.store(), f.ctx.tenant_id).await.unwrap();
        assert_eq!(expenses.len(), 2);
        assert!(expenses.iter().all(|e| e.category == CATEGORY_PURCHASE_PAYMENT));
    }

    #[tokio::test]
    async fn initial_payment_receives_immediately() {
        let f = fixture().await;

        let receipt = f.record(f.input(4, 250, Some(400))).await.unwrap();

        assert_eq!(receipt.status, PurchaseStatus::PartiallyPaid);
        assert!(receipt.received);
        assert_eq!(f.quantity().await, 4);
        let supplier = f.supplier_doc().await;
        assert_eq!(supplier.total_owed.get(&usd()), Money::from_minor(600));
        assert_eq!(supplier.total_spent.get(&usd()), Money::from_minor(400));
    }

    #[tokio::test]
    async fn paid_purchase_rejects_further_payment() {
        let f = fixture().await;
        let receipt = f.record(f.input(1, 500, Some(500))).await.unwrap();
        assert_eq!(receipt.status, PurchaseStatus::Paid);

        let err = f.pay(receipt.purchase_id, 1, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn replayed_payment_key_is_a_duplicate() {
        let f = fixture().await;
        let receipt = f.record(f.input(2, 500, None)).await.unwrap();

        f.pay(receipt.purchase_id, 300, Some("po-77")).await.unwrap();
        let err = f.pay(receipt.purchase_id, 300, Some("po-77")).await.unwrap_err();

        assert!(matches!(err, LedgerError::Domain(DomainError::Duplicate(_))));
        assert_eq!(f.supplier_doc().await.total_spent.get(&usd()), Money::from_minor(300));
    }

    #[tokio::test]
    async fn unknown_supplier_is_not_found() {
        let f = fixture().await;
        let mut input = f.input(1, 100, None);
        input.supplier_id = SupplierId::new();

        let err = f.record(input).await.unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::NotFound(_))));
    }

    #[test]
    fn initial_payment_needs_a_method_and_cannot_exceed_total() {
        let ctx = LedgerContext::new(TenantId::new(), UserId::new());
        let item = PurchaseItem {
            product_id: ProductId::new(),
            warehouse_id: WarehouseId::new(),
            quantity: 2,
            unit_cost: Money::from_minor(100),
        };
        let base = NewPurchase {
            supplier_id: SupplierId::new(),
            currency: usd(),
            items: vec![item],
            amount_paid: Some(Money::from_minor(50)),
            method: None,
        };
        assert!(matches!(RecordPurchase::new(ctx, base.clone()), Err(DomainError::Validation(_))));

        let over = NewPurchase {
            amount_paid: Some(Money::from_minor(201)),
            method: Some(cash()),
            ..base
        };
        assert!(matches!(RecordPurchase::new(ctx, over), Err(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn zero_total_purchase_is_rejected_without_receiving() {
        let f = fixture().await;

        let err = f.record(f.input(3, 0, None)).await.unwrap_err();

        assert!(matches!(err, LedgerError::Domain(DomainError::Validation(_))));
        assert_eq!(f.quantity().await, 0);
        assert_eq!(f.supplier_doc().await.total_owed.get(&usd()), Money::ZERO);
    }

    #[tokio::test]
    async fn delete_reverses_received_stock_and_totals() {
        let f = fixture().await;
        let receipt = f.record(f.input(6, 100, Some(200))).await.unwrap();
        assert_eq!(f.quantity().await, 6);

        f.executor
            .execute(&f.ctx, &DeletePurchase::new(f.ctx, receipt.purchase_id))
            .await
            .unwrap();

        assert_eq!(f.quantity().await, 0);
        let supplier = f.supplier_doc().await;
        assert_eq!(supplier.total_owed.get(&usd()), Money::ZERO);
        assert_eq!(supplier.total_spent.get(&usd()), Money::ZERO);
        let gone = get_typed::<Purchase, _>(f.executor.store(), f.ctx.tenant_id, receipt.purchase_id)
            .await
            .unwrap();
        assert!(gone.is_none());
    }

    #[tokio::test]
    async fn delete_returns_every_payment_as_income() {
        let f = fixture().await;
        let receipt = f.record(f.input(5, 100, Some(200))).await.unwrap();
        f.pay(receipt.purchase_id, 100, None).await.unwrap();

        f.executor
            .execute(&f.ctx, &DeletePurchase::new(f.ctx, receipt.purchase_id))
            .await
            .unwrap();

        let incomes = list_typed::<Income, _>(f.executor.store(), f.ctx.tenant_id).await.unwrap();
        let expenses = list_typed::<Expense, _>(f.executor.store(), f.ctx.tenant_id).await.unwrap();
        let mut refunds: Vec<i64> = incomes
            .iter()
            .filter(|i| i.category == CATEGORY_PURCHASE_REFUND)
            .map(|i| i.amount.minor())
            .collect();
        refunds.sort();
        assert_eq!(refunds, vec![100, 200]);

        let positions = cash_positions(&incomes, &expenses).unwrap();
        assert!(positions.iter().all(|p| p.balance == Money::ZERO));
        assert_eq!(f.supplier_doc().await.total_spent.get(&usd()), Money::ZERO);
    }

    #[tokio::test]
    async fn delete_fails_once_received_stock_was_consumed() {
        let f = fixture().await;
        let receipt = f.record(f.input(6, 100, Some(600))).await.unwrap();
        let draw = AdjustStock::new(
            f.ctx,
            StockChange {
                product_id: f.product,
                warehouse_id: f.warehouse,
                delta: -2,
                reason: "damaged".into(),
            },
        )
        .unwrap();
        f.executor.execute(&f.ctx, &draw).await.unwrap();

        let err = f
            .executor
            .execute(&f.ctx, &DeletePurchase::new(f.ctx, receipt.purchase_id))
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Domain(DomainError::InvariantViolation(_))));
        assert_eq!(f.quantity().await, 4);
        let still_there = get_typed::<Purchase, _>(f.executor.store(), f.ctx.tenant_id, receipt.purchase_id)
            .await
            .unwrap();
        assert!(still_there.is_some());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        #[test]
        fn paid_plus_remaining_equals_total(
            total in 1i64..1_000_000,
            attempts in prop::collection::vec(1i64..300_000, 0..12)
        ) {
            let mut p = Purchase {
                id: PurchaseId::new(),
                tenant_id: TenantId::new(),
                supplier_id: SupplierId::new(),
                currency: usd(),
                items: vec![],
                total_amount: Money::from_minor(total),
                amount_paid: Money::ZERO,
                remaining_amount: Money::from_minor(total),
                status: PurchaseStatus::Pending,
                received: false,
                payment_history: vec![],
                created_by: UserId::new(),
                created_at: Utc::now(),
            };
            for amount in attempts {
                let before = p.clone();
                let result = p.apply_payment(PurchasePayment {
                    amount: Money::from_minor(amount),
                    method: cash(),
                    paid_at: Utc::now(),
                    recorded_by: UserId::new(),
                    idempotency_key: None,
                });
                if result.is_err() {
                    prop_assert_eq!(&p, &before);
                }
                prop_assert_eq!(p.amount_paid.checked_add(p.remaining_amount).unwrap(), p.total_amount);
                prop_assert_eq!(p.status, PurchaseStatus::derive(p.total_amount, p.amount_paid));
            }
        }
    }
}
