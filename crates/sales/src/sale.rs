//! Sale processing and sale voiding.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{instrument, warn};

use shopledger_accounting::{
    CATEGORY_SALE, CATEGORY_SALE_REFUND, CashEntry, CurrencyLedger, PaymentMethod, TOTAL_OWED,
    TOTAL_SPENT, record_expense, record_income,
};
use shopledger_core::{
    CurrencyCode, CustomerId, DebtId, DomainError, DomainResult, Money, PaymentStatus, ProductId,
    SaleId, TenantId, UserId, WarehouseId,
};
use shopledger_events::LedgerNotification;
use shopledger_infra::{
    ActivityLog, Document, LedgerContext, LedgerResult, ReadPhase, UnitOfWork, WriteSet,
};
use shopledger_inventory::{StockBook, StockChange};
use shopledger_parties::{Customer, Party, PartyDetails};

use crate::debt::{Debt, DebtPayment};

/// Who the sale is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CustomerRef {
    Existing { id: CustomerId },
    WalkIn,
    /// Registered in the same unit as the sale.
    New(PartyDetails),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleItem {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
    pub unit_price: Money,
}

/// Payment line as submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalePayment {
    pub method: PaymentMethod,
    pub currency: CurrencyCode,
    pub amount: Money,
    /// Value in the invoice currency; required when `currency` differs.
    #[serde(default)]
    pub converted_amount: Option<Money>,
}

/// Payment line as stored, with the invoice-currency value resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettledPayment {
    pub method: PaymentMethod,
    pub currency: CurrencyCode,
    pub amount: Money,
    pub converted_amount: Money,
}

impl SalePayment {
    /// Resolve the invoice-currency value. No exchange rate is ever assumed.
    pub fn settle(&self, invoice_currency: &CurrencyCode) -> DomainResult<SettledPayment> {
        if !self.amount.is_positive() {
            return Err(DomainError::validation("payment amount must be positive"));
        }

        let converted_amount = if &self.currency == invoice_currency {
            match self.converted_amount {
                Some(converted) if converted != self.amount => {
                    return Err(DomainError::validation(
                        "converted_amount must equal amount for a payment in the invoice currency",
                    ));
                }
                _ => self.amount,
            }
        } else {
            match self.converted_amount {
                Some(converted) if converted.is_positive() => converted,
                Some(_) => return Err(DomainError::validation("converted_amount must be positive")),
                None => {
                    return Err(DomainError::validation(format!(
                        "payment in {} needs converted_amount in {}",
                        self.currency, invoice_currency
                    )));
                }
            }
        };

        Ok(SettledPayment {
            method: self.method.clone(),
            currency: self.currency.clone(),
            amount: self.amount,
            converted_amount,
        })
    }
}

/// Derived sale amounts. `amount_paid + debt_amount == total_amount`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleAmounts {
    pub total_amount: Money,
    pub amount_paid: Money,
    pub debt_amount: Money,
    pub status: PaymentStatus,
}

impl SaleAmounts {
    pub fn derive(total_amount: Money, amount_paid: Money) -> DomainResult<Self> {
        if amount_paid > total_amount {
            return Err(DomainError::validation(format!(
                "overpayment: paid {amount_paid} against a total of {total_amount}"
            )));
        }
        Ok(Self {
            total_amount,
            amount_paid,
            debt_amount: total_amount.checked_sub(amount_paid)?,
            status: PaymentStatus::derive(total_amount, amount_paid),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub id: SaleId,
    pub tenant_id: TenantId,
    /// `None` for walk-in sales.
    pub customer_id: Option<CustomerId>,
    pub currency: CurrencyCode,
    pub items: Vec<SaleItem>,
    pub payments: Vec<SettledPayment>,
    pub total_amount: Money,
    pub amount_paid: Money,
    pub debt_amount: Money,
    /// Part of `amount_paid` that was written off by deleting the debt
    /// rather than received.
    #[serde(default)]
    pub written_off: Money,
    pub status: PaymentStatus,
    pub debt_id: Option<DebtId>,
    /// Payments collected through the debt before it was deleted. Refunded
    /// on void alongside `payments`.
    #[serde(default)]
    pub debt_payments: Vec<DebtPayment>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub voided_at: Option<DateTime<Utc>>,
}

impl Document for Sale {
    const COLLECTION: &'static str = "sales";

    fn doc_id(&self) -> String {
        self.id.to_string()
    }
}

impl Sale {
    pub fn is_voided(&self) -> bool {
        self.status == PaymentStatus::Voided
    }

    /// What the customer actually handed over for this sale.
    pub fn cash_received(&self) -> Money {
        self.amount_paid.saturating_remaining(self.written_off)
    }

    /// Move up to `amount` from `debt_amount` into `amount_paid` and
    /// re-derive the status. Returns the amount moved.
    pub fn settle_balance(&mut self, amount: Money, write_off: bool) -> DomainResult<Money> {
        let moved = amount.min(self.debt_amount).max(Money::ZERO);
        self.debt_amount = self.debt_amount.checked_sub(moved)?;
        self.amount_paid = self.amount_paid.checked_add(moved)?;
        if write_off {
            self.written_off = self.written_off.checked_add(moved)?;
        }
        self.status = PaymentStatus::derive(self.total_amount, self.amount_paid);
        Ok(moved)
    }
}

/// Sale request as received from the intake layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSale {
    pub customer: CustomerRef,
    pub currency: CurrencyCode,
    pub items: Vec<SaleItem>,
    #[serde(default)]
    pub payments: Vec<SalePayment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaleReceipt {
    pub sale_id: SaleId,
    pub status: PaymentStatus,
    pub customer_id: Option<CustomerId>,
    pub debt_id: Option<DebtId>,
    pub total_amount: Money,
    pub amount_paid: Money,
    pub debt_amount: Money,
}

/// Unit: record a sale.
///
/// Creates the sale, draws stock for every line, opens a linked debt for any
/// unpaid balance, writes one income row per payment line and credits the
/// customer's totals, all in one commit.
pub struct RecordSale {
    ctx: LedgerContext,
    customer: CustomerRef,
    currency: CurrencyCode,
    items: Vec<SaleItem>,
    payments: Vec<SettledPayment>,
    amounts: SaleAmounts,
}

impl RecordSale {
    /// Validates the whole request; nothing is read until this succeeds.
    pub fn new(ctx: LedgerContext, input: NewSale) -> DomainResult<Self> {
        if input.items.is_empty() {
            return Err(DomainError::validation("a sale needs at least one item"));
        }

        let mut line_totals = Vec::with_capacity(input.items.len());
        for item in &input.items {
            if item.quantity <= 0 {
                return Err(DomainError::validation(format!(
                    "quantity for product {} must be positive",
                    item.product_id
                )));
            }
            if item.unit_price.is_negative() {
                return Err(DomainError::validation(format!(
                    "unit price for product {} cannot be negative",
                    item.product_id
                )));
            }
            line_totals.push(item.unit_price.checked_mul(item.quantity)?);
        }
        let total_amount = Money::sum(line_totals)?;

        let payments = input
            .payments
            .iter()
            .map(|p| p.settle(&input.currency))
            .collect::<DomainResult<Vec<_>>>()?;
        let amount_paid = Money::sum(payments.iter().map(|p| p.converted_amount))?;
        let amounts = SaleAmounts::derive(total_amount, amount_paid)?;

        let customer = match input.customer {
            CustomerRef::New(details) => CustomerRef::New(details.normalized()?),
            other => other,
        };

        Ok(Self {
            ctx,
            customer,
            currency: input.currency,
            items: input.items,
            payments,
            amounts,
        })
    }

    pub fn amounts(&self) -> SaleAmounts {
        self.amounts
    }
}

#[async_trait]
impl UnitOfWork for RecordSale {
    type Reads = StockBook;
    type Output = SaleReceipt;

    fn name(&self) -> &'static str {
        "sale.record"
    }

    #[instrument(skip_all, fields(items = self.items.len()))]
    async fn collect_reads(&self, reads: &mut ReadPhase<'_>) -> LedgerResult<StockBook> {
        let mut book = StockBook::new();
        for item in &self.items {
            book.load(reads, item.product_id, item.warehouse_id).await?;
        }

        if let CustomerRef::Existing { id } = &self.customer {
            if !reads.exists::<Customer>(id).await? {
                return Err(DomainError::not_found(format!("{} {id}", Customer::COLLECTION)).into());
            }
        }
        Ok(book)
    }

    fn compute_writes(&self, mut book: StockBook, writes: &mut WriteSet) -> LedgerResult<SaleReceipt> {
        let ctx = &self.ctx;
        let sale_id = SaleId::new();
        let amounts = self.amounts;

        let customer_id = match &self.customer {
            CustomerRef::Existing { id } => Some(*id),
            CustomerRef::WalkIn => None,
            CustomerRef::New(details) => {
                let customer = Customer::open(ctx.tenant_id, details.clone(), ctx.occurred_at);
                writes.create(&customer)?;
                Some(customer.id)
            }
        };

        for item in &self.items {
            book.adjust(
                ctx,
                &StockChange {
                    product_id: item.product_id,
                    warehouse_id: item.warehouse_id,
                    delta: -item.quantity,
                    reason: format!("sale {sale_id}"),
                },
            )?;
        }
        book.write_into(writes)?;

        let debt_id = if amounts.debt_amount.is_positive() {
            let debt = Debt::open(
                ctx.tenant_id,
                customer_id,
                self.currency.clone(),
                amounts.debt_amount,
                Some(sale_id),
                ctx.occurred_at,
            )?;
            writes.create(&debt)?;
            Some(debt.id)
        } else {
            None
        };

        writes.create(&Sale {
            id: sale_id,
            tenant_id: ctx.tenant_id,
            customer_id,
            currency: self.currency.clone(),
            items: self.items.clone(),
            payments: self.payments.clone(),
            total_amount: amounts.total_amount,
            amount_paid: amounts.amount_paid,
            debt_amount: amounts.debt_amount,
            written_off: Money::ZERO,
            status: amounts.status,
            debt_id,
            debt_payments: Vec::new(),
            created_by: ctx.actor,
            created_at: ctx.occurred_at,
            voided_at: None,
        })?;

        for payment in &self.payments {
            record_income(
                writes,
                ctx,
                CashEntry {
                    amount: payment.amount,
                    currency: &payment.currency,
                    category: CATEGORY_SALE,
                    method: &payment.method,
                    related_entity_id: Some(sale_id.to_string()),
                },
            )?;
        }

        if let Some(customer_id) = customer_id {
            CurrencyLedger::<Customer>::new(writes, customer_id, TOTAL_SPENT).credit(&self.currency, amounts.amount_paid);
            CurrencyLedger::<Customer>::new(writes, customer_id, TOTAL_OWED).credit(&self.currency, amounts.debt_amount);
        }

        ActivityLog::record(
            writes,
            ctx,
            "sale.recorded",
            Sale::COLLECTION,
            sale_id,
            json!({
                "customer_id": customer_id,
                "currency": self.currency,
                "total_amount": amounts.total_amount,
                "amount_paid": amounts.amount_paid,
                "debt_amount": amounts.debt_amount,
                "status": amounts.status,
                "debt_id": debt_id,
            }),
        )?;

        Ok(SaleReceipt {
            sale_id,
            status: amounts.status,
            customer_id,
            debt_id,
            total_amount: amounts.total_amount,
            amount_paid: amounts.amount_paid,
            debt_amount: amounts.debt_amount,
        })
    }

    fn notification(&self, ctx: &LedgerContext, output: &SaleReceipt) -> Option<LedgerNotification> {
        Some(
            LedgerNotification::new(ctx.tenant_id, "sale.recorded", output.sale_id.to_string(), ctx.occurred_at)
                .with_payload(json!({
                    "status": output.status,
                    "total_amount": output.total_amount,
                    "currency": self.currency,
                })),
        )
    }
}

#[derive(Debug)]
pub struct VoidReads {
    sale: Sale,
    debt: Option<Debt>,
    customer: Option<Customer>,
    book: StockBook,
}

/// Unit: void a sale.
///
/// Restores stock, refunds every payment as an expense, backs the sale out of
/// the customer's totals and removes its debt. A voided sale stays on record
/// with status `voided`.
pub struct VoidSale {
    ctx: LedgerContext,
    sale_id: SaleId,
}

impl VoidSale {
    pub fn new(ctx: LedgerContext, sale_id: SaleId) -> Self {
        Self { ctx, sale_id }
    }
}

#[async_trait]
impl UnitOfWork for VoidSale {
    type Reads = VoidReads;
    type Output = SaleId;

    fn name(&self) -> &'static str {
        "sale.void"
    }

    #[instrument(skip_all, fields(sale_id = %self.sale_id))]
    async fn collect_reads(&self, reads: &mut ReadPhase<'_>) -> LedgerResult<VoidReads> {
        let sale = reads.require::<Sale>(self.sale_id).await?;
        if sale.is_voided() {
            return Err(DomainError::invariant(format!("sale {} is already voided", sale.id)).into());
        }

        let mut book = StockBook::new();
        for item in &sale.items {
            book.load(reads, item.product_id, item.warehouse_id).await?;
        }

        let debt = match sale.debt_id {
            Some(debt_id) => {
                let debt = reads.get::<Debt>(debt_id).await?;
                if debt.is_none() {
                    warn!(sale_id = %sale.id, debt_id = %debt_id, "linked debt missing; voiding without it");
                }
                debt
            }
            None => None,
        };
        let customer = match sale.customer_id {
            Some(customer_id) => reads.get::<Customer>(customer_id).await?,
            None => None,
        };

        Ok(VoidReads {
            sale,
            debt,
            customer,
            book,
        })
    }

    fn compute_writes(&self, reads: VoidReads, writes: &mut WriteSet) -> LedgerResult<SaleId> {
        let VoidReads {
            mut sale,
            debt,
            customer,
            mut book,
        } = reads;
        let ctx = &self.ctx;

        for item in &sale.items {
            book.adjust(
                ctx,
                &StockChange {
                    product_id: item.product_id,
                    warehouse_id: item.warehouse_id,
                    delta: item.quantity,
                    reason: format!("void sale {}", sale.id),
                },
            )?;
        }
        book.write_into(writes)?;

        let related = Some(sale.id.to_string());
        let mut refunds = 0usize;
        for payment in &sale.payments {
            record_expense(
                writes,
                ctx,
                CashEntry {
                    amount: payment.amount,
                    currency: &payment.currency,
                    category: CATEGORY_SALE_REFUND,
                    method: &payment.method,
                    related_entity_id: related.clone(),
                },
                None,
            )?;
            refunds += 1;
        }
        let debt_history = debt.iter().flat_map(|d| d.payment_history.iter());
        for payment in sale.debt_payments.iter().chain(debt_history) {
            record_expense(
                writes,
                ctx,
                CashEntry {
                    amount: payment.amount,
                    currency: &sale.currency,
                    category: CATEGORY_SALE_REFUND,
                    method: &payment.method,
                    related_entity_id: related.clone(),
                },
                None,
            )?;
            refunds += 1;
        }

        if let Some(customer) = &customer {
            CurrencyLedger::<Customer>::new(writes, customer.id, TOTAL_SPENT).debit_clamped(
                &sale.currency,
                sale.cash_received(),
                &customer.total_spent,
            );
            if let Some(debt) = &debt {
                CurrencyLedger::<Customer>::new(writes, customer.id, TOTAL_OWED).debit_clamped(
                    &debt.currency,
                    debt.amount_due,
                    &customer.total_owed,
                );
            }
        } else if let Some(customer_id) = sale.customer_id {
            warn!(sale_id = %sale.id, customer_id = %customer_id, "sale customer missing; totals not reversed");
        }

        if let Some(debt) = &debt {
            writes.delete::<Debt>(debt.id);
        }

        sale.status = PaymentStatus::Voided;
        sale.debt_id = None;
        sale.voided_at = Some(ctx.occurred_at);
        writes.set(&sale)?;

        ActivityLog::record(
            writes,
            ctx,
            "sale.voided",
            Sale::COLLECTION,
            sale.id,
            json!({
                "total_amount": sale.total_amount,
                "refunded": sale.cash_received(),
                "refund_rows": refunds,
                "debt_removed": debt.as_ref().map(|d| d.id),
            }),
        )?;
        Ok(sale.id)
    }

    fn notification(&self, ctx: &LedgerContext, output: &SaleId) -> Option<LedgerNotification> {
        Some(LedgerNotification::new(ctx.tenant_id, "sale.voided", output.to_string(), ctx.occurred_at))
    }
}
