//! Income / expense rows and the cash positions derived from them.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use shopledger_core::{CurrencyCode, DomainError, DomainResult, EntryId, Money, TenantId, UserId};
use shopledger_events::LedgerNotification;
use shopledger_infra::{
    ActivityLog, Document, LedgerContext, LedgerResult, ReadPhase, UnitOfWork, WriteSet,
};

pub const CATEGORY_SALE: &str = "Sale";
pub const CATEGORY_DEBT_PAYMENT: &str = "Debt Payment";
pub const CATEGORY_PURCHASE_PAYMENT: &str = "Purchase Payment";
pub const CATEGORY_SALE_REFUND: &str = "Sale Refund";
pub const CATEGORY_PURCHASE_REFUND: &str = "Purchase Refund";

/// Tender used for a payment (`cash`, `zaad`, `card`, ...). Tenants define
/// their own set, so this is an open, normalized string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaymentMethod(String);

impl PaymentMethod {
    pub fn new(method: impl AsRef<str>) -> DomainResult<Self> {
        let method = method.as_ref().trim().to_lowercase();
        if method.is_empty() {
            return Err(DomainError::validation("payment method must not be blank"));
        }
        Ok(Self(method))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PaymentMethod {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PaymentMethod> for String {
    fn from(value: PaymentMethod) -> Self {
        value.0
    }
}

/// Immutable cash-in row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Income {
    pub id: EntryId,
    pub tenant_id: TenantId,
    pub amount: Money,
    pub currency: CurrencyCode,
    pub category: String,
    pub payment_method: PaymentMethod,
    pub related_entity_id: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl Document for Income {
    const COLLECTION: &'static str = "incomes";

    fn doc_id(&self) -> String {
        self.id.to_string()
    }
}

/// Immutable cash-out row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: EntryId,
    pub tenant_id: TenantId,
    pub amount: Money,
    pub currency: CurrencyCode,
    pub category: String,
    pub payment_method: PaymentMethod,
    pub related_entity_id: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl Document for Expense {
    const COLLECTION: &'static str = "expenses";

    fn doc_id(&self) -> String {
        self.id.to_string()
    }
}

/// One cash movement to record inside a unit.
#[derive(Debug, Clone)]
pub struct CashEntry<'a> {
    pub amount: Money,
    pub currency: &'a CurrencyCode,
    pub category: &'a str,
    pub method: &'a PaymentMethod,
    pub related_entity_id: Option<String>,
}

pub fn record_income(writes: &mut WriteSet, ctx: &LedgerContext, entry: CashEntry<'_>) -> LedgerResult<EntryId> {
    let id = EntryId::new();
    writes.create(&Income {
        id,
        tenant_id: ctx.tenant_id,
        amount: entry.amount,
        currency: entry.currency.clone(),
        category: entry.category.to_string(),
        payment_method: entry.method.clone(),
        related_entity_id: entry.related_entity_id,
        created_by: ctx.actor,
        created_at: ctx.occurred_at,
    })?;
    Ok(id)
}

pub fn record_expense(
    writes: &mut WriteSet,
    ctx: &LedgerContext,
    entry: CashEntry<'_>,
    note: Option<String>,
) -> LedgerResult<EntryId> {
    let id = EntryId::new();
    writes.create(&Expense {
        id,
        tenant_id: ctx.tenant_id,
        amount: entry.amount,
        currency: entry.currency.clone(),
        category: entry.category.to_string(),
        payment_method: entry.method.clone(),
        related_entity_id: entry.related_entity_id,
        note,
        created_by: ctx.actor,
        created_at: ctx.occurred_at,
    })?;
    Ok(id)
}

/// Derived balance for one (payment method, currency) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CashPosition {
    pub method: PaymentMethod,
    pub currency: CurrencyCode,
    pub balance: Money,
}

/// Income minus expense per (method, currency), from committed rows only.
pub fn cash_positions(incomes: &[Income], expenses: &[Expense]) -> DomainResult<Vec<CashPosition>> {
    let mut balances: BTreeMap<(PaymentMethod, CurrencyCode), Money> = BTreeMap::new();

    for row in incomes {
        let slot = balances
            .entry((row.payment_method.clone(), row.currency.clone()))
            .or_default();
        *slot = slot.checked_add(row.amount)?;
    }
    for row in expenses {
        let slot = balances
            .entry((row.payment_method.clone(), row.currency.clone()))
            .or_default();
        *slot = slot.checked_sub(row.amount)?;
    }

    Ok(balances
        .into_iter()
        .map(|((method, currency), balance)| CashPosition { method, currency, balance })
        .collect())
}

/// Manually entered expense (rent, utilities, ...).
#[derive(Debug, Clone)]
pub struct ManualExpense {
    pub category: String,
    pub amount: Money,
    pub currency: CurrencyCode,
    pub method: PaymentMethod,
    pub reason: String,
}

impl ManualExpense {
    pub fn validate(&self) -> DomainResult<()> {
        if self.category.trim().is_empty() {
            return Err(DomainError::validation("expense category must not be blank"));
        }
        if !self.amount.is_positive() {
            return Err(DomainError::validation("expense amount must be positive"));
        }
        if self.reason.trim().is_empty() {
            return Err(DomainError::validation("expense reason must not be blank"));
        }
        Ok(())
    }
}

/// Unit: record a manual expense with its audit row.
pub struct RecordExpense {
    ctx: LedgerContext,
    expense: ManualExpense,
}

impl RecordExpense {
    pub fn new(ctx: LedgerContext, expense: ManualExpense) -> DomainResult<Self> {
        expense.validate()?;
        Ok(Self { ctx, expense })
    }
}

#[async_trait]
impl UnitOfWork for RecordExpense {
    type Reads = ();
    type Output = EntryId;

    fn name(&self) -> &'static str {
        "expense.record"
    }

    async fn collect_reads(&self, _reads: &mut ReadPhase<'_>) -> LedgerResult<()> {
        Ok(())
    }

    fn compute_writes(&self, _reads: (), writes: &mut WriteSet) -> LedgerResult<EntryId> {
        let e = &self.expense;
        let id = record_expense(
            writes,
            &self.ctx,
            CashEntry {
                amount: e.amount,
                currency: &e.currency,
                category: &e.category,
                method: &e.method,
                related_entity_id: None,
            },
            Some(e.reason.clone()),
        )?;

        ActivityLog::record(
            writes,
            &self.ctx,
            "expense.recorded",
            Expense::COLLECTION,
            id,
            json!({
                "category": e.category,
                "amount": e.amount,
                "currency": e.currency,
                "method": e.method,
                "reason": e.reason,
            }),
        )?;
        Ok(id)
    }

    fn notification(&self, ctx: &LedgerContext, output: &EntryId) -> Option<LedgerNotification> {
        Some(LedgerNotification::new(ctx.tenant_id, "expense.recorded", output.to_string(), ctx.occurred_at))
    }
}
