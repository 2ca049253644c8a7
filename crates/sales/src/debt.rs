//! Receivables: debts opened by partially paid sales, their payments, and
//! debt deletion.
//!
//! A debt's link to its sale is weak. The sale may be gone by the time a
//! payment arrives; the payment still lands and the missing sale is logged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{instrument, warn};

use shopledger_accounting::{
    CATEGORY_DEBT_PAYMENT, CashEntry, CurrencyLedger, PaymentMethod, TOTAL_OWED, TOTAL_SPENT,
    record_income,
};
use shopledger_core::{
    CurrencyCode, CustomerId, DebtId, DomainError, DomainResult, Money, PaymentStatus, SaleId,
    TenantId, UserId,
};
use shopledger_events::LedgerNotification;
use shopledger_infra::idempotency;
use shopledger_infra::{
    ActivityLog, Document, LedgerContext, LedgerResult, ReadPhase, UnitOfWork, WriteSet,
};
use shopledger_parties::Customer;

use crate::sale::Sale;

const PAY_OPERATION: &str = "debt.pay";

/// One recorded payment against a debt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtPayment {
    pub amount: Money,
    pub method: PaymentMethod,
    pub paid_at: DateTime<Utc>,
    pub recorded_by: UserId,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Receivable. `total_paid + amount_due == total_amount` holds after every
/// entry of `payment_history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Debt {
    pub id: DebtId,
    pub tenant_id: TenantId,
    pub customer_id: Option<CustomerId>,
    pub currency: CurrencyCode,
    pub total_amount: Money,
    pub total_paid: Money,
    pub amount_due: Money,
    pub status: PaymentStatus,
    pub related_sale_id: Option<SaleId>,
    #[serde(default)]
    pub payment_history: Vec<DebtPayment>,
    pub created_at: DateTime<Utc>,
}

impl Document for Debt {
    const COLLECTION: &'static str = "debts";

    fn doc_id(&self) -> String {
        self.id.to_string()
    }
}

impl Debt {
    /// A fresh, unpaid debt of `principal`.
    pub fn open(
        tenant_id: TenantId,
        customer_id: Option<CustomerId>,
        currency: CurrencyCode,
        principal: Money,
        related_sale_id: Option<SaleId>,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if !principal.is_positive() {
            return Err(DomainError::invariant("debt principal must be positive"));
        }
        Ok(Self {
            id: DebtId::new(),
            tenant_id,
            customer_id,
            currency,
            total_amount: principal,
            total_paid: Money::ZERO,
            amount_due: principal,
            status: PaymentStatus::Unpaid,
            related_sale_id,
            payment_history: Vec::new(),
            created_at,
        })
    }

    /// Apply a payment: `total_paid += amount`, `amount_due -= amount`.
    pub fn apply_payment(&mut self, payment: DebtPayment) -> DomainResult<()> {
        if !payment.amount.is_positive() {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        if payment.amount > self.amount_due {
            return Err(DomainError::invariant(format!(
                "payment exceeds amount due: {} > {}",
                payment.amount, self.amount_due
            )));
        }

        self.total_paid = self.total_paid.checked_add(payment.amount)?;
        self.amount_due = self.amount_due.checked_sub(payment.amount)?;
        self.status = PaymentStatus::derive(self.total_amount, self.total_paid);
        self.payment_history.push(payment);
        Ok(())
    }

    /// Replays `payment_history` and checks the balance identity after every
    /// entry, and that the stored totals match the replay.
    pub fn history_is_consistent(&self) -> bool {
        let mut paid = Money::ZERO;
        for entry in &self.payment_history {
            paid = match paid.checked_add(entry.amount) {
                Ok(p) => p,
                Err(_) => return false,
            };
            if paid > self.total_amount {
                return false;
            }
        }
        paid == self.total_paid
            && self.total_paid.checked_add(self.amount_due).ok() == Some(self.total_amount)
    }
}

/// Result of a debt payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentOutcome {
    pub debt_id: DebtId,
    pub status: PaymentStatus,
    pub total_paid: Money,
    pub amount_due: Money,
}

#[derive(Debug)]
pub struct PaymentReads {
    debt: Debt,
    sale: Option<Sale>,
    customer_exists: bool,
}

/// Unit: record a payment against an open debt.
pub struct PayDebt {
    ctx: LedgerContext,
    debt_id: DebtId,
    amount: Money,
    currency: CurrencyCode,
    method: PaymentMethod,
    idempotency_key: Option<String>,
}

impl PayDebt {
    pub fn new(
        ctx: LedgerContext,
        debt_id: DebtId,
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
            debt_id,
            amount,
            currency,
            method,
            idempotency_key,
        })
    }
}

#[async_trait]
impl UnitOfWork for PayDebt {
    type Reads = PaymentReads;
    type Output = PaymentOutcome;

    fn name(&self) -> &'static str {
        "debt.pay"
    }

    #[instrument(skip_all, fields(debt_id = %self.debt_id))]
    async fn collect_reads(&self, reads: &mut ReadPhase<'_>) -> LedgerResult<PaymentReads> {
        idempotency::ensure_unused(reads, PAY_OPERATION, self.idempotency_key.as_deref()).await?;

        let debt = reads.require::<Debt>(self.debt_id).await?;
        let sale = match debt.related_sale_id {
            Some(sale_id) => reads.get::<Sale>(sale_id).await?,
            None => None,
        };
        let customer_exists = match debt.customer_id {
            Some(customer_id) => reads.exists::<Customer>(customer_id).await?,
            None => false,
        };

        Ok(PaymentReads {
            debt,
            sale,
            customer_exists,
        })
    }

    fn compute_writes(&self, reads: PaymentReads, writes: &mut WriteSet) -> LedgerResult<PaymentOutcome> {
        let PaymentReads {
            mut debt,
            sale,
            customer_exists,
        } = reads;

        if self.currency != debt.currency {
            return Err(DomainError::validation(format!(
                "payment currency {} does not match debt currency {}",
                self.currency, debt.currency
            ))
            .into());
        }

        debt.apply_payment(DebtPayment {
            amount: self.amount,
            method: self.method.clone(),
            paid_at: self.ctx.occurred_at,
            recorded_by: self.ctx.actor,
            idempotency_key: self.idempotency_key.clone(),
        })?;
        writes.set(&debt)?;

        record_income(
            writes,
            &self.ctx,
            CashEntry {
                amount: self.amount,
                currency: &debt.currency,
                category: CATEGORY_DEBT_PAYMENT,
                method: &self.method,
                related_entity_id: Some(debt.id.to_string()),
            },
        )?;

        match debt.customer_id {
            Some(customer_id) if customer_exists => {
                CurrencyLedger::<Customer>::new(writes, customer_id, TOTAL_OWED).debit(&debt.currency, self.amount);
                CurrencyLedger::<Customer>::new(writes, customer_id, TOTAL_SPENT).credit(&debt.currency, self.amount);
            }
            Some(customer_id) => {
                warn!(debt_id = %debt.id, customer_id = %customer_id, "debt customer missing; totals not updated");
            }
            None => {}
        }

        match (debt.related_sale_id, sale) {
            (Some(_), Some(mut sale)) if !sale.is_voided() => {
                sale.settle_balance(self.amount, false)?;
                writes.set(&sale)?;
            }
            (Some(sale_id), Some(_)) => {
                warn!(debt_id = %debt.id, sale_id = %sale_id, "linked sale is voided; sale not recomputed");
            }
            (Some(sale_id), None) => {
                warn!(debt_id = %debt.id, sale_id = %sale_id, "linked sale missing; sale not recomputed");
            }
            (None, _) => {}
        }

        idempotency::remember(writes, &self.ctx, PAY_OPERATION, self.idempotency_key.as_deref(), debt.id)?;

        ActivityLog::record(
            writes,
            &self.ctx,
            "debt.payment_recorded",
            Debt::COLLECTION,
            debt.id,
            json!({
                "amount": self.amount,
                "currency": debt.currency,
                "method": self.method,
                "amount_due": debt.amount_due,
                "status": debt.status,
            }),
        )?;

        Ok(PaymentOutcome {
            debt_id: debt.id,
            status: debt.status,
            total_paid: debt.total_paid,
            amount_due: debt.amount_due,
        })
    }

    fn notification(&self, ctx: &LedgerContext, output: &PaymentOutcome) -> Option<LedgerNotification> {
        Some(
            LedgerNotification::new(ctx.tenant_id, "debt.payment_recorded", output.debt_id.to_string(), ctx.occurred_at)
                .with_payload(json!({
                    "amount": self.amount,
                    "currency": self.currency,
                    "amount_due": output.amount_due,
                    "status": output.status,
                })),
        )
    }
}

#[derive(Debug)]
pub struct DeleteReads {
    debt: Debt,
    sale: Option<Sale>,
    customer: Option<Customer>,
}

/// Unit: delete a debt, writing its outstanding balance off.
///
/// The customer's `total_owed` drops by the outstanding amount and the linked
/// sale (if still live) moves the same amount from `debt_amount` into
/// `amount_paid`, recorded as `written_off`. Both adjustments are clamped so
/// no total goes negative. Payments already made against the debt move onto
/// the sale so a later void can refund them.
pub struct DeleteDebt {
    ctx: LedgerContext,
    debt_id: DebtId,
}

impl DeleteDebt {
    pub fn new(ctx: LedgerContext, debt_id: DebtId) -> Self {
        Self { ctx, debt_id }
    }
}

#[async_trait]
impl UnitOfWork for DeleteDebt {
    type Reads = DeleteReads;
    type Output = DebtId;

    fn name(&self) -> &'static str {
        "debt.delete"
    }

    #[instrument(skip_all, fields(debt_id = %self.debt_id))]
    async fn collect_reads(&self, reads: &mut ReadPhase<'_>) -> LedgerResult<DeleteReads> {
        let debt = reads.require::<Debt>(self.debt_id).await?;
        let sale = match debt.related_sale_id {
            Some(sale_id) => reads.get::<Sale>(sale_id).await?,
            None => None,
        };
        let customer = match debt.customer_id {
            Some(customer_id) => reads.get::<Customer>(customer_id).await?,
            None => None,
        };
        Ok(DeleteReads { debt, sale, customer })
    }

    fn compute_writes(&self, reads: DeleteReads, writes: &mut WriteSet) -> LedgerResult<DebtId> {
        let DeleteReads { debt, sale, customer } = reads;

        let owed_released = match &customer {
            Some(customer) => CurrencyLedger::<Customer>::new(writes, customer.id, TOTAL_OWED).debit_clamped(
                &debt.currency,
                debt.amount_due,
                &customer.total_owed,
            ),
            None => Money::ZERO,
        };

        let mut written_off = Money::ZERO;
        match (debt.related_sale_id, sale) {
            (Some(_), Some(mut sale)) if !sale.is_voided() => {
                written_off = sale.settle_balance(debt.amount_due, true)?;
                sale.debt_id = None;
                sale.debt_payments.extend(debt.payment_history.iter().cloned());
                writes.set(&sale)?;
            }
            (Some(sale_id), None) => {
                warn!(debt_id = %debt.id, sale_id = %sale_id, "linked sale missing; nothing to write off");
            }
            _ => {}
        }

        writes.delete::<Debt>(debt.id);

        ActivityLog::record(
            writes,
            &self.ctx,
            "debt.deleted",
            Debt::COLLECTION,
            debt.id,
            json!({
                "amount_due": debt.amount_due,
                "currency": debt.currency,
                "owed_released": owed_released,
                "written_off": written_off,
                "related_sale_id": debt.related_sale_id,
            }),
        )?;
        Ok(debt.id)
    }

    fn notification(&self, ctx: &LedgerContext, output: &DebtId) -> Option<LedgerNotification> {
        Some(LedgerNotification::new(ctx.tenant_id, "debt.deleted", output.to_string(), ctx.occurred_at))
    }
}
