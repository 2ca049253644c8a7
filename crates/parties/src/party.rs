use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use shopledger_accounting::CurrencyTotals;
use shopledger_core::{CustomerId, DomainError, DomainResult, SupplierId, TenantId};
use shopledger_events::LedgerNotification;
use shopledger_infra::{
    ActivityLog, Document, LedgerContext, LedgerResult, ReadPhase, UnitOfWork, WriteSet,
};

const MAX_NAME_LEN: usize = 200;

/// Name and contact details supplied when a party is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyDetails {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

impl PartyDetails {
    /// Trim fields, turn a blank phone into `None`, reject a blank or
    /// oversized name.
    pub fn normalized(&self) -> DomainResult<Self> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("party name cannot be empty"));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(DomainError::validation(format!(
                "party name longer than {MAX_NAME_LEN} characters"
            )));
        }

        let phone = self
            .phone
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        Ok(Self {
            name: name.to_string(),
            phone,
        })
    }
}

/// Customer document. `total_owed` is the receivable still open across debts;
/// `total_spent` is what the customer has paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub tenant_id: TenantId,
    pub name: String,
    pub phone: Option<String>,
    #[serde(default)]
    pub total_owed: CurrencyTotals,
    #[serde(default)]
    pub total_spent: CurrencyTotals,
    pub created_at: DateTime<Utc>,
}

impl Document for Customer {
    const COLLECTION: &'static str = "customers";

    fn doc_id(&self) -> String {
        self.id.to_string()
    }
}

/// Supplier document. `total_owed` is what the shop still owes the supplier;
/// `total_spent` is what the shop has paid them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    pub id: SupplierId,
    pub tenant_id: TenantId,
    pub name: String,
    pub phone: Option<String>,
    #[serde(default)]
    pub total_owed: CurrencyTotals,
    #[serde(default)]
    pub total_spent: CurrencyTotals,
    pub created_at: DateTime<Utc>,
}

impl Document for Supplier {
    const COLLECTION: &'static str = "suppliers";

    fn doc_id(&self) -> String {
        self.id.to_string()
    }
}

/// Shared shape of customers and suppliers.
pub trait Party: Document + Clone + 'static {
    /// Singular entity name used in audit rows and notifications.
    const KIND: &'static str;

    /// A fresh party with empty totals.
    fn open(tenant_id: TenantId, details: PartyDetails, created_at: DateTime<Utc>) -> Self;
}

impl Party for Customer {
    const KIND: &'static str = "customer";

    fn open(tenant_id: TenantId, details: PartyDetails, created_at: DateTime<Utc>) -> Self {
        Self {
            id: CustomerId::new(),
            tenant_id,
            name: details.name,
            phone: details.phone,
            total_owed: CurrencyTotals::new(),
            total_spent: CurrencyTotals::new(),
            created_at,
        }
    }
}

impl Party for Supplier {
    const KIND: &'static str = "supplier";

    fn open(tenant_id: TenantId, details: PartyDetails, created_at: DateTime<Utc>) -> Self {
        Self {
            id: SupplierId::new(),
            tenant_id,
            name: details.name,
            phone: details.phone,
            total_owed: CurrencyTotals::new(),
            total_spent: CurrencyTotals::new(),
            created_at,
        }
    }
}

/// Unit: register a customer or supplier.
pub struct RegisterParty<P> {
    ctx: LedgerContext,
    details: PartyDetails,
    _kind: PhantomData<fn() -> P>,
}

impl<P: Party> RegisterParty<P> {
    pub fn new(ctx: LedgerContext, details: &PartyDetails) -> DomainResult<Self> {
        Ok(Self {
            ctx,
            details: details.normalized()?,
            _kind: PhantomData,
        })
    }
}

#[async_trait]
impl<P: Party> UnitOfWork for RegisterParty<P> {
    type Reads = ();
    type Output = P;

    fn name(&self) -> &'static str {
        "party.register"
    }

    async fn collect_reads(&self, _reads: &mut ReadPhase<'_>) -> LedgerResult<()> {
        Ok(())
    }

    fn compute_writes(&self, _reads: (), writes: &mut WriteSet) -> LedgerResult<P> {
        let party = P::open(self.ctx.tenant_id, self.details.clone(), self.ctx.occurred_at);
        writes.create(&party)?;
        ActivityLog::record(
            writes,
            &self.ctx,
            &format!("{}.registered", P::KIND),
            P::COLLECTION,
            party.doc_id(),
            json!({ "name": self.details.name, "phone": self.details.phone }),
        )?;
        Ok(party)
    }

    fn notification(&self, ctx: &LedgerContext, output: &P) -> Option<LedgerNotification> {
        Some(LedgerNotification::new(
            ctx.tenant_id,
            format!("{}.registered", P::KIND),
            output.doc_id(),
            ctx.occurred_at,
        ))
    }
}
