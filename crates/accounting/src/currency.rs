//! Currency-keyed running totals.
//!
//! Customer and supplier balances are `{currency: amount}` maps. They are never
//! rewritten wholesale: [`CurrencyLedger`] turns every change into an atomic
//! field-path increment, so two concurrent units crediting the same customer
//! both land without either reading the map.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use shopledger_core::{CurrencyCode, Money};
use shopledger_infra::{Document, WriteSet};

/// Field holding what the counterparty still owes (or is owed).
pub const TOTAL_OWED: &str = "total_owed";
/// Field holding what the counterparty has paid (or been paid).
pub const TOTAL_SPENT: &str = "total_spent";

/// Read-only view of a currency-keyed map as stored on a document.
///
/// No mutators: every change goes through [`CurrencyLedger`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CurrencyTotals(BTreeMap<CurrencyCode, Money>);

impl CurrencyTotals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Amount for `currency`; an absent key reads as zero.
    pub fn get(&self, currency: &CurrencyCode) -> Money {
        self.0.get(currency).copied().unwrap_or(Money::ZERO)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CurrencyCode, &Money)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|m| m.is_zero())
    }
}

/// Credit/debit handle for one currency-keyed field of one document.
pub struct CurrencyLedger<'w, D: Document> {
    writes: &'w mut WriteSet,
    doc_id: String,
    field: &'static str,
    _doc: PhantomData<D>,
}

impl<'w, D: Document> CurrencyLedger<'w, D> {
    pub fn new(writes: &'w mut WriteSet, doc_id: impl ToString, field: &'static str) -> Self {
        Self {
            writes,
            doc_id: doc_id.to_string(),
            field,
            _doc: PhantomData,
        }
    }

    pub fn credit(&mut self, currency: &CurrencyCode, amount: Money) {
        self.apply(currency, amount.minor());
    }

    pub fn debit(&mut self, currency: &CurrencyCode, amount: Money) {
        self.apply(currency, -amount.minor());
    }

    /// Debit no more than `current` holds for `currency`; returns the amount
    /// actually debited. `current` must come from a tracked read so the clamp
    /// is validated at commit.
    pub fn debit_clamped(&mut self, currency: &CurrencyCode, amount: Money, current: &CurrencyTotals) -> Money {
        let available = current.get(currency).max(Money::ZERO);
        let debited = amount.min(available);
        self.debit(currency, debited);
        debited
    }

    fn apply(&mut self, currency: &CurrencyCode, delta: i64) {
        if delta == 0 {
            return;
        }
        self.writes
            .increment::<D>(&self.doc_id, &[self.field, currency.as_str()], delta);
    }
}
