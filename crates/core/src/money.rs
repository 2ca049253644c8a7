//! Fixed-point money.
//!
//! Amounts are integer minor units (cents for USD). There is no tolerance
//! anywhere in the ledger: "fully paid" means an outstanding amount of exactly
//! zero.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Amount in minor units of some currency.
///
/// The currency travels alongside the amount on every document rather than
/// inside this type, matching the `{currency, amount}` shape of ledger rows.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::validation("amount overflow"))
    }

    pub fn checked_sub(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::validation("amount overflow"))
    }

    /// `self * qty`, used for line totals.
    pub fn checked_mul(self, qty: i64) -> DomainResult<Money> {
        self.0
            .checked_mul(qty)
            .map(Money)
            .ok_or_else(|| DomainError::validation("amount overflow"))
    }

    /// `max(0, self - other)`.
    pub fn saturating_remaining(self, other: Money) -> Money {
        Money((self.0 - other.0).max(0))
    }

    /// Sum an iterator of amounts, failing on overflow.
    pub fn sum<I: IntoIterator<Item = Money>>(iter: I) -> DomainResult<Money> {
        iter.into_iter().try_fold(Money::ZERO, Money::checked_add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ValueObject for Money {}

/// ISO-4217 style currency code (three uppercase ASCII letters).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn new(code: impl AsRef<str>) -> DomainResult<Self> {
        let code = code.as_ref().trim().to_ascii_uppercase();
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(DomainError::validation(format!(
                "currency code must be three letters, got '{code}'"
            )));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CurrencyCode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CurrencyCode> for String {
    fn from(value: CurrencyCode) -> Self {
        value.0
    }
}

impl ValueObject for CurrencyCode {}

/// Payment status shared by sales and debts.
///
/// `Voided` is only reachable through a compensating void and only applies to
/// sales.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Partial,
    Paid,
    Voided,
}

impl PaymentStatus {
    /// Derive a status from a total and the amount paid against it.
    ///
    /// Paid iff nothing remains outstanding; partial iff something (but not
    /// everything) was paid.
    pub fn derive(total: Money, paid: Money) -> Self {
        if total.saturating_remaining(paid).is_zero() {
            Self::Paid
        } else if paid.is_positive() {
            Self::Partial
        } else {
            Self::Unpaid
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Partial => "partial",
            Self::Paid => "paid",
            Self::Voided => "voided",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn currency_code_is_normalized() {
        let code = CurrencyCode::new(" usd ").unwrap();
        assert_eq!(code.as_str(), "USD");
    }

    #[test]
    fn currency_code_rejects_bad_shapes() {
        for bad in ["", "US", "USDX", "U5D", "a.b"] {
            assert!(CurrencyCode::new(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn currency_code_deserialization_validates() {
        let err = serde_json::from_str::<CurrencyCode>("\"dollars\"");
        assert!(err.is_err());
        let ok: CurrencyCode = serde_json::from_str("\"sos\"").unwrap();
        assert_eq!(ok.as_str(), "SOS");
    }

    #[test]
    fn status_derivation_has_no_tolerance() {
        let total = Money::from_minor(10_000);
        assert_eq!(PaymentStatus::derive(total, Money::ZERO), PaymentStatus::Unpaid);
        assert_eq!(PaymentStatus::derive(total, Money::from_minor(9_999)), PaymentStatus::Partial);
        assert_eq!(PaymentStatus::derive(total, Money::from_minor(10_000)), PaymentStatus::Paid);
    }

    #[test]
    fn zero_total_is_paid() {
        assert_eq!(PaymentStatus::derive(Money::ZERO, Money::ZERO), PaymentStatus::Paid);
    }

    #[test]
    fn overflow_is_reported() {
        let err = Money::from_minor(i64::MAX).checked_add(Money::from_minor(1)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        #[test]
        fn remaining_plus_paid_covers_total(total in 0i64..1_000_000, paid in 0i64..1_000_000) {
            let total = Money::from_minor(total);
            let paid = Money::from_minor(paid.min(total.minor()));
            let remaining = total.saturating_remaining(paid);
            prop_assert_eq!(remaining.minor() + paid.minor(), total.minor());
        }
    }
}
