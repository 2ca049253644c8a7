use std::str::FromStr;

use axum::{Json, extract::rejection::JsonRejection};
use serde::Deserialize;

use shopledger_accounting::{ManualExpense, PaymentMethod};
use shopledger_core::{CurrencyCode, DomainError, Money};

use crate::app::errors::ApiError;

// -------------------------
// Request DTOs
// -------------------------

/// Body of `PUT /debts/:id` and `PUT /purchases/:id`.
#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub amount_paid: Money,
    pub currency: CurrencyCode,
    pub method: PaymentMethod,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExpenseRequest {
    pub category: String,
    pub amount: Money,
    pub currency: CurrencyCode,
    pub method: PaymentMethod,
    pub reason: String,
}

impl From<ExpenseRequest> for ManualExpense {
    fn from(value: ExpenseRequest) -> Self {
        ManualExpense {
            category: value.category,
            amount: value.amount,
            currency: value.currency,
            method: value.method,
            reason: value.reason,
        }
    }
}

// -------------------------
// Helpers
// -------------------------

/// Unwrap a JSON body, reporting decode failures as validation errors.
pub fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| ApiError::BadBody(e.body_text()))
}

pub fn parse_id<T>(raw: &str) -> Result<T, ApiError>
where
    T: FromStr<Err = DomainError>,
{
    raw.parse::<T>().map_err(ApiError::from)
}

#[cfg(test)]
mod tests {
    use shopledger_core::SaleId;

    use super::*;

    #[test]
    fn payment_request_accepts_minimal_body() {
        let req: PaymentRequest = serde_json::from_value(serde_json::json!({
            "amount_paid": 4000,
            "currency": "usd",
            "method": "Cash",
        }))
        .unwrap();

        assert_eq!(req.amount_paid, Money::from_minor(4000));
        assert_eq!(req.currency.as_str(), "USD");
        assert_eq!(req.method.as_str(), "cash");
        assert!(req.idempotency_key.is_none());
    }

    #[test]
    fn bad_currency_fails_to_decode() {
        let res = serde_json::from_value::<PaymentRequest>(serde_json::json!({
            "amount_paid": 1,
            "currency": "dollars",
            "method": "cash",
        }));
        assert!(res.is_err());
    }

    #[test]
    fn malformed_id_is_invalid_id() {
        let err = parse_id::<SaleId>("nope").unwrap_err();
        assert!(matches!(err, ApiError::Ledger(shopledger_infra::LedgerError::Domain(DomainError::InvalidId(_)))));
    }
}
