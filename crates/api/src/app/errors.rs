use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use shopledger_auth::AuthzError;
use shopledger_core::DomainError;
use shopledger_infra::{LedgerError, StoreError};

/// Every failure a handler can return.
#[derive(Debug)]
pub enum ApiError {
    Ledger(LedgerError),
    Forbidden(AuthzError),
    /// The body could not be decoded into the request type.
    BadBody(String),
    /// The request outlived `REQUEST_TIMEOUT_MS`.
    Timeout,
}

impl From<LedgerError> for ApiError {
    fn from(value: LedgerError) -> Self {
        ApiError::Ledger(value)
    }
}

impl From<DomainError> for ApiError {
    fn from(value: DomainError) -> Self {
        ApiError::Ledger(LedgerError::Domain(value))
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        ApiError::Ledger(LedgerError::from(value))
    }
}

impl From<AuthzError> for ApiError {
    fn from(value: AuthzError) -> Self {
        ApiError::Forbidden(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Ledger(LedgerError::Domain(e)) => domain_error_to_response(e),
            ApiError::Ledger(LedgerError::Conflict { attempts }) => {
                conflict(format!("concurrent update; gave up after {attempts} attempts"))
            }
            ApiError::Ledger(LedgerError::Store(StoreError::Conflict(msg))) => conflict(msg),
            ApiError::Ledger(LedgerError::Store(e)) => {
                tracing::error!(error = %e, "store failure");
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
            }
            ApiError::Forbidden(e) => json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string()),
            ApiError::BadBody(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
            ApiError::Timeout => {
                tracing::warn!("request timed out");
                json_error(StatusCode::GATEWAY_TIMEOUT, "timeout", "request timed out")
            }
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DomainError::NotFound(what) => json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found")),
        DomainError::Conflict(msg) => conflict(msg),
        DomainError::Duplicate(msg) => json_error(StatusCode::CONFLICT, "duplicate_request", msg),
        DomainError::Unauthorized => json_error(StatusCode::FORBIDDEN, "forbidden", "unauthorized"),
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

fn conflict(message: impl Into<String>) -> Response {
    (
        StatusCode::CONFLICT,
        axum::Json(json!({
            "error": "conflict",
            "message": message.into(),
            "retryable": true,
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn domain_errors_map_to_documented_statuses() {
        assert_eq!(status_of(DomainError::validation("x")), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(DomainError::invalid_id("x")), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(DomainError::invariant("x")), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_of(DomainError::not_found("debts 1")), StatusCode::NOT_FOUND);
        assert_eq!(status_of(DomainError::duplicate("x")), StatusCode::CONFLICT);
    }

    #[test]
    fn exhausted_retries_are_a_retryable_conflict() {
        assert_eq!(status_of(LedgerError::Conflict { attempts: 5 }), StatusCode::CONFLICT);
    }

    #[test]
    fn infrastructure_failures() {
        assert_eq!(status_of(StoreError::Backend("down".into())), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_of(ApiError::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status_of(AuthzError::Forbidden("sales.void".into())),
            StatusCode::FORBIDDEN
        );
    }
}
