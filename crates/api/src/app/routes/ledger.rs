use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use shopledger_accounting::{CashPosition, Expense, Income, RecordExpense, cash_positions as derive_positions};
use shopledger_auth::Permission;

use crate::app::{dto, errors::ApiError, services::AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub async fn record_expense(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<dto::ExpenseRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    authz::require(&services.policy, &tenant, &principal, &Permission::EXPENSES_CREATE)?;
    let req = dto::body(payload)?;

    let ctx = principal.ledger_context(&tenant);
    let id = services.run(&ctx, RecordExpense::new(ctx, req.into())?).await?;

    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

/// Balance per (payment method, currency), derived from the income/expense rows.
pub async fn cash_positions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<Json<Vec<CashPosition>>, ApiError> {
    authz::require(&services.policy, &tenant, &principal, &Permission::LEDGER_READ)?;

    let incomes = services.list::<Income>(tenant.tenant_id()).await?;
    let expenses = services.list::<Expense>(tenant.tenant_id()).await?;

    Ok(Json(derive_positions(&incomes, &expenses)?))
}
