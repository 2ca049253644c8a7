use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use shopledger_auth::Permission;
use shopledger_core::DebtId;
use shopledger_sales::{Debt, DeleteDebt, PayDebt};

use crate::app::{dto, errors::ApiError, services::AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub async fn pay_debt(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::PaymentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    authz::require(&services.policy, &tenant, &principal, &Permission::DEBTS_PAY)?;
    let debt_id: DebtId = dto::parse_id(&id)?;
    let req = dto::body(payload)?;

    let ctx = principal.ledger_context(&tenant);
    let unit = PayDebt::new(ctx, debt_id, req.amount_paid, req.currency, req.method, req.idempotency_key)?;
    let outcome = services.run(&ctx, unit).await?;

    Ok(Json(json!({
        "success": true,
        "status": outcome.status,
        "amount_due": outcome.amount_due,
        "total_paid": outcome.total_paid,
    })))
}

pub async fn delete_debt(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    authz::require(&services.policy, &tenant, &principal, &Permission::DEBTS_DELETE)?;
    let debt_id: DebtId = dto::parse_id(&id)?;

    let ctx = principal.ledger_context(&tenant);
    services.run(&ctx, DeleteDebt::new(ctx, debt_id)).await?;

    Ok(Json(json!({ "success": true })))
}

pub async fn get_debt(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Json<Debt>, ApiError> {
    authz::require(&services.policy, &tenant, &principal, &Permission::LEDGER_READ)?;
    let debt_id: DebtId = dto::parse_id(&id)?;
    Ok(Json(services.fetch::<Debt>(tenant.tenant_id(), debt_id).await?))
}
