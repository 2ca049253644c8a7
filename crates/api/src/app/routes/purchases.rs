use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use shopledger_auth::Permission;
use shopledger_core::PurchaseId;
use shopledger_purchasing::{DeletePurchase, NewPurchase, PayPurchase, Purchase, RecordPurchase};

use crate::app::{dto, errors::ApiError, services::AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub async fn record_purchase(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<NewPurchase>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    authz::require(&services.policy, &tenant, &principal, &Permission::PURCHASES_CREATE)?;
    let input = dto::body(payload)?;

    let ctx = principal.ledger_context(&tenant);
    let receipt = services.run(&ctx, RecordPurchase::new(ctx, input)?).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": receipt.purchase_id,
            "status": receipt.status,
            "remaining_amount": receipt.remaining_amount,
            "received": receipt.received,
        })),
    ))
}

pub async fn pay_purchase(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    payload: Result<Json<dto::PaymentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    authz::require(&services.policy, &tenant, &principal, &Permission::PURCHASES_PAY)?;
    let purchase_id: PurchaseId = dto::parse_id(&id)?;
    let req = dto::body(payload)?;

    let ctx = principal.ledger_context(&tenant);
    let unit = PayPurchase::new(ctx, purchase_id, req.amount_paid, req.currency, req.method, req.idempotency_key)?;
    let outcome = services.run(&ctx, unit).await?;

    Ok(Json(json!({
        "success": true,
        "status": outcome.status,
        "remaining_amount": outcome.remaining_amount,
    })))
}

pub async fn delete_purchase(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    authz::require(&services.policy, &tenant, &principal, &Permission::PURCHASES_DELETE)?;
    let purchase_id: PurchaseId = dto::parse_id(&id)?;

    let ctx = principal.ledger_context(&tenant);
    services.run(&ctx, DeletePurchase::new(ctx, purchase_id)).await?;

    Ok(Json(json!({ "success": true })))
}

pub async fn get_purchase(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Json<Purchase>, ApiError> {
    authz::require(&services.policy, &tenant, &principal, &Permission::LEDGER_READ)?;
    let purchase_id: PurchaseId = dto::parse_id(&id)?;
    Ok(Json(services.fetch::<Purchase>(tenant.tenant_id(), purchase_id).await?))
}
