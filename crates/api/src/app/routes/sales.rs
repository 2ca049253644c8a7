use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use shopledger_auth::Permission;
use shopledger_core::SaleId;
use shopledger_sales::{NewSale, RecordSale, Sale, VoidSale};

use crate::app::{dto, errors::ApiError, services::AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub async fn record_sale(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<NewSale>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    authz::require(&services.policy, &tenant, &principal, &Permission::SALES_CREATE)?;
    let input = dto::body(payload)?;

    let ctx = principal.ledger_context(&tenant);
    let receipt = services.run(&ctx, RecordSale::new(ctx, input)?).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": receipt.sale_id,
            "status": receipt.status,
            "debt_id": receipt.debt_id,
            "customer_id": receipt.customer_id,
            "total_amount": receipt.total_amount,
            "amount_paid": receipt.amount_paid,
            "debt_amount": receipt.debt_amount,
        })),
    ))
}

pub async fn void_sale(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    authz::require(&services.policy, &tenant, &principal, &Permission::SALES_VOID)?;
    let sale_id: SaleId = dto::parse_id(&id)?;

    let ctx = principal.ledger_context(&tenant);
    services.run(&ctx, VoidSale::new(ctx, sale_id)).await?;

    Ok(Json(json!({ "success": true, "status": "voided" })))
}

pub async fn get_sale(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Json<Sale>, ApiError> {
    authz::require(&services.policy, &tenant, &principal, &Permission::LEDGER_READ)?;
    let sale_id: SaleId = dto::parse_id(&id)?;
    Ok(Json(services.fetch::<Sale>(tenant.tenant_id(), sale_id).await?))
}
