use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use shopledger_auth::Permission;
use shopledger_core::ProductId;
use shopledger_inventory::{AdjustStock, NewProduct, Product, RegisterProduct, StockChange};

use crate::app::{dto, errors::ApiError, services::AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub async fn register_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<NewProduct>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    authz::require(&services.policy, &tenant, &principal, &Permission::CATALOG_WRITE)?;
    let input = dto::body(payload)?;

    let ctx = principal.ledger_context(&tenant);
    let product = services.run(&ctx, RegisterProduct::new(ctx, &input)?).await?;

    Ok((StatusCode::CREATED, Json(json!({ "id": product.id }))))
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Json<Product>, ApiError> {
    authz::require(&services.policy, &tenant, &principal, &Permission::LEDGER_READ)?;
    let product_id: ProductId = dto::parse_id(&id)?;
    Ok(Json(services.fetch::<Product>(tenant.tenant_id(), product_id).await?))
}

/// Manual stock movement with a mandatory reason.
pub async fn adjust_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<StockChange>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    authz::require(&services.policy, &tenant, &principal, &Permission::STOCK_ADJUST)?;
    let change = dto::body(payload)?;

    let ctx = principal.ledger_context(&tenant);
    let adjustment = services.run(&ctx, AdjustStock::new(ctx, change)?).await?;

    Ok(Json(json!({
        "success": true,
        "adjustment_id": adjustment.id,
        "new_quantity": adjustment.new_quantity,
    })))
}
