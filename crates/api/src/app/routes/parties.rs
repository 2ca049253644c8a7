use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use shopledger_auth::Permission;
use shopledger_core::{CustomerId, SupplierId};
use shopledger_parties::{Customer, Party, PartyDetails, RegisterParty, Supplier};

use crate::app::{dto, errors::ApiError, services::AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub async fn register_customer(
    services: Extension<Arc<AppServices>>,
    tenant: Extension<TenantContext>,
    principal: Extension<PrincipalContext>,
    payload: Result<Json<PartyDetails>, JsonRejection>,
) -> Result<Response, ApiError> {
    register::<Customer>(services, tenant, principal, payload).await
}

pub async fn register_supplier(
    services: Extension<Arc<AppServices>>,
    tenant: Extension<TenantContext>,
    principal: Extension<PrincipalContext>,
    payload: Result<Json<PartyDetails>, JsonRejection>,
) -> Result<Response, ApiError> {
    register::<Supplier>(services, tenant, principal, payload).await
}

async fn register<P: Party>(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    payload: Result<Json<PartyDetails>, JsonRejection>,
) -> Result<Response, ApiError> {
    authz::require(&services.policy, &tenant, &principal, &Permission::PARTIES_WRITE)?;
    let details = dto::body(payload)?;

    let ctx = principal.ledger_context(&tenant);
    let party = services.run(&ctx, RegisterParty::<P>::new(ctx, &details)?).await?;

    Ok((StatusCode::CREATED, Json(json!({ "id": party.doc_id() }))).into_response())
}

pub async fn get_customer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Json<Customer>, ApiError> {
    authz::require(&services.policy, &tenant, &principal, &Permission::LEDGER_READ)?;
    let customer_id: CustomerId = dto::parse_id(&id)?;
    Ok(Json(services.fetch::<Customer>(tenant.tenant_id(), customer_id).await?))
}

pub async fn get_supplier(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> Result<Json<Supplier>, ApiError> {
    authz::require(&services.policy, &tenant, &principal, &Permission::LEDGER_READ)?;
    let supplier_id: SupplierId = dto::parse_id(&id)?;
    Ok(Json(services.fetch::<Supplier>(tenant.tenant_id(), supplier_id).await?))
}
