use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use shopledger_core::{DomainError, DomainResult, ProductId, TenantId};
use shopledger_events::LedgerNotification;
use shopledger_infra::{
    ActivityLog, Document, LedgerContext, LedgerResult, ReadPhase, UnitOfWork, WriteSet,
};

/// Catalog entry. `total_quantity` is the sum of the product's stock levels
/// across warehouses and only moves through stock adjustments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub tenant_id: TenantId,
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub total_quantity: i64,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub const TOTAL_QUANTITY: &'static str = "total_quantity";
}

impl Document for Product {
    const COLLECTION: &'static str = "products";

    fn doc_id(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
}

/// Unit: add a product to the catalog with zero stock.
pub struct RegisterProduct {
    ctx: LedgerContext,
    name: String,
    sku: Option<String>,
}

impl RegisterProduct {
    pub fn new(ctx: LedgerContext, input: &NewProduct) -> DomainResult<Self> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("product name cannot be empty"));
        }
        let sku = input
            .sku
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(Self {
            ctx,
            name: name.to_string(),
            sku,
        })
    }
}

#[async_trait]
impl UnitOfWork for RegisterProduct {
    type Reads = ();
    type Output = Product;

    fn name(&self) -> &'static str {
        "product.register"
    }

    async fn collect_reads(&self, _reads: &mut ReadPhase<'_>) -> LedgerResult<()> {
        Ok(())
    }

    fn compute_writes(&self, _reads: (), writes: &mut WriteSet) -> LedgerResult<Product> {
        let product = Product {
            id: ProductId::new(),
            tenant_id: self.ctx.tenant_id,
            name: self.name.clone(),
            sku: self.sku.clone(),
            total_quantity: 0,
            created_at: self.ctx.occurred_at,
        };
        writes.create(&product)?;
        ActivityLog::record(
            writes,
            &self.ctx,
            "product.registered",
            Product::COLLECTION,
            product.id,
            json!({ "name": product.name, "sku": product.sku }),
        )?;
        Ok(product)
    }

    fn notification(&self, ctx: &LedgerContext, output: &Product) -> Option<LedgerNotification> {
        Some(LedgerNotification::new(
            ctx.tenant_id,
            "product.registered",
            output.id.to_string(),
            ctx.occurred_at,
        ))
    }
}
