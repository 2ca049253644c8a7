//! `shopledger-core`: ledger foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use error::{DomainError, DomainResult};
pub use id::{
    CustomerId, DebtId, EntryId, ProductId, PurchaseId, SaleId, SupplierId, TenantId, UserId,
    WarehouseId,
};
pub use money::{CurrencyCode, Money, PaymentStatus};
pub use value_object::ValueObject;
