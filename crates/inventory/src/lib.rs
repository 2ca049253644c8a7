//! Stock ledger: per-warehouse stock levels, product totals, and the
//! immutable adjustment trail behind them.

pub mod product;
pub mod stock;

pub use product::{NewProduct, Product, RegisterProduct};
pub use stock::{AdjustStock, StockAdjustment, StockBook, StockChange, StockLevel};
