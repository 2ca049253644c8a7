//! Sales module: sale processing, receivables (debts) and their
//! compensating operations.
//!
//! Every public unit here runs as exactly one ledger executor invocation.

pub mod debt;
pub mod sale;


pub use debt::{Debt, DebtPayment, DeleteDebt, PayDebt, PaymentOutcome};
pub use sale::{
    CustomerRef, NewSale, RecordSale, Sale, SaleAmounts, SaleItem, SalePayment, SaleReceipt,
    SettledPayment, VoidSale,
};
