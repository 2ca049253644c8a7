//! Accounting module: cash-flow rows and currency-keyed running totals.
//!
//! Income and expense rows are append-only; cash positions are derived from
//! them on read and never stored.

pub mod cash;
pub mod currency;

pub use cash::{
    CATEGORY_DEBT_PAYMENT, CATEGORY_PURCHASE_PAYMENT, CATEGORY_PURCHASE_REFUND, CATEGORY_SALE,
    CATEGORY_SALE_REFUND, CashEntry, CashPosition, Expense, Income, ManualExpense, PaymentMethod, RecordExpense,
    cash_positions, record_expense, record_income,
};
pub use currency::{CurrencyLedger, CurrencyTotals, TOTAL_OWED, TOTAL_SPENT};
