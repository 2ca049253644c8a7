//! Purchasing module: purchases from suppliers (payables), their payments,
//! and the one-time stock receipt tied to the first payment.

pub mod purchase;

pub use purchase::{
    DeletePurchase, NewPurchase, PayPurchase, Purchase, PurchaseItem, PurchasePayment,
    PurchasePaymentOutcome, PurchaseReceipt, PurchaseStatus, RecordPurchase,
};
