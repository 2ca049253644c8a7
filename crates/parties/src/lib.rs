//! Parties module (customers and suppliers).
//!
//! Both kinds carry currency-keyed running totals that are only ever changed
//! by increments from ledger units; registering a party never touches them.

pub mod party;

pub use party::{Customer, Party, PartyDetails, RegisterParty, Supplier};
