//! Post-commit ledger notifications and the bus that carries them.
//!
//! Nothing here participates in a ledger transaction: notifications are built
//! from committed results and delivered best-effort.

pub mod bus;
pub mod in_memory_bus;
pub mod notification;
pub mod tenant;

pub use bus::{EventBus, Subscription};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use notification::LedgerNotification;
pub use tenant::TenantScoped;
