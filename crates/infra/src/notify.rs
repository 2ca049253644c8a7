//! Post-commit notification dispatch (fire-and-forget).

use tracing::warn;

use shopledger_events::{EventBus, LedgerNotification};

/// Receives notifications for committed ledger units.
///
/// Implementations must not fail the caller: the ledger write has already
/// committed by the time `notify` runs.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: LedgerNotification);
}

/// Drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notification: LedgerNotification) {}
}

/// Publishes notifications on an event bus; publish failures are logged.
pub struct BusNotifier<B> {
    bus: B,
}

impl<B> BusNotifier<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }
}

impl<B> Notifier for BusNotifier<B>
where
    B: EventBus<LedgerNotification>,
{
    fn notify(&self, notification: LedgerNotification) {
        let kind = notification.kind().to_string();
        if let Err(err) = self.bus.publish(notification) {
            warn!(kind = %kind, error = ?err, "notification publish failed; ledger write unaffected");
        }
    }
}
