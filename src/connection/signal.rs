//! Waiter notification for newly available connections.

use std::pin::pin;

use tokio::sync::Notify;

/// Broadcast monitor letting consumers wait until a connection is available.
///
/// Every successful registry upsert calls [`signal_available`], which wakes
/// all waiters at once. A waiter must re-check its predicate after every
/// wake-up: a broadcast is not a handoff, and another consumer may have
/// observed the state first.
///
/// [`signal_available`]: WaiterSignal::signal_available
#[derive(Debug, Default)]
pub struct WaiterSignal {
    notify: Notify,
}

impl WaiterSignal {
    /// Create a new signal with no waiters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every currently registered waiter.
    pub fn signal_available(&self) {
        self.notify.notify_waiters();
    }

    /// Wait until `predicate` returns true.
    ///
    /// The predicate is checked once before suspending and again after
    /// every wake-up, so spurious and raced wake-ups are harmless. Interest
    /// is registered before the predicate check; a signal arriving between
    /// the check and the suspension is not lost.
    pub async fn wait_until(&self, mut predicate: impl FnMut() -> bool) {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            if predicate() {
                return;
            }
            notified.await;
        }
    }
}
