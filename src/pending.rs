use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

/// Count of accepted but unresolved work items, with a barrier at zero.
///
/// Resolvers must finish writing an item's result before calling `resolve`,
/// so a waiter released at zero observes every result.
#[derive(Debug, Default)]
pub(crate) struct PendingCounter {
  count: AtomicUsize,
  settled: Notify,
}

impl PendingCounter {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Returns the count after the increment.
  pub(crate) fn increment(&self) -> usize {
    self.count.fetch_add(1, Ordering::SeqCst) + 1
  }

  /// Returns the count after the decrement.
  pub(crate) fn resolve(&self) -> usize {
    let previous = self.count.fetch_sub(1, Ordering::SeqCst);
    debug_assert!(previous > 0, "pending counter underflow");
    if previous == 1 {
      self.settled.notify_waiters();
    }
    previous - 1
  }

  pub(crate) fn get(&self) -> usize {
    self.count.load(Ordering::SeqCst)
  }

  /// Resolves once the count is zero.
  pub(crate) async fn wait_zero(&self) {
    loop {
      let notified = self.settled.notified();
      tokio::pin!(notified);
      // Register before checking so a resolve between the check and the await
      // still wakes us.
      notified.as_mut().enable();
      if self.get() == 0 {
        return;
      }
      notified.await;
    }
  }
}
