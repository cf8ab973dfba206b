use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;

/// FIFO holding area for work the admission gate turned away.
///
/// Unbounded. All access goes through a single mutex so the submission path
/// and the drain loop never observe a half-updated queue.
pub(crate) struct OverflowQueue<T> {
  items: Mutex<VecDeque<T>>,
}

impl<T> OverflowQueue<T> {
  pub(crate) fn new() -> Self {
    Self {
      items: Mutex::new(VecDeque::new()),
    }
  }

  /// Appends at the tail. Returns the queue length after the push.
  pub(crate) fn push_back(&self, item: T) -> usize {
    let mut items = self.items.lock();
    items.push_back(item);
    items.len()
  }

  /// Puts an item back at the head, ahead of everything still waiting. Used
  /// when a popped item fails admission again.
  pub(crate) fn push_front(&self, item: T) {
    self.items.lock().push_front(item);
  }

  pub(crate) fn pop_front(&self) -> Option<T> {
    self.items.lock().pop_front()
  }

  pub(crate) fn len(&self) -> usize {
    self.items.lock().len()
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.items.lock().is_empty()
  }

  /// Removes every item matching `pred`, keeping the rest in order. Returns
  /// the removed items oldest first.
  pub(crate) fn take_matching(&self, mut pred: impl FnMut(&T) -> bool) -> Vec<T> {
    let mut items = self.items.lock();
    let mut taken = Vec::new();
    let mut kept = VecDeque::with_capacity(items.len());
    for item in items.drain(..) {
      if pred(&item) {
        taken.push(item);
      } else {
        kept.push_back(item);
      }
    }
    *items = kept;
    taken
  }

  /// Empties the queue, oldest first.
  pub(crate) fn take_all(&self) -> Vec<T> {
    self.items.lock().drain(..).collect()
  }
}

impl<T> fmt::Debug for OverflowQueue<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("OverflowQueue").field("len", &self.len()).finish()
  }
}
