use std::fmt;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Counting gate that bounds how many workers a pool may run at once.
///
/// Acquisition never waits. A caller that finds the gate full takes the
/// overflow path instead.
pub(crate) struct AdmissionGate {
  capacity: usize,
  semaphore: Arc<Semaphore>,
}

/// One unit of the gate, held by a worker for its whole life.
/// Dropping it returns the unit to the gate.
pub(crate) struct GatePermit {
  _permit: OwnedSemaphorePermit,
}

impl fmt::Debug for GatePermit {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GatePermit").finish_non_exhaustive()
  }
}

impl AdmissionGate {
  pub(crate) fn new(capacity: usize) -> Self {
    Self {
      capacity,
      semaphore: Arc::new(Semaphore::new(capacity)),
    }
  }

  /// Takes one unit if any is free.
  pub(crate) fn try_acquire(&self) -> Option<GatePermit> {
    match self.semaphore.clone().try_acquire_owned() {
      Ok(permit) => Some(GatePermit { _permit: permit }),
      Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
    }
  }

  pub(crate) fn capacity(&self) -> usize {
    self.capacity
  }

  pub(crate) fn in_use(&self) -> usize {
    self.capacity - self.semaphore.available_permits()
  }

  /// Refuses every later `try_acquire`. Units already handed out stay valid.
  pub(crate) fn close(&self) {
    self.semaphore.close();
  }
}

impl fmt::Debug for AdmissionGate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AdmissionGate")
      .field("capacity", &self.capacity)
      .field("in_use", &self.in_use())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn never_hands_out_more_than_capacity() {
    let gate = AdmissionGate::new(2);
    let a = gate.try_acquire().expect("first unit");
    let b = gate.try_acquire().expect("second unit");
    assert!(gate.try_acquire().is_none());
    assert_eq!(gate.in_use(), 2);

    drop(a);
    assert_eq!(gate.in_use(), 1);
    let c = gate.try_acquire();
    assert!(c.is_some());
    drop(b);
    drop(c);
    assert_eq!(gate.in_use(), 0);
  }

  #[test]
  fn closed_gate_admits_nothing() {
    let gate = AdmissionGate::new(3);
    let held = gate.try_acquire().unwrap();
    gate.close();
    assert!(gate.try_acquire().is_none());
    drop(held);
    assert_eq!(gate.capacity(), 3);
  }
}
