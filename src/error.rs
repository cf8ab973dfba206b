use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// The error type handlers return. Any `Send + Sync` error can be boxed into it.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors raised by the pool itself, as opposed to errors raised by handlers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
  #[error("Pool capacity must be at least 1, got {0}")]
  InvalidCapacity(usize),

  #[error("Pool is shutting down or already shut down, cannot accept new work")]
  PoolShuttingDown,

  #[error("Failed to join a pool background task during shutdown: {0}")]
  WorkerJoin(String),
}

/// Why a handler did not produce a value for a task.
///
/// A `TaskError` is always local to one (task, handler) result. It never aborts
/// sibling handlers or the pool.
#[derive(Error, Debug, Clone)]
pub enum TaskError {
  #[error("Handler failed: {0}")]
  Failed(Arc<dyn StdError + Send + Sync + 'static>),

  #[error("Work item was cancelled")]
  Cancelled,

  #[error("Handler panicked")]
  Panicked,
}

impl TaskError {
  pub(crate) fn failed(err: BoxError) -> Self {
    TaskError::Failed(Arc::from(err))
  }

  /// Returns `true` for `TaskError::Cancelled`.
  pub fn is_cancelled(&self) -> bool {
    matches!(self, TaskError::Cancelled)
  }
}

impl PartialEq for TaskError {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (TaskError::Failed(a), TaskError::Failed(b)) => a.to_string() == b.to_string(),
      (TaskError::Cancelled, TaskError::Cancelled) => true,
      (TaskError::Panicked, TaskError::Panicked) => true,
      _ => false,
    }
  }
}
