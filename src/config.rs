use crate::log::LogMode;

use std::num::NonZeroUsize;

/// Construction-time settings of a `WorkerPool`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
  /// Upper bound on concurrently running workers. Must be at least 1.
  pub max_workers: usize,
  /// Name attached to every log line and span of the pool.
  pub name: String,
  pub log_mode: LogMode,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      max_workers: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
      name: "fanout_pool".to_string(),
      log_mode: LogMode::default(),
    }
  }
}

impl PoolConfig {
  pub fn new(max_workers: usize) -> Self {
    Self {
      max_workers,
      ..Self::default()
    }
  }

  pub fn max_workers(mut self, max_workers: usize) -> Self {
    self.max_workers = max_workers;
    self
  }

  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn log_mode(mut self, mode: LogMode) -> Self {
    self.log_mode = mode;
    self
  }
}
