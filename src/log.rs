use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{error, info, trace};

/// Which of the pool's own messages reach `tracing`.
///
/// New pools are silent until a mode is configured or set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogMode {
  /// Nothing is emitted.
  #[default]
  Silent,
  /// Every message, trace level and up.
  Trace,
  /// Only failures: handler errors, panics, shutdown problems.
  Errors,
}

impl LogMode {
  fn as_u8(self) -> u8 {
    match self {
      LogMode::Silent => 0,
      LogMode::Trace => 1,
      LogMode::Errors => 2,
    }
  }

  fn from_u8(raw: u8) -> Self {
    match raw {
      0 => LogMode::Silent,
      2 => LogMode::Errors,
      _ => LogMode::Trace,
    }
  }
}

/// Leveled log sink shared by the pool and its background tasks.
///
/// Never blocks and never influences scheduling; it only decides whether a
/// message is forwarded to `tracing`.
pub(crate) struct PoolLog {
  pool_name: Arc<String>,
  mode: AtomicU8,
}

impl PoolLog {
  pub(crate) fn new(pool_name: Arc<String>, mode: LogMode) -> Self {
    Self {
      pool_name,
      mode: AtomicU8::new(mode.as_u8()),
    }
  }

  pub(crate) fn mode(&self) -> LogMode {
    LogMode::from_u8(self.mode.load(Ordering::Relaxed))
  }

  pub(crate) fn set_mode(&self, mode: LogMode) {
    self.mode.store(mode.as_u8(), Ordering::Relaxed);
  }

  pub(crate) fn traces(&self) -> bool {
    self.mode() == LogMode::Trace
  }

  pub(crate) fn errors(&self) -> bool {
    self.mode() != LogMode::Silent
  }

  /// Trace-level message, optionally tagged with the task it concerns.
  pub(crate) fn trace(&self, task: Option<&dyn fmt::Display>, msg: fmt::Arguments<'_>) {
    if !self.traces() {
      return;
    }
    match task {
      Some(task) => trace!(pool = %self.pool_name, task = %task, "{}", msg),
      None => trace!(pool = %self.pool_name, "{}", msg),
    }
  }

  /// Lifecycle message (creation, shutdown). Same gate as `trace`.
  pub(crate) fn info(&self, msg: fmt::Arguments<'_>) {
    if self.traces() {
      info!(pool = %self.pool_name, "{}", msg);
    }
  }

  pub(crate) fn error(&self, task: Option<&dyn fmt::Display>, msg: fmt::Arguments<'_>) {
    if !self.errors() {
      return;
    }
    match task {
      Some(task) => error!(pool = %self.pool_name, task = %task, "{}", msg),
      None => error!(pool = %self.pool_name, "{}", msg),
    }
  }
}

impl fmt::Debug for PoolLog {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PoolLog")
      .field("pool_name", &self.pool_name)
      .field("mode", &self.mode())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mode_gates_levels() {
    let log = PoolLog::new(Arc::new("p".to_string()), LogMode::default());
    assert_eq!(log.mode(), LogMode::Silent);
    assert!(!log.traces());
    assert!(!log.errors());

    log.set_mode(LogMode::Trace);
    assert!(log.traces());
    assert!(log.errors());

    log.set_mode(LogMode::Errors);
    assert_eq!(log.mode(), LogMode::Errors);
    assert!(!log.traces());
    assert!(log.errors());

    log.set_mode(LogMode::Silent);
    assert!(!log.traces());
    assert!(!log.errors());
  }

  #[test]
  fn mode_survives_the_atomic_round_trip() {
    for mode in [LogMode::Silent, LogMode::Trace, LogMode::Errors] {
      assert_eq!(LogMode::from_u8(mode.as_u8()), mode);
    }
  }

  #[test]
  fn silent_sink_accepts_messages() {
    let log = PoolLog::new(Arc::new("p".to_string()), LogMode::Silent);
    log.trace(None, format_args!("dropped {}", 1));
    log.info(format_args!("dropped as well"));
    log.error(Some(&"task#1"), format_args!("dropped too"));
  }
}
