use crate::handler::HandlerRef;
use crate::task::{Task, TaskOutcome};

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// One (task, handler) pairing as it travels through the pool.
///
/// Created at submission, executed by exactly one worker, and dropped once the
/// collector has written its outcome back onto the task.
pub(crate) struct WorkItem<D: 'static, R: 'static> {
  pub(crate) work_id: u64,
  pub(crate) task: Arc<Task<D, R>>,
  pub(crate) handler: HandlerRef<D, R>,
  /// Caller supplied cancellation, if any.
  pub(crate) token: Option<CancellationToken>,
  pub(crate) outcome: Option<TaskOutcome<R>>,
}

impl<D: 'static, R: 'static> WorkItem<D, R> {
  pub(crate) fn new(
    work_id: u64,
    task: Arc<Task<D, R>>,
    handler: HandlerRef<D, R>,
    token: Option<CancellationToken>,
  ) -> Self {
    Self {
      work_id,
      task,
      handler,
      token,
      outcome: None,
    }
  }

  pub(crate) fn is_cancelled(&self) -> bool {
    self.token.as_ref().is_some_and(CancellationToken::is_cancelled)
  }

  /// Writes the attached outcome onto the task. Items that never got an
  /// outcome leave the task untouched.
  pub(crate) fn commit(self) -> bool {
    match self.outcome {
      Some(outcome) => {
        self.task.record(self.handler, outcome);
        true
      }
      None => false,
    }
  }
}

impl<D: 'static, R: 'static> fmt::Debug for WorkItem<D, R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkItem")
      .field("work_id", &self.work_id)
      .field("task", &self.task.id())
      .field("handler", &self.handler.name())
      .field("has_outcome", &self.outcome.is_some())
      .finish_non_exhaustive()
  }
}
