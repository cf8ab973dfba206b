use crate::error::TaskError;
use crate::handler::HandlerRef;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(0);

/// What a handler produced for a task.
pub type TaskOutcome<R> = Result<R, TaskError>;

/// Input data plus the results every handler produced for it.
///
/// A task is shared between the caller and the pool through an `Arc`. The pool
/// writes results under the task's own lock as handlers finish, in no
/// particular order. Read them after `WorkerPool::wait` returns.
pub struct Task<D: 'static, R: 'static> {
  id: u64,
  data: D,
  results: Mutex<HashMap<HandlerRef<D, R>, TaskOutcome<R>>>,
}

impl<D: 'static, R: 'static> Task<D, R> {
  pub fn new(data: D) -> Self {
    Self {
      id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
      data,
      results: Mutex::new(HashMap::new()),
    }
  }

  /// Process-unique id, used to tag log lines.
  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn data(&self) -> &D {
    &self.data
  }

  /// Number of handlers that have recorded an outcome.
  pub fn result_count(&self) -> usize {
    self.results.lock().len()
  }

  /// Records `outcome` for `handler`, replacing any earlier outcome of the
  /// same handler. Returns `true` if an earlier outcome was overwritten.
  pub(crate) fn record(&self, handler: HandlerRef<D, R>, outcome: TaskOutcome<R>) -> bool {
    self.results.lock().insert(handler, outcome).is_some()
  }

  /// Drops every recorded outcome.
  pub fn clear_results(&self) {
    self.results.lock().clear();
  }
}

impl<D: 'static, R: Clone + 'static> Task<D, R> {
  /// Snapshot of every outcome recorded so far, keyed by handler.
  pub fn results(&self) -> HashMap<HandlerRef<D, R>, TaskOutcome<R>> {
    self.results.lock().clone()
  }

  /// The outcome of one handler, if it has finished.
  pub fn result_for(&self, handler: &HandlerRef<D, R>) -> Option<TaskOutcome<R>> {
    self.results.lock().get(handler).cloned()
  }

  /// Some recorded outcome. Which one is unspecified when several handlers ran;
  /// only meaningful for single-handler tasks.
  pub fn result(&self) -> Option<TaskOutcome<R>> {
    self.results.lock().values().next().cloned()
  }
}

impl<D: 'static, R: 'static> fmt::Display for Task<D, R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "task#{}", self.id)
  }
}

impl<D: fmt::Debug + 'static, R: 'static> fmt::Debug for Task<D, R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Task")
      .field("id", &self.id)
      .field("data", &self.data)
      .field("result_count", &self.result_count())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::handler::handler_fn;

  #[test]
  fn ids_are_unique() {
    let a = Task::<u32, u32>::new(1);
    let b = Task::<u32, u32>::new(1);
    assert_ne!(a.id(), b.id());
    assert_eq!(a.to_string(), format!("task#{}", a.id()));
  }

  #[test]
  fn one_result_per_handler() {
    let task = Task::new(2u32);
    let double = handler_fn("double", |x: &u32| Ok(x * 2));
    let square = handler_fn("square", |x: &u32| Ok(x * x));

    assert!(!task.record(double.clone(), Ok(4)));
    assert!(!task.record(square.clone(), Ok(4)));
    assert!(task.record(double.clone(), Ok(40)));

    let results = task.results();
    assert_eq!(results.len(), 2);
    assert_eq!(results.get(&double), Some(&Ok(40)));
    assert_eq!(task.result_for(&square), Some(Ok(4)));
  }

  #[test]
  fn result_picks_the_only_entry() {
    let task = Task::new("x".to_string());
    assert_eq!(task.result(), None::<TaskOutcome<String>>);

    let echo = handler_fn("echo", |s: &String| Ok(s.clone()));
    task.record(echo, Err(TaskError::Cancelled));
    assert_eq!(task.result(), Some(Err(TaskError::Cancelled)));

    task.clear_results();
    assert_eq!(task.result_count(), 0);
  }

  // Generic over any payload, the way the pool itself stores tasks.
  fn overwrite_with<D: 'static, R: Clone + 'static>(task: &Task<D, R>, handler: &HandlerRef<D, R>, first: R, second: R) -> Option<TaskOutcome<R>> {
    task.record(handler.clone(), Ok(first));
    task.record(handler.clone(), Ok(second));
    task.result_for(handler)
  }

  #[test]
  fn generic_callers_record_and_read_results() {
    let task = Task::new(vec![1u8, 2, 3]);
    let len = handler_fn("len", |v: &Vec<u8>| Ok(v.len()));
    assert_eq!(overwrite_with(&task, &len, 1, 3), Some(Ok(3)));
    assert_eq!(task.result_count(), 1);
  }
}
