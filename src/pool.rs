use crate::collector::run_collector;
use crate::config::PoolConfig;
use crate::error::{PoolError, TaskError};
use crate::gate::{AdmissionGate, GatePermit};
use crate::handler::HandlerRef;
use crate::log::{LogMode, PoolLog};
use crate::pending::PendingCounter;
use crate::queue::OverflowQueue;
use crate::task::{Task, TaskOutcome};
use crate::work::WorkItem;

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Once};

use dashmap::DashMap;
use fibre::mpsc::{self, AsyncSender};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

/// Defines how `WorkerPool::close` treats work that has not resolved yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
  /// Waits for every accepted item, queued ones included, to resolve.
  Graceful,
  /// Resolves queued and not yet started items as `TaskError::Cancelled`,
  /// cancels the token every running handler was given and stops waiting on
  /// running handlers, then shuts down.
  ForcefulCancel,
}

/// A work item currently being executed by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveWork {
  pub work_id: u64,
  pub task_id: u64,
  pub handler: &'static str,
}

async fn cancelled_or_pending(token: Option<&CancellationToken>) {
  match token {
    Some(token) => token.cancelled().await,
    None => std::future::pending().await,
  }
}

/// State shared by the pool handle, its workers, the drain loop and the
/// result collector.
pub(crate) struct PoolShared<D: Send + Sync + 'static, R: Send + 'static> {
  pub(crate) name: Arc<String>,
  pub(crate) log: PoolLog,
  gate: AdmissionGate,
  /// One permit per worker parked on the intake channel.
  idle: Semaphore,
  intake_tx: async_channel::Sender<WorkItem<D, R>>,
  intake_rx: async_channel::Receiver<WorkItem<D, R>>,
  result_tx: Mutex<Option<AsyncSender<WorkItem<D, R>>>>,
  queue: OverflowQueue<WorkItem<D, R>>,
  drain_wake: Notify,
  drain_started: Once,
  drain_handle: Mutex<Option<JoinHandle<()>>>,
  pending: PendingCounter,
  active: DashMap<u64, ActiveWork>,
  next_work_id: AtomicU64,
  closing: AtomicBool,
  /// Stops the drain loop.
  shutdown_token: CancellationToken,
  /// Parent of every handler token; cancelled only by a forceful close.
  work_token: CancellationToken,
  tokio_handle: TokioHandle,
  workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<D, R> PoolShared<D, R>
where
  D: Send + Sync + 'static,
  R: Send + 'static,
{
  fn next_work_id(&self) -> u64 {
    self.next_work_id.fetch_add(1, Ordering::Relaxed)
  }

  /// Non-blocking admission. Hands the item to an idle worker if one is
  /// parked, otherwise spawns a new worker if the gate has room. Gives the
  /// item back when the pool is saturated.
  fn try_admit(self: &Arc<Self>, item: WorkItem<D, R>) -> Result<(), WorkItem<D, R>> {
    if let Ok(slot) = self.idle.try_acquire() {
      slot.forget();
      return match self.intake_tx.try_send(item) {
        Ok(()) => Ok(()),
        Err(err) => {
          // Intake closed under us; the worker we reserved is exiting.
          Err(err.into_inner())
        }
      };
    }

    let Some(permit) = self.gate.try_acquire() else {
      return Err(item);
    };
    let Some(result_tx) = self.result_tx.lock().clone() else {
      return Err(item);
    };

    let shared = Arc::clone(self);
    let handle = self.tokio_handle.spawn(
      async move {
        shared.run_worker(item, permit, result_tx).await;
      }
      .instrument(info_span!("fanout_worker", pool = %self.name)),
    );
    self.workers.lock().push(handle);
    self.log.trace(
      None,
      format_args!("Worker spawned. Running workers: {} of {}.", self.gate.in_use(), self.gate.capacity()),
    );
    Ok(())
  }

  /// Persistent worker. Executes `first`, then keeps pulling from intake until
  /// it is closed. The gate permit is released when the worker exits.
  async fn run_worker(self: Arc<Self>, first: WorkItem<D, R>, _permit: GatePermit, result_tx: AsyncSender<WorkItem<D, R>>) {
    let mut next = Some(first);

    loop {
      let item = match next.take() {
        Some(item) => item,
        None => {
          self.idle.add_permits(1);
          self.drain_wake.notify_one();
          match self.intake_rx.recv().await {
            Ok(item) => item,
            Err(_) => break,
          }
        }
      };

      let done = self.execute(item).await;
      if result_tx.send(done).await.is_err() {
        self.log.error(None, format_args!("Result channel closed. Worker exiting."));
        break;
      }
    }

    self.log.trace(None, format_args!("Worker stopped."));
  }

  async fn execute(&self, mut item: WorkItem<D, R>) -> WorkItem<D, R> {
    let task = Arc::clone(&item.task);
    let handler = item.handler.clone();

    if item.is_cancelled() || self.work_token.is_cancelled() {
      self.log.trace(
        Some(&*task),
        format_args!("Cancelled before {} started.", handler.name()),
      );
      item.outcome = Some(Err(TaskError::Cancelled));
      return item;
    }

    // The handler sees a child of the pool token, so it can cancel its own
    // token without touching anyone else's. A caller token firing is forwarded
    // to it; the handler is left to stop on its own.
    let caller = item.token.clone();
    let token = self.work_token.child_token();

    self.active.insert(
      item.work_id,
      ActiveWork {
        work_id: item.work_id,
        task_id: task.id(),
        handler: handler.name(),
      },
    );

    // Handlers may panic while building their future as well as while it runs.
    let started = std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle(task.data(), &token)));
    let outcome: TaskOutcome<R> = match started {
      Err(_panic_payload) => Err(TaskError::Panicked),
      Ok(handler_future) => {
        let mut handler_future = AssertUnwindSafe(handler_future).catch_unwind();
        let mut forwarded = caller.is_none();
        loop {
          tokio::select! {
            biased;
            _ = self.work_token.cancelled() => break Err(TaskError::Cancelled),
            _ = cancelled_or_pending(caller.as_ref()), if !forwarded => {
              token.cancel();
              forwarded = true;
            }
            result = &mut handler_future => break match result {
              Ok(Ok(value)) => Ok(value),
              // A handler bailing out on its token reports a cancellation, not a failure.
              Ok(Err(_)) if token.is_cancelled() => Err(TaskError::Cancelled),
              Ok(Err(err)) => Err(TaskError::failed(err)),
              Err(_panic_payload) => Err(TaskError::Panicked),
            },
          }
        }
      }
    };

    self.active.remove(&item.work_id);

    match &outcome {
      Ok(_) => self.log.trace(Some(&*task), format_args!("{} finished.", handler.name())),
      Err(TaskError::Cancelled) => self.log.trace(Some(&*task), format_args!("{} cancelled.", handler.name())),
      Err(err) => self.log.error(Some(&*task), format_args!("{} failed: {}", handler.name(), err)),
    }

    item.outcome = Some(outcome);
    item
  }

  /// Writes an item's outcome onto its task, then resolves its pending count.
  pub(crate) fn settle(&self, item: WorkItem<D, R>) {
    let task = Arc::clone(&item.task);
    let handler = item.handler.name();
    let recorded = item.commit();
    let remaining = self.pending.resolve();
    if recorded {
      self.log.trace(
        Some(&*task),
        format_args!("Result of {} recorded. Pending: {}.", handler, remaining),
      );
    }
  }

  fn cancel_queued(&self, mut item: WorkItem<D, R>) {
    item.outcome = Some(Err(TaskError::Cancelled));
    self.settle(item);
  }

  fn ensure_drain_started(self: &Arc<Self>) {
    self.drain_started.call_once(|| {
      let shared = Arc::clone(self);
      let handle = self
        .tokio_handle
        .spawn(shared.run_drain_loop().instrument(info_span!("fanout_drain_loop", pool = %self.name)));
      *self.drain_handle.lock() = Some(handle);
    });
  }

  /// Re-offers queued items to the admission gate, oldest first. Sleeps until
  /// something is enqueued, a worker goes idle or shutdown begins.
  async fn run_drain_loop(self: Arc<Self>) {
    self.log.trace(None, format_args!("Drain loop started."));

    loop {
      tokio::select! {
        biased;
        _ = self.shutdown_token.cancelled() => break,
        _ = self.drain_wake.notified() => {}
      }
      self.drain_queue();
    }

    if self.queue.is_empty() {
      self.log.trace(None, format_args!("Drain loop stopped."));
    } else {
      self.log.trace(None, format_args!("Drain loop stopped. Abandoned queued items: {}.", self.queue.len()));
    }
  }

  fn drain_queue(self: &Arc<Self>) {
    // Cancelled items resolve right away, wherever they sit in the queue.
    let forced = self.work_token.is_cancelled();
    for item in self.queue.take_matching(|item| forced || item.is_cancelled()) {
      self.log.trace(Some(&*item.task), format_args!("Queued {} dropped as cancelled.", item.handler.name()));
      self.cancel_queued(item);
    }

    while let Some(item) = self.queue.pop_front() {
      if item.is_cancelled() || self.work_token.is_cancelled() {
        self.log.trace(Some(&*item.task), format_args!("Queued {} dropped as cancelled.", item.handler.name()));
        self.cancel_queued(item);
        continue;
      }

      match self.try_admit(item) {
        Ok(()) => {
          self.log.trace(None, format_args!("Dispatched from queue. Queue: {}.", self.queue.len()));
        }
        Err(item) => {
          self.queue.push_front(item);
          break;
        }
      }
    }
  }

  /// Wakes the drain loop when `token` fires, so items queued under it are
  /// swept out without waiting for a free worker. Exits on shutdown.
  fn watch_queued_token(self: &Arc<Self>, token: CancellationToken) {
    let shared = Arc::clone(self);
    self.tokio_handle.spawn(
      async move {
        tokio::select! {
          _ = shared.shutdown_token.cancelled() => {}
          _ = token.cancelled() => shared.drain_wake.notify_one(),
        }
      }
      .instrument(info_span!("fanout_token_watch", pool = %self.name)),
    );
  }

  /// Stops the drain loop, closes intake and the gate, and drops the pool's
  /// result sender. Safe to repeat.
  fn teardown(&self) {
    self.shutdown_token.cancel();
    self.intake_tx.close();
    self.gate.close();
    self.result_tx.lock().take();
  }
}

/// Bounded pool that runs (task, handler) pairs on at most `max_workers`
/// persistent workers.
///
/// Submissions never block: a pair either goes straight to a worker or waits
/// in a FIFO overflow queue that a background drain loop empties as workers
/// free up. Outcomes are written onto the submitted `Task`.
pub struct WorkerPool<D, R>
where
  D: Send + Sync + 'static,
  R: Send + 'static,
{
  shared: Arc<PoolShared<D, R>>,
  collector_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<D, R> WorkerPool<D, R>
where
  D: Send + Sync + 'static,
  R: Send + 'static,
{
  /// Creates a pool admitting at most `max_workers` concurrent workers and
  /// starts its result collector on `tokio_handle`.
  pub fn new(max_workers: usize, tokio_handle: TokioHandle, pool_name: &str) -> Result<Self, PoolError> {
    Self::with_config(PoolConfig::new(max_workers).name(pool_name), tokio_handle)
  }

  pub fn with_config(config: PoolConfig, tokio_handle: TokioHandle) -> Result<Self, PoolError> {
    if config.max_workers < 1 {
      return Err(PoolError::InvalidCapacity(config.max_workers));
    }

    let pool_name = Arc::new(config.name);
    let (intake_tx, intake_rx) = async_channel::unbounded();
    let (result_tx, result_rx) = mpsc::unbounded_async();

    let shared = Arc::new(PoolShared {
      name: pool_name.clone(),
      log: PoolLog::new(pool_name.clone(), config.log_mode),
      gate: AdmissionGate::new(config.max_workers),
      idle: Semaphore::new(0),
      intake_tx,
      intake_rx,
      result_tx: Mutex::new(Some(result_tx)),
      queue: OverflowQueue::new(),
      drain_wake: Notify::new(),
      drain_started: Once::new(),
      drain_handle: Mutex::new(None),
      pending: PendingCounter::new(),
      active: DashMap::new(),
      next_work_id: AtomicU64::new(0),
      closing: AtomicBool::new(false),
      shutdown_token: CancellationToken::new(),
      work_token: CancellationToken::new(),
      tokio_handle: tokio_handle.clone(),
      workers: Mutex::new(Vec::new()),
    });

    let collector_handle = tokio_handle.spawn(
      run_collector(result_rx, shared.clone()).instrument(info_span!("fanout_collector", pool = %pool_name)),
    );

    shared
      .log
      .info(format_args!("Pool created with capacity {}.", config.max_workers));

    Ok(Self {
      shared,
      collector_handle: Mutex::new(Some(collector_handle)),
    })
  }

  pub fn name(&self) -> &str {
    &self.shared.name
  }

  pub fn max_workers(&self) -> usize {
    self.shared.gate.capacity()
  }

  /// Workers currently alive. Never exceeds `max_workers`.
  pub fn worker_count(&self) -> usize {
    self.shared.gate.in_use()
  }

  /// Items executing right now.
  pub fn active_count(&self) -> usize {
    self.shared.active.len()
  }

  pub fn active_work(&self) -> Vec<ActiveWork> {
    self.shared.active.iter().map(|entry| entry.value().clone()).collect()
  }

  /// Items waiting in the overflow queue.
  pub fn queued_count(&self) -> usize {
    self.shared.queue.len()
  }

  /// Items accepted but not yet resolved.
  pub fn pending_count(&self) -> usize {
    self.shared.pending.get()
  }

  pub fn log_mode(&self) -> LogMode {
    self.shared.log.mode()
  }

  /// Changes which pool messages reach `tracing`. Has no effect on scheduling.
  pub fn set_log_mode(&self, mode: LogMode) {
    self.shared.log.set_mode(mode);
  }

  pub fn is_closed(&self) -> bool {
    self.shared.closing.load(Ordering::SeqCst)
  }

  /// Schedules `task` once per handler.
  ///
  /// Returns as soon as every pair is either running or queued. Submitting a
  /// handler again for the same task overwrites that handler's earlier result.
  ///
  /// # Errors
  /// `PoolError::PoolShuttingDown` once `close` has started. Pairs accepted
  /// before the error stay scheduled.
  pub fn submit<I>(&self, task: &Arc<Task<D, R>>, handlers: I) -> Result<(), PoolError>
  where
    I: IntoIterator<Item = HandlerRef<D, R>>,
  {
    self.submit_inner(task, handlers, None)
  }

  /// Like `submit`, with a cancellation token for these pairs.
  ///
  /// A pair whose token is already cancelled is dropped without running and
  /// without a result. A pair whose token fires while it is queued resolves as
  /// `TaskError::Cancelled` without running. A running handler receives a child
  /// of the token and is expected to stop on its own.
  pub fn submit_with_token<I>(&self, task: &Arc<Task<D, R>>, handlers: I, token: &CancellationToken) -> Result<(), PoolError>
  where
    I: IntoIterator<Item = HandlerRef<D, R>>,
  {
    self.submit_inner(task, handlers, Some(token))
  }

  fn submit_inner<I>(&self, task: &Arc<Task<D, R>>, handlers: I, token: Option<&CancellationToken>) -> Result<(), PoolError>
  where
    I: IntoIterator<Item = HandlerRef<D, R>>,
  {
    let shared = &self.shared;
    let mut queued_any = false;

    for handler in handlers {
      shared.pending.increment();
      // Checked after the increment: `close` sets the flag before waiting on
      // the counter, so either it sees this item or we see the flag.
      if shared.closing.load(Ordering::SeqCst) {
        shared.pending.resolve();
        shared
          .log
          .trace(Some(&**task), format_args!("Rejected {}: pool is closing.", handler.name()));
        return Err(PoolError::PoolShuttingDown);
      }

      if token.is_some_and(CancellationToken::is_cancelled) {
        shared.pending.resolve();
        shared
          .log
          .trace(Some(&**task), format_args!("Dropped {}: already cancelled.", handler.name()));
        continue;
      }

      let item = WorkItem::new(shared.next_work_id(), Arc::clone(task), handler, token.cloned());
      match shared.try_admit(item) {
        Ok(()) => {}
        Err(item) => {
          let handler_name = item.handler.name();
          let queued = shared.queue.push_back(item);
          shared.log.trace(
            Some(&**task),
            format_args!("No free worker, {} queued. Queue: {}.", handler_name, queued),
          );
          shared.ensure_drain_started();
          shared.drain_wake.notify_one();
          queued_any = true;
        }
      }
    }

    if let (true, Some(token)) = (queued_any, token) {
      shared.watch_queued_token(token.clone());
    }

    Ok(())
  }

  /// Waits until every accepted pair has produced a result or was cancelled.
  pub async fn wait(&self) {
    self.shared.ensure_drain_started();
    self.shared.drain_wake.notify_one();
    self.shared.log.trace(None, format_args!("Waiting for pending work."));
    self.shared.pending.wait_zero().await;
  }

  /// Shuts the pool down.
  ///
  /// New submissions are refused from the moment this is called. The call
  /// returns once every accepted pair has resolved (see `ShutdownMode`) and all
  /// background tasks have stopped. Calling it again is a no-op.
  ///
  /// # Errors
  /// `PoolError::WorkerJoin` if a background task panicked or was aborted.
  pub async fn close(&self, mode: ShutdownMode) -> Result<(), PoolError> {
    let shared = &self.shared;

    if shared.closing.swap(true, Ordering::SeqCst) {
      shared.log.trace(None, format_args!("Close already in progress or done."));
      return Ok(());
    }
    shared.log.info(format_args!("Closing pool (mode: {:?}).", mode));

    match mode {
      ShutdownMode::Graceful => {
        shared.ensure_drain_started();
        shared.drain_wake.notify_one();
      }
      ShutdownMode::ForcefulCancel => {
        shared.work_token.cancel();
        let queued = shared.queue.take_all();
        if !queued.is_empty() {
          shared.log.info(format_args!("Cancelling {} queued items.", queued.len()));
        }
        for item in queued {
          shared.cancel_queued(item);
        }
        shared.drain_wake.notify_one();
      }
    }

    shared.pending.wait_zero().await;
    shared.teardown();

    let mut join_errors = Vec::new();

    let drain_handle = shared.drain_handle.lock().take();
    let worker_handles: Vec<JoinHandle<()>> = std::mem::take(&mut *shared.workers.lock());
    let collector_handle = self.collector_handle.lock().take();

    for handle in drain_handle.into_iter().chain(worker_handles).chain(collector_handle) {
      if let Err(join_error) = handle.await {
        shared
          .log
          .error(None, format_args!("Error joining background task during close: {}", join_error));
        join_errors.push(join_error.to_string());
      }
    }

    if !join_errors.is_empty() {
      return Err(PoolError::WorkerJoin(join_errors.join("; ")));
    }

    shared.log.info(format_args!("Pool closed."));
    Ok(())
  }
}

impl<D, R> fmt::Debug for WorkerPool<D, R>
where
  D: Send + Sync + 'static,
  R: Send + 'static,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkerPool")
      .field("name", &self.shared.name)
      .field("max_workers", &self.max_workers())
      .field("workers", &self.worker_count())
      .field("active", &self.active_count())
      .field("queued", &self.queued_count())
      .field("pending", &self.pending_count())
      .field("closed", &self.is_closed())
      .finish()
  }
}

impl<D, R> Drop for WorkerPool<D, R>
where
  D: Send + Sync + 'static,
  R: Send + 'static,
{
  fn drop(&mut self) {
    if !self.shared.closing.swap(true, Ordering::SeqCst) {
      self
        .shared
        .log
        .info(format_args!("Pool dropped without close. Stopping background tasks."));
    }
    // Idempotent. Workers finish what they hold and exit once intake is closed
    // and empty; queued items are abandoned.
    self.shared.teardown();
  }
}
