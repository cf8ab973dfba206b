use futures_fanout::{Handler, HandlerFuture, HandlerRef, LogMode, ShutdownMode, Task, WorkerPool};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::info;

struct SlowSquare;

impl Handler<u64, u64> for SlowSquare {
  fn handle<'a>(&'a self, data: &'a u64, _cancel: &'a CancellationToken) -> HandlerFuture<'a, u64> {
    Box::pin(async move {
      info!("Squaring {} (takes 1s)", data);
      tokio::time::sleep(Duration::from_secs(1)).await;
      Ok(data * data)
    })
  }
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  let concurrency_limit = 2;
  let num_tasks = 5;
  info!("--- Concurrency Limit Example (Limit: {}) ---", concurrency_limit);

  let pool = WorkerPool::<u64, u64>::new(concurrency_limit, Handle::current(), "concurrency_pool")
    .expect("capacity is non-zero");
  pool.set_log_mode(LogMode::Errors);
  let square = HandlerRef::new(SlowSquare);

  info!(
    "Submitting {} tasks, each takes 1 sec. With concurrency {}, this should take ~{} secs.",
    num_tasks,
    concurrency_limit,
    (num_tasks as f32 / concurrency_limit as f32).ceil()
  );

  let started = Instant::now();
  let tasks: Vec<_> = (1..=num_tasks).map(|i| Arc::new(Task::new(i as u64))).collect();
  for task in &tasks {
    pool.submit(task, [square.clone()]).expect("pool is open");
  }
  info!(
    "Submitted. Workers: {}, queued: {}, pending: {}",
    pool.worker_count(),
    pool.queued_count(),
    pool.pending_count()
  );

  pool.wait().await;
  info!("All tasks processed in {:?}.", started.elapsed());

  for task in &tasks {
    info!("{}: {:?}", task, task.result());
  }

  pool.close(ShutdownMode::Graceful).await.expect("Pool shutdown failed");
  info!("--- Concurrency Limit Example End ---");
}
