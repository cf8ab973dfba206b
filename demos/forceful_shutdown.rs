use futures_fanout::{BoxError, Handler, HandlerFuture, HandlerRef, LogMode, ShutdownMode, Task, WorkerPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Runs for a long time but checks its token between steps.
struct LongJob;

impl Handler<u32, String> for LongJob {
  fn handle<'a>(&'a self, data: &'a u32, cancel: &'a CancellationToken) -> HandlerFuture<'a, String> {
    Box::pin(async move {
      for step in 0..100 {
        if cancel.is_cancelled() {
          info!("Job {} saw cancellation at step {}", data, step);
          return Err(BoxError::from(format!("job {} stopped at step {}", data, step)));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
      }
      Ok(format!("job {} done", data))
    })
  }
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Forceful Shutdown Example ---");

  let pool = WorkerPool::<u32, String>::new(2, Handle::current(), "forceful_pool").expect("capacity is non-zero");
  pool.set_log_mode(LogMode::Trace);
  let job = HandlerRef::new(LongJob);

  let tasks: Vec<_> = (0..4).map(|i| Arc::new(Task::new(i))).collect();
  for task in &tasks {
    pool.submit(task, [job.clone()]).expect("pool is open");
  }

  tokio::time::sleep(Duration::from_millis(500)).await;
  info!(
    "Active: {:?}, queued: {}",
    pool.active_work(),
    pool.queued_count()
  );

  info!("Initiating forceful shutdown.");
  pool.close(ShutdownMode::ForcefulCancel).await.expect("Pool shutdown failed");

  for task in &tasks {
    info!("{}: {:?}", task, task.result_for(&job));
  }
  info!("--- Forceful Shutdown Example End ---");
}
