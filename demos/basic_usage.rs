use futures_fanout::{handler_fn, Handler, HandlerFuture, HandlerRef, LogMode, ShutdownMode, Task, WorkerPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Counts words after pretending to do some I/O.
struct WordCount;

impl Handler<String, String> for WordCount {
  fn handle<'a>(&'a self, data: &'a String, _cancel: &'a CancellationToken) -> HandlerFuture<'a, String> {
    Box::pin(async move {
      tokio::time::sleep(Duration::from_millis(200)).await;
      Ok(data.split_whitespace().count().to_string())
    })
  }
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Basic Usage Example ---");

  let pool = WorkerPool::<String, String>::new(2, Handle::current(), "basic_pool").expect("capacity is non-zero");
  pool.set_log_mode(LogMode::Trace);

  let upper = handler_fn("upper", |s: &String| Ok(s.to_uppercase()));
  let reverse = handler_fn("reverse", |s: &String| Ok(s.chars().rev().collect()));
  let words = HandlerRef::new(WordCount);

  let tasks: Vec<_> = ["the quick brown fox", "jumps over", "the lazy dog"]
    .into_iter()
    .map(|s| Arc::new(Task::new(s.to_string())))
    .collect();

  for task in &tasks {
    if let Err(e) = pool.submit(task, [upper.clone(), reverse.clone(), words.clone()]) {
      tracing::error!("Failed to submit {}: {}", task, e);
    }
  }

  pool.wait().await;

  for task in &tasks {
    info!("{} {:?}", task, task.data());
    for (handler, outcome) in task.results() {
      info!("  {:<40} -> {:?}", handler.name(), outcome);
    }
  }

  pool.close(ShutdownMode::Graceful).await.expect("Pool shutdown failed");
  info!("--- Basic Usage Example End ---");
}
