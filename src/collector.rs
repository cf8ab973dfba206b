use crate::pool::PoolShared;
use crate::work::WorkItem;

use std::sync::Arc;

use fibre::mpsc::AsyncReceiver;

/// Single consumer of finished work items.
///
/// Writes each outcome onto its task and resolves the item's pending count.
/// Runs until every sender (the pool plus one per worker) is gone, so results
/// sent during shutdown are never lost.
pub(crate) async fn run_collector<D, R>(results_rx: AsyncReceiver<WorkItem<D, R>>, shared: Arc<PoolShared<D, R>>)
where
  D: Send + Sync + 'static,
  R: Send + 'static,
{
  shared.log.trace(None, format_args!("Result collector started."));
  let mut collected: u64 = 0;

  loop {
    match results_rx.recv().await {
      Ok(item) => {
        collected += 1;
        shared.settle(item);
      }
      Err(_) => {
        // Closed and empty: the pool and all workers dropped their senders.
        break;
      }
    }
  }

  shared
    .log
    .trace(None, format_args!("Result collector stopped after {} results.", collected));
}
