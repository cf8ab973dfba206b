//! A Tokio-based worker pool that fans one task out to several handlers with
//! bounded concurrency, a FIFO overflow queue and cooperative cancellation.

mod collector;
mod config;
mod error;
mod gate;
mod handler;
mod log;
mod pending;
mod pool;
mod queue;
mod task;
mod work;

pub use config::PoolConfig;
pub use error::{BoxError, PoolError, TaskError};
pub use handler::{handler_fn, FnHandler, Handler, HandlerFuture, HandlerRef};
pub use log::LogMode;
pub use pool::{ActiveWork, ShutdownMode, WorkerPool};
pub use task::{Task, TaskOutcome};
