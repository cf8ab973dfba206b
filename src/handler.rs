use crate::error::BoxError;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

/// The future a handler returns for one invocation.
pub type HandlerFuture<'a, R> = BoxFuture<'a, Result<R, BoxError>>;

/// A processing strategy applied to a task's data.
///
/// The pool never inspects the concrete type; it only calls `handle`. The token
/// is cancelled when the caller's submission token fires or when the pool is
/// shut down with `ShutdownMode::ForcefulCancel`. Long running handlers should
/// watch it and bail out early.
pub trait Handler<D, R>: Send + Sync + 'static {
  fn handle<'a>(&'a self, data: &'a D, cancel: &'a CancellationToken) -> HandlerFuture<'a, R>;

  /// Display name used in log output.
  fn name(&self) -> &'static str {
    std::any::type_name::<Self>()
  }
}

/// A shared handle to a handler.
///
/// Equality and hashing use the identity of the underlying `Arc`, so two
/// `HandlerRef`s are equal only if one was cloned from the other. This is the
/// key under which a task stores its results.
pub struct HandlerRef<D: 'static, R: 'static>(Arc<dyn Handler<D, R>>);

impl<D: 'static, R: 'static> HandlerRef<D, R> {
  pub fn new(handler: impl Handler<D, R>) -> Self {
    Self(Arc::new(handler))
  }

  pub fn name(&self) -> &'static str {
    self.0.name()
  }

  fn addr(&self) -> usize {
    Arc::as_ptr(&self.0) as *const () as usize
  }
}

impl<D: 'static, R: 'static> Clone for HandlerRef<D, R> {
  fn clone(&self) -> Self {
    Self(Arc::clone(&self.0))
  }
}

impl<D: 'static, R: 'static> PartialEq for HandlerRef<D, R> {
  fn eq(&self, other: &Self) -> bool {
    self.addr() == other.addr()
  }
}

impl<D: 'static, R: 'static> Eq for HandlerRef<D, R> {}

impl<D: 'static, R: 'static> Hash for HandlerRef<D, R> {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.addr().hash(state);
  }
}

impl<D: 'static, R: 'static> Deref for HandlerRef<D, R> {
  type Target = dyn Handler<D, R>;

  fn deref(&self) -> &Self::Target {
    &*self.0
  }
}

impl<D: 'static, R: 'static> From<Arc<dyn Handler<D, R>>> for HandlerRef<D, R> {
  fn from(handler: Arc<dyn Handler<D, R>>) -> Self {
    Self(handler)
  }
}

impl<D: 'static, R: 'static> fmt::Debug for HandlerRef<D, R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HandlerRef")
      .field("name", &self.name())
      .field("addr", &format_args!("{:#x}", self.addr()))
      .finish()
  }
}

/// Adapter that turns a synchronous closure into a `Handler`.
pub struct FnHandler<F> {
  func: F,
  name: &'static str,
}

impl<D, R, F> Handler<D, R> for FnHandler<F>
where
  D: Sync + 'static,
  R: Send + 'static,
  F: Fn(&D) -> Result<R, BoxError> + Send + Sync + 'static,
{
  fn handle<'a>(&'a self, data: &'a D, _cancel: &'a CancellationToken) -> HandlerFuture<'a, R> {
    let outcome = (self.func)(data);
    Box::pin(std::future::ready(outcome))
  }

  fn name(&self) -> &'static str {
    self.name
  }
}

/// Wraps a synchronous closure as a named handler.
pub fn handler_fn<D, R, F>(name: &'static str, func: F) -> HandlerRef<D, R>
where
  D: Sync + 'static,
  R: Send + 'static,
  F: Fn(&D) -> Result<R, BoxError> + Send + Sync + 'static,
{
  HandlerRef::new(FnHandler { func, name })
}
