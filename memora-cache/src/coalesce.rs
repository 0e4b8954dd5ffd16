//! Sharing one in-flight computation between concurrent callers.
//!
//! The first caller to miss on a key registers a [`Pending`] handle in the
//! entry store while still holding the store lock, then spawns the
//! computation. Every later caller clones the handle and awaits the same
//! outcome, so success and failure are observed identically by all of them.

use crate::error::{CacheError, CacheResult, SharedError};
use futures::future::{FutureExt, Shared};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Outcome of one computation: the serialized value or the shared failure.
pub type Outcome = Result<Arc<str>, SharedError>;

/// Cloneable handle to an in-flight computation.
pub type Pending = Shared<oneshot::Receiver<Outcome>>;

/// Sending half held by the task running the computation.
pub type Resolver = oneshot::Sender<Outcome>;

/// Create a resolver and the handle its outcome is delivered through.
pub fn channel() -> (Resolver, Pending) {
    let (sender, receiver) = oneshot::channel();
    (sender, receiver.shared())
}

/// Await an in-flight computation.
///
/// A resolver dropped without sending (the computing task panicked) yields
/// [`CacheError::Aborted`].
pub async fn wait(pending: Pending) -> CacheResult<Arc<str>> {
    match pending.await {
        Ok(Ok(payload)) => Ok(payload),
        Ok(Err(err)) => Err(CacheError::Computation(err)),
        Err(_) => Err(CacheError::Aborted),
    }
}

/// Execute a callback on dropping of the container type.
///
/// The callback must not panic; it may run during unwinding.
pub struct CallOnDrop {
    f: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl CallOnDrop {
    pub fn new<F: FnOnce() + Send + 'static>(f: F) -> CallOnDrop {
        CallOnDrop {
            f: Some(Box::new(f)),
        }
    }
}

impl Drop for CallOnDrop {
    fn drop(&mut self) {
        if let Some(f) = self.f.take() {
            f();
        }
    }
}
