#![forbid(unsafe_code)]

//! The emitting side of a broadcast.

use std::sync::Arc;

use crate::disposable::Disposable;
use crate::map::Mapped;
use crate::subscriber::{Subscriber, from_fn};

/// A source that subscribers can attach to.
///
/// Implemented by [`Processor`](crate::Processor) and [`Mapped`].
pub trait Publisher<T: 'static>: Send + Sync {
    /// Register `subscriber` and return the handle that cancels it.
    ///
    /// If the publisher is already closed, `subscriber.on_close()` runs
    /// before this returns and the handle is inert.
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) -> Disposable;

    /// Whether at least one subscriber is registered right now.
    fn has_subscribers(&self) -> bool;

    /// Register a closure that only cares about items.
    fn subscribe_fn<F>(&self, f: F) -> Disposable
    where
        Self: Sized,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe(from_fn(f))
    }

    /// Derive a publisher whose items are `transform(item)` for every item
    /// this publisher emits.
    ///
    /// The derived publisher only listens upstream while it has subscribers
    /// of its own, and all of them share a single upstream subscription.
    fn map<U, F>(&self, transform: F) -> Mapped<U>
    where
        Self: Clone + Sized + 'static,
        U: 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        Mapped::new(self.clone(), transform)
    }
}
