#![forbid(unsafe_code)]

//! The receiving side of a broadcast.
//!
//! A [`Subscriber`] reacts to three things: an item, a terminal failure, and
//! a close notification. Only [`Subscriber::on_item`] is required; most
//! consumers just want items, so [`from_fn`] adapts a plain closure.
//!
//! # Terminal reactions
//!
//! Over its lifetime a subscriber sees at most one terminal call, either
//! `on_error` or `on_close`, never both. It may also see none at all if it is
//! disposed while the processor stays open.

use std::fmt;
use std::sync::Arc;

use crate::error::SubscriberError;

/// Reactions to a broadcast.
///
/// Implementations must be `Send + Sync`: a processor may fan out from any
/// thread, and callbacks run on the thread that called `submit`.
pub trait Subscriber<T>: Send + Sync {
    /// Handle one item.
    ///
    /// Returning `Err` unsubscribes this subscriber permanently. The error is
    /// handed back through [`on_error`](Self::on_error); other subscribers of
    /// the same item are unaffected.
    fn on_item(&self, item: &T) -> Result<(), SubscriberError>;

    /// Terminal failure. There are two routes here:
    ///
    /// - this subscriber's own `on_item` failed, and `error` is what it
    ///   returned (or its panic);
    /// - the processor it listens to was failed through
    ///   [`Processor::on_error`](crate::Processor::on_error), and `error` is
    ///   that upstream cause, shared by every subscriber.
    ///
    /// Do not assume a call here follows a failure of your own.
    fn on_error(&self, _error: SubscriberError) {}

    /// Terminal close of the processor this subscriber is registered with.
    fn on_close(&self) {}
}

impl<T, S> Subscriber<T> for Arc<S>
where
    S: Subscriber<T> + ?Sized,
{
    fn on_item(&self, item: &T) -> Result<(), SubscriberError> {
        (**self).on_item(item)
    }

    fn on_error(&self, error: SubscriberError) {
        (**self).on_error(error);
    }

    fn on_close(&self) {
        (**self).on_close();
    }
}

/// Subscriber built from an infallible closure. See [`from_fn`].
pub struct FnSubscriber<F> {
    f: F,
}

impl<F> FnSubscriber<F> {
    /// Wrap a closure.
    #[must_use]
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnSubscriber<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSubscriber").finish_non_exhaustive()
    }
}

impl<T, F> Subscriber<T> for FnSubscriber<F>
where
    F: Fn(&T) + Send + Sync,
{
    fn on_item(&self, item: &T) -> Result<(), SubscriberError> {
        (self.f)(item);
        Ok(())
    }
}

/// Subscriber built from a fallible closure. See [`try_from_fn`].
pub struct TryFnSubscriber<F> {
    f: F,
}

impl<F> TryFnSubscriber<F> {
    /// Wrap a closure.
    #[must_use]
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for TryFnSubscriber<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TryFnSubscriber").finish_non_exhaustive()
    }
}

impl<T, F> Subscriber<T> for TryFnSubscriber<F>
where
    F: Fn(&T) -> Result<(), SubscriberError> + Send + Sync,
{
    fn on_item(&self, item: &T) -> Result<(), SubscriberError> {
        (self.f)(item)
    }
}

/// Adapt an item-only closure into a shareable subscriber.
#[must_use]
pub fn from_fn<T, F>(f: F) -> Arc<dyn Subscriber<T>>
where
    T: 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    Arc::new(FnSubscriber::new(f))
}

/// Adapt a fallible closure into a shareable subscriber.
#[must_use]
pub fn try_from_fn<T, F>(f: F) -> Arc<dyn Subscriber<T>>
where
    T: 'static,
    F: Fn(&T) -> Result<(), SubscriberError> + Send + Sync + 'static,
{
    Arc::new(TryFnSubscriber::new(f))
}
