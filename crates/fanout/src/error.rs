#![forbid(unsafe_code)]

//! Failure values exchanged between subscribers and the broadcast.
//!
//! A [`SubscriberError`] is what a subscriber's `on_item` returns when it
//! cannot process an item. The processor hands that same value (not a copy of
//! its message) to the subscriber's `on_error`, so callers can check instance
//! identity with [`SubscriberError::ptr_eq`].

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Shared failure raised by a subscriber reaction.
///
/// Cloning is cheap and preserves identity: every clone compares equal under
/// [`ptr_eq`](Self::ptr_eq). This lets a single upstream failure be delivered
/// to many subscribers.
#[derive(Clone)]
pub struct SubscriberError {
    inner: Arc<dyn Error + Send + Sync + 'static>,
}

impl SubscriberError {
    /// Wrap an arbitrary error value.
    #[must_use]
    pub fn new<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(error),
        }
    }

    /// Build a failure from a plain message.
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Message(message.into()))
    }

    /// Whether `self` and `other` are the same failure instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Borrow the wrapped error as a concrete type, if it is one.
    #[must_use]
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: Error + 'static,
    {
        self.inner.downcast_ref::<E>()
    }

    /// Whether this failure was produced by a caught subscriber panic.
    #[must_use]
    pub fn is_panic(&self) -> bool {
        self.downcast_ref::<SubscriberPanic>().is_some()
    }
}

impl fmt::Debug for SubscriberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SubscriberError").field(&self.inner).finish()
    }
}

impl fmt::Display for SubscriberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl Error for SubscriberError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source()
    }
}

impl From<Box<dyn Error + Send + Sync + 'static>> for SubscriberError {
    fn from(error: Box<dyn Error + Send + Sync + 'static>) -> Self {
        Self {
            inner: Arc::from(error),
        }
    }
}

impl From<String> for SubscriberError {
    fn from(message: String) -> Self {
        Self::msg(message)
    }
}

impl From<&str> for SubscriberError {
    fn from(message: &str) -> Self {
        Self::msg(message)
    }
}

/// Plain-text failure used by [`SubscriberError::msg`].
#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for Message {}

/// A panic caught while a subscriber processed an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberPanic {
    message: String,
}

impl SubscriberPanic {
    /// Extract a readable message from a `catch_unwind` payload.
    #[must_use]
    pub fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "unknown panic".to_string()
        };
        Self { message }
    }

    /// The panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for SubscriberPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscriber panicked: {}", self.message)
    }
}

impl Error for SubscriberPanic {}
