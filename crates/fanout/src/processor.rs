#![forbid(unsafe_code)]

//! Broadcast hub that is both a publisher and a subscriber.
//!
//! # Design
//!
//! [`Processor<T>`] keeps an ordered map from [`SubscriptionId`] to
//! subscriber behind a single mutex. Every mutation (register, dispose,
//! close, failure removal) takes that lock briefly. Fan-out copies the
//! current subscribers into a snapshot under the lock and then invokes the
//! callbacks with the lock released, so a subscriber may dispose itself,
//! subscribe others, or submit to another processor from inside `on_item`.
//!
//! # Performance
//!
//! | Operation                 | Complexity                  |
//! |---------------------------|-----------------------------|
//! | `submit()`                | O(S) where S = subscribers  |
//! | `subscribe()`             | O(log S)                    |
//! | `Disposable::dispose()`   | O(log S)                    |
//! | `on_close()`              | O(S)                        |
//! | `close_if_unsubscribed()` | O(1)                        |
//!
//! # Failure Modes
//!
//! - **Subscriber failure**: an `Err` (or, with panic isolation, a panic)
//!   from `on_item` removes that subscriber and reports the failure to it
//!   alone. Remaining subscribers still receive the item.
//! - **Use after close**: `submit` and `on_error` are ignored; `subscribe`
//!   answers with an immediate `on_close`.
//! - **Late delivery**: a subscriber disposed while a fan-out is in flight
//!   may still receive that one item, never a later one.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, trace, warn};

use crate::disposable::{Detach, Disposable, SubscriptionId};
use crate::error::{SubscriberError, SubscriberPanic};
use crate::map::Relay;
use crate::publisher::Publisher;
use crate::subscriber::Subscriber;

type Fallback<T> = Arc<dyn Fn(T) + Send + Sync>;
type Subscribers<T> = BTreeMap<SubscriptionId, Arc<dyn Subscriber<T>>>;

/// Configuration for a [`Processor`].
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Name attached to every log event emitted by the processor.
    pub label: Cow<'static, str>,
    /// Catch panics raised by subscriber callbacks during fan-out and treat
    /// them as subscriber failures.
    pub isolate_panics: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            label: Cow::Borrowed("processor"),
            isolate_panics: true,
        }
    }
}

impl ProcessorConfig {
    /// Set the log label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = label.into();
        self
    }

    /// Set whether subscriber panics are caught.
    #[must_use]
    pub fn with_isolate_panics(mut self, enabled: bool) -> Self {
        self.isolate_panics = enabled;
        self
    }
}

struct State<T> {
    subscribers: Subscribers<T>,
    next_id: u64,
    fallback: Option<Fallback<T>>,
    closed: bool,
}

/// Shared interior of a [`Processor`].
pub(crate) struct Core<T> {
    config: ProcessorConfig,
    state: Mutex<State<T>>,
    /// Present only for the private processor behind a [`Mapped`](crate::Mapped).
    relay: Option<Relay>,
}

impl<T> Core<T> {
    pub(crate) fn new(config: ProcessorConfig, relay: Option<Relay>) -> Self {
        Self {
            config,
            state: Mutex::new(State {
                subscribers: BTreeMap::new(),
                next_id: 0,
                fallback: None,
                closed: false,
            }),
            relay,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // Callbacks never run under this lock, so a poisoned guard still
        // holds a consistent map.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn label(&self) -> &str {
        &self.config.label
    }

    fn wants_upstream(&self) -> bool {
        let state = self.lock();
        !state.closed && !state.subscribers.is_empty()
    }

    /// Bring the relay's upstream subscription in line with our subscriber set.
    ///
    /// `wait` is set by callers that just added demand: they must not return
    /// before the relay is connected.
    fn sync_relay(&self, wait: bool) {
        if let Some(relay) = &self.relay {
            relay.reconcile(self.label(), wait, || self.wants_upstream());
        }
    }

    /// Run a terminal reaction, containing panics when isolation is on.
    fn guarded(&self, id: Option<SubscriptionId>, reaction: &'static str, f: impl FnOnce()) {
        if !self.config.isolate_panics {
            f();
            return;
        }
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            let caught = SubscriberPanic::from_payload(&*payload);
            warn!(
                processor = %self.label(),
                subscription = ?id,
                reaction,
                panic = %caught,
                "subscriber panicked in terminal reaction"
            );
        }
    }

    fn deliver(&self, subscriber: &dyn Subscriber<T>, item: &T) -> Result<(), SubscriberError> {
        if !self.config.isolate_panics {
            return subscriber.on_item(item);
        }
        match panic::catch_unwind(AssertUnwindSafe(|| subscriber.on_item(item))) {
            Ok(result) => result,
            Err(payload) => Err(SubscriberError::new(SubscriberPanic::from_payload(
                &*payload,
            ))),
        }
    }

    /// Unsubscribe a subscriber whose `on_item` failed, then tell it why.
    ///
    /// If the subscription is already gone (disposed, closed, or rejected
    /// by a concurrent fan-out) the failure is dropped, so the subscriber
    /// never sees a second terminal reaction.
    fn reject(&self, id: SubscriptionId, subscriber: &dyn Subscriber<T>, error: SubscriberError) {
        // Bind the removed entry so it drops after the guard: its `Drop` may
        // re-enter this processor.
        let removed = self.lock().subscribers.remove(&id);
        if removed.is_none() {
            trace!(
                processor = %self.label(),
                subscription = %id,
                "failing subscriber already detached"
            );
            return;
        }
        warn!(
            processor = %self.label(),
            subscription = %id,
            error = %error,
            "subscriber failed; unsubscribing"
        );
        self.guarded(Some(id), "on_error", || subscriber.on_error(error));
        drop(removed);
        self.sync_relay(false);
    }
}

impl<T: 'static> Detach for Core<T> {
    fn detach(&self, id: SubscriptionId) {
        let removed = self.lock().subscribers.remove(&id);
        if removed.is_some() {
            trace!(processor = %self.label(), subscription = %id, "subscriber disposed");
            drop(removed);
            self.sync_relay(false);
        }
    }
}

/// A broadcast hub: items submitted on one side fan out to every subscriber
/// registered on the other.
///
/// Cloning a `Processor` creates a new handle to the **same** hub.
///
/// # Invariants
///
/// 1. [`has_subscribers`](Publisher::has_subscribers) is true exactly when the
///    subscriber set is non-empty.
/// 2. A closed processor has no subscribers and never reopens.
/// 3. Subscribers are notified in registration order from one snapshot per
///    `submit` call.
/// 4. The fallback handler runs only for items submitted while the set is
///    empty and the processor is open.
pub struct Processor<T> {
    core: Arc<Core<T>>,
}

impl<T> Clone for Processor<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for Processor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.core.lock();
        f.debug_struct("Processor")
            .field("label", &self.core.config.label)
            .field("subscriber_count", &state.subscribers.len())
            .field("has_fallback", &state.fallback.is_some())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<T: 'static> Default for Processor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Processor<T> {
    /// Create an open processor with no subscribers and no fallback.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ProcessorConfig::default())
    }

    /// Create a processor with explicit configuration.
    #[must_use]
    pub fn with_config(config: ProcessorConfig) -> Self {
        Self::from_core(Arc::new(Core::new(config, None)))
    }

    pub(crate) fn from_core(core: Arc<Core<T>>) -> Self {
        Self { core }
    }

    pub(crate) fn relay(&self) -> Option<&Relay> {
        self.core.relay.as_ref()
    }

    /// The configuration this processor was built with.
    #[must_use]
    pub fn config(&self) -> &ProcessorConfig {
        &self.core.config
    }

    /// Broadcast `item` to every registered subscriber.
    ///
    /// With no subscribers the item goes to the fallback handler, or is
    /// dropped if none is installed. Ignored once closed.
    pub fn submit(&self, item: T) {
        let snapshot: Vec<(SubscriptionId, Arc<dyn Subscriber<T>>)> = {
            let state = self.core.lock();
            if state.closed {
                return;
            }
            if state.subscribers.is_empty() {
                let fallback = state.fallback.clone();
                drop(state);
                if let Some(fallback) = fallback {
                    trace!(processor = %self.core.label(), "no subscribers; item sent to fallback");
                    fallback(item);
                }
                return;
            }
            state
                .subscribers
                .iter()
                .map(|(id, subscriber)| (*id, Arc::clone(subscriber)))
                .collect()
        };

        for (id, subscriber) in snapshot {
            if let Err(error) = self.core.deliver(subscriber.as_ref(), &item) {
                self.core.reject(id, subscriber.as_ref(), error);
            }
        }
    }

    /// Fail the processor: every registered subscriber receives `cause` via
    /// `on_error`, then the processor is closed.
    ///
    /// Ignored once closed.
    pub fn on_error(&self, cause: SubscriberError) {
        let Some((drained, fallback)) = self.shut() else {
            return;
        };
        debug!(
            processor = %self.core.label(),
            subscribers = drained.len(),
            error = %cause,
            "processor failed; closing"
        );
        drop(fallback);
        for (id, subscriber) in drained {
            let cause = cause.clone();
            self.core
                .guarded(Some(id), "on_error", || subscriber.on_error(cause));
        }
        self.core.sync_relay(false);
    }

    /// Close the processor, notifying every registered subscriber with
    /// `on_close`. Idempotent.
    pub fn on_close(&self) {
        let Some((drained, fallback)) = self.shut() else {
            return;
        };
        debug!(
            processor = %self.core.label(),
            subscribers = drained.len(),
            "processor closed"
        );
        drop(fallback);
        for (id, subscriber) in drained {
            self.core
                .guarded(Some(id), "on_close", || subscriber.on_close());
        }
        self.core.sync_relay(false);
    }

    /// Close only if nobody is subscribed.
    ///
    /// Returns `true` if the processor is closed when this returns (including
    /// when it already was), `false` if subscribers kept it open. The
    /// emptiness check and the close happen under one lock, so no subscribe
    /// can slip in between.
    pub fn close_if_unsubscribed(&self) -> bool {
        let fallback = {
            let mut state = self.core.lock();
            if state.closed {
                return true;
            }
            if !state.subscribers.is_empty() {
                return false;
            }
            state.closed = true;
            state.fallback.take()
        };
        debug!(processor = %self.core.label(), "processor closed while unsubscribed");
        drop(fallback);
        self.core.sync_relay(false);
        true
    }

    /// Install the handler for items submitted while nobody is subscribed,
    /// replacing any previous one.
    pub fn set_fallback_handler<F>(&self, handler: F)
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let previous = self.core.lock().fallback.replace(Arc::new(handler));
        drop(previous);
    }

    /// Remove the fallback handler, if any.
    pub fn clear_fallback_handler(&self) {
        let previous = self.core.lock().fallback.take();
        drop(previous);
    }

    /// Number of registered subscribers right now.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.core.lock().subscribers.len()
    }

    /// Whether the processor has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.lock().closed
    }

    /// Mark closed and take everything out. `None` if already closed.
    fn shut(&self) -> Option<(Subscribers<T>, Option<Fallback<T>>)> {
        let mut state = self.core.lock();
        if state.closed {
            return None;
        }
        state.closed = true;
        Some((mem::take(&mut state.subscribers), state.fallback.take()))
    }
}

impl<T: 'static> Publisher<T> for Processor<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) -> Disposable {
        let registered = {
            let mut state = self.core.lock();
            if state.closed {
                Err(subscriber)
            } else {
                let id = SubscriptionId::new(state.next_id);
                state.next_id += 1;
                state.subscribers.insert(id, subscriber);
                Ok(id)
            }
        };

        let id = match registered {
            Ok(id) => id,
            Err(subscriber) => {
                debug!(
                    processor = %self.core.label(),
                    "subscribe on closed processor; closing subscriber"
                );
                self.core.guarded(None, "on_close", || subscriber.on_close());
                return Disposable::inert();
            }
        };

        trace!(processor = %self.core.label(), subscription = %id, "subscriber registered");
        self.core.sync_relay(true);
        let owner: Weak<dyn Detach> = Arc::downgrade(&self.core) as Weak<dyn Detach>;
        Disposable::bound(owner, id)
    }

    fn has_subscribers(&self) -> bool {
        !self.core.lock().subscribers.is_empty()
    }
}

/// A processor can listen to another publisher and rebroadcast what it hears.
impl<T: Clone + 'static> Subscriber<T> for Processor<T> {
    fn on_item(&self, item: &T) -> Result<(), SubscriberError> {
        self.submit(item.clone());
        Ok(())
    }

    fn on_error(&self, error: SubscriberError) {
        Processor::on_error(self, error);
    }

    fn on_close(&self) {
        Processor::on_close(self);
    }
}
