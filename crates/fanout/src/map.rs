#![forbid(unsafe_code)]

//! Derived publishers.
//!
//! [`Mapped<U>`] is a publisher backed by a private child processor. A relay
//! subscription connects the child to its upstream only while the child has
//! subscribers of its own:
//!
//! ```text
//! upstream ──(one relay subscription)──► transform ──► child ──► subscriber 1
//!                                                          ├──► subscriber 2
//!                                                          └──► subscriber N
//! ```
//!
//! The first child subscriber opens the relay subscription and the last
//! disposal tears it down. However many subscribers the child has, upstream
//! sees at most one relay.
//!
//! The child holds its upstream strongly; the relay subscription refers back
//! to the child weakly, so dropping every `Mapped` handle releases the child
//! and disposes the relay.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};

use tracing::debug;

use crate::disposable::Disposable;
use crate::error::SubscriberError;
use crate::processor::{Core, Processor, ProcessorConfig};
use crate::publisher::Publisher;
use crate::subscriber::Subscriber;

type Connect = Box<dyn Fn() -> Disposable + Send + Sync>;

#[derive(Default)]
struct Link {
    upstream: Option<Disposable>,
    /// Thread currently connecting or disconnecting. It re-checks demand
    /// before clearing this.
    busy: Option<ThreadId>,
}

enum Step {
    Connect,
    Disconnect(Disposable),
}

/// Reference-counted bridge from a child processor to its upstream.
pub(crate) struct Relay {
    link: Mutex<Link>,
    settled: Condvar,
    connect: Connect,
}

/// Clears the busy mark and wakes waiters, also when an upstream call unwinds.
struct Transition<'a> {
    relay: &'a Relay,
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        self.relay.lock().busy = None;
        self.relay.settled.notify_all();
    }
}

impl Relay {
    pub(crate) fn new(connect: Connect) -> Self {
        Self {
            link: Mutex::new(Link::default()),
            settled: Condvar::new(),
            connect,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connect or disconnect until the upstream subscription matches
    /// `wanted()`.
    ///
    /// Upstream calls happen without holding the link lock: connecting to a
    /// closed upstream closes the child synchronously, and that close may
    /// re-enter here.
    ///
    /// While another thread is mid-transition, a caller with `wait` set
    /// blocks until that transition ends and then re-checks; other callers
    /// return and leave the re-check to the busy thread. A re-entrant call
    /// from the busy thread itself always returns.
    pub(crate) fn reconcile(&self, label: &str, wait: bool, wanted: impl Fn() -> bool) {
        let me = thread::current().id();
        loop {
            let step = {
                let mut link = self.lock();
                while let Some(owner) = link.busy {
                    if !wait || owner == me {
                        return;
                    }
                    link = self
                        .settled
                        .wait(link)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                let step = match (wanted(), link.upstream.take()) {
                    (true, None) => Step::Connect,
                    (false, Some(upstream)) => Step::Disconnect(upstream),
                    (_, current) => {
                        link.upstream = current;
                        return;
                    }
                };
                link.busy = Some(me);
                step
            };

            let _transition = Transition { relay: self };
            match step {
                Step::Connect => {
                    let upstream = (self.connect)();
                    debug!(processor = %label, "relay connected upstream");
                    self.lock().upstream = Some(upstream);
                }
                Step::Disconnect(upstream) => {
                    upstream.dispose();
                    debug!(processor = %label, "relay disconnected upstream");
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.lock().upstream.is_some()
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        let link = self.link.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(upstream) = link.upstream.take() {
            upstream.dispose();
        }
    }
}

/// Upstream-side subscriber that feeds transformed items into the child.
struct RelaySubscriber<U, F> {
    child: Weak<Core<U>>,
    transform: Arc<F>,
}

impl<U: 'static, F> RelaySubscriber<U, F> {
    fn child(&self) -> Option<Processor<U>> {
        self.child.upgrade().map(Processor::from_core)
    }
}

impl<T, U, F> Subscriber<T> for RelaySubscriber<U, F>
where
    U: 'static,
    F: Fn(&T) -> U + Send + Sync,
{
    fn on_item(&self, item: &T) -> Result<(), SubscriberError> {
        if let Some(child) = self.child() {
            child.submit((self.transform)(item));
        }
        Ok(())
    }

    fn on_error(&self, error: SubscriberError) {
        if let Some(child) = self.child() {
            child.on_error(error);
        }
    }

    fn on_close(&self) {
        if let Some(child) = self.child() {
            child.on_close();
        }
    }
}

/// Publisher of transformed items from an upstream publisher.
///
/// Built by [`Publisher::map`]. Cloning shares the same child processor.
/// When the upstream closes or fails, the derived publisher closes or fails
/// with it.
pub struct Mapped<U> {
    processor: Processor<U>,
}

impl<U> Clone for Mapped<U> {
    fn clone(&self) -> Self {
        Self {
            processor: self.processor.clone(),
        }
    }
}

impl<U> fmt::Debug for Mapped<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapped")
            .field("processor", &self.processor)
            .finish()
    }
}

impl<U: 'static> Mapped<U> {
    /// Derive from `upstream` with the default child configuration.
    #[must_use]
    pub fn new<T, P, F>(upstream: P, transform: F) -> Self
    where
        T: 'static,
        P: Publisher<T> + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        Self::with_config(
            upstream,
            transform,
            ProcessorConfig::default().with_label("map"),
        )
    }

    /// Derive from `upstream`, configuring the child processor explicitly.
    #[must_use]
    pub fn with_config<T, P, F>(upstream: P, transform: F, config: ProcessorConfig) -> Self
    where
        T: 'static,
        P: Publisher<T> + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let transform = Arc::new(transform);
        let core = Arc::new_cyclic(|child: &Weak<Core<U>>| {
            let child = child.clone();
            let connect: Connect = Box::new(move || {
                upstream.subscribe(Arc::new(RelaySubscriber {
                    child: child.clone(),
                    transform: Arc::clone(&transform),
                }))
            });
            Core::new(config, Some(Relay::new(connect)))
        });
        Self {
            processor: Processor::from_core(core),
        }
    }

    /// Number of subscribers on the derived side.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.processor.subscriber_count()
    }

    /// Whether the derived side has closed (because its upstream did).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.processor.is_closed()
    }

    /// Whether the relay currently holds an upstream subscription.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.processor.relay().is_some_and(Relay::is_connected)
    }
}

impl<U: 'static> Publisher<U> for Mapped<U> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<U>>) -> Disposable {
        self.processor.subscribe(subscriber)
    }

    fn has_subscribers(&self) -> bool {
        self.processor.has_subscribers()
    }
}
