#![forbid(unsafe_code)]

//! In-process reactive broadcast.
//!
//! A [`Processor`] fans submitted items out to any number of
//! [`Subscriber`]s. Each subscription is cancelled through the
//! [`Disposable`] returned by [`Publisher::subscribe`].
//!
//! # Architecture
//!
//! ```text
//!   owner ── submit / on_error / on_close ──► Processor ──► subscriber 1
//!                                                │      ├──► subscriber 2
//!                                                │      └──► ...
//!                                                │
//!                                   (no subscribers) └──► fallback handler
//!
//!   Processor::map(f) ──► Mapped (child processor, relayed lazily)
//! ```
//!
//! - [`Processor`]: the hub. Open until closed, then inert forever.
//! - [`Publisher`]: subscribe, query, and derive with [`Publisher::map`].
//! - [`Subscriber`]: item, error, and close reactions. Adapt a closure with
//!   [`from_fn`] or [`try_from_fn`].
//! - [`Disposable`]: cancels one subscription; [`DisposeGuard`] does it on drop.
//!
//! # Failure isolation
//!
//! A subscriber whose `on_item` fails (returns `Err`, or panics when
//! [`ProcessorConfig::isolate_panics`] is on) is unsubscribed and receives
//! that failure in `on_error`. Nothing propagates to the caller of
//! [`Processor::submit`].
//!
//! # Example
//!
//! ```
//! use fanout::{Processor, Publisher};
//! use std::sync::{Arc, Mutex};
//!
//! let proc: Processor<String> = Processor::new();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//!
//! let sink = Arc::clone(&seen);
//! let sub = proc.subscribe_fn(move |item: &String| sink.lock().unwrap().push(item.clone()));
//!
//! proc.submit("x".to_string());
//! sub.dispose();
//! proc.submit("y".to_string());
//!
//! assert_eq!(*seen.lock().unwrap(), vec!["x".to_string()]);
//! assert!(!proc.has_subscribers());
//! ```

pub mod disposable;
pub mod error;
pub mod map;
pub mod processor;
pub mod publisher;
pub mod subscriber;

pub use disposable::{DisposeGuard, Disposable, SubscriptionId};
pub use error::{SubscriberError, SubscriberPanic};
pub use map::Mapped;
pub use processor::{Processor, ProcessorConfig};
pub use publisher::Publisher;
pub use subscriber::{FnSubscriber, Subscriber, TryFnSubscriber, from_fn, try_from_fn};
