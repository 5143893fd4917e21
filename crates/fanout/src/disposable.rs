#![forbid(unsafe_code)]

//! Cancellation handles for subscriptions.
//!
//! A [`Disposable`] is the right to cancel exactly one subscription. It keeps
//! only a weak back-reference to the processor that issued it, so holding a
//! handle never keeps a processor (or its subscriber entry) alive.
//!
//! Disposal is explicit. Wrap the handle in a [`DisposeGuard`] to tie the
//! subscription to a scope instead.

use std::fmt;
use std::sync::Weak;

/// Identity of one registration within a processor.
///
/// Identities increase monotonically and are never reused by the processor
/// that issued them, even after the subscription is disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Removal endpoint a [`Disposable`] points back to.
pub(crate) trait Detach: Send + Sync {
    /// Remove `id` if it is still registered. Absent ids are ignored.
    fn detach(&self, id: SubscriptionId);
}

#[derive(Clone)]
struct Binding {
    owner: Weak<dyn Detach>,
    id: SubscriptionId,
}

/// One-shot cancellation handle for a single subscription.
///
/// Calling [`dispose`](Self::dispose) any number of times, from any clone, is
/// safe. After the first call (or after the processor closes) further calls
/// do nothing.
#[derive(Clone, Default)]
pub struct Disposable {
    binding: Option<Binding>,
}

impl Disposable {
    pub(crate) fn bound(owner: Weak<dyn Detach>, id: SubscriptionId) -> Self {
        Self {
            binding: Some(Binding { owner, id }),
        }
    }

    /// A handle that refers to nothing. Returned when subscribing to an
    /// already-closed processor.
    #[must_use]
    pub fn inert() -> Self {
        Self { binding: None }
    }

    /// Cancel the subscription, if it is still registered.
    pub fn dispose(&self) {
        if let Some(binding) = &self.binding
            && let Some(owner) = binding.owner.upgrade()
        {
            owner.detach(binding.id);
        }
    }

    /// Whether the issuing processor is still alive.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.binding
            .as_ref()
            .is_some_and(|binding| binding.owner.strong_count() > 0)
    }

    /// Identity of the subscription this handle cancels.
    #[must_use]
    pub fn id(&self) -> Option<SubscriptionId> {
        self.binding.as_ref().map(|binding| binding.id)
    }

    /// Convert into a guard that disposes when dropped.
    #[must_use]
    pub fn into_guard(self) -> DisposeGuard {
        DisposeGuard { inner: Some(self) }
    }
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("id", &self.id())
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// RAII guard that disposes its subscription on drop.
pub struct DisposeGuard {
    inner: Option<Disposable>,
}

impl DisposeGuard {
    /// Give the handle back without disposing it.
    #[must_use]
    pub fn release(mut self) -> Disposable {
        self.inner.take().unwrap_or_default()
    }
}

impl Drop for DisposeGuard {
    fn drop(&mut self) {
        if let Some(disposable) = self.inner.take() {
            disposable.dispose();
        }
    }
}

impl fmt::Debug for DisposeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposeGuard")
            .field("inner", &self.inner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        detached: Mutex<Vec<SubscriptionId>>,
    }

    impl Detach for Recorder {
        fn detach(&self, id: SubscriptionId) {
            self.detached.lock().unwrap().push(id);
        }
    }

    fn bind(owner: &Arc<Recorder>, raw: u64) -> Disposable {
        let weak: Weak<dyn Detach> = Arc::downgrade(owner) as Weak<dyn Detach>;
        Disposable::bound(weak, SubscriptionId::new(raw))
    }

    #[test]
    fn dispose_reaches_owner() {
        let owner = Arc::new(Recorder::default());
        let d = bind(&owner, 3);
        assert!(d.is_bound());
        assert_eq!(d.id(), Some(SubscriptionId::new(3)));

        d.dispose();
        assert_eq!(*owner.detached.lock().unwrap(), vec![SubscriptionId::new(3)]);
    }

    #[test]
    fn inert_handle_does_nothing() {
        let d = Disposable::inert();
        assert!(!d.is_bound());
        assert_eq!(d.id(), None);
        d.dispose();
        d.dispose();
    }

    #[test]
    fn handle_does_not_keep_owner_alive() {
        let owner = Arc::new(Recorder::default());
        let d = bind(&owner, 1);
        drop(owner);
        assert!(!d.is_bound());
        d.dispose();
    }

    #[test]
    fn guard_disposes_on_drop() {
        let owner = Arc::new(Recorder::default());
        {
            let _guard = bind(&owner, 9).into_guard();
            assert!(owner.detached.lock().unwrap().is_empty());
        }
        assert_eq!(*owner.detached.lock().unwrap(), vec![SubscriptionId::new(9)]);
    }

    #[test]
    fn released_guard_keeps_subscription() {
        let owner = Arc::new(Recorder::default());
        let d = bind(&owner, 4).into_guard().release();
        assert!(owner.detached.lock().unwrap().is_empty());
        assert_eq!(d.id(), Some(SubscriptionId::new(4)));
    }

    #[test]
    fn display_and_debug() {
        assert_eq!(SubscriptionId::new(12).to_string(), "#12");
        let dbg = format!("{:?}", Disposable::inert());
        assert!(dbg.contains("Disposable"));
        assert!(dbg.contains("bound: false"));
    }
}
