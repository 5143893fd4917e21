//! Property-based invariant tests for processor subscription bookkeeping.
//!
//! Random operation sequences run against a [`Processor`] and a plain model
//! side by side. After every step:
//!
//! 1. `has_subscribers()` equals "model set non-empty".
//! 2. `subscriber_count()` equals the model set size.
//! 3. A closed processor has no subscribers.
//! 4. Each submitted item reaches exactly the live subscribers, or the
//!    fallback when there are none.
//! 5. A failing subscriber gets exactly one `on_error` and nothing afterwards.
//! 6. Every subscriber sees at most one terminal reaction.
//! 7. `close_if_unsubscribed` succeeds iff the set was empty (or already closed).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use fanout::{Disposable, Processor, Publisher, Subscriber, SubscriberError};
use proptest::prelude::*;

// ── Strategies ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    Subscribe,
    SubscribeFailing,
    Dispose(usize),
    Submit(u16),
    Close,
    CloseIfUnsubscribed,
    SetFallback,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Subscribe),
        1 => Just(Op::SubscribeFailing),
        3 => (0usize..32).prop_map(Op::Dispose),
        4 => any::<u16>().prop_map(Op::Submit),
        1 => Just(Op::Close),
        1 => Just(Op::CloseIfUnsubscribed),
        1 => Just(Op::SetFallback),
    ]
}

// ── Harness ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct Tracker {
    fails: bool,
    items: Mutex<Vec<u16>>,
    errors: AtomicUsize,
    closes: AtomicUsize,
}

impl Subscriber<u16> for Tracker {
    fn on_item(&self, item: &u16) -> Result<(), SubscriberError> {
        self.items.lock().unwrap().push(*item);
        if self.fails {
            Err(SubscriberError::msg("scripted failure"))
        } else {
            Ok(())
        }
    }

    fn on_error(&self, _error: SubscriberError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    fn on_close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

struct Entry {
    tracker: Arc<Tracker>,
    handle: Disposable,
    live: bool,
    expected_items: Vec<u16>,
    expected_errors: usize,
    expected_closes: usize,
}

struct Model {
    closed: bool,
    has_fallback: bool,
    expected_fallback: Vec<u16>,
}

impl Model {
    fn live_count(entries: &[Entry]) -> usize {
        entries.iter().filter(|e| e.live).count()
    }
}

fn subscribe(proc: &Processor<u16>, model: &Model, fails: bool) -> Entry {
    let tracker = Arc::new(Tracker {
        fails,
        ..Tracker::default()
    });
    let handle = proc.subscribe(Arc::clone(&tracker) as Arc<dyn Subscriber<u16>>);
    Entry {
        tracker,
        handle,
        live: !model.closed,
        expected_items: Vec::new(),
        expected_errors: 0,
        expected_closes: usize::from(model.closed),
    }
}

// ── Properties ────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn processor_matches_model(ops in proptest::collection::vec(op_strategy(), 1..64)) {
        let proc: Processor<u16> = Processor::new();
        let fallback_seen = Arc::new(Mutex::new(Vec::new()));
        let mut entries: Vec<Entry> = Vec::new();
        let mut model = Model {
            closed: false,
            has_fallback: false,
            expected_fallback: Vec::new(),
        };

        for op in ops {
            match op {
                Op::Subscribe => entries.push(subscribe(&proc, &model, false)),
                Op::SubscribeFailing => entries.push(subscribe(&proc, &model, true)),
                Op::Dispose(i) => {
                    if let Some(entry) = entries.get_mut(i) {
                        entry.handle.dispose();
                        entry.live = false;
                    }
                }
                Op::Submit(v) => {
                    proc.submit(v);
                    if !model.closed {
                        if Model::live_count(&entries) == 0 {
                            if model.has_fallback {
                                model.expected_fallback.push(v);
                            }
                        } else {
                            for entry in entries.iter_mut().filter(|e| e.live) {
                                entry.expected_items.push(v);
                                if entry.tracker.fails {
                                    entry.expected_errors += 1;
                                    entry.live = false;
                                }
                            }
                        }
                    }
                }
                Op::Close => {
                    proc.on_close();
                    if !model.closed {
                        for entry in entries.iter_mut().filter(|e| e.live) {
                            entry.expected_closes += 1;
                            entry.live = false;
                        }
                        model.closed = true;
                    }
                }
                Op::CloseIfUnsubscribed => {
                    let empty = Model::live_count(&entries) == 0;
                    let closed = proc.close_if_unsubscribed();
                    prop_assert_eq!(closed, model.closed || empty);
                    if empty {
                        model.closed = true;
                    }
                }
                Op::SetFallback => {
                    let sink = Arc::clone(&fallback_seen);
                    proc.set_fallback_handler(move |v| sink.lock().unwrap().push(v));
                    model.has_fallback = true;
                }
            }

            let live = Model::live_count(&entries);
            prop_assert_eq!(proc.has_subscribers(), live > 0);
            prop_assert_eq!(proc.subscriber_count(), live);
            prop_assert_eq!(proc.is_closed(), model.closed);
            if model.closed {
                prop_assert!(!proc.has_subscribers());
            }
        }

        for entry in &entries {
            prop_assert_eq!(&*entry.tracker.items.lock().unwrap(), &entry.expected_items);
            let errors = entry.tracker.errors.load(Ordering::SeqCst);
            let closes = entry.tracker.closes.load(Ordering::SeqCst);
            prop_assert_eq!(errors, entry.expected_errors);
            prop_assert_eq!(closes, entry.expected_closes);
            prop_assert!(errors + closes <= 1);
        }
        prop_assert_eq!(&*fallback_seen.lock().unwrap(), &model.expected_fallback);
    }

    #[test]
    fn mapped_relay_tracks_child_demand(
        ops in proptest::collection::vec((any::<bool>(), 0usize..8), 1..48)
    ) {
        let orig: Processor<u32> = Processor::new();
        let mapped = orig.map(|x: &u32| u64::from(*x) * 3);
        let mut handles: Vec<Option<Disposable>> = Vec::new();

        for (subscribe, index) in ops {
            if subscribe {
                handles.push(Some(mapped.subscribe_fn(|_| {})));
            } else if let Some(slot) = handles.get_mut(index)
                && let Some(handle) = slot.take()
            {
                handle.dispose();
            }

            let live = handles.iter().filter(|h| h.is_some()).count();
            prop_assert_eq!(mapped.subscriber_count(), live);
            prop_assert_eq!(orig.subscriber_count(), usize::from(live > 0));
            prop_assert_eq!(mapped.is_connected(), live > 0);
        }
    }
}
