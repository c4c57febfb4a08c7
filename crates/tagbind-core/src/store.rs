#![forbid(unsafe_code)]

//! The store seam: pull, push, and write access to tag-addressed values.
//!
//! The engine consumes exactly this surface from its backend:
//!
//! - [`Store::get`] — pull the current value once.
//! - [`Store::publisher`] — push: a live stream of [`FetchResult`]s,
//!   starting with the current state at subscription time.
//! - [`Store::set`] / [`Store::set_many`] — writes (the batch variant
//!   performs every write before any notification goes out).
//!
//! [`MemoryStore`] is the in-process reference implementation: shared
//! single-owner state behind `Rc<RefCell<..>>`, observers registered as
//! `Weak` callbacks and pruned lazily on notify, RAII unsubscription via
//! [`StoreSubscription`].
//!
//! # Invariants
//!
//! 1. A subscription observes the current state immediately — the stored
//!    value, or a `NotFound` failure for an absent key.
//! 2. Per entry, `version` increments by exactly one per value-changing
//!    write; writing an equal value is a no-op (no notification).
//! 3. Observers for one reference are notified in registration order.
//! 4. Dropping a [`StoreSubscription`] stops its callback before the next
//!    notification cycle.
//! 5. `set_many` applies all writes before notifying, so every observer
//!    sees the post-batch state however it reads back into the store.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use serde_json::Value;
use tracing::{debug, trace};

use crate::fetch::{FetchError, FetchResult, Metadata};
use crate::tag::Reference;

/// Push/pull/write access to tag-addressed values.
pub trait Store {
    /// Pull the current value for `reference` once.
    fn get(&self, reference: &Reference) -> FetchResult;

    /// Subscribe to `reference`. The observer is invoked immediately with
    /// the current state and again after every value-changing write, until
    /// the returned guard is dropped.
    fn publisher(
        &self,
        reference: &Reference,
        observer: Box<dyn Fn(&FetchResult)>,
    ) -> StoreSubscription;

    /// Write a value, notifying observers if it changed.
    fn set(&self, reference: Reference, value: Value);

    /// Write a batch of values, notifying observers only after every
    /// entry has been written.
    fn set_many(&self, entries: Vec<(Reference, Value)>);
}

/// RAII guard for a store observer.
///
/// Dropping the guard drops the only strong reference to the callback, so
/// the `Weak` in the observer list fails to upgrade on the next notify.
pub struct StoreSubscription {
    _guard: Box<dyn std::any::Any>,
}

impl std::fmt::Debug for StoreSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSubscription").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

type ObserverRc = Rc<dyn Fn(&FetchResult)>;
type ObserverWeak = Weak<dyn Fn(&FetchResult)>;

struct Entry {
    value: Value,
    version: u64,
}

#[derive(Default)]
struct MemoryInner {
    entries: AHashMap<Reference, Entry>,
    observers: AHashMap<Reference, Vec<ObserverWeak>>,
}

/// In-memory [`Store`] for tests and embedders without their own backend.
///
/// Cloning a `MemoryStore` creates a new handle to the **same** state.
#[derive(Default)]
pub struct MemoryStore {
    inner: Rc<RefCell<MemoryInner>>,
}

impl Clone for MemoryStore {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("MemoryStore")
            .field("entries", &inner.entries.len())
            .field("observed", &inner.observers.len())
            .finish()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of `reference` as a [`FetchResult`].
    fn snapshot(&self, reference: &Reference) -> FetchResult {
        let inner = self.inner.borrow();
        match inner.entries.get(reference) {
            Some(entry) => FetchResult::Value(
                entry.value.clone(),
                Metadata::new(reference.clone(), entry.version),
            ),
            None => FetchResult::Error(
                FetchError::NotFound(reference.clone()),
                Metadata::new(reference.clone(), 0),
            ),
        }
    }

    /// Write one entry. Returns true if the value changed.
    fn write(&self, reference: &Reference, value: Value) -> bool {
        let mut inner = self.inner.borrow_mut();
        match inner.entries.get_mut(reference) {
            Some(entry) => {
                if entry.value == value {
                    return false;
                }
                entry.value = value;
                entry.version += 1;
            }
            None => {
                inner
                    .entries
                    .insert(reference.clone(), Entry { value, version: 1 });
            }
        }
        true
    }

    /// Notify live observers of `reference`, pruning dead ones.
    fn notify(&self, reference: &Reference) {
        // Collect live callbacks first, then call outside the borrow:
        // observers are free to read (or write) the store re-entrantly.
        let callbacks: Vec<ObserverRc> = {
            let mut inner = self.inner.borrow_mut();
            match inner.observers.get_mut(reference) {
                None => return,
                Some(observers) => {
                    observers.retain(|w| w.strong_count() > 0);
                    observers.iter().filter_map(Weak::upgrade).collect()
                }
            }
        };
        if callbacks.is_empty() {
            return;
        }
        trace!(reference = %reference, observers = callbacks.len(), "notify");
        let result = self.snapshot(reference);
        for callback in &callbacks {
            callback(&result);
        }
    }
}

impl Store for MemoryStore {
    fn get(&self, reference: &Reference) -> FetchResult {
        self.snapshot(reference)
    }

    fn publisher(
        &self,
        reference: &Reference,
        observer: Box<dyn Fn(&FetchResult)>,
    ) -> StoreSubscription {
        let strong: ObserverRc = Rc::from(observer);
        let weak = Rc::downgrade(&strong);
        self.inner
            .borrow_mut()
            .observers
            .entry(reference.clone())
            .or_default()
            .push(weak);
        // Emit the current state (value or NotFound) right away so
        // subscribers settle without waiting for a write.
        let current = self.snapshot(reference);
        strong(&current);
        StoreSubscription {
            _guard: Box::new(strong),
        }
    }

    fn set(&self, reference: Reference, value: Value) {
        if self.write(&reference, value) {
            debug!(reference = %reference, "set");
            self.notify(&reference);
        }
    }

    fn set_many(&self, entries: Vec<(Reference, Value)>) {
        let mut changed = Vec::with_capacity(entries.len());
        for (reference, value) in entries {
            if self.write(&reference, value) {
                changed.push(reference);
            }
        }
        debug!(changed = changed.len(), "set_many");
        for reference in &changed {
            self.notify(reference);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    fn r(path: &str) -> Reference {
        Reference::new(path)
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = MemoryStore::new();
        let fr = store.get(&r("a"));
        assert!(matches!(fr.error(), Some(FetchError::NotFound(_))));
        assert_eq!(fr.metadata().version, 0);
    }

    #[test]
    fn set_then_get() {
        let store = MemoryStore::new();
        store.set(r("a"), json!(1));
        let fr = store.get(&r("a"));
        assert_eq!(fr.value(), Some(&json!(1)));
        assert_eq!(fr.metadata().version, 1);
    }

    #[test]
    fn equal_set_is_noop() {
        let store = MemoryStore::new();
        store.set(r("a"), json!(1));
        store.set(r("a"), json!(1));
        assert_eq!(store.get(&r("a")).metadata().version, 1);
    }

    #[test]
    fn version_is_monotonic() {
        let store = MemoryStore::new();
        for i in 1..=10 {
            store.set(r("a"), json!(i));
        }
        assert_eq!(store.get(&r("a")).metadata().version, 10);
    }

    #[test]
    fn publisher_emits_immediately() {
        let store = MemoryStore::new();
        store.set(r("a"), json!("hello"));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _sub = store.publisher(
            &r("a"),
            Box::new(move |fr| sink.borrow_mut().push(fr.clone())),
        );
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0].value(), Some(&json!("hello")));
    }

    #[test]
    fn publisher_emits_not_found_for_absent_key() {
        let store = MemoryStore::new();
        let seen = Rc::new(Cell::new(false));
        let sink = Rc::clone(&seen);
        let _sub = store.publisher(
            &r("missing"),
            Box::new(move |fr| sink.set(fr.error().is_some())),
        );
        assert!(seen.get());
    }

    #[test]
    fn change_notification() {
        let store = MemoryStore::new();
        let count = Rc::new(Cell::new(0u32));
        let sink = Rc::clone(&count);
        let _sub = store.publisher(&r("a"), Box::new(move |_| sink.set(sink.get() + 1)));
        assert_eq!(count.get(), 1); // immediate emission
        store.set(r("a"), json!(1));
        store.set(r("a"), json!(2));
        store.set(r("a"), json!(2)); // no-op
        assert_eq!(count.get(), 3);
    }

    #[test]
    fn subscription_drop_unsubscribes() {
        let store = MemoryStore::new();
        let count = Rc::new(Cell::new(0u32));
        let sink = Rc::clone(&count);
        let sub = store.publisher(&r("a"), Box::new(move |_| sink.set(sink.get() + 1)));
        store.set(r("a"), json!(1));
        assert_eq!(count.get(), 2);
        drop(sub);
        store.set(r("a"), json!(2));
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn observers_are_per_reference() {
        let store = MemoryStore::new();
        let count = Rc::new(Cell::new(0u32));
        let sink = Rc::clone(&count);
        let _sub = store.publisher(&r("a"), Box::new(move |_| sink.set(sink.get() + 1)));
        store.set(r("b"), json!(1));
        assert_eq!(count.get(), 1); // only the immediate emission
    }

    #[test]
    fn set_many_notifies_after_all_writes() {
        let store = MemoryStore::new();
        store.set(r("a"), json!(0));
        store.set(r("b"), json!(0));

        // The observer of `a` reads back `b` to prove both writes landed
        // before any notification.
        let b_at_notify = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&b_at_notify);
        let probe = store.clone();
        let _sub = store.publisher(
            &r("a"),
            Box::new(move |fr| {
                if fr.metadata().version > 0 {
                    *sink.borrow_mut() = probe.get(&r("b")).value().cloned();
                }
            }),
        );

        store.set_many(vec![(r("a"), json!(1)), (r("b"), json!(2))]);
        assert_eq!(*b_at_notify.borrow(), Some(json!(2)));
    }

    #[test]
    fn clone_shares_state() {
        let store = MemoryStore::new();
        let handle = store.clone();
        handle.set(r("a"), json!(7));
        assert_eq!(store.get(&r("a")).value(), Some(&json!(7)));
    }
}
