#![forbid(unsafe_code)]

//! Typed destination cells for bound values.
//!
//! A [`Property<T>`] is a shared, subscribable cell a binding writes its
//! decoded values into. Cloning a property creates a new handle to the
//! **same** cell, and that shared identity is what lets a collection
//! recognize "the same binding declared twice" and replace instead of
//! duplicate.
//!
//! # Invariants
//!
//! 1. `version` increments exactly once per value-changing write.
//! 2. Writing an equal value is a no-op (no version bump, no
//!    notifications).
//! 3. Subscribers are notified in registration order; dead subscribers
//!    are pruned lazily during notification.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

type CallbackRc<T> = Rc<dyn Fn(&T)>;
type CallbackWeak<T> = Weak<dyn Fn(&T)>;

struct PropertyInner<T> {
    value: Option<T>,
    version: u64,
    subscribers: Vec<CallbackWeak<T>>,
}

/// A shared, version-tracked destination cell. Starts empty; the first
/// applied binding result populates it.
pub struct Property<T> {
    inner: Rc<RefCell<PropertyInner<T>>>,
}

impl<T> Clone for Property<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Property")
            .field("value", &inner.value)
            .field("version", &inner.version)
            .finish_non_exhaustive()
    }
}

impl<T: Clone + PartialEq + 'static> Default for Property<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + PartialEq + 'static> Property<T> {
    /// An empty property.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(PropertyInner {
                value: None,
                version: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// A property seeded with `value`.
    #[must_use]
    pub fn with_value(value: T) -> Self {
        let property = Self::new();
        property.set(value);
        property
    }

    /// A clone of the current value, if the property has ever been set.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.inner.borrow().value.clone()
    }

    /// Access the current value by reference without cloning.
    pub fn with<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        f(self.inner.borrow().value.as_ref())
    }

    /// Write a new value, notifying subscribers if it changed.
    pub fn set(&self, value: T) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.value.as_ref() == Some(&value) {
                return;
            }
            inner.value = Some(value);
            inner.version += 1;
        }
        self.notify();
    }

    /// Subscribe to value changes. Dropping the returned guard
    /// unsubscribes the callback.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> PropertySubscription {
        let strong: CallbackRc<T> = Rc::new(callback);
        let weak = Rc::downgrade(&strong);
        self.inner.borrow_mut().subscribers.push(weak);
        PropertySubscription {
            _guard: Box::new(strong),
        }
    }

    /// Number of value-changing writes so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Cell identity, shared by every clone of this property. Used as
    /// the destination component of a binding's identity.
    pub(crate) fn id(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }

    fn notify(&self) {
        let callbacks: Vec<CallbackRc<T>> = {
            let mut inner = self.inner.borrow_mut();
            inner.subscribers.retain(|w| w.strong_count() > 0);
            inner.subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        if callbacks.is_empty() {
            return;
        }
        let value = self.inner.borrow().value.clone();
        if let Some(value) = value {
            for callback in &callbacks {
                callback(&value);
            }
        }
    }
}

/// RAII guard for a property subscriber.
pub struct PropertySubscription {
    _guard: Box<dyn std::any::Any>,
}

impl std::fmt::Debug for PropertySubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertySubscription").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn starts_empty() {
        let p: Property<i32> = Property::new();
        assert_eq!(p.get(), None);
        assert_eq!(p.version(), 0);
    }

    #[test]
    fn set_and_get() {
        let p = Property::new();
        p.set(42);
        assert_eq!(p.get(), Some(42));
        assert_eq!(p.version(), 1);
    }

    #[test]
    fn equal_set_is_noop() {
        let p = Property::with_value(5);
        p.set(5);
        assert_eq!(p.version(), 1);
    }

    #[test]
    fn clone_shares_cell_and_identity() {
        let p = Property::new();
        let q = p.clone();
        q.set("shared".to_string());
        assert_eq!(p.get().as_deref(), Some("shared"));
        assert_eq!(p.id(), q.id());

        let other: Property<String> = Property::new();
        assert_ne!(p.id(), other.id());
    }

    #[test]
    fn subscribers_fire_on_change_only() {
        let p = Property::new();
        let count = Rc::new(Cell::new(0u32));
        let sink = Rc::clone(&count);
        let _sub = p.subscribe(move |_| sink.set(sink.get() + 1));
        p.set(1);
        p.set(1);
        p.set(2);
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn subscription_drop_unsubscribes() {
        let p = Property::new();
        let count = Rc::new(Cell::new(0u32));
        let sink = Rc::clone(&count);
        let sub = p.subscribe(move |_| sink.set(sink.get() + 1));
        p.set(1);
        drop(sub);
        p.set(2);
        assert_eq!(count.get(), 1);
    }
}
