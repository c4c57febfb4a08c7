#![forbid(unsafe_code)]

//! Reactive evaluation: a live subscription over an expression tree.
//!
//! A [`Handler`] owns one expression plus every store subscription the
//! expression needs, and re-runs the whole tree whenever any upstream
//! value changes. References are discovered *during* evaluation — a
//! `from` whose reference is itself computed only becomes visible once
//! its inputs resolve — so the handler evaluates, subscribes to whatever
//! it missed, and evaluates again until the tree settles.
//!
//! # Invariants
//!
//! 1. Nothing is emitted while any reference the evaluation touched is
//!    still awaiting its first fetch (the tree stays "requesting").
//! 2. Equal consecutive outputs are coalesced: one upstream change
//!    produces at most one emission.
//! 3. After [`Handler::unsubscribe`] (or drop) no further emission
//!    occurs, and every store subscription is released — including ones
//!    acquired for dynamically discovered references.
//! 4. Subscriptions mirror the latest settled evaluation: a reference
//!    the tree stopped reading (a retargeted pointer, a dead branch) is
//!    released at the next settle, together with its cached value.
//! 5. Store callbacks never run against a torn-down handler: they hold
//!    only a weak back-reference.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;
use serde_json::Value;
use tracing::trace;

use tagbind_core::{Context, FetchError, FetchResult, Reference, Store, StoreSubscription};

use crate::compute;
use crate::error::ComputeError;
use crate::scope::{Resolver, Scope};

type Emit = Rc<dyn Fn(Result<Value, ComputeError>)>;
type Cache = AHashMap<Reference, Result<Value, FetchError>>;

/// Resolves from the handler's fetch cache, recording every reference
/// the evaluation touched: hits feed the pruning pass, misses feed the
/// subscribe pass.
struct CacheResolver<'a> {
    cache: &'a Cache,
    hits: RefCell<Vec<Reference>>,
    misses: RefCell<Vec<Reference>>,
}

impl Resolver for CacheResolver<'_> {
    fn resolve(&self, reference: &Reference) -> Result<Value, ComputeError> {
        match self.cache.get(reference) {
            Some(Ok(value)) => {
                self.hits.borrow_mut().push(reference.clone());
                Ok(value.clone())
            }
            Some(Err(e)) => {
                self.hits.borrow_mut().push(reference.clone());
                Err(ComputeError::from(e.clone()))
            }
            None => {
                self.misses.borrow_mut().push(reference.clone());
                Err(ComputeError::Pending(reference.clone()))
            }
        }
    }
}

struct HandlerInner {
    expression: Value,
    context: Context,
    store: Rc<dyn Store>,
    cache: Cache,
    subscriptions: AHashMap<Reference, StoreSubscription>,
    emit: Emit,
    last: Option<Result<Value, ComputeError>>,
    active: bool,
    /// Re-entrancy guard: store callbacks arriving mid-evaluation only
    /// mark the state dirty; the evaluation loop picks the change up.
    evaluating: bool,
    dirty: bool,
}

/// A live, self-updating evaluation of one expression.
pub struct Handler {
    inner: Rc<RefCell<HandlerInner>>,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Handler")
            .field("subscriptions", &inner.subscriptions.len())
            .field("active", &inner.active)
            .finish_non_exhaustive()
    }
}

impl Handler {
    /// Start evaluating `expression` against `store`, delivering every
    /// settled output through `emit`. Evaluation begins immediately; if
    /// the store answers synchronously the first emission happens before
    /// `new` returns.
    pub fn new(
        store: Rc<dyn Store>,
        expression: Value,
        context: Context,
        emit: impl Fn(Result<Value, ComputeError>) + 'static,
    ) -> Self {
        let inner = Rc::new(RefCell::new(HandlerInner {
            expression,
            context,
            store,
            cache: AHashMap::new(),
            subscriptions: AHashMap::new(),
            emit: Rc::new(emit),
            last: None,
            active: true,
            evaluating: false,
            dirty: false,
        }));
        let handler = Self { inner };
        evaluate_loop(&handler.inner);
        handler
    }

    /// Tear down every store subscription. Late-arriving results are
    /// dropped; nothing is emitted after this returns.
    pub fn unsubscribe(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.active = false;
        inner.subscriptions.clear();
    }

    /// Number of live upstream subscriptions (static and discovered).
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.borrow().subscriptions.len()
    }
}

fn on_fetch(inner: &Rc<RefCell<HandlerInner>>, result: &FetchResult) {
    {
        let mut i = inner.borrow_mut();
        if !i.active {
            return;
        }
        let (value, metadata) = result.clone().into_result();
        i.cache.insert(metadata.reference, value);
        if i.evaluating {
            i.dirty = true;
            return;
        }
    }
    evaluate_loop(inner);
}

fn evaluate_loop(inner: &Rc<RefCell<HandlerInner>>) {
    {
        let mut i = inner.borrow_mut();
        if !i.active || i.evaluating {
            return;
        }
        i.evaluating = true;
    }
    loop {
        let (expression, context, cache, store) = {
            let i = inner.borrow();
            if !i.active {
                break;
            }
            (
                i.expression.clone(),
                i.context.clone(),
                i.cache.clone(),
                Rc::clone(&i.store),
            )
        };
        let resolver = CacheResolver {
            cache: &cache,
            hits: RefCell::new(Vec::new()),
            misses: RefCell::new(Vec::new()),
        };
        let scope = Scope::new(&resolver).with_context(context);
        let outcome = compute(&expression, &scope);

        let mut touched = resolver.hits.into_inner();
        let mut misses = resolver.misses.into_inner();
        misses.dedup();
        touched.extend(misses.iter().cloned());

        // Subscribe to every reference the evaluation needed but had no
        // arrival for. The publisher emits the current state straight
        // away, which lands in the cache via `on_fetch` and sets `dirty`.
        let misses: Vec<Reference> = {
            let i = inner.borrow();
            misses
                .into_iter()
                .filter(|r| !i.subscriptions.contains_key(r))
                .collect()
        };
        for reference in misses {
            trace!(reference = %reference, "handler subscribing");
            let weak = Rc::downgrade(inner);
            let subscription = store.publisher(
                &reference,
                Box::new(move |fetch| {
                    if let Some(inner) = weak.upgrade() {
                        on_fetch(&inner, fetch);
                    }
                }),
            );
            let mut i = inner.borrow_mut();
            if !i.active {
                break;
            }
            i.subscriptions.insert(reference, subscription);
        }

        if std::mem::take(&mut inner.borrow_mut().dirty) {
            continue;
        }
        match outcome {
            Err(e) if e.is_pending() => {
                // Still requesting; the next arrival re-enters the loop.
                trace!("handler pending: {e}");
                break;
            }
            result => {
                // The evaluation settled without these references, so
                // they cannot influence the current output. Their cache
                // entries go too: a later read re-subscribes cleanly.
                {
                    let mut i = inner.borrow_mut();
                    i.subscriptions.retain(|r, _| touched.contains(r));
                    i.cache.retain(|r, _| touched.contains(r));
                }
                let emit = {
                    let mut i = inner.borrow_mut();
                    if i.last.as_ref() == Some(&result) {
                        break;
                    }
                    i.last = Some(result.clone());
                    Rc::clone(&i.emit)
                };
                emit(result);
                // The emission may have written back into the store.
                if std::mem::take(&mut inner.borrow_mut().dirty) {
                    continue;
                }
                break;
            }
        }
    }
    inner.borrow_mut().evaluating = false;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
