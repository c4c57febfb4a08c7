#![forbid(unsafe_code)]

//! The binding collection: declaration, batch request, and
//! synchronization barrier.
//!
//! A [`Bindings`] collection owns a set of declared bindings against one
//! store. Declaring is passive; [`Bindings::request`] starts every
//! binding that is not already live, and once **all** bindings reach a
//! terminal state the collection applies them as a batch and announces
//! [`Update::DidSynchronize`] exactly once. After that barrier,
//! individual emissions flow through one by one.
//!
//! # Invariants
//!
//! 1. Inserting a binding with an existing `(reference, destination)`
//!    key replaces it; the old subscription is torn down.
//! 2. `is_synchronized()` is false from the first insert until the batch
//!    barrier, and false again after inserts that follow it.
//! 3. Destination writes and event callbacks run with no internal borrow
//!    held; user callbacks may re-enter the collection freely.
//! 4. Stale store emissions (version lower than one already seen) are
//!    dropped with a warning, never applied.
//! 5. Inside a transaction nothing is applied or announced; the first
//!    commit of the outermost transaction reconciles everything that
//!    changed while it was open.
//!
//! # Design
//!
//! Single-owner shared state behind `Rc<RefCell<..>>`, store and handler
//! callbacks holding `Weak` back-references so a dropped collection goes
//! quiet instead of leaking. Every code path splits into a mutation
//! phase under the borrow and a delivery phase after it.

use std::cell::RefCell;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use tagbind_compute::{ComputeError, Handler, contains_expression};
use tagbind_core::{Context, FetchResult, Metadata, Reference, Store};

use crate::binding::{
    Binding, BindingError, BindingKey, BindingResult, BindingSnapshot, DestinationId, Mode, Probe,
    Sink,
};
use crate::property::Property;

/// When destination writes happen relative to the emission that caused
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tempo {
    /// Apply during the emission, before control returns to the store.
    #[default]
    Sync,
    /// Queue applies; [`Bindings::flush`] performs them later.
    Deferred,
}

/// What a collection announces through its update callback.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// `request()` started; carries the state of every binding.
    Request(Vec<BindingSnapshot>),
    /// One binding updated after the synchronization barrier.
    Update(BindingSnapshot),
    /// One binding transitioned into failure.
    UpdateError(BindingSnapshot, BindingError),
    /// Every binding settled; the batch was applied.
    DidSynchronize(Vec<BindingSnapshot>),
}

struct Inner {
    store: Rc<dyn Store>,
    context: Context,
    tempo: Tempo,
    bindings: Vec<Binding>,
    synchronized: bool,
    on_update: Option<Rc<dyn Fn(&Update)>>,
    waiters: Vec<Box<dyn FnOnce()>>,
    deferred: Vec<BindingKey>,
    txn_depth: u32,
    txn_changes: bool,
    next_unique: u64,
}

impl Inner {
    fn find(&self, key: &BindingKey) -> Option<&Binding> {
        self.bindings.iter().find(|b| &b.key == key)
    }

    fn find_mut(&mut self, key: &BindingKey) -> Option<&mut Binding> {
        self.bindings.iter_mut().find(|b| &b.key == key)
    }

    fn snapshots(&self) -> Vec<BindingSnapshot> {
        self.bindings.iter().map(Binding::snapshot).collect()
    }
}

/// A collection of bindings against one store.
///
/// Cloning creates a new handle to the **same** collection.
pub struct Bindings {
    inner: Rc<RefCell<Inner>>,
}

impl Clone for Bindings {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Bindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Bindings")
            .field("bindings", &inner.bindings.len())
            .field("synchronized", &inner.synchronized)
            .field("tempo", &inner.tempo)
            .finish_non_exhaustive()
    }
}

impl Bindings {
    /// An empty collection bound to `store`.
    #[must_use]
    pub fn new(store: Rc<dyn Store>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                store,
                context: Context::new(),
                tempo: Tempo::Sync,
                bindings: Vec::new(),
                synchronized: true,
                on_update: None,
                waiters: Vec::new(),
                deferred: Vec::new(),
                txn_depth: 0,
                txn_changes: false,
                next_unique: 0,
            })),
        }
    }

    /// This collection with its apply tempo set.
    #[must_use]
    pub fn tempo(self, tempo: Tempo) -> Self {
        self.inner.borrow_mut().tempo = tempo;
        self
    }

    /// This collection with ambient context merged into every lookup
    /// (a reference's own entries win on collision).
    #[must_use]
    pub fn context(self, context: Context) -> Self {
        self.inner.borrow_mut().context = context;
        self
    }

    /// Install the update callback, replacing any previous one.
    pub fn on_update(&self, f: impl Fn(&Update) + 'static) {
        self.inner.borrow_mut().on_update = Some(Rc::new(f));
    }

    // -----------------------------------------------------------------------
    // Declaration
    // -----------------------------------------------------------------------

    /// Declare a live binding from `to` into `property`. Emissions keep
    /// flowing until the collection unsubscribes or drops.
    pub fn subscribe<T>(&self, property: &Property<T>, to: impl Into<Reference>)
    where
        T: DeserializeOwned + Clone + PartialEq + 'static,
    {
        let key = BindingKey {
            reference: to.into(),
            destination: DestinationId::Cell(property.id()),
        };
        self.insert(Binding::new(
            key,
            Mode::Subscribe,
            None,
            probe_for::<T>(),
            sink_for(property),
        ));
    }

    /// Declare a one-shot binding: the next `request()` pulls the
    /// current value once instead of subscribing.
    pub fn set<T>(&self, property: &Property<T>, to: impl Into<Reference>)
    where
        T: DeserializeOwned + Clone + PartialEq + 'static,
    {
        let key = BindingKey {
            reference: to.into(),
            destination: DestinationId::Cell(property.id()),
        };
        self.insert(Binding::new(
            key,
            Mode::FetchOnce,
            None,
            probe_for::<T>(),
            sink_for(property),
        ));
    }

    /// Declare a computed binding: `expression` is evaluated against the
    /// store and re-evaluated whenever any referenced value changes.
    /// `name` identifies the binding in events and replacement.
    pub fn subscribe_expression<T>(
        &self,
        property: &Property<T>,
        name: impl Into<Reference>,
        expression: Value,
    ) where
        T: DeserializeOwned + Clone + PartialEq + 'static,
    {
        let key = BindingKey {
            reference: name.into(),
            destination: DestinationId::Cell(property.id()),
        };
        self.insert(Binding::new(
            key,
            Mode::Subscribe,
            Some(expression),
            probe_for::<T>(),
            sink_for(property),
        ));
    }

    /// Declare a live binding delivering every applied result to a
    /// closure. Each call registers a distinct binding.
    pub fn on(&self, to: impl Into<Reference>, f: impl Fn(&BindingResult) + 'static) {
        let destination = {
            let mut inner = self.inner.borrow_mut();
            inner.next_unique += 1;
            DestinationId::Unique(inner.next_unique)
        };
        let key = BindingKey {
            reference: to.into(),
            destination,
        };
        let probe: Probe = Rc::new(|_| Ok(()));
        let write: Sink = Rc::new(f);
        self.insert(Binding::new(key, Mode::Subscribe, None, probe, write));
    }

    /// Remove the binding from `from` into `property`, tearing down its
    /// subscription. Returns true if a binding was removed.
    pub fn remove<T>(&self, property: &Property<T>, from: &Reference) -> bool
    where
        T: DeserializeOwned + Clone + PartialEq + 'static,
    {
        let key = BindingKey {
            reference: from.clone(),
            destination: DestinationId::Cell(property.id()),
        };
        let mut inner = self.inner.borrow_mut();
        let before = inner.bindings.len();
        inner.bindings.retain_mut(|b| {
            if b.key == key {
                b.stop();
                false
            } else {
                true
            }
        });
        inner.bindings.len() != before
    }

    fn insert(&self, binding: Binding) {
        let mut inner = self.inner.borrow_mut();
        inner.synchronized = false;
        if let Some(slot) = inner.find_mut(&binding.key) {
            slot.stop();
            *slot = binding;
        } else {
            inner.bindings.push(binding);
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start every binding that is not already live. Announces
    /// [`Update::Request`] before the first fetch goes out; with a
    /// synchronous store the synchronization barrier may fire before
    /// this returns.
    pub fn request(&self) {
        let (work, event) = {
            let mut inner = self.inner.borrow_mut();
            let mut work = Vec::new();
            for binding in inner.bindings.iter_mut() {
                if binding.is_live() {
                    continue;
                }
                binding.result = BindingResult::Requesting;
                binding.up_to_date = true;
                binding.last_version = None;
                work.push((
                    binding.key.clone(),
                    binding.mode,
                    binding.expression.clone(),
                ));
            }
            if !work.is_empty() {
                inner.synchronized = false;
            }
            debug!(bindings = inner.bindings.len(), starting = work.len(), "request");
            (work, Update::Request(inner.snapshots()))
        };
        self.emit(&event);
        for (key, mode, expression) in work {
            self.start(key, mode, expression);
        }
    }

    /// Tear down every subscription and handler. Bindings stay declared;
    /// a later `request()` starts them fresh.
    pub fn unsubscribe(&self) {
        let mut inner = self.inner.borrow_mut();
        for binding in inner.bindings.iter_mut() {
            binding.stop();
        }
    }

    /// True when every declared binding has settled (or none are
    /// declared) and the batch has been announced.
    #[must_use]
    pub fn is_synchronized(&self) -> bool {
        self.inner.borrow().synchronized
    }

    /// Run `f` once the collection synchronizes. Runs immediately if it
    /// already has.
    pub fn on_synchronization(&self, f: impl FnOnce() + 'static) {
        let mut inner = self.inner.borrow_mut();
        if inner.synchronized {
            drop(inner);
            f();
        } else {
            inner.waiters.push(Box::new(f));
        }
    }

    /// Apply every write queued under [`Tempo::Deferred`].
    pub fn flush(&self) {
        let keys = std::mem::take(&mut self.inner.borrow_mut().deferred);
        for key in &keys {
            Self::apply(&self.inner, key);
        }
    }

    /// Open a transaction. While any transaction is open nothing is
    /// applied or announced; dropping (or committing) the outermost
    /// guard reconciles all buffered changes at once.
    #[must_use]
    pub fn transaction(&self) -> Transaction {
        self.inner.borrow_mut().txn_depth += 1;
        Transaction {
            bindings: self.clone(),
            done: false,
        }
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Number of declared bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().bindings.is_empty()
    }

    /// Current result of the first binding declared for `reference`.
    #[must_use]
    pub fn result_of(&self, reference: &Reference) -> Option<BindingResult> {
        let inner = self.inner.borrow();
        inner
            .bindings
            .iter()
            .find(|b| &b.key.reference == reference)
            .map(|b| b.result.clone())
    }

    // -----------------------------------------------------------------------
    // Engine
    // -----------------------------------------------------------------------

    fn emit(&self, event: &Update) {
        let callback = self.inner.borrow().on_update.clone();
        if let Some(callback) = callback {
            callback(event);
        }
    }

    /// Start one binding: direct subscription, one-shot pull, or compute
    /// handler, per its declaration.
    fn start(&self, key: BindingKey, mode: Mode, expression: Option<Value>) {
        let (store, context) = {
            let inner = self.inner.borrow();
            (Rc::clone(&inner.store), inner.context.clone())
        };

        if let Some(expression) = expression {
            let handler = Self::spawn_handler(&self.inner, &store, key.clone(), expression, context);
            let mut inner = self.inner.borrow_mut();
            if let Some(binding) = inner.find_mut(&key) {
                binding.handler = Some(handler);
            }
            return;
        }

        // Lookup merges ambient context under the reference's own entries.
        let lookup = Reference::new(key.reference.path())
            .in_context(&context)
            .in_context(key.reference.context());

        match mode {
            Mode::FetchOnce => {
                let result = store.get(&lookup);
                Self::on_fetch(&self.inner, &key, &result);
            }
            Mode::Subscribe => {
                let weak = Rc::downgrade(&self.inner);
                let callback_key = key.clone();
                let subscription = store.publisher(
                    &lookup,
                    Box::new(move |result| {
                        if let Some(inner) = weak.upgrade() {
                            Bindings::on_fetch(&inner, &callback_key, result);
                        }
                    }),
                );
                let mut inner = self.inner.borrow_mut();
                if let Some(binding) = inner.find_mut(&key) {
                    binding.subscription = Some(subscription);
                }
            }
        }
    }

    fn spawn_handler(
        inner: &Rc<RefCell<Inner>>,
        store: &Rc<dyn Store>,
        key: BindingKey,
        expression: Value,
        context: Context,
    ) -> Handler {
        let weak = Rc::downgrade(inner);
        Handler::new(
            Rc::clone(store),
            expression,
            context,
            move |outcome| {
                if let Some(inner) = weak.upgrade() {
                    Bindings::on_compute(&inner, &key, outcome);
                }
            },
        )
    }

    /// A store emission arrived for a directly subscribed binding.
    fn on_fetch(inner: &Rc<RefCell<Inner>>, key: &BindingKey, fetch: &FetchResult) {
        enum Next {
            Skip,
            Transition(Option<Handler>),
            Spawn(Value),
        }
        let next = {
            let mut this = inner.borrow_mut();
            let Some(binding) = this.find_mut(key) else {
                return;
            };
            let version = fetch.metadata().version;
            if binding.last_version.is_some_and(|last| version < last) {
                warn!(
                    reference = %key.reference,
                    version,
                    last = binding.last_version.unwrap_or(0),
                    "dropping stale emission"
                );
                Next::Skip
            } else {
                binding.last_version = Some(version);
                match fetch {
                    FetchResult::Value(value, _) if contains_expression(value) => {
                        // The stored value is itself an expression; hand
                        // it to a compute handler instead of decoding.
                        Next::Spawn(value.clone())
                    }
                    FetchResult::Value(value, metadata) => {
                        binding.result = match (binding.probe)(value) {
                            Ok(()) => BindingResult::Success(value.clone(), metadata.clone()),
                            Err(e) => BindingResult::Failure(e, metadata.clone()),
                        };
                        binding.up_to_date = false;
                        // A plain value supersedes any computation spawned
                        // by an earlier stored expression.
                        Next::Transition(binding.handler.take())
                    }
                    FetchResult::Error(error, metadata) => {
                        binding.result = BindingResult::Failure(
                            BindingError::Fetch(error.clone()),
                            metadata.clone(),
                        );
                        binding.up_to_date = false;
                        Next::Transition(binding.handler.take())
                    }
                }
            }
        };
        match next {
            Next::Skip => {}
            Next::Transition(stale) => {
                if let Some(handler) = stale {
                    handler.unsubscribe();
                }
                Self::settle(inner, Some(key));
            }
            Next::Spawn(expression) => {
                let (store, context) = {
                    let this = inner.borrow();
                    (Rc::clone(&this.store), this.context.clone())
                };
                let handler =
                    Self::spawn_handler(inner, &store, key.clone(), expression, context);
                let mut this = inner.borrow_mut();
                if let Some(binding) = this.find_mut(key) {
                    if let Some(old) = binding.handler.take() {
                        old.unsubscribe();
                    }
                    binding.handler = Some(handler);
                }
            }
        }
    }

    /// A compute handler settled for an expression-backed binding.
    fn on_compute(
        inner: &Rc<RefCell<Inner>>,
        key: &BindingKey,
        outcome: Result<Value, ComputeError>,
    ) {
        {
            let mut this = inner.borrow_mut();
            let Some(binding) = this.find_mut(key) else {
                return;
            };
            binding.emit_seq += 1;
            let metadata = Metadata::new(key.reference.clone(), binding.emit_seq);
            binding.result = match outcome {
                Ok(value) => match (binding.probe)(&value) {
                    Ok(()) => BindingResult::Success(value, metadata),
                    Err(e) => BindingResult::Failure(e, metadata),
                },
                Err(e) => BindingResult::Failure(BindingError::Compute(e), metadata),
            };
            binding.up_to_date = false;
        }
        Self::settle(inner, Some(key));
    }

    /// Decide what the latest transition means for the collection and
    /// deliver it: per-binding updates after the barrier, the batch
    /// apply and `DidSynchronize` at it. `changed` is `None` when
    /// reconciling after a transaction, which sweeps every stale
    /// binding instead of one.
    fn settle(inner: &Rc<RefCell<Inner>>, changed: Option<&BindingKey>) {
        let mut events: Vec<Update> = Vec::new();
        let mut to_apply: Vec<BindingKey> = Vec::new();
        let mut waiters: Vec<Box<dyn FnOnce()>> = Vec::new();
        {
            let mut this = inner.borrow_mut();
            if this.txn_depth > 0 {
                this.txn_changes = true;
                return;
            }

            // Failure transitions announce themselves regardless of the
            // barrier.
            match changed {
                Some(key) => {
                    if let Some(binding) = this.find(key)
                        && let BindingResult::Failure(error, _) = &binding.result
                        && !binding.up_to_date
                    {
                        events.push(Update::UpdateError(binding.snapshot(), error.clone()));
                    }
                }
                None => {
                    for binding in &this.bindings {
                        if let BindingResult::Failure(error, _) = &binding.result
                            && !binding.up_to_date
                        {
                            events.push(Update::UpdateError(binding.snapshot(), error.clone()));
                        }
                    }
                }
            }

            if this.synchronized {
                match changed {
                    Some(key) => {
                        if let Some(binding) = this.find(key)
                            && binding.is_synchronized()
                            && !binding.up_to_date
                        {
                            to_apply.push(key.clone());
                            if matches!(binding.result, BindingResult::Success(..)) {
                                events.push(Update::Update(binding.snapshot()));
                            }
                        }
                    }
                    None => {
                        for binding in &this.bindings {
                            if binding.is_synchronized() && !binding.up_to_date {
                                to_apply.push(binding.key.clone());
                                if matches!(binding.result, BindingResult::Success(..)) {
                                    events.push(Update::Update(binding.snapshot()));
                                }
                            }
                        }
                    }
                }
            } else if !this.bindings.is_empty()
                && this.bindings.iter().all(Binding::is_synchronized)
            {
                this.synchronized = true;
                to_apply = this.bindings.iter().map(|b| b.key.clone()).collect();
                events.push(Update::DidSynchronize(this.snapshots()));
                waiters = std::mem::take(&mut this.waiters);
                debug!(bindings = this.bindings.len(), "synchronized");
            }

            if this.tempo == Tempo::Deferred {
                for key in to_apply.drain(..) {
                    if !this.deferred.contains(&key) {
                        this.deferred.push(key);
                    }
                }
            }
        }

        for key in &to_apply {
            Self::apply(inner, key);
        }
        let callback = inner.borrow().on_update.clone();
        if let Some(callback) = callback {
            for event in &events {
                callback(event);
            }
        }
        for waiter in waiters {
            waiter();
        }
    }

    /// Write one binding's settled result into its destination, if the
    /// destination has not seen it yet.
    fn apply(inner: &Rc<RefCell<Inner>>, key: &BindingKey) {
        let work = {
            let mut this = inner.borrow_mut();
            match this.find_mut(key) {
                Some(binding) if !binding.up_to_date => {
                    binding.up_to_date = true;
                    Some((Rc::clone(&binding.write), binding.result.clone()))
                }
                _ => None,
            }
        };
        if let Some((write, result)) = work {
            write(&result);
        }
    }

    fn end_transaction(inner: &Rc<RefCell<Inner>>) {
        let reconcile = {
            let mut this = inner.borrow_mut();
            this.txn_depth -= 1;
            this.txn_depth == 0 && std::mem::take(&mut this.txn_changes)
        };
        if reconcile {
            Self::settle(inner, None);
        }
    }
}

// ---------------------------------------------------------------------------
// Sinks and probes for typed properties
// ---------------------------------------------------------------------------

fn probe_for<T: DeserializeOwned + 'static>() -> Probe {
    Rc::new(|value: &Value| {
        serde_json::from_value::<T>(value.clone())
            .map(|_| ())
            .map_err(|e| BindingError::Decode(e.to_string()))
    })
}

fn sink_for<T>(property: &Property<T>) -> Sink
where
    T: DeserializeOwned + Clone + PartialEq + 'static,
{
    let property = property.clone();
    Rc::new(move |result: &BindingResult| {
        if let BindingResult::Success(value, _) = result
            && let Ok(decoded) = serde_json::from_value::<T>(value.clone())
        {
            property.set(decoded);
        }
    })
}

// ---------------------------------------------------------------------------
// Transaction guard
// ---------------------------------------------------------------------------

/// RAII transaction over a [`Bindings`] collection. Applies and events
/// are buffered until the outermost guard commits or drops.
pub struct Transaction {
    bindings: Bindings,
    done: bool,
}

impl Transaction {
    /// Commit now instead of at drop.
    pub fn commit(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        Bindings::end_transaction(&self.bindings.inner);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.finish();
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("done", &self.done)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
