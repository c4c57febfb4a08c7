#![forbid(unsafe_code)]

//! Evaluation scope: the ambient state an expression is computed against.
//!
//! A [`Scope`] carries three things:
//!
//! - a [`Resolver`] — how `from` references turn into values;
//! - an ambient reference [`Context`] merged into every `from` lookup;
//! - an optional ambient *element*, the "current item" that `item`
//!   projects into (established by `map` for its copy entries).
//!
//! The resolver is the seam between pure and reactive evaluation: the
//! pure path resolves straight against a [`Store`], while the reactive
//! [`Handler`](crate::handler::Handler) resolves from its fetch cache and
//! records misses so it can subscribe to them.

use serde_json::Value;
use tagbind_core::{Context, Reference, Store};

use crate::error::ComputeError;

/// How `from` references resolve during evaluation.
pub trait Resolver {
    fn resolve(&self, reference: &Reference) -> Result<Value, ComputeError>;
}

/// Resolves nothing: every reference is an error. Useful for evaluating
/// literal-only expressions.
impl Resolver for () {
    fn resolve(&self, reference: &Reference) -> Result<Value, ComputeError> {
        Err(ComputeError::Fetch(tagbind_core::FetchError::NotFound(
            reference.clone(),
        )))
    }
}

/// Resolves references by pulling the current value from a store.
pub struct StoreResolver<'a> {
    store: &'a dyn Store,
}

impl<'a> StoreResolver<'a> {
    #[must_use]
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }
}

impl Resolver for StoreResolver<'_> {
    fn resolve(&self, reference: &Reference) -> Result<Value, ComputeError> {
        let (result, _) = self.store.get(reference).into_result();
        result.map_err(ComputeError::from)
    }
}

/// Ambient state for one evaluation pass.
pub struct Scope<'a> {
    resolver: &'a dyn Resolver,
    context: Context,
    element: Option<&'a Value>,
}

impl<'a> Scope<'a> {
    #[must_use]
    pub fn new(resolver: &'a dyn Resolver) -> Self {
        Self {
            resolver,
            context: Context::new(),
            element: None,
        }
    }

    /// Set the ambient reference context (merged into every `from`).
    #[must_use]
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// The ambient element `item` projects into, if one is established.
    #[must_use]
    pub fn element(&self) -> Option<&Value> {
        self.element
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// A child scope with `element` as the ambient element. Resolver and
    /// context carry over.
    #[must_use]
    pub fn child<'b>(&'b self, element: &'b Value) -> Scope<'b> {
        Scope {
            resolver: self.resolver,
            context: self.context.clone(),
            element: Some(element),
        }
    }

    /// Resolve `reference` with the ambient context merged in.
    pub fn resolve(&self, reference: &Reference) -> Result<Value, ComputeError> {
        let reference = if self.context.is_empty() {
            reference.clone()
        } else {
            // The reference's own entries win over the ambient context.
            reference.in_context(&self.context).in_context(reference.context())
        };
        self.resolver.resolve(&reference)
    }
}
