#![forbid(unsafe_code)]

//! One declared link between a reference and a destination.
//!
//! A binding pairs the *source* (a [`Reference`], optionally a compute
//! expression) with the *destination* (a typed property cell or a
//! closure) and tracks the lifecycle of the value flowing between them.
//!
//! # Invariants
//!
//! 1. `result` only moves forward: `Idle` until requested, `Requesting`
//!    while a fetch is in flight, then terminal `Success`/`Failure` per
//!    emission. Re-requesting restarts the cycle.
//! 2. Identity is `(reference, destination)`. Two bindings with the same
//!    key are the same binding; collections replace rather than
//!    duplicate.
//! 3. Decode failures surface at transition time, before anything is
//!    written to the destination.

use std::rc::Rc;

use serde_json::Value;
use thiserror::Error;

use tagbind_compute::{ComputeError, Handler};
use tagbind_core::{FetchError, Metadata, Reference, StoreSubscription};

/// Why a binding failed to produce a usable value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Compute(#[from] ComputeError),
    /// The fetched value did not decode into the destination type.
    #[error("failed to decode value: {0}")]
    Decode(String),
}

/// Lifecycle state of one binding.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum BindingResult {
    /// Declared, never requested.
    #[default]
    Idle,
    /// A request is in flight; no emission has arrived yet.
    Requesting,
    /// The latest emission decoded successfully.
    Success(Value, Metadata),
    /// The latest emission failed (fetch, compute, or decode).
    Failure(BindingError, Metadata),
}

impl BindingResult {
    /// True once the binding has settled on a value or an error.
    #[must_use]
    pub fn is_synchronized(&self) -> bool {
        matches!(self, Self::Success(..) | Self::Failure(..))
    }

    /// The carried value, if this is a success.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Success(v, _) => Some(v),
            _ => None,
        }
    }

    /// The carried error, if this is a failure.
    #[must_use]
    pub fn error(&self) -> Option<&BindingError> {
        match self {
            Self::Failure(e, _) => Some(e),
            _ => None,
        }
    }
}

/// A point-in-time view of one binding, carried by update events.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingSnapshot {
    pub reference: Reference,
    pub result: BindingResult,
}

// ---------------------------------------------------------------------------
// Internal binding record
// ---------------------------------------------------------------------------

/// How the source side is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Live subscription; emissions keep arriving until unsubscribed.
    Subscribe,
    /// One-shot pull of the current value.
    FetchOnce,
}

/// Destination half of a binding's identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum DestinationId {
    /// A shared property cell; all clones carry the same id.
    Cell(usize),
    /// A closure destination; every registration is distinct.
    Unique(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct BindingKey {
    pub reference: Reference,
    pub destination: DestinationId,
}

/// Checks that a raw value decodes into the destination type.
pub(crate) type Probe = Rc<dyn Fn(&Value) -> Result<(), BindingError>>;
/// Writes a settled result into the destination.
pub(crate) type Sink = Rc<dyn Fn(&BindingResult)>;

pub(crate) struct Binding {
    pub key: BindingKey,
    pub mode: Mode,
    /// Explicit compute expression; when set, the source is a handler
    /// rather than a direct store subscription.
    pub expression: Option<Value>,
    pub probe: Probe,
    pub write: Sink,
    pub result: BindingResult,
    /// False while `result` holds a settled state the destination has
    /// not seen yet.
    pub up_to_date: bool,
    /// Highest store version observed; stale emissions are dropped.
    pub last_version: Option<u64>,
    /// Counts handler emissions, standing in for a store version.
    pub emit_seq: u64,
    pub subscription: Option<StoreSubscription>,
    pub handler: Option<Handler>,
}

impl Binding {
    pub fn new(
        key: BindingKey,
        mode: Mode,
        expression: Option<Value>,
        probe: Probe,
        write: Sink,
    ) -> Self {
        Self {
            key,
            mode,
            expression,
            probe,
            write,
            result: BindingResult::Idle,
            up_to_date: true,
            last_version: None,
            emit_seq: 0,
            subscription: None,
            handler: None,
        }
    }

    pub fn is_synchronized(&self) -> bool {
        self.result.is_synchronized()
    }

    /// True while a subscription or handler is feeding this binding.
    pub fn is_live(&self) -> bool {
        self.subscription.is_some() || self.handler.is_some()
    }

    pub fn stop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler.unsubscribe();
        }
        self.subscription = None;
    }

    pub fn snapshot(&self) -> BindingSnapshot {
        BindingSnapshot {
            reference: self.key.reference.clone(),
            result: self.result.clone(),
        }
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("key", &self.key)
            .field("mode", &self.mode)
            .field("result", &self.result)
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(path: &str) -> BindingKey {
        BindingKey {
            reference: Reference::new(path),
            destination: DestinationId::Unique(1),
        }
    }

    fn noop() -> (Probe, Sink) {
        (Rc::new(|_| Ok(())), Rc::new(|_| {}))
    }

    #[test]
    fn starts_idle_and_applied() {
        let (probe, write) = noop();
        let b = Binding::new(key("a"), Mode::Subscribe, None, probe, write);
        assert_eq!(b.result, BindingResult::Idle);
        assert!(b.up_to_date);
        assert!(!b.is_live());
        assert!(!b.is_synchronized());
    }

    #[test]
    fn terminal_states_are_synchronized() {
        let meta = Metadata::new(Reference::new("a"), 1);
        assert!(BindingResult::Success(json!(1), meta.clone()).is_synchronized());
        let failure = BindingResult::Failure(
            BindingError::Fetch(FetchError::NotFound(Reference::new("a"))),
            meta,
        );
        assert!(failure.is_synchronized());
        assert!(!BindingResult::Idle.is_synchronized());
        assert!(!BindingResult::Requesting.is_synchronized());
    }

    #[test]
    fn result_accessors() {
        let meta = Metadata::new(Reference::new("a"), 1);
        let ok = BindingResult::Success(json!("v"), meta.clone());
        assert_eq!(ok.value(), Some(&json!("v")));
        assert_eq!(ok.error(), None);

        let err = BindingResult::Failure(BindingError::Decode("bad".into()), meta);
        assert_eq!(err.value(), None);
        assert!(matches!(err.error(), Some(BindingError::Decode(_))));
    }

    #[test]
    fn keys_distinguish_destinations() {
        let a = BindingKey {
            reference: Reference::new("x"),
            destination: DestinationId::Unique(1),
        };
        let b = BindingKey {
            reference: Reference::new("x"),
            destination: DestinationId::Unique(2),
        };
        let c = BindingKey {
            reference: Reference::new("x"),
            destination: DestinationId::Cell(7),
        };
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, a.clone());
    }
}
