#![forbid(unsafe_code)]

//! The compute error taxonomy.
//!
//! Grammar errors (unknown function keyword, malformed node) are
//! non-recoverable for their expression node. Resolution and type errors
//! are recoverable through a sibling `default`. [`ComputeError::Pending`]
//! is special: it means an upstream reference is subscribed but has not
//! resolved yet, so the whole tree must stay requesting — it is never
//! swallowed by a `default` and never surfaces as a terminal failure.

use tagbind_core::{FetchError, Reference};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComputeError {
    /// The object under `{returns}` used a keyword the grammar does not
    /// know. The message shape is part of the contract.
    #[error("Expected {{returns}} keyword, but got {0}")]
    UnknownFunction(String),

    /// The object under `{returns}` did not hold exactly one function key.
    #[error("expected a single function keyword, but got {0} keys")]
    MalformedNode(usize),

    /// `this` was asked for a value whose condition did not hold.
    #[error("value not available")]
    ValueNotAvailable,

    /// An upstream reference is subscribed but has not resolved yet.
    #[error("awaiting a value for {0}")]
    Pending(Reference),

    /// The store answered with an error for a referenced value.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// `item` was evaluated with no ambient element in scope.
    #[error("no item in scope")]
    NoElement,

    /// A value had the wrong shape for the operation applied to it.
    #[error("expected {expected}, but got {got}")]
    Type {
        expected: &'static str,
        got: String,
    },

    /// The `eval` mini-language failed; the message is passed through
    /// verbatim from the evaluator.
    #[error("{0}")]
    Eval(String),

    /// `comparison.match` was given an invalid regular expression.
    #[error("invalid regular expression: {0}")]
    Regex(String),

    /// An explicit `error` node, or an operator-specific failure.
    #[error("{0}")]
    Message(String),
}

impl ComputeError {
    /// Whether this error means "not settled yet" rather than "failed".
    /// Pending errors propagate through `default` fallbacks untouched.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}
