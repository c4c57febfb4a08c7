#![forbid(unsafe_code)]

//! Fetch results: the value-or-error envelope emitted by a store.
//!
//! Every emission carries [`Metadata`] — the reference it answers and the
//! store's version counter for that entry — so consumers can tell whether
//! a value actually changed and can drop results that arrive out of order.

use serde_json::Value;
use thiserror::Error;

use crate::tag::Reference;

/// Why a fetch produced no value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The reference has no stored value.
    #[error("{0} has no stored value")]
    NotFound(Reference),
    /// Backend-specific failure, passed through verbatim.
    #[error("{0}")]
    Other(String),
}

/// Provenance of a fetch emission.
///
/// `version` increments by exactly one per value-changing write to the
/// entry, so within one reference's stream it is strictly monotonic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub reference: Reference,
    pub version: u64,
}

impl Metadata {
    #[must_use]
    pub fn new(reference: Reference, version: u64) -> Self {
        Self { reference, version }
    }
}

/// A value-or-error envelope for one reference, plus metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    Value(Value, Metadata),
    Error(FetchError, Metadata),
}

impl FetchResult {
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        match self {
            Self::Value(_, m) | Self::Error(_, m) => m,
        }
    }

    #[must_use]
    pub fn reference(&self) -> &Reference {
        &self.metadata().reference
    }

    /// The carried value, if this is a success.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Value(v, _) => Some(v),
            Self::Error(..) => None,
        }
    }

    /// The carried error, if this is a failure.
    #[must_use]
    pub fn error(&self) -> Option<&FetchError> {
        match self {
            Self::Value(..) => None,
            Self::Error(e, _) => Some(e),
        }
    }

    /// Split into a plain `Result` and the metadata.
    #[must_use]
    pub fn into_result(self) -> (Result<Value, FetchError>, Metadata) {
        match self {
            Self::Value(v, m) => (Ok(v), m),
            Self::Error(e, m) => (Err(e), m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta() -> Metadata {
        Metadata::new(Reference::new("a.b"), 3)
    }

    #[test]
    fn value_accessors() {
        let fr = FetchResult::Value(json!(42), meta());
        assert_eq!(fr.value(), Some(&json!(42)));
        assert_eq!(fr.error(), None);
        assert_eq!(fr.metadata().version, 3);
        assert_eq!(fr.reference(), &Reference::new("a.b"));
    }

    #[test]
    fn error_accessors() {
        let fr = FetchResult::Error(FetchError::NotFound(Reference::new("a.b")), meta());
        assert_eq!(fr.value(), None);
        assert!(matches!(fr.error(), Some(FetchError::NotFound(_))));
    }

    #[test]
    fn into_result_splits() {
        let (r, m) = FetchResult::Value(json!("x"), meta()).into_result();
        assert_eq!(r.unwrap(), json!("x"));
        assert_eq!(m.version, 3);
    }

    #[test]
    fn not_found_message_names_reference() {
        let e = FetchError::NotFound(Reference::new("a.b").with("k", 1));
        assert_eq!(e.to_string(), "a.b[k=1] has no stored value");
    }
}
