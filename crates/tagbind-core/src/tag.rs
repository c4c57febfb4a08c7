#![forbid(unsafe_code)]

//! Tag references: canonical, context-aware addresses into the store.
//!
//! A [`Reference`] is a symbolic path (`"user.account.balance"`) plus a
//! [`Context`] overlay that disambiguates parametrized lookups (per-user,
//! per-account, and so on). References are the identity component of both
//! store entries and bindings, so equality and hashing consider the path
//! *and* every context entry.
//!
//! The canonical string form is `path[key=value,…]` with context keys in
//! sorted order. `Display`, `FromStr`, and the serde impls all speak this
//! form, which is what lets references travel inside expression JSON.
//!
//! # Invariants
//!
//! 1. Two references are equal iff their paths and full context maps are
//!    equal; hashing is consistent with that equality.
//! 2. The canonical string of a context-free reference is the bare path.
//! 3. Context keys render in sorted order, so the canonical string is
//!    deterministic for a given reference.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// A key → value overlay merged into a reference.
///
/// Backed by a `BTreeMap` so iteration (and therefore the canonical string
/// and the hash) is ordered by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context(BTreeMap<String, Value>);

impl Context {
    /// An empty context.
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Insert an entry, replacing any existing value for `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Value stored for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// A new context holding this context's entries with `overlay`'s
    /// entries layered on top (overlay wins on key collision).
    #[must_use]
    pub fn merged(&self, overlay: &Context) -> Context {
        let mut out = self.0.clone();
        for (k, v) in &overlay.0 {
            out.insert(k.clone(), v.clone());
        }
        Context(out)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

// JSON values never contain NaN, so `PartialEq` is total here.
impl Eq for Context {}

impl Hash for Context {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (k, v) in &self.0 {
            k.hash(state);
            // `Value` is not `Hash`; its compact JSON form is a faithful
            // stand-in because map keys are already sorted.
            v.to_string().hash(state);
        }
    }
}

impl FromIterator<(String, Value)> for Context {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Reference
// ---------------------------------------------------------------------------

/// Canonical, context-aware address of a value in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    path: String,
    context: Context,
}

impl Reference {
    /// A context-free reference to `path`.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            context: Context::new(),
        }
    }

    /// Add a context entry, replacing any existing value for `key`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key, value);
        self
    }

    /// This reference with `overlay` merged into its context
    /// (overlay wins on key collision).
    #[must_use]
    pub fn in_context(&self, overlay: &Context) -> Reference {
        Reference {
            path: self.path.clone(),
            context: self.context.merged(overlay),
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Canonical string form: `path[key=value,…]`.
    #[must_use]
    pub fn string(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)?;
        if self.context.is_empty() {
            return Ok(());
        }
        f.write_str("[")?;
        for (i, (k, v)) in self.context.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match v {
                Value::String(s) => write!(f, "{k}={s}")?,
                other => write!(f, "{k}={other}")?,
            }
        }
        f.write_str("]")
    }
}

/// Error parsing the canonical `path[key=value,…]` form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceParseError {
    #[error("reference path is empty")]
    EmptyPath,
    #[error("unterminated context in reference {0:?}")]
    UnterminatedContext(String),
    #[error("malformed context entry {0:?} (expected key=value)")]
    BadEntry(String),
}

impl FromStr for Reference {
    type Err = ReferenceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (path, body) = match s.find('[') {
            None => (s, None),
            Some(idx) => {
                if !s.ends_with(']') {
                    return Err(ReferenceParseError::UnterminatedContext(s.to_string()));
                }
                (&s[..idx], Some(&s[idx + 1..s.len() - 1]))
            }
        };
        if path.is_empty() {
            return Err(ReferenceParseError::EmptyPath);
        }
        let mut reference = Reference::new(path);
        if let Some(body) = body {
            for entry in body.split(',').filter(|e| !e.is_empty()) {
                let (key, raw) = entry
                    .split_once('=')
                    .ok_or_else(|| ReferenceParseError::BadEntry(entry.to_string()))?;
                // Values are JSON when they parse as JSON, strings otherwise.
                let value = serde_json::from_str::<Value>(raw.trim())
                    .unwrap_or_else(|_| Value::String(raw.trim().to_string()));
                reference = reference.with(key.trim(), value);
            }
        }
        Ok(reference)
    }
}

impl From<&str> for Reference {
    /// Parse the canonical form, falling back to treating the whole string
    /// as a bare path if it does not parse.
    fn from(s: &str) -> Self {
        s.parse().unwrap_or_else(|_| Reference::new(s))
    }
}

impl From<String> for Reference {
    fn from(s: String) -> Self {
        Reference::from(s.as_str())
    }
}

impl Serialize for Reference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
