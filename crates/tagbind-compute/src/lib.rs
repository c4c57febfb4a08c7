#![forbid(unsafe_code)]

//! The tagbind compute engine: a declarative, JSON-driven expression
//! language evaluated against a tag-addressed store.
//!
//! # Grammar
//!
//! An *expression node* is a JSON object carrying the `"{returns}"` key.
//! Its value must be a single-key object mapping a function keyword to
//! that function's raw arguments; an optional sibling `"default"` supplies
//! a local fallback used when evaluation fails:
//!
//! ```json
//! { "{returns}": { "from": { "reference": "user.name" } }, "default": "anon" }
//! ```
//!
//! Objects without `"{returns}"` are literals, but their field values (and
//! array elements) are evaluated recursively, so expression nodes nest
//! anywhere a value sits. Function evaluators receive their arguments raw
//! and control evaluation order themselves, which is what makes branches
//! lazy: `either` stops at the first truthy condition and `this` never
//! touches its value when the condition fails.
//!
//! # Failure semantics
//!
//! Errors surface as [`ComputeError`]; a sibling `default` intercepts any
//! error except [`ComputeError::Pending`], which means an upstream
//! reference has not resolved yet and must keep the whole tree requesting.
//!
//! The grammar table is data-driven — adding a function is one more entry
//! in [`FUNCTIONS`].

pub mod error;
mod eval;
mod functions;
pub mod handler;
pub mod scope;

pub use error::ComputeError;
pub use handler::Handler;
pub use scope::{Resolver, Scope, StoreResolver};

use serde_json::Value;

/// The key marking a JSON object as an expression node.
pub const RETURNS: &str = "{returns}";

/// The sibling key supplying a local fallback value.
pub const DEFAULT: &str = "default";

type Evaluator = fn(&Value, &Scope) -> Result<Value, ComputeError>;

/// The grammar table: function keyword → evaluator, in keyword order.
const FUNCTIONS: &[(&str, Evaluator)] = &[
    ("comparison", functions::comparison),
    ("count", functions::count),
    ("either", functions::either),
    ("error", functions::error),
    ("eval", functions::eval),
    ("exists", functions::exists),
    ("from", functions::from),
    ("item", functions::item),
    ("map", functions::map),
    ("not", functions::not),
    ("text", functions::text),
    ("this", functions::this),
    ("yes", functions::yes),
];

/// Evaluate `expression` against `scope`.
///
/// Literals come back as themselves (with nested expression nodes
/// resolved); expression nodes dispatch through the grammar table.
///
/// # Errors
///
/// Any [`ComputeError`] raised by a node with no applicable `default`.
pub fn compute(expression: &Value, scope: &Scope) -> Result<Value, ComputeError> {
    match expression {
        Value::Object(map) => match map.get(RETURNS) {
            Some(node) => {
                let out = evaluate(node, scope);
                match out {
                    Err(e) if !e.is_pending() => match map.get(DEFAULT) {
                        Some(default) => compute(default, scope),
                        None => Err(e),
                    },
                    other => other,
                }
            }
            None => {
                let mut out = serde_json::Map::new();
                for (key, value) in map {
                    out.insert(key.clone(), compute(value, scope)?);
                }
                Ok(Value::Object(out))
            }
        },
        Value::Array(items) => items
            .iter()
            .map(|item| compute(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

/// Dispatch the single-key function object under `{returns}`.
fn evaluate(node: &Value, scope: &Scope) -> Result<Value, ComputeError> {
    let Value::Object(map) = node else {
        return Err(ComputeError::Type {
            expected: "a function object under {returns}",
            got: kind(node).to_string(),
        });
    };
    if map.len() != 1 {
        return Err(ComputeError::MalformedNode(map.len()));
    }
    let (name, args) = map
        .iter()
        .next()
        .ok_or(ComputeError::MalformedNode(0))?;
    match FUNCTIONS.iter().find(|(keyword, _)| *keyword == name.as_str()) {
        Some((_, evaluator)) => evaluator(args, scope),
        None => Err(ComputeError::UnknownFunction(name.clone())),
    }
}

/// JSON truthiness: booleans as-is, null false, numbers non-zero,
/// strings must spell a boolean. Arrays and objects are a type error.
pub(crate) fn truthy(value: &Value) -> Result<bool, ComputeError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) => match s.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(ComputeError::Type {
                expected: "a boolean",
                got: format!("string {s:?}"),
            }),
        },
        other => Err(ComputeError::Type {
            expected: "a boolean",
            got: kind(other).to_string(),
        }),
    }
}

pub(crate) fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Whether `value` contains an expression node anywhere. Bindings use
/// this to decide between the identity decode path and the compute path.
#[must_use]
pub fn contains_expression(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            map.contains_key(RETURNS) || map.values().any(contains_expression)
        }
        Value::Array(items) => items.iter().any(contains_expression),
        _ => false,
    }
}
