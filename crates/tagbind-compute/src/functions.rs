#![forbid(unsafe_code)]

//! The function evaluators behind the grammar table.
//!
//! Each evaluator receives its argument JSON *raw* and decides what to
//! evaluate, in what order. That is what gives the language lazy branches:
//! `this` never touches `value` when `condition` is false, and `either`
//! stops at the first truthy condition.

use regex_lite::Regex;
use serde_json::{Map, Value};
use tagbind_core::Reference;

use crate::error::ComputeError;
use crate::scope::Scope;
use crate::{RETURNS, compute, kind, truthy};

// ---------------------------------------------------------------------------
// Argument plumbing
// ---------------------------------------------------------------------------

fn args_object<'v>(
    args: &'v Value,
    keyword: &'static str,
) -> Result<&'v Map<String, Value>, ComputeError> {
    match args {
        Value::Object(map) => Ok(map),
        other => Err(ComputeError::Type {
            expected: keyword,
            got: kind(other).to_string(),
        }),
    }
}

fn require<'v>(
    map: &'v Map<String, Value>,
    key: &'static str,
    expected: &'static str,
) -> Result<&'v Value, ComputeError> {
    map.get(key).ok_or(ComputeError::Type {
        expected,
        got: "nothing".to_string(),
    })
}

fn as_string(value: Value, expected: &'static str) -> Result<String, ComputeError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(ComputeError::Type {
            expected,
            got: kind(&other).to_string(),
        }),
    }
}

fn numeric(value: &Value) -> Result<f64, ComputeError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or(ComputeError::Type {
            expected: "a finite number",
            got: "a number".to_string(),
        }),
        Value::String(s) => s.parse::<f64>().map_err(|_| ComputeError::Type {
            expected: "a number",
            got: format!("string {s:?}"),
        }),
        other => Err(ComputeError::Type {
            expected: "a number",
            got: kind(other).to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// this / from / item / map
// ---------------------------------------------------------------------------

/// `this {value, condition?}` — the value, gated on a condition.
pub(crate) fn this(args: &Value, scope: &Scope) -> Result<Value, ComputeError> {
    let map = args_object(args, "this arguments")?;
    if let Some(condition) = map.get("condition") {
        let condition = compute(condition, scope)?;
        if !truthy(&condition)? {
            return Err(ComputeError::ValueNotAvailable);
        }
    }
    compute(require(map, "value", "a this.value argument")?, scope)
}

/// `from {reference, context?}` — a referenced value, live from the store.
/// A bare string is shorthand for `{reference: …}`.
pub(crate) fn from(args: &Value, scope: &Scope) -> Result<Value, ComputeError> {
    let (reference_arg, context_arg) = match args {
        Value::String(_) => (args, None),
        _ => {
            let map = args_object(args, "from arguments")?;
            (
                require(map, "reference", "a from.reference argument")?,
                map.get("context"),
            )
        }
    };
    let path = as_string(compute(reference_arg, scope)?, "a reference string")?;
    let mut reference = Reference::from(path.as_str());
    if let Some(context) = context_arg {
        let context = compute(context, scope)?;
        let entries = args_object(&context, "a from.context object")?;
        for (key, value) in entries {
            reference = reference.with(key.clone(), value.clone());
        }
    }
    scope.resolve(&reference)
}

/// `item [components…]` — project into the ambient element.
pub(crate) fn item(args: &Value, scope: &Scope) -> Result<Value, ComputeError> {
    let element = scope.element().ok_or(ComputeError::NoElement)?;
    let components = match compute(args, scope)? {
        Value::Array(components) => components,
        other => {
            return Err(ComputeError::Type {
                expected: "an array of path components",
                got: kind(&other).to_string(),
            });
        }
    };
    let mut current = element;
    for component in &components {
        current = match (current, component) {
            (Value::Object(map), Value::String(key)) => map.get(key).ok_or_else(|| {
                ComputeError::Message(format!("item: key {key:?} not found"))
            })?,
            (Value::Array(items), Value::Number(n)) => {
                let index = n.as_u64().ok_or(ComputeError::Type {
                    expected: "a non-negative index",
                    got: "a number".to_string(),
                })? as usize;
                items.get(index).ok_or_else(|| {
                    ComputeError::Message(format!("item: index {index} out of bounds"))
                })?
            }
            (value, component) => {
                return Err(ComputeError::Type {
                    expected: "an object or array to project into",
                    got: format!("{} at component {component}", kind(value)),
                });
            }
        };
    }
    Ok(current.clone())
}

/// `map {src, dst?, copy: [{value, to}]}` — project fields out of `src`
/// into `dst`, with `src` ambient for nested `item` lookups.
pub(crate) fn map(args: &Value, scope: &Scope) -> Result<Value, ComputeError> {
    let map = args_object(args, "map arguments")?;
    let src = compute(require(map, "src", "a map.src argument")?, scope)?;
    let child = scope.child(&src);

    let mut dst = match map.get("dst") {
        Some(dst) => compute(dst, &child)?,
        None => Value::Null,
    };

    let copies = match require(map, "copy", "a map.copy argument")? {
        Value::Array(copies) => copies,
        other => {
            return Err(ComputeError::Type {
                expected: "an array of copy entries",
                got: kind(other).to_string(),
            });
        }
    };
    for entry in copies {
        let entry = compute(entry, &child)?;
        let entry = args_object(&entry, "a copy entry")?;
        let value = require(entry, "value", "a copy.value argument")?.clone();
        let to = match require(entry, "to", "a copy.to path")? {
            Value::Array(to) => to,
            other => {
                return Err(ComputeError::Type {
                    expected: "an array path in copy.to",
                    got: kind(other).to_string(),
                });
            }
        };
        set_path(&mut dst, to, value)?;
    }
    Ok(dst)
}

/// Write `value` into `dst` at `path`, creating intermediate objects.
/// An empty path replaces `dst` wholesale.
fn set_path(dst: &mut Value, path: &[Value], value: Value) -> Result<(), ComputeError> {
    let Some((head, rest)) = path.split_first() else {
        *dst = value;
        return Ok(());
    };
    match head {
        Value::String(key) => {
            if !dst.is_object() {
                *dst = Value::Object(Map::new());
            }
            let map = dst.as_object_mut().ok_or(ComputeError::Type {
                expected: "an object destination",
                got: "something else".to_string(),
            })?;
            let slot = map.entry(key.clone()).or_insert(Value::Null);
            set_path(slot, rest, value)
        }
        Value::Number(n) => {
            let index = n.as_u64().ok_or(ComputeError::Type {
                expected: "a non-negative index",
                got: "a number".to_string(),
            })? as usize;
            let got = kind(dst).to_string();
            let items = dst.as_array_mut().ok_or(ComputeError::Type {
                expected: "an array destination",
                got,
            })?;
            let slot = items.get_mut(index).ok_or_else(|| {
                ComputeError::Message(format!("map: index {index} out of bounds"))
            })?;
            set_path(slot, rest, value)
        }
        other => Err(ComputeError::Type {
            expected: "a string or integer path component",
            got: kind(other).to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// count / comparison
// ---------------------------------------------------------------------------

/// `count {of}` — element count of a countable value.
pub(crate) fn count(args: &Value, scope: &Scope) -> Result<Value, ComputeError> {
    let map = args_object(args, "count arguments")?;
    let of = compute(require(map, "of", "a count.of argument")?, scope)?;
    let n = match &of {
        Value::Null => 0,
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::String(s) => s.chars().count(),
        other => {
            return Err(ComputeError::Type {
                expected: "a countable value",
                got: kind(other).to_string(),
            });
        }
    };
    Ok(Value::from(n))
}

/// `comparison {equal|match|less|greater: {lhs, rhs}}`.
pub(crate) fn comparison(args: &Value, scope: &Scope) -> Result<Value, ComputeError> {
    let map = args_object(args, "comparison arguments")?;
    if map.len() != 1 {
        return Err(ComputeError::MalformedNode(map.len()));
    }
    let (operator, operands) = map
        .iter()
        .next()
        .ok_or(ComputeError::MalformedNode(0))?;
    let operands = args_object(operands, "comparison operands")?;
    let lhs = compute(require(operands, "lhs", "a comparison.lhs operand")?, scope)?;
    let rhs = compute(require(operands, "rhs", "a comparison.rhs operand")?, scope)?;
    let outcome = match operator.as_str() {
        "equal" => coercive_eq(&lhs, &rhs),
        "match" => {
            let pattern = as_string(rhs, "a regular expression string")?;
            let subject = as_string(lhs, "a string to match")?;
            Regex::new(&pattern)
                .map_err(|e| ComputeError::Regex(e.to_string()))?
                .is_match(&subject)
        }
        "less" => numeric(&lhs)? < numeric(&rhs)?,
        "greater" => numeric(&lhs)? > numeric(&rhs)?,
        other => return Err(ComputeError::UnknownFunction(other.to_string())),
    };
    Ok(Value::Bool(outcome))
}

/// Type-tolerant deep equality: numeric coercion across number/string,
/// elementwise arrays, keywise objects, and tag-reference canonicalization
/// (a reference string equals its context-free path).
pub(crate) fn coercive_eq(lhs: &Value, rhs: &Value) -> bool {
    if lhs == rhs {
        return true;
    }
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            s.parse::<f64>().ok() == n.as_f64()
        }
        (Value::String(a), Value::String(b)) => reference_eq(a, b),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| coercive_eq(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|w| coercive_eq(v, w)))
        }
        _ => false,
    }
}

/// Two strings are reference-equal when their canonical base paths match
/// and at least one of them carried a context suffix.
fn reference_eq(a: &str, b: &str) -> bool {
    let base_a = a.split('[').next().unwrap_or(a);
    let base_b = b.split('[').next().unwrap_or(b);
    (base_a.len() != a.len() || base_b.len() != b.len()) && base_a == base_b
}

// ---------------------------------------------------------------------------
// either / yes / not / exists / error
// ---------------------------------------------------------------------------

/// `either [{condition?, value}, …]` — first entry whose condition holds.
pub(crate) fn either(args: &Value, scope: &Scope) -> Result<Value, ComputeError> {
    let entries = match args {
        Value::Array(entries) => entries,
        other => {
            return Err(ComputeError::Type {
                expected: "an array of either entries",
                got: kind(other).to_string(),
            });
        }
    };
    for entry in entries {
        // An entry may itself be an expression producing {condition, value}.
        let resolved;
        let entry = match entry {
            Value::Object(map) if map.contains_key(RETURNS) => {
                resolved = compute(entry, scope)?;
                &resolved
            }
            other => other,
        };
        let entry = args_object(entry, "an either entry")?;
        let holds = match entry.get("condition") {
            None => true, // always-true fallback entry
            Some(condition) => truthy(&compute(condition, scope)?)?,
        };
        if holds {
            return compute(require(entry, "value", "an either.value argument")?, scope);
        }
    }
    Err(ComputeError::Message(
        "either: no condition evaluated to true".to_string(),
    ))
}

/// `yes {if?: […], unless?: […]}` — conjunction with veto entries.
pub(crate) fn yes(args: &Value, scope: &Scope) -> Result<Value, ComputeError> {
    let map = args_object(args, "yes arguments")?;
    for (key, expected) in [("if", true), ("unless", false)] {
        let Some(entries) = map.get(key) else { continue };
        let entries = match entries {
            Value::Array(entries) => entries,
            other => {
                return Err(ComputeError::Type {
                    expected: "an array of conditions",
                    got: kind(other).to_string(),
                });
            }
        };
        for entry in entries {
            if truthy(&compute(entry, scope)?)? != expected {
                return Ok(Value::Bool(false));
            }
        }
    }
    Ok(Value::Bool(true))
}

/// `not <expression>` — boolean negation. Accepts `{value: …}` too.
pub(crate) fn not(args: &Value, scope: &Scope) -> Result<Value, ComputeError> {
    let inner = match args {
        Value::Object(map) if !map.contains_key(RETURNS) && map.contains_key("value") => {
            &map["value"]
        }
        other => other,
    };
    let value = compute(inner, scope)?;
    Ok(Value::Bool(!truthy(&value)?))
}

/// `exists {value}` — true iff the value resolves and is non-null.
/// Pending propagates; any other failure is simply "does not exist".
pub(crate) fn exists(args: &Value, scope: &Scope) -> Result<Value, ComputeError> {
    let map = args_object(args, "exists arguments")?;
    match compute(require(map, "value", "an exists.value argument")?, scope) {
        Ok(Value::Null) => Ok(Value::Bool(false)),
        Ok(_) => Ok(Value::Bool(true)),
        Err(e) if e.is_pending() => Err(e),
        Err(_) => Ok(Value::Bool(false)),
    }
}

/// `error {message}` — always fails. Encodes "no value" branches.
pub(crate) fn error(args: &Value, scope: &Scope) -> Result<Value, ComputeError> {
    let message = match args {
        Value::String(s) => s.clone(),
        _ => {
            let map = args_object(args, "error arguments")?;
            as_string(
                compute(require(map, "message", "an error.message argument")?, scope)?,
                "an error message string",
            )?
        }
    };
    Err(ComputeError::Message(message))
}

// ---------------------------------------------------------------------------
// text / eval
// ---------------------------------------------------------------------------

/// `text {by: {joining: {array, separator?, terminator?}}}`.
pub(crate) fn text(args: &Value, scope: &Scope) -> Result<Value, ComputeError> {
    let by = args_object(args, "text arguments")?;
    let joining = args_object(
        require(by, "by", "a text.by argument")?,
        "a text.by object",
    )?;
    let joining = args_object(
        require(joining, "joining", "a text.by.joining argument")?,
        "a joining object",
    )?;
    let array = compute(require(joining, "array", "a joining.array argument")?, scope)?;
    let Value::Array(pieces) = array else {
        return Err(ComputeError::Type {
            expected: "an array to join",
            got: kind(&array).to_string(),
        });
    };
    let separator = match joining.get("separator") {
        Some(separator) => as_string(compute(separator, scope)?, "a separator string")?,
        None => " ".to_string(),
    };
    let mut parts = Vec::with_capacity(pieces.len());
    for piece in &pieces {
        parts.push(match piece {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => {
                return Err(ComputeError::Type {
                    expected: "a string to join",
                    got: kind(other).to_string(),
                });
            }
        });
    }
    let mut out = parts.join(&separator);
    if let Some(terminator) = joining.get("terminator") {
        out.push_str(&as_string(
            compute(terminator, scope)?,
            "a terminator string",
        )?);
    }
    Ok(Value::String(out))
}

/// `eval {expression, context?}` — the arithmetic/string mini-language.
/// Context values are computed first, so they may be `from` references.
pub(crate) fn eval(args: &Value, scope: &Scope) -> Result<Value, ComputeError> {
    let map = args_object(args, "eval arguments")?;
    let expression = as_string(
        compute(require(map, "expression", "an eval.expression argument")?, scope)?,
        "an expression string",
    )?;
    let mut variables = std::collections::BTreeMap::new();
    if let Some(context) = map.get("context") {
        let context = compute(context, scope)?;
        let entries = args_object(&context, "an eval.context object")?;
        for (key, value) in entries {
            variables.insert(key.clone(), value.clone());
        }
    }
    crate::eval::evaluate(&expression, &variables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pure(expression: Value) -> Result<Value, ComputeError> {
        compute(&expression, &Scope::new(&()))
    }

    fn node(function: &str, args: Value) -> Value {
        json!({RETURNS: {function: args}})
    }

    #[test]
    fn this_returns_value() {
        assert_eq!(pure(node("this", json!({"value": 42}))).unwrap(), json!(42));
    }

    #[test]
    fn this_with_false_condition_throws() {
        let e = pure(node("this", json!({"value": 1, "condition": false}))).unwrap_err();
        assert_eq!(e, ComputeError::ValueNotAvailable);
    }

    #[test]
    fn this_false_condition_with_default() {
        let v = pure(json!({
            RETURNS: {"this": {"value": 1, "condition": false}},
            "default": "fallback"
        }))
        .unwrap();
        assert_eq!(v, json!("fallback"));
    }

    #[test]
    fn this_condition_may_be_expression() {
        let condition = node("comparison", json!({"equal": {"lhs": 1, "rhs": "1"}}));
        let v = pure(node("this", json!({"value": "ok", "condition": condition}))).unwrap();
        assert_eq!(v, json!("ok"));
    }

    #[test]
    fn count_cases() {
        assert_eq!(pure(node("count", json!({"of": [1, 2, 3]}))).unwrap(), json!(3));
        assert_eq!(pure(node("count", json!({"of": {}}))).unwrap(), json!(0));
        assert_eq!(pure(node("count", json!({"of": null}))).unwrap(), json!(0));
        assert_eq!(
            pure(node("count", json!({"of": "Hello World!"}))).unwrap(),
            json!(12)
        );
        assert!(pure(node("count", json!({"of": 5}))).is_err());
    }

    #[test]
    fn count_of_nested_expression() {
        let of = node("this", json!({"value": ["a", "b"]}));
        assert_eq!(pure(node("count", json!({"of": of}))).unwrap(), json!(2));
    }

    #[test]
    fn equal_is_coercive_and_symmetric() {
        for (lhs, rhs) in [
            (json!(1), json!("1")),
            (json!([1, 2, 3]), json!([1, 2, 3])),
            (json!(1.0), json!(1)),
            (json!("a.b.c[user=alice]"), json!("a.b.c")),
        ] {
            let forward = node("comparison", json!({"equal": {"lhs": lhs, "rhs": rhs}}));
            let backward = node("comparison", json!({"equal": {"lhs": rhs, "rhs": lhs}}));
            assert_eq!(pure(forward).unwrap(), json!(true), "{lhs} == {rhs}");
            assert_eq!(pure(backward).unwrap(), json!(true), "{rhs} == {lhs}");
        }
    }

    #[test]
    fn equal_rejects_unrelated_strings() {
        let e = node("comparison", json!({"equal": {"lhs": "ab", "rhs": "a"}}));
        assert_eq!(pure(e).unwrap(), json!(false));
    }

    #[test]
    fn match_applies_regex() {
        let hit = node("comparison", json!({"match": {"lhs": "hello42", "rhs": "^[a-z]+\\d+$"}}));
        let miss = node("comparison", json!({"match": {"lhs": "42", "rhs": "^[a-z]+$"}}));
        assert_eq!(pure(hit).unwrap(), json!(true));
        assert_eq!(pure(miss).unwrap(), json!(false));
    }

    #[test]
    fn match_rejects_bad_pattern() {
        let e = node("comparison", json!({"match": {"lhs": "x", "rhs": "("}}));
        assert!(matches!(pure(e).unwrap_err(), ComputeError::Regex(_)));
    }

    #[test]
    fn less_and_greater_are_numeric() {
        let less = node("comparison", json!({"less": {"lhs": 1, "rhs": "2"}}));
        let greater = node("comparison", json!({"greater": {"lhs": 1, "rhs": 2}}));
        assert_eq!(pure(less).unwrap(), json!(true));
        assert_eq!(pure(greater).unwrap(), json!(false));
    }

    #[test]
    fn either_first_truthy_wins() {
        let v = pure(node(
            "either",
            json!([
                {"condition": false, "value": "a"},
                {"condition": true, "value": "b"},
                {"value": "c"}
            ]),
        ))
        .unwrap();
        assert_eq!(v, json!("b"));
    }

    #[test]
    fn either_fallback_entry_has_no_condition() {
        let v = pure(node(
            "either",
            json!([{"condition": false, "value": "a"}, {"value": "c"}]),
        ))
        .unwrap();
        assert_eq!(v, json!("c"));
    }

    #[test]
    fn either_with_no_truthy_condition_throws() {
        let e = pure(node("either", json!([{"condition": false, "value": "a"}])));
        assert!(matches!(e.unwrap_err(), ComputeError::Message(_)));
    }

    #[test]
    fn yes_conjunction_and_veto() {
        let v = pure(node("yes", json!({"if": [true, true], "unless": [false, false]})));
        assert_eq!(v.unwrap(), json!(true));
        let v = pure(node("yes", json!({"if": [true, true], "unless": [false, true]})));
        assert_eq!(v.unwrap(), json!(false));
        let v = pure(node("yes", json!({"if": [true, false]})));
        assert_eq!(v.unwrap(), json!(false));
        let v = pure(node("yes", json!({})));
        assert_eq!(v.unwrap(), json!(true));
    }

    #[test]
    fn yes_entries_may_be_expressions() {
        let inner = node("yes", json!({"if": [true]}));
        let v = pure(node("yes", json!({"if": [inner]}))).unwrap();
        assert_eq!(v, json!(true));
    }

    #[test]
    fn not_negates() {
        assert_eq!(pure(node("not", json!(true))).unwrap(), json!(false));
        assert_eq!(pure(node("not", json!({"value": false}))).unwrap(), json!(true));
        let inner = node("yes", json!({"if": [false]}));
        assert_eq!(pure(node("not", inner)).unwrap(), json!(true));
    }

    #[test]
    fn exists_null_and_errors_are_false() {
        assert_eq!(pure(node("exists", json!({"value": 1}))).unwrap(), json!(true));
        assert_eq!(pure(node("exists", json!({"value": null}))).unwrap(), json!(false));
        let failing = node("error", json!({"message": "x"}));
        assert_eq!(
            pure(node("exists", json!({"value": failing}))).unwrap(),
            json!(false)
        );
    }

    #[test]
    fn error_always_fails_with_message() {
        let e = pure(node("error", json!({"message": "no value here"}))).unwrap_err();
        assert_eq!(e, ComputeError::Message("no value here".to_string()));
        let e = pure(node("error", json!("terse"))).unwrap_err();
        assert_eq!(e, ComputeError::Message("terse".to_string()));
    }

    #[test]
    fn item_requires_ambient_element() {
        let e = pure(node("item", json!(["a"]))).unwrap_err();
        assert_eq!(e, ComputeError::NoElement);
    }

    #[test]
    fn map_projects_nested_fields() {
        let v = pure(node(
            "map",
            json!({
                "src": {"way": {"to": {"my": {"heart": 42}}}},
                "copy": [
                    {"value": node("item", json!(["way", "to", "my", "heart"])), "to": ["int"]}
                ]
            }),
        ))
        .unwrap();
        assert_eq!(v, json!({"int": 42}));
    }

    #[test]
    fn map_empty_item_path_is_the_element() {
        let v = pure(node(
            "map",
            json!({
                "src": {"a": 1},
                "copy": [{"value": node("item", json!([])), "to": ["whole"]}]
            }),
        ))
        .unwrap();
        assert_eq!(v, json!({"whole": {"a": 1}}));
    }

    #[test]
    fn map_indexes_arrays() {
        let v = pure(node(
            "map",
            json!({
                "src": {"xs": [10, 20, 30]},
                "copy": [{"value": node("item", json!(["xs", 1])), "to": ["picked"]}]
            }),
        ))
        .unwrap();
        assert_eq!(v, json!({"picked": 20}));
    }

    #[test]
    fn map_respects_dst_and_deep_to_paths() {
        let v = pure(node(
            "map",
            json!({
                "src": {"n": 7},
                "dst": {"kept": true},
                "copy": [{"value": node("item", json!(["n"])), "to": ["nested", "n"]}]
            }),
        ))
        .unwrap();
        assert_eq!(v, json!({"kept": true, "nested": {"n": 7}}));
    }

    #[test]
    fn map_numeric_to_path_writes_into_array_destinations() {
        let v = pure(node(
            "map",
            json!({
                "src": {"n": 7},
                "dst": [1, 2],
                "copy": [{"value": node("item", json!(["n"])), "to": [1]}]
            }),
        ))
        .unwrap();
        assert_eq!(v, json!([1, 7]));
    }

    #[test]
    fn map_numeric_to_path_requires_an_array_destination() {
        let e = pure(node(
            "map",
            json!({
                "src": {"n": 7},
                "dst": {"kept": true},
                "copy": [{"value": node("item", json!(["n"])), "to": [0]}]
            }),
        ))
        .unwrap_err();
        assert!(matches!(
            e,
            ComputeError::Type {
                expected: "an array destination",
                ..
            }
        ));
    }

    #[test]
    fn map_empty_to_path_replaces_dst() {
        let v = pure(node(
            "map",
            json!({
                "src": {"n": 7},
                "copy": [{"value": node("item", json!(["n"])), "to": []}]
            }),
        ))
        .unwrap();
        assert_eq!(v, json!(7));
    }

    #[test]
    fn nested_maps_compose() {
        let inner = node(
            "map",
            json!({
                "src": node("item", json!(["inner"])),
                "copy": [{"value": node("item", json!(["x"])), "to": ["y"]}]
            }),
        );
        let v = pure(node(
            "map",
            json!({
                "src": {"inner": {"x": 5}},
                "copy": [{"value": inner, "to": ["projected"]}]
            }),
        ))
        .unwrap();
        assert_eq!(v, json!({"projected": {"y": 5}}));
    }

    #[test]
    fn text_joins_with_defaults() {
        let v = pure(node(
            "text",
            json!({"by": {"joining": {"array": ["Hello", "World"]}}}),
        ))
        .unwrap();
        assert_eq!(v, json!("Hello World"));
    }

    #[test]
    fn text_separator_and_terminator() {
        let v = pure(node(
            "text",
            json!({"by": {"joining": {"array": ["a", "b", 3], "separator": "-", "terminator": "!"}}}),
        ))
        .unwrap();
        assert_eq!(v, json!("a-b-3!"));
    }

    #[test]
    fn eval_arithmetic() {
        let v = pure(node("eval", json!({"expression": "1 + 2 + 3 * 2"}))).unwrap();
        assert_eq!(v, json!(9));
    }

    #[test]
    fn eval_with_context_variables() {
        let v = pure(node(
            "eval",
            json!({"expression": "price * quantity", "context": {"price": 3, "quantity": 4}}),
        ))
        .unwrap();
        assert_eq!(v, json!(12));
    }

    #[test]
    fn eval_unknown_variable_is_reference_error() {
        let e = pure(node("eval", json!({"expression": "1 + missing"}))).unwrap_err();
        assert_eq!(
            e,
            ComputeError::Eval("ReferenceError: Can't find variable: missing".to_string())
        );
    }
}
