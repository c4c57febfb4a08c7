#![forbid(unsafe_code)]

//! Whole-language scenarios evaluated against a live store, and a
//! purity property for literal documents.

use std::rc::Rc;

use proptest::prelude::*;
use serde_json::{Value, json};

use tagbind_compute::{ComputeError, Handler, Scope, StoreResolver, compute};
use tagbind_core::{MemoryStore, Reference, Store};

fn r(path: &str) -> Reference {
    Reference::new(path)
}

#[test]
fn projection_reshapes_a_stored_document() {
    let store = MemoryStore::new();
    store.set(
        r("account"),
        json!({ "currency": "BTC", "balance": { "available": 3, "pending": 1 } }),
    );

    let resolver = StoreResolver::new(&store);
    let scope = Scope::new(&resolver);
    let expression = json!({
        "{returns}": {
            "map": {
                "src": { "{returns}": { "from": "account" } },
                "copy": [
                    {
                        "to": ["currency"],
                        "value": { "{returns}": { "item": ["currency"] } }
                    },
                    {
                        "to": ["available"],
                        "value": { "{returns}": { "item": ["balance", "available"] } }
                    }
                ]
            }
        }
    });

    assert_eq!(
        compute(&expression, &scope).unwrap(),
        json!({ "currency": "BTC", "available": 3 })
    );
}

#[test]
fn conditional_chain_reads_the_store() {
    let store = MemoryStore::new();
    store.set(r("tier"), json!("gold"));
    store.set(r("gold.rate"), json!(2));
    store.set(r("basic.rate"), json!(1));

    let resolver = StoreResolver::new(&store);
    let scope = Scope::new(&resolver);
    let expression = json!({
        "{returns}": {
            "either": [
                {
                    "condition": {
                        "{returns}": {
                            "comparison": {
                                "equal": {
                                    "lhs": { "{returns}": { "from": "tier" } },
                                    "rhs": "gold"
                                }
                            }
                        }
                    },
                    "value": { "{returns}": { "from": "gold.rate" } }
                },
                { "value": { "{returns}": { "from": "basic.rate" } } }
            ]
        }
    });

    assert_eq!(compute(&expression, &scope).unwrap(), json!(2));

    store.set(r("tier"), json!("basic"));
    assert_eq!(compute(&expression, &scope).unwrap(), json!(1));
}

#[test]
fn defaults_absorb_missing_references_at_each_level() {
    let store = MemoryStore::new();
    store.set(r("title"), json!("Portfolio"));

    let resolver = StoreResolver::new(&store);
    let scope = Scope::new(&resolver);
    let expression = json!({
        "header": { "{returns}": { "from": "title" } },
        "footer": {
            "{returns}": { "from": "missing.footer" },
            "default": "n/a"
        }
    });

    assert_eq!(
        compute(&expression, &scope).unwrap(),
        json!({ "header": "Portfolio", "footer": "n/a" })
    );
}

#[test]
fn text_joining_composes_with_from() {
    let store = MemoryStore::new();
    store.set(r("user.first"), json!("Ada"));
    store.set(r("user.last"), json!("Lovelace"));

    let resolver = StoreResolver::new(&store);
    let scope = Scope::new(&resolver);
    let expression = json!({
        "{returns}": {
            "text": {
                "by": {
                    "joining": {
                        "array": [
                            { "{returns}": { "from": "user.first" } },
                            { "{returns}": { "from": "user.last" } }
                        ]
                    }
                }
            }
        }
    });

    assert_eq!(compute(&expression, &scope).unwrap(), json!("Ada Lovelace"));
}

#[test]
fn unknown_keyword_reports_the_grammar_error() {
    let scope = Scope::new(&());
    let expression = json!({ "{returns}": { "frm": "a.b" } });
    assert_eq!(
        compute(&expression, &scope).unwrap_err().to_string(),
        "Expected {returns} keyword, but got frm"
    );
}

#[test]
fn handler_reacts_across_a_dependency_chain() {
    let store = MemoryStore::new();
    store.set(r("celsius"), json!(20));

    let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let handler = Handler::new(
        Rc::new(store.clone()),
        json!({
            "{returns}": {
                "eval": {
                    "expression": "c * 9 / 5 + 32",
                    "context": { "c": { "{returns}": { "from": "celsius" } } }
                }
            }
        }),
        Default::default(),
        move |out| sink.borrow_mut().push(out),
    );

    store.set(r("celsius"), json!(100));
    assert_eq!(
        *seen.borrow(),
        vec![Ok(json!(68)), Ok(json!(212))]
    );
    assert_eq!(handler.subscription_count(), 1);
}

#[test]
fn pending_is_distinct_from_not_found() {
    // A resolver that never answers models a backend still fetching.
    struct Silent;
    impl tagbind_compute::Resolver for Silent {
        fn resolve(&self, reference: &Reference) -> Result<Value, ComputeError> {
            Err(ComputeError::Pending(reference.clone()))
        }
    }

    let resolver = Silent;
    let scope = Scope::new(&resolver);
    let expression = json!({
        "{returns}": { "from": "slow.value" },
        "default": "fallback"
    });

    // Pending passes through the default untouched; the tree is still
    // waiting, not failed.
    let err = compute(&expression, &scope).unwrap_err();
    assert!(err.is_pending());
}

// ---------------------------------------------------------------------------
// Purity of literal documents
// ---------------------------------------------------------------------------

fn literal_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-z]{0,8}".prop_map(Value::String),
    ];
    // Object keys stay lowercase alphabetic, so no generated document
    // can contain an expression marker.
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn literal_documents_compute_to_themselves(document in literal_json()) {
        let scope = Scope::new(&());
        prop_assert_eq!(compute(&document, &scope).unwrap(), document);
    }
}
