#![forbid(unsafe_code)]

//! Canonical-form properties for references.

use proptest::prelude::*;

use tagbind_core::{Context, Reference};

fn path() -> impl Strategy<Value = String> {
    "[a-z]{1,6}(\\.[a-z]{1,6}){0,3}"
}

// Context values stay either integers or alphabetic strings that cannot
// be mistaken for JSON literals, so parsing the canonical form recovers
// exactly what was printed.
fn context_value() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        any::<i64>().prop_map(serde_json::Value::from),
        "[a-z]{1,8}"
            .prop_filter("JSON keyword", |s| {
                !matches!(s.as_str(), "true" | "false" | "null")
            })
            .prop_map(serde_json::Value::from),
    ]
}

fn reference() -> impl Strategy<Value = Reference> {
    (
        path(),
        prop::collection::btree_map("[a-z]{1,6}", context_value(), 0..4),
    )
        .prop_map(|(path, entries)| {
            let context: Context = entries.into_iter().collect();
            Reference::new(path).in_context(&context)
        })
}

proptest! {
    #[test]
    fn canonical_form_round_trips(reference in reference()) {
        let printed = reference.to_string();
        let parsed: Reference = printed.parse().expect("canonical form parses");
        prop_assert_eq!(parsed, reference);
    }

    #[test]
    fn serde_round_trips_as_string(reference in reference()) {
        let encoded = serde_json::to_string(&reference).unwrap();
        let decoded: Reference = serde_json::from_str(&encoded).unwrap();
        prop_assert_eq!(decoded, reference);
    }

    #[test]
    fn context_never_changes_the_path(reference in reference()) {
        let overlaid = reference.in_context(&Context::new().with("extra", 1));
        prop_assert_eq!(overlaid.path(), reference.path());
    }
}
