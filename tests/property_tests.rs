//! Property-based tests for trueno-trials
//!
//! - Loader binds any valid routine under the entry name, whatever its author called it
//! - Loader rejects every source that is not exactly one function
//! - Every claimed trial is reported exactly once, whatever the routine does
//! - Run with ProptestConfig::with_cases(100) (fewer for the worker loop)

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use trueno_trials::config::WorkerConfig;
use trueno_trials::deadline::Budget;
use trueno_trials::routine::{RoutineLoader, RoutineSource, ENTRY_POINT};
use trueno_trials::store::MemoryTrialStore;
use trueno_trials::trial::TaskDescriptor;
use trueno_trials::worker::TrialWorker;
use trueno_trials::Error;

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

const KEYWORDS: &[&str] = &[
    "fn", "let", "if", "else", "while", "for", "in", "return", "true", "false", "null",
];

/// Generate an identifier that is not a keyword
fn arb_ident() -> impl Strategy<Value = String> {
    "[a-z_][a-z0-9_]{0,15}".prop_filter("keywords are reserved", |name| {
        !KEYWORDS.contains(&name.as_str())
    })
}

/// Generate a small arithmetic body returning a number
fn arb_body(param: String) -> impl Strategy<Value = (String, i64)> {
    (0i64..1000, 1i64..50).prop_map(move |(a, b)| {
        (
            format!("let x = {a};\n    return x * {b} + len([{param}]);"),
            a * b + 1,
        )
    })
}

/// Generate a top-level item that is not a function definition
fn arb_statement() -> impl Strategy<Value = String> {
    prop_oneof![
        (0i64..100).prop_map(|n| format!("let v = {n};")),
        Just("log(1);".to_string()),
        Just("return 3;".to_string()),
        Just("if true { }".to_string()),
    ]
}

/// Trial methods the worker routine branches on
fn arb_methods() -> impl Strategy<Value = Vec<&'static str>> {
    proptest::collection::vec(prop_oneof![Just("ok"), Just("fail"), Just("slow")], 0..8)
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: the loaded routine is always reachable under the entry name
    #[test]
    fn prop_loader_binds_entry_point(
        name in arb_ident(),
        (param, (body, expected)) in arb_ident().prop_flat_map(|p| (Just(p.clone()), arb_body(p))),
    ) {
        let source = format!("fn {name}({param}) {{\n    {body}\n}}");
        let routine = RoutineLoader::new().load(&RoutineSource::new(source)).unwrap();

        prop_assert_eq!(routine.name(), ENTRY_POINT);
        prop_assert_eq!(routine.original_name(), name.as_str());
        let result = routine.invoke(serde_json::json!({})).unwrap();
        prop_assert_eq!(result, serde_json::json!(expected));
    }

    /// Property: more than one top-level item is always a configuration error
    #[test]
    fn prop_loader_rejects_multiple_items(
        names in proptest::collection::vec(arb_ident(), 2..5),
    ) {
        let source: String = names
            .iter()
            .map(|n| format!("fn {n}(t) {{ return 1; }}\n"))
            .collect();
        let result = RoutineLoader::new().load(&RoutineSource::new(source));
        prop_assert!(matches!(result, Err(Error::Configuration(_))));
    }

    /// Property: a non-function top level is always a configuration error
    #[test]
    fn prop_loader_rejects_statements(statement in arb_statement()) {
        let result = RoutineLoader::new().load(&RoutineSource::new(statement));
        prop_assert!(matches!(result, Err(Error::Configuration(_))));
    }

    /// Property: arbitrary text never loads into something other than a configuration error
    #[test]
    fn prop_loader_never_panics(text in "\\PC{0,64}") {
        match RoutineLoader::new().load(&RoutineSource::new(text)) {
            Ok(routine) => prop_assert_eq!(routine.name(), ENTRY_POINT),
            Err(e) => prop_assert!(matches!(e, Error::Configuration(_))),
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Property: claims and reports are in bijection across all outcome kinds
    #[test]
    fn prop_every_claim_reported_once(methods in arb_methods()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let store = Arc::new(MemoryTrialStore::new());
        store.register_routine(
            "exp",
            r#"fn r(t) {
                if t.method == "fail" { fail("nope"); }
                if t.method == "slow" { sleep(2); }
                return 1;
            }"#,
        );
        let ids: Vec<_> = methods
            .iter()
            .map(|m| store.add_trial("exp", TaskDescriptor::new("openml", "iris"), m))
            .collect();

        let config = WorkerConfig::builder("exp", "r0")
            .budget(Budget::limited(Duration::from_millis(30)).unwrap())
            .build()
            .unwrap();
        let summary = runtime
            .block_on(TrialWorker::new(store.clone(), config).run())
            .unwrap();

        prop_assert_eq!(summary.trials_run, methods.len());
        let expected_failures = methods.iter().filter(|m| **m != "ok").count();
        prop_assert_eq!(summary.failed, expected_failures);

        let mut reported: Vec<_> = store.reports().into_iter().map(|(id, _)| id).collect();
        reported.sort();
        prop_assert_eq!(reported, ids);
    }
}
