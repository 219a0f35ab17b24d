//! End-to-end tests: synthetic policy modules on the wasmi engine.
//!
//! Tests validate:
//! - Predicate / typed / raw evaluation on every ABI revision
//! - ABI negotiation and export resolution
//! - Strict and lenient built-in failures, guest aborts
//! - Base data lifecycle: set, dump, reset, path mutation
//! - Memory limits and per-evaluation built-in state

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use opawasm_builtins::{BuiltinError, BuiltinResult, CustomBuiltins, Declarations, ImportsCache};
use opawasm_guest::GuestModule;
use opawasm_runtime::{
    AbiVersion, Evaluator, EvaluatorFactory, EvaluatorOptions, PolicyModule, RuntimeError,
};
use opawasm_types::OpaResult;
use serde::Deserialize;
use serde_json::{json, Value};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

/// Built-ins standing in for compiled rule bodies. Each receives
/// `(input, data)` and returns the full result set.
struct Rules;

impl CustomBuiltins for Rules {
    fn declare(self: Arc<Self>, d: &mut Declarations) {
        d.func2("example/hello", |input: Value, data: Value| {
            Ok(json!([{"result": input["message"] == data["world"]}]))
        });
        d.func2("example/echo", |input: Value, _: Value| {
            Ok(json!([{"result": input}]))
        });
        d.func2("example/data", |_: Value, data: Value| {
            Ok(json!([{"result": data}]))
        });
        d.func2("example/empty", |_: Value, _: Value| Ok(json!([])));
        d.func2("example/fails", |_: Value, _: Value| -> BuiltinResult<Value> {
            Err(BuiltinError::with_code("custom_error", "rule exploded"))
        });
    }
}

/// Counts calls and resets of a memoized built-in.
#[derive(Default)]
struct Counting {
    calls: AtomicUsize,
    resets: AtomicUsize,
}

impl CustomBuiltins for Counting {
    fn declare(self: Arc<Self>, d: &mut Declarations) {
        let this = Arc::clone(&self);
        d.func2("example/counted", move |input: Value, _: Value| {
            this.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!([{"result": input}]))
        })
        .memoize();
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

fn policy(minor: u32) -> GuestModule {
    GuestModule::new(minor)
        .entrypoint("example/hello")
        .entrypoint("example/echo")
        .entrypoint("example/data")
        .entrypoint("example/empty")
        .entrypoint("example/fails")
        .entrypoint("example/unregistered")
        .aborting_entrypoint("example/deny", "denied by policy")
}

fn factory_for(module: &GuestModule, options: EvaluatorOptions) -> EvaluatorFactory {
    let bytes = module.build().expect("fixture builds");
    EvaluatorFactory::from_bytes(&bytes, options)
        .expect("module compiles")
        .with_builtins(ImportsCache::new().with(Rules))
}

fn evaluator(minor: u32) -> Evaluator {
    factory_for(&policy(minor), EvaluatorOptions::default())
        .create()
        .expect("evaluator")
}

fn capped(minor: u32, cap: AbiVersion) -> Evaluator {
    let options = EvaluatorOptions {
        max_abi_version: Some(cap),
        ..Default::default()
    };
    factory_for(&policy(minor), options).create().expect("evaluator")
}

const MINORS: [u32; 3] = [0, 2, 3];

// ══════════════════════════════════════════════════════════════════════════════
// Evaluation
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_hello_world_predicate_on_every_revision() {
    for minor in MINORS {
        let mut eval = evaluator(minor);
        eval.set_data(&json!({"world": "world"})).unwrap();

        let yes = eval
            .evaluate_predicate(&json!({"message": "world"}), Some("example/hello"))
            .unwrap();
        let no = eval
            .evaluate_predicate(&json!({"message": "hi"}), Some("example/hello"))
            .unwrap();
        assert!(yes, "ABI 1.{minor}");
        assert!(!no, "ABI 1.{minor}");
    }
}

#[test]
fn test_default_entrypoint_is_the_first() {
    let mut eval = evaluator(2);
    eval.set_data(&json!({"world": "x"})).unwrap();
    assert!(eval.evaluate_predicate(&json!({"message": "x"}), None).unwrap());
}

#[test]
fn test_typed_evaluation() {
    #[derive(Debug, Deserialize, PartialEq)]
    struct Request {
        user: String,
        roles: Vec<String>,
    }

    for minor in MINORS {
        let mut eval = evaluator(minor);
        eval.set_data(&json!({})).unwrap();
        let out = eval
            .evaluate::<_, Request>(&json!({"user": "alice", "roles": ["admin"]}), Some("example/echo"))
            .unwrap();
        assert_eq!(
            out.result,
            Request {
                user: "alice".into(),
                roles: vec!["admin".into()],
            }
        );
    }
}

#[test]
fn test_raw_evaluation() {
    let mut eval = evaluator(3);
    eval.set_data_from_raw_json(r#"{"world":"w"}"#).unwrap();
    let raw = eval
        .evaluate_raw(r#"{"message":"w"}"#, Some("example/hello"))
        .unwrap();
    assert_eq!(raw, r#"[{"result":true}]"#);
}

#[test]
fn test_empty_result() {
    let mut eval = evaluator(2);
    eval.set_data(&json!({})).unwrap();

    let err = eval
        .evaluate::<_, Value>(&json!({}), Some("example/empty"))
        .unwrap_err();
    assert!(matches!(err, RuntimeError::EmptyResult));
    assert_eq!(err.to_string(), "Policy evaluator returned empty result");

    let fallback = eval
        .evaluate_or_default(&json!({}), Some("example/empty"), 7)
        .unwrap();
    assert_eq!(fallback.result, 7);
    assert!(!eval.evaluate_predicate(&json!({}), Some("example/empty")).unwrap());
    assert_eq!(eval.evaluate_raw("{}", Some("example/empty")).unwrap(), "[]");
}

#[test]
fn test_unknown_entrypoint() {
    for minor in MINORS {
        let mut eval = evaluator(minor);
        let err = eval.evaluate_raw("{}", Some("example/missing")).unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownEntrypoint(ref name) if name == "example/missing"));
    }
}

#[test]
fn test_entrypoint_isolation() {
    let mut eval = evaluator(3);
    eval.set_data(&json!({"k": [1, 2, 3]})).unwrap();
    let input = json!({"message": "m"});

    let data_first = eval.evaluate::<_, Value>(&input, Some("example/data")).unwrap();
    let echo = eval.evaluate::<_, Value>(&input, Some("example/echo")).unwrap();
    let data_again = eval.evaluate::<_, Value>(&input, Some("example/data")).unwrap();

    assert_eq!(data_first.result, json!({"k": [1, 2, 3]}));
    assert_eq!(echo.result, input);
    assert_eq!(data_first.result, data_again.result);
}

#[test]
fn test_idempotent_reset() {
    for minor in MINORS {
        let mut eval = evaluator(minor);
        eval.set_data(&json!({"world": "a"})).unwrap();
        eval.evaluate_raw(r#"{"message":"a"}"#, None).unwrap();
        eval.reset().unwrap();

        eval.set_data(&json!({"world": "a"})).unwrap();
        let first = eval.evaluate_raw(r#"{"message":"a"}"#, None).unwrap();
        let second = eval.evaluate_raw(r#"{"message":"a"}"#, None).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, r#"[{"result":true}]"#);
    }
}

#[test]
fn test_many_evaluations_are_stable() {
    let mut eval = evaluator(2);
    eval.set_data(&json!({"world": "w"})).unwrap();
    for i in 0..500 {
        let message = if i % 2 == 0 { "w" } else { "x" };
        let input = json!({ "message": message });
        assert_eq!(
            eval.evaluate_predicate(&input, None).unwrap(),
            i % 2 == 0
        );
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// ABI negotiation
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_negotiation_table() {
    let cases = [
        (3, None, AbiVersion::V1_3),
        (3, Some(AbiVersion::V1_2), AbiVersion::V1_2),
        (3, Some(AbiVersion::new(1, 1)), AbiVersion::V1_0),
        (3, Some(AbiVersion::new(10, 0)), AbiVersion::V1_3),
        (2, None, AbiVersion::V1_2),
        (2, Some(AbiVersion::V1_3), AbiVersion::V1_2),
        (0, None, AbiVersion::V1_0),
    ];
    for (minor, cap, expected) in cases {
        let eval = match cap {
            Some(cap) => capped(minor, cap),
            None => evaluator(minor),
        };
        assert_eq!(eval.abi_version(), expected, "module 1.{minor}, cap {cap:?}");
        assert_eq!(eval.policy_abi_version(), AbiVersion::new(1, minor));
    }
}

#[test]
fn test_update_feature_only_on_1_3() {
    assert!(evaluator(3).update_data_feature().is_some());
    assert!(evaluator(2).update_data_feature().is_none());
    assert!(capped(3, AbiVersion::V1_2).update_data_feature().is_none());
}

#[test]
fn test_missing_export_fails_construction() {
    let module = policy(3).without_export("opa_heap_stash_clear");
    let err = factory_for(&module, EvaluatorOptions::default())
        .create()
        .err()
        .expect("construction fails");
    assert_eq!(
        err.to_string(),
        "ABI 1.3. Failed to resolve export opa_heap_stash_clear"
    );

    // A lower revision does not need it.
    let options = EvaluatorOptions {
        max_abi_version: Some(AbiVersion::V1_2),
        ..Default::default()
    };
    assert!(factory_for(&module, options).create().is_ok());
}

#[test]
fn test_missing_version_global() {
    let module = policy(2).without_export("opa_wasm_abi_minor_version");
    let err = factory_for(&module, EvaluatorOptions::default())
        .create()
        .err()
        .expect("construction fails");
    assert!(matches!(err, RuntimeError::AbiNegotiation(_)));
    assert!(err
        .to_string()
        .contains("Failed to get value from opa_wasm_abi_minor_version global"));
}

#[test]
fn test_module_without_memory_import() {
    let empty_module = b"\0asm\x01\0\0\0";
    let err = PolicyModule::from_bytes(empty_module).err().expect("rejected");
    assert!(matches!(err, RuntimeError::Module(_)));
}

#[test]
fn test_module_signature() {
    let bytes = policy(3).build().unwrap();
    let module = PolicyModule::from_bytes(&bytes).unwrap();
    let signature = module.signature();
    assert!(signature.imports("env", "memory"));
    assert!(signature.imports("env", "opa_builtin2"));
    assert!(signature.exports("opa_heap_blocks_stash"));
    assert_eq!(signature.memory_min_pages, 2);
}

// ══════════════════════════════════════════════════════════════════════════════
// Built-in failures and aborts
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_lenient_builtin_failure_is_undefined() {
    for minor in MINORS {
        let mut eval = evaluator(minor);
        eval.set_data(&json!({})).unwrap();
        assert_eq!(eval.evaluate_raw("{}", Some("example/fails")).unwrap(), "[]");
        assert!(!eval.evaluate_predicate(&json!({}), Some("example/fails")).unwrap());
    }
}

#[test]
fn test_strict_builtin_failure_fails_evaluation() {
    let options = EvaluatorOptions {
        strict_builtin_errors: true,
        ..Default::default()
    };
    for minor in MINORS {
        let mut eval = factory_for(&policy(minor), options.clone()).create().unwrap();
        eval.set_data(&json!({})).unwrap();
        let err = eval.evaluate_raw("{}", Some("example/fails")).unwrap_err();
        match err {
            RuntimeError::Builtin(inner) => assert_eq!(inner.code(), "custom_error"),
            other => panic!("expected builtin error, got {other:?}"),
        }
        // The evaluator stays usable.
        assert_eq!(
            eval.evaluate_raw(r#"{"a":1}"#, Some("example/echo")).unwrap(),
            r#"[{"result":{"a":1}}]"#
        );
    }
}

#[test]
fn test_unimplemented_builtin_is_always_fatal() {
    let mut eval = evaluator(2);
    eval.set_data(&json!({})).unwrap();
    let err = eval.evaluate_raw("{}", Some("example/unregistered")).unwrap_err();
    match err {
        RuntimeError::Builtin(inner) => assert!(inner.is_not_implemented()),
        other => panic!("expected builtin error, got {other:?}"),
    }
}

#[test]
fn test_abort_is_distinct() {
    for minor in MINORS {
        let mut eval = evaluator(minor);
        eval.set_data(&json!({})).unwrap();
        let err = eval.evaluate_raw("{}", Some("example/deny")).unwrap_err();
        assert!(
            matches!(err, RuntimeError::Aborted(ref message) if message == "denied by policy"),
            "ABI 1.{minor}: {err:?}"
        );
        assert!(eval.evaluate_predicate(&json!({}), Some("example/empty")).is_ok());
    }
}

#[test]
fn test_builtin_state_is_reset_after_every_evaluation() {
    let counting = Arc::new(Counting::default());
    let mut cache = ImportsCache::new();
    cache.register(counting.clone());
    let bytes = GuestModule::new(2).entrypoint("example/counted").build().unwrap();
    let mut eval = EvaluatorFactory::from_bytes(&bytes, EvaluatorOptions::default())
        .unwrap()
        .with_builtins(cache)
        .create()
        .unwrap();
    eval.set_data(&json!({})).unwrap();

    for _ in 0..3 {
        eval.evaluate_raw(r#"{"same":true}"#, None).unwrap();
    }
    // Memoized results do not outlive an evaluation.
    assert_eq!(counting.calls.load(Ordering::SeqCst), 3);
    assert_eq!(counting.resets.load(Ordering::SeqCst), 3);
}

// ══════════════════════════════════════════════════════════════════════════════
// Base data
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_dump_data() {
    for minor in MINORS {
        let mut eval = evaluator(minor);
        assert_eq!(eval.dump_data().unwrap(), None);
        eval.set_data_from_raw_json(r#"{"a":{"b":123}}"#).unwrap();
        assert_eq!(eval.dump_data().unwrap().as_deref(), Some(r#"{"a":{"b":123}}"#));
        eval.reset().unwrap();
        assert_eq!(eval.dump_data().unwrap(), None);
    }
}

#[test]
fn test_set_data_variants() {
    let mut eval = evaluator(2);

    eval.set_data_from_reader(Cursor::new(br#"{"world":"r"}"#.to_vec())).unwrap();
    assert!(eval.evaluate_predicate(&json!({"message": "r"}), None).unwrap());

    eval.set_data_from_bytes(br#"{"world":"b"}"#).unwrap();
    assert!(eval.evaluate_predicate(&json!({"message": "b"}), None).unwrap());

    let err = eval.set_data_from_raw_json("{not json").unwrap_err();
    assert!(matches!(err, RuntimeError::Json(_)));
    // The previous document survives a rejected replacement.
    assert!(eval.evaluate_predicate(&json!({"message": "b"}), None).unwrap());
}

#[test]
fn test_replacing_data_does_not_grow_the_heap() {
    let mut eval = evaluator(3);
    for i in 0..200 {
        eval.set_data(&json!({"world": i})).unwrap();
        assert!(eval.evaluate_predicate(&json!({"message": i}), None).unwrap());
    }
}

#[test]
fn test_update_data_path_through_the_feature() {
    let mut eval = evaluator(3);
    eval.set_data(&json!({"a": 1})).unwrap();
    let mut feature = eval.update_data_feature().unwrap();
    feature.update_data_path(&json!({"foo": "bar"}), &["a", "x"]).unwrap();
    feature.remove_data_path(&["a", "x"]).unwrap();

    // The fixture's path exports report success without touching the
    // document; the patching itself is covered by the 1.3 adapter tests.
    assert_eq!(eval.dump_data().unwrap().as_deref(), Some(r#"{"a":1}"#));
}

#[test]
fn test_update_failure_code() {
    let module = policy(3).mutation_result(OpaResult::InvalidPath);
    let mut eval = factory_for(&module, EvaluatorOptions::default()).create().unwrap();
    eval.set_data(&json!({"a": 1})).unwrap();

    let mut feature = eval.update_data_feature().unwrap();
    let err = feature.remove_data_path(&["a"]).unwrap_err();
    assert!(matches!(err, RuntimeError::DataMutation(OpaResult::InvalidPath)));
    assert_eq!(err.to_string(), "Failed to update data: InvalidPath");

    assert_eq!(eval.dump_data().unwrap().as_deref(), Some(r#"{"a":1}"#));
}

#[test]
fn test_update_without_data() {
    let mut eval = evaluator(3);
    let mut feature = eval.update_data_feature().unwrap();
    assert!(feature.update_data_path(&1, &["a"]).is_err());
}

// ══════════════════════════════════════════════════════════════════════════════
// Resources
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_memory_limit_is_out_of_memory() {
    let options = EvaluatorOptions {
        max_memory_pages: Some(2),
        ..Default::default()
    };
    let mut eval = factory_for(&policy(2), options).create().unwrap();
    eval.set_data(&json!({})).unwrap();

    let big = json!({"blob": "x".repeat(3 * 65536)}).to_string();
    let err = eval.evaluate_raw(&big, Some("example/echo")).unwrap_err();
    assert!(matches!(err, RuntimeError::OutOfMemory(_)), "{err:?}");

    // Small evaluations still fit.
    assert_eq!(
        eval.evaluate_raw("1", Some("example/echo")).unwrap(),
        r#"[{"result":1}]"#
    );
}

#[test]
fn test_memory_grows_for_large_input() {
    let mut eval = evaluator(3);
    eval.set_data(&json!({})).unwrap();
    let blob = "y".repeat(4 * 65536);
    let out = eval
        .evaluate::<_, Value>(&json!({"blob": blob}), Some("example/echo"))
        .unwrap();
    assert_eq!(out.result["blob"].as_str().map(str::len), Some(4 * 65536));
}

#[test]
fn test_fuel_budget_is_per_operation() {
    let options = EvaluatorOptions {
        fuel_limit: Some(1_000_000),
        ..Default::default()
    };
    let mut eval = factory_for(&policy(2), options).create().unwrap();
    eval.set_data(&json!({"world": "w"})).unwrap();
    for _ in 0..1000 {
        assert!(eval.evaluate_predicate(&json!({"message": "w"}), None).unwrap());
    }
}

#[test]
fn test_fuel_exhaustion_is_an_evaluation_error() {
    let options = EvaluatorOptions {
        fuel_limit: Some(3),
        ..Default::default()
    };
    let err = factory_for(&policy(2), options).create().unwrap_err();
    assert!(matches!(err, RuntimeError::Evaluation(ref message) if message.contains("fuel")), "{err:?}");
}

#[test]
fn test_factory_evaluators_are_independent() {
    let factory = factory_for(&policy(3), EvaluatorOptions::default());
    let mut left = factory.create().unwrap();
    let mut right = factory.create().unwrap();
    left.set_data(&json!({"world": "left"})).unwrap();
    right.set_data(&json!({"world": "right"})).unwrap();

    assert!(left.evaluate_predicate(&json!({"message": "left"}), None).unwrap());
    assert!(!right.evaluate_predicate(&json!({"message": "left"}), None).unwrap());
    assert!(right.evaluate_predicate(&json!({"message": "right"}), None).unwrap());
}

#[test]
fn test_evaluators_move_across_threads() {
    fn assert_send<T: Send>() {}
    assert_send::<Evaluator>();

    let factory = factory_for(&policy(2), EvaluatorOptions::default());
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let mut eval = factory.create().unwrap();
            std::thread::spawn(move || {
                eval.set_data(&json!({"world": i})).unwrap();
                eval.evaluate_predicate(&json!({"message": i}), None).unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap());
    }
}
