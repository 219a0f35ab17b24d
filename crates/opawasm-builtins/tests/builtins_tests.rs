//! Dispatch bridge tests through the public API.
//!
//! Tests validate:
//! - Resolution order: custom, intrinsics, defaults
//! - Replacing the default library through the `OpaImports` seam
//! - Set-preserving argument decoding
//! - Context and raw argument access in raw registrations

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use opawasm_builtins::{
    ArgSource, BuiltinArgs, BuiltinContext, BuiltinError, BuiltinResult, CompositeImports,
    CustomBuiltins, Declarations, DefaultImports, ImportsCache, OpaImports,
};
use opawasm_types::{RegoSet, ValueFormat};
use serde_json::{json, Value};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

/// Guest memory stand-in: pointer → (json dump, value dump).
#[derive(Default)]
struct Heap {
    values: HashMap<i32, (String, String)>,
    dumps: usize,
}

impl Heap {
    fn with(mut self, ptr: i32, json: &str) -> Self {
        self.values.insert(ptr, (json.to_string(), json.to_string()));
        self
    }

    fn with_set(mut self, ptr: i32, items: &str) -> Self {
        self.values.insert(
            ptr,
            (format!("[{items}]"), format!(r#"[{{"__rego_set":[{items}]}}]"#)),
        );
        self
    }
}

impl ArgSource for Heap {
    fn read_arg(&mut self, ptr: i32, format: ValueFormat) -> BuiltinResult<String> {
        self.dumps += 1;
        let (json, value) = self
            .values
            .get(&ptr)
            .ok_or_else(|| BuiltinError::failed(format!("bad pointer {ptr}")))?;
        Ok(match format {
            ValueFormat::Json => json.clone(),
            ValueFormat::Value => value.clone(),
        })
    }
}

fn call(
    imports: &mut CompositeImports,
    name: &str,
    heap: &mut Heap,
    ptrs: &[i32],
) -> BuiltinResult<Option<Value>> {
    let mut args = BuiltinArgs::new(heap, ptrs);
    imports.call(name, 7, &mut args)
}

struct Policies;

impl CustomBuiltins for Policies {
    fn declare(self: Arc<Self>, d: &mut Declarations) {
        d.func1("set.size", |set: RegoSet<Value>| Ok(set.into_vec().len()))
            .arg_format(ValueFormat::Value);
        d.func1("list.size", |list: Vec<Value>| Ok(list.len()));
        d.raw("context.echo", 1, |ctx: &BuiltinContext, args: &mut BuiltinArgs<'_>| {
            let raw = args.raw(0, ValueFormat::Json)?.to_string();
            Ok(Some(json!({
                "name": ctx.function_name,
                "context": ctx.opa_context,
                "strict": ctx.strict,
                "raw": raw,
            })))
        });
        d.raw("always.undefined", 0, |_, _| Ok(None));
        d.raw("ignores.args", 2, |_, _| Ok(Some(json!("ok"))));
        d.func1("panics", |_: Value| -> BuiltinResult<bool> { panic!("kaboom") });
        d.func1("hex.encode", |_: String| Ok("custom"));
    }
}

/// A replacement default library that only knows `answer/0`.
#[derive(Default)]
struct Minimal {
    printed: Arc<Mutex<Vec<String>>>,
    resets: Arc<AtomicUsize>,
}

impl OpaImports for Minimal {
    fn call(&mut self, context: &BuiltinContext, args: &mut BuiltinArgs<'_>) -> BuiltinResult<Option<Value>> {
        match (context.function_name.as_str(), args.len()) {
            ("answer", 0) => Ok(Some(json!(42))),
            (name, arity) => Err(BuiltinError::NotImplemented {
                name: format!("{name}.{arity}"),
            }),
        }
    }

    fn print(&mut self, message: &str) {
        if let Ok(mut printed) = self.printed.lock() {
            printed.push(message.to_string());
        }
    }

    fn reset(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

fn bridge() -> CompositeImports {
    CompositeImports::with_defaults(Arc::new(ImportsCache::new().with(Policies)))
}

// ══════════════════════════════════════════════════════════════════════════════
// Resolution
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_custom_shadows_default() {
    let mut imports = bridge();
    let mut heap = Heap::default().with(1, "\"ab\"");
    assert_eq!(call(&mut imports, "hex.encode", &mut heap, &[1]).unwrap(), Some(json!("custom")));
    assert!(DefaultImports::supports("hex.encode", 1));
}

#[test]
fn test_defaults_fill_the_gaps() {
    let mut imports = bridge();
    let mut heap = Heap::default()
        .with(1, r#""2KiB""#)
        .with(2, r#"{"a":1,"b":{"c":2}}"#)
        .with(3, r#"{"b":{"c":2}}"#);

    assert_eq!(
        call(&mut imports, "units.parse_bytes", &mut heap, &[1]).unwrap(),
        Some(json!(2048))
    );
    assert_eq!(
        call(&mut imports, "object.subset", &mut heap, &[2, 3]).unwrap(),
        Some(json!(true))
    );
}

#[test]
fn test_arity_is_part_of_the_key() {
    let mut imports = bridge();
    let mut heap = Heap::default().with(1, "1").with(2, "2");
    let err = call(&mut imports, "list.size", &mut heap, &[1, 2]).unwrap_err();
    assert!(err.is_not_implemented());
    assert_eq!(err.to_string(), "builtin 'list.size.2' is not implemented");
}

#[test]
fn test_replacement_default_library() {
    let minimal = Minimal::default();
    let printed = Arc::clone(&minimal.printed);
    let resets = Arc::clone(&minimal.resets);
    let mut imports = CompositeImports::new(Arc::new(ImportsCache::new()), Box::new(minimal));
    let mut heap = Heap::default().with(1, "\"traced\"");

    assert_eq!(call(&mut imports, "answer", &mut heap, &[]).unwrap(), Some(json!(42)));
    assert!(call(&mut imports, "hex.encode", &mut heap, &[1]).unwrap_err().is_not_implemented());

    call(&mut imports, "trace", &mut heap, &[1]).unwrap();
    assert_eq!(*printed.lock().unwrap(), vec!["traced".to_string()]);

    imports.reset();
    imports.reset();
    assert_eq!(resets.load(Ordering::SeqCst), 2);
}

// ══════════════════════════════════════════════════════════════════════════════
// Arguments and results
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_sets_survive_value_format() {
    let mut imports = bridge();
    let mut heap = Heap::default().with_set(1, "1,2,3");

    assert_eq!(call(&mut imports, "set.size", &mut heap, &[1]).unwrap(), Some(json!(3)));
    // The JSON dump flattens the same set into an array.
    assert_eq!(call(&mut imports, "list.size", &mut heap, &[1]).unwrap(), Some(json!(3)));
}

#[test]
fn test_raw_registration_sees_context() {
    let mut imports = bridge().strict(true);
    let mut heap = Heap::default().with(1, r#"{"k":"v"}"#);
    let out = call(&mut imports, "context.echo", &mut heap, &[1]).unwrap();
    assert_eq!(
        out,
        Some(json!({
            "name": "context.echo",
            "context": 7,
            "strict": true,
            "raw": r#"{"k":"v"}"#,
        }))
    );
}

#[test]
fn test_undefined_result() {
    let mut imports = bridge();
    let mut heap = Heap::default();
    assert_eq!(call(&mut imports, "always.undefined", &mut heap, &[]).unwrap(), None);
}

#[test]
fn test_unused_arguments_are_never_dumped() {
    let mut imports = bridge();
    let mut heap = Heap::default().with(1, "1").with(2, "2");
    let out = call(&mut imports, "ignores.args", &mut heap, &[1, 2]).unwrap();
    assert_eq!(out, Some(json!("ok")));
    assert_eq!(heap.dumps, 0);
}

#[test]
fn test_panic_is_a_builtin_failure() {
    let mut heap = Heap::default().with(1, "null");

    let mut lenient = bridge();
    assert_eq!(call(&mut lenient, "panics", &mut heap, &[1]).unwrap(), None);

    let mut strict = bridge().strict(true);
    let err = call(&mut strict, "panics", &mut heap, &[1]).unwrap_err();
    assert!(err.to_string().contains("kaboom"));
}

#[test]
fn test_bad_argument_is_lenient_undefined() {
    let mut imports = bridge();
    let mut heap = Heap::default().with(1, "\"not a list\"");
    assert_eq!(call(&mut imports, "list.size", &mut heap, &[1]).unwrap(), None);

    let mut strict = bridge().strict(true);
    let err = call(&mut strict, "list.size", &mut heap, &[1]).unwrap_err();
    assert_eq!(err.code(), "eval_builtin_error");
}

/// A default library whose every call panics.
struct Exploding;

impl OpaImports for Exploding {
    fn call(&mut self, _: &BuiltinContext, _: &mut BuiltinArgs<'_>) -> BuiltinResult<Option<Value>> {
        panic!("default library blew up")
    }

    fn print(&mut self, _: &str) {}

    fn reset(&mut self) {}
}

#[test]
fn test_panicking_default_library_is_contained() {
    let mut heap = Heap::default().with(1, "1");

    let mut lenient = CompositeImports::new(Arc::new(ImportsCache::new()), Box::new(Exploding));
    assert_eq!(call(&mut lenient, "anything", &mut heap, &[1]).unwrap(), None);

    let mut strict =
        CompositeImports::new(Arc::new(ImportsCache::new()), Box::new(Exploding)).strict(true);
    let err = call(&mut strict, "anything", &mut heap, &[1]).unwrap_err();
    assert_eq!(err.code(), "eval_builtin_error");
    assert!(err.to_string().contains("default library blew up"));
}

#[test]
fn test_range_step_near_integer_bounds() {
    let max = i64::MAX.to_string();
    let mut heap = Heap::default().with(1, "0").with(2, &max).with(3, &max);
    let mut imports = bridge().strict(true);
    assert_eq!(
        call(&mut imports, "numbers.range_step", &mut heap, &[1, 2, 3]).unwrap(),
        Some(json!([0, i64::MAX]))
    );
}
