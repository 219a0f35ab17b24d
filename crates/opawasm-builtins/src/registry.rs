//! Explicit registration of custom built-ins.
//!
//! Implementations are declared by name and arity through [`Declarations`];
//! the resulting table is built once per [`ImportsCache`] and is read-only
//! from then on.

use std::any::Any;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use opawasm_types::ValueFormat;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::args::BuiltinArgs;
use crate::context::BuiltinContext;
use crate::error::{BuiltinError, BuiltinResult};

/// A callable built-in. `Ok(None)` means the result is undefined.
pub type BuiltinFn = Arc<
    dyn Fn(&BuiltinContext, &mut BuiltinArgs<'_>) -> BuiltinResult<Option<Value>> + Send + Sync,
>;

/// One declared built-in and its call options.
#[derive(Clone)]
pub struct Registration {
    func: BuiltinFn,
    memoize: bool,
    format: ValueFormat,
}

impl Registration {
    fn new(func: BuiltinFn) -> Self {
        Self {
            func,
            memoize: false,
            format: ValueFormat::Json,
        }
    }

    /// Cache results per distinct argument list until the next reset.
    pub fn memoize(&mut self) -> &mut Self {
        self.memoize = true;
        self
    }

    /// Format typed arguments are decoded from. [`ValueFormat::Value`]
    /// keeps sets intact.
    pub fn arg_format(&mut self, format: ValueFormat) -> &mut Self {
        self.format = format;
        self
    }

    pub fn is_memoized(&self) -> bool {
        self.memoize
    }

    pub fn format(&self) -> ValueFormat {
        self.format
    }

    /// Run the implementation. A panic inside it is reported as a
    /// generic built-in failure.
    pub fn invoke(
        &self,
        context: &BuiltinContext,
        args: &mut BuiltinArgs<'_>,
    ) -> BuiltinResult<Option<Value>> {
        args.set_format(self.format);
        contain_panics(|| (self.func)(context, args))
    }
}

/// Run a built-in implementation, turning a panic into a generic failure.
pub(crate) fn contain_panics<F>(call: F) -> BuiltinResult<Option<Value>>
where
    F: FnOnce() -> BuiltinResult<Option<Value>>,
{
    panic::catch_unwind(AssertUnwindSafe(call))
        .unwrap_or_else(|payload| Err(BuiltinError::failed(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "builtin panicked".to_string()
    }
}

fn defined<R: Serialize>(result: R) -> BuiltinResult<Option<Value>> {
    Ok(Some(serde_json::to_value(result)?))
}

/// Collects `name.arity → implementation` pairs.
#[derive(Default)]
pub struct Declarations {
    entries: HashMap<String, Registration>,
}

impl Declarations {
    /// Declare a built-in with direct access to its context and arguments.
    /// A later declaration of the same name and arity replaces the earlier.
    pub fn raw<F>(&mut self, name: &str, arity: usize, func: F) -> &mut Registration
    where
        F: Fn(&BuiltinContext, &mut BuiltinArgs<'_>) -> BuiltinResult<Option<Value>>
            + Send
            + Sync
            + 'static,
    {
        let registration = Registration::new(Arc::new(func));
        match self.entries.entry(format!("{name}.{arity}")) {
            Entry::Occupied(mut slot) => {
                slot.insert(registration);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(registration),
        }
    }

    pub fn func0<R, F>(&mut self, name: &str, func: F) -> &mut Registration
    where
        R: Serialize,
        F: Fn() -> BuiltinResult<R> + Send + Sync + 'static,
    {
        self.raw(name, 0, move |_, _| defined(func()?))
    }

    pub fn func1<A, R, F>(&mut self, name: &str, func: F) -> &mut Registration
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(A) -> BuiltinResult<R> + Send + Sync + 'static,
    {
        self.raw(name, 1, move |_, args| defined(func(args.get(0)?)?))
    }

    pub fn func2<A, B, R, F>(&mut self, name: &str, func: F) -> &mut Registration
    where
        A: DeserializeOwned,
        B: DeserializeOwned,
        R: Serialize,
        F: Fn(A, B) -> BuiltinResult<R> + Send + Sync + 'static,
    {
        self.raw(name, 2, move |_, args| {
            defined(func(args.get(0)?, args.get(1)?)?)
        })
    }

    pub fn func3<A, B, C, R, F>(&mut self, name: &str, func: F) -> &mut Registration
    where
        A: DeserializeOwned,
        B: DeserializeOwned,
        C: DeserializeOwned,
        R: Serialize,
        F: Fn(A, B, C) -> BuiltinResult<R> + Send + Sync + 'static,
    {
        self.raw(name, 3, move |_, args| {
            defined(func(args.get(0)?, args.get(1)?, args.get(2)?)?)
        })
    }

    pub fn func4<A, B, C, D, R, F>(&mut self, name: &str, func: F) -> &mut Registration
    where
        A: DeserializeOwned,
        B: DeserializeOwned,
        C: DeserializeOwned,
        D: DeserializeOwned,
        R: Serialize,
        F: Fn(A, B, C, D) -> BuiltinResult<R> + Send + Sync + 'static,
    {
        self.raw(name, 4, move |_, args| {
            defined(func(
                args.get(0)?,
                args.get(1)?,
                args.get(2)?,
                args.get(3)?,
            )?)
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A provider of custom built-ins.
///
/// `declare` receives the provider behind an `Arc` so registered closures
/// can hold on to it and reach its state.
pub trait CustomBuiltins: Send + Sync {
    fn declare(self: Arc<Self>, declarations: &mut Declarations);

    /// Drop any per-evaluation state.
    fn reset(&self) {}
}

/// Registered providers plus the dispatch table built from them.
///
/// The table is populated on the first lookup and never rebuilt; providers
/// registered after that point still receive resets but contribute no
/// built-ins.
#[derive(Default)]
pub struct ImportsCache {
    providers: Vec<Arc<dyn CustomBuiltins>>,
    table: OnceLock<HashMap<String, Registration>>,
}

impl ImportsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn CustomBuiltins>) -> &mut Self {
        self.providers.push(provider);
        self
    }

    /// Builder form of [`ImportsCache::register`].
    pub fn with(mut self, provider: impl CustomBuiltins + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Look up `name.arity`.
    pub fn resolve(&self, key: &str) -> Option<&Registration> {
        self.table().get(key)
    }

    pub fn is_populated(&self) -> bool {
        self.table.get().is_some()
    }

    /// Number of dispatchable built-ins.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    pub fn reset_providers(&self) {
        for provider in &self.providers {
            provider.reset();
        }
    }

    fn table(&self) -> &HashMap<String, Registration> {
        self.table.get_or_init(|| {
            let mut declarations = Declarations::default();
            for provider in &self.providers {
                Arc::clone(provider).declare(&mut declarations);
            }
            tracing::debug!(
                providers = self.providers.len(),
                builtins = declarations.len(),
                "custom builtin table populated"
            );
            declarations.entries
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::testing::TableSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Arith;

    impl CustomBuiltins for Arith {
        fn declare(self: Arc<Self>, d: &mut Declarations) {
            d.func2("plus", |a: i64, b: i64| Ok(a + b));
            d.func0("zero", || Ok(0));
        }
    }

    struct Late;

    impl CustomBuiltins for Late {
        fn declare(self: Arc<Self>, d: &mut Declarations) {
            d.func0("late", || Ok(true));
        }
    }

    #[derive(Default)]
    struct Counter {
        resets: AtomicUsize,
    }

    impl CustomBuiltins for Counter {
        fn declare(self: Arc<Self>, d: &mut Declarations) {
            let this = Arc::clone(&self);
            d.func0("resets", move || Ok(this.resets.load(Ordering::SeqCst)));
        }

        fn reset(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn context(name: &str) -> BuiltinContext {
        BuiltinContext {
            function_name: name.into(),
            opa_context: 0,
            strict: false,
        }
    }

    #[test]
    fn typed_registration_decodes_and_encodes() {
        let cache = ImportsCache::new().with(Arith);
        let reg = cache.resolve("plus.2").unwrap();
        let mut source = TableSource::new(&[(1, "40"), (2, "2")]);
        let mut args = BuiltinArgs::new(&mut source, &[1, 2]);
        let out = reg.invoke(&context("plus"), &mut args).unwrap();
        assert_eq!(out, Some(Value::from(42)));
    }

    #[test]
    fn lookup_is_by_name_and_arity() {
        let cache = ImportsCache::new().with(Arith);
        assert!(cache.resolve("zero.0").is_some());
        assert!(cache.resolve("zero.1").is_none());
        assert!(cache.resolve("plus.1").is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn table_is_not_rebuilt_after_first_use() {
        let mut cache = ImportsCache::new().with(Arith);
        assert!(!cache.is_populated());
        assert!(cache.resolve("plus.2").is_some());
        assert!(cache.is_populated());

        cache.register(Arc::new(Late));
        assert!(cache.resolve("late.0").is_none());
    }

    #[test]
    fn providers_are_reset_even_when_registered_late() {
        let counter = Arc::new(Counter::default());
        let mut cache = ImportsCache::new();
        cache.resolve("anything.0");
        cache.register(counter.clone());
        cache.reset_providers();
        assert_eq!(counter.resets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panics_become_builtin_failures() {
        let mut d = Declarations::default();
        let reg = d.raw("boom", 0, |_, _| panic!("kaboom")).clone();
        let mut source = TableSource::default();
        let mut args = BuiltinArgs::new(&mut source, &[]);
        let err = reg.invoke(&context("boom"), &mut args).unwrap_err();
        assert_eq!(err, BuiltinError::failed("kaboom"));
    }
}
