//! Creates evaluators that share one compiled module.

use std::fmt;
use std::sync::Arc;

use opawasm_builtins::{CompositeImports, DefaultImports, ImportsCache, OpaImports, Printer};

use crate::error::RuntimeResult;
use crate::evaluator::Evaluator;
use crate::module::PolicyModule;
use crate::options::EvaluatorOptions;

type DefaultsFn = Arc<dyn Fn() -> Box<dyn OpaImports> + Send + Sync>;

/// Holds a compiled [`PolicyModule`], options and built-ins, and creates
/// independent [`Evaluator`]s from them.
///
/// Evaluators share the module and the custom built-in table; each has its
/// own store, memory and default-import state.
#[derive(Clone)]
pub struct EvaluatorFactory {
    module: PolicyModule,
    options: EvaluatorOptions,
    builtins: Arc<ImportsCache>,
    printer: Option<Printer>,
    defaults: DefaultsFn,
}

impl EvaluatorFactory {
    pub fn new(module: PolicyModule, options: EvaluatorOptions) -> Self {
        Self {
            module,
            options,
            builtins: Arc::new(ImportsCache::new()),
            printer: None,
            defaults: Arc::new(|| Box::new(DefaultImports::new()) as Box<dyn OpaImports>),
        }
    }

    /// Compile `bytes` and wrap them in a factory.
    pub fn from_bytes(bytes: &[u8], options: EvaluatorOptions) -> RuntimeResult<Self> {
        Ok(Self::new(PolicyModule::from_bytes(bytes)?, options))
    }

    /// Custom built-ins for every evaluator created from here on.
    pub fn with_builtins(mut self, builtins: ImportsCache) -> Self {
        self.builtins = Arc::new(builtins);
        self
    }

    /// Sink for `print`, `trace` and `opa_println` output.
    pub fn with_printer(mut self, printer: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.printer = Some(Arc::new(printer));
        self
    }

    /// Replace the default built-in library. `make` runs once per evaluator.
    pub fn with_default_imports<F>(mut self, make: F) -> Self
    where
        F: Fn() -> Box<dyn OpaImports> + Send + Sync + 'static,
    {
        self.defaults = Arc::new(make);
        self
    }

    pub fn module(&self) -> &PolicyModule {
        &self.module
    }

    pub fn options(&self) -> &EvaluatorOptions {
        &self.options
    }

    pub fn create(&self) -> RuntimeResult<Evaluator> {
        let mut imports = CompositeImports::new(Arc::clone(&self.builtins), (self.defaults)())
            .strict(self.options.strict_builtin_errors);
        if let Some(printer) = &self.printer {
            imports = imports.with_printer(Arc::clone(printer));
        }
        Evaluator::new(&self.module, &self.options, imports)
    }
}

impl fmt::Debug for EvaluatorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluatorFactory")
            .field("signature", self.module.signature())
            .field("options", &self.options)
            .field("custom_printer", &self.printer.is_some())
            .finish_non_exhaustive()
    }
}
