//! The dispatch bridge: custom built-ins, intrinsics, then defaults.

use std::collections::HashMap;
use std::sync::Arc;

use opawasm_types::ValueFormat;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::args::BuiltinArgs;
use crate::context::BuiltinContext;
use crate::defaults::DefaultImports;
use crate::error::BuiltinResult;
use crate::imports::{OpaImports, Printer};
use crate::registry::{contain_panics, ImportsCache};

/// Resolves and runs guest built-in calls for one evaluator.
pub struct CompositeImports {
    custom: Arc<ImportsCache>,
    defaults: Box<dyn OpaImports>,
    printer: Option<Printer>,
    memo: HashMap<[u8; 32], Option<Value>>,
    strict: bool,
}

impl CompositeImports {
    pub fn new(custom: Arc<ImportsCache>, defaults: Box<dyn OpaImports>) -> Self {
        Self {
            custom,
            defaults,
            printer: None,
            memo: HashMap::new(),
            strict: false,
        }
    }

    /// Custom built-ins over the stock default library.
    pub fn with_defaults(custom: Arc<ImportsCache>) -> Self {
        Self::new(custom, Box::new(DefaultImports::new()))
    }

    pub fn with_printer(mut self, printer: Printer) -> Self {
        self.printer = Some(printer);
        self
    }

    /// Propagate built-in failures instead of treating them as undefined.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Number of memoized results held for the current epoch.
    pub fn memoized(&self) -> usize {
        self.memo.len()
    }

    /// Run built-in `name` with the arguments in `args`.
    ///
    /// `Ok(None)` is an undefined result. In lenient mode a failed call is
    /// also `Ok(None)`; a call nobody implements is always an error.
    pub fn call(
        &mut self,
        name: &str,
        opa_context: i32,
        args: &mut BuiltinArgs<'_>,
    ) -> BuiltinResult<Option<Value>> {
        let context = BuiltinContext {
            function_name: name.to_string(),
            opa_context,
            strict: self.strict,
        };
        match self.dispatch(&context, args) {
            Ok(value) => Ok(value),
            Err(err) if self.strict || err.is_not_implemented() => Err(err),
            Err(err) => {
                tracing::warn!(
                    builtin = name,
                    arity = args.len(),
                    error = %err,
                    "builtin failed, result is undefined"
                );
                Ok(None)
            }
        }
    }

    /// Route text to the custom printer, or the default imports.
    pub fn print(&mut self, message: &str) {
        match &self.printer {
            Some(printer) => printer(message),
            None => self.defaults.print(message),
        }
    }

    /// End of an evaluation epoch: forget memoized results and let every
    /// implementation drop its state.
    pub fn reset(&mut self) {
        self.memo.clear();
        self.custom.reset_providers();
        self.defaults.reset();
    }

    fn dispatch(
        &mut self,
        context: &BuiltinContext,
        args: &mut BuiltinArgs<'_>,
    ) -> BuiltinResult<Option<Value>> {
        let key = format!("{}.{}", context.function_name, args.len());
        let custom = Arc::clone(&self.custom);

        if let Some(registration) = custom.resolve(&key) {
            if !registration.is_memoized() {
                return registration.invoke(context, args);
            }
            let hash = call_hash(&key, args)?;
            if let Some(hit) = self.memo.get(&hash) {
                return Ok(hit.clone());
            }
            let result = registration.invoke(context, args)?;
            self.memo.insert(hash, result.clone());
            return Ok(result);
        }

        match key.as_str() {
            "internal.print.1" => self.print_operands(args),
            "trace.1" => {
                let message: String = args.json(0)?;
                self.print(&message);
                Ok(Some(Value::Bool(true)))
            }
            _ => {
                let defaults = &mut self.defaults;
                contain_panics(|| defaults.call(context, args))
            }
        }
    }

    /// `internal.print` receives one array per operand holding every value
    /// the operand took; undefined operands arrive empty.
    fn print_operands(&mut self, args: &mut BuiltinArgs<'_>) -> BuiltinResult<Option<Value>> {
        let operands: Vec<Value> = args.json(0)?;
        let mut parts = Vec::with_capacity(operands.len());
        for operand in operands {
            match operand {
                Value::Array(mut values) => match values.len() {
                    0 => continue,
                    1 => parts.push(display(&values.remove(0))),
                    _ => parts.push(Value::Array(values).to_string()),
                },
                other => parts.push(display(&other)),
            }
        }
        self.print(&parts.join(" "));
        Ok(Some(Value::Null))
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Content hash of a call: its `name.arity` key and every argument's
/// native dump.
fn call_hash(key: &str, args: &mut BuiltinArgs<'_>) -> BuiltinResult<[u8; 32]> {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    for index in 0..args.len() {
        hasher.update([0u8]);
        hasher.update(args.raw(index, ValueFormat::Value)?.as_bytes());
    }
    Ok(hasher.finalize().into())
}
