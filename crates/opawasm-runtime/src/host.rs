//! Host imports handed to the guest.
//!
//! ## Imports
//! - `env.memory` (created by the host)
//! - `env.opa_abort(msg_ptr)`: fatal, ends the evaluation
//! - `env.opa_println(msg_ptr)`
//! - `env.opa_builtin0..4(id, ctx, args…) → value_ptr`
//!
//! Callbacks cannot return a [`RuntimeError`] through the engine, so the
//! classified error is parked in [`HostState::pending`] and the callback
//! traps; the caller of the guest export picks it back up.

use std::collections::HashMap;

use opawasm_builtins::{ArgSource, BuiltinArgs, BuiltinError, BuiltinResult, CompositeImports};
use opawasm_types::ValueFormat;
use serde_json::Value;
use wasmi::{AsContextMut, Caller, Extern, Func, Linker, Memory, Val};

use crate::error::{RuntimeError, RuntimeResult};
use crate::guest::Guest;
use crate::memory;

/// Per-instance state held by the store.
pub(crate) struct HostState {
    /// Taken out for the duration of a built-in call.
    pub imports: Option<CompositeImports>,
    pub builtins: HashMap<i32, String>,
    pub memory: Option<Memory>,
    pub pending: Option<RuntimeError>,
}

impl HostState {
    pub fn new(imports: CompositeImports) -> Self {
        Self {
            imports: Some(imports),
            builtins: HashMap::new(),
            memory: None,
            pending: None,
        }
    }
}

/// Call `func` with `i32` arguments; a function without results yields 0.
pub(crate) fn invoke(func: Func, mut ctx: impl AsContextMut, args: &[i32]) -> Result<i32, wasmi::Error> {
    let params: Vec<Val> = args.iter().map(|&arg| Val::I32(arg)).collect();
    let mut results = vec![Val::I32(0); func.ty(&ctx).results().len()];
    func.call(&mut ctx, &params, &mut results)?;
    Ok(results.first().and_then(Val::i32).unwrap_or(0))
}

pub(crate) fn grow(memory: Memory, ctx: impl AsContextMut, pages: u64) -> RuntimeResult<()> {
    let additional = pages
        .try_into()
        .map_err(|_| RuntimeError::OutOfMemory(format!("cannot grow by {pages} pages")))?;
    memory
        .grow(ctx, additional)
        .map(drop)
        .map_err(|e| RuntimeError::OutOfMemory(format!("failed to grow memory by {pages} pages: {e}")))
}

pub(crate) fn define_imports(linker: &mut Linker<HostState>, memory: Memory) -> RuntimeResult<()> {
    linker.define("env", "memory", memory).map_err(link_error)?;
    linker
        .func_wrap(
            "env",
            "opa_abort",
            |mut caller: Caller<'_, HostState>, ptr: i32| -> Result<(), wasmi::Error> {
                let message = match CallerGuest::new(&mut caller) {
                    Ok(guest) => memory::read_cstr(&guest, ptr).unwrap_or_else(|e| e.to_string()),
                    Err(e) => e.to_string(),
                };
                Err(park(&mut caller, RuntimeError::Aborted(message)))
            },
        )
        .map_err(link_error)?;
    linker
        .func_wrap(
            "env",
            "opa_println",
            |mut caller: Caller<'_, HostState>, ptr: i32| -> Result<(), wasmi::Error> {
                let message = CallerGuest::new(&mut caller).and_then(|guest| memory::read_cstr(&guest, ptr));
                match message {
                    Ok(message) => {
                        if let Some(imports) = caller.data_mut().imports.as_mut() {
                            imports.print(&message);
                        }
                        Ok(())
                    }
                    Err(e) => Err(park(&mut caller, e)),
                }
            },
        )
        .map_err(link_error)?;
    linker
        .func_wrap(
            "env",
            "opa_builtin0",
            |mut caller: Caller<'_, HostState>, id: i32, ctx: i32| -> Result<i32, wasmi::Error> {
                dispatch(&mut caller, id, ctx, &[])
            },
        )
        .map_err(link_error)?;
    linker
        .func_wrap(
            "env",
            "opa_builtin1",
            |mut caller: Caller<'_, HostState>, id: i32, ctx: i32, a: i32| -> Result<i32, wasmi::Error> {
                dispatch(&mut caller, id, ctx, &[a])
            },
        )
        .map_err(link_error)?;
    linker
        .func_wrap(
            "env",
            "opa_builtin2",
            |mut caller: Caller<'_, HostState>, id: i32, ctx: i32, a: i32, b: i32| -> Result<i32, wasmi::Error> {
                dispatch(&mut caller, id, ctx, &[a, b])
            },
        )
        .map_err(link_error)?;
    linker
        .func_wrap(
            "env",
            "opa_builtin3",
            |mut caller: Caller<'_, HostState>,
             id: i32,
             ctx: i32,
             a: i32,
             b: i32,
             c: i32|
             -> Result<i32, wasmi::Error> { dispatch(&mut caller, id, ctx, &[a, b, c]) },
        )
        .map_err(link_error)?;
    linker
        .func_wrap(
            "env",
            "opa_builtin4",
            |mut caller: Caller<'_, HostState>,
             id: i32,
             ctx: i32,
             a: i32,
             b: i32,
             c: i32,
             d: i32|
             -> Result<i32, wasmi::Error> { dispatch(&mut caller, id, ctx, &[a, b, c, d]) },
        )
        .map_err(link_error)?;
    Ok(())
}

fn link_error(err: impl std::fmt::Display) -> RuntimeError {
    RuntimeError::Module(format!("failed to link host imports: {err}"))
}

/// Record `err` for the export caller and turn it into an engine trap.
/// The first error of a call wins.
fn park(caller: &mut Caller<'_, HostState>, err: RuntimeError) -> wasmi::Error {
    let trap = wasmi::Error::new(err.to_string());
    let state = caller.data_mut();
    if state.pending.is_none() {
        state.pending = Some(err);
    }
    trap
}

fn dispatch(caller: &mut Caller<'_, HostState>, id: i32, ctx: i32, ptrs: &[i32]) -> Result<i32, wasmi::Error> {
    call_builtin(caller, id, ctx, ptrs).map_err(|err| park(caller, err))
}

fn call_builtin(caller: &mut Caller<'_, HostState>, id: i32, ctx: i32, ptrs: &[i32]) -> RuntimeResult<i32> {
    let name = caller
        .data()
        .builtins
        .get(&id)
        .cloned()
        .ok_or_else(|| RuntimeError::Evaluation(format!("Failed to resolve builtin with ID {id}")))?;
    let mut imports = caller
        .data_mut()
        .imports
        .take()
        .ok_or_else(|| RuntimeError::Evaluation(format!("builtin '{name}' called re-entrantly")))?;

    let outcome = CallerGuest::new(caller).and_then(|mut guest| {
        let result = {
            let mut source = GuestArgs(&mut guest);
            let mut args = BuiltinArgs::new(&mut source, ptrs);
            imports.call(&name, ctx, &mut args)
        };
        write_value(&mut guest, result?)
    });

    caller.data_mut().imports = Some(imports);
    outcome
}

/// Hand a built-in result back to the guest. Undefined is the null pointer.
fn write_value<G: Guest + ?Sized>(guest: &mut G, value: Option<Value>) -> RuntimeResult<i32> {
    let Some(value) = value else {
        return Ok(0);
    };
    let json = serde_json::to_string(&value)?;
    let native = opawasm_codec::to_native(&json)?;
    memory::parse_value(guest, native.as_bytes())
}

/// Reads built-in arguments through the guest's dump exports.
pub(crate) struct GuestArgs<'g, G: ?Sized>(pub &'g mut G);

impl<G: Guest + ?Sized> ArgSource for GuestArgs<'_, G> {
    fn read_arg(&mut self, ptr: i32, format: ValueFormat) -> BuiltinResult<String> {
        let text = match format {
            ValueFormat::Json => memory::dump_json(&mut *self.0, ptr),
            ValueFormat::Value => memory::dump_value(&mut *self.0, ptr)
                .and_then(|native| Ok(opawasm_codec::to_json(&native)?)),
        };
        text.map_err(|e| BuiltinError::failed(e.to_string()))
    }
}

/// A [`Guest`] view from inside a host callback.
pub(crate) struct CallerGuest<'a, 'c> {
    caller: &'a mut Caller<'c, HostState>,
    memory: Memory,
}

impl<'a, 'c> CallerGuest<'a, 'c> {
    pub fn new(caller: &'a mut Caller<'c, HostState>) -> RuntimeResult<Self> {
        let memory = caller
            .data()
            .memory
            .ok_or_else(|| RuntimeError::Evaluation("guest memory is not linked".into()))?;
        Ok(Self { caller, memory })
    }
}

impl Guest for CallerGuest<'_, '_> {
    fn call(&mut self, name: &'static str, args: &[i32]) -> RuntimeResult<i32> {
        let func = self
            .caller
            .get_export(name)
            .and_then(Extern::into_func)
            .ok_or_else(|| RuntimeError::Evaluation(format!("guest export {name} is not available")))?;
        invoke(func, &mut *self.caller, args).map_err(|e| RuntimeError::Evaluation(e.to_string()))
    }

    fn memory(&self) -> &[u8] {
        self.memory.data(&*self.caller)
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        self.memory.data_mut(&mut *self.caller)
    }

    fn grow(&mut self, pages: u64) -> RuntimeResult<()> {
        grow(self.memory, &mut *self.caller, pages)
    }
}
