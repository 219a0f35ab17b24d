//! Typed wrappers over the guest's OPA exports.
//!
//! Export names per revision:
//!
//! | ABI | adds |
//! |-----|------|
//! | 1.0 | allocator, parse/dump, path mutation, heap pointer, eval context, `eval` |
//! | 1.2 | `opa_eval` |
//! | 1.3 | `opa_value_free`, shadow heap stash/restore/clear |

use opawasm_types::{OpaResult, ValueFormat};

use crate::error::{RuntimeError, RuntimeResult};
use crate::guest::Guest;

pub const V1_0_EXPORTS: &[&str] = &[
    "entrypoints",
    "builtins",
    "opa_malloc",
    "opa_free",
    "opa_json_parse",
    "opa_value_parse",
    "opa_json_dump",
    "opa_value_dump",
    "opa_value_add_path",
    "opa_value_remove_path",
    "opa_heap_ptr_get",
    "opa_heap_ptr_set",
    "opa_eval_ctx_new",
    "opa_eval_ctx_set_input",
    "opa_eval_ctx_set_data",
    "opa_eval_ctx_set_entrypoint",
    "opa_eval_ctx_get_result",
    "eval",
];

pub const V1_2_EXPORTS: &[&str] = &["opa_eval"];

pub const V1_3_EXPORTS: &[&str] = &[
    "opa_value_free",
    "opa_heap_blocks_stash",
    "opa_heap_blocks_restore",
    "opa_heap_stash_clear",
];

/// Convert a host length to the guest's `i32`.
pub(crate) fn guest_len(len: usize) -> RuntimeResult<i32> {
    i32::try_from(len)
        .map_err(|_| RuntimeError::OutOfMemory(format!("{len} bytes exceed the guest address space")))
}

/// Typed calls for every OPA export. Implemented for all [`Guest`]s.
pub trait OpaExports: Guest {
    fn malloc(&mut self, size: usize) -> RuntimeResult<i32> {
        let size = guest_len(size)?;
        self.call("opa_malloc", &[size])
    }

    fn free(&mut self, ptr: i32) -> RuntimeResult<()> {
        self.call("opa_free", &[ptr]).map(drop)
    }

    fn json_parse(&mut self, ptr: i32, len: usize) -> RuntimeResult<i32> {
        let len = guest_len(len)?;
        self.call("opa_json_parse", &[ptr, len])
    }

    fn value_parse(&mut self, ptr: i32, len: usize) -> RuntimeResult<i32> {
        let len = guest_len(len)?;
        self.call("opa_value_parse", &[ptr, len])
    }

    fn json_dump(&mut self, value: i32) -> RuntimeResult<i32> {
        self.call("opa_json_dump", &[value])
    }

    fn value_dump(&mut self, value: i32) -> RuntimeResult<i32> {
        self.call("opa_value_dump", &[value])
    }

    fn value_add_path(&mut self, base: i32, path: i32, value: i32) -> RuntimeResult<OpaResult> {
        self.call("opa_value_add_path", &[base, path, value])
            .map(OpaResult::from_code)
    }

    fn value_remove_path(&mut self, base: i32, path: i32) -> RuntimeResult<OpaResult> {
        self.call("opa_value_remove_path", &[base, path])
            .map(OpaResult::from_code)
    }

    fn value_free(&mut self, value: i32) -> RuntimeResult<()> {
        self.call("opa_value_free", &[value]).map(drop)
    }

    fn heap_ptr_get(&mut self) -> RuntimeResult<i32> {
        self.call("opa_heap_ptr_get", &[])
    }

    fn heap_ptr_set(&mut self, ptr: i32) -> RuntimeResult<()> {
        self.call("opa_heap_ptr_set", &[ptr]).map(drop)
    }

    fn eval_ctx_new(&mut self) -> RuntimeResult<i32> {
        self.call("opa_eval_ctx_new", &[])
    }

    fn eval_ctx_set_input(&mut self, ctx: i32, value: i32) -> RuntimeResult<()> {
        self.call("opa_eval_ctx_set_input", &[ctx, value]).map(drop)
    }

    fn eval_ctx_set_data(&mut self, ctx: i32, value: i32) -> RuntimeResult<()> {
        self.call("opa_eval_ctx_set_data", &[ctx, value]).map(drop)
    }

    fn eval_ctx_set_entrypoint(&mut self, ctx: i32, entrypoint: i32) -> RuntimeResult<()> {
        self.call("opa_eval_ctx_set_entrypoint", &[ctx, entrypoint])
            .map(drop)
    }

    fn eval_ctx_get_result(&mut self, ctx: i32) -> RuntimeResult<i32> {
        self.call("opa_eval_ctx_get_result", &[ctx])
    }

    fn eval(&mut self, ctx: i32) -> RuntimeResult<i32> {
        self.call("eval", &[ctx])
    }

    /// Single-call evaluation (ABI 1.2+). Returns a pointer to the dumped
    /// result set.
    fn opa_eval(
        &mut self,
        entrypoint: i32,
        data: i32,
        input: i32,
        input_len: usize,
        heap: i32,
        format: ValueFormat,
    ) -> RuntimeResult<i32> {
        let input_len = guest_len(input_len)?;
        self.call(
            "opa_eval",
            &[0, entrypoint, data, input, input_len, heap, format.as_flag()],
        )
    }

    fn heap_blocks_stash(&mut self) -> RuntimeResult<()> {
        self.call("opa_heap_blocks_stash", &[]).map(drop)
    }

    fn heap_blocks_restore(&mut self) -> RuntimeResult<()> {
        self.call("opa_heap_blocks_restore", &[]).map(drop)
    }

    fn heap_stash_clear(&mut self) -> RuntimeResult<()> {
        self.call("opa_heap_stash_clear", &[]).map(drop)
    }

    /// Value holding the entrypoint name → id object.
    fn entrypoints(&mut self) -> RuntimeResult<i32> {
        self.call("entrypoints", &[])
    }

    /// Value holding the built-in name → id object.
    fn builtins(&mut self) -> RuntimeResult<i32> {
        self.call("builtins", &[])
    }
}

impl<G: Guest + ?Sized> OpaExports for G {}
