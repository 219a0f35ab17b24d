//! Index tables and static data layout of the synthetic module.
//!
//! Order of every table must match emission order in `builder.rs`.

// ── Type indices ─────────────────────────────────────────────────────────────

/// `(i32) -> ()`
pub const TY_I32_VOID: u32 = 0;
/// `(i32, i32, i32, i32) -> i32`
pub const TY_I32X4_I32: u32 = 1;
/// `(i32) -> i32`
pub const TY_I32_I32: u32 = 2;
/// `(i32, i32) -> i32`
pub const TY_I32X2_I32: u32 = 3;
/// `() -> i32`
pub const TY_VOID_I32: u32 = 4;
/// `(i32, i32) -> ()`
pub const TY_I32X2_VOID: u32 = 5;
/// `(i32 × 7) -> i32`
pub const TY_I32X7_I32: u32 = 6;
/// `(i32, i32, i32) -> i32`
pub const TY_I32X3_I32: u32 = 7;
/// `() -> ()`
pub const TY_VOID_VOID: u32 = 8;

// ── Imported functions ───────────────────────────────────────────────────────

pub const IMPORT_ABORT: u32 = 0;
pub const IMPORT_BUILTIN2: u32 = 1;
pub const IMPORT_COUNT: u32 = 2;

// ── Defined functions (absolute indices) ─────────────────────────────────────

pub const F_MALLOC: u32 = IMPORT_COUNT;
pub const F_FREE: u32 = IMPORT_COUNT + 1;
pub const F_PARSE: u32 = IMPORT_COUNT + 2;
pub const F_DUMP: u32 = IMPORT_COUNT + 3;
pub const F_HEAP_GET: u32 = IMPORT_COUNT + 4;
pub const F_HEAP_SET: u32 = IMPORT_COUNT + 5;
pub const F_ENTRYPOINTS: u32 = IMPORT_COUNT + 6;
pub const F_BUILTINS: u32 = IMPORT_COUNT + 7;
pub const F_CTX_NEW: u32 = IMPORT_COUNT + 8;
pub const F_CTX_SET_INPUT: u32 = IMPORT_COUNT + 9;
pub const F_CTX_SET_DATA: u32 = IMPORT_COUNT + 10;
pub const F_CTX_SET_ENTRYPOINT: u32 = IMPORT_COUNT + 11;
pub const F_CTX_EVAL: u32 = IMPORT_COUNT + 12;
pub const F_CTX_GET_RESULT: u32 = IMPORT_COUNT + 13;
pub const F_RUN: u32 = IMPORT_COUNT + 14;
pub const F_OPA_EVAL: u32 = IMPORT_COUNT + 15;
pub const F_ADD_PATH: u32 = IMPORT_COUNT + 16;
pub const F_REMOVE_PATH: u32 = IMPORT_COUNT + 17;
pub const F_NOOP: u32 = IMPORT_COUNT + 18;

/// Type of each defined function, in index order.
pub const FUNC_TYPES: [u32; 19] = [
    TY_I32_I32,    // malloc(size)
    TY_I32_VOID,   // free(ptr)
    TY_I32X2_I32,  // parse(ptr, len)
    TY_I32_I32,    // dump(value)
    TY_VOID_I32,   // heap_ptr_get()
    TY_I32_VOID,   // heap_ptr_set(ptr)
    TY_VOID_I32,   // entrypoints()
    TY_VOID_I32,   // builtins()
    TY_VOID_I32,   // eval_ctx_new()
    TY_I32X2_VOID, // eval_ctx_set_input(ctx, v)
    TY_I32X2_VOID, // eval_ctx_set_data(ctx, v)
    TY_I32X2_VOID, // eval_ctx_set_entrypoint(ctx, id)
    TY_I32_I32,    // eval(ctx)
    TY_I32_I32,    // eval_ctx_get_result(ctx)
    TY_I32X3_I32,  // run(entrypoint, input, data)
    TY_I32X7_I32,  // opa_eval(...)
    TY_I32X3_I32,  // value_add_path(base, path, value)
    TY_I32X2_I32,  // value_remove_path(base, path)
    TY_VOID_VOID,  // stash / restore / clear
];

// ── Globals ──────────────────────────────────────────────────────────────────

pub const G_HEAP_PTR: u32 = 0;
pub const G_ABI_MAJOR: u32 = 1;
pub const G_ABI_MINOR: u32 = 2;

// ── Evaluation context (ABI 1.0) ─────────────────────────────────────────────
//
// offset+0  : i32 input value
// offset+4  : i32 data value
// offset+8  : i32 entrypoint id
// offset+12 : i32 result value

pub const CTX_SIZE: i32 = 16;
pub const CTX_INPUT: u64 = 0;
pub const CTX_DATA: u64 = 4;
pub const CTX_ENTRYPOINT: u64 = 8;
pub const CTX_RESULT: u64 = 12;

// ── Static data ──────────────────────────────────────────────────────────────

/// First byte of the data segment; address 0 stays reserved as "undefined".
pub const DATA_START: u32 = 16;
pub const PAGE_SIZE: u32 = 65536;

pub fn memarg(offset: u64, align: u32) -> wasm_encoder::MemArg {
    wasm_encoder::MemArg {
        offset,
        align,
        memory_index: 0,
    }
}

/// Interns NUL-terminated strings into one data segment.
#[derive(Debug, Default)]
pub struct StaticData {
    bytes: Vec<u8>,
}

impl StaticData {
    /// Append `text` plus a terminator and return its address.
    pub fn intern(&mut self, text: &str) -> u32 {
        let addr = DATA_START + self.bytes.len() as u32;
        self.bytes.extend_from_slice(text.as_bytes());
        self.bytes.push(0);
        addr
    }

    /// First address past the data, rounded up to 16.
    pub fn end(&self) -> u32 {
        (DATA_START + self.bytes.len() as u32 + 15) & !15
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}
