//! Module assembly.

use opawasm_types::{AbiVersion, OpaResult};
use wasm_encoder::{
    BlockType, CodeSection, ConstExpr, DataSection, EntityType, ExportKind, ExportSection,
    Function, FunctionSection, GlobalSection, GlobalType, ImportSection, Instruction,
    MemoryType, Module, TypeSection, ValType,
};

use crate::error::{GuestError, GuestResult};
use crate::layout::*;

/// Describes a synthetic policy module.
#[derive(Debug, Clone)]
pub struct GuestModule {
    minor: u32,
    entrypoints: Vec<String>,
    abort: Option<(usize, String)>,
    mutation_result: OpaResult,
    omitted: Vec<String>,
    min_pages: u32,
}

/// Addresses of the interned strings.
struct Statics {
    entrypoints: u32,
    empty_result: u32,
    abort_message: u32,
    heap_base: u32,
}

impl GuestModule {
    /// A module declaring ABI `1.<minor>`.
    pub fn new(minor: u32) -> Self {
        Self {
            minor,
            entrypoints: Vec::new(),
            abort: None,
            mutation_result: OpaResult::Ok,
            omitted: Vec::new(),
            min_pages: 2,
        }
    }

    pub fn version(&self) -> AbiVersion {
        AbiVersion::new(1, self.minor)
    }

    /// Add an entrypoint; ids are assigned in declaration order from 0.
    pub fn entrypoint(mut self, name: &str) -> Self {
        self.entrypoints.push(name.to_string());
        self
    }

    /// Add an entrypoint whose evaluation calls `opa_abort(message)`.
    pub fn aborting_entrypoint(mut self, name: &str, message: &str) -> Self {
        self.abort = Some((self.entrypoints.len(), message.to_string()));
        self.entrypoints.push(name.to_string());
        self
    }

    /// Result code returned by `opa_value_add_path` / `opa_value_remove_path`.
    pub fn mutation_result(mut self, result: OpaResult) -> Self {
        self.mutation_result = result;
        self
    }

    /// Leave an export out, to provoke export resolution failures.
    pub fn without_export(mut self, name: &str) -> Self {
        self.omitted.push(name.to_string());
        self
    }

    /// Minimum pages of the imported memory.
    pub fn min_pages(mut self, pages: u32) -> Self {
        self.min_pages = pages;
        self
    }

    /// Assemble and validate the module.
    pub fn build(&self) -> GuestResult<Vec<u8>> {
        let mut data = StaticData::default();
        let statics = self.intern_statics(&mut data)?;

        let mut module = Module::new();
        module.section(&self.emit_types());
        module.section(&self.emit_imports());
        module.section(&self.emit_function_section());
        module.section(&self.emit_globals(statics.heap_base));
        module.section(&self.emit_exports());
        module.section(&self.emit_code(&statics));
        module.section(&emit_data(&data));

        let bytes = module.finish();
        wasmparser::validate(&bytes).map_err(|e| GuestError::ValidationFailed(e.to_string()))?;
        Ok(bytes)
    }

    // ── Static data ──────────────────────────────────────────────────────

    fn intern_statics(&self, data: &mut StaticData) -> GuestResult<Statics> {
        let mut table = serde_json::Map::new();
        for (id, name) in self.entrypoints.iter().enumerate() {
            if table.insert(name.clone(), id.into()).is_some() {
                return Err(GuestError::DuplicateEntrypoint(name.clone()));
            }
        }
        let entrypoints = data.intern(&serde_json::Value::Object(table).to_string());
        let empty_result = data.intern("[]");
        let abort_message = data.intern(self.abort.as_ref().map_or("", |(_, m)| m.as_str()));

        let heap_base = data.end();
        let limit = self.min_pages * PAGE_SIZE;
        if heap_base > limit {
            return Err(GuestError::DataTooLarge {
                end: heap_base,
                limit,
            });
        }
        Ok(Statics {
            entrypoints,
            empty_result,
            abort_message,
            heap_base,
        })
    }

    // ── Type / import / function sections ────────────────────────────────

    fn emit_types(&self) -> TypeSection {
        let i = ValType::I32;
        let mut types = TypeSection::new();
        types.ty().function(vec![i], vec![]);
        types.ty().function(vec![i, i, i, i], vec![i]);
        types.ty().function(vec![i], vec![i]);
        types.ty().function(vec![i, i], vec![i]);
        types.ty().function(vec![], vec![i]);
        types.ty().function(vec![i, i], vec![]);
        types.ty().function(vec![i; 7], vec![i]);
        types.ty().function(vec![i, i, i], vec![i]);
        types.ty().function(vec![], vec![]);
        types
    }

    fn emit_imports(&self) -> ImportSection {
        let mut imports = ImportSection::new();
        imports.import("env", "opa_abort", EntityType::Function(TY_I32_VOID));
        imports.import("env", "opa_builtin2", EntityType::Function(TY_I32X4_I32));
        imports.import(
            "env",
            "memory",
            EntityType::Memory(MemoryType {
                minimum: u64::from(self.min_pages),
                maximum: None,
                memory64: false,
                shared: false,
                page_size_log2: None,
            }),
        );
        imports
    }

    fn emit_function_section(&self) -> FunctionSection {
        let mut functions = FunctionSection::new();
        for ty in FUNC_TYPES {
            functions.function(ty);
        }
        functions
    }

    fn emit_globals(&self, heap_base: u32) -> GlobalSection {
        let mut globals = GlobalSection::new();
        let global = |mutable| GlobalType {
            val_type: ValType::I32,
            mutable,
            shared: false,
        };
        globals.global(global(true), &ConstExpr::i32_const(heap_base as i32));
        globals.global(global(false), &ConstExpr::i32_const(1));
        globals.global(global(false), &ConstExpr::i32_const(self.minor as i32));
        globals
    }

    // ── Exports ──────────────────────────────────────────────────────────

    fn export_table(&self) -> Vec<(&'static str, ExportKind, u32)> {
        let f = ExportKind::Func;
        let mut table = vec![
            ("opa_wasm_abi_version", ExportKind::Global, G_ABI_MAJOR),
            ("opa_wasm_abi_minor_version", ExportKind::Global, G_ABI_MINOR),
            ("entrypoints", f, F_ENTRYPOINTS),
            ("builtins", f, F_BUILTINS),
            ("opa_malloc", f, F_MALLOC),
            ("opa_free", f, F_FREE),
            ("opa_json_parse", f, F_PARSE),
            ("opa_value_parse", f, F_PARSE),
            ("opa_json_dump", f, F_DUMP),
            ("opa_value_dump", f, F_DUMP),
            ("opa_value_add_path", f, F_ADD_PATH),
            ("opa_value_remove_path", f, F_REMOVE_PATH),
            ("opa_heap_ptr_get", f, F_HEAP_GET),
            ("opa_heap_ptr_set", f, F_HEAP_SET),
            ("opa_eval_ctx_new", f, F_CTX_NEW),
            ("opa_eval_ctx_set_input", f, F_CTX_SET_INPUT),
            ("opa_eval_ctx_set_data", f, F_CTX_SET_DATA),
            ("opa_eval_ctx_set_entrypoint", f, F_CTX_SET_ENTRYPOINT),
            ("opa_eval_ctx_get_result", f, F_CTX_GET_RESULT),
            ("eval", f, F_CTX_EVAL),
        ];
        if self.minor >= 2 {
            table.push(("opa_eval", f, F_OPA_EVAL));
        }
        if self.minor >= 3 {
            table.push(("opa_value_free", f, F_FREE));
            table.push(("opa_heap_blocks_stash", f, F_NOOP));
            table.push(("opa_heap_blocks_restore", f, F_NOOP));
            table.push(("opa_heap_stash_clear", f, F_NOOP));
        }
        table.retain(|(name, _, _)| !self.omitted.iter().any(|o| o == name));
        table
    }

    fn emit_exports(&self) -> ExportSection {
        let mut exports = ExportSection::new();
        for (name, kind, index) in self.export_table() {
            exports.export(name, kind, index);
        }
        exports
    }

    // ── Code section ─────────────────────────────────────────────────────

    fn emit_code(&self, statics: &Statics) -> CodeSection {
        let mut code = CodeSection::new();
        code.function(&emit_malloc());
        code.function(&emit_nop());
        code.function(&emit_parse());
        code.function(&emit_identity());
        code.function(&emit_heap_ptr_get());
        code.function(&emit_heap_ptr_set());
        code.function(&emit_const(statics.entrypoints as i32));
        // Built-in names mirror entrypoint names, ids included.
        code.function(&emit_const(statics.entrypoints as i32));
        code.function(&emit_ctx_new());
        code.function(&emit_ctx_store(CTX_INPUT));
        code.function(&emit_ctx_store(CTX_DATA));
        code.function(&emit_ctx_store(CTX_ENTRYPOINT));
        code.function(&emit_ctx_eval());
        code.function(&emit_ctx_get_result());
        code.function(&self.emit_run(statics));
        code.function(&emit_opa_eval());
        code.function(&emit_const(self.mutation_result.code()));
        code.function(&emit_const(self.mutation_result.code()));
        code.function(&emit_nop());
        code
    }

    /// `run(entrypoint, input, data) -> result`
    fn emit_run(&self, statics: &Statics) -> Function {
        let mut f = Function::new(vec![(1, ValType::I32)]); // local 3: result
        if let Some((abort_id, _)) = &self.abort {
            f.instruction(&Instruction::LocalGet(0));
            f.instruction(&Instruction::I32Const(*abort_id as i32));
            f.instruction(&Instruction::I32Eq);
            f.instruction(&Instruction::If(BlockType::Empty));
            f.instruction(&Instruction::I32Const(statics.abort_message as i32));
            f.instruction(&Instruction::Call(IMPORT_ABORT));
            f.instruction(&Instruction::Unreachable);
            f.instruction(&Instruction::End);
        }
        // result = opa_builtin2(entrypoint, 0, input, data)
        f.instruction(&Instruction::LocalGet(0));
        f.instruction(&Instruction::I32Const(0));
        f.instruction(&Instruction::LocalGet(1));
        f.instruction(&Instruction::LocalGet(2));
        f.instruction(&Instruction::Call(IMPORT_BUILTIN2));
        f.instruction(&Instruction::LocalSet(3));
        // undefined → empty result set
        f.instruction(&Instruction::LocalGet(3));
        f.instruction(&Instruction::I32Eqz);
        f.instruction(&Instruction::If(BlockType::Empty));
        f.instruction(&Instruction::I32Const(statics.empty_result as i32));
        f.instruction(&Instruction::LocalSet(3));
        f.instruction(&Instruction::End);
        f.instruction(&Instruction::LocalGet(3));
        f.instruction(&Instruction::End);
        f
    }
}

/// `malloc(size) -> ptr`, growing memory when the bump passes its end.
fn emit_malloc() -> Function {
    let mut f = Function::new(vec![(2, ValType::I32)]); // local 1: old, local 2: new
    f.instruction(&Instruction::GlobalGet(G_HEAP_PTR));
    f.instruction(&Instruction::LocalSet(1));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::LocalSet(2));
    // if new > memory.size * PAGE_SIZE
    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::MemorySize(0));
    f.instruction(&Instruction::I32Const(16));
    f.instruction(&Instruction::I32Shl);
    f.instruction(&Instruction::I32GtU);
    f.instruction(&Instruction::If(BlockType::Empty));
    // memory.grow(ceil((new - size_bytes) / PAGE_SIZE))
    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::MemorySize(0));
    f.instruction(&Instruction::I32Const(16));
    f.instruction(&Instruction::I32Shl);
    f.instruction(&Instruction::I32Sub);
    f.instruction(&Instruction::I32Const(PAGE_SIZE as i32 - 1));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::I32Const(16));
    f.instruction(&Instruction::I32ShrU);
    f.instruction(&Instruction::MemoryGrow(0));
    f.instruction(&Instruction::I32Const(-1));
    f.instruction(&Instruction::I32Eq);
    f.instruction(&Instruction::If(BlockType::Empty));
    f.instruction(&Instruction::Unreachable);
    f.instruction(&Instruction::End);
    f.instruction(&Instruction::End);
    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::GlobalSet(G_HEAP_PTR));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::End);
    f
}

/// `parse(ptr, len) -> value`: copy into the heap and terminate.
fn emit_parse() -> Function {
    let mut f = Function::new(vec![(1, ValType::I32)]); // local 2: dst
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::I32Const(1));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::Call(F_MALLOC));
    f.instruction(&Instruction::LocalSet(2));
    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::MemoryCopy {
        src_mem: 0,
        dst_mem: 0,
    });
    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::I32Add);
    f.instruction(&Instruction::I32Const(0));
    f.instruction(&Instruction::I32Store8(memarg(0, 0)));
    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::End);
    f
}

fn emit_identity() -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::End);
    f
}

fn emit_const(value: i32) -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::I32Const(value));
    f.instruction(&Instruction::End);
    f
}

fn emit_nop() -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::End);
    f
}

fn emit_heap_ptr_get() -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::GlobalGet(G_HEAP_PTR));
    f.instruction(&Instruction::End);
    f
}

fn emit_heap_ptr_set() -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::GlobalSet(G_HEAP_PTR));
    f.instruction(&Instruction::End);
    f
}

fn emit_ctx_new() -> Function {
    let mut f = Function::new(vec![(1, ValType::I32)]); // local 0: ctx
    f.instruction(&Instruction::I32Const(CTX_SIZE));
    f.instruction(&Instruction::Call(F_MALLOC));
    f.instruction(&Instruction::LocalSet(0));
    for offset in [CTX_INPUT, CTX_DATA, CTX_ENTRYPOINT, CTX_RESULT] {
        f.instruction(&Instruction::LocalGet(0));
        f.instruction(&Instruction::I32Const(0));
        f.instruction(&Instruction::I32Store(memarg(offset, 2)));
    }
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::End);
    f
}

fn emit_ctx_store(offset: u64) -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::I32Store(memarg(offset, 2)));
    f.instruction(&Instruction::End);
    f
}

/// `eval(ctx) -> 0`, storing `run(...)` into the context's result slot.
fn emit_ctx_eval() -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::LocalGet(0));
    for offset in [CTX_ENTRYPOINT, CTX_INPUT, CTX_DATA] {
        f.instruction(&Instruction::LocalGet(0));
        f.instruction(&Instruction::I32Load(memarg(offset, 2)));
    }
    f.instruction(&Instruction::Call(F_RUN));
    f.instruction(&Instruction::I32Store(memarg(CTX_RESULT, 2)));
    f.instruction(&Instruction::I32Const(0));
    f.instruction(&Instruction::End);
    f
}

fn emit_ctx_get_result() -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::LocalGet(0));
    f.instruction(&Instruction::I32Load(memarg(CTX_RESULT, 2)));
    f.instruction(&Instruction::End);
    f
}

/// `opa_eval(reserved, entrypoint, data, input, input_len, heap, format)`
fn emit_opa_eval() -> Function {
    let mut f = Function::new(vec![]);
    f.instruction(&Instruction::LocalGet(5));
    f.instruction(&Instruction::GlobalSet(G_HEAP_PTR));
    f.instruction(&Instruction::LocalGet(1));
    f.instruction(&Instruction::LocalGet(3));
    f.instruction(&Instruction::LocalGet(4));
    f.instruction(&Instruction::Call(F_PARSE));
    f.instruction(&Instruction::LocalGet(2));
    f.instruction(&Instruction::Call(F_RUN));
    f.instruction(&Instruction::End);
    f
}

fn emit_data(data: &StaticData) -> DataSection {
    let mut section = DataSection::new();
    section.active(
        0,
        &ConstExpr::i32_const(DATA_START as i32),
        data.bytes().iter().copied(),
    );
    section
}
