//! A guest instance running on the wasmi engine.

use std::collections::HashMap;

use opawasm_builtins::CompositeImports;
use opawasm_types::AbiVersion;
use wasmi::core::TrapCode;
use wasmi::{Func, Instance, Linker, Memory, MemoryType, Store};

use crate::abi::AbiRevision;
use crate::error::{RuntimeError, RuntimeResult};
use crate::guest::Guest;
use crate::host::{self, HostState};
use crate::module::PolicyModule;
use crate::options::EvaluatorOptions;

pub(crate) struct WasmGuest {
    store: Store<HostState>,
    instance: Instance,
    memory: Memory,
    funcs: HashMap<&'static str, Func>,
    version: AbiVersion,
    fuel_limit: Option<u64>,
}

impl WasmGuest {
    /// Create memory, link the host imports and instantiate `module`.
    pub fn instantiate(
        module: &PolicyModule,
        options: &EvaluatorOptions,
        imports: CompositeImports,
    ) -> RuntimeResult<Self> {
        let engine = module.engine();
        let mut store = Store::new(engine, HostState::new(imports));

        let min_pages = options.min_memory_pages.max(module.signature().memory_min_pages);
        let ty = MemoryType::new(min_pages, options.max_memory_pages)
            .map_err(|e| RuntimeError::Module(format!("invalid memory limits: {e}")))?;
        let memory = Memory::new(&mut store, ty)
            .map_err(|e| RuntimeError::Module(format!("failed to create memory: {e}")))?;
        store.data_mut().memory = Some(memory);

        let mut linker = <Linker<HostState>>::new(engine);
        host::define_imports(&mut linker, memory)?;

        store
            .set_fuel(options.fuel_limit.unwrap_or(u64::MAX))
            .map_err(|e| RuntimeError::Module(e.to_string()))?;
        let instance = linker
            .instantiate(&mut store, module.inner())
            .map_err(|e| RuntimeError::Module(format!("instantiation failed: {e}")))?
            .start(&mut store)
            .map_err(|e| RuntimeError::Module(format!("start function failed: {e}")))?;

        Ok(Self {
            store,
            instance,
            memory,
            funcs: HashMap::new(),
            version: AbiVersion::V1_0,
            fuel_limit: options.fuel_limit,
        })
    }

    /// The ABI version the module declares through its exported globals.
    pub fn declared_version(&self) -> RuntimeResult<AbiVersion> {
        let major = self.global("opa_wasm_abi_version")?;
        let minor = self.global("opa_wasm_abi_minor_version")?;
        Ok(AbiVersion::new(major, minor))
    }

    fn global(&self, name: &str) -> RuntimeResult<u32> {
        self.instance
            .get_global(&self.store, name)
            .and_then(|global| global.get(&self.store).i32())
            .and_then(|value| u32::try_from(value).ok())
            .ok_or_else(|| RuntimeError::AbiNegotiation(format!("Failed to get value from {name} global")))
    }

    /// Look up every export `revision` needs.
    pub fn resolve_exports(&mut self, revision: AbiRevision) -> RuntimeResult<()> {
        self.version = revision.version();
        for name in revision.required_exports() {
            let func = self
                .instance
                .get_func(&self.store, name)
                .ok_or_else(|| RuntimeError::ExportResolution {
                    version: self.version,
                    name: name.to_string(),
                })?;
            self.funcs.insert(name, func);
        }
        Ok(())
    }

    pub fn set_builtins(&mut self, builtins: HashMap<i32, String>) {
        self.store.data_mut().builtins = builtins;
    }

    /// Start a public operation: forget stale callback errors and refill
    /// the fuel budget.
    pub fn begin(&mut self) -> RuntimeResult<()> {
        self.store.data_mut().pending = None;
        self.store
            .set_fuel(self.fuel_limit.unwrap_or(u64::MAX))
            .map_err(|e| RuntimeError::Evaluation(e.to_string()))
    }

    /// End of an evaluation epoch for the built-ins.
    pub fn reset_imports(&mut self) {
        if let Some(imports) = self.store.data_mut().imports.as_mut() {
            imports.reset();
        }
    }

    fn classify(&mut self, name: &str, err: wasmi::Error) -> RuntimeError {
        if let Some(pending) = self.store.data_mut().pending.take() {
            return pending;
        }
        if err.as_trap_code() == Some(TrapCode::OutOfFuel) {
            return RuntimeError::Evaluation(format!("{name}: fuel exhausted"));
        }
        RuntimeError::Evaluation(format!("{name}: {err}"))
    }
}

impl Guest for WasmGuest {
    fn call(&mut self, name: &'static str, args: &[i32]) -> RuntimeResult<i32> {
        let func = *self.funcs.get(name).ok_or_else(|| RuntimeError::ExportResolution {
            version: self.version,
            name: name.to_string(),
        })?;
        host::invoke(func, &mut self.store, args).map_err(|err| self.classify(name, err))
    }

    fn memory(&self) -> &[u8] {
        self.memory.data(&self.store)
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        self.memory.data_mut(&mut self.store)
    }

    fn grow(&mut self, pages: u64) -> RuntimeResult<()> {
        host::grow(self.memory, &mut self.store, pages)
    }
}
