//! Compiled policy modules.

use std::path::Path;

use wasmi::{Config, Engine, Module};
use wasmparser::{Parser as WasmParser, Payload, TypeRef};

use crate::error::{RuntimeError, RuntimeResult};

/// Imports and exports of a policy module, as read from its binary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleSignature {
    /// `(module, name)` of every import.
    pub imports: Vec<(String, String)>,
    pub exports: Vec<String>,
    /// Minimum pages of the imported `env.memory`.
    pub memory_min_pages: u32,
}

impl ModuleSignature {
    pub fn parse(bytes: &[u8]) -> RuntimeResult<Self> {
        let mut signature = ModuleSignature::default();
        let mut has_memory = false;

        for payload in WasmParser::new(0).parse_all(bytes) {
            match payload.map_err(|e| RuntimeError::Module(e.to_string()))? {
                Payload::ImportSection(reader) => {
                    for import in reader {
                        let import = import.map_err(|e| RuntimeError::Module(e.to_string()))?;
                        if let TypeRef::Memory(ty) = import.ty {
                            if import.module == "env" && import.name == "memory" {
                                has_memory = true;
                                signature.memory_min_pages =
                                    u32::try_from(ty.initial).unwrap_or(u32::MAX);
                            }
                        }
                        signature
                            .imports
                            .push((import.module.to_string(), import.name.to_string()));
                    }
                }
                Payload::ExportSection(reader) => {
                    for export in reader {
                        let export = export.map_err(|e| RuntimeError::Module(e.to_string()))?;
                        signature.exports.push(export.name.to_string());
                    }
                }
                _ => {}
            }
        }

        if !has_memory {
            return Err(RuntimeError::Module(
                "policy module does not import env.memory".into(),
            ));
        }
        Ok(signature)
    }

    pub fn exports(&self, name: &str) -> bool {
        self.exports.iter().any(|e| e == name)
    }

    pub fn imports(&self, module: &str, name: &str) -> bool {
        self.imports.iter().any(|(m, n)| m == module && n == name)
    }
}

/// A compiled policy, shareable by any number of evaluators.
#[derive(Clone)]
pub struct PolicyModule {
    engine: Engine,
    module: Module,
    signature: ModuleSignature,
}

impl PolicyModule {
    pub fn from_bytes(bytes: &[u8]) -> RuntimeResult<Self> {
        let signature = ModuleSignature::parse(bytes)?;

        let mut config = Config::default();
        config.consume_fuel(true);
        let engine = Engine::new(&config);
        let module = Module::new(&engine, bytes).map_err(|e| RuntimeError::Module(e.to_string()))?;

        tracing::debug!(
            bytes = bytes.len(),
            imports = signature.imports.len(),
            exports = signature.exports.len(),
            "policy module compiled"
        );
        Ok(Self {
            engine,
            module,
            signature,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> RuntimeResult<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn signature(&self) -> &ModuleSignature {
        &self.signature
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.engine
    }

    pub(crate) fn inner(&self) -> &Module {
        &self.module
    }
}
