//! Host runtime for OPA policies compiled to WebAssembly.
//!
//! Pipeline: bytes → [`PolicyModule`] → [`EvaluatorFactory`] → [`Evaluator`]
//!
//! An evaluator instantiates the module on the wasmi engine with host-created
//! memory and the built-in imports, reads the ABI version the module
//! declares, negotiates it against [`EvaluatorOptions::max_abi_version`] and
//! picks the matching adapter from [`abi`] for the rest of its life.
//!
//! ```text
//!  Evaluator ──▶ AbiAdapter (1.0 / 1.2 / 1.3) ──▶ Guest exports
//!      │                                             │
//!      └──── CompositeImports ◀── opa_builtinN ◀─────┘
//! ```

pub mod abi;
pub mod error;
pub mod evaluator;
pub mod exports;
pub mod factory;
pub mod guest;
mod host;
pub mod memory;
pub mod module;
pub mod options;
mod wasm;

pub use abi::{AbiAdapter, AbiRevision, DataMutation};
pub use error::{RuntimeError, RuntimeResult};
pub use evaluator::{Evaluator, UpdateDataFeature};
pub use factory::EvaluatorFactory;
pub use guest::Guest;
pub use module::{ModuleSignature, PolicyModule};
pub use options::EvaluatorOptions;

pub use opawasm_builtins as builtins;
pub use opawasm_types::{AbiVersion, PolicyEvaluationResult};
