//! Runtime error types.

use opawasm_builtins::BuiltinError;
use opawasm_codec::CodecError;
use opawasm_types::{AbiVersion, OpaResult};
use thiserror::Error;

/// Errors surfaced by the evaluator and everything beneath it.
///
/// Engine errors never appear here directly: host callbacks record the
/// classified cause, and anything left unclassified becomes
/// [`RuntimeError::Evaluation`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A guest export required by the negotiated ABI is missing.
    #[error("ABI {version}. Failed to resolve export {name}")]
    ExportResolution { version: AbiVersion, name: String },

    #[error("unknown entrypoint '{0}'")]
    UnknownEntrypoint(String),

    /// Linear memory could not grow far enough.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// The guest called `opa_abort`.
    #[error("evaluation aborted: {0}")]
    Aborted(String),

    /// A built-in failed and the failure was not swallowed.
    #[error("builtin failed: {0}")]
    Builtin(#[from] BuiltinError),

    /// `opa_value_add_path` / `opa_value_remove_path` returned a non-Ok code.
    #[error("Failed to update data: {0}")]
    DataMutation(OpaResult),

    #[error("value conversion failed: {0}")]
    Codec(#[from] CodecError),

    #[error("Policy evaluator returned empty result")]
    EmptyResult,

    /// The guest trapped, ran out of fuel, or handed back unreadable memory.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    #[error("invalid policy module: {0}")]
    Module(String),

    #[error("ABI negotiation failed: {0}")]
    AbiNegotiation(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runtime result type alias.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
