//! Evaluator configuration.

use opawasm_types::AbiVersion;
use serde::{Deserialize, Serialize};

/// Settings applied to every evaluator a factory creates.
///
/// Missing fields take their defaults, so a partial JSON document such as
/// `{"strict_builtin_errors": true}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorOptions {
    /// Initial size of the host-created linear memory, in 64 KiB pages.
    /// Raised to the module's own minimum when that is larger.
    pub min_memory_pages: u32,
    /// Hard limit on linear memory growth. `None` is the engine maximum.
    pub max_memory_pages: Option<u32>,
    /// Highest ABI version to speak, whatever the module declares.
    pub max_abi_version: Option<AbiVersion>,
    /// Fail the evaluation when a built-in fails instead of treating its
    /// result as undefined.
    pub strict_builtin_errors: bool,
    /// Engine fuel available to each operation. `None` is unlimited.
    pub fuel_limit: Option<u64>,
}

impl Default for EvaluatorOptions {
    fn default() -> Self {
        Self {
            min_memory_pages: 2,
            max_memory_pages: None,
            max_abi_version: None,
            strict_builtin_errors: false,
            fuel_limit: None,
        }
    }
}
