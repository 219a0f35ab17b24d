//! Built-in error types.

use thiserror::Error;

/// Code attached to failures that carry no code of their own.
pub const BUILTIN_ERROR_CODE: &str = "eval_builtin_error";

/// Errors produced while resolving or running a built-in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuiltinError {
    /// The implementation failed. Swallowed unless strict mode is on.
    #[error("{code}: {message}")]
    Failed { code: String, message: String },

    /// No implementation exists for `name.arity`. Always fatal.
    #[error("builtin '{name}' is not implemented")]
    NotImplemented { name: String },
}

impl BuiltinError {
    /// A failure with the generic [`BUILTIN_ERROR_CODE`].
    pub fn failed(message: impl Into<String>) -> Self {
        BuiltinError::Failed {
            code: BUILTIN_ERROR_CODE.to_string(),
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        BuiltinError::Failed {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            BuiltinError::Failed { code, .. } => code,
            BuiltinError::NotImplemented { .. } => BUILTIN_ERROR_CODE,
        }
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self, BuiltinError::NotImplemented { .. })
    }
}

impl From<serde_json::Error> for BuiltinError {
    fn from(err: serde_json::Error) -> Self {
        BuiltinError::failed(err.to_string())
    }
}

/// Built-in result type alias.
pub type BuiltinResult<T> = Result<T, BuiltinError>;
