//! Codec error types.

use thiserror::Error;

/// Malformed input. Every variant names the byte offset where reading
/// stopped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unterminated string starting at position {position}")]
    UnterminatedString { position: usize },

    #[error("unexpected '{found}' at position {position}")]
    UnexpectedToken { found: String, position: usize },

    #[error("unexpected end of input at position {position}")]
    UnexpectedEnd { position: usize },

    #[error("invalid literal '{literal}' at position {position}")]
    InvalidLiteral { literal: String, position: usize },

    #[error("maximum depth exceeded at position {position}")]
    MaxDepth { position: usize },
}

impl CodecError {
    pub fn position(&self) -> usize {
        match self {
            CodecError::UnterminatedString { position }
            | CodecError::UnexpectedToken { position, .. }
            | CodecError::UnexpectedEnd { position }
            | CodecError::InvalidLiteral { position, .. }
            | CodecError::MaxDepth { position } => *position,
        }
    }
}

/// Codec result type alias.
pub type CodecResult<T> = Result<T, CodecError>;
