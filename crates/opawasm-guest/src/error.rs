//! Fixture builder errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuestError {
    /// The assembled module failed validation.
    #[error("guest module failed validation: {0}")]
    ValidationFailed(String),

    /// Static data does not fit into the initial memory.
    #[error("static data ends at {end} but initial memory is {limit} bytes")]
    DataTooLarge { end: u32, limit: u32 },

    #[error("duplicate entrypoint '{0}'")]
    DuplicateEntrypoint(String),
}

pub type GuestResult<T> = Result<T, GuestError>;
