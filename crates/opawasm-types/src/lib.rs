//! Shared types for the OPA policy runtime.
//!
//! Everything here is plain data used by more than one crate: the ABI
//! version pair a policy module declares, the two textual encodings values
//! travel in, the result codes of guest-side data mutation, and the
//! envelope every evaluation row is wrapped in.

pub mod abi;
pub mod result;
pub mod value;

pub use abi::{AbiVersion, AbiVersionError};
pub use result::PolicyEvaluationResult;
pub use value::{OpaResult, RegoSet, ValueFormat, SET_KEY};
