//! Synthetic policy modules speaking the OPA WASM ABI.
//!
//! [`GuestModule`] assembles a small module that behaves like compiler
//! output at the ABI boundary, for any of the 1.0 / 1.2 / 1.3 revisions:
//!
//! ## Imports
//! - `env.memory` (host-created linear memory)
//! - `env.opa_abort(msg_ptr)`
//! - `env.opa_builtin2(id, ctx, a, b) → ptr`
//!
//! ## Behavior
//! - Values are NUL-terminated JSON text; parse copies, dump is identity.
//! - `opa_malloc` is a bump allocator over a heap-pointer global and grows
//!   memory on demand.
//! - Evaluating entrypoint `n` calls built-in `n` (same name as the
//!   entrypoint) with `(input, data)`; whatever the host returns is the
//!   result set. An undefined built-in result yields `[]`.
//! - An entrypoint may be configured to call `opa_abort` instead.
//! - `opa_value_add_path` / `opa_value_remove_path` return a configured
//!   result code; the 1.3 shadow-heap exports are no-ops.

pub mod builder;
pub mod error;
mod layout;

pub use builder::GuestModule;
pub use error::{GuestError, GuestResult};
