//! Built-in dispatch for OPA policy modules.
//!
//! A guest calls a built-in by numeric id through one of the
//! `opa_builtin0..4` imports. The runtime maps the id to a name and hands
//! the call to [`CompositeImports`], which resolves `"<name>.<arity>"` in
//! this order:
//!
//! 1. custom implementations registered through [`CustomBuiltins`]
//!    (collected once into an [`ImportsCache`])
//! 2. the `internal.print` and `trace` intrinsics
//! 3. the default library ([`DefaultImports`], or any [`OpaImports`])
//!
//! Arguments arrive as guest pointers wrapped in [`BuiltinArgs`] and are
//! only read from guest memory when an implementation asks for them.

pub mod args;
pub mod composite;
pub mod context;
pub mod defaults;
pub mod error;
pub mod imports;
pub mod registry;

pub use args::{ArgSource, BuiltinArgs};
pub use composite::CompositeImports;
pub use context::BuiltinContext;
pub use defaults::DefaultImports;
pub use error::{BuiltinError, BuiltinResult, BUILTIN_ERROR_CODE};
pub use imports::{OpaImports, Printer};
pub use registry::{BuiltinFn, CustomBuiltins, Declarations, ImportsCache, Registration};
