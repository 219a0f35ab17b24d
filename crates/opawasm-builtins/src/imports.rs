//! The default-implementation seam of the dispatch bridge.

use std::sync::Arc;

use serde_json::Value;

use crate::args::BuiltinArgs;
use crate::context::BuiltinContext;
use crate::error::BuiltinResult;

/// Replacement sink for `print`, `trace` and guest `println` output.
pub type Printer = Arc<dyn Fn(&str) + Send + Sync>;

/// Built-ins that are not custom registrations: the standard library a
/// policy expects from its host.
pub trait OpaImports: Send {
    /// Call `context.function_name` with `args.len()` arguments.
    /// Unknown built-ins must fail with
    /// [`BuiltinError::NotImplemented`](crate::BuiltinError::NotImplemented).
    fn call(
        &mut self,
        context: &BuiltinContext,
        args: &mut BuiltinArgs<'_>,
    ) -> BuiltinResult<Option<Value>>;

    fn print(&mut self, message: &str) {
        tracing::info!(target: "opawasm::print", "{message}");
    }

    /// Called after every evaluation.
    fn reset(&mut self) {}
}
