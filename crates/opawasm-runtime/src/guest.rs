//! The seam between ABI adapters and a running guest.

use crate::error::RuntimeResult;

/// A live guest instance: callable exports plus its linear memory.
///
/// All guest functions of the OPA ABI take and return `i32`s (pointers,
/// ids, lengths, result codes). Functions without a result return `0`.
pub trait Guest {
    /// Call export `name`.
    fn call(&mut self, name: &'static str, args: &[i32]) -> RuntimeResult<i32>;

    fn memory(&self) -> &[u8];

    fn memory_mut(&mut self) -> &mut [u8];

    /// Grow linear memory by `pages` 64 KiB pages.
    fn grow(&mut self, pages: u64) -> RuntimeResult<()>;
}
