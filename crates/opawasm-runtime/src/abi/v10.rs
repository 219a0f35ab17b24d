//! ABI 1.0: evaluation through a per-call context object.

use crate::abi::{AbiAdapter, AbiRevision, AdapterBase};
use crate::error::RuntimeResult;
use crate::exports::OpaExports;
use crate::guest::Guest;
use crate::memory;

/// Creates a fresh evaluation context for every call. Contexts are never
/// reused; resetting the heap pointer discards them.
#[derive(Debug, Clone)]
pub struct V10Adapter {
    base: AdapterBase,
}

impl V10Adapter {
    pub fn new(base: AdapterBase) -> Self {
        Self { base }
    }

    fn eval_in_context(&self, guest: &mut dyn Guest, input: &[u8], entrypoint: i32) -> RuntimeResult<String> {
        let ctx = guest.eval_ctx_new()?;
        let input = memory::parse_json(guest, input)?;
        guest.eval_ctx_set_input(ctx, input)?;
        guest.eval_ctx_set_data(ctx, self.base.data_ptr())?;
        guest.eval_ctx_set_entrypoint(ctx, entrypoint)?;
        guest.eval(ctx)?;

        let result = guest.eval_ctx_get_result(ctx)?;
        let dumped = guest.json_dump(result)?;
        AdapterBase::read_result(guest, dumped)
    }
}

impl AbiAdapter for V10Adapter {
    fn revision(&self) -> AbiRevision {
        AbiRevision::V1_0
    }

    fn base(&self) -> &AdapterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut AdapterBase {
        &mut self.base
    }

    fn eval(&mut self, guest: &mut dyn Guest, input: &[u8], entrypoint: Option<&str>) -> RuntimeResult<String> {
        let entrypoint = self.base.entrypoint_id(entrypoint)?;
        guest.heap_ptr_set(self.base.eval_heap_ptr())?;
        self.base.ensure_memory(guest, input.len())?;

        let outcome = self.eval_in_context(guest, input, entrypoint);
        let restored = guest.heap_ptr_set(self.base.eval_heap_ptr());
        let result = outcome?;
        restored?;
        Ok(result)
    }
}
