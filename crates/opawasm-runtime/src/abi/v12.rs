//! ABI 1.2: one `opa_eval` call, input written straight onto the heap.

use opawasm_types::ValueFormat;

use crate::abi::{AbiAdapter, AbiRevision, AdapterBase};
use crate::error::RuntimeResult;
use crate::exports::OpaExports;
use crate::guest::Guest;
use crate::memory;

#[derive(Debug, Clone)]
pub struct V12Adapter {
    base: AdapterBase,
}

impl V12Adapter {
    pub fn new(base: AdapterBase) -> Self {
        Self { base }
    }

    fn eval_at_heap(&self, guest: &mut dyn Guest, input: &[u8], entrypoint: i32) -> RuntimeResult<String> {
        let input_ptr = self.base.eval_heap_ptr();
        let written = memory::write_bytes(guest, input_ptr, input)?;
        let result_heap = input_ptr + crate::exports::guest_len(written)?;
        let result = guest.opa_eval(
            entrypoint,
            self.base.data_ptr(),
            input_ptr,
            input.len(),
            result_heap,
            ValueFormat::Json,
        )?;
        AdapterBase::read_result(guest, result)
    }
}

impl AbiAdapter for V12Adapter {
    fn revision(&self) -> AbiRevision {
        AbiRevision::V1_2
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

        let outcome = self.eval_at_heap(guest, input, entrypoint);
        let restored = guest.heap_ptr_set(self.base.eval_heap_ptr());
        let result = outcome?;
        restored?;
        Ok(result)
    }
}
