//! ABI 1.3: the 1.2 protocol plus in-place base data mutation.
//!
//! Free heap blocks left after parsing the data are stashed in the guest's
//! shadow heap. A mutation window restores them, allocates the value and
//! path, patches the data in place, frees the path and stashes again:
//!
//! ```text
//! set_data:  parse data ─ stash
//! update:    restore ─ value ─ path ─ add_path ─ free(path) ─ stash
//! reset:     clear stash ─ heap back to base
//! ```
//!
//! Resetting the heap pointer without restoring first leaks the stashed
//! blocks until the next `reset`.

use crate::abi::{AbiAdapter, AbiRevision, AdapterBase, DataMutation, V12Adapter};
use crate::error::{RuntimeError, RuntimeResult};
use crate::exports::OpaExports;
use crate::guest::Guest;
use crate::memory;

#[derive(Debug, Clone)]
pub struct V13Adapter {
    inner: V12Adapter,
}

impl V13Adapter {
    pub fn new(base: AdapterBase) -> Self {
        Self {
            inner: V12Adapter::new(base),
        }
    }

    /// Run one mutation window. `apply` receives the data pointer and the
    /// parsed path and returns the guest's result code.
    fn mutate<F>(&mut self, guest: &mut dyn Guest, path: &[&str], apply: F) -> RuntimeResult<()>
    where
        F: FnOnce(&mut dyn Guest, i32, i32) -> RuntimeResult<opawasm_types::OpaResult>,
    {
        let data_ptr = self.base().data_ptr();
        if data_ptr == 0 {
            return Err(RuntimeError::Evaluation("no base data to update".into()));
        }

        guest.heap_blocks_restore()?;
        let path_json = serde_json::to_vec(path)?;
        let path_ptr = memory::parse_json(guest, &path_json)?;
        let result = apply(guest, data_ptr, path_ptr)?;
        guest.value_free(path_ptr)?;
        guest.heap_blocks_stash()?;
        let heap = guest.heap_ptr_get()?;
        self.base_mut().set_eval_heap_ptr(heap);

        if !result.is_ok() {
            return Err(RuntimeError::DataMutation(result));
        }
        Ok(())
    }
}

impl AbiAdapter for V13Adapter {
    fn revision(&self) -> AbiRevision {
        AbiRevision::V1_3
    }

    fn base(&self) -> &AdapterBase {
        self.inner.base()
    }

    fn base_mut(&mut self) -> &mut AdapterBase {
        self.inner.base_mut()
    }

    fn eval(&mut self, guest: &mut dyn Guest, input: &[u8], entrypoint: Option<&str>) -> RuntimeResult<String> {
        self.inner.eval(guest, input, entrypoint)
    }

    fn set_data(&mut self, guest: &mut dyn Guest, data: &[u8]) -> RuntimeResult<()> {
        self.base_mut().set_data(guest, data)?;
        guest.heap_blocks_stash()
    }

    fn reset(&mut self, guest: &mut dyn Guest) -> RuntimeResult<()> {
        guest.heap_stash_clear()?;
        self.base_mut().reset(guest)
    }

    fn data_mutation(&mut self) -> Option<&mut dyn DataMutation> {
        Some(self)
    }
}

impl DataMutation for V13Adapter {
    fn update_data_path(&mut self, guest: &mut dyn Guest, value: &[u8], path: &[&str]) -> RuntimeResult<()> {
        serde_json::from_slice::<serde::de::IgnoredAny>(value)?;
        self.mutate(guest, path, |guest, data_ptr, path_ptr| {
            let value_ptr = memory::parse_json(guest, value)?;
            guest.value_add_path(data_ptr, path_ptr, value_ptr)
        })?;
        tracing::debug!(path = ?path, bytes = value.len(), "base data path updated");
        Ok(())
    }

    fn remove_data_path(&mut self, guest: &mut dyn Guest, path: &[&str]) -> RuntimeResult<()> {
        self.mutate(guest, path, |guest, data_ptr, path_ptr| {
            guest.value_remove_path(data_ptr, path_ptr)
        })?;
        tracing::debug!(path = ?path, "base data path removed");
        Ok(())
    }
}
