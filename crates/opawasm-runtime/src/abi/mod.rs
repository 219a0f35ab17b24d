//! ABI adapters, one per guest ABI revision.
//!
//! The revision is chosen once, from the negotiated version, when an
//! evaluator is built:
//!
//! | negotiated | adapter |
//! |------------|---------|
//! | `< 1.2`    | [`V10Adapter`]: per-call evaluation context |
//! | `1.2`      | [`V12Adapter`]: single `opa_eval` call |
//! | `>= 1.3`   | [`V13Adapter`]: 1.2 plus in-place data mutation |
//!
//! Every adapter shares the same heap bookkeeping in [`AdapterBase`]:
//!
//! ```text
//!   base_heap_ptr        eval_heap_ptr
//!        │  parsed data       │  input, scratch, results
//!   ─────┴────────────────────┴──────────────────────────▶
//! ```
//!
//! Everything past `eval_heap_ptr` belongs to one evaluation and is
//! discarded by resetting the guest heap pointer afterwards.

mod v10;
mod v12;
mod v13;

use std::collections::HashMap;

use opawasm_types::AbiVersion;
use serde::de::IgnoredAny;

use crate::error::{RuntimeError, RuntimeResult};
use crate::exports::{OpaExports, V1_0_EXPORTS, V1_2_EXPORTS, V1_3_EXPORTS};
use crate::guest::Guest;
use crate::memory;

pub use v10::V10Adapter;
pub use v12::V12Adapter;
pub use v13::V13Adapter;

/// The adapter implementations that exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbiRevision {
    V1_0,
    V1_2,
    V1_3,
}

impl AbiRevision {
    /// Adapter for a negotiated version.
    pub fn select(negotiated: AbiVersion) -> Self {
        if negotiated < AbiVersion::V1_2 {
            AbiRevision::V1_0
        } else if negotiated == AbiVersion::V1_2 {
            AbiRevision::V1_2
        } else {
            AbiRevision::V1_3
        }
    }

    /// The version this adapter speaks.
    pub fn version(self) -> AbiVersion {
        match self {
            AbiRevision::V1_0 => AbiVersion::V1_0,
            AbiRevision::V1_2 => AbiVersion::V1_2,
            AbiRevision::V1_3 => AbiVersion::V1_3,
        }
    }

    /// Guest exports this adapter calls.
    pub fn required_exports(self) -> Vec<&'static str> {
        let mut names = V1_0_EXPORTS.to_vec();
        if self != AbiRevision::V1_0 {
            names.extend_from_slice(V1_2_EXPORTS);
        }
        if self == AbiRevision::V1_3 {
            names.extend_from_slice(V1_3_EXPORTS);
        }
        names
    }
}

/// Incremental base-data mutation, available from ABI 1.3.
pub trait DataMutation {
    /// Set `path` in the base data to the JSON `value`, creating
    /// intermediate objects.
    fn update_data_path(&mut self, guest: &mut dyn Guest, value: &[u8], path: &[&str]) -> RuntimeResult<()>;

    /// Remove `path` from the base data.
    fn remove_data_path(&mut self, guest: &mut dyn Guest, path: &[&str]) -> RuntimeResult<()>;
}

/// Evaluation protocol of one ABI revision.
pub trait AbiAdapter: Send {
    fn revision(&self) -> AbiRevision;

    fn base(&self) -> &AdapterBase;

    fn base_mut(&mut self) -> &mut AdapterBase;

    /// Evaluate `entrypoint` (id 0 when `None`) against the JSON `input`,
    /// returning the JSON result set.
    fn eval(&mut self, guest: &mut dyn Guest, input: &[u8], entrypoint: Option<&str>) -> RuntimeResult<String>;

    /// Replace the base data document. Empty `data` clears it.
    fn set_data(&mut self, guest: &mut dyn Guest, data: &[u8]) -> RuntimeResult<()> {
        self.base_mut().set_data(guest, data)
    }

    /// Drop the base data and return the heap to its initial state.
    fn reset(&mut self, guest: &mut dyn Guest) -> RuntimeResult<()> {
        self.base_mut().reset(guest)
    }

    /// The current base data as JSON, `None` when none is set.
    fn dump_data(&mut self, guest: &mut dyn Guest) -> RuntimeResult<Option<String>> {
        self.base_mut().dump_data(guest)
    }

    fn data_mutation(&mut self) -> Option<&mut dyn DataMutation> {
        None
    }
}

/// Build the adapter for `revision`, reading the entrypoint and built-in
/// tables from the guest.
pub fn new_adapter(revision: AbiRevision, guest: &mut dyn Guest) -> RuntimeResult<Box<dyn AbiAdapter>> {
    let base = AdapterBase::new(guest)?;
    Ok(match revision {
        AbiRevision::V1_0 => Box::new(V10Adapter::new(base)),
        AbiRevision::V1_2 => Box::new(V12Adapter::new(base)),
        AbiRevision::V1_3 => Box::new(V13Adapter::new(base)),
    })
}

/// Tables and heap bookkeeping common to every revision.
#[derive(Debug, Clone)]
pub struct AdapterBase {
    entrypoints: HashMap<String, i32>,
    builtins: HashMap<i32, String>,
    base_heap_ptr: i32,
    data_ptr: i32,
    eval_heap_ptr: i32,
}

impl AdapterBase {
    pub fn new(guest: &mut dyn Guest) -> RuntimeResult<Self> {
        let value = guest.entrypoints()?;
        let entrypoints = read_table(guest, value)?;
        let value = guest.builtins()?;
        let builtins = read_table(guest, value)?
            .into_iter()
            .map(|(name, id)| (id, name))
            .collect();
        let base_heap_ptr = guest.heap_ptr_get()?;
        Ok(Self {
            entrypoints,
            builtins,
            base_heap_ptr,
            data_ptr: 0,
            eval_heap_ptr: base_heap_ptr,
        })
    }

    /// Entrypoint name → id.
    pub fn entrypoints(&self) -> &HashMap<String, i32> {
        &self.entrypoints
    }

    /// Built-in id → name.
    pub fn builtins(&self) -> &HashMap<i32, String> {
        &self.builtins
    }

    pub fn data_ptr(&self) -> i32 {
        self.data_ptr
    }

    pub fn eval_heap_ptr(&self) -> i32 {
        self.eval_heap_ptr
    }

    pub(crate) fn set_eval_heap_ptr(&mut self, ptr: i32) {
        self.eval_heap_ptr = ptr;
    }

    /// Resolve an entrypoint name. `None` selects the first entrypoint.
    pub fn entrypoint_id(&self, entrypoint: Option<&str>) -> RuntimeResult<i32> {
        match entrypoint {
            None => Ok(0),
            Some(name) => self
                .entrypoints
                .get(name)
                .copied()
                .ok_or_else(|| RuntimeError::UnknownEntrypoint(name.to_string())),
        }
    }

    /// Grow memory so `size` bytes fit past the evaluation heap start.
    pub fn ensure_memory(&self, guest: &mut dyn Guest, size: usize) -> RuntimeResult<()> {
        memory::ensure_capacity(guest, self.eval_heap_ptr, size)
    }

    pub fn set_data(&mut self, guest: &mut dyn Guest, data: &[u8]) -> RuntimeResult<()> {
        let blank = data.iter().all(u8::is_ascii_whitespace);
        if !blank {
            serde_json::from_slice::<IgnoredAny>(data)?;
        }

        guest.heap_ptr_set(self.base_heap_ptr)?;
        self.data_ptr = 0;
        self.eval_heap_ptr = self.base_heap_ptr;
        if blank {
            tracing::debug!("base data cleared");
            return Ok(());
        }

        let data_ptr = memory::parse_json(guest, data)?;
        if data_ptr == 0 {
            return Err(RuntimeError::Evaluation("guest failed to parse base data".into()));
        }
        self.data_ptr = data_ptr;
        self.eval_heap_ptr = guest.heap_ptr_get()?;
        tracing::debug!(
            bytes = data.len(),
            data_ptr = self.data_ptr,
            eval_heap_ptr = self.eval_heap_ptr,
            "base data set"
        );
        Ok(())
    }

    pub fn reset(&mut self, guest: &mut dyn Guest) -> RuntimeResult<()> {
        self.data_ptr = 0;
        self.eval_heap_ptr = self.base_heap_ptr;
        guest.heap_ptr_set(self.base_heap_ptr)
    }

    pub fn dump_data(&mut self, guest: &mut dyn Guest) -> RuntimeResult<Option<String>> {
        if self.data_ptr == 0 {
            return Ok(None);
        }
        let dumped = memory::dump_json(guest, self.data_ptr);
        guest.heap_ptr_set(self.eval_heap_ptr)?;
        dumped.map(Some)
    }

    /// Text of a result set pointer; a null pointer is an empty set.
    pub(crate) fn read_result(guest: &mut dyn Guest, ptr: i32) -> RuntimeResult<String> {
        if ptr == 0 {
            return Ok("[]".to_string());
        }
        memory::read_cstr(guest, ptr)
    }
}

fn read_table(guest: &mut dyn Guest, value: i32) -> RuntimeResult<HashMap<String, i32>> {
    let json = memory::dump_json(guest, value)?;
    guest.free(value)?;
    Ok(serde_json::from_str(&json)?)
}

#[cfg(test)]
pub(crate) mod testing {
    //! An in-process guest over a byte vector, with values kept host-side
    //! as JSON trees keyed by their guest address.

    use std::collections::HashMap;

    use opawasm_types::{AbiVersion, OpaResult};
    use serde_json::{json, Value};

    use crate::error::{RuntimeError, RuntimeResult};
    use crate::guest::Guest;
    use crate::memory::{self, PAGE_SIZE};

    const HEAP_START: i32 = 1024;

    pub struct FakeGuest {
        memory: Vec<u8>,
        max_pages: Option<usize>,
        heap: i32,
        values: HashMap<i32, Value>,
        contexts: HashMap<i32, [i32; 4]>,
        entrypoints: Value,
        pub calls: Vec<&'static str>,
    }

    impl FakeGuest {
        pub fn new() -> Self {
            Self {
                memory: vec![0; PAGE_SIZE],
                max_pages: None,
                heap: HEAP_START,
                values: HashMap::new(),
                contexts: HashMap::new(),
                entrypoints: json!({"main": 0, "other": 1}),
                calls: Vec::new(),
            }
        }

        pub fn with_max_pages(mut self, pages: usize) -> Self {
            self.max_pages = Some(pages);
            self
        }

        pub fn heap(&self) -> i32 {
            self.heap
        }

        pub fn count(&self, name: &str) -> usize {
            self.calls.iter().filter(|c| **c == name).count()
        }

        fn bump(&mut self, size: i32) -> RuntimeResult<i32> {
            let ptr = self.heap;
            memory::ensure_capacity(self, ptr, size as usize)?;
            self.heap += size;
            Ok(ptr)
        }

        fn store(&mut self, value: Value) -> RuntimeResult<i32> {
            let ptr = self.bump(4)?;
            self.values.insert(ptr, value);
            Ok(ptr)
        }

        fn parse(&mut self, ptr: i32, len: i32) -> RuntimeResult<i32> {
            let start = memory::offset(ptr);
            let text = self.memory[start..start + len as usize].to_vec();
            match serde_json::from_slice(&text) {
                Ok(value) => self.store(value),
                Err(_) => Ok(0),
            }
        }

        fn dump(&mut self, handle: i32) -> RuntimeResult<i32> {
            let text = self
                .values
                .get(&handle)
                .ok_or_else(|| RuntimeError::Evaluation(format!("no value at {handle}")))?
                .to_string();
            let ptr = self.bump(text.len() as i32 + 1)?;
            let mut bytes = text.into_bytes();
            bytes.push(0);
            memory::write_bytes(self, ptr, &bytes)?;
            Ok(ptr)
        }

        fn path(&self, handle: i32) -> Option<Vec<String>> {
            serde_json::from_value(self.values.get(&handle)?.clone()).ok()
        }

        fn result_set(&mut self, entrypoint: i32, input: i32, data: i32) -> RuntimeResult<i32> {
            let rows = json!([{
                "result": {
                    "entrypoint": entrypoint,
                    "input": self.values.get(&input).cloned().unwrap_or(Value::Null),
                    "data": self.values.get(&data).cloned().unwrap_or(Value::Null),
                }
            }]);
            self.store(rows)
        }

        fn add_path(&mut self, base: i32, path: i32, value: i32) -> OpaResult {
            let (Some(path), Some(value)) = (self.path(path), self.values.get(&value).cloned()) else {
                return OpaResult::InvalidType;
            };
            let Some((last, parents)) = path.split_last() else {
                return OpaResult::InvalidPath;
            };
            let Some(mut node) = self.values.get_mut(&base) else {
                return OpaResult::Internal;
            };
            for key in parents {
                let Some(object) = node.as_object_mut() else {
                    return OpaResult::InvalidPath;
                };
                node = object.entry(key.clone()).or_insert_with(|| json!({}));
            }
            match node.as_object_mut() {
                Some(object) => {
                    object.insert(last.clone(), value);
                    OpaResult::Ok
                }
                None => OpaResult::InvalidPath,
            }
        }

        fn remove_path(&mut self, base: i32, path: i32) -> OpaResult {
            let Some(path) = self.path(path) else {
                return OpaResult::InvalidType;
            };
            let Some((last, parents)) = path.split_last() else {
                return OpaResult::InvalidPath;
            };
            let Some(mut node) = self.values.get_mut(&base) else {
                return OpaResult::Internal;
            };
            for key in parents {
                match node.get_mut(key.as_str()) {
                    Some(child) => node = child,
                    None => return OpaResult::InvalidPath,
                }
            }
            match node.as_object_mut().and_then(|o| o.remove(last)) {
                Some(_) => OpaResult::Ok,
                None => OpaResult::InvalidPath,
            }
        }
    }

    impl Guest for FakeGuest {
        fn call(&mut self, name: &'static str, args: &[i32]) -> RuntimeResult<i32> {
            self.calls.push(name);
            let arg = |i: usize| args.get(i).copied().unwrap_or_default();
            match name {
                "opa_malloc" => self.bump(arg(0)),
                "opa_free" | "opa_value_free" => {
                    self.values.remove(&arg(0));
                    Ok(0)
                }
                "opa_json_parse" | "opa_value_parse" => self.parse(arg(0), arg(1)),
                "opa_json_dump" | "opa_value_dump" => self.dump(arg(0)),
                "opa_heap_ptr_get" => Ok(self.heap),
                "opa_heap_ptr_set" => {
                    self.heap = arg(0);
                    Ok(0)
                }
                "entrypoints" | "builtins" => {
                    let table = self.entrypoints.clone();
                    self.store(table)
                }
                "opa_value_add_path" => Ok(self.add_path(arg(0), arg(1), arg(2)).code()),
                "opa_value_remove_path" => Ok(self.remove_path(arg(0), arg(1)).code()),
                "opa_heap_blocks_stash" | "opa_heap_blocks_restore" | "opa_heap_stash_clear" => Ok(0),
                "opa_eval_ctx_new" => {
                    let ctx = self.bump(16)?;
                    self.contexts.insert(ctx, [0; 4]);
                    Ok(ctx)
                }
                "opa_eval_ctx_set_input" | "opa_eval_ctx_set_data" | "opa_eval_ctx_set_entrypoint" => {
                    let slot = match name {
                        "opa_eval_ctx_set_input" => 0,
                        "opa_eval_ctx_set_data" => 1,
                        _ => 2,
                    };
                    if let Some(ctx) = self.contexts.get_mut(&arg(0)) {
                        ctx[slot] = arg(1);
                    }
                    Ok(0)
                }
                "eval" => {
                    let [input, data, entrypoint, _] = self.contexts.get(&arg(0)).copied().unwrap_or_default();
                    let result = self.result_set(entrypoint, input, data)?;
                    if let Some(ctx) = self.contexts.get_mut(&arg(0)) {
                        ctx[3] = result;
                    }
                    Ok(0)
                }
                "opa_eval_ctx_get_result" => Ok(self.contexts.get(&arg(0)).map_or(0, |c| c[3])),
                "opa_eval" => {
                    self.heap = arg(5);
                    let input = self.parse(arg(3), arg(4))?;
                    let result = self.result_set(arg(1), input, arg(2))?;
                    self.dump(result)
                }
                other => Err(RuntimeError::ExportResolution {
                    version: AbiVersion::V1_3,
                    name: other.to_string(),
                }),
            }
        }

        fn memory(&self) -> &[u8] {
            &self.memory
        }

        fn memory_mut(&mut self) -> &mut [u8] {
            &mut self.memory
        }

        fn grow(&mut self, pages: u64) -> RuntimeResult<()> {
            let new_pages = self.memory.len() / PAGE_SIZE + pages as usize;
            if self.max_pages.is_some_and(|max| new_pages > max) {
                return Err(RuntimeError::OutOfMemory(format!("{new_pages} pages exceed the limit")));
            }
            self.memory.resize(new_pages * PAGE_SIZE, 0);
            Ok(())
        }
    }
}
