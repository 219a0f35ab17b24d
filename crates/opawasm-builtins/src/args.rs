//! Lazily materialized built-in arguments.

use opawasm_types::ValueFormat;
use serde::de::DeserializeOwned;

use crate::error::{BuiltinError, BuiltinResult};

/// Where argument text comes from: the guest's memory, reached through
/// its dump exports.
pub trait ArgSource {
    /// Dump the guest value at `ptr` in `format`, returned as JSON text.
    /// For [`ValueFormat::Value`] sets come back as the reserved-key
    /// wrapper; for [`ValueFormat::Json`] they come back as arrays.
    fn read_arg(&mut self, ptr: i32, format: ValueFormat) -> BuiltinResult<String>;
}

#[derive(Debug, Clone)]
struct Slot {
    ptr: i32,
    json: Option<String>,
    value: Option<String>,
}

/// The arguments of one built-in call.
///
/// Each argument is a guest pointer until first read. Reads are cached per
/// format, so asking twice does not dump twice.
pub struct BuiltinArgs<'s> {
    source: &'s mut dyn ArgSource,
    slots: Vec<Slot>,
    format: ValueFormat,
}

impl<'s> BuiltinArgs<'s> {
    pub fn new(source: &'s mut dyn ArgSource, ptrs: &[i32]) -> Self {
        Self {
            source,
            slots: ptrs
                .iter()
                .map(|&ptr| Slot {
                    ptr,
                    json: None,
                    value: None,
                })
                .collect(),
            format: ValueFormat::Json,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Guest pointer of argument `index`.
    pub fn ptr(&self, index: usize) -> Option<i32> {
        self.slots.get(index).map(|s| s.ptr)
    }

    /// Format used by [`BuiltinArgs::get`].
    pub fn format(&self) -> ValueFormat {
        self.format
    }

    pub fn set_format(&mut self, format: ValueFormat) {
        self.format = format;
    }

    /// Raw JSON text of argument `index` in `format`.
    pub fn raw(&mut self, index: usize, format: ValueFormat) -> BuiltinResult<&str> {
        let count = self.slots.len();
        let Some(slot) = self.slots.get_mut(index) else {
            return Err(BuiltinError::failed(format!(
                "argument {index} out of range, call has {count} arguments"
            )));
        };
        let cached = match format {
            ValueFormat::Json => &mut slot.json,
            ValueFormat::Value => &mut slot.value,
        };
        if cached.is_none() {
            *cached = Some(self.source.read_arg(slot.ptr, format)?);
        }
        Ok(cached.as_deref().unwrap_or_default())
    }

    /// Decode argument `index` in the call's default format.
    pub fn get<T: DeserializeOwned>(&mut self, index: usize) -> BuiltinResult<T> {
        let format = self.format;
        self.decode(index, format)
    }

    /// Decode argument `index` from its JSON dump.
    pub fn json<T: DeserializeOwned>(&mut self, index: usize) -> BuiltinResult<T> {
        self.decode(index, ValueFormat::Json)
    }

    /// Decode argument `index` from its native value dump, keeping sets.
    pub fn value<T: DeserializeOwned>(&mut self, index: usize) -> BuiltinResult<T> {
        self.decode(index, ValueFormat::Value)
    }

    fn decode<T: DeserializeOwned>(&mut self, index: usize, format: ValueFormat) -> BuiltinResult<T> {
        let text = self.raw(index, format)?;
        serde_json::from_str(text).map_err(|e| {
            BuiltinError::failed(format!("argument {index}: {e}"))
        })
    }
}
