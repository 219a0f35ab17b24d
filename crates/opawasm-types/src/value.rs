//! Value encodings and the reserved set wrapper.

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Object key that marks a set in the JSON-side representation:
/// `[{"__rego_set": [...]}]`.
pub const SET_KEY: &str = "__rego_set";

/// Textual encoding of a guest value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueFormat {
    /// Plain JSON. Sets degrade to arrays.
    #[default]
    Json,
    /// Native value text. Sets survive (as brace syntax in the guest,
    /// as the [`SET_KEY`] wrapper once converted to JSON).
    Value,
}

impl ValueFormat {
    /// Output-format flag passed to `opa_eval`.
    pub fn as_flag(self) -> i32 {
        match self {
            ValueFormat::Json => 0,
            ValueFormat::Value => 1,
        }
    }
}

/// Result code of `opa_value_add_path` / `opa_value_remove_path`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpaResult {
    Ok,
    Internal,
    InvalidType,
    InvalidPath,
    /// A code this runtime does not know.
    Other(i32),
}

impl OpaResult {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => OpaResult::Ok,
            1 => OpaResult::Internal,
            2 => OpaResult::InvalidType,
            3 => OpaResult::InvalidPath,
            other => OpaResult::Other(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            OpaResult::Ok => 0,
            OpaResult::Internal => 1,
            OpaResult::InvalidType => 2,
            OpaResult::InvalidPath => 3,
            OpaResult::Other(code) => code,
        }
    }

    pub fn is_ok(self) -> bool {
        self == OpaResult::Ok
    }
}

impl fmt::Display for OpaResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpaResult::Ok => write!(f, "Ok"),
            OpaResult::Internal => write!(f, "Internal"),
            OpaResult::InvalidType => write!(f, "InvalidType"),
            OpaResult::InvalidPath => write!(f, "InvalidPath"),
            OpaResult::Other(code) => write!(f, "Unknown({code})"),
        }
    }
}

/// A set value as seen through JSON: serializes to and from the
/// `[{"__rego_set": [...]}]` wrapper.
///
/// Element order is whatever the producer emitted; sets carry no order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegoSet<T>(pub Vec<T>);

impl<T> RegoSet<T> {
    pub fn into_vec(self) -> Vec<T> {
        self.0
    }
}

impl<T> FromIterator<T> for RegoSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        RegoSet(iter.into_iter().collect())
    }
}

struct Wrapper<'a, T>(&'a [T]);

impl<T: Serialize> Serialize for Wrapper<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(SET_KEY, self.0)?;
        map.end()
    }
}

impl<T: Serialize> Serialize for RegoSet<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(1))?;
        seq.serialize_element(&Wrapper(&self.0))?;
        seq.end()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for RegoSet<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut outer = Vec::<BTreeMap<String, Vec<T>>>::deserialize(deserializer)?;
        if outer.len() != 1 {
            return Err(de::Error::invalid_length(outer.len(), &"a single set wrapper"));
        }
        let mut wrapper = outer.remove(0);
        if wrapper.len() != 1 {
            return Err(de::Error::custom(format!("expected only the '{SET_KEY}' key")));
        }
        wrapper
            .remove(SET_KEY)
            .map(RegoSet)
            .ok_or_else(|| de::Error::missing_field(SET_KEY))
    }
}
