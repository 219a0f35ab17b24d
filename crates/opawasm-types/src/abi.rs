//! ABI version pair.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A `(major, minor)` ABI revision as declared by the
/// `opa_wasm_abi_version` / `opa_wasm_abi_minor_version` globals.
///
/// Ordering is lexicographic on `(major, minor)`, so `1.2 < 1.3 < 2.0`.
/// Serialized as the dotted string form (`"1.2"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AbiVersion {
    pub major: u32,
    pub minor: u32,
}

impl AbiVersion {
    pub const V1_0: Self = Self::new(1, 0);
    pub const V1_2: Self = Self::new(1, 2);
    pub const V1_3: Self = Self::new(1, 3);

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// The version actually spoken with a module: the lower of what the
    /// module declares and the caller's cap.
    pub fn negotiate(declared: Self, cap: Option<Self>) -> Self {
        match cap {
            Some(cap) => declared.min(cap),
            None => declared,
        }
    }
}

impl fmt::Display for AbiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Failure to parse a dotted version string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid ABI version '{0}', expected MAJOR.MINOR")]
pub struct AbiVersionError(pub String);

impl FromStr for AbiVersion {
    type Err = AbiVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s.split_once('.').unwrap_or((s, "0"));
        let parse = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| AbiVersionError(s.to_string()))
        };
        Ok(Self::new(parse(major)?, parse(minor)?))
    }
}

impl TryFrom<String> for AbiVersion {
    type Error = AbiVersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AbiVersion> for String {
    fn from(value: AbiVersion) -> Self {
        value.to_string()
    }
}
