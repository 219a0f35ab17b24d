//! Default built-in library.
//!
//! Covers the built-ins a compiled policy most often leaves to its host.
//! Everything else reports [`BuiltinError::NotImplemented`].

use std::fmt::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::args::BuiltinArgs;
use crate::context::BuiltinContext;
use crate::error::{BuiltinError, BuiltinResult};
use crate::imports::OpaImports;

type DefaultFn = fn(&mut DefaultImports, &mut BuiltinArgs<'_>) -> BuiltinResult<Option<Value>>;

/// The stock [`OpaImports`] implementation.
#[derive(Debug, Default)]
pub struct DefaultImports {
    /// `time.now_ns` is fixed for the duration of one evaluation.
    now_ns: Option<i64>,
}

impl DefaultImports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` with `arity` arguments is provided.
    pub fn supports(name: &str, arity: usize) -> bool {
        Self::lookup(&format!("{name}.{arity}")).is_some()
    }

    fn lookup(key: &str) -> Option<DefaultFn> {
        let func: DefaultFn = match key {
            "time.now_ns.0" => Self::time_now_ns,
            "crypto.sha256.1" => Self::crypto_sha256,
            "hex.encode.1" => Self::hex_encode,
            "hex.decode.1" => Self::hex_decode,
            "strings.reverse.1" => Self::strings_reverse,
            "strings.any_prefix_match.2" => Self::strings_any_prefix_match,
            "strings.any_suffix_match.2" => Self::strings_any_suffix_match,
            "units.parse_bytes.1" => Self::units_parse_bytes,
            "numbers.range_step.3" => Self::numbers_range_step,
            "object.subset.2" => Self::object_subset,
            "json.is_valid.1" => Self::json_is_valid,
            "opa.runtime.0" => Self::opa_runtime,
            _ => return None,
        };
        Some(func)
    }

    // ── time ─────────────────────────────────────────────────────────────

    fn time_now_ns(&mut self, _: &mut BuiltinArgs<'_>) -> BuiltinResult<Option<Value>> {
        let now = match self.now_ns {
            Some(now) => now,
            None => {
                let elapsed = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_err(|e| BuiltinError::failed(e.to_string()))?;
                let now = i64::try_from(elapsed.as_nanos())
                    .map_err(|_| BuiltinError::failed("time.now_ns: clock out of range"))?;
                *self.now_ns.insert(now)
            }
        };
        Ok(Some(Value::from(now)))
    }

    // ── crypto / encoding ────────────────────────────────────────────────

    fn crypto_sha256(&mut self, args: &mut BuiltinArgs<'_>) -> BuiltinResult<Option<Value>> {
        let input: String = args.json(0)?;
        let digest = Sha256::digest(input.as_bytes());
        Ok(Some(Value::String(to_hex(&digest))))
    }

    fn hex_encode(&mut self, args: &mut BuiltinArgs<'_>) -> BuiltinResult<Option<Value>> {
        let input: String = args.json(0)?;
        Ok(Some(Value::String(to_hex(input.as_bytes()))))
    }

    fn hex_decode(&mut self, args: &mut BuiltinArgs<'_>) -> BuiltinResult<Option<Value>> {
        let input: String = args.json(0)?;
        let bytes = from_hex(&input)?;
        let text = String::from_utf8(bytes)
            .map_err(|_| BuiltinError::failed("hex.decode: result is not valid UTF-8"))?;
        Ok(Some(Value::String(text)))
    }

    // ── strings ──────────────────────────────────────────────────────────

    fn strings_reverse(&mut self, args: &mut BuiltinArgs<'_>) -> BuiltinResult<Option<Value>> {
        let input: String = args.json(0)?;
        Ok(Some(Value::String(input.chars().rev().collect())))
    }

    fn strings_any_prefix_match(
        &mut self,
        args: &mut BuiltinArgs<'_>,
    ) -> BuiltinResult<Option<Value>> {
        any_match(args, "strings.any_prefix_match", |s, p| s.starts_with(p))
    }

    fn strings_any_suffix_match(
        &mut self,
        args: &mut BuiltinArgs<'_>,
    ) -> BuiltinResult<Option<Value>> {
        any_match(args, "strings.any_suffix_match", |s, p| s.ends_with(p))
    }

    // ── numbers / units ──────────────────────────────────────────────────

    fn units_parse_bytes(&mut self, args: &mut BuiltinArgs<'_>) -> BuiltinResult<Option<Value>> {
        let input: String = args.json(0)?;
        Ok(Some(Value::from(parse_bytes(&input)?)))
    }

    fn numbers_range_step(&mut self, args: &mut BuiltinArgs<'_>) -> BuiltinResult<Option<Value>> {
        let start: i64 = args.json(0)?;
        let end: i64 = args.json(1)?;
        let step: i64 = args.json(2)?;
        if step <= 0 {
            return Err(BuiltinError::failed(
                "numbers.range_step: step must be a positive number above zero",
            ));
        }
        let mut out = Vec::new();
        let mut n = start;
        if start <= end {
            while n <= end {
                out.push(Value::from(n));
                match n.checked_add(step) {
                    Some(next) => n = next,
                    None => break,
                }
            }
        } else {
            while n >= end {
                out.push(Value::from(n));
                match n.checked_sub(step) {
                    Some(next) => n = next,
                    None => break,
                }
            }
        }
        Ok(Some(Value::Array(out)))
    }

    // ── objects / json ───────────────────────────────────────────────────

    fn object_subset(&mut self, args: &mut BuiltinArgs<'_>) -> BuiltinResult<Option<Value>> {
        let sup: Value = args.json(0)?;
        let sub: Value = args.json(1)?;
        Ok(Some(Value::Bool(is_subset(&sup, &sub))))
    }

    fn json_is_valid(&mut self, args: &mut BuiltinArgs<'_>) -> BuiltinResult<Option<Value>> {
        let input: String = args.json(0)?;
        let valid = serde_json::from_str::<Value>(&input).is_ok();
        Ok(Some(Value::Bool(valid)))
    }

    fn opa_runtime(&mut self, _: &mut BuiltinArgs<'_>) -> BuiltinResult<Option<Value>> {
        Ok(Some(json!({
            "env": Map::new(),
            "version": env!("CARGO_PKG_VERSION"),
        })))
    }
}

impl OpaImports for DefaultImports {
    fn call(
        &mut self,
        context: &BuiltinContext,
        args: &mut BuiltinArgs<'_>,
    ) -> BuiltinResult<Option<Value>> {
        let key = format!("{}.{}", context.function_name, args.len());
        let func = Self::lookup(&key).ok_or(BuiltinError::NotImplemented { name: key })?;
        func(self, args)
    }

    fn reset(&mut self) {
        self.now_ns = None;
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn from_hex(input: &str) -> BuiltinResult<Vec<u8>> {
    if input.len() % 2 != 0 {
        return Err(BuiltinError::failed("hex.decode: odd length input"));
    }
    (0..input.len())
        .step_by(2)
        .map(|i| {
            input
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| BuiltinError::failed(format!("hex.decode: invalid byte at {i}")))
        })
        .collect()
}

/// Strings from a string, array of strings, or (flattened) set of strings.
fn string_list(value: Value, builtin: &str) -> BuiltinResult<Vec<String>> {
    match value {
        Value::String(s) => Ok(vec![s]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(BuiltinError::failed(format!(
                    "{builtin}: expected string element, got {other}"
                ))),
            })
            .collect(),
        other => Err(BuiltinError::failed(format!(
            "{builtin}: expected string, array or set, got {other}"
        ))),
    }
}

fn any_match(
    args: &mut BuiltinArgs<'_>,
    builtin: &str,
    matches: fn(&str, &str) -> bool,
) -> BuiltinResult<Option<Value>> {
    let search = string_list(args.json(0)?, builtin)?;
    let base = string_list(args.json(1)?, builtin)?;
    let found = search
        .iter()
        .any(|s| base.iter().any(|b| matches(s, b)));
    Ok(Some(Value::Bool(found)))
}

fn parse_bytes(input: &str) -> BuiltinResult<u64> {
    let trimmed = input.trim().trim_matches('"').to_ascii_lowercase();
    if trimmed.is_empty() {
        return Err(BuiltinError::failed(
            "units.parse_bytes: no byte amount provided",
        ));
    }
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let amount: f64 = number.parse().map_err(|_| {
        BuiltinError::failed(format!("units.parse_bytes: could not parse amount in '{input}'"))
    })?;
    let unit = unit.trim();
    let unit = unit.strip_suffix('b').unwrap_or(unit);
    let multiplier: f64 = match unit {
        "" => 1.0,
        "k" => 1e3,
        "ki" => 1024.0,
        "m" => 1e6,
        "mi" => 1024f64.powi(2),
        "g" => 1e9,
        "gi" => 1024f64.powi(3),
        "t" => 1e12,
        "ti" => 1024f64.powi(4),
        "p" => 1e15,
        "pi" => 1024f64.powi(5),
        "e" => 1e18,
        "ei" => 1024f64.powi(6),
        other => {
            return Err(BuiltinError::failed(format!(
                "units.parse_bytes: unknown unit '{other}'"
            )))
        }
    };
    // Fractional bytes are truncated.
    Ok((amount * multiplier) as u64)
}

/// Objects match key-wise and recursively; arrays match when `sub` is a
/// subsequence of `sup`; anything else must be equal.
fn is_subset(sup: &Value, sub: &Value) -> bool {
    match (sup, sub) {
        (Value::Object(sup), Value::Object(sub)) => sub
            .iter()
            .all(|(k, v)| sup.get(k).is_some_and(|s| is_subset(s, v))),
        (Value::Array(sup), Value::Array(sub)) => {
            let mut rest = sup.iter();
            sub.iter().all(|want| rest.any(|have| have == want))
        }
        _ => sup == sub,
    }
}
