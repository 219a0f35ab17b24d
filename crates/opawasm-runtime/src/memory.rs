//! Reads and writes against guest linear memory.
//!
//! Pointers are guest `i32`s and are reinterpreted as unsigned offsets.
//! Memory only ever grows, one 64 KiB page at a time.

use crate::error::{RuntimeError, RuntimeResult};
use crate::exports::OpaExports;
use crate::guest::Guest;

pub const PAGE_SIZE: usize = 65536;

pub(crate) fn offset(ptr: i32) -> usize {
    ptr as u32 as usize
}

/// Pages to add so that `end` bytes fit into `current_len` bytes of memory.
pub fn pages_needed(current_len: usize, end: usize) -> u64 {
    if end <= current_len {
        0
    } else {
        (end - current_len).div_ceil(PAGE_SIZE) as u64
    }
}

/// Grow memory so that `len` bytes starting at `ptr` are addressable.
pub fn ensure_capacity<G: Guest + ?Sized>(guest: &mut G, ptr: i32, len: usize) -> RuntimeResult<()> {
    let end = offset(ptr)
        .checked_add(len)
        .ok_or_else(|| RuntimeError::OutOfMemory(format!("write of {len} bytes at {ptr} overflows")))?;
    let current = guest.memory().len();
    let pages = pages_needed(current, end);
    if pages > 0 {
        tracing::debug!(pages, current_bytes = current, required_bytes = end, "growing guest memory");
        guest.grow(pages)?;
    }
    Ok(())
}

/// Copy `bytes` to `ptr`, growing memory first if needed. Returns the
/// number of bytes written.
pub fn write_bytes<G: Guest + ?Sized>(guest: &mut G, ptr: i32, bytes: &[u8]) -> RuntimeResult<usize> {
    ensure_capacity(guest, ptr, bytes.len())?;
    let start = offset(ptr);
    guest.memory_mut()[start..start + bytes.len()].copy_from_slice(bytes);
    Ok(bytes.len())
}

/// Read the NUL-terminated UTF-8 string at `ptr`.
pub fn read_cstr<G: Guest + ?Sized>(guest: &G, ptr: i32) -> RuntimeResult<String> {
    let data = guest.memory();
    let start = offset(ptr);
    let tail = data.get(start..).ok_or_else(|| {
        RuntimeError::Evaluation(format!("pointer {ptr} is outside guest memory of {} bytes", data.len()))
    })?;
    let len = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| RuntimeError::Evaluation(format!("string at {ptr} is not terminated")))?;
    std::str::from_utf8(&tail[..len])
        .map(str::to_string)
        .map_err(|e| RuntimeError::Evaluation(format!("string at {ptr} is not UTF-8: {e}")))
}

/// Allocate guest memory for `bytes` and copy them in.
pub fn alloc_bytes<G: Guest + ?Sized>(guest: &mut G, bytes: &[u8]) -> RuntimeResult<i32> {
    let ptr = guest.malloc(bytes.len())?;
    write_bytes(guest, ptr, bytes)?;
    Ok(ptr)
}

/// Copy JSON text into the guest and parse it into a guest value.
pub fn parse_json<G: Guest + ?Sized>(guest: &mut G, json: &[u8]) -> RuntimeResult<i32> {
    let ptr = alloc_bytes(guest, json)?;
    guest.json_parse(ptr, json.len())
}

/// Copy native value text into the guest and parse it.
pub fn parse_value<G: Guest + ?Sized>(guest: &mut G, text: &[u8]) -> RuntimeResult<i32> {
    let ptr = alloc_bytes(guest, text)?;
    guest.value_parse(ptr, text.len())
}

/// Dump a guest value as JSON text.
pub fn dump_json<G: Guest + ?Sized>(guest: &mut G, value: i32) -> RuntimeResult<String> {
    let ptr = guest.json_dump(value)?;
    read_cstr(guest, ptr)
}

/// Dump a guest value as native value text.
pub fn dump_value<G: Guest + ?Sized>(guest: &mut G, value: i32) -> RuntimeResult<String> {
    let ptr = guest.value_dump(value)?;
    read_cstr(guest, ptr)
}
