//! Conversion between standard JSON and the policy engine's native value
//! text.
//!
//! The two forms differ only in how sets are spelled:
//!
//! | value        | native        | JSON                          |
//! |--------------|---------------|-------------------------------|
//! | set `{1, 2}` | `{1,2}`       | `[{"__rego_set":[1,2]}]`      |
//! | empty set    | `set()`       | `[{"__rego_set":[]}]`         |
//! | empty object | `{}`          | `{}`                          |
//!
//! A `{` is an object when it is immediately closed or when its first
//! member is a string followed by `:`; otherwise it opens a set. The
//! [`Reader`] decides this with lookahead over the raw bytes and never
//! builds a tree; the [`Transcoder`] streams the reader's tokens into a
//! reusable output buffer.

pub mod error;
pub mod reader;
pub mod transcode;
mod writer;

pub use error::{CodecError, CodecResult};
pub use reader::{Reader, Token, MAX_DEPTH};
pub use transcode::{to_json, to_native, Transcoder};
