//! Buffer-reusing conversion entry points.

use std::cell::RefCell;

use crate::error::CodecResult;
use crate::reader::{Reader, Token};
use crate::writer::{Depth, Target, Writer};

/// Owns the output buffer and separator stack so repeated conversions
/// reuse their allocations. Buffers only grow.
#[derive(Debug, Default)]
pub struct Transcoder {
    out: String,
    depths: Vec<Depth>,
}

impl Transcoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert native value text to JSON; sets become the reserved-key
    /// wrapper. The returned slice is valid until the next call.
    pub fn to_json(&mut self, native: &str) -> CodecResult<&str> {
        self.run(native, Target::Json)
    }

    /// Convert JSON to native value text; set wrappers collapse back to
    /// brace syntax.
    pub fn to_native(&mut self, json: &str) -> CodecResult<&str> {
        self.run(json, Target::Native)
    }

    /// Current buffer capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.out.capacity()
    }

    fn run(&mut self, input: &str, target: Target) -> CodecResult<&str> {
        let mut reader = Reader::new(input);
        let mut writer = Writer::new(&mut self.out, &mut self.depths, target);
        loop {
            let token = reader.next_token()?;
            if token == Token::Eof {
                break;
            }
            writer.write(token);
        }
        Ok(&self.out)
    }
}

thread_local! {
    static POOL: RefCell<Transcoder> = RefCell::new(Transcoder::new());
}

/// Convert native value text to JSON using a per-thread buffer.
pub fn to_json(native: &str) -> CodecResult<String> {
    POOL.with_borrow_mut(|t| t.to_json(native).map(str::to_owned))
}

/// Convert JSON to native value text using a per-thread buffer.
pub fn to_native(json: &str) -> CodecResult<String> {
    POOL.with_borrow_mut(|t| t.to_native(json).map(str::to_owned))
}
