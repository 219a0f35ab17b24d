//! Token sink that re-inserts separators and spells sets for one target.

use opawasm_types::SET_KEY;

use crate::reader::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    Json,
    Native,
}

/// Per-depth separator bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Depth {
    count: usize,
    after_key: bool,
}

pub(crate) struct Writer<'b> {
    out: &'b mut String,
    depths: &'b mut Vec<Depth>,
    target: Target,
}

impl<'b> Writer<'b> {
    pub(crate) fn new(out: &'b mut String, depths: &'b mut Vec<Depth>, target: Target) -> Self {
        out.clear();
        depths.clear();
        Self { out, depths, target }
    }

    pub(crate) fn write(&mut self, token: Token<'_>) {
        match token {
            Token::Null => {
                self.begin_value();
                self.out.push_str("null");
            }
            Token::Value(text) | Token::String(text) => {
                self.begin_value();
                self.out.push_str(text);
            }
            Token::PropertyName(name) => {
                if let Some(depth) = self.depths.last_mut() {
                    if depth.count > 0 {
                        self.out.push(',');
                    }
                    depth.count += 1;
                    depth.after_key = true;
                }
                self.out.push_str(name);
                self.out.push(':');
            }
            Token::ObjectStart => self.open("{"),
            Token::ArrayStart => self.open("["),
            Token::SetStart => match self.target {
                Target::Json => {
                    self.begin_value();
                    self.out.push_str("[{\"");
                    self.out.push_str(SET_KEY);
                    self.out.push_str("\":[");
                    self.depths.push(Depth::default());
                }
                Target::Native => self.open("{"),
            },
            Token::ObjectEnd => self.close("}"),
            Token::ArrayEnd => self.close("]"),
            Token::SetEnd => match self.target {
                Target::Json => self.close("]}]"),
                Target::Native => self.close("}"),
            },
            Token::EmptySet => {
                self.begin_value();
                match self.target {
                    Target::Json => {
                        self.out.push_str("[{\"");
                        self.out.push_str(SET_KEY);
                        self.out.push_str("\":[]}]");
                    }
                    Target::Native => self.out.push_str("set()"),
                }
            }
            Token::Eof => {}
        }
    }

    fn open(&mut self, bracket: &str) {
        self.begin_value();
        self.out.push_str(bracket);
        self.depths.push(Depth::default());
    }

    fn close(&mut self, bracket: &str) {
        self.depths.pop();
        self.out.push_str(bracket);
    }

    fn begin_value(&mut self) {
        let Some(depth) = self.depths.last_mut() else {
            return;
        };
        if depth.after_key {
            depth.after_key = false;
        } else {
            if depth.count > 0 {
                self.out.push(',');
            }
            depth.count += 1;
        }
    }
}
