//! Streaming tokenizer for native value text and JSON.
//!
//! The reader accepts both spellings of a set (brace syntax and the
//! reserved-key wrapper) and reports either as [`Token::SetStart`] /
//! [`Token::SetEnd`], or [`Token::EmptySet`]. Separators are validated and
//! consumed; they never surface as tokens.

use opawasm_types::SET_KEY;

use crate::error::{CodecError, CodecResult};

/// Deepest container nesting the reader accepts.
pub const MAX_DEPTH: usize = 64;

/// A semantic token. Strings and property names keep their quotes and
/// escapes exactly as they appeared in the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Null,
    /// A number or boolean literal.
    Value(&'a str),
    String(&'a str),
    PropertyName(&'a str),
    ObjectStart,
    ObjectEnd,
    ArrayStart,
    ArrayEnd,
    SetStart,
    SetEnd,
    EmptySet,
    Eof,
}

/// Raw lexical unit, before any object/set classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lexeme<'a> {
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Colon,
    Comma,
    Str(&'a str),
    Literal(&'a str),
    EmptySet,
    End,
}

impl Lexeme<'_> {
    fn describe(&self) -> String {
        match self {
            Lexeme::LBrace => "{".into(),
            Lexeme::RBrace => "}".into(),
            Lexeme::LBracket => "[".into(),
            Lexeme::RBracket => "]".into(),
            Lexeme::Colon => ":".into(),
            Lexeme::Comma => ",".into(),
            Lexeme::Str(s) | Lexeme::Literal(s) => (*s).to_string(),
            Lexeme::EmptySet => "set()".into(),
            Lexeme::End => "end of input".into(),
        }
    }
}

/// A lexeme with its start offset and the offset just past it.
#[derive(Debug, Clone, Copy)]
struct Lexed<'a> {
    lexeme: Lexeme<'a>,
    start: usize,
    end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Object,
    Array,
    /// `{a,b}`
    Set,
    /// `[{"__rego_set":[a,b]}]`
    WrappedSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Just opened; the container may close immediately.
    Start,
    /// A value must follow (after `:` in objects, after `,` in sequences).
    AwaitValue,
    /// A value was read; a separator or the closing bracket follows.
    AfterValue,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    kind: Kind,
    state: State,
}

/// Pull-based token reader over a byte slice.
pub struct Reader<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    stack: Vec<Frame>,
    /// The single top-level value has been read.
    done: bool,
}

impl<'a> Reader<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            stack: Vec::new(),
            done: false,
        }
    }

    /// Byte offset of the next unread character.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Current container nesting.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Read the next token. After the top-level value is complete this
    /// returns [`Token::Eof`], or an error if anything but whitespace
    /// remains.
    pub fn next_token(&mut self) -> CodecResult<Token<'a>> {
        loop {
            let Some(frame) = self.stack.last().copied() else {
                if self.done {
                    let next = self.advance()?;
                    return match next.lexeme {
                        Lexeme::End => Ok(Token::Eof),
                        other => Err(unexpected(other, next.start)),
                    };
                }
                return self.read_value();
            };

            match (frame.kind, frame.state) {
                (Kind::Object, State::Start) => {
                    let next = self.advance()?;
                    return match next.lexeme {
                        Lexeme::RBrace => Ok(self.close(Token::ObjectEnd)),
                        Lexeme::Str(name) => self.property_name(name),
                        other => Err(unexpected(other, next.start)),
                    };
                }
                (Kind::Object, State::AfterValue) => {
                    let next = self.advance()?;
                    return match next.lexeme {
                        Lexeme::RBrace => Ok(self.close(Token::ObjectEnd)),
                        Lexeme::Comma => {
                            let key = self.advance()?;
                            match key.lexeme {
                                Lexeme::Str(name) => self.property_name(name),
                                other => Err(unexpected(other, key.start)),
                            }
                        }
                        other => Err(unexpected(other, next.start)),
                    };
                }
                (_, State::AwaitValue) => return self.read_value(),
                (kind, state) => {
                    let next = self.peek(self.pos)?;
                    if self.is_closer(kind, next.lexeme) {
                        self.pos = next.end;
                        return self.close_sequence(kind);
                    }
                    if state == State::AfterValue {
                        if next.lexeme != Lexeme::Comma {
                            return Err(unexpected(next.lexeme, next.start));
                        }
                        self.pos = next.end;
                        self.set_state(State::AwaitValue);
                        continue;
                    }
                    return self.read_value();
                }
            }
        }
    }

    fn is_closer(&self, kind: Kind, lexeme: Lexeme<'_>) -> bool {
        matches!(
            (kind, lexeme),
            (Kind::Array | Kind::WrappedSet, Lexeme::RBracket) | (Kind::Set, Lexeme::RBrace)
        )
    }

    fn close_sequence(&mut self, kind: Kind) -> CodecResult<Token<'a>> {
        match kind {
            Kind::Array => Ok(self.close(Token::ArrayEnd)),
            Kind::Set => Ok(self.close(Token::SetEnd)),
            Kind::WrappedSet => {
                self.expect(Lexeme::RBrace)?;
                self.expect(Lexeme::RBracket)?;
                Ok(self.close(Token::SetEnd))
            }
            Kind::Object => Ok(self.close(Token::ObjectEnd)),
        }
    }

    fn property_name(&mut self, name: &'a str) -> CodecResult<Token<'a>> {
        self.expect(Lexeme::Colon)?;
        self.set_state(State::AwaitValue);
        Ok(Token::PropertyName(name))
    }

    fn read_value(&mut self) -> CodecResult<Token<'a>> {
        let next = self.advance()?;
        match next.lexeme {
            Lexeme::LBrace => {
                let kind = self.classify_brace()?;
                self.open(kind, next.start)?;
                Ok(if kind == Kind::Object {
                    Token::ObjectStart
                } else {
                    Token::SetStart
                })
            }
            Lexeme::LBracket => {
                if let Some(inner_end) = self.set_wrapper_at(self.pos)? {
                    self.pos = inner_end;
                    let after = self.peek(self.pos)?;
                    if after.lexeme == Lexeme::RBracket {
                        self.pos = after.end;
                        self.expect(Lexeme::RBrace)?;
                        self.expect(Lexeme::RBracket)?;
                        self.value_completed();
                        return Ok(Token::EmptySet);
                    }
                    self.open(Kind::WrappedSet, next.start)?;
                    return Ok(Token::SetStart);
                }
                self.open(Kind::Array, next.start)?;
                Ok(Token::ArrayStart)
            }
            Lexeme::Str(s) => {
                self.value_completed();
                Ok(Token::String(s))
            }
            Lexeme::Literal(lit) => {
                self.value_completed();
                Ok(if lit == "null" {
                    Token::Null
                } else {
                    Token::Value(lit)
                })
            }
            Lexeme::EmptySet => {
                self.value_completed();
                Ok(Token::EmptySet)
            }
            Lexeme::End => Err(CodecError::UnexpectedEnd {
                position: next.start,
            }),
            other => Err(unexpected(other, next.start)),
        }
    }

    /// Decide what the `{` just consumed opens.
    fn classify_brace(&self) -> CodecResult<Kind> {
        let first = self.peek(self.pos)?;
        match first.lexeme {
            Lexeme::RBrace => Ok(Kind::Object),
            Lexeme::Str(_) => {
                let second = self.peek(first.end)?;
                Ok(if second.lexeme == Lexeme::Colon {
                    Kind::Object
                } else {
                    Kind::Set
                })
            }
            _ => Ok(Kind::Set),
        }
    }

    /// If a complete `{"__rego_set":[...]}]` follows `pos`, return the
    /// offset just past the inner `[`. Arrays that merely start like a
    /// wrapper are read as plain arrays.
    fn set_wrapper_at(&self, pos: usize) -> CodecResult<Option<usize>> {
        let brace = self.peek(pos)?;
        if brace.lexeme != Lexeme::LBrace {
            return Ok(None);
        }
        let key = self.peek(brace.end)?;
        match key.lexeme {
            Lexeme::Str(s) if is_set_key(s) => {}
            _ => return Ok(None),
        }
        let colon = self.peek(key.end)?;
        if colon.lexeme != Lexeme::Colon {
            return Ok(None);
        }
        let inner = self.peek(colon.end)?;
        if inner.lexeme != Lexeme::LBracket {
            return Ok(None);
        }
        Ok(self.wrapper_closes(inner.end)?.then_some(inner.end))
    }

    /// Scan from just inside the wrapper's inner `[` to its matching `]`
    /// and check that `}]` follows.
    fn wrapper_closes(&self, mut pos: usize) -> CodecResult<bool> {
        let mut depth = 1usize;
        loop {
            let next = self.peek(pos)?;
            pos = next.end;
            match next.lexeme {
                Lexeme::LBrace | Lexeme::LBracket => depth += 1,
                Lexeme::RBrace | Lexeme::RBracket => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                Lexeme::End => return Ok(false),
                _ => {}
            }
        }
        let brace = self.peek(pos)?;
        if brace.lexeme != Lexeme::RBrace {
            return Ok(false);
        }
        Ok(self.peek(brace.end)?.lexeme == Lexeme::RBracket)
    }

    fn open(&mut self, kind: Kind, position: usize) -> CodecResult<()> {
        if self.stack.len() >= MAX_DEPTH {
            return Err(CodecError::MaxDepth { position });
        }
        self.stack.push(Frame {
            kind,
            state: State::Start,
        });
        Ok(())
    }

    fn close(&mut self, token: Token<'a>) -> Token<'a> {
        self.stack.pop();
        self.value_completed();
        token
    }

    fn value_completed(&mut self) {
        match self.stack.last_mut() {
            Some(frame) => frame.state = State::AfterValue,
            None => self.done = true,
        }
    }

    fn set_state(&mut self, state: State) {
        if let Some(frame) = self.stack.last_mut() {
            frame.state = state;
        }
    }

    fn expect(&mut self, wanted: Lexeme<'static>) -> CodecResult<()> {
        let next = self.advance()?;
        if next.lexeme == wanted {
            Ok(())
        } else {
            Err(unexpected(next.lexeme, next.start))
        }
    }

    fn advance(&mut self) -> CodecResult<Lexed<'a>> {
        let next = self.peek(self.pos)?;
        self.pos = next.end;
        Ok(next)
    }

    /// Lex one unit starting at `pos` without moving the cursor.
    fn peek(&self, pos: usize) -> CodecResult<Lexed<'a>> {
        let start = self.skip_whitespace(pos);
        let Some(&byte) = self.bytes.get(start) else {
            return Ok(Lexed {
                lexeme: Lexeme::End,
                start,
                end: start,
            });
        };

        let single = |lexeme| {
            Ok(Lexed {
                lexeme,
                start,
                end: start + 1,
            })
        };

        match byte {
            b'{' => single(Lexeme::LBrace),
            b'}' => single(Lexeme::RBrace),
            b'[' => single(Lexeme::LBracket),
            b']' => single(Lexeme::RBracket),
            b':' => single(Lexeme::Colon),
            b',' => single(Lexeme::Comma),
            b'"' => self.lex_string(start),
            _ => self.lex_literal(start),
        }
    }

    fn lex_string(&self, start: usize) -> CodecResult<Lexed<'a>> {
        let mut i = start + 1;
        while let Some(&b) = self.bytes.get(i) {
            match b {
                b'\\' => i += 2,
                b'"' => {
                    return Ok(Lexed {
                        lexeme: Lexeme::Str(&self.source[start..=i]),
                        start,
                        end: i + 1,
                    })
                }
                _ => i += 1,
            }
        }
        Err(CodecError::UnterminatedString { position: start })
    }

    fn lex_literal(&self, start: usize) -> CodecResult<Lexed<'a>> {
        let mut end = start;
        while let Some(&b) = self.bytes.get(end) {
            if is_delimiter(b) {
                break;
            }
            end += 1;
        }
        // `end` only ever stops on an ASCII delimiter or the end of input,
        // so the slice is on a char boundary.
        let literal = &self.source[start..end];
        let lexeme = match literal {
            "null" | "true" | "false" => Lexeme::Literal(literal),
            "set()" => Lexeme::EmptySet,
            _ if is_number(literal) => Lexeme::Literal(literal),
            _ => {
                return Err(CodecError::InvalidLiteral {
                    literal: literal.to_string(),
                    position: start,
                })
            }
        };
        Ok(Lexed { lexeme, start, end })
    }

    fn skip_whitespace(&self, mut pos: usize) -> usize {
        while self
            .bytes
            .get(pos)
            .is_some_and(|b| b.is_ascii_whitespace())
        {
            pos += 1;
        }
        pos
    }
}

fn is_delimiter(b: u8) -> bool {
    b.is_ascii_whitespace() || matches!(b, b'{' | b'}' | b'[' | b']' | b':' | b',' | b'"')
}

fn is_number(literal: &str) -> bool {
    let mut chars = literal.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c == '-' || c.is_ascii_digit());
    first_ok
        && literal.chars().any(|c| c.is_ascii_digit())
        && chars.all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
}

fn is_set_key(quoted: &str) -> bool {
    quoted
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .is_some_and(|s| s == SET_KEY)
}

fn unexpected(lexeme: Lexeme<'_>, position: usize) -> CodecError {
    match lexeme {
        Lexeme::End => CodecError::UnexpectedEnd { position },
        other => CodecError::UnexpectedToken {
            found: other.describe(),
            position,
        },
    }
}
