//! Decoder for the shell's `-quote -header` output.
//!
//! The decoder is a token-level state machine. Its whole state lives in the
//! struct, so output can be pushed in arbitrary pieces (down to single
//! bytes) and decoding resumes exactly where the previous piece ended.
//!
//! Grammar, one field at a time (fields end at `,`, rows at `\n`):
//!
//! | Input | Value |
//! |-------|-------|
//! | `'it''s'` | `Text("it's")` |
//! | `NULL` | `Null` |
//! | `X'48690a'` | `Blob([0x48, 0x69, 0x0a])` |
//! | `-42` | `Integer(-42)` |
//! | `2.5`, `1.5e+03` | `Real` |
//! | `unistr('a\u000db')` | `Text("a\rb")` |
//!
//! Newer shells switch a string to the `unistr('...')` form when it holds
//! control characters other than a line break. Inside it a backslash starts
//! an escape: `\\`, `\uXXXX`, `\+XXXXXX`, `\UXXXXXXXX` or `\XXXX`.
//!
//! A line starting with `Parse error`, `Runtime error` or `Error` is a
//! failure reported by the shell; the rest of the line is its message.
//! The first row of every result set is the header and fills
//! [`RowDecoder::columns`] instead of producing a row.

use crate::error::{DecodeError, FailureKind};
use crate::value::Value;

const NULL: &[u8] = b"NULL";
const UNISTR: &[u8] = b"unistr('";

/// One decoding event.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// The header row is complete; column names are available.
    Header,
    /// A data row.
    Row(Vec<Value>),
    /// The shell reported an error; the request is over.
    Failure { kind: FailureKind, message: String },
    /// Everything pushed so far has been consumed.
    NeedInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    /// Start of a field
    None,
    /// Inside a quoted string
    Str,
    /// Quote seen inside a string: escaped quote or end of string
    StrQuote,
    /// `X` seen, opening quote expected
    BlobPrefix,
    /// Hex digits
    Blob,
    /// Closing quote of a blob seen
    BlobEnd,
    /// Leading `+`/`-`
    Sign,
    /// Integer digits
    Integer,
    /// Digits after `.`
    Decimal,
    /// `e` seen, exponent sign or digit expected
    ExpSign,
    /// Exponent digits
    Exponent,
    /// Partway through `NULL`
    Null,
    /// Partway through `unistr('`
    UnistrPrefix,
    /// Inside a `unistr` string
    Unistr,
    /// Quote seen inside a `unistr` string: escaped quote or end of string
    UnistrQuote,
    /// Backslash seen inside a `unistr` string
    UnistrEscape,
    /// Hex digits of a code point still expected
    UnistrHex(u8),
    /// Closing parenthesis seen
    UnistrEnd,
    /// Error line: prefix being matched, then message text
    Failure(FailureKind),
}

/// Re-entrant decoder for the output of one request.
#[derive(Debug, Clone)]
pub struct RowDecoder {
    token: Token,
    /// received but not yet processed bytes live at `buf[pos..]`
    buf: Vec<u8>,
    pos: usize,
    /// absolute offset of `buf[0]` in the request's output
    base: usize,
    /// string bytes, numeric literal or error text
    text: Vec<u8>,
    blob: Vec<u8>,
    nibble: Option<u8>,
    /// code point of a `unistr` escape being read
    code: u32,
    /// characters of `NULL` or of an error prefix matched so far
    matched: usize,
    values: Vec<Value>,
    names: Vec<String>,
    /// rows completed, header included
    rows: usize,
}

impl Default for RowDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RowDecoder {
    pub fn new() -> Self {
        Self {
            token: Token::None,
            buf: Vec::new(),
            pos: 0,
            base: 0,
            text: Vec::new(),
            blob: Vec::new(),
            nibble: None,
            code: 0,
            matched: 0,
            values: Vec::new(),
            names: Vec::new(),
            rows: 0,
        }
    }

    /// Append output received from the shell.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.base += self.pos;
            self.pos = 0;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Column names from the header row; empty until [`Step::Header`].
    pub fn columns(&self) -> &[String] {
        &self.names
    }

    /// Whether the header row has been decoded.
    pub fn has_header(&self) -> bool {
        self.rows > 0
    }

    /// Data rows decoded so far.
    pub fn data_rows(&self) -> usize {
        self.rows.saturating_sub(1)
    }

    /// Check that the output ended on a row boundary.
    pub fn finish(&self) -> Result<(), DecodeError> {
        if self.token == Token::None && self.values.is_empty() && self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(DecodeError {
                reason: "output ended inside a row".to_string(),
                byte: None,
                offset: self.base + self.pos,
                buffer: self.buf.clone(),
            })
        }
    }

    /// Decode until the next event or until the pushed input runs out.
    pub fn step(&mut self) -> Result<Step, DecodeError> {
        while self.pos < self.buf.len() {
            let c = self.buf[self.pos];
            self.pos += 1;
            if let Some(step) = self.advance(c)? {
                return Ok(step);
            }
        }
        Ok(Step::NeedInput)
    }

    fn advance(&mut self, c: u8) -> Result<Option<Step>, DecodeError> {
        match self.token {
            Token::None => match c {
                b'\'' => self.token = Token::Str,
                b'X' | b'x' => self.token = Token::BlobPrefix,
                b'N' => {
                    self.matched = 1;
                    self.token = Token::Null;
                }
                b'u' => {
                    self.matched = 1;
                    self.token = Token::UnistrPrefix;
                }
                b'-' | b'+' => {
                    self.text.push(c);
                    self.token = Token::Sign;
                }
                b'0'..=b'9' => {
                    self.text.push(c);
                    self.token = Token::Integer;
                }
                b'.' => {
                    self.text.push(c);
                    self.token = Token::Decimal;
                }
                b'P' if self.values.is_empty() => self.start_failure(FailureKind::Parse, c),
                b'R' if self.values.is_empty() => self.start_failure(FailureKind::Runtime, c),
                b'E' if self.values.is_empty() => self.start_failure(FailureKind::Generic, c),
                b',' => return Err(self.error("expecting something before comma", c)),
                _ => return Err(self.error("expecting a number or a string", c)),
            },
            Token::Str => match c {
                b'\'' => self.token = Token::StrQuote,
                _ => self.text.push(c),
            },
            Token::StrQuote => match c {
                b'\'' => {
                    self.text.push(c);
                    self.token = Token::Str;
                }
                b',' | b'\n' => {
                    let text = String::from_utf8_lossy(&self.text).into_owned();
                    self.text.clear();
                    return Ok(self.end_field(Value::Text(text), c));
                }
                _ => return Err(self.error("expecting a comma or line break after string", c)),
            },
            Token::BlobPrefix => match c {
                b'\'' => {
                    self.blob.clear();
                    self.nibble = None;
                    self.token = Token::Blob;
                }
                _ => return Err(self.error("expecting a quote after X", c)),
            },
            Token::Blob => match c {
                b'\'' if self.nibble.is_none() => self.token = Token::BlobEnd,
                b'\'' => return Err(self.error("odd number of hex digits in blob", c)),
                _ => {
                    let Some(digit) = hex_value(c) else {
                        return Err(self.error("expecting a hex digit or a quote", c));
                    };
                    match self.nibble.take() {
                        Some(high) => self.blob.push(high << 4 | digit),
                        None => self.nibble = Some(digit),
                    }
                }
            },
            Token::BlobEnd => match c {
                b',' | b'\n' => {
                    let blob = std::mem::take(&mut self.blob);
                    return Ok(self.end_field(Value::Blob(blob), c));
                }
                _ => return Err(self.error("expecting a comma or line break after blob", c)),
            },
            Token::Sign => match c {
                b'0'..=b'9' => {
                    self.text.push(c);
                    self.token = Token::Integer;
                }
                b'.' => {
                    self.text.push(c);
                    self.token = Token::Decimal;
                }
                _ => return Err(self.error("expecting a digit after sign", c)),
            },
            Token::Integer => match c {
                b'0'..=b'9' => self.text.push(c),
                b'.' => {
                    self.text.push(c);
                    self.token = Token::Decimal;
                }
                b'e' | b'E' => {
                    self.text.push(b'e');
                    self.token = Token::ExpSign;
                }
                b',' | b'\n' => {
                    let value = self.integer(c)?;
                    return Ok(self.end_field(value, c));
                }
                _ => {
                    return Err(
                        self.error("expecting a digit, decimal point, comma or line break", c)
                    );
                }
            },
            Token::Decimal => match c {
                b'0'..=b'9' => self.text.push(c),
                b'e' | b'E' => {
                    self.text.push(b'e');
                    self.token = Token::ExpSign;
                }
                b',' | b'\n' => {
                    let value = self.real(c)?;
                    return Ok(self.end_field(value, c));
                }
                _ => return Err(self.error("expecting a digit, exponent, comma or line break", c)),
            },
            Token::ExpSign => match c {
                b'-' | b'+' | b'0'..=b'9' => {
                    self.text.push(c);
                    self.token = Token::Exponent;
                }
                _ => return Err(self.error("expecting an exponent", c)),
            },
            Token::Exponent => match c {
                b'0'..=b'9' => self.text.push(c),
                b',' | b'\n' => {
                    let value = self.real(c)?;
                    return Ok(self.end_field(value, c));
                }
                _ => return Err(self.error("expecting a digit, comma or line break", c)),
            },
            Token::Null => {
                if self.matched < NULL.len() {
                    if c != NULL[self.matched] {
                        return Err(self.error("NULL misspelled", c));
                    }
                    self.matched += 1;
                } else {
                    match c {
                        b',' | b'\n' => {
                            self.matched = 0;
                            return Ok(self.end_field(Value::Null, c));
                        }
                        _ => {
                            return Err(
                                self.error("expecting a comma or line break after NULL", c)
                            );
                        }
                    }
                }
            }
            Token::UnistrPrefix => {
                if c != UNISTR[self.matched] {
                    return Err(self.error("expecting unistr('", c));
                }
                self.matched += 1;
                if self.matched == UNISTR.len() {
                    self.matched = 0;
                    self.text.clear();
                    self.token = Token::Unistr;
                }
            }
            Token::Unistr => match c {
                b'\'' => self.token = Token::UnistrQuote,
                b'\\' => self.token = Token::UnistrEscape,
                _ => self.text.push(c),
            },
            Token::UnistrQuote => match c {
                b'\'' => {
                    self.text.push(c);
                    self.token = Token::Unistr;
                }
                b')' => self.token = Token::UnistrEnd,
                _ => {
                    return Err(self.error("expecting a closing parenthesis after unistr", c));
                }
            },
            Token::UnistrEscape => {
                self.code = 0;
                self.token = match c {
                    b'\\' => {
                        self.text.push(c);
                        Token::Unistr
                    }
                    b'u' => Token::UnistrHex(4),
                    b'+' => Token::UnistrHex(6),
                    b'U' => Token::UnistrHex(8),
                    _ => match hex_value(c) {
                        Some(digit) => {
                            self.code = u32::from(digit);
                            Token::UnistrHex(3)
                        }
                        None => return Err(self.error("unknown escape in unistr", c)),
                    },
                };
            }
            Token::UnistrHex(left) => {
                let Some(digit) = hex_value(c) else {
                    return Err(self.error("expecting a hex digit in unistr escape", c));
                };
                self.code = (self.code << 4) | u32::from(digit);
                if left > 1 {
                    self.token = Token::UnistrHex(left - 1);
                } else {
                    let Some(ch) = char::from_u32(self.code) else {
                        return Err(self.error("invalid code point in unistr escape", c));
                    };
                    let mut utf8 = [0; 4];
                    self.text.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
                    self.token = Token::Unistr;
                }
            }
            Token::UnistrEnd => match c {
                b',' | b'\n' => {
                    let text = String::from_utf8_lossy(&self.text).into_owned();
                    self.text.clear();
                    return Ok(self.end_field(Value::Text(text), c));
                }
                _ => {
                    return Err(self.error("expecting a comma or line break after unistr", c));
                }
            },
            Token::Failure(kind) => {
                let prefix = kind.prefix().as_bytes();
                if self.matched < prefix.len() {
                    if c != prefix[self.matched] {
                        return Err(self.error("unexpected error prefix", c));
                    }
                    self.matched += 1;
                }
                if c == b'\n' {
                    let message = String::from_utf8_lossy(&self.text).trim_end().to_string();
                    self.text.clear();
                    self.matched = 0;
                    self.token = Token::None;
                    return Ok(Some(Step::Failure { kind, message }));
                }
                self.text.push(c);
            }
        }
        Ok(None)
    }

    fn start_failure(&mut self, kind: FailureKind, c: u8) {
        self.text.clear();
        self.text.push(c);
        self.matched = 1;
        self.token = Token::Failure(kind);
    }

    /// Store a completed field; `c` is the `,` or `\n` that ended it.
    fn end_field(&mut self, value: Value, c: u8) -> Option<Step> {
        self.values.push(value);
        self.token = Token::None;
        if c == b'\n' {
            Some(self.end_row())
        } else {
            None
        }
    }

    fn end_row(&mut self) -> Step {
        let values = std::mem::take(&mut self.values);
        self.rows += 1;
        if self.rows == 1 {
            self.names = values
                .into_iter()
                .map(|v| match v {
                    Value::Text(s) => s,
                    other => other.to_string(),
                })
                .collect();
            Step::Header
        } else {
            self.values.reserve(self.names.len());
            Step::Row(values)
        }
    }

    fn integer(&mut self, c: u8) -> Result<Value, DecodeError> {
        let literal = std::mem::take(&mut self.text);
        std::str::from_utf8(&literal)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::Integer)
            .ok_or_else(|| self.error("integer out of range", c))
    }

    /// `mantissa * 10^(exponent - fraction digits)`, correctly rounded.
    fn real(&mut self, c: u8) -> Result<Value, DecodeError> {
        let literal = std::mem::take(&mut self.text);
        std::str::from_utf8(&literal)
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .map(Value::Real)
            .ok_or_else(|| self.error("malformed number", c))
    }

    /// Error for the byte just consumed.
    fn error(&self, reason: &str, c: u8) -> DecodeError {
        DecodeError {
            reason: reason.to_string(),
            byte: Some(c),
            offset: self.base + self.pos - 1,
            buffer: self.buf.clone(),
        }
    }
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}
