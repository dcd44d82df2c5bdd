//! Statement pre-scan.
//!
//! The shell reads input line by line and only runs a statement once it has
//! seen the terminating `;`. Text that ends inside a string or comment would
//! swallow the marker command and the request would never complete, so such
//! text is rejected before it is sent.

use crate::error::{ShellError, ShellResult};
use crate::value::Value;

use super::literal::write_literal;

/// Statement text with the byte offsets of its `?` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    text: String,
    placeholders: Vec<usize>,
}

impl Statement {
    /// Scan `sql`, terminating it with `;` when the last statement is open.
    pub fn parse(sql: &str) -> ShellResult<Self> {
        let bytes = sql.as_bytes();
        let mut placeholders = Vec::new();
        let mut open = false;
        let mut trailing_line_comment = false;
        let mut i = 0;

        while i < bytes.len() {
            trailing_line_comment = false;
            match bytes[i] {
                b'\'' => {
                    i = skip_quoted(bytes, i, b'\'')
                        .ok_or(ShellError::UnterminatedInput("string literal"))?;
                    open = true;
                }
                q @ (b'"' | b'`') => {
                    i = skip_quoted(bytes, i, q)
                        .ok_or(ShellError::UnterminatedInput("quoted identifier"))?;
                    open = true;
                }
                b'[' => {
                    i = find(bytes, i + 1, b"]")
                        .ok_or(ShellError::UnterminatedInput("quoted identifier"))?;
                    open = true;
                }
                b'-' if bytes.get(i + 1) == Some(&b'-') => match find(bytes, i + 2, b"\n") {
                    Some(end) => i = end,
                    None => {
                        i = bytes.len();
                        trailing_line_comment = true;
                        continue;
                    }
                },
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    i = find(bytes, i + 2, b"*/")
                        .ok_or(ShellError::UnterminatedInput("block comment"))?;
                }
                b'?' => {
                    placeholders.push(i);
                    open = true;
                }
                b';' => open = false,
                c if c.is_ascii_whitespace() => {}
                _ => open = true,
            }
            i += 1;
        }

        let mut text = sql.to_string();
        if open {
            if trailing_line_comment {
                text.push('\n');
            }
            text.push(';');
        }
        Ok(Self { text, placeholders })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn param_count(&self) -> usize {
        self.placeholders.len()
    }

    /// Substitute `params` for the placeholders, in order.
    pub fn bind(&self, params: &[Value]) -> ShellResult<String> {
        if params.len() != self.placeholders.len() {
            return Err(ShellError::ArgumentCount {
                expected: self.placeholders.len(),
                got: params.len(),
            });
        }
        if params.is_empty() {
            return Ok(self.text.clone());
        }

        let mut out = String::with_capacity(self.text.len() + params.len() * 8);
        let mut last = 0;
        for (&at, param) in self.placeholders.iter().zip(params) {
            out.push_str(&self.text[last..at]);
            write_literal(&mut out, param)?;
            last = at + 1;
        }
        out.push_str(&self.text[last..]);
        Ok(out)
    }
}

/// Index of the closing quote of the literal opened at `start`. A doubled
/// quote is an escaped quote.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> Option<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Index of the last byte of the first `needle` at or after `from`.
fn find(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    bytes
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| from + p + needle.len() - 1)
}
