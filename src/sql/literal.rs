//! Rendering parameter values as SQL literals.
//!
//! The shell has no parameter binding, so bound values are substituted into
//! the statement text. Every literal reads back as the same storage class.

use std::fmt::Write as _;

use crate::error::{ShellError, ShellResult};
use crate::value::Value;

/// Append the literal for `value` to `out`.
pub fn write_literal(out: &mut String, value: &Value) -> ShellResult<()> {
    match value {
        Value::Null => out.push_str("NULL"),
        // parenthesized so `1-?` cannot turn into a `--` comment
        Value::Integer(v) if *v < 0 => {
            let _ = write!(out, "({v})");
        }
        Value::Integer(v) => {
            let _ = write!(out, "{v}");
        }
        Value::Real(v) if !v.is_finite() => {
            return Err(ShellError::Encode(format!("non-finite real {v}")));
        }
        // `{:?}` always keeps a fractional part or exponent, so the shell
        // reads the literal back as a real
        Value::Real(v) if v.is_sign_negative() => {
            let _ = write!(out, "({v:?})");
        }
        Value::Real(v) => {
            let _ = write!(out, "{v:?}");
        }
        Value::Text(s) => {
            if s.contains('\0') {
                return Err(ShellError::Encode("text contains a NUL byte".to_string()));
            }
            out.reserve(s.len() + 2);
            out.push('\'');
            for c in s.chars() {
                if c == '\'' {
                    out.push('\'');
                }
                out.push(c);
            }
            out.push('\'');
        }
        Value::Blob(bytes) => {
            out.reserve(bytes.len() * 2 + 3);
            out.push_str("X'");
            for b in bytes {
                let _ = write!(out, "{b:02x}");
            }
            out.push('\'');
        }
    }
    Ok(())
}

/// The literal for `value` as a new string.
pub fn literal(value: &Value) -> ShellResult<String> {
    let mut out = String::new();
    write_literal(&mut out, value)?;
    Ok(out)
}
