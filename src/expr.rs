//! Literal expressions typed at the insert/append prompts
//!
//! An expression is a sequence of:
//! - `U+XXXX` code points, encoded with the active encoding
//! - `0xHH` bytes
//! - decimal bytes (`0`..=`255`)
//! - quoted strings `"..."` or `u"..."`, encoded with the active encoding

use crate::encoding::Encoding;
use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use std::sync::OnceLock;

struct Patterns {
    code_point: Regex,
    hex_byte: Regex,
    decimal: Regex,
    string: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        code_point: Regex::new(r"^\s*[uU]\+([0-9A-Fa-f]+)").expect("valid regex"),
        hex_byte: Regex::new(r"^\s*0x([0-9A-Fa-f]+)").expect("valid regex"),
        decimal: Regex::new(r"^\s*([0-9]+)").expect("valid regex"),
        string: Regex::new(r#"^\s*[uU]?"([^"]+)""#).expect("valid regex"),
    })
}

/// Evaluate an expression into bytes
pub fn evaluate(text: &str, encoding: &dyn Encoding) -> Result<Vec<u8>> {
    let p = patterns();
    let mut bytes = Vec::new();
    let mut rest = text;

    while !rest.trim().is_empty() {
        if let Some(m) = p.code_point.captures(rest) {
            let value = u32::from_str_radix(&m[1], 16)
                .with_context(|| format!("bad code point `{}`", &m[1]))?;
            let ch = char::from_u32(value).ok_or_else(|| anyhow!("U+{:X} is not a character", value))?;
            bytes.extend(encoding.encode(ch.encode_utf8(&mut [0u8; 4])));
            rest = &rest[m[0].len()..];
        } else if let Some(m) = p.hex_byte.captures(rest) {
            let value = u8::from_str_radix(&m[1], 16)
                .with_context(|| format!("`0x{}` does not fit in a byte", &m[1]))?;
            bytes.push(value);
            rest = &rest[m[0].len()..];
        } else if let Some(m) = p.decimal.captures(rest) {
            let value: u8 = m[1]
                .parse()
                .with_context(|| format!("`{}` does not fit in a byte", &m[1]))?;
            bytes.push(value);
            rest = &rest[m[0].len()..];
        } else if let Some(m) = p.string.captures(rest) {
            bytes.extend(encoding.encode(&m[1]));
            rest = &rest[m[0].len()..];
        } else {
            bail!("`{}` are ignored", rest.trim());
        }
    }
    Ok(bytes)
}
