//! Character encoding strategies for the text column
//!
//! An encoding only needs the read-only [`ByteCursor`] capabilities, so it can
//! walk around the cursor to find the character it sits in but can never
//! change the buffer.

use crate::pointer::ByteCursor;

/// The character a cursor sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuneOver {
    pub ch: char,
    /// Index of the cursor's byte within the character
    pub pos: usize,
    /// Encoded length of the character
    pub len: usize,
}

pub trait Encoding {
    /// Expected length of the character starting with `lead` at `address`
    fn count(&self, lead: u8, address: u64) -> usize;

    /// Decode one character from the start of `bytes`
    fn decode(&self, bytes: &[u8]) -> Option<(char, usize)>;

    /// Find the character containing the cursor's byte. Moves the cursor.
    fn rune_over(&self, cursor: &mut dyn ByteCursor) -> Option<RuneOver>;

    /// Short name for the status bar
    fn mode_str(&self) -> &'static str;

    fn encode(&self, text: &str) -> Vec<u8>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8;

fn is_rune_start(b: u8) -> bool {
    b & 0xC0 != 0x80
}

impl Encoding for Utf8 {
    fn count(&self, lead: u8, _address: u64) -> usize {
        match lead {
            0xF0..=0xF4 => 4,
            0xE0..=0xEF => 3,
            0xC2..=0xDF => 2,
            _ => 1,
        }
    }

    fn decode(&self, bytes: &[u8]) -> Option<(char, usize)> {
        let len = self.count(*bytes.first()?, 0);
        let head = bytes.get(..len)?;
        let ch = std::str::from_utf8(head).ok()?.chars().next()?;
        Some((ch, len))
    }

    fn rune_over(&self, cursor: &mut dyn ByteCursor) -> Option<RuneOver> {
        let mut pos = 0;
        while !is_rune_start(cursor.value()) && pos < 3 && cursor.prev().is_ok() {
            pos += 1;
        }
        let count = self.count(cursor.value(), 0);
        let mut bytes = Vec::with_capacity(count);
        for i in 0..count {
            bytes.push(cursor.value());
            if i + 1 < count && cursor.next().is_err() {
                break;
            }
        }
        let (ch, len) = self.decode(&bytes)?;
        if pos >= len {
            return None;
        }
        Some(RuneOver { ch, pos, len })
    }

    fn mode_str(&self) -> &'static str {
        "UTF8"
    }

    fn encode(&self, text: &str) -> Vec<u8> {
        text.as_bytes().to_vec()
    }
}

/// UTF-16 without surrogate pairing; each even-aligned byte pair is one unit
#[derive(Debug, Clone, Copy)]
pub struct Utf16 {
    pub little_endian: bool,
}

impl Utf16 {
    pub fn le() -> Self {
        Self { little_endian: true }
    }

    pub fn be() -> Self {
        Self {
            little_endian: false,
        }
    }

    fn unit(&self, first: u8, second: u8) -> u16 {
        if self.little_endian {
            u16::from_le_bytes([first, second])
        } else {
            u16::from_be_bytes([first, second])
        }
    }
}

impl Encoding for Utf16 {
    fn count(&self, _lead: u8, address: u64) -> usize {
        if address % 2 == 0 {
            2
        } else {
            1
        }
    }

    fn decode(&self, bytes: &[u8]) -> Option<(char, usize)> {
        match bytes {
            [first, second, ..] => char::from_u32(self.unit(*first, *second) as u32).map(|c| (c, 2)),
            _ => None,
        }
    }

    fn rune_over(&self, cursor: &mut dyn ByteCursor) -> Option<RuneOver> {
        let current = cursor.value();
        if cursor.address() % 2 != 0 {
            cursor.prev().ok()?;
            let (ch, len) = self.decode(&[cursor.value(), current])?;
            Some(RuneOver { ch, pos: 1, len })
        } else {
            cursor.next().ok()?;
            let (ch, len) = self.decode(&[current, cursor.value()])?;
            Some(RuneOver { ch, pos: 0, len })
        }
    }

    fn mode_str(&self) -> &'static str {
        if self.little_endian {
            "16LE"
        } else {
            "16BE"
        }
    }

    fn encode(&self, text: &str) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(text.len() * 2);
        for unit in text.encode_utf16() {
            if self.little_endian {
                bytes.extend_from_slice(&unit.to_le_bytes());
            } else {
                bytes.extend_from_slice(&unit.to_be_bytes());
            }
        }
        bytes
    }
}

/// Pick an encoding from a byte order mark at the cursor
pub fn detect(cursor: &mut dyn ByteCursor) -> Box<dyn Encoding> {
    let first = cursor.value();
    if cursor.next().is_ok() {
        match (first, cursor.value()) {
            (0xFF, 0xFE) => return Box::new(Utf16::le()),
            (0xFE, 0xFF) => return Box::new(Utf16::be()),
            _ => {}
        }
    }
    Box::new(Utf8)
}

/// Encoding by name as used in the config file
pub fn by_name(name: &str) -> Option<Box<dyn Encoding>> {
    match name.to_ascii_lowercase().as_str() {
        "utf8" | "utf-8" => Some(Box::new(Utf8)),
        "utf16le" | "utf-16le" => Some(Box::new(Utf16::le())),
        "utf16be" | "utf-16be" => Some(Box::new(Utf16::be())),
        _ => None,
    }
}
