//! Undo log for hexstream
//!
//! Each primitive edit pushes one record holding just enough to reverse it.
//! Records never hold pointers; they are replayed by address through fresh
//! pointers, so they stay correct however the chunks were rearranged.

use crate::error::Result;
use crate::pointer::{Pointer, RemoveResult};
use crate::storage::Buffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoRecord {
    /// `len` bytes were inserted at `address`
    Insert { address: u64, len: u64 },
    /// `byte` was removed from `address`
    Remove { address: u64, byte: u8 },
    /// The byte at `address` used to be `old`
    Replace { address: u64, old: u8 },
}

/// Result of replaying a record
#[derive(Debug)]
pub struct Applied {
    /// Pointer at the restored position, when anything is left
    pub cursor: Option<Pointer>,
    pub removal: Option<RemoveResult>,
}

impl UndoRecord {
    /// Reverse the edit this record describes
    pub fn apply(&self, buffer: &Buffer) -> Result<Applied> {
        match *self {
            UndoRecord::Insert { address, len } => {
                let mut p = Pointer::at(buffer, address)?;
                let removal = p.remove_space(len);
                let cursor = if removal == RemoveResult::All { None } else { Some(p) };
                Ok(Applied {
                    cursor,
                    removal: Some(removal),
                })
            }
            UndoRecord::Remove { address, byte } => {
                let mut p = if address == 0 || address < buffer.len() {
                    let mut p = Pointer::at(buffer, address)?;
                    p.insert(byte);
                    p
                } else {
                    // The removed byte was the last one; put it back after the new last byte.
                    let mut p = Pointer::at(buffer, address - 1)?;
                    p.append(byte);
                    p
                };
                if p.address() != address {
                    p.next()?;
                }
                Ok(Applied {
                    cursor: Some(p),
                    removal: None,
                })
            }
            UndoRecord::Replace { address, old } => {
                let mut p = Pointer::at(buffer, address)?;
                p.set_value(old);
                Ok(Applied {
                    cursor: Some(p),
                    removal: None,
                })
            }
        }
    }
}

/// Stack of records, most recent last, each with the dirty flag it replaced
#[derive(Debug, Default)]
pub struct UndoLog {
    records: Vec<(UndoRecord, bool)>,
}

impl UndoLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: UndoRecord, was_dirty: bool) {
        self.records.push((record, was_dirty));
    }

    pub fn pop(&mut self) -> Option<(UndoRecord, bool)> {
        self.records.pop()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undo_insert() {
        let buffer = Buffer::from_bytes(b"0123".to_vec());
        let mut p = Pointer::at(&buffer, 1).unwrap();
        p.insert_bytes(b"ab");
        let applied = UndoRecord::Insert { address: 1, len: 2 }.apply(&buffer).unwrap();
        assert_eq!(buffer.to_vec(), b"0123");
        assert_eq!(applied.cursor.unwrap().address(), 1);
    }

    #[test]
    fn test_undo_remove_in_middle_and_at_end() {
        let buffer = Buffer::from_bytes(b"abc".to_vec());
        let mut p = Pointer::at(&buffer, 1).unwrap();
        p.remove();
        UndoRecord::Remove { address: 1, byte: b'b' }.apply(&buffer).unwrap();
        assert_eq!(buffer.to_vec(), b"abc");

        let mut p = Pointer::at(&buffer, 2).unwrap();
        p.remove();
        let applied = UndoRecord::Remove { address: 2, byte: b'c' }.apply(&buffer).unwrap();
        assert_eq!(buffer.to_vec(), b"abc");
        let cursor = applied.cursor.unwrap();
        assert_eq!(cursor.address(), 2);
        assert_eq!(cursor.value(), b'c');
    }

    #[test]
    fn test_undo_replace() {
        let buffer = Buffer::from_bytes(b"xyz".to_vec());
        let mut p = Pointer::at(&buffer, 2).unwrap();
        p.set_value(b'!');
        UndoRecord::Replace { address: 2, old: b'z' }.apply(&buffer).unwrap();
        assert_eq!(buffer.to_vec(), b"xyz");
    }

    #[test]
    fn test_log_is_lifo() {
        let mut log = UndoLog::new();
        log.push(UndoRecord::Replace { address: 0, old: 1 }, false);
        log.push(UndoRecord::Replace { address: 1, old: 2 }, true);
        assert_eq!(log.len(), 2);
        assert_eq!(log.pop(), Some((UndoRecord::Replace { address: 1, old: 2 }, true)));
        assert_eq!(log.pop(), Some((UndoRecord::Replace { address: 0, old: 1 }, false)));
        assert!(log.is_empty());
    }
}
