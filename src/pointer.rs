//! Cursor over a shared [`Buffer`]
//!
//! A [`Pointer`] is a (chunk, offset, address) triple. It is the only way the
//! editor reads, writes, inserts or removes bytes. Cloning one is cheap and
//! yields an independent cursor over the same storage.
//!
//! Invariants:
//! - `address` is the number of bytes before the referenced byte
//! - `offset < len(chunk)` whenever the chunk is live
//!
//! A structural removal through one pointer can free the chunk another pointer
//! refers to. Secondary pointers must be checked with [`Pointer::is_valid`]
//! or re-derived with [`Pointer::resync`] after any remove.

use crate::error::{Error, Result};
use crate::storage::{Buffer, ChunkId, Storage};
use std::cell::RefMut;
use std::fmt;

/// Read-only cursor capabilities. Encoding strategies only need these.
pub trait ByteCursor {
    fn value(&self) -> u8;
    fn next(&mut self) -> Result<()>;
    fn prev(&mut self) -> Result<()>;
    fn address(&self) -> u64;
}

/// Outcome of a removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveResult {
    /// The cursor points at the byte that followed the removed ones, or at
    /// the new last byte when the removal reached the end of the source
    Success,
    /// The cursor's chunk was freed and the cursor moved back to the new last
    /// byte. Other pointers into that chunk are dangling.
    Refresh,
    /// Nothing is left in the buffer
    All,
}

#[derive(Clone)]
pub struct Pointer {
    buffer: Buffer,
    chunk: ChunkId,
    offset: usize,
    address: u64,
}

impl fmt::Debug for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pointer")
            .field("chunk", &self.chunk)
            .field("offset", &self.offset)
            .field("address", &self.address)
            .finish()
    }
}

impl Pointer {
    /// Cursor on the first byte. Fails with `NoData` when the source is empty.
    pub fn new(buffer: &Buffer) -> Result<Self> {
        let first = buffer.storage_mut().ensure_first()?;
        match first {
            Some(chunk) => Ok(Self {
                buffer: buffer.clone(),
                chunk,
                offset: 0,
                address: 0,
            }),
            None => Err(Error::NoData),
        }
    }

    /// Cursor on `address`, loading data up to it if needed
    pub fn at(buffer: &Buffer, address: u64) -> Result<Self> {
        let (chunk, offset) = buffer.storage_mut().locate(address)?;
        Ok(Self {
            buffer: buffer.clone(),
            chunk,
            offset,
            address,
        })
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    /// Whether the referenced chunk still exists and holds the offset
    pub fn is_valid(&self) -> bool {
        let storage = self.buffer.storage();
        storage.contains(self.chunk) && self.offset < storage.chunk_len(self.chunk)
    }

    /// Re-derive chunk and offset from the address. Never fetches; an
    /// address past the loaded end is clamped to the last byte.
    pub fn resync(&mut self) -> Result<()> {
        let storage = self.buffer.storage();
        if storage.is_empty() {
            return Err(Error::NoData);
        }
        let address = self.address.min(storage.len() - 1);
        let (chunk, offset) = storage.locate_loaded(address).ok_or(Error::Boundary)?;
        self.chunk = chunk;
        self.offset = offset;
        self.address = address;
        Ok(())
    }

    /// Byte under the cursor
    pub fn value(&self) -> u8 {
        self.buffer.storage().chunk(self.chunk)[self.offset]
    }

    pub fn set_value(&mut self, value: u8) {
        *self.buffer.storage_mut().byte_mut(self.chunk, self.offset) = value;
    }

    pub fn next(&mut self) -> Result<()> {
        self.skip(1)
    }

    pub fn prev(&mut self) -> Result<()> {
        self.rewind(1)
    }

    /// Step one byte forward within the loaded chunks. Never fetches; the
    /// loaded end is a `Boundary`.
    pub fn next_loaded(&mut self) -> Result<()> {
        let storage = self.buffer.storage();
        if self.offset + 1 < storage.chunk_len(self.chunk) {
            self.offset += 1;
        } else {
            self.chunk = storage.next(self.chunk).ok_or(Error::Boundary)?;
            self.offset = 0;
        }
        self.address += 1;
        Ok(())
    }

    /// Move forward `n` bytes, fetching when the loaded data runs out.
    /// On failure the cursor stays on the last byte it could reach.
    pub fn skip(&mut self, mut n: u64) -> Result<()> {
        let buffer = self.buffer.clone();
        let mut storage = buffer.storage_mut();
        loop {
            let len = storage.chunk_len(self.chunk);
            if self.offset as u64 + n < len as u64 {
                self.offset += n as usize;
                self.address += n;
                return Ok(());
            }
            let next = match storage.next(self.chunk) {
                Some(next) => next,
                None => match self.fetch_next(&mut storage) {
                    Ok(next) => next,
                    Err(e) => {
                        let rest = len - self.offset - 1;
                        self.offset += rest;
                        self.address += rest as u64;
                        return Err(e);
                    }
                },
            };
            let moved = len - self.offset;
            n -= moved as u64;
            self.chunk = next;
            self.offset = 0;
            self.address += moved as u64;
        }
    }

    /// One fetch for the chunk after the cursor's
    fn fetch_next(&self, storage: &mut Storage) -> Result<ChunkId> {
        match storage.fetch() {
            Ok(()) => storage.next(self.chunk).ok_or(Error::Boundary),
            Err(Error::EndOfSource) | Err(Error::TransientUnavailable) => Err(Error::Boundary),
            Err(e) => Err(e),
        }
    }

    /// Move back `n` bytes. Going before address 0 is a `Boundary` error and
    /// leaves the cursor where it was.
    pub fn rewind(&mut self, mut n: u64) -> Result<()> {
        if n > self.address {
            return Err(Error::Boundary);
        }
        let storage = self.buffer.storage();
        loop {
            if n <= self.offset as u64 {
                self.offset -= n as usize;
                self.address -= n;
                return Ok(());
            }
            let prev = storage.prev(self.chunk).ok_or(Error::Boundary)?;
            n -= self.offset as u64;
            self.address -= self.offset as u64;
            self.chunk = prev;
            // one past the end; the next round lands inside the chunk
            self.offset = storage.chunk_len(prev);
        }
    }

    /// Move to an absolute address
    pub fn goto(&mut self, address: u64) -> Result<()> {
        if address > self.address {
            self.skip(address - self.address)
        } else {
            self.rewind(self.address - address)
        }
    }

    /// Load everything and park on the last byte. A source failure still
    /// parks on the last loaded byte and is then reported.
    pub fn go_end_of_file(&mut self) -> Result<()> {
        let buffer = self.buffer.clone();
        let mut storage = buffer.storage_mut();
        let loaded = storage.read_all();
        if let Some(last) = storage.last() {
            self.chunk = last;
            self.offset = storage.chunk_len(last) - 1;
            self.address = storage.len() - 1;
        }
        loaded
    }

    /// Up to `n` already loaded bytes starting at the cursor. Never fetches.
    pub fn peek_loaded(&self, n: usize) -> Vec<u8> {
        let storage = self.buffer.storage();
        let mut out = Vec::with_capacity(n);
        let mut chunk = Some(self.chunk);
        let mut offset = self.offset;
        while let Some(id) = chunk {
            if out.len() >= n {
                break;
            }
            let data = storage.chunk(id);
            let take = (n - out.len()).min(data.len() - offset);
            out.extend_from_slice(&data[offset..offset + take]);
            chunk = storage.next(id);
            offset = 0;
        }
        out
    }

    /// Insert `value` before the cursor. The cursor then points at it.
    pub fn insert(&mut self, value: u8) {
        self.buffer
            .storage_mut()
            .insert_byte(self.chunk, self.offset, value);
    }

    /// Insert `value` after the cursor. The cursor does not move.
    pub fn append(&mut self, value: u8) {
        self.buffer
            .storage_mut()
            .insert_byte(self.chunk, self.offset + 1, value);
    }

    /// Reserve `n` zero bytes before the cursor and hand them out for filling.
    /// The cursor then points at the first reserved byte.
    pub fn insert_space(&mut self, n: usize) -> RefMut<'_, [u8]> {
        self.reserve(self.offset, n)
    }

    /// Reserve `n` zero bytes after the cursor. The cursor does not move.
    pub fn append_space(&mut self, n: usize) -> RefMut<'_, [u8]> {
        self.reserve(self.offset + 1, n)
    }

    fn reserve(&self, at: usize, n: usize) -> RefMut<'_, [u8]> {
        let chunk = self.chunk;
        let range = self.buffer.storage_mut().splice_zeros(chunk, at, n);
        RefMut::map(self.buffer.storage_mut(), |storage| storage.bytes_mut(chunk, range))
    }

    pub fn insert_bytes(&mut self, bytes: &[u8]) {
        self.insert_space(bytes.len()).copy_from_slice(bytes);
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) {
        self.append_space(bytes.len()).copy_from_slice(bytes);
    }

    /// Remove the byte under the cursor
    pub fn remove(&mut self) -> RemoveResult {
        self.remove_space(1)
    }

    /// Remove `n` bytes starting at the cursor, across chunk boundaries.
    /// Chunks emptied on the way are freed. Reaching the loaded end of a live
    /// source reads on, so the cursor lands on the byte that follows.
    pub fn remove_space(&mut self, n: u64) -> RemoveResult {
        let buffer = self.buffer.clone();
        let mut storage = buffer.storage_mut();
        let mut left = n;
        while left > 0 {
            let len = storage.chunk_len(self.chunk);
            let take = left.min((len - self.offset) as u64) as usize;
            storage.drain(self.chunk, self.offset..self.offset + take);
            left -= take as u64;

            let remaining = storage.chunk_len(self.chunk);
            if self.offset < remaining {
                // The rest of the chunk shifted under the cursor.
                return RemoveResult::Success;
            }

            let next = following(&mut storage, self.chunk);
            if remaining == 0 {
                let prev = storage.prev(self.chunk);
                storage.unlink(self.chunk);
                match (next, prev) {
                    (Some(next), _) => {
                        self.chunk = next;
                        self.offset = 0;
                    }
                    (None, Some(prev)) => {
                        self.chunk = prev;
                        self.offset = storage.chunk_len(prev) - 1;
                        self.address -= 1;
                        return RemoveResult::Refresh;
                    }
                    (None, None) => return RemoveResult::All,
                }
            } else {
                match next {
                    Some(next) => {
                        self.chunk = next;
                        self.offset = 0;
                    }
                    None => {
                        self.offset = remaining - 1;
                        self.address -= 1;
                        return RemoveResult::Success;
                    }
                }
            }
        }
        RemoveResult::Success
    }
}

/// Chunk after `id`, reading more input when `id` is the last loaded one.
/// A failing source counts as ended; the bytes already loaded stay.
fn following(storage: &mut Storage, id: ChunkId) -> Option<ChunkId> {
    match storage.next_or_fetch(id) {
        Ok(next) => next,
        Err(e) => {
            log::warn!("remove: source failed: {}", e);
            None
        }
    }
}

impl ByteCursor for Pointer {
    fn value(&self) -> u8 {
        Pointer::value(self)
    }

    fn next(&mut self) -> Result<()> {
        Pointer::next(self)
    }

    fn prev(&mut self) -> Result<()> {
        Pointer::prev(self)
    }

    fn address(&self) -> u64 {
        Pointer::address(self)
    }
}

/// Cursor for decoding what is on screen. It walks only loaded bytes, so
/// it can run while the source is stalled.
#[derive(Debug, Clone)]
pub struct LoadedCursor(Pointer);

impl LoadedCursor {
    pub fn new(pointer: Pointer) -> Self {
        Self(pointer)
    }
}

impl ByteCursor for LoadedCursor {
    fn value(&self) -> u8 {
        self.0.value()
    }

    fn next(&mut self) -> Result<()> {
        self.0.next_loaded()
    }

    fn prev(&mut self) -> Result<()> {
        self.0.prev()
    }

    fn address(&self) -> u64 {
        self.0.address()
    }
}
