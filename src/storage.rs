//! Chunked byte storage for hexstream
//!
//! Loaded bytes live in a doubly-linked list of chunks kept in an arena.
//! Chunks are addressed by [`ChunkId`] handles carrying a generation, so a
//! handle to a removed chunk is detected instead of silently aliasing a slot
//! that was reused. The running total length is kept exact on every change.
//!
//! [`Buffer`] is the shared handle: every [`crate::pointer::Pointer`] holds a
//! clone of it. Storage is owned and mutated by one thread only.

use crate::error::{Error, Result};
use crate::fetch::{Fetcher, ReadPolicy, Source};
use std::cell::{Ref, RefCell, RefMut};
use std::io::Write;
use std::ops::Range;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

/// Pause before retrying a source that had nothing ready
const TRANSIENT_BACKOFF: Duration = Duration::from_millis(2);

/// Stable handle to a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkId {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    /// `None` while the slot is on the free list
    data: Option<Vec<u8>>,
    prev: Option<ChunkId>,
    next: Option<ChunkId>,
}

/// Ordered chunks plus the source they are fetched from
pub struct Storage {
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: Option<ChunkId>,
    tail: Option<ChunkId>,
    chunk_count: usize,
    /// Sum of all chunk lengths
    allsize: u64,
    fetcher: Fetcher,
}

impl Storage {
    pub fn new(fetcher: Fetcher) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            chunk_count: 0,
            allsize: 0,
            fetcher,
        }
    }

    /// Total number of loaded bytes
    pub fn len(&self) -> u64 {
        self.allsize
    }

    pub fn is_empty(&self) -> bool {
        self.allsize == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// True once the source has ended or failed
    pub fn is_exhausted(&self) -> bool {
        self.fetcher.is_closed()
    }

    pub fn first(&self) -> Option<ChunkId> {
        self.head
    }

    pub fn last(&self) -> Option<ChunkId> {
        self.tail
    }

    fn slot(&self, id: ChunkId) -> Option<&Slot> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation && slot.data.is_some())
    }

    fn slot_mut(&mut self, id: ChunkId) -> Option<&mut Slot> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation && slot.data.is_some())
    }

    /// Whether `id` still names a live chunk
    pub fn contains(&self, id: ChunkId) -> bool {
        self.slot(id).is_some()
    }

    /// Bytes of a live chunk. Panics on a stale handle.
    pub fn chunk(&self, id: ChunkId) -> &[u8] {
        match self.slot(id).and_then(|slot| slot.data.as_deref()) {
            Some(data) => data,
            None => panic!("stale chunk handle {:?}", id),
        }
    }

    fn chunk_vec(&mut self, id: ChunkId) -> &mut Vec<u8> {
        match self.slot_mut(id).and_then(|slot| slot.data.as_mut()) {
            Some(data) => data,
            None => panic!("stale chunk handle {:?}", id),
        }
    }

    pub fn chunk_len(&self, id: ChunkId) -> usize {
        self.chunk(id).len()
    }

    pub fn next(&self, id: ChunkId) -> Option<ChunkId> {
        self.slot(id).and_then(|slot| slot.next)
    }

    pub fn prev(&self, id: ChunkId) -> Option<ChunkId> {
        self.slot(id).and_then(|slot| slot.prev)
    }

    /// Append a chunk at the end. Empty data is ignored.
    fn push_back(&mut self, data: Vec<u8>) -> Option<ChunkId> {
        if data.is_empty() {
            return None;
        }
        self.allsize += data.len() as u64;
        let prev = self.tail;
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                slot.data = Some(data);
                slot.prev = prev;
                slot.next = None;
                ChunkId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    data: Some(data),
                    prev,
                    next: None,
                });
                ChunkId {
                    index,
                    generation: 0,
                }
            }
        };
        match prev {
            Some(prev) => {
                if let Some(slot) = self.slot_mut(prev) {
                    slot.next = Some(id);
                }
            }
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.chunk_count += 1;
        log::debug!("chunk {:?} appended, total {} bytes", id, self.allsize);
        Some(id)
    }

    /// Unlink and free a chunk, subtracting whatever bytes it still holds
    pub(crate) fn unlink(&mut self, id: ChunkId) {
        let (prev, next, len) = match self.slot(id) {
            Some(slot) => (slot.prev, slot.next, slot.data.as_ref().map_or(0, Vec::len)),
            None => panic!("stale chunk handle {:?}", id),
        };
        match prev {
            Some(p) => {
                if let Some(slot) = self.slot_mut(p) {
                    slot.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(slot) = self.slot_mut(n) {
                    slot.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        self.allsize -= len as u64;
        let slot = &mut self.slots[id.index as usize];
        slot.data = None;
        slot.prev = None;
        slot.next = None;
        self.free.push(id.index);
        self.chunk_count -= 1;
        log::debug!("chunk {:?} removed, total {} bytes", id, self.allsize);
    }

    /// Insert `count` zero bytes at `at` inside a chunk and return their range
    pub(crate) fn splice_zeros(&mut self, id: ChunkId, at: usize, count: usize) -> Range<usize> {
        let data = self.chunk_vec(id);
        assert!(at <= data.len(), "insert offset {} past chunk end {}", at, data.len());
        data.splice(at..at, std::iter::repeat(0u8).take(count));
        self.allsize += count as u64;
        at..at + count
    }

    /// Insert one byte at `at` inside a chunk
    pub(crate) fn insert_byte(&mut self, id: ChunkId, at: usize, value: u8) {
        let data = self.chunk_vec(id);
        assert!(at <= data.len(), "insert offset {} past chunk end {}", at, data.len());
        if at == data.len() {
            data.push(value);
        } else {
            data.insert(at, value);
        }
        self.allsize += 1;
    }

    /// Remove a byte range inside a chunk. May leave the chunk empty; the
    /// caller unlinks it right away.
    pub(crate) fn drain(&mut self, id: ChunkId, range: Range<usize>) {
        let data = self.chunk_vec(id);
        assert!(range.end <= data.len(), "remove range {:?} past chunk end {}", range, data.len());
        let removed = range.len();
        data.drain(range);
        self.allsize -= removed as u64;
    }

    pub(crate) fn byte_mut(&mut self, id: ChunkId, offset: usize) -> &mut u8 {
        &mut self.chunk_vec(id)[offset]
    }

    pub(crate) fn bytes_mut(&mut self, id: ChunkId, range: Range<usize>) -> &mut [u8] {
        &mut self.chunk_vec(id)[range]
    }

    /// Ingest the outcome of one read.
    ///
    /// Data is appended as a new chunk. End of source closes the fetcher, so
    /// later reads are no-ops. Returns `Ok(false)` only for a transient
    /// "nothing yet" so a polling caller can stop and come back later.
    /// Failures close the fetcher too and are propagated.
    pub fn store(&mut self, fetched: Result<Vec<u8>>) -> Result<bool> {
        match fetched {
            Ok(data) => {
                self.push_back(data);
                Ok(true)
            }
            Err(Error::EndOfSource) => {
                self.fetcher.close();
                Ok(true)
            }
            Err(Error::TransientUnavailable) => Ok(false),
            Err(e) => {
                self.fetcher.close();
                Err(e)
            }
        }
    }

    /// One blocking read attempt. `Err(EndOfSource)` once the source is done.
    pub fn fetch(&mut self) -> Result<()> {
        let fetched = self.fetcher.fetch_only();
        match fetched {
            Ok(data) => {
                self.push_back(data);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// One read attempt bounded by `timeout`; see [`Storage::store`]
    pub fn try_fetch(&mut self, timeout: Duration) -> Result<bool> {
        let fetched = self.fetcher.try_fetch_only(timeout);
        self.store(fetched)
    }

    /// Fetch until the source ends. Transient misses are retried.
    pub fn read_all(&mut self) -> Result<()> {
        loop {
            match self.fetch() {
                Ok(()) => {}
                Err(Error::TransientUnavailable) => thread::sleep(TRANSIENT_BACKOFF),
                Err(Error::EndOfSource) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch until a chunk exists after `id`, or the source is done.
    /// Returns the following chunk if there is one.
    pub(crate) fn next_or_fetch(&mut self, id: ChunkId) -> Result<Option<ChunkId>> {
        loop {
            if let Some(next) = self.next(id) {
                return Ok(Some(next));
            }
            match self.fetch() {
                Ok(()) => {}
                Err(Error::TransientUnavailable) => thread::sleep(TRANSIENT_BACKOFF),
                Err(Error::EndOfSource) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    /// Make sure at least one chunk is loaded
    pub(crate) fn ensure_first(&mut self) -> Result<Option<ChunkId>> {
        while self.head.is_none() {
            match self.fetch() {
                Ok(()) => {}
                Err(Error::TransientUnavailable) => thread::sleep(TRANSIENT_BACKOFF),
                Err(Error::EndOfSource) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
        Ok(self.head)
    }

    /// Find the chunk and offset holding `address`, fetching as needed
    pub fn locate(&mut self, address: u64) -> Result<(ChunkId, usize)> {
        let mut id = self.ensure_first()?.ok_or(Error::Boundary)?;
        let mut base = 0u64;
        loop {
            let len = self.chunk_len(id) as u64;
            if address < base + len {
                return Ok((id, (address - base) as usize));
            }
            base += len;
            id = self.next_or_fetch(id)?.ok_or(Error::Boundary)?;
        }
    }

    /// Like [`Storage::locate`], restricted to the chunks already loaded
    pub fn locate_loaded(&self, address: u64) -> Option<(ChunkId, usize)> {
        let mut base = 0u64;
        let mut current = self.head;
        while let Some(id) = current {
            let len = self.chunk_len(id) as u64;
            if address < base + len {
                return Some((id, (address - base) as usize));
            }
            base += len;
            current = self.next(id);
        }
        None
    }

    /// Iterate over loaded chunks in order
    pub fn chunks(&self) -> Chunks<'_> {
        Chunks {
            storage: self,
            current: self.head,
        }
    }

    /// Concatenation of loaded chunks
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.allsize as usize);
        for chunk in self.chunks() {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Sum of chunk lengths, walked the slow way
    pub fn measured_len(&self) -> u64 {
        self.chunks().map(|c| c.len() as u64).sum()
    }
}

/// Iterator over chunk contents
pub struct Chunks<'a> {
    storage: &'a Storage,
    current: Option<ChunkId>,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        self.current = self.storage.next(id);
        Some(self.storage.chunk(id))
    }
}

/// Shared handle to one [`Storage`]
#[derive(Clone)]
pub struct Buffer {
    inner: Rc<RefCell<Storage>>,
}

impl Buffer {
    pub fn new(source: Box<dyn Source>, policy: ReadPolicy) -> Self {
        Self::from_storage(Storage::new(Fetcher::new(source, policy)))
    }

    /// Buffer with fixed content and no source behind it
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let mut storage = Storage::new(Fetcher::exhausted());
        storage.push_back(data);
        Self::from_storage(storage)
    }

    pub fn from_storage(storage: Storage) -> Self {
        Self {
            inner: Rc::new(RefCell::new(storage)),
        }
    }

    pub fn storage(&self) -> Ref<'_, Storage> {
        self.inner.borrow()
    }

    pub fn storage_mut(&self) -> RefMut<'_, Storage> {
        self.inner.borrow_mut()
    }

    /// Whether both handles share one storage
    pub fn same_as(&self, other: &Buffer) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn len(&self) -> u64 {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }

    pub fn is_exhausted(&self) -> bool {
        self.inner.borrow().is_exhausted()
    }

    pub fn fetch(&self) -> Result<()> {
        self.inner.borrow_mut().fetch()
    }

    pub fn try_fetch(&self, timeout: Duration) -> Result<bool> {
        self.inner.borrow_mut().try_fetch(timeout)
    }

    pub fn store(&self, fetched: Result<Vec<u8>>) -> Result<bool> {
        self.inner.borrow_mut().store(fetched)
    }

    pub fn read_all(&self) -> Result<()> {
        self.inner.borrow_mut().read_all()
    }

    /// Write every byte, loading the rest of the source first
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<u64> {
        self.read_all()?;
        let storage = self.inner.borrow();
        let mut written = 0u64;
        for chunk in storage.chunks() {
            writer.write_all(chunk)?;
            written += chunk.len() as u64;
        }
        Ok(written)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.inner.borrow().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::ReaderSource;
    use std::io::Cursor;

    fn buffer_over(data: &[u8], chunk: usize) -> Buffer {
        Buffer::new(
            Box::new(ReaderSource::new(Cursor::new(data.to_vec()))),
            ReadPolicy::fixed(chunk),
        )
    }

    #[test]
    fn test_fetch_appends_chunks() {
        let buffer = buffer_over(b"0123456789", 4);
        buffer.fetch().unwrap();
        assert_eq!(buffer.len(), 4);
        buffer.fetch().unwrap();
        buffer.fetch().unwrap();
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.storage().chunk_count(), 3);
        assert!(buffer.fetch().unwrap_err().is_end_of_source());
        assert!(buffer.is_exhausted());
        // Idempotent after the end
        assert!(buffer.fetch().unwrap_err().is_end_of_source());
        assert_eq!(buffer.len(), 10);
    }

    #[test]
    fn test_store_distinguishes_transient() {
        let buffer = Buffer::from_storage(Storage::new(Fetcher::exhausted()));
        assert!(buffer.store(Ok(b"ab".to_vec())).unwrap());
        assert!(!buffer.store(Err(Error::TransientUnavailable)).unwrap());
        assert!(buffer.store(Err(Error::EndOfSource)).unwrap());
        assert!(buffer.store(Ok(Vec::new())).unwrap());
        assert_eq!(buffer.storage().chunk_count(), 1);

        let failure = std::io::Error::new(std::io::ErrorKind::Other, "gone");
        assert!(buffer.store(Err(Error::SourceFailure(failure))).is_err());
        assert_eq!(buffer.to_vec(), b"ab");
    }

    #[test]
    fn test_store_end_of_source_closes_fetcher() {
        let buffer = buffer_over(b"abcdef", 2);
        assert!(!buffer.store(Err(Error::TransientUnavailable)).unwrap());
        assert!(!buffer.is_exhausted());

        assert!(buffer.store(Err(Error::EndOfSource)).unwrap());
        assert!(buffer.is_exhausted());
        assert!(buffer.fetch().unwrap_err().is_end_of_source());
        assert!(buffer.store(Err(Error::EndOfSource)).unwrap());
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn test_store_failure_closes_fetcher() {
        let buffer = buffer_over(b"abcdef", 2);
        buffer.fetch().unwrap();
        let failure = std::io::Error::new(std::io::ErrorKind::Other, "gone");
        assert!(matches!(
            buffer.store(Err(Error::SourceFailure(failure))),
            Err(Error::SourceFailure(_))
        ));
        assert!(buffer.is_exhausted());
        assert!(buffer.fetch().unwrap_err().is_end_of_source());
        assert_eq!(buffer.to_vec(), b"ab");
    }

    /// Source that has nothing ready a few times before its data arrives
    struct NotYet {
        misses: usize,
        data: Option<Vec<u8>>,
    }

    impl Source for NotYet {
        fn fetch(&mut self, _limit: usize) -> Result<Vec<u8>> {
            if self.misses > 0 {
                self.misses -= 1;
                return Err(Error::TransientUnavailable);
            }
            self.data.take().ok_or(Error::EndOfSource)
        }
    }

    #[test]
    fn test_read_all_backs_off_on_transient_misses() {
        let source = NotYet {
            misses: 5,
            data: Some(b"late".to_vec()),
        };
        let buffer = Buffer::new(Box::new(source), ReadPolicy::default());
        let started = std::time::Instant::now();
        buffer.read_all().unwrap();
        assert!(started.elapsed() >= TRANSIENT_BACKOFF * 5);
        assert_eq!(buffer.to_vec(), b"late");
        assert!(buffer.is_exhausted());
    }

    #[test]
    fn test_write_to_reads_everything() {
        let buffer = buffer_over(b"hello, chunked world", 3);
        buffer.fetch().unwrap();
        let mut out = Vec::new();
        let written = buffer.write_to(&mut out).unwrap();
        assert_eq!(written, 20);
        assert_eq!(out, b"hello, chunked world");
    }

    #[test]
    fn test_locate_fetches_on_demand() {
        let buffer = buffer_over(b"abcdefghij", 4);
        let (id, offset) = buffer.storage_mut().locate(9).unwrap();
        assert_eq!(offset, 1);
        assert_eq!(buffer.storage().chunk(id), b"ij");
        assert!(buffer.storage_mut().locate(10).unwrap_err().is_boundary());
    }

    #[test]
    fn test_unlink_invalidates_handle() {
        let buffer = buffer_over(b"abcdef", 2);
        buffer.read_all().unwrap();
        let mut storage = buffer.storage_mut();
        let first = storage.first().unwrap();
        let second = storage.next(first).unwrap();
        storage.unlink(second);
        assert!(!storage.contains(second));
        assert_eq!(storage.len(), 4);
        assert_eq!(storage.measured_len(), 4);

        // The freed slot is reused with a new generation
        storage.push_back(b"xy".to_vec());
        assert!(!storage.contains(second));
        assert_eq!(storage.to_vec(), b"abefxy");
    }
}
