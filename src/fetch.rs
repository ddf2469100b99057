//! Source adapters and the read-size growth policy
//!
//! A [`Source`] hands out the next block of bytes from something blocking
//! (file, pipe, tty). The [`Fetcher`] in front of it starts with tiny reads so
//! interactive input shows up immediately, and doubles the read size on each
//! call until it reaches a ceiling.

use crate::error::{Error, Result};
use crate::nonblock::NonBlock;
use std::io::{self, Read};
use std::time::Duration;

/// First read size
pub const DEFAULT_INITIAL_READ: usize = 8;

/// Read size ceiling
pub const DEFAULT_MAX_READ: usize = 4096;

/// A blocking byte source.
///
/// `Ok` carries at most `limit` bytes and may be empty when nothing was
/// available. End of data is `Err(Error::EndOfSource)`.
pub trait Source {
    fn fetch(&mut self, limit: usize) -> Result<Vec<u8>>;

    /// Like [`Source::fetch`] but gives up after `timeout` with
    /// `Error::TransientUnavailable`. Sources that never block long just fetch.
    fn try_fetch(&mut self, limit: usize, _timeout: Duration) -> Result<Vec<u8>> {
        self.fetch(limit)
    }
}

/// Read one block from `reader`
fn read_block<R: Read + ?Sized>(reader: &mut R, limit: usize) -> Result<Vec<u8>> {
    let mut block = vec![0u8; limit.max(1)];
    loop {
        match reader.read(&mut block) {
            Ok(0) => return Err(Error::EndOfSource),
            Ok(n) => {
                block.truncate(n);
                return Ok(block);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::from_read(e)),
        }
    }
}

/// Synchronous source reading straight from a reader
pub struct ReaderSource<R> {
    reader: R,
}

impl<R: Read> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: Read> Source for ReaderSource<R> {
    fn fetch(&mut self, limit: usize) -> Result<Vec<u8>> {
        read_block(&mut self.reader, limit)
    }
}

/// Source whose reads happen on a worker thread, so a read can be waited on
/// with a deadline. A read that misses its deadline stays in flight and its
/// bytes are returned by the next call, which keeps the stream in order.
pub struct ThreadedSource {
    worker: NonBlock<usize, Vec<u8>, Error>,
}

impl ThreadedSource {
    pub fn spawn<R>(mut reader: R) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let worker = NonBlock::new("hexstream-reader", move |limit: usize| {
            read_block(&mut reader, limit)
        })?;
        Ok(Self { worker })
    }
}

impl Source for ThreadedSource {
    fn fetch(&mut self, limit: usize) -> Result<Vec<u8>> {
        self.worker.get(limit)
    }

    fn try_fetch(&mut self, limit: usize, timeout: Duration) -> Result<Vec<u8>> {
        match self.worker.try_get(limit, timeout) {
            Some(result) => result,
            None => Err(Error::TransientUnavailable),
        }
    }
}

impl Drop for ThreadedSource {
    fn drop(&mut self) {
        self.worker.close();
    }
}

/// Read-size growth policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPolicy {
    pub initial: usize,
    pub max: usize,
}

impl ReadPolicy {
    pub fn new(initial: usize, max: usize) -> Self {
        let initial = initial.max(1);
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// Every read has the same size
    pub fn fixed(size: usize) -> Self {
        Self::new(size, size)
    }
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_READ, DEFAULT_MAX_READ)
    }
}

/// Pulls blocks out of a [`Source`] with a growing read size.
/// Once the source reports its end or fails it is dropped, and every later
/// call answers `EndOfSource`.
pub struct Fetcher {
    source: Option<Box<dyn Source>>,
    read_size: usize,
    policy: ReadPolicy,
}

impl Fetcher {
    pub fn new(source: Box<dyn Source>, policy: ReadPolicy) -> Self {
        Self {
            source: Some(source),
            read_size: policy.initial,
            policy,
        }
    }

    /// A fetcher over nothing
    pub fn exhausted() -> Self {
        Self {
            source: None,
            read_size: DEFAULT_INITIAL_READ,
            policy: ReadPolicy::default(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.source.is_none()
    }

    /// Drop the source; every later read answers `EndOfSource`
    pub fn close(&mut self) {
        if self.source.take().is_some() {
            log::debug!("source closed");
        }
    }

    /// Size the next read will ask for
    pub fn read_size(&self) -> usize {
        self.read_size
    }

    fn grow(&mut self) -> usize {
        let size = self.read_size;
        if self.read_size * 2 <= self.policy.max {
            self.read_size *= 2;
        } else {
            self.read_size = self.policy.max;
        }
        size
    }

    fn settle(&mut self, result: Result<Vec<u8>>) -> Result<Vec<u8>> {
        match &result {
            Ok(data) => log::trace!("fetched {} bytes", data.len()),
            Err(Error::TransientUnavailable) => {}
            Err(e) => {
                log::debug!("source ended: {}", e);
                self.close();
            }
        }
        result
    }

    /// One blocking read
    pub fn fetch_only(&mut self) -> Result<Vec<u8>> {
        if self.source.is_none() {
            return Err(Error::EndOfSource);
        }
        let limit = self.grow();
        let result = match self.source.as_mut() {
            Some(source) => source.fetch(limit),
            None => Err(Error::EndOfSource),
        };
        self.settle(result)
    }

    /// One read bounded by `timeout`
    pub fn try_fetch_only(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        if self.source.is_none() {
            return Err(Error::EndOfSource);
        }
        let limit = self.grow();
        let result = match self.source.as_mut() {
            Some(source) => source.try_fetch(limit, timeout),
            None => Err(Error::EndOfSource),
        };
        self.settle(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::thread;

    /// Reader that waits before every read
    struct SlowReader {
        inner: Cursor<Vec<u8>>,
        delay: Duration,
    }

    impl Read for SlowReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            thread::sleep(self.delay);
            self.inner.read(buf)
        }
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        }
    }

    #[test]
    fn test_read_size_doubles_up_to_ceiling() {
        let source = ReaderSource::new(Cursor::new(vec![7u8; 1000]));
        let mut fetcher = Fetcher::new(Box::new(source), ReadPolicy::new(8, 64));

        let sizes: Vec<usize> = (0..5).map(|_| fetcher.fetch_only().unwrap().len()).collect();
        assert_eq!(sizes, vec![8, 16, 32, 64, 64]);
    }

    #[test]
    fn test_end_of_source_closes_fetcher() {
        let source = ReaderSource::new(Cursor::new(b"abc".to_vec()));
        let mut fetcher = Fetcher::new(Box::new(source), ReadPolicy::fixed(16));

        assert_eq!(fetcher.fetch_only().unwrap(), b"abc");
        assert!(fetcher.fetch_only().unwrap_err().is_end_of_source());
        assert!(fetcher.is_closed());
        assert!(fetcher.fetch_only().unwrap_err().is_end_of_source());
    }

    #[test]
    fn test_failure_closes_fetcher() {
        let mut fetcher = Fetcher::new(Box::new(ReaderSource::new(FailingReader)), ReadPolicy::default());
        assert!(matches!(fetcher.fetch_only(), Err(Error::SourceFailure(_))));
        assert!(fetcher.is_closed());
    }

    #[test]
    fn test_threaded_source_deadline_is_transient() {
        let reader = SlowReader {
            inner: Cursor::new(b"hello".to_vec()),
            delay: Duration::from_millis(80),
        };
        let source = ThreadedSource::spawn(reader).unwrap();
        let mut fetcher = Fetcher::new(Box::new(source), ReadPolicy::fixed(16));

        let first = fetcher.try_fetch_only(Duration::from_millis(1));
        assert!(first.unwrap_err().is_transient());
        assert!(!fetcher.is_closed());

        // The read that missed the deadline delivers its bytes now.
        assert_eq!(fetcher.fetch_only().unwrap(), b"hello");
        assert!(fetcher.fetch_only().unwrap_err().is_end_of_source());
    }

    #[test]
    fn test_threaded_source_keeps_order() {
        let data: Vec<u8> = (0..=255).collect();
        let source = ThreadedSource::spawn(Cursor::new(data.clone())).unwrap();
        let mut fetcher = Fetcher::new(Box::new(source), ReadPolicy::new(4, 32));

        let mut collected = Vec::new();
        loop {
            match fetcher.try_fetch_only(Duration::from_millis(50)) {
                Ok(block) => collected.extend(block),
                Err(e) if e.is_transient() => continue,
                Err(e) if e.is_end_of_source() => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(collected, data);
    }
}
