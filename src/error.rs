//! Error taxonomy for the buffer core
//!
//! Navigation and fetch operations distinguish "the source is done", "nothing
//! yet, try again", "you walked off the known data" and real I/O failures.
//! The application layer wraps these in `anyhow` like the rest of hexstream.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The underlying source is exhausted. Not a failure of the buffer.
    #[error("end of source")]
    EndOfSource,
    /// No data is available right now (e.g. a read deadline passed).
    #[error("source temporarily unavailable")]
    TransientUnavailable,
    /// Navigation past the start or the end of the known data.
    #[error("address out of range")]
    Boundary,
    /// Any other error from the source. The source is closed afterwards.
    #[error("source read failed: {0}")]
    SourceFailure(#[source] io::Error),
    /// The source produced no bytes at all.
    #[error("no data")]
    NoData,
    /// Error from a sink while writing the buffer out.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientUnavailable)
    }

    pub fn is_end_of_source(&self) -> bool {
        matches!(self, Error::EndOfSource)
    }

    pub fn is_boundary(&self) -> bool {
        matches!(self, Error::Boundary)
    }

    /// Map a raw read error onto the taxonomy
    pub fn from_read(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::TransientUnavailable,
            io::ErrorKind::UnexpectedEof => Error::EndOfSource,
            _ => Error::SourceFailure(err),
        }
    }
}
