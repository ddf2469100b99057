//! Blocking-to-pollable bridge for hexstream
//!
//! A [`NonBlock`] owns one worker thread that runs a blocking getter (read a
//! key, read a block of the source) once per request. Requests and responses
//! travel over zero-capacity channels, so at most one request is ever in
//! flight and the caller can never observe a stale response.
//!
//! There is no way to interrupt the getter itself. Closing only drops the
//! request channel; the worker notices after its current call returns.

use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::thread;
use std::time::Duration;

/// The worker thread is gone or the bridge was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed;

impl From<Closed> for io::Error {
    fn from(_: Closed) -> Self {
        io::Error::new(io::ErrorKind::BrokenPipe, "worker closed")
    }
}

impl From<Closed> for crate::error::Error {
    fn from(closed: Closed) -> Self {
        crate::error::Error::SourceFailure(closed.into())
    }
}

/// Single-slot request/response mailbox in front of a worker thread
pub struct NonBlock<Q, T, E> {
    requests: Option<SyncSender<Q>>,
    responses: Receiver<Result<T, E>>,
    /// A request was sent and its response not yet received
    pending: bool,
}

impl<Q, T, E> NonBlock<Q, T, E>
where
    Q: Send + 'static,
    T: Send + 'static,
    E: From<Closed> + Send + 'static,
{
    /// Spawn the worker. `getter` is called once for every request.
    pub fn new<F>(name: &str, mut getter: F) -> io::Result<Self>
    where
        F: FnMut(Q) -> Result<T, E> + Send + 'static,
    {
        let (req_tx, req_rx) = mpsc::sync_channel::<Q>(0);
        let (res_tx, res_rx) = mpsc::sync_channel::<Result<T, E>>(0);

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for request in req_rx {
                    let response = getter(request);
                    if res_tx.send(response).is_err() {
                        break;
                    }
                }
                log::debug!("nonblock worker exiting");
            })?;

        Ok(Self {
            requests: Some(req_tx),
            responses: res_rx,
            pending: false,
        })
    }

    /// Whether a request is in flight
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Send a request unless one is already in flight. In that case `request`
    /// is dropped and the earlier one keeps its place.
    fn submit(&mut self, request: Q) -> Result<(), Closed> {
        if self.pending {
            return Ok(());
        }
        let sender = self.requests.as_ref().ok_or(Closed)?;
        sender.send(request).map_err(|_| Closed)?;
        self.pending = true;
        Ok(())
    }

    fn finish(&mut self, response: Result<T, E>) -> Result<T, E> {
        self.pending = false;
        response
    }

    /// Block until the response arrives
    fn wait(&mut self) -> Result<T, E> {
        match self.responses.recv() {
            Ok(response) => self.finish(response),
            Err(_) => {
                self.pending = false;
                Err(Closed.into())
            }
        }
    }

    /// Request and wait
    pub fn get(&mut self, request: Q) -> Result<T, E> {
        self.submit(request)?;
        self.wait()
    }

    /// Request and wait at most `timeout`. `None` means the deadline passed;
    /// the request stays in flight and the next call picks up its response.
    pub fn try_get(&mut self, request: Q, timeout: Duration) -> Option<Result<T, E>> {
        if let Err(closed) = self.submit(request) {
            return Some(Err(closed.into()));
        }
        match self.responses.recv_timeout(timeout) {
            Ok(response) => Some(self.finish(response)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                self.pending = false;
                Some(Err(Closed.into()))
            }
        }
    }

    /// Request, then keep calling `side_work` until the response arrives.
    /// When `side_work` returns false it is not called again and this blocks.
    pub fn get_or_with<W>(&mut self, request: Q, mut side_work: W) -> Result<T, E>
    where
        W: FnMut() -> bool,
    {
        self.submit(request)?;
        loop {
            match self.responses.try_recv() {
                Ok(response) => return self.finish(response),
                Err(TryRecvError::Empty) => {
                    if !side_work() {
                        return self.wait();
                    }
                }
                Err(TryRecvError::Disconnected) => {
                    self.pending = false;
                    return Err(Closed.into());
                }
            }
        }
    }

    /// Stop accepting requests. The worker exits once its current call returns.
    pub fn close(&mut self) {
        self.requests = None;
    }
}

impl<T, E> NonBlock<(), T, E>
where
    T: Send + 'static,
    E: From<Closed> + Send + 'static,
{
    /// [`NonBlock::get_or_with`] for getters that take no argument
    pub fn get_or<W>(&mut self, side_work: W) -> Result<T, E>
    where
        W: FnMut() -> bool,
    {
        self.get_or_with((), side_work)
    }
}

impl<Q, T, E> Drop for NonBlock<Q, T, E> {
    fn drop(&mut self) {
        self.requests = None;
    }
}
