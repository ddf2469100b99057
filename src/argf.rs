//! Concatenated input from command line files
//!
//! With no paths, [`Argf`] reads standard input. Otherwise it reads each file
//! in turn as one continuous stream, like `cat`.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

pub struct Argf {
    pending: VecDeque<PathBuf>,
    reader: Option<Box<dyn Read + Send>>,
}

fn open(path: &Path) -> io::Result<File> {
    let wrap = |e: io::Error| io::Error::new(e.kind(), format!("{}: {}", path.display(), e));
    let file = File::open(path).map_err(wrap)?;
    if file.metadata().map_err(wrap)?.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("{}: can not read a directory", path.display()),
        ));
    }
    Ok(file)
}

impl Argf {
    /// Open the first path right away so a bad name fails before the editor starts
    pub fn new<I, P>(paths: I) -> io::Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut pending: VecDeque<PathBuf> = paths.into_iter().map(Into::into).collect();
        let reader: Box<dyn Read + Send> = match pending.pop_front() {
            Some(first) => Box::new(open(&first)?),
            None => Box::new(io::stdin()),
        };
        Ok(Self {
            pending,
            reader: Some(reader),
        })
    }

    /// Move on to the next file. False when none is left.
    fn advance(&mut self) -> io::Result<bool> {
        self.reader = None;
        match self.pending.pop_front() {
            Some(path) => {
                log::debug!("argf: continuing with {}", path.display());
                self.reader = Some(Box::new(open(&path)?));
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Read for Argf {
    /// Fills as much of `buf` as the current files allow; a file ending
    /// mid-read continues into the next one.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let reader = match self.reader.as_mut() {
                Some(reader) => reader,
                None => break,
            };
            match reader.read(&mut buf[filled..]) {
                Ok(0) => {
                    if !self.advance()? {
                        break;
                    }
                }
                Ok(n) => {
                    filled += n;
                    // A partial read from a pipe or tty is returned as is.
                    if self.pending.is_empty() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if filled > 0 {
                        break;
                    }
                    return Err(e);
                }
            }
        }
        Ok(filled)
    }
}
