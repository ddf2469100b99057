//! hexstream library - Core functionality for the streaming byte editor
//!
//! The buffer core (storage, pointer, fetch, nonblock) works on any byte
//! source; the remaining modules build the terminal editor on top of it.

pub mod argf;
pub mod config;
pub mod editor;
pub mod encoding;
pub mod error;
pub mod expr;
pub mod fetch;
pub mod nonblock;
pub mod pointer;
pub mod save;
pub mod storage;
pub mod types;
pub mod ui;
pub mod undo;

pub use error::{Error, Result};
pub use pointer::{ByteCursor, Pointer, RemoveResult};
pub use storage::Buffer;
