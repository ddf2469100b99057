//! Editor state and operations for hexstream
//!
//! A [`Session`] owns the shared buffer and the two pointers into it: the
//! cursor, and the window marking the first byte on screen. Every key handler
//! in the terminal front end ends up in one of the methods here.

use crate::encoding::{self, Encoding};
use crate::error::Error;
use crate::expr;
use crate::pointer::{LoadedCursor, Pointer, RemoveResult};
use crate::save;
use crate::storage::Buffer;
use crate::types::{ClipStack, EditorMode, PromptKind, PromptLine, BYTES_PER_LINE};
use crate::undo::{UndoLog, UndoRecord};
use anyhow::{anyhow, Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Names shown in the status bar for characters that are otherwise invisible
fn unicode_name(ch: char) -> Option<&'static str> {
    match ch {
        '\u{FEFF}' => Some("ByteOrderMark"),
        '\u{FFFE}' => Some("Reverted ByteOrderMark"),
        '\u{200D}' => Some("ZeroWidthJoin"),
        '\u{202E}' => Some("RightToLeftOverride"),
        '\u{202D}' => Some("LeftToRightOverride"),
        _ => None,
    }
}

/// Parse a number the way the prompts accept it: `0x`, `0o`, `0b` prefixes or decimal
pub fn parse_number(text: &str) -> Result<u64> {
    let text = text.trim();
    let prefixed = |lower: &str, upper: &str| {
        text.strip_prefix(lower).or_else(|| text.strip_prefix(upper))
    };
    let (digits, radix) = if let Some(rest) = prefixed("0x", "0X") {
        (rest, 16)
    } else if let Some(rest) = prefixed("0o", "0O") {
        (rest, 8)
    } else if let Some(rest) = prefixed("0b", "0B") {
        (rest, 2)
    } else {
        (text, 10)
    };
    u64::from_str_radix(digits, radix).with_context(|| format!("invalid number `{}`", text))
}

/// The editing session
pub struct Session {
    buffer: Buffer,
    cursor: Pointer,
    /// First byte on screen, always at a line start
    window: Pointer,
    encoding: Box<dyn Encoding>,
    undo_log: UndoLog,
    /// Files already backed up during this session
    overwritten: HashSet<PathBuf>,
    /// Bytes removed with `x`, waiting for `p`/`P`
    pub clip: ClipStack,
    /// Where `w` offers to write
    pub save_path: PathBuf,
    /// Whether the buffer differs from what was last written
    pub modified: bool,
    /// Current editor mode
    pub mode: EditorMode,
    /// Input buffer for prompts
    pub input: PromptLine,
    /// Status message to display
    pub status_message: Option<String>,
}

impl Session {
    /// Start a session on `buffer`. An empty source is a `NoData` error.
    pub fn new(buffer: Buffer, save_path: PathBuf) -> Result<Self> {
        let cursor = Pointer::new(&buffer)?;
        let window = cursor.clone();
        let mut probe = LoadedCursor::new(cursor.clone());
        let encoding = encoding::detect(&mut probe);
        log::debug!("session: detected {} for {}", encoding.mode_str(), save_path.display());
        Ok(Self {
            buffer,
            cursor,
            window,
            encoding,
            undo_log: UndoLog::new(),
            overwritten: HashSet::new(),
            clip: ClipStack::new(),
            save_path,
            modified: false,
            mode: EditorMode::Normal,
            input: PromptLine::new(),
            status_message: None,
        })
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn cursor(&self) -> &Pointer {
        &self.cursor
    }

    pub fn window(&self) -> &Pointer {
        &self.window
    }

    pub fn encoding(&self) -> &dyn Encoding {
        self.encoding.as_ref()
    }

    pub fn set_encoding(&mut self, encoding: Box<dyn Encoding>) {
        self.encoding = encoding;
    }

    /// Nothing is left to edit once every byte was removed
    pub fn is_finished(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_log.len()
    }

    /// Set a status message
    pub fn set_status(&mut self, msg: impl Into<String>) {
        self.status_message = Some(msg.into());
    }

    /// Clear status message
    pub fn clear_status(&mut self) {
        self.status_message = None;
    }

    /// Navigation never aborts the session. Running into either end is
    /// silent; anything else is shown to the user.
    fn report(&mut self, result: crate::error::Result<()>) {
        match result {
            Ok(()) | Err(Error::Boundary) => {}
            Err(e) => {
                log::warn!("session: {}", e);
                self.set_status(e.to_string());
            }
        }
    }

    // ---- movement ----

    pub fn forward(&mut self) {
        let r = self.cursor.next();
        self.report(r);
    }

    pub fn backward(&mut self) {
        let r = self.cursor.prev();
        self.report(r);
    }

    pub fn next_line(&mut self) {
        let r = self.cursor.skip(BYTES_PER_LINE);
        self.report(r);
    }

    pub fn previous_line(&mut self) {
        let r = self.cursor.rewind(BYTES_PER_LINE);
        self.report(r);
    }

    pub fn begin_of_line(&mut self) {
        let n = self.cursor.address() % BYTES_PER_LINE;
        if n > 0 {
            let r = self.cursor.rewind(n);
            self.report(r);
        }
    }

    pub fn end_of_line(&mut self) {
        let n = BYTES_PER_LINE - self.cursor.address() % BYTES_PER_LINE - 1;
        if n > 0 {
            let r = self.cursor.skip(n);
            self.report(r);
        }
    }

    pub fn begin_of_file(&mut self) -> Result<()> {
        self.cursor = Pointer::new(&self.buffer)?;
        self.window = self.cursor.clone();
        Ok(())
    }

    pub fn end_of_file(&mut self) {
        let r = self.cursor.go_end_of_file();
        self.report(r);
    }

    /// Jump to the address typed at the goto prompt
    pub fn goto(&mut self, text: &str) -> Result<()> {
        let address = parse_number(text)?;
        let r = self.cursor.goto(address);
        self.report(r);
        Ok(())
    }

    // ---- edits ----

    fn record(&mut self, record: UndoRecord) {
        self.undo_log.push(record, self.modified);
        self.modified = true;
    }

    /// Re-derive the window after a structural edit. Any remove may have
    /// freed the chunk it pointed into.
    fn resync_window(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        if self.window.resync().is_err() {
            self.window = self.cursor.clone();
        }
        self.align_window();
    }

    fn align_window(&mut self) {
        let n = self.window.address() % BYTES_PER_LINE;
        if n > 0 {
            let r = self.window.rewind(n);
            self.report(r);
        }
    }

    /// Remove the byte under the cursor onto the clip stack
    pub fn remove_byte(&mut self) -> RemoveResult {
        let address = self.cursor.address();
        let byte = self.cursor.value();
        self.clip.push(byte);
        self.record(UndoRecord::Remove { address, byte });

        let result = self.cursor.remove();
        match result {
            RemoveResult::All => log::debug!("session: buffer emptied"),
            RemoveResult::Refresh => {
                self.window = self.cursor.clone();
                self.align_window();
            }
            RemoveResult::Success => self.resync_window(),
        }
        result
    }

    /// Insert the most recently removed byte after the cursor
    pub fn paste_after(&mut self) {
        let Some(byte) = self.clip.pop() else {
            return;
        };
        let address = self.cursor.address() + 1;
        self.cursor.append(byte);
        self.record(UndoRecord::Insert { address, len: 1 });
        self.resync_window();
    }

    /// Insert the most recently removed byte at the cursor
    pub fn paste_before(&mut self) {
        let Some(byte) = self.clip.pop() else {
            return;
        };
        let address = self.cursor.address();
        self.cursor.insert(byte);
        self.record(UndoRecord::Insert { address, len: 1 });
        self.resync_window();
    }

    /// Insert the bytes of an expression before the cursor. Returns how many.
    pub fn insert_expr(&mut self, text: &str) -> Result<usize> {
        let bytes = expr::evaluate(text, self.encoding.as_ref())?;
        if bytes.is_empty() {
            return Ok(0);
        }
        let address = self.cursor.address();
        self.cursor.insert_bytes(&bytes);
        self.record(UndoRecord::Insert {
            address,
            len: bytes.len() as u64,
        });
        self.resync_window();
        Ok(bytes.len())
    }

    /// Insert the bytes of an expression after the cursor. Returns how many.
    pub fn append_expr(&mut self, text: &str) -> Result<usize> {
        let bytes = expr::evaluate(text, self.encoding.as_ref())?;
        if bytes.is_empty() {
            return Ok(0);
        }
        let address = self.cursor.address() + 1;
        self.cursor.append_bytes(&bytes);
        self.record(UndoRecord::Insert {
            address,
            len: bytes.len() as u64,
        });
        self.resync_window();
        Ok(bytes.len())
    }

    /// Overwrite the byte under the cursor with the number typed at the prompt
    pub fn replace_byte(&mut self, text: &str) -> Result<()> {
        let value = parse_number(text)?;
        let value = u8::try_from(value).map_err(|_| anyhow!("{} does not fit in a byte", value))?;
        let address = self.cursor.address();
        let old = self.cursor.value();
        self.cursor.set_value(value);
        self.record(UndoRecord::Replace { address, old });
        Ok(())
    }

    /// Reverse the most recent edit
    pub fn undo(&mut self) -> Result<()> {
        let Some((record, was_modified)) = self.undo_log.pop() else {
            self.set_status("Nothing to undo");
            return Ok(());
        };
        let applied = record.apply(&self.buffer)?;
        self.modified = was_modified;
        match applied.cursor {
            Some(cursor) => {
                self.cursor = cursor;
                self.resync_window();
            }
            None => log::debug!("session: undo emptied the buffer"),
        }
        Ok(())
    }

    // ---- prompts ----

    /// Text a prompt starts with
    pub fn prompt_default(&self, kind: PromptKind) -> String {
        match kind {
            PromptKind::Goto => "0x".to_string(),
            PromptKind::Insert | PromptKind::Append => "0x00".to_string(),
            PromptKind::Replace => format!("0x{:02X}", self.cursor.value()),
            PromptKind::WriteTo => self.save_path.display().to_string(),
        }
    }

    // ---- saving ----

    /// Whether writing to `path` has to be confirmed first
    pub fn needs_overwrite_confirm(&self, path: &Path) -> bool {
        path.exists() && !self.overwritten.contains(path)
    }

    /// Write the whole buffer to `path`. The first overwrite of a file in a
    /// session keeps the previous content as `name~` when `backup` is set.
    pub fn write_to_path(&mut self, path: &Path, backup: bool) -> Result<u64> {
        let first_overwrite = path.exists() && !self.overwritten.contains(path);
        let written = save::save_buffer(&self.buffer, path, backup && first_overwrite)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if first_overwrite {
            self.overwritten.insert(path.to_path_buf());
        }
        self.modified = false;
        self.save_path = path.to_path_buf();
        // Loading the rest may have left the window on a freshly fetched line.
        self.resync_window();
        self.set_status(format!("Wrote {} bytes to {}", written, path.display()));
        Ok(written)
    }

    // ---- view ----

    /// Move the window so the cursor line is among the `height` visible lines
    pub fn scroll_to_cursor(&mut self, height: usize) {
        let height = height.max(1) as u64;
        let cursor = self.cursor.address();
        let window = self.window.address();
        let top = if cursor < window {
            cursor - cursor % BYTES_PER_LINE
        } else if cursor >= window + BYTES_PER_LINE * height {
            cursor - cursor % BYTES_PER_LINE - BYTES_PER_LINE * (height - 1)
        } else {
            return;
        };
        let mut moved = self.cursor.clone();
        if moved.goto(top).is_ok() {
            self.window = moved;
        }
    }

    /// The status bar text: modified marker, encoding, byte, rune and position
    pub fn status_line(&self) -> String {
        let value = self.cursor.value();
        let mut line = format!(
            "{}[{}]{:4}='\\x{:02X}'",
            if self.modified { '*' } else { ' ' },
            self.encoding.mode_str(),
            value,
            value
        );

        let mut probe = LoadedCursor::new(self.cursor.clone());
        match self.encoding.rune_over(&mut probe) {
            Some(rune) => {
                line.push_str(&format!("({}/{}:U+{:04X}", rune.pos + 1, rune.len, rune.ch as u32));
                if let Some(name) = unicode_name(rune.ch) {
                    line.push(':');
                    line.push_str(name);
                }
                line.push(')');
            }
            None => line.push_str(&format!("(bin:'\\x{:02X}')", value)),
        }

        let address = self.cursor.address();
        let len = self.buffer.len();
        line.push_str(&format!(" @ {}=0x{:X}/{}=0x{:X}", address, address, len, len));
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Utf16;
    use crate::fetch::{ReadPolicy, ReaderSource, ThreadedSource};
    use std::io::{self, Cursor, Read};
    use std::thread;
    use std::time::{Duration, Instant};

    fn session_over(source: &[u8], chunk: usize) -> Session {
        let buffer = Buffer::new(
            Box::new(ReaderSource::new(Cursor::new(source.to_vec()))),
            ReadPolicy::fixed(chunk),
        );
        Session::new(buffer, PathBuf::from("dummy")).unwrap()
    }

    fn content(session: &Session) -> Vec<u8> {
        let mut out = Vec::new();
        session.buffer().write_to(&mut out).unwrap();
        out
    }

    #[test]
    fn test_no_modify() {
        let session = session_over(b"1234567890", 4);
        assert_eq!(content(&session), b"1234567890");
        assert!(!session.modified);
    }

    #[test]
    fn test_remove_first_byte() {
        let mut session = session_over(b"1234567890", 4);
        assert_eq!(session.remove_byte(), RemoveResult::Success);
        assert_eq!(content(&session), b"234567890");
        assert!(session.modified);
        assert_eq!(session.clip.peek(), Some(b'1'));
    }

    #[test]
    fn test_insert_zero_byte() {
        let mut session = session_over(b"1234567890", 4);
        session.insert_expr("0").unwrap();
        assert_eq!(content(&session), b"\x001234567890");
    }

    #[test]
    fn test_forward_and_remove() {
        let mut session = session_over(b"1234567890", 4);
        session.forward();
        session.remove_byte();
        assert_eq!(content(&session), b"134567890");
    }

    #[test]
    fn test_remove_at_end_of_file() {
        let mut session = session_over(b"1234567890", 4);
        session.end_of_file();
        session.remove_byte();
        assert_eq!(content(&session), b"123456789");
        assert_eq!(session.cursor().address(), 8);
        assert_eq!(session.cursor().value(), b'9');
    }

    #[test]
    fn test_remove_end_of_line() {
        for chunk in [4, 16] {
            let mut session = session_over(b"0123456789ABCDEFG", chunk);
            session.end_of_line();
            assert_eq!(session.cursor().address(), 15);
            session.remove_byte();
            assert_eq!(content(&session), b"0123456789ABCDEG");
        }
    }

    #[test]
    fn test_end_of_line_backward_remove() {
        let mut session = session_over(b"0123456789ABCDEFG", 4);
        session.end_of_line();
        session.backward();
        session.remove_byte();
        assert_eq!(content(&session), b"0123456789ABCDFG");
    }

    #[test]
    fn test_next_line_and_remove() {
        let mut session = session_over(b"0123456789ABCDEFGHI", 4);
        session.next_line();
        session.remove_byte();
        assert_eq!(content(&session), b"0123456789ABCDEFHI");
    }

    #[test]
    fn test_cut_and_paste_after() {
        let mut session = session_over(b"0123456789ABCDEFGHI", 4);
        session.remove_byte();
        session.paste_after();
        assert_eq!(content(&session), b"1023456789ABCDEFGHI");
        assert!(session.clip.is_empty());
    }

    #[test]
    fn test_cut_and_paste_before() {
        let mut session = session_over(b"0123456789ABCDEFGHI", 4);
        session.end_of_line();
        session.remove_byte();
        session.begin_of_file().unwrap();
        session.paste_before();
        assert_eq!(content(&session), b"F0123456789ABCDEGHI");
    }

    #[test]
    fn test_previous_line_and_paste() {
        let mut session = session_over(b"0123456789ABCDEFGHIJ", 4);
        session.end_of_file();
        session.remove_byte();
        session.previous_line();
        session.paste_before();
        assert_eq!(content(&session), b"01J23456789ABCDEFGHI");
    }

    #[test]
    fn test_empty_source_is_no_data() {
        let buffer = Buffer::new(
            Box::new(ReaderSource::new(Cursor::new(Vec::new()))),
            ReadPolicy::default(),
        );
        let err = Session::new(buffer, PathBuf::from("dummy")).err().unwrap();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NoData)));
    }

    #[test]
    fn test_paste_with_empty_clip_is_noop() {
        let mut session = session_over(b"ab", 4);
        session.paste_after();
        session.paste_before();
        assert_eq!(content(&session), b"ab");
        assert!(!session.modified);
        assert_eq!(session.undo_depth(), 0);
    }

    #[test]
    fn test_remove_everything_finishes() {
        let mut session = session_over(b"ab", 4);
        assert_eq!(session.remove_byte(), RemoveResult::Success);
        assert_eq!(session.remove_byte(), RemoveResult::All);
        assert!(session.is_finished());
    }

    #[test]
    fn test_undo_restores_content_and_modified_flag() {
        let mut session = session_over(b"0123456789ABCDEFGHIJ", 4);
        session.forward();
        session.remove_byte();
        session.append_expr(r#""xy""#).unwrap();
        session.replace_byte("0x41").unwrap();
        session.end_of_file();
        session.remove_byte();
        assert_eq!(content(&session), b"0Axy3456789ABCDEFGHI");
        assert_eq!(session.undo_depth(), 4);

        for _ in 0..4 {
            session.undo().unwrap();
        }
        assert_eq!(content(&session), b"0123456789ABCDEFGHIJ");
        assert!(!session.modified);
        // undo leaves the clip stack alone
        assert_eq!(session.clip.len(), 2);

        session.undo().unwrap();
        assert_eq!(session.status_message.as_deref(), Some("Nothing to undo"));
    }

    #[test]
    fn test_undo_of_insert_puts_cursor_back() {
        let mut session = session_over(b"abcd", 4);
        session.forward();
        session.insert_expr("0x01 0x02").unwrap();
        assert_eq!(content(&session), b"a\x01\x02bcd");
        session.undo().unwrap();
        assert_eq!(content(&session), b"abcd");
        assert_eq!(session.cursor().address(), 1);
        assert_eq!(session.cursor().value(), b'b');
    }

    #[test]
    fn test_replace_rejects_large_values() {
        let mut session = session_over(b"a", 4);
        assert!(session.replace_byte("256").is_err());
        assert!(session.replace_byte("zz").is_err());
        session.replace_byte("0b1000010").unwrap();
        assert_eq!(content(&session), b"B");
    }

    #[test]
    fn test_goto() {
        let mut session = session_over(b"0123456789ABCDEFGHIJ", 4);
        session.goto("0x11").unwrap();
        assert_eq!(session.cursor().value(), b'H');
        session.goto("3").unwrap();
        assert_eq!(session.cursor().value(), b'3');
        session.goto("1000").unwrap();
        assert_eq!(session.cursor().address(), 19);
        assert!(session.goto("0x").is_err());
    }

    #[test]
    fn test_line_movement_stops_at_edges() {
        let mut session = session_over(b"0123456789ABCDEFGHIJ", 4);
        session.previous_line();
        assert_eq!(session.cursor().address(), 0);
        session.next_line();
        session.next_line();
        assert_eq!(session.cursor().address(), 19);
        session.begin_of_line();
        assert_eq!(session.cursor().address(), 16);
        session.end_of_line();
        assert_eq!(session.cursor().address(), 19);
        assert!(session.status_message.is_none());
    }

    #[test]
    fn test_scroll_to_cursor() {
        let data: Vec<u8> = (0..200u8).collect();
        let mut session = session_over(&data, 8);
        session.goto("100").unwrap();
        session.scroll_to_cursor(3);
        // cursor line starts at 96; it becomes the bottom of three lines
        assert_eq!(session.window().address(), 64);

        session.goto("5").unwrap();
        session.scroll_to_cursor(3);
        assert_eq!(session.window().address(), 0);
    }

    #[test]
    fn test_window_survives_removal_of_its_chunk() {
        let mut session = session_over(b"0123456789ABCDEFG", 16);
        session.end_of_file();
        session.scroll_to_cursor(1);
        assert_eq!(session.window().address(), 16);

        assert_eq!(session.remove_byte(), RemoveResult::Refresh);
        assert!(session.window().is_valid());
        assert_eq!(session.window().address(), 0);
        assert_eq!(session.cursor().value(), b'F');
    }

    #[test]
    fn test_status_line() {
        let mut session = session_over("Aé".as_bytes(), 8);
        assert_eq!(session.status_line(), " [UTF8]  65='\\x41'(1/1:U+0041) @ 0=0x0/3=0x3");
        session.forward();
        session.forward();
        session.replace_byte("0xA9").unwrap();
        assert!(session.status_line().starts_with("*[UTF8] 169='\\xA9'(2/2:U+00E9)"));

        session.set_encoding(Box::new(Utf16::le()));
        assert!(session.status_line().contains("[16LE]"));
    }

    /// Hands out `first` at once, then stalls before reporting the end
    struct StallingReader {
        first: Option<Vec<u8>>,
        stall: Duration,
    }

    impl Read for StallingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.first.take() {
                Some(data) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                None => {
                    thread::sleep(self.stall);
                    Ok(0)
                }
            }
        }
    }

    #[test]
    fn test_status_line_does_not_wait_for_input() {
        let reader = StallingReader {
            first: Some(vec![0xC3]),
            stall: Duration::from_secs(1),
        };
        let source = ThreadedSource::spawn(reader).unwrap();
        let buffer = Buffer::new(Box::new(source), ReadPolicy::fixed(16));

        let started = Instant::now();
        let mut session = Session::new(buffer, PathBuf::from("dummy")).unwrap();
        let line = session.status_line();
        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(line.contains("(bin:'\\xC3')"), "{}", line);

        session.set_encoding(Box::new(Utf16::be()));
        let started = Instant::now();
        assert!(session.status_line().contains("[16BE]"));
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn test_bom_selects_encoding() {
        let session = session_over(&[0xFF, 0xFE, 0x41, 0x00], 8);
        assert_eq!(session.encoding().mode_str(), "16LE");
        assert!(session.status_line().contains("U+FEFF:ByteOrderMark"));
    }

    #[test]
    fn test_prompt_defaults() {
        let session = session_over(b"\x7f", 8);
        assert_eq!(session.prompt_default(PromptKind::Replace), "0x7F");
        assert_eq!(session.prompt_default(PromptKind::Goto), "0x");
        assert_eq!(session.prompt_default(PromptKind::WriteTo), "dummy");
    }

    #[test]
    fn test_write_to_path_backs_up_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, b"previous").unwrap();

        let mut session = session_over(b"hello", 2);
        session.remove_byte();
        assert!(session.needs_overwrite_confirm(&path));
        assert_eq!(session.write_to_path(&path, true).unwrap(), 4);
        assert!(!session.modified);
        assert!(!session.needs_overwrite_confirm(&path));
        assert_eq!(std::fs::read(&path).unwrap(), b"ello");
        assert_eq!(std::fs::read(save::backup_path(&path)).unwrap(), b"previous");

        session.paste_before();
        session.write_to_path(&path, true).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        assert_eq!(std::fs::read(save::backup_path(&path)).unwrap(), b"previous");
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("0x1F").unwrap(), 31);
        assert_eq!(parse_number(" 42 ").unwrap(), 42);
        assert_eq!(parse_number("0o17").unwrap(), 15);
        assert!(parse_number("").is_err());
    }
}
