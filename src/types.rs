//! Core data types for hexstream
//!
//! Editor modes, the clip stack shared by cut and paste, and the one-line
//! prompt used by the goto/insert/write dialogs.

/// Bytes shown on one row of the hex view
pub const BYTES_PER_LINE: u64 = 16;

/// What a text prompt is asking for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// Address to jump to
    Goto,
    /// Expression inserted before the cursor
    Insert,
    /// Expression appended after the cursor
    Append,
    /// Single byte written over the cursor
    Replace,
    /// Path the buffer is written to
    WriteTo,
}

impl PromptKind {
    pub fn label(&self) -> &'static str {
        match self {
            PromptKind::Goto => "Goto address",
            PromptKind::Insert => "Insert",
            PromptKind::Append => "Append",
            PromptKind::Replace => "Replace with",
            PromptKind::WriteTo => "Write to",
        }
    }
}

/// What a yes/no question confirms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmKind {
    /// Quit with unsaved changes
    Quit,
    /// Overwrite an existing file
    Overwrite,
}

impl ConfirmKind {
    pub fn question(&self) -> &'static str {
        match self {
            ConfirmKind::Quit => "Buffer modified. Quit anyway? (y/n)",
            ConfirmKind::Overwrite => "File exists. Overwrite? (y/n)",
        }
    }
}

/// Edit mode for the editor (dialogs, prompts, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditorMode {
    #[default]
    Normal,
    Prompt(PromptKind),
    Confirm(ConfirmKind),
}

/// Removed bytes waiting to be pasted, most recent on top
#[derive(Debug, Clone, Default)]
pub struct ClipStack {
    bytes: Vec<u8>,
}

impl ClipStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    pub fn pop(&mut self) -> Option<u8> {
        self.bytes.pop()
    }

    pub fn peek(&self) -> Option<u8> {
        self.bytes.last().copied()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Text typed into a prompt
#[derive(Debug, Clone, Default)]
pub struct PromptLine {
    text: String,
}

impl PromptLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }

    pub fn push(&mut self, ch: char) {
        self.text.push(ch);
    }

    pub fn backspace(&mut self) {
        self.text.pop();
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Take the text, leaving the line empty
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.text)
    }
}
