//! TUI (Terminal User Interface) for hexstream
//!
//! A hex view built on ratatui and crossterm. Keys are read by a worker
//! thread; while the main loop waits for one it keeps pulling input into the
//! buffer and repaints at a fixed rate, so a large stream fills the screen
//! while the editor stays responsive.

use crate::config::Config;
use crate::editor::Session;
use crate::encoding::{self, Encoding, Utf16, Utf8};
use crate::nonblock::NonBlock;
use crate::types::{ConfirmKind, EditorMode, PromptKind, PromptLine, BYTES_PER_LINE};

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Clear, Paragraph};
use ratatui::Terminal;
use std::io::{self, Stdout};
use std::path::PathBuf;
use std::time::Instant;
use unicode_width::UnicodeWidthChar;

const LINE_SIZE: usize = BYTES_PER_LINE as usize;

/// The TUI application
pub struct App {
    pub session: Session,
    terminal: Terminal<CrosstermBackend<Stdout>>,
    keys: NonBlock<(), Event, io::Error>,
    config: Config,
    should_quit: bool,
    /// Path waiting for the overwrite confirmation
    pending_write: Option<PathBuf>,
}

impl App {
    pub fn new(session: Session, config: Config) -> Result<Self> {
        let keys = NonBlock::new("hexstream-keys", |()| event::read())?;

        // Set up terminal
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;

        Ok(Self {
            session,
            terminal,
            keys,
            config,
            should_quit: false,
            pending_write: None,
        })
    }

    /// Run the main event loop until quit or until every byte was removed
    pub fn run(&mut self) -> Result<()> {
        while !self.should_quit && !self.session.is_finished() {
            let height = self.data_height()?;
            self.session.scroll_to_cursor(height);
            draw(&mut self.terminal, &self.session)?;

            if let Event::Key(key) = self.next_event()? {
                if key.kind == KeyEventKind::Press {
                    self.handle_key(key)?;
                }
            }
        }
        Ok(())
    }

    /// Rows available to the hex view
    fn data_height(&self) -> Result<usize> {
        let size = self.terminal.size()?;
        Ok((size.height as usize).saturating_sub(2).max(1))
    }

    /// Wait for the next terminal event, loading input meanwhile
    fn next_event(&mut self) -> Result<Event> {
        let interval = self.config.view.redraw_interval();
        let timeout = self.config.view.fetch_timeout();
        let mut next_redraw = Instant::now() + interval;
        let mut failure = None;

        let terminal = &mut self.terminal;
        let session = &mut self.session;
        let event = self.keys.get_or(|| {
            if session.buffer().is_exhausted() {
                return false;
            }
            if let Err(e) = session.buffer().try_fetch(timeout) {
                log::warn!("ui: input failed: {}", e);
                session.set_status(format!("read failed: {}", e));
                return false;
            }
            if Instant::now() >= next_redraw {
                if let Err(e) = draw(terminal, session) {
                    failure = Some(e);
                    return false;
                }
                next_redraw = Instant::now() + interval;
            }
            true
        });

        if let Some(e) = failure {
            return Err(e);
        }
        Ok(event?)
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<()> {
        match self.session.mode {
            EditorMode::Normal => self.handle_normal_mode(key),
            EditorMode::Prompt(kind) => self.handle_prompt_mode(kind, key),
            EditorMode::Confirm(kind) => self.handle_confirm_mode(kind, key),
        }
    }

    fn open_prompt(&mut self, kind: PromptKind) {
        self.session.input = PromptLine::with_text(&self.session.prompt_default(kind));
        self.session.mode = EditorMode::Prompt(kind);
    }

    /// Handle keypress in normal mode
    fn handle_normal_mode(&mut self, key: KeyEvent) -> Result<()> {
        self.session.clear_status();
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let alt = key.modifiers.contains(KeyModifiers::ALT);
        let session = &mut self.session;

        match key.code {
            KeyCode::Char(c) if ctrl => match c {
                'b' => session.backward(),
                'f' => session.forward(),
                'n' => session.next_line(),
                'p' => session.previous_line(),
                'a' => session.begin_of_line(),
                'e' => session.end_of_line(),
                'l' => self.terminal.clear()?,
                _ => {}
            },
            KeyCode::Char(c) if alt => {
                let encoding: Option<Box<dyn Encoding>> = match c {
                    'u' => Some(Box::new(Utf8)),
                    'l' => Some(Box::new(Utf16::le())),
                    'b' => Some(Box::new(Utf16::be())),
                    _ => None,
                };
                if let Some(encoding) = encoding {
                    session.set_encoding(encoding);
                }
            }
            KeyCode::Char(c) => match c {
                'q' => self.request_quit(),
                'h' => session.backward(),
                'l' | ' ' => session.forward(),
                'j' => session.next_line(),
                'k' => session.previous_line(),
                '0' | '^' => session.begin_of_line(),
                '$' => session.end_of_line(),
                '<' => self.begin_of_file(),
                '>' | 'G' => session.end_of_file(),
                'x' => {
                    session.remove_byte();
                }
                'p' => session.paste_after(),
                'P' => session.paste_before(),
                'u' => {
                    if let Err(e) = session.undo() {
                        session.set_status(format!("{:#}", e));
                    }
                }
                'i' => self.open_prompt(PromptKind::Insert),
                'a' => self.open_prompt(PromptKind::Append),
                'r' => self.open_prompt(PromptKind::Replace),
                '&' => self.open_prompt(PromptKind::Goto),
                'w' => self.open_prompt(PromptKind::WriteTo),
                _ => {}
            },
            KeyCode::Esc => self.request_quit(),
            KeyCode::Left | KeyCode::Backspace => session.backward(),
            KeyCode::Right => session.forward(),
            KeyCode::Down => session.next_line(),
            KeyCode::Up => session.previous_line(),
            KeyCode::Home => self.begin_of_file(),
            KeyCode::End => session.end_of_file(),
            KeyCode::Delete => {
                session.remove_byte();
            }
            _ => {}
        }
        Ok(())
    }

    fn begin_of_file(&mut self) {
        if let Err(e) = self.session.begin_of_file() {
            self.session.set_status(format!("{:#}", e));
        }
    }

    fn request_quit(&mut self) {
        if self.session.modified {
            self.session.mode = EditorMode::Confirm(ConfirmKind::Quit);
        } else {
            self.should_quit = true;
        }
    }

    /// Handle keypress while a prompt is open
    fn handle_prompt_mode(&mut self, kind: PromptKind, key: KeyEvent) -> Result<()> {
        match key.code {
            KeyCode::Esc => {
                self.session.input.clear();
                self.session.mode = EditorMode::Normal;
                self.session.clear_status();
            }
            KeyCode::Enter => {
                let text = self.session.input.take();
                self.session.mode = EditorMode::Normal;
                self.submit_prompt(kind, &text);
            }
            KeyCode::Backspace => self.session.input.backspace(),
            KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.session.input.clear();
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.session.input.push(c);
            }
            _ => {}
        }
        Ok(())
    }

    fn submit_prompt(&mut self, kind: PromptKind, text: &str) {
        let session = &mut self.session;
        let result = match kind {
            PromptKind::Goto => session.goto(text),
            PromptKind::Insert => session.insert_expr(text).map(|_| ()),
            PromptKind::Append => session.append_expr(text).map(|_| ()),
            PromptKind::Replace => session.replace_byte(text),
            PromptKind::WriteTo => {
                let path = PathBuf::from(text.trim());
                if path.as_os_str().is_empty() {
                    session.set_status("No file name");
                } else if session.needs_overwrite_confirm(&path) {
                    self.pending_write = Some(path);
                    session.mode = EditorMode::Confirm(ConfirmKind::Overwrite);
                } else {
                    self.write(path);
                }
                return;
            }
        };
        if let Err(e) = result {
            session.set_status(format!("{:#}", e));
        }
    }

    /// Handle keypress while a yes/no question is shown
    fn handle_confirm_mode(&mut self, kind: ConfirmKind, key: KeyEvent) -> Result<()> {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                self.session.mode = EditorMode::Normal;
                match kind {
                    ConfirmKind::Quit => self.should_quit = true,
                    ConfirmKind::Overwrite => {
                        if let Some(path) = self.pending_write.take() {
                            self.write(path);
                        }
                    }
                }
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.session.mode = EditorMode::Normal;
                self.pending_write = None;
                self.session.clear_status();
            }
            _ => {}
        }
        Ok(())
    }

    fn write(&mut self, path: PathBuf) {
        let backup = self.config.save.create_backup;
        if let Err(e) = self.session.write_to_path(&path, backup) {
            log::warn!("ui: {:#}", e);
            self.session.set_status(format!("{:#}", e));
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.keys.close();
        // Restore terminal
        let _ = terminal::disable_raw_mode();
        let _ = self.terminal.backend_mut().execute(LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

/// Encoding named in the config, or one detected from the data
pub fn configured_encoding(name: &str) -> Option<Box<dyn Encoding>> {
    if name.eq_ignore_ascii_case("auto") {
        None
    } else {
        encoding::by_name(name)
    }
}

/// Draw the whole screen
fn draw(terminal: &mut Terminal<CrosstermBackend<Stdout>>, session: &Session) -> Result<()> {
    terminal.draw(|frame| {
        let area = frame.area();

        // Create layout: hex area, status bar, help bar
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(1),
                Constraint::Length(1),
                Constraint::Length(1),
            ])
            .split(area);

        draw_hex_area(frame, session, chunks[0]);
        draw_status_bar(frame, session, chunks[1]);
        draw_help_bar(frame, session, chunks[2]);

        if let EditorMode::Prompt(kind) = session.mode {
            let prompt_width = prompt_text(kind, session.input.as_str()).chars().count() + 1;
            let x = chunks[1].x + (prompt_width as u16).min(chunks[1].width.saturating_sub(1));
            frame.set_cursor_position((x, chunks[1].y));
        }
    })?;
    Ok(())
}

/// One character of the text column
#[derive(Debug, Clone, PartialEq, Eq)]
struct TextCell {
    address: u64,
    /// Bytes the character covers
    len: usize,
    glyph: String,
}

/// Replacement for characters that would break the layout
fn visible_char(ch: char) -> char {
    match ch {
        '\n' => '\u{FFEC}',
        '\r' => '\u{FFE9}',
        '\t' => '\u{21E5}',
        '\u{202E}' | '\u{202D}' | '\u{202C}' => '.',
        c if c.is_control() => '.',
        c => c,
    }
}

/// Decode the text column of the row starting at `start`. `rest` holds the
/// row's bytes followed by whatever is loaded after them, so a character
/// crossing the row end still decodes.
fn decode_row(start: u64, rest: &[u8], encoding: &dyn Encoding) -> Vec<TextCell> {
    let mut cells = Vec::new();
    let mut i = 0;
    while i < LINE_SIZE && i < rest.len() {
        let address = start + i as u64;
        let count = encoding.count(rest[i], address);
        let end = (i + count).min(rest.len());
        let (ch, len) = match encoding.decode(&rest[i..end]) {
            Some((ch, len)) => (visible_char(ch), len),
            None => ('.', 1),
        };
        let width = ch.width().unwrap_or(1);
        let mut glyph = ch.to_string();
        // A character keeps one cell per byte it covers
        for _ in width..len {
            glyph.push(' ');
        }
        cells.push(TextCell {
            address,
            len,
            glyph,
        });
        i += len;
    }
    cells
}

fn cell_style(column: usize) -> Style {
    if (column >> 2) & 1 == 0 {
        Style::default().fg(Color::White)
    } else {
        Style::default().fg(Color::White).add_modifier(Modifier::BOLD)
    }
}

fn cursor_style() -> Style {
    Style::default().add_modifier(Modifier::REVERSED | Modifier::BOLD)
}

/// Render the row starting at `start`
fn hex_line(start: u64, rest: &[u8], cursor: u64, encoding: &dyn Encoding) -> Line<'static> {
    let row = &rest[..rest.len().min(LINE_SIZE)];
    let mut spans = vec![Span::styled(
        format!("{:08X} ", start),
        Style::default().add_modifier(Modifier::BOLD),
    )];

    for column in 0..LINE_SIZE {
        let separator = if column == 0 { "" } else { " " };
        spans.push(Span::raw(separator));
        match row.get(column) {
            Some(byte) => {
                let style = if start + column as u64 == cursor {
                    cursor_style()
                } else {
                    cell_style(column)
                };
                spans.push(Span::styled(format!("{:02X}", byte), style));
            }
            None => spans.push(Span::raw("  ")),
        }
    }
    spans.push(Span::raw("  "));

    for cell in decode_row(start, rest, encoding) {
        let style = if cell.address <= cursor && cursor < cell.address + cell.len as u64 {
            cursor_style()
        } else {
            Style::default().fg(Color::White)
        };
        spans.push(Span::styled(cell.glyph, style));
    }

    let mut line = Line::from(spans);
    if start <= cursor && cursor < start + BYTES_PER_LINE {
        line = line.style(Style::default().add_modifier(Modifier::UNDERLINED));
    }
    line
}

/// Rows of the hex view from the window down. Only loaded bytes are shown.
fn hex_lines(session: &Session, height: usize) -> Vec<Line<'static>> {
    let window = session.window();
    let base = window.address();
    // one spare row so the last visible character can decode
    let bytes = window.peek_loaded((height + 1) * LINE_SIZE);
    let cursor = session.cursor().address();

    (0..height)
        .map(|row| row * LINE_SIZE)
        .take_while(|&offset| offset < bytes.len())
        .map(|offset| {
            hex_line(
                base + offset as u64,
                &bytes[offset..],
                cursor,
                session.encoding(),
            )
        })
        .collect()
}

/// Draw the hex view
fn draw_hex_area(frame: &mut ratatui::Frame, session: &Session, area: Rect) {
    frame.render_widget(Clear, area);
    let lines = hex_lines(session, area.height as usize);
    frame.render_widget(Paragraph::new(lines), area);
}

fn prompt_text(kind: PromptKind, input: &str) -> String {
    format!("{}> {}", kind.label(), input)
}

/// Draw the status bar
fn draw_status_bar(frame: &mut ratatui::Frame, session: &Session, area: Rect) {
    let status = match session.mode {
        EditorMode::Prompt(kind) => prompt_text(kind, session.input.as_str()),
        EditorMode::Confirm(ConfirmKind::Overwrite) => format!(
            "Overwrite {}? (y/n)",
            session.save_path.display()
        ),
        EditorMode::Confirm(kind) => kind.question().to_string(),
        EditorMode::Normal => match session.status_message {
            Some(ref msg) => msg.clone(),
            None => session.status_line(),
        },
    };

    let status_bar = Paragraph::new(Line::from(vec![Span::styled(
        format!("{:<width$}", status, width = area.width as usize),
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
    )]));

    frame.render_widget(status_bar, area);
}

/// Draw the help/shortcut bar
fn draw_help_bar(frame: &mut ratatui::Frame, session: &Session, area: Rect) {
    let shortcuts: &[(&str, &str)] = match session.mode {
        EditorMode::Prompt(_) => &[("Enter", "Apply"), ("Esc", "Cancel"), ("^U", "Clear")],
        EditorMode::Confirm(_) => &[("Y", "Yes"), ("N", "No")],
        EditorMode::Normal => &[
            ("x", "Cut"),
            ("p/P", "Paste"),
            ("i/a", "Insert"),
            ("r", "Replace"),
            ("&", "Goto"),
            ("u", "Undo"),
            ("w", "Write"),
            ("q", "Quit"),
        ],
    };

    let spans: Vec<Span> = shortcuts
        .iter()
        .flat_map(|(key, desc)| {
            vec![
                Span::styled(
                    format!(" {} ", key),
                    Style::default()
                        .fg(Color::Black)
                        .bg(Color::Cyan)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::styled(format!("{} ", desc), Style::default().fg(Color::White)),
            ]
        })
        .collect();

    let help_bar = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::DarkGray));

    frame.render_widget(help_bar, area);
}
