//! The terminal capability.
//!
//! All output is accumulated as ANSI sequences in one buffer and flushed in
//! a single write to prevent flicker. Raw mode is entered on setup and
//! restored on drop. Positioned puts of result rows are escape-aware: they
//! can skip leading display columns (horizontal panning) and clip at the
//! right edge without breaking coloring.

pub mod keys;

use std::io::{self, Write};

use crossterm::terminal;
use unicode_width::UnicodeWidthChar;

pub use keys::{flush_input, pending, poll_event, read_key, Key, UiEvent};

/// Display width of one character as the UI renders it: control characters
/// show as `^X` and take two columns.
pub fn char_cols(ch: char) -> usize {
    if ch < ' ' || ch == '\x7f' {
        2
    } else {
        ch.width().unwrap_or(1)
    }
}

/// Terminal screen in raw mode, with single-flush buffered output.
pub struct Screen {
    buf: Vec<u8>,
    /// Screen width in columns.
    pub cols: usize,
    /// Screen height in rows.
    pub rows: usize,
    /// Suppress colors (toggled at runtime).
    pub mono: bool,
    raw: bool,
}

impl Screen {
    /// Enter raw mode and clear the screen.
    ///
    /// # Errors
    ///
    /// Fails when there is no TTY to put into raw mode.
    pub fn setup() -> io::Result<Self> {
        let (w, h) = terminal::size()?;
        terminal::enable_raw_mode()?;
        let mut screen = Self {
            buf: Vec::with_capacity(16 * 1024),
            cols: w as usize,
            rows: h as usize,
            mono: false,
            raw: true,
        };
        screen.clear();
        screen.flush()?;
        Ok(screen)
    }

    /// A detached screen for rendering into the buffer only (tests).
    pub fn detached(cols: usize, rows: usize) -> Self {
        Self {
            buf: Vec::new(),
            cols,
            rows,
            mono: false,
            raw: false,
        }
    }

    /// Re-read the terminal size.
    pub fn getsize(&mut self) {
        if let Ok((w, h)) = terminal::size() {
            self.cols = w as usize;
            self.rows = h as usize;
        }
    }

    /// Record a new size delivered by a resize event.
    pub const fn resized(&mut self, cols: usize, rows: usize) {
        self.cols = cols;
        self.rows = rows;
    }

    /// Push accumulated output to the terminal in a single write.
    pub fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let mut stdout = io::stdout();
        stdout.write_all(&self.buf)?;
        stdout.flush()?;
        self.buf.clear();
        Ok(())
    }

    /// Append raw text at the current position.
    pub fn put(&mut self, text: &str) {
        self.buf.extend_from_slice(text.as_bytes());
    }

    /// Move to `row`, `col` (zero-based) and append `text`.
    pub fn put_at(&mut self, row: usize, col: usize, text: &str) {
        self.setpos(row, col);
        self.put(text);
    }

    /// Render one result row at screen `row`, panned left by `skip`
    /// display columns and clipped at the right edge. Escape sequences
    /// always pass through so coloring stays intact; NULs (filename
    /// markers) are dropped; other control characters show as inverted
    /// `^X`.
    pub fn put_row(&mut self, row: usize, text: &str, skip: usize) {
        self.setpos(row, 0);
        let budget = self.cols.saturating_sub(1);
        let mut visible = 0usize;
        let mut skipped = 0usize;
        let mut chars = text.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch == '\x1b' {
                // Copy the whole escape sequence.
                let mut seq = String::from(ch);
                if chars.peek() == Some(&'[') {
                    for c in chars.by_ref() {
                        seq.push(c);
                        if c.is_ascii_alphabetic() {
                            break;
                        }
                    }
                } else if let Some(c) = chars.next() {
                    seq.push(c);
                }
                self.put(&seq);
                continue;
            }
            if ch == '\0' {
                continue;
            }
            let w = char_cols(ch);
            if skipped < skip {
                skipped += w;
                continue;
            }
            if visible + w > budget {
                break;
            }
            if ch < ' ' || ch == '\x7f' {
                self.invert();
                if ch == '\x7f' {
                    self.put("^?");
                } else {
                    let esc = [b'^', b'@' + ch as u8];
                    self.buf.extend_from_slice(&esc);
                }
                self.normal();
            } else {
                let mut tmp = [0u8; 4];
                self.put(ch.encode_utf8(&mut tmp));
            }
            visible += w;
        }
        self.normal();
        self.erase_line();
    }

    /// Move the cursor to `row`, `col` (zero-based).
    pub fn setpos(&mut self, row: usize, col: usize) {
        let _ = write!(self.buf, "\x1b[{};{}H", row + 1, col + 1);
    }

    /// Move the cursor to the top left corner.
    pub fn home(&mut self) {
        self.buf.extend_from_slice(b"\x1b[H");
    }

    /// Clear the whole screen and home the cursor.
    pub fn clear(&mut self) {
        self.buf.extend_from_slice(b"\x1b[2J\x1b[H");
    }

    /// Erase from the cursor to the end of the line.
    pub fn erase_line(&mut self) {
        self.buf.extend_from_slice(b"\x1b[K");
    }

    /// Erase from the cursor to the end of the screen.
    pub fn erase_below(&mut self) {
        self.buf.extend_from_slice(b"\x1b[J");
    }

    /// Save the cursor position.
    pub fn save(&mut self) {
        self.buf.extend_from_slice(b"\x1b7");
    }

    /// Restore the saved cursor position.
    pub fn restore(&mut self) {
        self.buf.extend_from_slice(b"\x1b8");
    }

    /// Inverse video.
    pub fn invert(&mut self) {
        self.buf.extend_from_slice(b"\x1b[7m");
    }

    /// Reset attributes.
    pub fn normal(&mut self) {
        self.buf.extend_from_slice(b"\x1b[m");
    }

    /// Mark a row as selected (inverse video).
    pub fn select(&mut self) {
        self.invert();
    }

    /// End the selected-row rendition.
    pub fn deselect(&mut self) {
        self.normal();
    }

    /// Ring the bell.
    pub fn alert(&mut self) {
        self.buf.push(0x07);
        let _ = self.flush();
    }

    /// Scroll the screen up by `n` rows; callers repaint the prompt and
    /// the row that scrolled into view.
    pub fn pan_up(&mut self, n: usize) {
        let _ = write!(self.buf, "\x1b[{n}S");
    }

    /// Scroll the screen down by `n` rows.
    pub fn pan_down(&mut self, n: usize) {
        let _ = write!(self.buf, "\x1b[{n}T");
    }

    #[cfg(test)]
    fn take(&mut self) -> String {
        String::from_utf8_lossy(&std::mem::take(&mut self.buf)).into_owned()
    }
}

impl Drop for Screen {
    fn drop(&mut self) {
        if self.raw {
            self.buf.clear();
            self.normal();
            self.buf.extend_from_slice(b"\x1b[r");
            let _ = self.flush();
            let _ = terminal::disable_raw_mode();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_row_clips_at_width() {
        let mut s = Screen::detached(6, 10);
        s.put_row(0, "abcdefghij", 0);
        let out = s.take();
        assert!(out.contains("abcde"));
        assert!(!out.contains("abcdef"));
        assert!(out.ends_with("\x1b[m\x1b[K"));
    }

    #[test]
    fn test_put_row_skips_visible_columns_not_escapes() {
        let mut s = Screen::detached(40, 10);
        s.put_row(0, "\x1b[31mabcdef\x1b[m", 2);
        let out = s.take();
        // The color sequences survive the pan; the first two glyphs do not.
        assert!(out.contains("\x1b[31m"));
        assert!(out.contains("cdef"));
        assert!(!out.contains("ab"));
    }

    #[test]
    fn test_put_row_drops_nul_markers() {
        let mut s = Screen::detached(40, 10);
        s.put_row(0, "\0\0file.rs\0text", 0);
        let out = s.take();
        assert!(out.contains("file.rstext"));
        assert!(!out.contains('\0'));
    }

    #[test]
    fn test_put_row_renders_control_chars() {
        let mut s = Screen::detached(40, 10);
        s.put_row(0, "a\tb", 0);
        let out = s.take();
        assert!(out.contains("\x1b[7m^I\x1b[m"));
    }

    #[test]
    fn test_wide_glyphs_count_two_columns() {
        let mut s = Screen::detached(4, 10);
        s.put_row(0, "漢漢漢", 0);
        let out = s.take();
        // Budget of three columns fits only the first wide glyph.
        assert_eq!(out.matches('漢').count(), 1);
    }
}
