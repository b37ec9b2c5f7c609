//! Key input: decoded events read with a bounded poll.
//!
//! The UI thread polls with a short timeout and never blocks longer than
//! that; resize events arrive through the same channel so no signal
//! handling is needed.

use std::io;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};

/// A decoded key chord.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// A printable character.
    Char(char),
    /// Control chord, lower-cased (`Ctrl('c')`).
    Ctrl(char),
    /// Meta/Alt chord.
    Meta(char),
    /// Function key (F1-F12).
    Fn(u8),
    /// Enter/Return.
    Enter,
    /// Escape.
    Esc,
    /// Backspace.
    Backspace,
    /// Delete.
    Delete,
    /// Up arrow.
    Up,
    /// Down arrow.
    Down,
    /// Left arrow.
    Left,
    /// Right arrow.
    Right,
    /// Meta/Alt + Up.
    MetaUp,
    /// Meta/Alt + Down.
    MetaDown,
    /// Meta/Alt + Left.
    MetaLeft,
    /// Meta/Alt + Right.
    MetaRight,
    /// Home.
    Home,
    /// End.
    End,
    /// Page Up.
    PageUp,
    /// Page Down.
    PageDown,
    /// Tab.
    Tab,
    /// Shift+Tab.
    BackTab,
}

/// One event delivered to the UI loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiEvent {
    /// A key chord.
    Key(Key),
    /// The terminal was resized to `cols` x `rows`.
    Resize(usize, usize),
}

/// Poll for the next event, waiting at most `timeout`.
///
/// Returns `Ok(None)` when the timeout elapsed with no event.
pub fn poll_event(timeout: Duration) -> io::Result<Option<UiEvent>> {
    if !event::poll(timeout)? {
        return Ok(None);
    }
    match event::read()? {
        Event::Key(key) if key.kind == KeyEventKind::Press => {
            Ok(convert_key(key.code, key.modifiers).map(UiEvent::Key))
        }
        Event::Resize(w, h) => Ok(Some(UiEvent::Resize(w as usize, h as usize))),
        _ => Ok(None),
    }
}

/// Block until the next key chord (quit confirmation, help overlay).
pub fn read_key() -> io::Result<Key> {
    loop {
        if let Event::Key(key) = event::read()? {
            if key.kind == KeyEventKind::Press {
                if let Some(k) = convert_key(key.code, key.modifiers) {
                    return Ok(k);
                }
            }
        }
    }
}

/// True when a key is already waiting, without consuming it. Long scans
/// (scroll to the next file) poll this to stay interruptible.
pub fn pending() -> io::Result<bool> {
    event::poll(Duration::ZERO)
}

/// Drop any type-ahead before prompting.
pub fn flush_input() -> io::Result<()> {
    while event::poll(Duration::ZERO)? {
        let _ = event::read()?;
    }
    Ok(())
}

fn convert_key(code: KeyCode, mods: KeyModifiers) -> Option<Key> {
    let alt = mods.contains(KeyModifiers::ALT);
    let ctrl = mods.contains(KeyModifiers::CONTROL);
    Some(match code {
        KeyCode::Char(c) if ctrl => Key::Ctrl(c.to_ascii_lowercase()),
        KeyCode::Char(c) if alt => Key::Meta(c),
        KeyCode::Char(c) => Key::Char(c),
        KeyCode::F(n) => Key::Fn(n),
        KeyCode::Enter => Key::Enter,
        KeyCode::Esc => Key::Esc,
        KeyCode::Backspace => Key::Backspace,
        KeyCode::Delete => Key::Delete,
        KeyCode::Up if alt => Key::MetaUp,
        KeyCode::Down if alt => Key::MetaDown,
        KeyCode::Left if alt => Key::MetaLeft,
        KeyCode::Right if alt => Key::MetaRight,
        KeyCode::Up => Key::Up,
        KeyCode::Down => Key::Down,
        KeyCode::Left => Key::Left,
        KeyCode::Right => Key::Right,
        KeyCode::Home => Key::Home,
        KeyCode::End => Key::End,
        KeyCode::PageUp => Key::PageUp,
        KeyCode::PageDown => Key::PageDown,
        KeyCode::Tab => Key::Tab,
        KeyCode::BackTab => Key::BackTab,
        _ => return None,
    })
}
