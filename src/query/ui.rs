//! The interactive query loop.
//!
//! A single UI thread drives everything: it polls for keys with a short
//! timeout, ingests search results between keystrokes, repaints the visible
//! slice, and relaunches the search after the edit line has been quiet for
//! the quiescence delay. Each search runs on its own named thread writing
//! into a channel pipe; teardown is close-cancel-join, then rebuild.

use std::io::{self, Read, Write};
use std::process::Command;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};
use tracing::debug;

use super::editor::QueryLine;
use super::flags::FlagRegistry;
use super::ingest::ResultFeed;
use super::pipe::search_pipe;
use super::view::{is_filename, RowView};
use crate::screen::{self, Key, Screen, UiEvent};
use crate::search::{
    CancelToken, ExitStatus, SearchContext, SearchError, SearchOptions, Searcher,
};

/// Bright green prompt.
const PROMPT_COLOR: &str = "\x1b[32;1m";
/// Bright white on red for errors.
const ERROR_COLOR: &str = "\x1b[37;41;1m";
/// Pan markers at the edges of a shifted edit line.
const LARROW: &str = "\u{ab}";
const RARROW: &str = "\u{bb}";

/// Key poll timeout; one tick of the quiescence delay.
const POLL: Duration = Duration::from_millis(100);

/// Configuration of a query session.
#[derive(Debug, Clone)]
pub struct UiConfig {
    /// Prompt shown before the edit line.
    pub prompt: String,
    /// Quiescence delay in key-poll ticks (~100 ms each) before an edited
    /// query relaunches the search.
    pub delay: u32,
    /// Exit without the confirmation prompt.
    pub no_confirm: bool,
    /// Capture standard input up front and replay it into every search.
    pub read_stdin: bool,
    /// Start with colors off.
    pub mono: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            prompt: "Q>".to_owned(),
            delay: 3,
            no_confirm: false,
            read_stdin: false,
            mono: false,
        }
    }
}

/// What a finished query session reports back.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    /// Process exit status.
    pub status: ExitStatus,
    /// Number of rows printed on exit.
    pub printed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Editing the pattern, or navigating results when a row is focused.
    Query,
    /// Editing the focused result row in place.
    Edit,
}

enum Flow {
    Continue,
    /// Exit and run the print pass.
    Exit,
    /// Exit immediately without printing.
    Terminate,
}

struct ActiveSearch {
    handle: JoinHandle<()>,
    cancel: CancelToken,
    errors: Receiver<SearchError>,
}

/// The interactive query UI.
pub struct QueryUi {
    screen: Screen,
    config: UiConfig,
    searcher: Arc<dyn Searcher>,
    options: SearchOptions,
    flags: FlagRegistry,
    line: QueryLine,
    view: RowView,
    feed: ResultFeed,
    mode: Mode,
    search: Option<ActiveSearch>,
    stdin_data: Option<Arc<Vec<u8>>>,
    stdin_task: Option<JoinHandle<()>>,
    /// Engine error message, shown on its own row while "(ERROR)" blinks.
    error: Option<String>,
    /// The last error was a pattern error (drives the exit status).
    pattern_error: bool,
    /// A status message occupies the prompt row until the next tick.
    message: bool,
    /// Re-search requested by something other than an edit.
    refresh: bool,
    /// Horizontal pan of result rows, in display columns.
    skip: usize,
    /// Pan margin for the edit line.
    shift: usize,
    /// Prompt width: first edit-line column on screen.
    start: usize,
    /// The pattern stashed while the result-edit overlay borrows the line.
    saved_line: String,
    dots: usize,
}

impl QueryUi {
    /// Set up the terminal and build a session around `searcher`.
    ///
    /// # Errors
    ///
    /// Fails when no TTY is available for raw-mode input.
    pub fn new(
        searcher: Arc<dyn Searcher>,
        options: SearchOptions,
        config: UiConfig,
    ) -> io::Result<Self> {
        let mut screen = Screen::setup()?;
        screen.mono = config.mono;

        let mut flags = FlagRegistry::new();
        flags.load(&options);

        let mut line = QueryLine::new();
        line.set_text(&options.pattern);

        let stdin_data = if config.read_stdin {
            let mut data = Vec::new();
            io::stdin().read_to_end(&mut data)?;
            Some(Arc::new(data))
        } else {
            None
        };

        let start = config.prompt.chars().map(screen::char_cols).sum::<usize>() + 1;
        let shift = (screen.cols.saturating_sub(start)) / 10;

        Ok(Self {
            screen,
            config,
            searcher,
            options,
            flags,
            line,
            view: RowView::new(),
            feed: ResultFeed::new(),
            mode: Mode::Query,
            search: None,
            stdin_data,
            stdin_task: None,
            error: None,
            pattern_error: false,
            message: false,
            refresh: false,
            skip: 0,
            shift,
            start,
            saved_line: String::new(),
            dots: 3,
        })
    }

    /// Run the session until the user exits; tear down the search, print
    /// the selected rows, and report the exit status.
    pub fn run(mut self) -> io::Result<QueryOutcome> {
        self.relaunch();

        let mut delay = self.config.delay.max(1);
        let flow = loop {
            let key = loop {
                if self.mode == Mode::Query {
                    self.update();
                }
                self.place_cursor();
                let _ = self.screen.flush();

                match screen::poll_event(POLL)? {
                    Some(UiEvent::Key(key)) => break key,
                    Some(UiEvent::Resize(cols, rows)) => {
                        self.screen.resized(cols, rows);
                        self.shift = self.screen.cols.saturating_sub(self.start) / 10;
                        self.redraw();
                    }
                    None => {
                        delay -= 1;
                        if delay == 0 {
                            if self.message {
                                self.draw();
                                self.message = false;
                            }
                            if self.mode == Mode::Query && (self.line.updated() || self.refresh) {
                                self.line.clear_updated();
                                self.refresh = false;
                                self.view.set_focus(None);
                                self.relaunch();
                            }
                            delay = self.config.delay.max(1);
                        }
                    }
                }
            };

            match self.dispatch(key)? {
                Flow::Continue => {}
                Flow::Exit => break Flow::Exit,
                Flow::Terminate => break Flow::Terminate,
            }
        };

        self.finish(matches!(flow, Flow::Exit))
    }

    // ---- search lifecycle -------------------------------------------------

    /// Tear down any running search and launch a new one for the current
    /// line and flags.
    fn relaunch(&mut self) {
        self.teardown();

        self.view.clear();
        self.view.set_top(0);
        self.skip = 0;
        self.dots = 3;
        self.error = None;
        self.pattern_error = false;

        self.flags.store(&mut self.options);
        self.options.pattern = self.line.text().to_owned();

        let (writer, reader) = search_pipe();
        let cancel = CancelToken::new();
        self.feed.attach(reader, cancel.clone());

        let stdin = self.spawn_stdin_fanout();
        let mut ctx = SearchContext {
            options: self.options.clone(),
            cancel: cancel.clone(),
            sink: Box::new(writer),
            stdin,
        };

        let searcher = Arc::clone(&self.searcher);
        let (etx, erx) = bounded::<SearchError>(1);
        debug!(pattern = %self.options.pattern, "search launch");
        let handle = thread::Builder::new()
            .name("sift-search".to_owned())
            .spawn(move || {
                if let Err(err) = searcher.search(&mut ctx) {
                    let _ = etx.send(err);
                }
                // Dropping the context closes the pipe: EOF for the UI.
            });

        match handle {
            Ok(handle) => {
                self.search = Some(ActiveSearch {
                    handle,
                    cancel,
                    errors: erx,
                });
            }
            Err(err) => {
                self.feed.detach();
                self.error = Some(format!("cannot start search: {err}"));
            }
        }

        self.redraw();
    }

    /// Close the pipe, cancel the engine, join the threads.
    fn teardown(&mut self) {
        self.feed.detach();
        if let Some(search) = self.search.take() {
            search.cancel.cancel();
            let _ = search.handle.join();
            debug!("search joined");
        }
        if let Some(task) = self.stdin_task.take() {
            let _ = task.join();
        }
    }

    /// Replay captured standard input into a fresh pipe for this search.
    fn spawn_stdin_fanout(&mut self) -> Option<Box<dyn Read + Send>> {
        let data = self.stdin_data.as_ref()?.clone();
        if let Some(task) = self.stdin_task.take() {
            let _ = task.join();
        }
        let (mut writer, reader) = search_pipe();
        let task = thread::Builder::new()
            .name("sift-stdin".to_owned())
            .spawn(move || {
                // A torn-down search drops the read end; the error is moot.
                let _ = writer.write_all(&data);
            })
            .ok()?;
        self.stdin_task = Some(task);
        Some(Box::new(ChunkReader::new(reader)))
    }

    /// Record an engine error for display.
    fn set_error(&mut self, err: &SearchError) {
        match err {
            SearchError::Pattern { message, position } => {
                self.line.set_error_at_byte(*position);
                self.error = Some(message.clone());
                self.pattern_error = true;
            }
            other => {
                self.line.set_error(self.line.graphemes());
                self.error = Some(other.to_string());
                self.pattern_error = false;
            }
        }
        debug!(error = %self.error.as_deref().unwrap_or(""), "search error");
    }

    // ---- painting ---------------------------------------------------------

    /// Complete rows available to display.
    fn rows(&self) -> usize {
        self.feed.rows(&self.view)
    }

    /// Visible result rows: the screen minus the prompt row.
    fn height(&self) -> usize {
        self.screen.rows.saturating_sub(1)
    }

    fn place_cursor(&mut self) {
        let top = self.view.top();
        match (self.mode, self.view.focus()) {
            (Mode::Query, None) => {
                let col = self.start + self.line.col() - self.line.offset();
                self.screen.setpos(0, col);
            }
            (Mode::Query, Some(f)) => {
                self.screen.setpos((f + 1).saturating_sub(top), 0);
            }
            (Mode::Edit, Some(f)) => {
                let col = self.line.col() - self.line.offset();
                self.screen.setpos((f + 1).saturating_sub(top), col);
            }
            (Mode::Edit, None) => self.screen.home(),
        }
    }

    /// Paint one result row at its screen position. A row one above the
    /// viewport paints at the prompt row; the pan that follows moves it
    /// into place.
    fn view_row(&mut self, index: usize) {
        let Some(text) = self.view.row(index) else {
            return;
        };
        let text = text.to_owned();
        let row = (index + 1).saturating_sub(self.view.top());
        self.screen.normal();
        if self.view.is_selected(index) {
            self.screen.select();
        }
        self.screen.put_row(row, &text, self.skip);
        if self.view.is_selected(index) {
            self.screen.deselect();
        }
    }

    /// One ingest-and-paint tick: fetch a screenful ahead, paint rows that
    /// arrived into view, and animate the status line.
    fn update(&mut self) {
        let begin = self.rows();
        let target = self.view.top() + 2 * self.screen.rows.saturating_sub(1);
        self.feed.fetch(&mut self.view, target);

        let err = self
            .search
            .as_ref()
            .and_then(|search| search.errors.try_recv().ok());
        if let Some(err) = err {
            self.set_error(&err);
        }

        self.screen.save();
        let rows = self.rows();
        let top = self.view.top();
        let height = self.height();

        if rows > begin && begin < top + height {
            let mut begin = begin;
            if begin + height > rows {
                begin = rows.saturating_sub(height);
            }
            if begin < top {
                begin = top;
            }
            let end = rows.min(begin + height);
            self.screen.normal();
            for i in begin..end {
                self.view_row(i);
            }
        }

        if rows < top + height {
            let status_row = (rows + 1).saturating_sub(top);
            self.screen.normal();
            self.screen.invert();
            if self.error.is_none() {
                let status = if self.feed.eof() {
                    "(END)".to_owned()
                } else {
                    self.dots = (self.dots + 1) & 3;
                    format!("Searching{}", ".".repeat(self.dots))
                };
                self.screen.put_at(status_row, 0, &status);
                self.screen.normal();
                self.screen.erase_line();
            } else {
                self.screen.put_at(status_row, 0, "(ERROR)");
                self.screen.normal();
                self.screen.erase_line();

                let message = self.error.clone().unwrap_or_default();
                if !self.screen.mono {
                    self.screen.setpos(2, 0);
                    self.screen.put(ERROR_COLOR);
                    self.screen.erase_below();
                }
                self.screen.put_at(2, 0, &message);
                self.screen.normal();
                self.screen.erase_below();
                self.draw();
            }
        }
        self.screen.restore();
    }

    /// Paint the prompt row (or the focused-row footer, or the row editor).
    fn draw(&mut self) {
        match self.mode {
            Mode::Query => {
                if self.view.focus().is_none() {
                    let color = self.prompt_color();
                    self.screen.home();
                    if !self.screen.mono {
                        self.screen.normal();
                        self.screen.put(color);
                    }
                    let prompt = self.config.prompt.clone();
                    self.screen.put(&prompt);
                    self.screen.put(" ");
                    self.screen.normal();
                    self.draw_line(self.start);
                } else {
                    self.screen.normal();
                    self.screen.put_at(
                        0,
                        0,
                        "\x1b[7mEnter\x1b[m/\x1b[7mDel\x1b[m toggle selection  \
                         \x1b[7mA\x1b[m all  \x1b[7mC\x1b[m clear  \
                         \x1b[7mE\x1b[m edit  \x1b[7mEsc\x1b[m go back  \
                         \x1b[7m^Q\x1b[m quick exit",
                    );
                    self.screen.erase_line();
                }
            }
            Mode::Edit => {
                if let Some(f) = self.view.focus() {
                    let row = (f + 1).saturating_sub(self.view.top());
                    self.screen.setpos(row, 0);
                    self.screen.normal();
                    self.draw_line(0);
                }
            }
        }
    }

    /// Render the edit line into `avail` columns starting at `indent`,
    /// with pan markers when shifted.
    fn draw_line(&mut self, indent: usize) {
        let color = self.prompt_color();
        let avail = self.screen.cols.saturating_sub(indent);
        let offset = self.line.pan(avail, self.shift);
        let len = self.line.cols();
        let mono = self.screen.mono;

        if offset > 0 {
            if !mono {
                self.screen.put(color);
            }
            self.screen.put(LARROW);
            self.screen.normal();

            // When a double-width glyph straddles the offset, show a pad
            // space and start one column later.
            let adj = if self.line.straddles(offset) {
                self.screen.put(" ");
                2
            } else {
                1
            };

            if len >= offset + avail {
                let text = self
                    .line
                    .display(offset + adj, avail.saturating_sub(adj + 1), mono);
                self.screen.put(&text);
                self.screen.erase_line();
                if !mono {
                    self.screen.put(color);
                }
                self.screen.put(RARROW);
                self.screen.normal();
            } else {
                let text = self
                    .line
                    .display(offset + adj, len.saturating_sub(offset + adj), mono);
                self.screen.put(&text);
                self.screen.normal();
                self.screen.erase_line();
            }
        } else if len > avail {
            let text = self.line.display(0, avail.saturating_sub(1), mono);
            self.screen.put(&text);
            self.screen.erase_line();
            if !mono {
                self.screen.put(color);
            }
            self.screen.put(RARROW);
            self.screen.normal();
        } else {
            let text = self.line.display(0, len, mono);
            self.screen.put(&text);
            self.screen.normal();
            if len < avail {
                self.screen.erase_line();
            }
        }
    }

    fn prompt_color(&self) -> &'static str {
        if self.line.error().is_none() && self.error.is_none() {
            PROMPT_COLOR
        } else {
            ERROR_COLOR
        }
    }

    /// Repaint everything: clamp the viewport, paint the visible rows, the
    /// status area, and the prompt.
    fn redraw(&mut self) {
        self.shift = self.screen.cols.saturating_sub(self.start) / 10;
        self.screen.normal();

        let rows = self.rows();
        let height = self.height();
        let mut top = self.view.top();
        if let Some(f) = self.view.focus() {
            if f >= top + height {
                top = f + 1 - height;
            }
        }
        if top >= rows {
            top = rows.saturating_sub(1);
        }
        self.view.set_top(top);

        let end = rows.min(top + height);
        for i in top..end {
            self.view_row(i);
        }
        if rows < top + height {
            let clear_row = (rows + 1).saturating_sub(top);
            self.screen.setpos(clear_row, 0);
            self.screen.erase_below();
        }
        if self.mode == Mode::Edit {
            self.screen.put_at(0, 0, "\x1b[7mEDIT\x1b[m");
            self.screen.erase_line();
        }
        self.draw();
    }

    // ---- key dispatch -----------------------------------------------------

    fn dispatch(&mut self, key: Key) -> io::Result<Flow> {
        let focused_edit = self.mode == Mode::Edit || self.view.focus().is_none();
        match key {
            Key::Esc => match self.mode {
                Mode::Query => {
                    if self.view.focus().is_none() {
                        if self.quit()? {
                            return Ok(Flow::Exit);
                        }
                    } else {
                        self.view.set_focus(None);
                        self.redraw();
                    }
                }
                Mode::Edit => {
                    self.save_line();
                    self.mode = Mode::Query;
                    // The edit line goes back to being the pattern.
                    let saved = std::mem::take(&mut self.saved_line);
                    self.line.set_text(&saved);
                    self.line.clear_updated();
                    self.screen.clear();
                    self.redraw();
                }
            },

            Key::Enter => match self.mode {
                Mode::Query => {
                    if self.view.focus().is_none() {
                        if self.rows() > 0 {
                            self.view.set_focus(Some(self.view.top()));
                            self.draw();
                        } else {
                            self.screen.alert();
                        }
                    } else if let Some(f) = self.view.focus() {
                        self.view.toggle(f);
                        self.view_row(f);
                        self.down();
                    }
                }
                Mode::Edit => {
                    if let Some(f) = self.view.focus() {
                        if f + 1 == self.view.len() {
                            self.view.push_row(String::new());
                        }
                    }
                    self.down();
                }
            },

            Key::Tab => match self.mode {
                Mode::Query => {
                    self.skip += 8;
                    self.redraw();
                }
                Mode::Edit => {
                    if !self.line.insert_char('\t') {
                        self.screen.alert();
                    }
                    self.draw();
                }
            },
            Key::BackTab => {
                if self.skip > 7 {
                    self.skip -= 8;
                }
                self.redraw();
            }

            Key::MetaUp => self.pgup(true),
            Key::MetaDown => self.pgdn(true),
            Key::MetaLeft => {
                self.skip = self.skip.saturating_sub(self.screen.cols / 2);
                self.redraw();
            }
            Key::MetaRight => {
                self.skip += self.screen.cols / 2;
                self.redraw();
            }
            Key::Meta(c) => {
                if self.view.focus().is_none() {
                    self.meta(c);
                } else {
                    self.screen.alert();
                }
            }

            Key::Backspace => match self.mode {
                Mode::Query => {
                    if self.view.focus().is_none() {
                        if self.line.col() > 0 {
                            self.line.move_to(self.line.col() as isize - 1);
                            self.line.erase(1);
                            self.draw();
                        }
                    } else {
                        self.up();
                        if let Some(f) = self.view.focus() {
                            self.view.toggle(f);
                            self.view_row(f);
                        }
                    }
                }
                Mode::Edit => {
                    if self.line.col() == 0 {
                        self.up();
                        self.line.move_to(self.line.cols() as isize);
                        self.draw();
                    } else {
                        self.line.move_to(self.line.col() as isize - 1);
                        self.line.erase(1);
                        self.draw();
                    }
                }
            },

            Key::Delete => {
                if focused_edit {
                    self.line.erase(1);
                    self.draw();
                } else {
                    self.up();
                    if let Some(f) = self.view.focus() {
                        self.view.toggle(f);
                        self.view_row(f);
                    }
                }
            }

            Key::Right => {
                if focused_edit {
                    self.line.move_to(self.line.col() as isize + 1);
                    self.draw();
                } else {
                    self.screen.alert();
                }
            }
            Key::Left => {
                if focused_edit {
                    self.line.move_to(self.line.col() as isize - 1);
                    self.draw();
                } else {
                    self.screen.alert();
                }
            }
            Key::Home => {
                if focused_edit {
                    self.line.move_to(0);
                    self.draw();
                } else {
                    self.screen.alert();
                }
            }
            Key::End => {
                if focused_edit {
                    self.line.move_to(self.line.cols() as isize);
                    self.draw();
                } else {
                    self.screen.alert();
                }
            }

            Key::Up => self.up(),
            Key::Down => self.down(),
            Key::PageUp => self.pgup(false),
            Key::PageDown => self.pgdn(false),

            Key::Ctrl('c') => {
                if self.quit()? {
                    return Ok(Flow::Exit);
                }
            }
            Key::Ctrl('k') => {
                if focused_edit {
                    self.line.kill_to_end();
                    self.draw();
                } else {
                    self.screen.alert();
                }
            }
            Key::Ctrl('l') => {
                self.screen.getsize();
                self.screen.clear();
                self.redraw();
            }
            Key::Ctrl('o') => {
                // Ctrl-O + key acts as Meta + key.
                if focused_edit {
                    if let Key::Char(c) = screen::read_key()? {
                        self.meta(c);
                    }
                } else {
                    self.screen.alert();
                }
            }
            Key::Ctrl('q') => return Ok(Flow::Exit),
            Key::Ctrl('r') | Key::Fn(4) => {
                if let Some(mark) = self.view.mark() {
                    self.jump(mark);
                } else {
                    self.screen.alert();
                }
            }
            Key::Ctrl('s') => self.next_file()?,
            Key::Ctrl('t') => {
                self.screen.mono = !self.screen.mono;
                self.redraw();
            }
            Key::Ctrl('u') => {
                if focused_edit {
                    self.line.kill_to_start();
                    self.draw();
                } else {
                    self.screen.alert();
                }
            }
            Key::Ctrl('v') => {
                // Insert the next key verbatim.
                if self.view.focus().is_none() {
                    let verbatim = match screen::read_key()? {
                        Key::Char(c) => Some(c),
                        Key::Ctrl(c) => char::from_u32(u32::from(c as u8 & 0x1f)),
                        Key::Tab => Some('\t'),
                        Key::Esc => Some('\x1b'),
                        _ => None,
                    };
                    if let Some(c) = verbatim {
                        if !self.line.insert_char(c) {
                            self.screen.alert();
                        }
                        self.draw();
                    }
                } else {
                    self.screen.alert();
                }
            }
            Key::Ctrl('w') => self.back_file(),
            Key::Ctrl('x') | Key::Fn(3) => {
                let mark = self.view.focus().unwrap_or_else(|| self.view.top());
                self.view.set_mark(Some(mark));
            }
            Key::Ctrl('y') | Key::Fn(2) => self.edit_file()?,
            Key::Ctrl('z') | Key::Fn(1) => {
                if self.help()? {
                    return Ok(Flow::Exit);
                }
            }
            Key::Ctrl('\\') => return Ok(Flow::Terminate),

            Key::Char(c) => {
                if focused_edit {
                    if !self.line.insert_char(c) {
                        self.screen.alert();
                    }
                    self.draw();
                } else if c == 'A' || c == 'a' {
                    self.view.select_all();
                    self.redraw();
                } else if c == 'C' || c == 'c' {
                    self.view.clear_selection();
                    self.redraw();
                } else if c == 'E' || c == 'e' {
                    self.mode = Mode::Edit;
                    self.saved_line = self.line.text().to_owned();
                    self.load_line();
                    self.screen.clear();
                    self.redraw();
                } else {
                    self.screen.alert();
                }
            }

            _ => {
                if self.help()? {
                    return Ok(Flow::Exit);
                }
            }
        }
        Ok(Flow::Continue)
    }

    // ---- navigation -------------------------------------------------------

    fn up(&mut self) {
        if let Some(f) = self.view.focus() {
            if f > 0 {
                self.save_line();
                self.view.set_focus(Some(f - 1));
                self.load_line();
                if f - 1 > self.view.top() {
                    return;
                }
            }
        }
        let top = self.view.top();
        if top > 0 {
            self.view_row(top - 1); // paints above the viewport, pre-pan
            self.view.set_top(top - 1);
            self.screen.pan_down(1);
            self.draw();
        }
    }

    fn down(&mut self) {
        let rows = self.rows();
        if let Some(f) = self.view.focus() {
            self.save_line();
            let next = (f + 1).min(rows.saturating_sub(1));
            self.view.set_focus(Some(next));
            self.load_line();
            if next + 2 < self.view.top() + self.screen.rows {
                return;
            }
        }
        let top = self.view.top();
        if top + 1 < rows {
            self.view.set_top(top + 1);
            self.screen.normal();
            self.screen.pan_up(1);
            let incoming = top + self.screen.rows - 1;
            if incoming < rows {
                self.view_row(incoming);
            }
            self.draw();
        }
    }

    fn pgup(&mut self, half: bool) {
        let delta = if half {
            self.screen.rows / 2
        } else {
            self.screen.rows.saturating_sub(2)
        };
        if let Some(f) = self.view.focus() {
            self.save_line();
            let next = f.saturating_sub(delta);
            self.view.set_focus(Some(next));
            self.load_line();
            if next > self.view.top() {
                return;
            }
        }
        let oldtop = self.view.top();
        if oldtop > 0 {
            self.view_row(oldtop - 1);
            let newtop = oldtop.saturating_sub(delta);
            self.view.set_top(newtop);
            self.screen.pan_down(oldtop - newtop);
            for i in newtop..oldtop.saturating_sub(1) {
                self.view_row(i);
            }
            self.draw();
        }
    }

    fn pgdn(&mut self, half: bool) {
        let rows = self.rows();
        let delta = if half {
            self.screen.rows / 2
        } else {
            self.screen.rows.saturating_sub(2)
        };
        if let Some(f) = self.view.focus() {
            self.save_line();
            let next = (f + delta).min(rows.saturating_sub(1));
            self.view.set_focus(Some(next));
            self.load_line();
            if next + 2 < self.view.top() + self.screen.rows {
                return;
            }
        }
        let oldtop = self.view.top();
        if oldtop + self.height() <= rows {
            let mut newtop = oldtop + delta;
            if newtop + self.screen.rows > rows {
                newtop = (rows + 2).saturating_sub(self.screen.rows).max(oldtop);
            }
            let diff = newtop - oldtop;
            if diff > 0 {
                self.view.set_top(newtop);
                self.screen.normal();
                self.screen.pan_up(diff);
                for i in (newtop + self.screen.rows - diff - 1)..(newtop + self.screen.rows - 1) {
                    if i < rows {
                        self.view_row(i);
                    }
                }
                self.draw();
            }
        }
    }

    /// Scroll back to the previous file's first row; page up when the
    /// output format carries no filenames.
    fn back_file(&mut self) {
        if self.view.top() >= self.rows() {
            return;
        }
        if !self.options.carries_filenames() {
            self.pgup(false);
            return;
        }

        self.up();
        let list = self.options.files_with_matches;
        let mut filename = String::new();
        let mut found = false;

        if self.view.focus().is_none() {
            if let Some(row) = self.view.row(self.view.top()) {
                is_filename(row, list, &mut filename);
            }
            while self.view.top() > 0 {
                let row = self.view.row(self.view.top()).unwrap_or_default().to_owned();
                found = is_filename(&row, list, &mut filename);
                if found {
                    break;
                }
                self.up();
            }
        } else {
            if let Some(f) = self.view.focus() {
                if let Some(row) = self.view.row(f) {
                    is_filename(row, list, &mut filename);
                }
            }
            while self.view.focus().is_some_and(|f| f > 0) {
                let f = self.view.focus().unwrap_or(0);
                let row = self.view.row(f).unwrap_or_default().to_owned();
                found = is_filename(&row, list, &mut filename);
                if found {
                    break;
                }
                self.up();
            }
        }

        if found && !self.options.heading {
            self.down();
        }
    }

    /// Scroll to the next file's first row, ingesting while scanning and
    /// aborting on any keystroke. Pages down when the output format
    /// carries no filenames.
    fn next_file(&mut self) -> io::Result<()> {
        if !self.options.carries_filenames() {
            self.pgdn(false);
            return Ok(());
        }
        let list = self.options.files_with_matches;
        let mut filename = String::new();

        if self.view.focus().is_none() {
            if self.view.top() + self.height() > self.rows() {
                return Ok(());
            }
            if let Some(row) = self.view.row(self.view.top()) {
                is_filename(row, list, &mut filename);
            }
            self.down();
            loop {
                let mut found = false;
                while self.view.top() + self.height() <= self.rows() {
                    let row = self.view.row(self.view.top()).unwrap_or_default().to_owned();
                    found = is_filename(&row, list, &mut filename);
                    if found {
                        break;
                    }
                    self.down();
                }
                if found || (self.feed.eof() && !self.feed.pending()) {
                    break;
                }
                if screen::pending()? {
                    break;
                }
                self.update();
            }
        } else {
            if self.rows() <= 1 {
                return Ok(());
            }
            if let Some(f) = self.view.focus() {
                if let Some(row) = self.view.row(f) {
                    is_filename(row, list, &mut filename);
                }
            }
            self.down();
            loop {
                let mut found = false;
                while self.view.focus().is_some_and(|f| f + 1 < self.rows()) {
                    let f = self.view.focus().unwrap_or(0);
                    let row = self.view.row(f).unwrap_or_default().to_owned();
                    found = is_filename(&row, list, &mut filename);
                    if found {
                        break;
                    }
                    self.down();
                }
                if found || (self.feed.eof() && !self.feed.pending()) {
                    break;
                }
                if screen::pending()? {
                    break;
                }
                self.update();
            }
        }
        Ok(())
    }

    /// Jump to `row`, ingesting forward as needed; a keystroke aborts.
    fn jump(&mut self, row: usize) {
        if self.rows() == 0 {
            return;
        }
        if self.view.focus().is_none() {
            if row <= self.view.top() {
                self.view.set_top(row.min(self.rows().saturating_sub(1)));
                self.redraw();
            } else {
                loop {
                    while self.view.top() < row {
                        let before = self.view.top();
                        self.down();
                        if self.view.top() == before {
                            break;
                        }
                    }
                    if self.view.top() == row || (self.feed.eof() && !self.feed.pending()) {
                        break;
                    }
                    if screen::pending().unwrap_or(true) {
                        break;
                    }
                    self.update();
                }
            }
        } else if let Some(f) = self.view.focus() {
            if row <= f {
                self.view.set_focus(Some(row.min(self.rows().saturating_sub(1))));
                self.redraw();
            } else {
                loop {
                    let f = self.view.focus().unwrap_or(0);
                    if f >= row {
                        break;
                    }
                    let before = f;
                    self.down();
                    if self.view.focus() == Some(before) {
                        if self.feed.eof() && !self.feed.pending() {
                            break;
                        }
                        if screen::pending().unwrap_or(true) {
                            break;
                        }
                        self.update();
                    }
                }
            }
        }
    }

    // ---- result-edit overlay ----------------------------------------------

    fn load_line(&mut self) {
        if self.mode != Mode::Edit {
            return;
        }
        match self.view.focus() {
            Some(f) if f < self.view.len() => {
                let text = self.view.row(f).unwrap_or_default().to_owned();
                let col = self.line.col();
                self.line.set_text(&text);
                self.line.clear_updated();
                if col < self.line.cols() {
                    self.line.move_to(col as isize);
                }
            }
            _ => {
                self.view.push_row(String::new());
                self.line.set_text("");
                self.line.clear_updated();
            }
        }
    }

    fn save_line(&mut self) {
        if self.mode != Mode::Edit {
            return;
        }
        if let Some(f) = self.view.focus() {
            if f >= self.view.len() {
                self.view.push_row(self.line.text().to_owned());
            } else {
                self.view.set_row(f, self.line.text().to_owned());
            }
            self.line.clear_updated();
        }
    }

    // ---- meta flags, editor launch, help, quit ----------------------------

    /// Toggle the flag bound to the meta key `c` and show a status message.
    fn meta(&mut self, c: char) {
        match self.flags.toggle(c) {
            Some(toggled) => {
                let state = if toggled.on {
                    " \x1b[32;1mon\x1b[m  "
                } else {
                    " \x1b[31;1moff\x1b[m  "
                };
                let msg = format!("\x1b[m\x1b[7mM-{c}\x1b[m {}{state}", toggled.label);
                self.screen.normal();
                self.screen.put_at(0, 0, &msg);
                self.screen.erase_line();
                self.message = true;
                self.refresh = true;
            }
            None => self.screen.alert(),
        }
    }

    /// Launch `$GREP_EDIT` (or `$EDITOR`) on the focused row's file.
    fn edit_file(&mut self) -> io::Result<()> {
        if self.view.top() >= self.rows() || !self.options.carries_filenames() {
            self.screen.alert();
            return Ok(());
        }
        let editor = std::env::var("GREP_EDIT")
            .or_else(|_| std::env::var("EDITOR"))
            .ok();
        let Some(editor) = editor else {
            self.screen.alert();
            return Ok(());
        };

        // Walk back from the focused row to the nearest filename run.
        let list = self.options.files_with_matches;
        let from = self.view.focus().unwrap_or_else(|| self.view.top());
        let mut filename = String::new();
        let mut found = false;
        for i in (0..=from).rev() {
            if let Some(row) = self.view.row(i) {
                if is_filename(row, list, &mut filename) {
                    found = true;
                    break;
                }
            }
        }
        if found {
            found = std::fs::metadata(&filename)
                .map(|m| m.is_file())
                .unwrap_or(false);
        }
        if !found {
            self.screen.alert();
            self.error = Some(format!("Cannot edit file {filename}"));
            self.message = true;
            return Ok(());
        }

        self.screen.put_at(0, 0, &format!("{editor} {filename}"));
        let _ = self.screen.flush();
        crossterm::terminal::disable_raw_mode()?;
        let status = Command::new(&editor).arg(&filename).status();
        crossterm::terminal::enable_raw_mode()?;

        if status.map(|s| s.success()).unwrap_or(false) {
            self.view
                .set_mark(Some(self.view.focus().unwrap_or_else(|| self.view.top())));
            self.screen.clear();
            self.view.set_focus(None);
            self.refresh = true;
        } else {
            self.screen.alert();
        }
        Ok(())
    }

    /// Confirm exit unless confirmation is disabled.
    fn quit(&mut self) -> io::Result<bool> {
        if self.config.no_confirm {
            return Ok(true);
        }
        if !self.screen.mono {
            self.screen.put(PROMPT_COLOR);
        }
        self.screen.put_at(0, 0, ">>");
        self.screen.put_at(0, 2, "\x1b[mExit? (y/n) [n] ");
        let _ = self.screen.flush();

        screen::flush_input()?;
        let key = screen::read_key()?;
        if matches!(key, Key::Char('y') | Key::Char('Y')) {
            return Ok(true);
        }
        self.draw();
        Ok(false)
    }

    /// Modal help overlay. Returns `true` for quick exit.
    fn help(&mut self) -> io::Result<bool> {
        self.screen.clear();
        self.draw_help();
        let _ = self.screen.flush();

        let quick = loop {
            match screen::poll_event(POLL)? {
                Some(UiEvent::Key(key)) => match key {
                    Key::Ctrl('q') => break true,
                    Key::Esc => break false,
                    Key::Ctrl('l') => {
                        self.screen.clear();
                        self.draw_help();
                        let _ = self.screen.flush();
                    }
                    Key::Ctrl('c') => {
                        if self.quit()? {
                            return Ok(true);
                        }
                        self.draw_help();
                        let _ = self.screen.flush();
                    }
                    Key::Ctrl('t') => {
                        self.screen.mono = !self.screen.mono;
                        self.draw_help();
                        let _ = self.screen.flush();
                    }
                    Key::Meta(c) => {
                        self.meta(c);
                        self.draw_help();
                        let _ = self.screen.flush();
                    }
                    Key::Fn(1) => {}
                    _ => self.screen.alert(),
                },
                Some(UiEvent::Resize(cols, rows)) => {
                    self.screen.resized(cols, rows);
                    self.screen.clear();
                    self.draw_help();
                    let _ = self.screen.flush();
                }
                None => {}
            }
        };

        self.screen.clear();
        self.redraw();
        Ok(quick)
    }

    fn draw_help(&mut self) {
        const BINDINGS: &[&str] = &[
            "",
            "\x1b[7mEsc\x1b[m   exit & save selected",
            "\x1b[7mEnter\x1b[m selection mode",
            "",
            "\x1b[7mTab\x1b[m    \x1b[7mS-Tab\x1b[m   pan",
            "\x1b[7mUp\x1b[m     \x1b[7mDown\x1b[m    scroll",
            "\x1b[7mPgUp\x1b[m   \x1b[7mPgDn\x1b[m    scroll page",
            "\x1b[7mM-Left\x1b[m \x1b[7mM-Right\x1b[m pan \u{bd} page",
            "\x1b[7mM-Up\x1b[m   \x1b[7mM-Down\x1b[m  scroll \u{bd} pg",
            "",
            "\x1b[7mHome\x1b[m \x1b[7mEnd\x1b[m begin/end of line",
            "\x1b[7m^K\x1b[m delete after cursor",
            "\x1b[7m^L\x1b[m refresh screen",
            "\x1b[7m^Q\x1b[m quick exit and save",
            "\x1b[7m^R\x1b[m or \x1b[7mF4\x1b[m jump to bookmark",
            "\x1b[7m^S\x1b[m scroll to next file",
            "\x1b[7m^T\x1b[m toggle colors on/off",
            "\x1b[7m^U\x1b[m delete before cursor",
            "\x1b[7m^V\x1b[m verbatim character",
            "\x1b[7m^W\x1b[m scroll back one file",
            "\x1b[7m^X\x1b[m or \x1b[7mF3\x1b[m set bookmark",
            "\x1b[7m^Y\x1b[m or \x1b[7mF2\x1b[m edit file",
            "\x1b[7m^Z\x1b[m or \x1b[7mF1\x1b[m help",
            "\x1b[7m^\\\x1b[m terminate process",
            "",
        ];

        for (i, text) in BINDINGS.iter().enumerate() {
            self.screen.put_at(i + 1, 0, text);
        }

        let mut row = BINDINGS.len() + 1;
        let mut col = 0;
        let flags: Vec<(char, &str, bool)> = self
            .flags
            .iter()
            .map(|f| (f.key, f.label, f.on))
            .collect();
        for (key, label, on) in flags {
            if row >= self.screen.rows {
                row = 2;
                col += 28;
            }
            let mark = if on { 'X' } else { ' ' };
            let entry = format!("\x1b[7mM-{key}\x1b[m [\x1b[32;1m{mark}\x1b[m] {label}");
            self.screen.put_at(row, col, &entry);
            row += 1;
        }

        if !self.message {
            self.screen.put_at(
                0,
                0,
                "\x1b[7mF1\x1b[m help and options:        \
                 \x1b[7m^\x1b[m=\x1b[7mCtrl\x1b[m  \x1b[7mS-\x1b[m=\x1b[7mShift\x1b[m  \
                 \x1b[7mM-\x1b[m=\x1b[7mAlt\x1b[m or use \x1b[7m^O\x1b[m+key",
            );
        } else {
            self.message = false;
        }
        let cols = self.screen.cols;
        self.screen.put_at(0, cols.saturating_sub(1), "?");
    }

    // ---- exit -------------------------------------------------------------

    /// Restore the terminal, print selected rows, and compute the outcome.
    fn finish(mut self, print: bool) -> io::Result<QueryOutcome> {
        let select_all = self.view.select_all_sticky();
        // Ctrl-T may have toggled colors mid-session; the print pass honors
        // the live state, not the startup config.
        let mono = self.screen.mono;

        // Leave raw mode before printing; the feed and search stay alive so
        // a sticky select-all can drain the pipe in blocking mode.
        let screen = std::mem::replace(&mut self.screen, Screen::detached(0, 0));
        drop(screen);

        let mut printed = 0usize;
        if print {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            let color = self.options.color && !mono;
            let text_mode = self.options.text;

            let mut i = 0;
            let complete = self.rows();
            while i < complete {
                if self.view.is_selected(i) {
                    let row = self.view.row(i).unwrap_or_default();
                    if print_row(&mut out, row, color, text_mode).is_err() {
                        return Ok(self.outcome(printed));
                    }
                    printed += 1;
                }
                i += 1;
            }

            // With select-all sticky, drain whatever the pipe still holds.
            if select_all && (!self.feed.eof() || self.feed.pending()) {
                loop {
                    self.feed.fetch_blocking(&mut self.view, i);
                    if self.rows() <= i {
                        break;
                    }
                    while i < self.rows() {
                        let row = self.view.row(i).unwrap_or_default();
                        if print_row(&mut out, row, color, text_mode).is_err() {
                            return Ok(self.outcome(printed));
                        }
                        printed += 1;
                        i += 1;
                    }
                }
            }
            let _ = out.flush();
        }

        let outcome = self.outcome(printed);
        self.teardown();
        Ok(outcome)
    }

    fn outcome(&self, printed: usize) -> QueryOutcome {
        let status = if self.pattern_error {
            ExitStatus::PatternError
        } else if printed > 0 {
            ExitStatus::Match
        } else {
            ExitStatus::NoMatch
        };
        QueryOutcome { status, printed }
    }
}

impl Drop for QueryUi {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Print one result row to stdout: NUL filename markers are dropped, and
/// when color is off the CSI sequences are stripped.
fn print_row<W: Write>(out: &mut W, row: &str, color: bool, text_mode: bool) -> io::Result<()> {
    let bytes = row.as_bytes();
    let mut nulls = if bytes.first() == Some(&0) && !text_mode {
        2
    } else {
        0
    };
    let mut from = usize::from(nulls > 0);
    let mut i = from;

    if !color {
        while i < bytes.len() {
            if bytes[i] == 0 && nulls > 0 {
                out.write_all(&bytes[from..i])?;
                nulls -= 1;
                i += 1;
                from = i;
            } else if bytes[i] == 0x1b {
                out.write_all(&bytes[from..i])?;
                i += 1;
                if bytes.get(i) == Some(&b'[') {
                    i += 1;
                    while i < bytes.len() && !bytes[i].is_ascii_alphabetic() {
                        i += 1;
                    }
                }
                if i < bytes.len() {
                    i += 1;
                }
                from = i;
            } else {
                i += 1;
            }
        }
        out.write_all(&bytes[from..i])?;
    } else if nulls > 0 {
        while i < bytes.len() && nulls > 0 {
            if bytes[i] == 0 {
                out.write_all(&bytes[from..i])?;
                nulls -= 1;
                i += 1;
                from = i;
            } else {
                i += 1;
            }
        }
        out.write_all(&bytes[from..])?;
    } else {
        out.write_all(bytes)?;
    }
    out.write_all(b"\n")
}

/// Adapts a pipe reader into a blocking [`Read`] for the engine's stdin.
struct ChunkReader {
    reader: super::pipe::PipeReader,
    eof: bool,
}

impl ChunkReader {
    const fn new(reader: super::pipe::PipeReader) -> Self {
        Self { reader, eof: false }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.eof {
            return Ok(0);
        }
        loop {
            match self.reader.read_timeout(buf, Duration::from_millis(50)) {
                super::pipe::TryRead::Data(n) => return Ok(n),
                super::pipe::TryRead::Empty => {}
                super::pipe::TryRead::Eof => {
                    self.eof = true;
                    return Ok(0);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn printed(row: &str, color: bool, text_mode: bool) -> Vec<u8> {
        let mut out = Vec::new();
        print_row(&mut out, row, color, text_mode).unwrap();
        out
    }

    #[test]
    fn test_print_row_plain() {
        assert_eq!(printed("hello", true, false), b"hello\n");
    }

    #[test]
    fn test_print_row_drops_nul_markers_keeps_color() {
        let row = "\0\0src/a.rs\0\x1b[31mhit\x1b[m";
        assert_eq!(printed(row, true, false), b"src/a.rs\x1b[31mhit\x1b[m\n");
    }

    #[test]
    fn test_print_row_strips_escapes_without_color() {
        let row = "\0\0src/a.rs\0\x1b[31mhit\x1b[m";
        assert_eq!(printed(row, false, false), b"src/a.rshit\n");
    }

    #[test]
    fn test_print_row_text_mode_keeps_nuls() {
        let row = "\0raw\0data";
        assert_eq!(printed(row, true, true), b"\0raw\0data\n");
    }

    #[test]
    fn test_outcome_precedence() {
        // Pattern errors trump printed rows in the exit status.
        let cfg = UiConfig::default();
        assert_eq!(cfg.delay, 3);
        assert_eq!(ExitStatus::PatternError.code(), 2);
    }
}
