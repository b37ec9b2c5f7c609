//! Incremental ingestion of search results into the row view.
//!
//! One ingest tick reads whatever the pipe has ready, splits it on newlines
//! into rows, and tolerates a partial last row: the fragment is appended to
//! the view but not counted until its newline (or EOF) arrives. The UI
//! thread is never blocked; the blocking variant exists only for the exit
//! print pass.

use std::time::Duration;

use memchr::memchr;

use super::pipe::{PipeReader, TryRead};
use super::view::RowView;
use crate::output::BUFFER_SIZE;
use crate::search::CancelToken;

/// Scratch size, equal to one output buffer.
pub const FEED_BUFFER_SIZE: usize = BUFFER_SIZE;

/// Reads the search pipe and grows the row view.
pub struct ResultFeed {
    reader: Option<PipeReader>,
    cancel: Option<CancelToken>,
    scratch: Box<[u8]>,
    len: usize,
    /// Raw bytes of the partial row, so a multi-byte character split
    /// across reads decodes correctly once the row completes.
    tail: Vec<u8>,
    /// The next fragment continues the last row (no newline seen yet).
    append: bool,
    eof: bool,
}

impl Default for ResultFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultFeed {
    /// Create a detached feed; it reports EOF until attached.
    pub fn new() -> Self {
        Self {
            reader: None,
            cancel: None,
            scratch: vec![0; FEED_BUFFER_SIZE].into_boxed_slice(),
            len: 0,
            tail: Vec::new(),
            append: false,
            eof: true,
        }
    }

    /// Attach the feed to a fresh search pipe and its cancel token,
    /// discarding any state from the previous search.
    pub fn attach(&mut self, reader: PipeReader, cancel: CancelToken) {
        self.reader = Some(reader);
        self.cancel = Some(cancel);
        self.len = 0;
        self.tail.clear();
        self.append = false;
        self.eof = false;
    }

    /// Detach: close the read end and cancel the engine if still running.
    pub fn detach(&mut self) {
        if !self.eof {
            self.mark_eof();
        }
        self.cancel = None;
        self.len = 0;
        self.tail.clear();
        self.append = false;
    }

    /// True once the pipe reported EOF or a fatal error.
    pub const fn eof(&self) -> bool {
        self.eof
    }

    /// True when undelivered bytes remain in the scratch.
    pub const fn pending(&self) -> bool {
        self.len > 0
    }

    /// Complete rows in `view`: a trailing partial row is not counted.
    pub fn rows(&self, view: &RowView) -> usize {
        view.len() - usize::from(self.append)
    }

    /// One ingest tick: grow `view` until it holds more than `target_row`
    /// complete rows or no more data is ready. Never blocks.
    pub fn fetch(&mut self, view: &mut RowView, target_row: usize) {
        while self.rows(view) <= target_row {
            let mut incomplete = false;
            let mut nl = memchr(b'\n', &self.scratch[..self.len]);

            if nl.is_none() {
                if self.len < FEED_BUFFER_SIZE && !self.eof {
                    self.fill();
                }
                if self.len == 0 {
                    if self.eof && self.append {
                        // EOF seals the trailing partial row.
                        self.append = false;
                        self.tail.clear();
                    }
                    break;
                }
                nl = memchr(b'\n', &self.scratch[..self.len]);
                if nl.is_none() {
                    // Everything available joins the row; it stays marked
                    // incomplete unless EOF sealed it.
                    incomplete = !self.eof;
                    nl = Some(self.len);
                }
            }

            let end = nl.unwrap_or(self.len);
            let bytes = &self.scratch[..end];
            if incomplete || self.append {
                // The row is (or was) partial: grow its raw tail and
                // re-render the whole row so split characters decode
                // intact when their remaining bytes arrive.
                if !self.append {
                    self.tail.clear();
                }
                self.tail.extend_from_slice(bytes);
                let text = String::from_utf8_lossy(&self.tail).into_owned();
                if self.append {
                    view.replace_last(text);
                } else {
                    view.push_row(text);
                }
                if !incomplete {
                    self.tail.clear();
                }
            } else {
                view.push_row(String::from_utf8_lossy(bytes).into_owned());
            }

            let mut consumed = end;
            if !incomplete && consumed < self.len {
                consumed += 1; // skip the newline
            }
            self.append = incomplete;
            self.scratch.copy_within(consumed..self.len, 0);
            self.len -= consumed;
        }
    }

    /// Blocking drain used by the exit print pass: fetch until `view` holds
    /// more than `target_row` complete rows or the pipe is exhausted.
    pub fn fetch_blocking(&mut self, view: &mut RowView, target_row: usize) {
        loop {
            self.fetch(view, target_row);
            if self.rows(view) > target_row || (self.eof && self.len == 0) {
                return;
            }
            self.fill_timeout(Duration::from_millis(50));
        }
    }

    fn fill(&mut self) {
        let Some(reader) = &mut self.reader else {
            self.eof = true;
            return;
        };
        match reader.try_read(&mut self.scratch[self.len..]) {
            TryRead::Data(n) => self.len += n,
            TryRead::Empty => {}
            TryRead::Eof => self.mark_eof(),
        }
    }

    fn fill_timeout(&mut self, timeout: Duration) {
        if self.eof || self.len >= FEED_BUFFER_SIZE {
            return;
        }
        let Some(reader) = &mut self.reader else {
            self.eof = true;
            return;
        };
        match reader.read_timeout(&mut self.scratch[self.len..], timeout) {
            TryRead::Data(n) => self.len += n,
            TryRead::Empty => {}
            TryRead::Eof => self.mark_eof(),
        }
    }

    fn mark_eof(&mut self) {
        self.eof = true;
        self.reader = None;
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::pipe::search_pipe;
    use std::io::Write;

    fn feed_pair() -> (impl Write, ResultFeed) {
        let (w, r) = search_pipe();
        let mut feed = ResultFeed::new();
        feed.attach(r, CancelToken::new());
        (w, feed)
    }

    #[test]
    fn test_incremental_ingest_with_partial_rows() {
        let (mut w, mut feed) = feed_pair();
        let mut view = RowView::new();

        w.write_all(b"foo\nba").unwrap();
        feed.fetch(&mut view, usize::MAX);
        assert_eq!(feed.rows(&view), 1);
        assert_eq!(view.row(0), Some("foo"));

        w.write_all(b"r\nbaz").unwrap();
        feed.fetch(&mut view, usize::MAX);
        assert_eq!(feed.rows(&view), 2);
        assert_eq!(view.row(1), Some("bar"));

        drop(w);
        feed.fetch(&mut view, usize::MAX);
        assert_eq!(feed.rows(&view), 3);
        assert_eq!(view.row(2), Some("baz"));
        assert!(feed.eof());
        assert!(!feed.pending());
    }

    #[test]
    fn test_row_partitioning_roundtrip() {
        let (mut w, mut feed) = feed_pair();
        let mut view = RowView::new();

        let payload = b"alpha\n\nbeta gamma\ndelta";
        for chunk in payload.chunks(4) {
            w.write_all(chunk).unwrap();
            feed.fetch(&mut view, usize::MAX);
        }
        drop(w);
        feed.fetch(&mut view, usize::MAX);

        let rows: Vec<&str> = (0..view.len()).map(|i| view.row(i).unwrap()).collect();
        assert_eq!(rows, ["alpha", "", "beta gamma", "delta"]);
        // Concatenating rows with newlines reproduces the pipe bytes
        // (modulo the trailing row that arrived without one).
        assert_eq!(rows.join("\n").as_bytes(), payload);
    }

    #[test]
    fn test_eof_cancels_the_search() {
        let (w, r) = search_pipe();
        let cancel = CancelToken::new();
        let mut feed = ResultFeed::new();
        feed.attach(r, cancel.clone());
        drop(w);

        let mut view = RowView::new();
        feed.fetch(&mut view, usize::MAX);
        assert!(feed.eof());
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_fetch_stops_at_target_row() {
        let (mut w, mut feed) = feed_pair();
        let mut view = RowView::new();
        w.write_all(b"a\nb\nc\nd\n").unwrap();

        feed.fetch(&mut view, 1);
        assert_eq!(feed.rows(&view), 2);
        feed.fetch(&mut view, 3);
        assert_eq!(feed.rows(&view), 4);
    }

    #[test]
    fn test_blocking_drain_for_print_pass() {
        let (w, r) = search_pipe();
        let mut feed = ResultFeed::new();
        feed.attach(r, CancelToken::new());
        let mut view = RowView::new();

        let producer = std::thread::spawn(move || {
            let mut w = w;
            for i in 0..100 {
                writeln!(w, "row {i}").unwrap();
            }
        });

        feed.fetch_blocking(&mut view, 99);
        producer.join().unwrap();
        assert_eq!(feed.rows(&view), 100);
        assert_eq!(view.row(99), Some("row 99"));
    }

    #[test]
    fn test_split_multibyte_char_decodes_intact() {
        let (mut w, mut feed) = feed_pair();
        let mut view = RowView::new();

        // "é" is 0xc3 0xa9; the bytes arrive in separate reads.
        w.write_all(b"caf\xc3").unwrap();
        feed.fetch(&mut view, usize::MAX);
        assert_eq!(feed.rows(&view), 0);

        w.write_all(b"\xa9\n").unwrap();
        feed.fetch(&mut view, usize::MAX);
        assert_eq!(feed.rows(&view), 1);
        assert_eq!(view.row(0), Some("café"));
    }

    #[test]
    fn test_reattach_for_research() {
        let (mut w1, r1) = search_pipe();
        let mut feed = ResultFeed::new();
        let cancel1 = CancelToken::new();
        feed.attach(r1, cancel1.clone());
        let mut view = RowView::new();

        w1.write_all(b"old result\npartial").unwrap();
        feed.fetch(&mut view, usize::MAX);
        assert_eq!(feed.rows(&view), 1);

        // Re-search: the view is rebuilt, the feed attaches to a new pipe,
        // and the old search is cancelled.
        view.clear();
        let (mut w2, r2) = search_pipe();
        feed.detach();
        assert!(cancel1.is_cancelled());
        feed.attach(r2, CancelToken::new());

        w2.write_all(b"new result\n").unwrap();
        feed.fetch(&mut view, usize::MAX);
        assert_eq!(feed.rows(&view), 1);
        assert_eq!(view.row(0), Some("new result"));
        // The old partial fragment never leaks into the new view.
        drop(w1);
        drop(w2);
        feed.fetch(&mut view, usize::MAX);
        assert_eq!(feed.rows(&view), 1);
    }

    #[test]
    fn test_long_row_spans_many_chunks() {
        let (mut w, mut feed) = feed_pair();
        let mut view = RowView::new();

        let long = "x".repeat(3 * FEED_BUFFER_SIZE / 2);
        w.write_all(long.as_bytes()).unwrap();
        feed.fetch(&mut view, usize::MAX);
        // Still incomplete: present in the view but not counted.
        assert_eq!(feed.rows(&view), 0);
        assert_eq!(view.len(), 1);

        w.write_all(b"\n").unwrap();
        feed.fetch(&mut view, usize::MAX);
        assert_eq!(feed.rows(&view), 1);
        assert_eq!(view.row(0).unwrap().len(), long.len());
    }
}
