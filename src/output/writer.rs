//! Per-worker buffered output with non-blocking buffer handoff.
//!
//! Each search worker owns one [`OutputBuffer`] writing to the shared sink.
//! Output accumulates in a chain of fixed-size buffers; a worker only ever
//! blocks when it is time to commit its output, never while producing it.
//! When a buffer fills, the writer flushes if the shared sync lock can be
//! taken without blocking and otherwise moves on to the next buffer in the
//! chain, growing the chain on demand.

use std::io::Write;
use std::sync::Arc;

use bitflags::bitflags;

use super::sync::{OutputSync, SyncHandle};
use super::truncate::TruncateFilter;

/// Size of each buffer in the chain.
pub const BUFFER_SIZE: usize = 16 * 1024;

bitflags! {
    /// Writer mode bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Mode: u8 {
        /// Flush after every newline.
        const FLUSH = 1;
        /// Hold output: flushes are suppressed until release or discard.
        const HOLD = 2;
        /// A binary file was detected while this writer was held.
        const BINARY = 4;
    }
}

/// Buffered writer for one worker's share of the search output.
///
/// The chain only grows; it never shrinks between flushes. Every buffer
/// preceding the cursor is full, the cursor's buffer holds the unflushed
/// tail, and buffers past the cursor are pre-allocated scratch.
pub struct OutputBuffer<W: Write> {
    sink: W,
    /// Latched on any write or flush error, and on observed cancellation.
    eof: bool,
    sync: Option<SyncHandle>,
    buffers: Vec<Box<[u8]>>,
    /// Index of the cursor's buffer.
    cur: usize,
    /// Write offset within the cursor's buffer.
    pos: usize,
    mode: Mode,
    line_buffered: bool,
    truncate: Option<TruncateFilter>,
}

impl<W: Write> OutputBuffer<W> {
    /// Create a writer over `sink` with one pre-allocated buffer.
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            eof: false,
            sync: None,
            buffers: vec![vec![0; BUFFER_SIZE].into_boxed_slice()],
            cur: 0,
            pos: 0,
            mode: Mode::empty(),
            line_buffered: false,
            truncate: None,
        }
    }

    /// Enable line-buffered mode: flush after every newline.
    pub fn set_line_buffered(&mut self) {
        self.line_buffered = true;
        self.mode |= Mode::FLUSH;
    }

    /// Limit flushed lines to `width` columns (ANSI-aware).
    pub fn set_width_limit(&mut self, width: usize) {
        self.truncate = Some(TruncateFilter::new(width));
    }

    /// Attach this writer to the shared sync object, drawing a slot ticket.
    pub fn sync_on(&mut self, sync: Arc<OutputSync>) {
        self.sync = Some(SyncHandle::new(sync));
    }

    /// Re-ticket this writer for its next unit of work (ordered mode).
    pub fn begin(&mut self, slot: u64) {
        if let Some(h) = &mut self.sync {
            h.begin(slot);
        }
    }

    /// The slot ticket currently assigned to this writer, if synced.
    pub fn slot(&self) -> Option<u64> {
        self.sync.as_ref().map(SyncHandle::slot)
    }

    /// Append a single byte.
    #[inline]
    pub fn put_byte(&mut self, b: u8) {
        if self.pos >= BUFFER_SIZE {
            self.advance_buffer();
        }
        self.buffers[self.cur][self.pos] = b;
        self.pos += 1;
    }

    /// Append a byte slice, splitting across buffer boundaries as needed.
    pub fn put_bytes(&mut self, mut s: &[u8]) {
        while self.pos + s.len() > BUFFER_SIZE {
            let k = BUFFER_SIZE - self.pos;
            self.buffers[self.cur][self.pos..].copy_from_slice(&s[..k]);
            self.pos = BUFFER_SIZE;
            s = &s[k..];
            self.advance_buffer();
        }
        self.buffers[self.cur][self.pos..self.pos + s.len()].copy_from_slice(s);
        self.pos += s.len();
    }

    /// Append a string.
    #[inline]
    pub fn put_str(&mut self, s: &str) {
        self.put_bytes(s.as_bytes());
    }

    /// Append at most the first `max_chars` characters of `s`.
    pub fn put_utf8_prefix(&mut self, s: &str, max_chars: usize) {
        let end = s
            .char_indices()
            .nth(max_chars)
            .map_or(s.len(), |(i, _)| i);
        self.put_bytes(&s.as_bytes()[..end]);
    }

    /// Append an unsigned decimal numeral, space-padded to `width`.
    pub fn put_uint(&mut self, mut x: u64, width: usize) {
        let mut tmp = [0u8; 20];
        let mut k = tmp.len();
        loop {
            k -= 1;
            tmp[k] = b'0' + (x % 10) as u8;
            x /= 10;
            if x == 0 {
                break;
            }
        }
        let n = tmp.len() - k;
        for _ in n..width {
            self.put_byte(b' ');
        }
        self.put_bytes(&tmp[k..]);
    }

    /// Append a hexadecimal numeral, zero-padded to `width`.
    pub fn put_hex(&mut self, mut x: u64, width: usize) {
        const DIGITS: &[u8; 16] = b"0123456789abcdef";
        let mut tmp = [0u8; 16];
        let mut k = tmp.len();
        loop {
            k -= 1;
            tmp[k] = DIGITS[(x & 0xf) as usize];
            x >>= 4;
            if x == 0 {
                break;
            }
        }
        let n = tmp.len() - k;
        for _ in n..width {
            self.put_byte(b'0');
        }
        self.put_bytes(&tmp[k..]);
    }

    /// Append one byte as a three-digit octal numeral.
    pub fn put_oct(&mut self, b: u8) {
        self.put_byte(b'0' + (b >> 6));
        self.put_byte(b'0' + ((b >> 3) & 7));
        self.put_byte(b'0' + (b & 7));
    }

    /// Append a URI-escaped string: printable ASCII passes through except
    /// `%` and `;`, everything else becomes `%xx`.
    pub fn put_uri_escaped(&mut self, s: &str) {
        for &b in s.as_bytes() {
            if (0x20..=0x7e).contains(&b) && b != b'%' && b != b';' {
                self.put_byte(b);
            } else {
                self.put_byte(b'%');
                self.put_hex(u64::from(b), 2);
            }
        }
    }

    /// Append a newline and flush when line-buffered. On Windows a CR is
    /// emitted first unless `lf_only` is set.
    pub fn put_newline(&mut self, lf_only: bool) {
        #[cfg(windows)]
        if !lf_only {
            self.put_byte(b'\r');
        }
        #[cfg(not(windows))]
        let _ = lf_only;
        self.put_byte(b'\n');
        self.check_flush();
    }

    /// Flush now if line-buffered and not held.
    #[inline]
    pub fn check_flush(&mut self) {
        if self.mode == Mode::FLUSH {
            self.flush();
        }
    }

    /// Hold the output: buffer everything, suppress flushes.
    pub fn hold(&mut self) {
        self.mode |= Mode::HOLD;
    }

    /// End a hold and commit: flush if line-buffered.
    pub fn launch(&mut self) {
        if self.mode.contains(Mode::HOLD) {
            self.mode.remove(Mode::HOLD);
            self.check_flush();
        }
    }

    /// True while output is held.
    pub const fn holding(&self) -> bool {
        self.mode.contains(Mode::HOLD)
    }

    /// Record that the current input turned out to be binary.
    pub fn set_binary(&mut self) {
        self.mode |= Mode::BINARY;
    }

    /// True when the current input was flagged binary.
    pub const fn is_binary(&self) -> bool {
        self.mode.contains(Mode::BINARY)
    }

    /// Bytes currently buffered and not yet flushed.
    pub fn buffered(&self) -> usize {
        self.cur * BUFFER_SIZE + self.pos
    }

    /// True once this writer latched an error or observed cancellation.
    pub const fn failed(&self) -> bool {
        self.eof
    }

    /// Flush the whole chain to the sink, waiting for this writer's turn
    /// in ordered mode. Errors are latched: the writer's EOF flag is set
    /// and the shared sync is cancelled; buffered bytes are dropped.
    pub fn flush(&mut self) {
        if self.cur == 0 && self.pos == 0 {
            return;
        }
        if !self.eof {
            if let Some(h) = &mut self.sync {
                if !h.acquire() {
                    self.eof = true;
                }
            }
            if !self.eof {
                let mut err = false;
                for i in 0..=self.cur {
                    let len = if i == self.cur { self.pos } else { BUFFER_SIZE };
                    if len == 0 {
                        continue;
                    }
                    let block = &self.buffers[i][..len];
                    let res = match &mut self.truncate {
                        Some(f) => f.write_block(&mut self.sink, block),
                        None => self.sink.write_all(block),
                    };
                    if res.is_err() {
                        err = true;
                        break;
                    }
                }
                if !err && self.sink.flush().is_err() {
                    err = true;
                }
                if err {
                    self.cancel();
                }
            }
        }
        self.cur = 0;
        self.pos = 0;
    }

    /// Drop all buffered output without writing it.
    pub fn discard(&mut self) {
        self.cur = 0;
        self.pos = 0;
    }

    /// Commit or abandon the current unit of work: flush if not held,
    /// discard if held, then reset the mode bits and release the sync lock
    /// in unordered mode.
    pub fn release(&mut self) {
        if self.mode.contains(Mode::HOLD) {
            self.discard();
        } else {
            self.flush();
        }
        self.mode = if self.line_buffered {
            Mode::FLUSH
        } else {
            Mode::empty()
        };
        if let Some(h) = &mut self.sync {
            h.release();
        }
    }

    /// Signal that this writer's slot is complete (ordered mode).
    pub fn finish(&mut self) {
        if let Some(h) = &mut self.sync {
            h.finish();
        }
    }

    /// Latch EOF on this writer and cancel the shared sync.
    pub fn cancel(&mut self) {
        self.eof = true;
        if let Some(h) = &self.sync {
            h.cancel();
        }
    }

    /// True once the shared sync was cancelled.
    pub fn cancelled(&self) -> bool {
        self.sync.as_ref().is_some_and(SyncHandle::cancelled)
    }

    /// Advance the cursor: flush if the sync lock is free, otherwise move
    /// to the next buffer in the chain, growing it when exhausted.
    fn advance_buffer(&mut self) {
        let can_flush = !self.mode.contains(Mode::HOLD)
            && match &mut self.sync {
                Some(h) => h.try_acquire(),
                None => true,
            };
        if can_flush {
            self.flush();
        } else {
            self.cur += 1;
            if self.cur == self.buffers.len() {
                self.buffers.push(vec![0; BUFFER_SIZE].into_boxed_slice());
            }
            self.pos = 0;
        }
    }
}

impl<W: Write> Drop for OutputBuffer<W> {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::SyncMode;
    use std::sync::Mutex;
    use std::thread;

    /// Sink that appends into a shared byte vector.
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Sink that fails after accepting a fixed number of bytes.
    struct FailingSink {
        remaining: usize,
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.remaining == 0 {
                return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
            }
            let n = buf.len().min(self.remaining);
            self.remaining -= n;
            Ok(n)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_appended_equals_flushed_plus_tail() {
        let sink = SharedSink::default();
        let mut out = OutputBuffer::new(sink.clone());
        let mut appended = 0usize;
        for i in 0..5000u64 {
            // Width 6 always pads the four-digit-or-less numeral.
            out.put_uint(i, 6);
            out.put_byte(b' ');
            appended += 7;
        }
        let flushed = sink.0.lock().unwrap().len();
        assert_eq!(appended, flushed + out.buffered());
        out.flush();
        assert_eq!(appended, sink.0.lock().unwrap().len());
    }

    #[test]
    fn test_chain_grows_instead_of_blocking() {
        let sync = Arc::new(OutputSync::new(SyncMode::Ordered));
        let sink = SharedSink::default();

        // Slot 0 never finishes, so slot 1 cannot take the lock and must
        // grow its chain while producing.
        let mut blocked = OutputBuffer::new(sink.clone());
        blocked.sync_on(sync.clone());
        assert_eq!(blocked.slot(), Some(0));

        let mut writer = OutputBuffer::new(sink.clone());
        writer.sync_on(sync.clone());
        assert_eq!(writer.slot(), Some(1));
        for _ in 0..3 * BUFFER_SIZE {
            writer.put_byte(b'x');
        }
        assert_eq!(writer.buffered(), 3 * BUFFER_SIZE);
        assert!(sink.0.lock().unwrap().is_empty());

        sync.cancel();
        drop(blocked);
        drop(writer);
    }

    #[test]
    fn test_hold_discard_and_hold_release() {
        let sink = SharedSink::default();
        let mut out = OutputBuffer::new(sink.clone());
        out.set_line_buffered();

        // Held output is abandoned by release().
        out.hold();
        out.put_str("partial");
        out.set_binary();
        out.release();
        assert!(sink.0.lock().unwrap().is_empty());
        assert!(!out.is_binary(), "release resets the mode bits");

        // Cleared hold commits on release().
        out.hold();
        out.put_str("keep");
        out.put_newline(true);
        assert!(sink.0.lock().unwrap().is_empty(), "hold suppresses flush");
        out.launch();
        out.release();
        assert_eq!(&*sink.0.lock().unwrap(), b"keep\n");
    }

    #[test]
    fn test_line_buffered_flushes_on_newline() {
        let sink = SharedSink::default();
        let mut out = OutputBuffer::new(sink.clone());
        out.set_line_buffered();
        out.put_str("a line");
        assert!(sink.0.lock().unwrap().is_empty());
        out.put_newline(true);
        assert_eq!(&*sink.0.lock().unwrap(), b"a line\n");
    }

    #[test]
    fn test_write_error_latches_eof_and_cancels() {
        let sync = Arc::new(OutputSync::new(SyncMode::Unordered));
        let mut out = OutputBuffer::new(FailingSink { remaining: 4 });
        out.sync_on(sync.clone());
        out.put_str("0123456789");
        out.flush();
        assert!(out.failed());
        assert!(sync.cancelled());

        // Subsequent flushes are no-ops.
        out.put_str("more");
        out.flush();
        assert!(out.failed());
    }

    #[test]
    fn test_unordered_flushes_never_interleave() {
        let sync = Arc::new(OutputSync::new(SyncMode::Unordered));
        let sink = SharedSink::default();
        let mut handles = Vec::new();
        for id in 0..2u8 {
            let sync = sync.clone();
            let sink = sink.clone();
            handles.push(thread::spawn(move || {
                let mut out = OutputBuffer::new(sink);
                out.sync_on(sync);
                let line = if id == 0 { "AAA\n" } else { "BBB\n" };
                out.put_str(line);
                out.flush();
                out.release();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let got = sink.0.lock().unwrap().clone();
        assert!(got == b"AAA\nBBB\n" || got == b"BBB\nAAA\n");
    }

    #[test]
    fn test_ordered_sparse_producers() {
        let sync = Arc::new(OutputSync::new(SyncMode::Ordered));
        let sink = SharedSink::default();
        let mut handles = Vec::new();
        for (slot, text) in [(0u64, "a\n"), (1, ""), (2, "c\n"), (3, "d\n")] {
            let sync = sync.clone();
            let sink = sink.clone();
            handles.push(thread::spawn(move || {
                let mut out = OutputBuffer::new(sink);
                out.sync_on(sync);
                out.begin(slot);
                if !text.is_empty() {
                    out.put_str(text);
                    out.flush();
                }
                out.release();
                out.finish();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(&*sink.0.lock().unwrap(), b"a\nc\nd\n");
        assert_eq!(sync.head_slot(), 4);
    }

    #[test]
    fn test_numerals() {
        let sink = SharedSink::default();
        let mut out = OutputBuffer::new(sink.clone());
        out.put_uint(42, 5);
        out.put_byte(b'|');
        out.put_hex(0xbeef, 8);
        out.put_byte(b'|');
        out.put_oct(b'A');
        out.flush();
        assert_eq!(&*sink.0.lock().unwrap(), b"   42|0000beef|101");
    }

    #[test]
    fn test_utf8_prefix_respects_char_boundaries() {
        let sink = SharedSink::default();
        let mut out = OutputBuffer::new(sink.clone());
        out.put_utf8_prefix("héllo", 2);
        out.flush();
        assert_eq!(&*sink.0.lock().unwrap(), "hé".as_bytes());
    }

    #[test]
    fn test_uri_escaping() {
        let sink = SharedSink::default();
        let mut out = OutputBuffer::new(sink.clone());
        out.put_uri_escaped("a b%c;d\n");
        out.flush();
        assert_eq!(&*sink.0.lock().unwrap(), b"a b%25c%3bd%0a");
    }
}
