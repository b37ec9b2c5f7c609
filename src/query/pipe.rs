//! The search pipe: a byte stream with a non-blocking read end.
//!
//! The write end implements [`io::Write`] for the search thread; the read
//! end hands bytes to the UI thread without ever blocking it. A bounded
//! channel of chunks plays the role of the OS pipe buffer: a full pipe
//! applies back-pressure to the search thread, never to the UI.

use std::io::{self, Write};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

/// Default channel capacity, in chunks.
const PIPE_CHUNKS: usize = 64;

/// Result of one non-blocking read from the pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRead {
    /// `n` bytes were copied into the caller's buffer.
    Data(usize),
    /// No bytes are ready right now.
    Empty,
    /// The write end is closed and everything has been drained.
    Eof,
}

/// Create a pipe. Dropping the writer signals EOF to the reader; dropping
/// the reader makes writes fail with [`io::ErrorKind::BrokenPipe`].
pub fn search_pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = bounded::<Vec<u8>>(PIPE_CHUNKS);
    (
        PipeWriter { tx },
        PipeReader {
            rx,
            pending: Vec::new(),
            pos: 0,
        },
    )
}

/// Write end of the search pipe, held by the search thread.
pub struct PipeWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Read end of the search pipe, held exclusively by the UI thread.
pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    /// Tail of a chunk that did not fit the caller's buffer.
    pending: Vec<u8>,
    pos: usize,
}

impl PipeReader {
    /// Copy available bytes into `buf` without blocking.
    pub fn try_read(&mut self, buf: &mut [u8]) -> TryRead {
        if let Some(n) = self.drain_pending(buf) {
            return TryRead::Data(n);
        }
        match self.rx.try_recv() {
            Ok(chunk) => TryRead::Data(self.take_chunk(chunk, buf)),
            Err(TryRecvError::Empty) => TryRead::Empty,
            Err(TryRecvError::Disconnected) => TryRead::Eof,
        }
    }

    /// Copy available bytes into `buf`, waiting up to `timeout` for data.
    /// Used only by the exit print pass, off the interactive loop.
    pub fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> TryRead {
        if let Some(n) = self.drain_pending(buf) {
            return TryRead::Data(n);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(chunk) => TryRead::Data(self.take_chunk(chunk, buf)),
            Err(RecvTimeoutError::Timeout) => TryRead::Empty,
            Err(RecvTimeoutError::Disconnected) => TryRead::Eof,
        }
    }

    fn drain_pending(&mut self, buf: &mut [u8]) -> Option<usize> {
        if self.pos >= self.pending.len() {
            return None;
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        if self.pos >= self.pending.len() {
            self.pending.clear();
            self.pos = 0;
        }
        Some(n)
    }

    fn take_chunk(&mut self, chunk: Vec<u8>, buf: &mut [u8]) -> usize {
        let n = buf.len().min(chunk.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.pending = chunk;
            self.pos = n;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_roundtrip_without_blocking() {
        let (mut w, mut r) = search_pipe();
        let mut buf = [0u8; 16];
        assert_eq!(r.try_read(&mut buf), TryRead::Empty);

        w.write_all(b"hello").unwrap();
        assert_eq!(r.try_read(&mut buf), TryRead::Data(5));
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(r.try_read(&mut buf), TryRead::Empty);
    }

    #[test]
    fn test_partial_chunk_is_kept_pending() {
        let (mut w, mut r) = search_pipe();
        w.write_all(b"abcdefgh").unwrap();

        let mut buf = [0u8; 3];
        assert_eq!(r.try_read(&mut buf), TryRead::Data(3));
        assert_eq!(&buf, b"abc");
        assert_eq!(r.try_read(&mut buf), TryRead::Data(3));
        assert_eq!(&buf, b"def");
        assert_eq!(r.try_read(&mut buf), TryRead::Data(2));
        assert_eq!(&buf[..2], b"gh");
    }

    #[test]
    fn test_writer_drop_is_eof_after_drain() {
        let (mut w, mut r) = search_pipe();
        w.write_all(b"tail").unwrap();
        drop(w);

        let mut buf = [0u8; 16];
        assert_eq!(r.try_read(&mut buf), TryRead::Data(4));
        assert_eq!(r.try_read(&mut buf), TryRead::Eof);
    }

    #[test]
    fn test_reader_drop_breaks_the_writer() {
        let (mut w, r) = search_pipe();
        drop(r);
        let err = w.write_all(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_backpressure_blocks_writer_not_reader() {
        let (mut w, mut r) = search_pipe();
        let producer = thread::spawn(move || {
            // More chunks than the pipe holds; the writer blocks until the
            // reader drains, then finishes.
            for _ in 0..2 * super::PIPE_CHUNKS {
                w.write_all(b"chunk").unwrap();
            }
        });

        let mut got = 0usize;
        let mut buf = [0u8; 64];
        loop {
            match r.read_timeout(&mut buf, Duration::from_secs(5)) {
                TryRead::Data(n) => got += n,
                TryRead::Empty => {}
                TryRead::Eof => break,
            }
        }
        producer.join().unwrap();
        assert_eq!(got, 2 * super::PIPE_CHUNKS * 5);
    }
}
