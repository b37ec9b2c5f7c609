//! Hex dump scratch state for binary match output.
//!
//! Each writer owns one [`HexDump`]. Bytes are deposited with a color class
//! and flushed a row at a time; rows identical to the previous row fold into
//! a single `*` line the way traditional dump tools do.

use std::io::Write;

use super::writer::OutputBuffer;

/// Upper bound on hex columns per row.
pub const MAX_HEX_COLUMNS: usize = 64;

/// Color class of a dumped byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexClass {
    /// Byte inside a match.
    Match,
    /// Byte on a matching line, outside the match.
    Line,
    /// Byte inside a match shown as context.
    ContextMatch,
    /// Context byte outside any match.
    ContextLine,
}

impl HexClass {
    /// SGR sequence used when color is enabled.
    const fn color(self) -> &'static str {
        match self {
            Self::Match => "\x1b[1;31m",
            Self::Line => "\x1b[1m",
            Self::ContextMatch => "\x1b[1;35m",
            Self::ContextLine => "\x1b[2m",
        }
    }
}

type Slot = Option<(HexClass, u8)>;

/// Per-writer hex dump state.
pub struct HexDump {
    columns: usize,
    color: bool,
    /// Byte offset of the first column of the pending row.
    base: u64,
    row: [Slot; MAX_HEX_COLUMNS],
    prev: [Slot; MAX_HEX_COLUMNS],
    /// A `*` fold line has already been emitted for the current run.
    starred: bool,
    any: bool,
}

impl HexDump {
    /// Create a dump state with `columns` bytes per row (clamped to 1..=64).
    pub fn new(columns: usize, color: bool) -> Self {
        Self {
            columns: columns.clamp(1, MAX_HEX_COLUMNS),
            color,
            base: 0,
            row: [None; MAX_HEX_COLUMNS],
            prev: [None; MAX_HEX_COLUMNS],
            starred: false,
            any: false,
        }
    }

    /// Deposit `data` starting at absolute `offset` with one color class,
    /// flushing completed rows through `out`.
    pub fn dump<W: Write>(
        &mut self,
        out: &mut OutputBuffer<W>,
        class: HexClass,
        offset: u64,
        data: &[u8],
    ) {
        let cols = self.columns as u64;
        let mut pos = offset;
        for &b in data {
            let row_base = pos - pos % cols;
            if self.any && row_base != self.base {
                self.line(out);
            }
            self.base = row_base;
            self.row[(pos - row_base) as usize] = Some((class, b));
            self.any = true;
            pos += 1;
            if pos % cols == 0 {
                self.line(out);
            }
        }
    }

    /// Jump: if `offset` does not continue the pending row, complete it.
    pub fn next<W: Write>(&mut self, out: &mut OutputBuffer<W>, offset: u64) {
        let cols = self.columns as u64;
        if self.any && offset - offset % cols != self.base {
            self.done(out);
        }
    }

    /// True while a partial row is pending.
    pub const fn incomplete(&self) -> bool {
        self.any
    }

    /// Complete the pending row and reset the fold state so the next
    /// section never folds into this one.
    pub fn done<W: Write>(&mut self, out: &mut OutputBuffer<W>) {
        if self.any {
            self.line(out);
        }
        self.prev = [None; MAX_HEX_COLUMNS];
        self.starred = false;
    }

    /// Emit the pending row, folding repeats into a single `*` line.
    fn line<W: Write>(&mut self, out: &mut OutputBuffer<W>) {
        if !self.any {
            return;
        }
        if self.row == self.prev {
            if !self.starred {
                out.put_str("*");
                out.put_newline(false);
                self.starred = true;
            }
        } else {
            self.starred = false;
            out.put_hex(self.base, 8);
            out.put_str("  ");
            for col in 0..self.columns {
                match self.row[col] {
                    Some((class, b)) => {
                        if self.color {
                            out.put_str(class.color());
                        }
                        out.put_hex(u64::from(b), 2);
                        if self.color {
                            out.put_str("\x1b[m");
                        }
                    }
                    None => out.put_str("--"),
                }
                out.put_byte(b' ');
            }
            out.put_byte(b'|');
            for col in 0..self.columns {
                let c = match self.row[col] {
                    Some((_, b)) if (0x20..0x7f).contains(&b) => b,
                    Some(_) => b'.',
                    None => b' ',
                };
                out.put_byte(c);
            }
            out.put_byte(b'|');
            out.put_newline(false);
        }
        self.prev = self.row;
        self.row = [None; MAX_HEX_COLUMNS];
        self.any = false;
        self.base += self.columns as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

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

    fn lines(sink: &SharedSink) -> Vec<String> {
        String::from_utf8(sink.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn test_rows_flush_at_column_boundary() {
        let sink = SharedSink::default();
        let mut out = OutputBuffer::new(sink.clone());
        let mut dump = HexDump::new(8, false);
        dump.dump(&mut out, HexClass::Line, 0, b"ABCDEFGH");
        dump.done(&mut out);
        out.flush();

        let lines = lines(&sink);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("00000000  41 42 43 44 45 46 47 48 "));
        assert!(lines[0].ends_with("|ABCDEFGH|"));
    }

    #[test]
    fn test_identical_rows_fold_into_star() {
        let sink = SharedSink::default();
        let mut out = OutputBuffer::new(sink.clone());
        let mut dump = HexDump::new(4, false);
        dump.dump(&mut out, HexClass::Line, 0, b"aaaaaaaaaaaaaaaa");
        dump.done(&mut out);
        out.flush();

        let lines = lines(&sink);
        // First row printed, the three repeats fold into one star.
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "*");
    }

    #[test]
    fn test_partial_row_pads_missing_columns() {
        let sink = SharedSink::default();
        let mut out = OutputBuffer::new(sink.clone());
        let mut dump = HexDump::new(8, false);
        dump.dump(&mut out, HexClass::Match, 0, b"xy");
        assert!(dump.incomplete());
        dump.done(&mut out);
        out.flush();

        let lines = lines(&sink);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("78 79 -- "));
        assert!(lines[0].ends_with("|xy      |"));
    }

    #[test]
    fn test_offset_jump_completes_pending_row() {
        let sink = SharedSink::default();
        let mut out = OutputBuffer::new(sink.clone());
        let mut dump = HexDump::new(8, false);
        dump.dump(&mut out, HexClass::Match, 0, b"ab");
        dump.next(&mut out, 64);
        assert!(!dump.incomplete());
        dump.dump(&mut out, HexClass::Match, 64, b"cd");
        dump.done(&mut out);
        out.flush();

        let lines = lines(&sink);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00000000"));
        assert!(lines[1].starts_with("00000040"));
    }

    #[test]
    fn test_color_classes_wrap_bytes() {
        let sink = SharedSink::default();
        let mut out = OutputBuffer::new(sink.clone());
        let mut dump = HexDump::new(4, true);
        dump.dump(&mut out, HexClass::Match, 0, b"Q");
        dump.done(&mut out);
        out.flush();

        let text = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("\x1b[1;31m51\x1b[m"));
    }
}
