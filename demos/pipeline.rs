//! Pipeline demo: many workers, one sink, ordered or unordered.
//!
//! Each worker owns a buffered writer attached to the shared sync object
//! and emits a burst of numbered lines. Run with `--ordered` to see the
//! slot-turn discipline keep worker output in spawn order no matter how
//! the threads interleave; without it, whole flushes interleave freely.

use std::io::{self, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use sift::{OutputBuffer, OutputSync, SyncMode};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "sift-pipeline", about = "Synchronized output pipeline demo")]
struct Args {
    /// Commit worker output in slot order.
    #[arg(long)]
    ordered: bool,
    /// Number of worker threads.
    #[arg(long, default_value_t = 8)]
    workers: usize,
    /// Lines emitted per worker.
    #[arg(long, default_value_t = 5)]
    lines: usize,
    /// Width-limit output lines to this many columns (0 = off).
    #[arg(long, default_value_t = 0)]
    width: usize,
}

/// Shared sink: every write goes straight to stdout.
struct StdoutSink;

impl Write for StdoutSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().lock().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().lock().flush()
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mode = if args.ordered {
        SyncMode::Ordered
    } else {
        SyncMode::Unordered
    };
    let sync = Arc::new(OutputSync::new(mode));

    let mut handles = Vec::new();
    for worker in 0..args.workers {
        let sync = Arc::clone(&sync);
        let lines = args.lines;
        let width = args.width;
        handles.push(
            thread::Builder::new()
                .name(format!("sift-worker-{worker}"))
                .spawn(move || {
                    let mut out = OutputBuffer::new(StdoutSink);
                    if width > 0 {
                        out.set_width_limit(width);
                    }
                    out.sync_on(sync);

                    // Workers deliberately finish out of order.
                    thread::sleep(Duration::from_millis(((worker * 7) % 5) as u64 * 10));

                    for line in 0..lines {
                        out.put_str("worker ");
                        out.put_uint(worker as u64, 2);
                        out.put_str("  line ");
                        out.put_uint(line as u64, 3);
                        out.put_str("  offset 0x");
                        out.put_hex((worker * lines + line) as u64, 6);
                        out.put_newline(true);
                    }
                    out.flush();
                    out.release();
                    out.finish();
                })?,
        );
    }

    for handle in handles {
        handle.join().expect("worker panicked");
    }
    Ok(())
}
