//! Output pipeline benchmarks: writer append primitives and the cost of
//! the ordered commit discipline relative to unordered.

use std::io::{self, Write};
use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sift::{OutputBuffer, OutputSync, SyncMode};

/// Sink that counts bytes and drops them.
#[derive(Default)]
struct NullSink(u64);

impl Write for NullSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn writer_appends(c: &mut Criterion) {
    c.bench_function("writer_put_str_1k_lines", |b| {
        b.iter(|| {
            let mut out = OutputBuffer::new(NullSink::default());
            for i in 0..1000u64 {
                out.put_str(black_box("src/query/ui.rs"));
                out.put_byte(b':');
                out.put_uint(black_box(i), 6);
                out.put_byte(b':');
                out.put_str(black_box("a matching line of ordinary length"));
                out.put_newline(true);
            }
            out.flush();
        });
    });

    c.bench_function("writer_put_hex_and_uint", |b| {
        b.iter(|| {
            let mut out = OutputBuffer::new(NullSink::default());
            for i in 0..1000u64 {
                out.put_hex(black_box(i * 2654435761), 8);
                out.put_uint(black_box(i), 10);
            }
            out.flush();
        });
    });
}

fn pipeline(c: &mut Criterion) {
    for (name, mode) in [
        ("pipeline_unordered_8_workers", SyncMode::Unordered),
        ("pipeline_ordered_8_workers", SyncMode::Ordered),
    ] {
        c.bench_function(name, |b| {
            b.iter(|| {
                let sync = Arc::new(OutputSync::new(mode));
                let mut handles = Vec::new();
                for w in 0..8u64 {
                    let sync = Arc::clone(&sync);
                    handles.push(thread::spawn(move || {
                        let mut out = OutputBuffer::new(NullSink::default());
                        out.sync_on(sync);
                        for i in 0..64u64 {
                            out.put_str("worker output line ");
                            out.put_uint(w * 1000 + i, 6);
                            out.put_newline(true);
                        }
                        out.flush();
                        out.release();
                        out.finish();
                    }));
                }
                for h in handles {
                    h.join().unwrap();
                }
            });
        });
    }
}

criterion_group!(benches, writer_appends, pipeline);
criterion_main!(benches);
